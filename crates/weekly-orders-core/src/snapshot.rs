use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime, Time};

use crate::configuration::StandingConfiguration;
use crate::model::{ClientId, DeliveryDay};
use crate::week::WeekBounds;
use crate::ReconcileError;

pub const DEFAULT_CUTOFF_DAY: DeliveryDay = DeliveryDay::Tuesday;

/// Weekday and time of day in the week before delivery after which changes no longer
/// affect that delivery week.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CutoffPolicy {
    pub day: DeliveryDay,
    #[serde(with = "hh_mm")]
    pub time: Time,
}

impl Default for CutoffPolicy {
    fn default() -> Self {
        Self { day: DEFAULT_CUTOFF_DAY, time: Time::MIDNIGHT }
    }
}

impl CutoffPolicy {
    /// Build a policy from a weekday name and an `HH:MM` (or `HH:MM:SS`) time of day.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Validation`] when either part is malformed.
    pub fn parse(day: &str, time_of_day: &str) -> Result<Self, ReconcileError> {
        let day = DeliveryDay::parse(day).ok_or_else(|| {
            ReconcileError::Validation(format!("cutoff day MUST be a weekday name, got {day:?}"))
        })?;
        Ok(Self { day, time: parse_time_of_day(time_of_day)? })
    }

    /// Cutoff instant governing `week`, taken in the preceding week and read as UTC.
    #[must_use]
    pub fn cutoff_for(&self, week: WeekBounds) -> OffsetDateTime {
        let date = week.previous().date_for(self.day);
        PrimitiveDateTime::new(date, self.time).assume_utc()
    }

    #[must_use]
    pub fn time_of_day(&self) -> String {
        format!("{:02}:{:02}", self.time.hour(), self.time.minute())
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
///
/// # Errors
/// Returns [`ReconcileError::Validation`] when the value is not a valid time of day.
pub fn parse_time_of_day(raw: &str) -> Result<Time, ReconcileError> {
    let invalid = || ReconcileError::Validation(format!("cutoff time MUST be HH:MM, got {raw:?}"));
    let mut parts = raw.trim().split(':');
    let mut next = || -> Result<Option<u8>, ReconcileError> {
        parts.next().map(|part| part.parse::<u8>().map_err(|_| invalid())).transpose()
    };
    let hour = next()?.ok_or_else(invalid)?;
    let minute = next()?.ok_or_else(invalid)?;
    let second = next()?.unwrap_or(0);
    if next()?.is_some() {
        return Err(invalid());
    }
    Time::from_hms(hour, minute, second).map_err(|_| invalid())
}

mod hh_mm {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Time;

    pub fn serialize<S: Serializer>(value: &Time, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:02}:{:02}", value.hour(), value.minute()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Time, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time_of_day(&raw).map_err(serde::de::Error::custom)
    }
}

/// One append-only entry of a client's configuration change log.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    pub client_id: ClientId,
    /// Instant the configuration took effect; used for cutoff comparison.
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    /// Instant the log row was written.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub actor: String,
    pub summary: String,
    pub configuration: StandingConfiguration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Snapshot,
    Live,
}

impl SnapshotSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectedSnapshot {
    pub configuration: StandingConfiguration,
    #[serde(with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    pub source: SnapshotSource,
}

/// Choose the configuration that governed deliveries for a week.
///
/// The latest history entry recorded at or before `cutoff` wins; among equal
/// timestamps the later log position wins. Without one, the live configuration is
/// used and tagged [`SnapshotSource::Live`]. With neither, there is no expectation.
#[must_use]
pub fn select_snapshot(
    history: &[HistorySnapshot],
    live: Option<&StandingConfiguration>,
    cutoff: OffsetDateTime,
) -> Option<SelectedSnapshot> {
    let chosen = history
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.recorded_at <= cutoff)
        .max_by_key(|(position, entry)| (entry.recorded_at, *position))
        .map(|(_, entry)| entry);

    match chosen {
        Some(entry) => Some(SelectedSnapshot {
            configuration: entry.configuration.clone(),
            recorded_at: Some(entry.recorded_at),
            created_at: Some(entry.created_at),
            source: SnapshotSource::Snapshot,
        }),
        None => live.map(|configuration| SelectedSnapshot {
            configuration: configuration.clone(),
            recorded_at: None,
            created_at: None,
            source: SnapshotSource::Live,
        }),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime, time};
    use time::Duration;

    use super::*;
    use crate::configuration::{CustomPlan, ServicePlan};

    fn custom(description: &str) -> StandingConfiguration {
        StandingConfiguration {
            plan: ServicePlan::Custom(CustomPlan {
                description: description.to_string(),
                price: rust_decimal::Decimal::ONE,
                vendor_id: None,
                delivery_day: DeliveryDay::Monday,
            }),
            notes: None,
            case_id: None,
        }
    }

    fn entry(description: &str, recorded_at: OffsetDateTime) -> HistorySnapshot {
        HistorySnapshot {
            client_id: ClientId::from("C1"),
            recorded_at,
            created_at: recorded_at + Duration::seconds(1),
            actor: "navigator".to_string(),
            summary: format!("set {description}"),
            configuration: custom(description),
        }
    }

    #[test]
    fn default_cutoff_is_tuesday_midnight_of_previous_week() {
        let week = WeekBounds::containing(date!(2026 - 02 - 22));
        assert_eq!(CutoffPolicy::default().cutoff_for(week), datetime!(2026-02-17 00:00 UTC));
    }

    #[test]
    fn configured_cutoff_uses_day_and_time() -> Result<(), ReconcileError> {
        let policy = CutoffPolicy::parse("friday", "17:30")?;
        let week = WeekBounds::containing(date!(2026 - 02 - 25));
        assert_eq!(policy.cutoff_for(week), datetime!(2026-02-20 17:30 UTC));
        assert_eq!(policy.time_of_day(), "17:30");
        assert!(CutoffPolicy::parse("Caturday", "00:00").is_err());
        assert!(CutoffPolicy::parse("Monday", "25:00").is_err());
        assert_eq!(parse_time_of_day("08:15:30")?, time!(08:15:30));
        Ok(())
    }

    #[test]
    fn latest_entry_at_or_before_cutoff_wins() {
        let cutoff = datetime!(2026-02-17 00:00 UTC);
        let history = vec![
            entry("old", datetime!(2026-02-01 09:00 UTC)),
            entry("at-cutoff", cutoff),
            entry("too-late", datetime!(2026-02-18 09:00 UTC)),
        ];
        let selected = select_snapshot(&history, Some(&custom("live")), cutoff);
        let Some(selected) = selected else {
            panic!("expected a snapshot");
        };
        assert_eq!(selected.source, SnapshotSource::Snapshot);
        assert_eq!(selected.configuration, custom("at-cutoff"));
        assert_eq!(selected.recorded_at, Some(cutoff));
    }

    #[test]
    fn equal_timestamps_prefer_later_log_position() {
        let at = datetime!(2026-02-10 12:00 UTC);
        let history = vec![entry("first", at), entry("second", at)];
        let selected = select_snapshot(&history, None, datetime!(2026-02-17 00:00 UTC));
        assert_eq!(selected.map(|s| s.configuration), Some(custom("second")));
    }

    #[test]
    fn falls_back_to_live_then_nothing() {
        let cutoff = datetime!(2026-02-17 00:00 UTC);
        let history = vec![entry("future", datetime!(2026-03-01 00:00 UTC))];

        let live = select_snapshot(&history, Some(&custom("live")), cutoff);
        assert_eq!(live.as_ref().map(|s| s.source), Some(SnapshotSource::Live));
        assert_eq!(live.and_then(|s| s.recorded_at), None);

        assert_eq!(select_snapshot(&history, None, cutoff), None);
        assert_eq!(select_snapshot(&[], None, cutoff), None);
    }
}
