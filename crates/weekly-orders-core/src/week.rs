use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::model::{iso_date, parse_iso_date, DeliveryDay};
use crate::ReconcileError;

/// A Sunday..Saturday delivery week, both ends inclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "camelCase")]
pub struct WeekBounds {
    #[serde(with = "iso_date")]
    pub start: Date,
    #[serde(with = "iso_date")]
    pub end: Date,
}

impl WeekBounds {
    /// Bounds of the week containing `date`. Pure calendar arithmetic, no timezone involved.
    #[must_use]
    pub fn containing(date: Date) -> Self {
        let offset = i64::from(date.weekday().number_days_from_sunday());
        let start = date.saturating_sub(Duration::days(offset));
        Self { start, end: start.saturating_add(Duration::days(6)) }
    }

    /// Concrete date of `day` inside this week.
    #[must_use]
    pub fn date_for(&self, day: DeliveryDay) -> Date {
        self.start.saturating_add(Duration::days(i64::from(day.days_from_sunday())))
    }

    #[must_use]
    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }

    #[must_use]
    pub fn previous(&self) -> Self {
        Self::containing(self.start.saturating_sub(Duration::days(7)))
    }
}

/// Start (Sunday) of the week containing `date`.
#[must_use]
pub fn week_start(date: Date) -> Date {
    WeekBounds::containing(date).start
}

/// End (Saturday) of the week containing `date`.
#[must_use]
pub fn week_end(date: Date) -> Date {
    WeekBounds::containing(date).end
}

/// Parse a caller-supplied week start and snap it to its Sunday.
///
/// # Errors
/// Returns [`ReconcileError::Validation`] when `raw` is not a `YYYY-MM-DD` calendar date.
pub fn parse_week_start(raw: &str) -> Result<WeekBounds, ReconcileError> {
    let date = parse_iso_date(raw.trim())
        .map_err(|err| ReconcileError::Validation(format!("weekStart: {err}")))?;
    Ok(WeekBounds::containing(date))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::macros::date;

    use super::*;

    #[test]
    fn reference_week_spans_sunday_to_saturday() {
        let week = WeekBounds::containing(date!(2026 - 02 - 25));
        assert_eq!(week.start, date!(2026 - 02 - 22));
        assert_eq!(week.end, date!(2026 - 02 - 28));
        assert_eq!(week.date_for(DeliveryDay::Monday), date!(2026 - 02 - 23));
        assert_eq!(week.date_for(DeliveryDay::Saturday), date!(2026 - 02 - 28));
    }

    #[test]
    fn week_crossing_year_boundary() {
        let week = WeekBounds::containing(date!(2027 - 01 - 01));
        assert_eq!(week.start, date!(2026 - 12 - 27));
        assert_eq!(week.end, date!(2027 - 01 - 02));
    }

    #[test]
    fn parse_week_start_snaps_to_sunday() -> Result<(), ReconcileError> {
        let week = parse_week_start("2026-02-24")?;
        assert_eq!(week.start, date!(2026 - 02 - 22));
        Ok(())
    }

    #[test]
    fn parse_week_start_rejects_malformed_input() {
        for raw in ["", "2026/02/22", "2026-02-31", "next week"] {
            match parse_week_start(raw) {
                Err(ReconcileError::Validation(message)) => {
                    assert!(message.contains("weekStart"), "unexpected message {message}");
                }
                other => panic!("expected validation error for {raw:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn previous_week_is_seven_days_earlier() {
        let week = WeekBounds::containing(date!(2026 - 03 - 01));
        assert_eq!(week.previous().start, date!(2026 - 02 - 22));
    }

    proptest! {
        #[test]
        fn property_week_bounds_contain_date_and_are_idempotent(offset in -200_000_i64..200_000) {
            let d = date!(2000 - 01 - 01) + Duration::days(offset);
            let start = week_start(d);
            let end = week_end(d);
            prop_assert!(start <= d && d <= end);
            prop_assert_eq!(end, start + Duration::days(6));
            prop_assert_eq!(week_start(start), start);
            prop_assert_eq!(DeliveryDay::from_weekday(start.weekday()), DeliveryDay::Sunday);
        }
    }
}
