use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Date, Weekday};
use ulid::Ulid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a client (the person receiving deliveries).
    ClientId
);
string_id!(
    /// Identifier of a vendor in the catalog.
    VendorId
);
string_id!(
    /// Identifier of a menu item or meal item in the catalog.
    ItemId
);
string_id!(BoxTypeId);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OrderId(pub Ulid);

impl OrderId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SelectionId(pub Ulid);

impl SelectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SelectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SelectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ServiceKind {
    Food,
    Meal,
    Boxes,
    Custom,
}

impl ServiceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Food => "Food",
            Self::Meal => "Meal",
            Self::Boxes => "Boxes",
            Self::Custom => "Custom",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Food" => Some(Self::Food),
            "Meal" => Some(Self::Meal),
            "Boxes" => Some(Self::Boxes),
            "Custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// A day of the delivery week. Weeks run Sunday through Saturday.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DeliveryDay {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DeliveryDay {
    pub const ALL: [Self; 7] = [
        Self::Sunday,
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sunday => "Sunday",
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
            Self::Saturday => "Saturday",
        }
    }

    /// Parse a weekday name, ignoring ASCII case and surrounding whitespace.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|day| day.as_str().eq_ignore_ascii_case(value))
    }

    #[must_use]
    pub fn days_from_sunday(self) -> u8 {
        match self {
            Self::Sunday => 0,
            Self::Monday => 1,
            Self::Tuesday => 2,
            Self::Wednesday => 3,
            Self::Thursday => 4,
            Self::Friday => 5,
            Self::Saturday => 6,
        }
    }

    #[must_use]
    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sunday => Self::Sunday,
            Weekday::Monday => Self::Monday,
            Weekday::Tuesday => Self::Tuesday,
            Weekday::Wednesday => Self::Wednesday,
            Weekday::Thursday => Self::Thursday,
            Weekday::Friday => Self::Friday,
            Weekday::Saturday => Self::Saturday,
        }
    }
}

impl Display for DeliveryDay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Menu,
    Meal,
}

impl ItemKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Menu => "menu",
            Self::Meal => "meal",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "menu" => Some(Self::Menu),
            "meal" => Some(Self::Meal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Scheduled,
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(Self::Scheduled),
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Render a calendar date as `YYYY-MM-DD`.
#[must_use]
pub fn format_iso_date(value: Date) -> String {
    format!("{:04}-{:02}-{:02}", value.year(), u8::from(value.month()), value.day())
}

/// Parse a strict `YYYY-MM-DD` calendar date.
///
/// # Errors
/// Returns a description of the problem when the input is not a valid ISO calendar date.
pub fn parse_iso_date(raw: &str) -> Result<Date, String> {
    let bytes = raw.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes.iter().enumerate().all(|(index, byte)| match index {
            4 | 7 => *byte == b'-',
            _ => byte.is_ascii_digit(),
        });
    if !shape_ok {
        return Err(format!("date MUST be formatted as YYYY-MM-DD, got {raw:?}"));
    }

    Date::parse(raw, time::macros::format_description!("[year]-[month]-[day]"))
        .map_err(|err| format!("invalid calendar date {raw:?}: {err}"))
}

/// Serde adapter for `YYYY-MM-DD` dates.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    /// # Errors
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_iso_date(*value))
    }

    /// # Errors
    /// Fails when the input is not a strict ISO calendar date.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_iso_date(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::Date;

        /// # Errors
        /// Propagates serializer errors.
        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            value: &Option<Date>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(date) => serializer.serialize_some(&super::super::format_iso_date(*date)),
                None => serializer.serialize_none(),
            }
        }

        /// # Errors
        /// Fails when a present value is not a strict ISO calendar date.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Date>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|value| super::super::parse_iso_date(&value))
                .transpose()
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn delivery_day_parse_is_case_insensitive() {
        assert_eq!(DeliveryDay::parse("monday"), Some(DeliveryDay::Monday));
        assert_eq!(DeliveryDay::parse(" Saturday "), Some(DeliveryDay::Saturday));
        assert_eq!(DeliveryDay::parse("Someday"), None);
    }

    #[test]
    fn delivery_day_matches_time_weekday_numbering() {
        for day in DeliveryDay::ALL {
            let weekday = match day {
                DeliveryDay::Sunday => Weekday::Sunday,
                DeliveryDay::Monday => Weekday::Monday,
                DeliveryDay::Tuesday => Weekday::Tuesday,
                DeliveryDay::Wednesday => Weekday::Wednesday,
                DeliveryDay::Thursday => Weekday::Thursday,
                DeliveryDay::Friday => Weekday::Friday,
                DeliveryDay::Saturday => Weekday::Saturday,
            };
            assert_eq!(DeliveryDay::from_weekday(weekday), day);
            assert_eq!(weekday.number_days_from_sunday(), day.days_from_sunday());
        }
    }

    #[test]
    fn iso_dates_round_trip_and_reject_loose_shapes() {
        assert_eq!(parse_iso_date("2026-02-22"), Ok(date!(2026 - 02 - 22)));
        assert_eq!(format_iso_date(date!(2026 - 02 - 22)), "2026-02-22");
        assert!(parse_iso_date("2026-2-22").is_err());
        assert!(parse_iso_date("2026-02-30").is_err());
        assert!(parse_iso_date("22/02/2026").is_err());
    }
}
