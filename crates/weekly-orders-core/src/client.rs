use serde::{Deserialize, Serialize};
use time::Date;

use crate::configuration::StandingConfiguration;
use crate::model::{iso_date, ClientId};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientProfile {
    pub id: ClientId,
    pub full_name: String,
    pub deliveries_allowed: bool,
    #[serde(default, with = "iso_date::option", skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_configuration: Option<StandingConfiguration>,
}

impl ClientProfile {
    /// Whether the client should receive deliveries for a week starting on `week_start`.
    #[must_use]
    pub fn is_eligible(&self, week_start: Date) -> bool {
        self.deliveries_allowed
            && self.expiration_date.map_or(true, |expires| expires >= week_start)
    }
}
