use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogState;
use crate::configuration::StandingConfiguration;
use crate::model::{ItemId, VendorId};

/// A catalog-integrity problem that makes a configuration unsafe to materialize.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockingIssue {
    #[serde(rename_all = "camelCase")]
    MissingVendor { vendor_id: VendorId },
    #[serde(rename_all = "camelCase")]
    DeletedItem { item_id: ItemId },
}

impl Display for BlockingIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingVendor { vendor_id } => write!(f, "vendor {vendor_id} no longer exists"),
            Self::DeletedItem { item_id } => write!(f, "item {item_id} no longer exists"),
        }
    }
}

/// Blocking issues for `configuration`, sorted and deduplicated.
///
/// Only existence matters here. Inactive vendors and items pass; a missing vendor or
/// an ordered item absent from both the menu and meal catalogs blocks.
#[must_use]
pub fn blocking_issues(
    configuration: &StandingConfiguration,
    catalog: &CatalogState,
) -> Vec<BlockingIssue> {
    let references = configuration.references();
    let vendors = references
        .vendors
        .into_iter()
        .filter(|vendor_id| !catalog.vendor_exists(vendor_id))
        .map(|vendor_id| BlockingIssue::MissingVendor { vendor_id });
    let items = references
        .items
        .into_iter()
        .filter(|item_id| !catalog.item_exists(item_id))
        .map(|item_id| BlockingIssue::DeletedItem { item_id });
    vendors.chain(items).collect()
}

#[must_use]
pub fn is_blocked(configuration: &StandingConfiguration, catalog: &CatalogState) -> bool {
    !blocking_issues(configuration, catalog).is_empty()
}
