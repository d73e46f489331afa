use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::{DeliveryDay, ItemId, ItemKind, VendorId};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VendorRecord {
    pub id: VendorId,
    pub name: String,
    #[serde(default)]
    pub delivery_days: Vec<DeliveryDay>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: ItemId,
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<VendorId>,
    pub name: String,
    pub unit_value: Decimal,
    pub is_active: bool,
}

/// Immutable catalog view loaded once per reconciliation run.
///
/// Presence in a map means the entity exists; `is_active` only records whether it is
/// currently offered.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CatalogState {
    pub vendors: BTreeMap<VendorId, VendorRecord>,
    pub menu_items: BTreeMap<ItemId, CatalogItem>,
    pub meal_items: BTreeMap<ItemId, CatalogItem>,
}

impl CatalogState {
    #[must_use]
    pub fn from_parts(vendors: Vec<VendorRecord>, items: Vec<CatalogItem>) -> Self {
        let mut catalog = Self {
            vendors: vendors.into_iter().map(|vendor| (vendor.id.clone(), vendor)).collect(),
            ..Self::default()
        };
        for item in items {
            match item.kind {
                ItemKind::Menu => catalog.menu_items.insert(item.id.clone(), item),
                ItemKind::Meal => catalog.meal_items.insert(item.id.clone(), item),
            };
        }
        catalog
    }

    #[must_use]
    pub fn vendor(&self, id: &VendorId) -> Option<&VendorRecord> {
        self.vendors.get(id)
    }

    #[must_use]
    pub fn vendor_exists(&self, id: &VendorId) -> bool {
        self.vendors.contains_key(id)
    }

    #[must_use]
    pub fn item_exists(&self, id: &ItemId) -> bool {
        self.meal_items.contains_key(id) || self.menu_items.contains_key(id)
    }

    /// Meal items shadow menu items that share an id.
    #[must_use]
    pub fn resolve_item(&self, id: &ItemId) -> Option<&CatalogItem> {
        self.meal_items.get(id).or_else(|| self.menu_items.get(id))
    }

    /// Earliest configured delivery day of the vendor within a Sunday..Saturday week.
    #[must_use]
    pub fn first_delivery_day(&self, id: &VendorId) -> Option<DeliveryDay> {
        self.vendor(id).and_then(|vendor| vendor.delivery_days.iter().min().copied())
    }
}
