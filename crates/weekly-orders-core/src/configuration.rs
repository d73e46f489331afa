use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::{BoxTypeId, DeliveryDay, ItemId, ServiceKind, VendorId};
use crate::ReconcileError;

pub type ItemQuantities = BTreeMap<ItemId, u32>;
pub type ItemNotes = BTreeMap<ItemId, String>;
pub type UnitValues = BTreeMap<ItemId, Decimal>;

/// A client's recurring order preferences. Exactly one service kind is active.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StandingConfiguration {
    pub plan: ServicePlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "serviceKind")]
pub enum ServicePlan {
    Food(FoodPlan),
    Meal(MealPlan),
    Boxes(BoxesPlan),
    Custom(CustomPlan),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FoodPlan {
    #[serde(default)]
    pub vendor_selections: Vec<FoodVendorSelection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FoodVendorSelection {
    pub vendor_id: VendorId,
    #[serde(default)]
    pub items: ItemQuantities,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub item_notes: ItemNotes,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unit_values: UnitValues,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delivery_days: Vec<DeliveryDay>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub items_by_day: BTreeMap<DeliveryDay, ItemQuantities>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MealPlan {
    #[serde(default)]
    pub selections: BTreeMap<String, MealSelection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MealSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<VendorId>,
    #[serde(default)]
    pub items: ItemQuantities,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub item_notes: ItemNotes,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unit_values: UnitValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_day: Option<DeliveryDay>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoxesPlan {
    #[serde(default)]
    pub boxes: Vec<BoxOrder>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoxOrder {
    pub vendor_id: VendorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_type_id: Option<BoxTypeId>,
    pub quantity: u32,
    #[serde(default)]
    pub items: ItemQuantities,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub item_notes: ItemNotes,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unit_values: UnitValues,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomPlan {
    pub description: String,
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<VendorId>,
    pub delivery_day: DeliveryDay,
}

/// Catalog entities a configuration points at. Items are only listed when ordered.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CatalogReferences {
    pub vendors: BTreeSet<VendorId>,
    pub items: BTreeSet<ItemId>,
}

impl ServicePlan {
    #[must_use]
    pub fn service_kind(&self) -> ServiceKind {
        match self {
            Self::Food(_) => ServiceKind::Food,
            Self::Meal(_) => ServiceKind::Meal,
            Self::Boxes(_) => ServiceKind::Boxes,
            Self::Custom(_) => ServiceKind::Custom,
        }
    }
}

impl StandingConfiguration {
    #[must_use]
    pub fn service_kind(&self) -> ServiceKind {
        self.plan.service_kind()
    }

    /// Drop zero quantities and the containers they leave empty.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        match &mut self.plan {
            ServicePlan::Food(food) => {
                for selection in &mut food.vendor_selections {
                    prune_zero(&mut selection.items);
                    for items in selection.items_by_day.values_mut() {
                        prune_zero(items);
                    }
                    selection.items_by_day.retain(|_, items| !items.is_empty());
                    selection.delivery_days.sort();
                    selection.delivery_days.dedup();
                }
            }
            ServicePlan::Meal(meal) => {
                for selection in meal.selections.values_mut() {
                    prune_zero(&mut selection.items);
                }
            }
            ServicePlan::Boxes(boxes) => {
                for entry in &mut boxes.boxes {
                    prune_zero(&mut entry.items);
                }
                boxes.boxes.retain(|entry| entry.quantity > 0);
            }
            ServicePlan::Custom(_) => {}
        }
        self.notes = non_blank(self.notes.take());
        self.case_id = non_blank(self.case_id.take());
        self
    }

    /// Reject shapes that cannot be reconciled at all.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Validation`] for blank identifiers, negative prices
    /// or unit values, and custom plans without a description.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        match &self.plan {
            ServicePlan::Food(food) => {
                for selection in &food.vendor_selections {
                    require_vendor(&selection.vendor_id)?;
                    require_items(&selection.items)?;
                    for items in selection.items_by_day.values() {
                        require_items(items)?;
                    }
                    require_unit_values(&selection.unit_values)?;
                }
            }
            ServicePlan::Meal(meal) => {
                for (category, selection) in &meal.selections {
                    if category.trim().is_empty() {
                        return Err(ReconcileError::Validation(
                            "meal category MUST be non-empty".to_string(),
                        ));
                    }
                    if let Some(vendor_id) = &selection.vendor_id {
                        require_vendor(vendor_id)?;
                    }
                    require_items(&selection.items)?;
                    require_unit_values(&selection.unit_values)?;
                }
            }
            ServicePlan::Boxes(boxes) => {
                for entry in &boxes.boxes {
                    require_vendor(&entry.vendor_id)?;
                    require_items(&entry.items)?;
                    require_unit_values(&entry.unit_values)?;
                }
            }
            ServicePlan::Custom(custom) => {
                if custom.description.trim().is_empty() {
                    return Err(ReconcileError::Validation(
                        "custom description MUST be provided".to_string(),
                    ));
                }
                if custom.price.is_sign_negative() {
                    return Err(ReconcileError::Validation(
                        "custom price MUST be >= 0".to_string(),
                    ));
                }
                if let Some(vendor_id) = &custom.vendor_id {
                    require_vendor(vendor_id)?;
                }
            }
        }
        Ok(())
    }

    /// Vendors referenced anywhere, and items ordered with quantity > 0.
    #[must_use]
    pub fn references(&self) -> CatalogReferences {
        fn add_items(refs: &mut CatalogReferences, items: &ItemQuantities) {
            refs.items.extend(
                items.iter().filter(|(_, quantity)| **quantity > 0).map(|(id, _)| id.clone()),
            );
        }

        let mut refs = CatalogReferences::default();

        match &self.plan {
            ServicePlan::Food(food) => {
                for selection in &food.vendor_selections {
                    refs.vendors.insert(selection.vendor_id.clone());
                    add_items(&mut refs, &selection.items);
                    for items in selection.items_by_day.values() {
                        add_items(&mut refs, items);
                    }
                }
            }
            ServicePlan::Meal(meal) => {
                for selection in meal.selections.values() {
                    if let Some(vendor_id) = &selection.vendor_id {
                        refs.vendors.insert(vendor_id.clone());
                    }
                    add_items(&mut refs, &selection.items);
                }
            }
            ServicePlan::Boxes(boxes) => {
                for entry in boxes.boxes.iter().filter(|entry| entry.quantity > 0) {
                    refs.vendors.insert(entry.vendor_id.clone());
                    add_items(&mut refs, &entry.items);
                }
            }
            ServicePlan::Custom(custom) => {
                if let Some(vendor_id) = &custom.vendor_id {
                    refs.vendors.insert(vendor_id.clone());
                }
            }
        }
        refs
    }
}

fn prune_zero(items: &mut ItemQuantities) {
    items.retain(|_, quantity| *quantity > 0);
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|text| text.trim().to_string()).filter(|text| !text.is_empty())
}

fn require_vendor(vendor_id: &VendorId) -> Result<(), ReconcileError> {
    if vendor_id.as_str().trim().is_empty() {
        return Err(ReconcileError::Validation("vendorId MUST be non-empty".to_string()));
    }
    Ok(())
}

fn require_items(items: &ItemQuantities) -> Result<(), ReconcileError> {
    if items.keys().any(|id| id.as_str().trim().is_empty()) {
        return Err(ReconcileError::Validation("item ids MUST be non-empty".to_string()));
    }
    Ok(())
}

fn require_unit_values(values: &UnitValues) -> Result<(), ReconcileError> {
    if let Some((id, _)) = values.iter().find(|(_, value)| value.is_sign_negative()) {
        return Err(ReconcileError::Validation(format!("unit value for item {id} MUST be >= 0")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn food(items: &[(&str, u32)]) -> StandingConfiguration {
        StandingConfiguration {
            plan: ServicePlan::Food(FoodPlan {
                vendor_selections: vec![FoodVendorSelection {
                    vendor_id: VendorId::from("V1"),
                    items: items.iter().map(|(id, qty)| (ItemId::from(*id), *qty)).collect(),
                    item_notes: BTreeMap::new(),
                    unit_values: BTreeMap::new(),
                    delivery_days: vec![DeliveryDay::Thursday, DeliveryDay::Monday, DeliveryDay::Monday],
                    items_by_day: BTreeMap::new(),
                }],
            }),
            notes: Some("   ".to_string()),
            case_id: None,
        }
    }

    #[test]
    fn normalized_drops_zero_quantities_and_dedups_days() {
        let config = food(&[("I1", 2), ("I2", 0)]).normalized();
        let ServicePlan::Food(plan) = &config.plan else {
            panic!("expected food plan");
        };
        let selection = &plan.vendor_selections[0];
        assert_eq!(selection.items.len(), 1);
        assert_eq!(selection.delivery_days, vec![DeliveryDay::Monday, DeliveryDay::Thursday]);
        assert_eq!(config.notes, None);
    }

    #[test]
    fn references_skip_zero_quantity_items() {
        let refs = food(&[("I1", 2), ("I2", 0)]).references();
        assert!(refs.vendors.contains(&VendorId::from("V1")));
        assert!(refs.items.contains(&ItemId::from("I1")));
        assert!(!refs.items.contains(&ItemId::from("I2")));
    }

    #[test]
    fn validate_rejects_negative_custom_price() {
        let config = StandingConfiguration {
            plan: ServicePlan::Custom(CustomPlan {
                description: "Weekly produce".to_string(),
                price: Decimal::new(-100, 2),
                vendor_id: None,
                delivery_day: DeliveryDay::Friday,
            }),
            notes: None,
            case_id: None,
        };
        assert!(matches!(config.validate(), Err(ReconcileError::Validation(_))));
    }

    #[test]
    fn configuration_json_uses_service_kind_tag() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(food(&[("I1", 2)]).normalized())?;
        assert_eq!(value["plan"]["serviceKind"], "Food");
        assert_eq!(value["plan"]["vendorSelections"][0]["items"]["I1"], 2);
        let parsed: StandingConfiguration = serde_json::from_value(value)?;
        assert_eq!(parsed.service_kind(), ServiceKind::Food);
        Ok(())
    }
}
