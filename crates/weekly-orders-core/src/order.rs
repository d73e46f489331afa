use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::model::{
    iso_date, BoxTypeId, ClientId, ItemId, ItemKind, OrderId, OrderStatus, SelectionId,
    ServiceKind, VendorId,
};
use crate::ReconcileError;

pub const ORDER_NUMBER_FLOOR: u64 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedLine {
    pub item_id: ItemId,
    pub item_kind: ItemKind,
    pub quantity: u32,
    pub unit_value: Decimal,
    pub total_value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoxSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_type_id: Option<BoxTypeId>,
    pub quantity: u32,
    pub unit_value: Decimal,
    pub total_value: Decimal,
}

/// A delivery order that should exist for the target week. Derived fresh every run.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedOrder {
    pub client_id: ClientId,
    pub client_name: String,
    pub service_kind: ServiceKind,
    #[serde(with = "iso_date")]
    pub scheduled_delivery_date: Date,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<VendorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_category: Option<String>,
    #[serde(default)]
    pub items: Vec<ExpectedLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_selection: Option<BoxSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_description: Option<String>,
    pub total_value: Decimal,
    pub total_items: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
}

impl ExpectedOrder {
    /// Check a caller-supplied order before it is materialized.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Validation`] for blank identifiers, negative values,
    /// or an order that carries nothing to deliver.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.client_id.as_str().trim().is_empty() {
            return Err(ReconcileError::Validation("clientId MUST be provided".to_string()));
        }
        if self.vendor_id.as_ref().is_some_and(|id| id.as_str().trim().is_empty()) {
            return Err(ReconcileError::Validation("vendorId MUST be non-empty".to_string()));
        }
        if self.service_kind != ServiceKind::Custom && self.vendor_id.is_none() {
            return Err(ReconcileError::Validation(format!(
                "{} orders MUST name a vendor",
                self.service_kind.as_str()
            )));
        }
        if self.total_value.is_sign_negative()
            || self.items.iter().any(|line| line.unit_value.is_sign_negative())
        {
            return Err(ReconcileError::Validation("order values MUST be >= 0".to_string()));
        }
        if self.total_items == 0 {
            return Err(ReconcileError::Validation("totalItems MUST be >= 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_kind: Option<ItemKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_description: Option<String>,
    pub quantity: u32,
    pub unit_value: Decimal,
    pub total_value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VendorSelection {
    pub id: SelectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<VendorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_selection: Option<BoxSelection>,
    #[serde(default)]
    pub lines: Vec<OrderLine>,
}

/// A persisted ledger order with its vendor selections.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConcreteOrder {
    pub id: OrderId,
    pub order_number: u64,
    pub client_id: ClientId,
    pub service_kind: ServiceKind,
    pub status: OrderStatus,
    #[serde(with = "iso_date")]
    pub scheduled_delivery_date: Date,
    pub total_value: Decimal,
    pub total_items: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_id: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub vendor_selections: Vec<VendorSelection>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewVendorSelection {
    pub vendor_id: Option<VendorId>,
    pub box_selection: Option<BoxSelection>,
    pub lines: Vec<OrderLine>,
}

/// Insert request for one order. The store assigns the id and order number.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewOrder {
    pub client_id: ClientId,
    pub service_kind: ServiceKind,
    pub status: OrderStatus,
    pub scheduled_delivery_date: Date,
    pub total_value: Decimal,
    pub total_items: u32,
    pub notes: Option<String>,
    pub case_id: Option<String>,
    pub creation_id: u64,
    pub vendor_selection: NewVendorSelection,
}

impl NewOrder {
    /// Header, one vendor selection and its lines for an expected order.
    #[must_use]
    pub fn from_expected(expected: &ExpectedOrder, creation_id: u64) -> Self {
        let mut lines: Vec<OrderLine> = expected
            .items
            .iter()
            .map(|line| OrderLine {
                item_id: Some(line.item_id.clone()),
                item_kind: Some(line.item_kind),
                custom_description: None,
                quantity: line.quantity,
                unit_value: line.unit_value,
                total_value: line.total_value,
                notes: line.notes.clone(),
            })
            .collect();

        if let Some(description) = &expected.custom_description {
            lines.push(OrderLine {
                item_id: None,
                item_kind: None,
                custom_description: Some(description.clone()),
                quantity: 1,
                unit_value: expected.total_value,
                total_value: expected.total_value,
                notes: None,
            });
        }

        Self {
            client_id: expected.client_id.clone(),
            service_kind: expected.service_kind,
            status: OrderStatus::Scheduled,
            scheduled_delivery_date: expected.scheduled_delivery_date,
            total_value: expected.total_value,
            total_items: expected.total_items,
            notes: expected.notes.clone(),
            case_id: expected.case_id.clone(),
            creation_id,
            vendor_selection: NewVendorSelection {
                vendor_id: expected.vendor_id.clone(),
                box_selection: expected.box_selection.clone(),
                lines,
            },
        }
    }
}

/// Next order number given the current ledger maximum.
#[must_use]
pub fn next_order_number(current_max: Option<u64>) -> u64 {
    current_max.map_or(ORDER_NUMBER_FLOOR, |max| max.saturating_add(1).max(ORDER_NUMBER_FLOOR))
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn custom_expected() -> ExpectedOrder {
        ExpectedOrder {
            client_id: ClientId::from("C9"),
            client_name: "Client Nine".to_string(),
            service_kind: ServiceKind::Custom,
            scheduled_delivery_date: date!(2026 - 02 - 27),
            vendor_id: None,
            vendor_name: None,
            meal_category: None,
            items: vec![],
            box_selection: None,
            custom_description: Some("Groceries".to_string()),
            total_value: Decimal::new(4250, 2),
            total_items: 1,
            notes: None,
            case_id: Some("CASE-7".to_string()),
        }
    }

    #[test]
    fn order_numbers_start_at_floor_and_increment() {
        assert_eq!(next_order_number(None), 100_000);
        assert_eq!(next_order_number(Some(42)), 100_000);
        assert_eq!(next_order_number(Some(100_000)), 100_001);
        assert_eq!(next_order_number(Some(123_456)), 123_457);
    }

    #[test]
    fn custom_expected_order_becomes_single_description_line() {
        let order = NewOrder::from_expected(&custom_expected(), 7);
        assert_eq!(order.status, OrderStatus::Scheduled);
        assert_eq!(order.creation_id, 7);
        assert_eq!(order.vendor_selection.vendor_id, None);
        assert_eq!(order.vendor_selection.lines.len(), 1);
        let line = &order.vendor_selection.lines[0];
        assert_eq!(line.custom_description.as_deref(), Some("Groceries"));
        assert_eq!(line.total_value, Decimal::new(4250, 2));
    }

    #[test]
    fn validate_requires_vendor_for_non_custom_orders() {
        assert!(custom_expected().validate().is_ok());
        let mut food = custom_expected();
        food.service_kind = ServiceKind::Food;
        assert!(matches!(food.validate(), Err(ReconcileError::Validation(_))));
    }

    #[test]
    fn expected_order_json_is_camel_case() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(custom_expected())?;
        assert_eq!(value["scheduledDeliveryDate"], "2026-02-27");
        assert_eq!(value["serviceKind"], "Custom");
        assert_eq!(value["totalItems"], 1);
        assert!(value.get("vendorId").is_none());
        Ok(())
    }
}
