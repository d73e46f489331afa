use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use weekly_orders_core::model::iso_date;
use weekly_orders_core::{
    BlockingIssue, ClientId, DerivationSkip, ExpectedOrder, OrderId, OrderStatus, ServiceKind,
    SnapshotSource, StandingConfiguration, VendorId,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub week_start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    #[serde(with = "iso_date")]
    pub week_start: Date,
    #[serde(with = "iso_date")]
    pub week_end: Date,
    #[serde(with = "time::serde::rfc3339")]
    pub cutoff_used_at: OffsetDateTime,
    pub cutoff_day_name: String,
    pub expected_count: usize,
    pub missing_count: usize,
    pub blocked_count: usize,
    pub missing_fingerprint: String,
    pub by_client: Vec<ClientReport>,
}

impl CheckReport {
    /// Every missing order, grouped by client in report order.
    #[must_use]
    pub fn missing_orders(&self) -> Vec<ExpectedOrder> {
        self.by_client.iter().flat_map(|client| client.missing.iter().cloned()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientReport {
    pub client_id: ClientId,
    pub client_name: String,
    pub missing: Vec<ExpectedOrder>,
    pub expected_summary: Vec<ExpectedSummary>,
    pub snapshot_used_at: Option<SnapshotUsedAt>,
    pub snapshot_order_config: Option<StandingConfiguration>,
    pub existing_orders: Vec<ExistingOrderSummary>,
    #[serde(default)]
    pub blocking_issues: Vec<BlockingIssue>,
    #[serde(default)]
    pub skipped: Vec<DerivationSkip>,
}

impl ClientReport {
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        !self.blocking_issues.is_empty()
    }
}

/// One expected order, with the ledger order that covers it if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedSummary {
    pub service_kind: ServiceKind,
    #[serde(with = "iso_date")]
    pub scheduled_delivery_date: Date,
    pub vendor_id: Option<VendorId>,
    pub vendor_name: Option<String>,
    pub meal_category: Option<String>,
    pub total_value: Decimal,
    pub total_items: u32,
    pub existing_order_number: Option<u64>,
}

impl ExpectedSummary {
    #[must_use]
    pub fn of(order: &ExpectedOrder, existing_order_number: Option<u64>) -> Self {
        Self {
            service_kind: order.service_kind,
            scheduled_delivery_date: order.scheduled_delivery_date,
            vendor_id: order.vendor_id.clone(),
            vendor_name: order.vendor_name.clone(),
            meal_category: order.meal_category.clone(),
            total_value: order.total_value,
            total_items: order.total_items,
            existing_order_number,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotUsedAt {
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    pub source: SnapshotSource,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExistingOrderSummary {
    pub order_id: OrderId,
    pub order_number: u64,
    pub service_kind: ServiceKind,
    #[serde(with = "iso_date")]
    pub scheduled_delivery_date: Date,
    pub vendor_ids: Vec<VendorId>,
    pub total_value: Decimal,
    pub total_items: u32,
    pub order_status: OrderStatus,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CreateRequest {
    /// Materialize a list computed earlier by a check.
    #[serde(rename_all = "camelCase")]
    Direct {
        missing: Vec<ExpectedOrder>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        creation_id: Option<u64>,
    },
    /// Recompute the week, then materialize what is missing.
    #[serde(rename_all = "camelCase")]
    Recompute {
        week_start: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        creation_id: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: OrderId,
    pub order_number: u64,
    pub client_name: String,
    #[serde(with = "iso_date")]
    pub date: Date,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailedOrder {
    pub client_id: ClientId,
    pub client_name: String,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateReport {
    pub created: usize,
    pub order_numbers: Vec<u64>,
    pub details: Vec<CreatedOrder>,
    pub creation_id: u64,
    /// Requested orders that the ledger already covered and were not written again.
    pub already_covered: usize,
    pub failed: Vec<FailedOrder>,
}
