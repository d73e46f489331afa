//! Domain types and pure reconciliation logic for weekly delivery orders.
//!
//! A run flows week bounds → snapshot selection → derivation → cleanup guard → diff
//! against the existing ledger. Everything here is free of I/O except through the
//! [`OrderStore`] port.

pub mod catalog;
pub mod client;
pub mod configuration;
pub mod derive;
pub mod diff;
pub mod guard;
pub mod legacy;
pub mod matcher;
pub mod model;
pub mod order;
pub mod snapshot;
pub mod store;
pub mod week;

pub use catalog::{CatalogItem, CatalogState, VendorRecord};
pub use client::ClientProfile;
pub use configuration::{
    BoxOrder, BoxesPlan, CustomPlan, FoodPlan, FoodVendorSelection, MealPlan, MealSelection,
    ServicePlan, StandingConfiguration,
};
pub use derive::{derive_expected_orders, Derivation, DerivationSkip, SkipReason};
pub use diff::{reconcile, CoveredOrder, MatchKey, ReconcileDiff};
pub use guard::{blocking_issues, is_blocked, BlockingIssue};
pub use legacy::parse_legacy_configuration;
pub use matcher::{load_existing_orders, ExistingOrders};
pub use model::{
    format_iso_date, parse_iso_date, BoxTypeId, ClientId, DeliveryDay, ItemId, ItemKind,
    OrderId, OrderStatus, SelectionId, ServiceKind, VendorId,
};
pub use order::{
    next_order_number, BoxSelection, ConcreteOrder, ExpectedLine, ExpectedOrder, NewOrder,
    NewVendorSelection, OrderLine, VendorSelection, ORDER_NUMBER_FLOOR,
};
pub use snapshot::{select_snapshot, CutoffPolicy, HistorySnapshot, SelectedSnapshot, SnapshotSource};
pub use store::{InMemoryStore, OrderStore, Page, StoreError, DEFAULT_PAGE_SIZE};
pub use week::{parse_week_start, week_end, week_start, WeekBounds};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ReconcileError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
