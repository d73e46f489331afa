use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use weekly_orders_core::{CutoffPolicy, DeliveryDay, DEFAULT_PAGE_SIZE};
use weekly_orders_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore};

pub mod engine;
pub mod report;
pub mod seed;

pub use engine::{check_week, create_orders, missing_fingerprint, EngineSettings};
pub use report::{
    CheckReport, CheckRequest, ClientReport, CreateReport, CreateRequest, CreatedOrder,
    ExistingOrderSummary, ExpectedSummary, FailedOrder, MatchStatus, SnapshotUsedAt,
};
pub use seed::{apply_seed, ingest_configuration, SeedClient, SeedDocument, SeedHistoryEntry, SeedResult};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

/// Process-level overrides, typically from command-line flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiSettings {
    /// Takes precedence over the persisted cutoff settings.
    pub cutoff: Option<CutoffPolicy>,
    pub page_size: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self { cutoff: None, page_size: DEFAULT_PAGE_SIZE }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CutoffSource {
    Flag,
    Stored,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CutoffSettings {
    pub day: DeliveryDay,
    pub time: String,
    pub source: CutoffSource,
}

impl CutoffSettings {
    fn of(policy: CutoffPolicy, source: CutoffSource) -> Self {
        Self { day: policy.day, time: policy.time_of_day(), source }
    }
}

#[derive(Debug, Clone)]
pub struct WeeklyOrdersApi {
    db_path: PathBuf,
    settings: ApiSettings,
}

impl WeeklyOrdersApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self::with_settings(db_path, ApiSettings::default())
    }

    #[must_use]
    pub fn with_settings(db_path: PathBuf, settings: ApiSettings) -> Self {
        Self { db_path, settings }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    fn resolve_cutoff(&self, store: &SqliteStore) -> Result<(CutoffPolicy, CutoffSource)> {
        if let Some(policy) = self.settings.cutoff {
            return Ok((policy, CutoffSource::Flag));
        }
        Ok(match store.cutoff_policy()? {
            Some(policy) => (policy, CutoffSource::Stored),
            None => (CutoffPolicy::default(), CutoffSource::Default),
        })
    }

    fn engine_settings(&self, store: &SqliteStore) -> Result<EngineSettings> {
        let (cutoff, _) = self.resolve_cutoff(store)?;
        Ok(EngineSettings { cutoff, page_size: self.settings.page_size })
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when an integrity probe fails to run.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_store()?;
        store.integrity_check()
    }

    /// Effective cutoff policy and where it came from.
    ///
    /// # Errors
    /// Returns an error when persisted settings cannot be read.
    pub fn cutoff_settings(&self) -> Result<CutoffSettings> {
        let store = self.open_migrated()?;
        let (policy, source) = self.resolve_cutoff(&store)?;
        Ok(CutoffSettings::of(policy, source))
    }

    /// Persist the weekly cutoff. A cutoff passed in [`ApiSettings`] still wins.
    ///
    /// # Errors
    /// Returns an error for a malformed day or time, or when the write fails.
    pub fn set_cutoff(&self, day: &str, time_of_day: &str) -> Result<CutoffSettings> {
        let policy = CutoffPolicy::parse(day, time_of_day)?;
        let mut store = self.open_migrated()?;
        store.set_cutoff_policy(&policy)?;
        Ok(CutoffSettings::of(policy, CutoffSource::Stored))
    }

    /// Load catalog, clients and configuration history from a seed document.
    ///
    /// # Errors
    /// Returns an error when a configuration is malformed or persistence fails.
    pub fn seed(&self, document: &SeedDocument) -> Result<SeedResult> {
        let mut store = self.open_migrated()?;
        apply_seed(&mut store, document)
    }

    /// Report expected and missing orders for one week without writing anything.
    ///
    /// # Errors
    /// Returns an error for a malformed request or when the store cannot be read.
    pub fn check(&self, request: &CheckRequest) -> Result<CheckReport> {
        let store = self.open_migrated()?;
        let settings = self.engine_settings(&store)?;
        Ok(check_week(&store, request, &settings)?)
    }

    /// Materialize missing orders.
    ///
    /// # Errors
    /// Returns an error for a malformed request or when the store becomes unavailable.
    pub fn create(&self, request: &CreateRequest) -> Result<CreateReport> {
        let mut store = self.open_migrated()?;
        let settings = self.engine_settings(&store)?;
        Ok(create_orders(&mut store, request, &settings)?)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use rust_decimal::Decimal;
    use serde_json::json;
    use time::macros::date;
    use weekly_orders_core::{ClientId, ItemId, ItemKind, ReconcileError};

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("weekly-orders-api-{}.sqlite3", ulid::Ulid::new()))
    }

    fn cleanup(db_path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", db_path.display()));
        }
    }

    fn scenario_seed() -> Result<SeedDocument> {
        let history = |vendor: &str| {
            json!([{
                "recordedAt": "2026-02-10T12:00:00Z",
                "actor": "navigator",
                "summary": "weekly soup",
                "configuration": {
                    "serviceType": "Food",
                    "vendorSelections": [
                        {"vendorId": vendor, "items": {"I1": 2}, "selectedDeliveryDays": ["Monday"]}
                    ]
                }
            }])
        };
        Ok(serde_json::from_value(json!({
            "vendors": [{"id": "V1", "name": "Green Kitchen", "deliveryDays": ["Monday", "Thursday"], "isActive": true}],
            "items": [{"id": "I1", "kind": "menu", "vendorId": "V1", "name": "Soup", "unitValue": 5.0, "isActive": true}],
            "clients": [
                {"id": "C", "fullName": "Client C", "history": history("V1")},
                {"id": "D", "fullName": "Dora", "history": history("V1")}
            ]
        }))?)
    }

    fn week_request() -> CheckRequest {
        CheckRequest { week_start: "2026-02-22".to_string(), client_ids: None }
    }

    #[test]
    fn api_check_create_recheck_closes_the_gap() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = WeeklyOrdersApi::new(db_path.clone());
        api.seed(&scenario_seed()?)?;

        let report = api.check(&week_request())?;
        assert_eq!(report.missing_count, 2);
        let client_c = report
            .by_client
            .iter()
            .find(|client| client.client_id == ClientId::from("C"))
            .map(|client| client.missing.clone())
            .unwrap_or_default();
        assert_eq!(client_c.len(), 1);
        assert_eq!(client_c[0].scheduled_delivery_date, date!(2026 - 02 - 23));
        assert_eq!(client_c[0].total_value, Decimal::new(1000, 2));
        assert_eq!(client_c[0].total_items, 2);

        let dora = api.create(&CreateRequest::Recompute {
            week_start: "2026-02-22".to_string(),
            client_id: Some("D".to_string()),
            creation_id: None,
        })?;
        let previous_max = dora.order_numbers[0];

        let created = api.create(&CreateRequest::Direct { missing: client_c, creation_id: None })?;
        assert_eq!(created.created, 1);
        assert_eq!(created.order_numbers, vec![previous_max + 1]);
        assert_eq!(created.creation_id, dora.creation_id + 1);

        let store = SqliteStore::open(&db_path)?;
        let orders = store.read_orders_by_creation(created.creation_id)?;
        assert_eq!(orders.len(), 1);
        let selections = &orders[0].vendor_selections;
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].lines.len(), 1);
        assert_eq!(selections[0].lines[0].item_id, Some(ItemId::from("I1")));
        assert_eq!(selections[0].lines[0].quantity, 2);
        drop(store);

        let recheck = api.check(&week_request())?;
        assert_eq!(recheck.missing_count, 0);
        assert_eq!(recheck.expected_count, 2);

        let again = api.create(&CreateRequest::Recompute {
            week_start: "2026-02-22".to_string(),
            client_id: None,
            creation_id: Some(created.creation_id),
        })?;
        assert_eq!(again.created, 0);

        cleanup(&db_path);
        Ok(())
    }

    #[test]
    fn api_deleted_item_blocks_client() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = WeeklyOrdersApi::new(db_path.clone());
        api.seed(&scenario_seed()?)?;

        {
            let mut store = SqliteStore::open(&db_path)?;
            store.delete_catalog_item(ItemKind::Menu, &ItemId::from("I1"))?;
        }

        let report = api.check(&CheckRequest {
            week_start: "2026-02-25".to_string(),
            client_ids: Some(vec!["C".to_string()]),
        })?;
        assert_eq!(report.week_start, date!(2026 - 02 - 22));
        assert_eq!(report.missing_count, 0);
        assert_eq!(report.blocked_count, 1);
        assert!(report.by_client[0].is_blocked());

        cleanup(&db_path);
        Ok(())
    }

    #[test]
    fn cutoff_precedence_is_flag_then_stored_then_default() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = WeeklyOrdersApi::new(db_path.clone());
        assert_eq!(api.cutoff_settings()?.source, CutoffSource::Default);

        api.set_cutoff("wednesday", "18:30")?;
        let stored = api.cutoff_settings()?;
        assert_eq!(stored.day, DeliveryDay::Wednesday);
        assert_eq!(stored.time, "18:30");
        assert_eq!(stored.source, CutoffSource::Stored);

        let flagged = WeeklyOrdersApi::with_settings(
            db_path.clone(),
            ApiSettings { cutoff: Some(CutoffPolicy::default()), page_size: 10 },
        );
        let effective = flagged.cutoff_settings()?;
        assert_eq!((effective.day, effective.source), (DeliveryDay::Tuesday, CutoffSource::Flag));

        let report = api.check(&week_request())?;
        assert_eq!(report.cutoff_day_name, "Wednesday");

        cleanup(&db_path);
        Ok(())
    }

    #[test]
    fn api_validation_errors_stay_typed() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = WeeklyOrdersApi::new(db_path.clone());

        let Err(err) = api.check(&CheckRequest { week_start: "tomorrow".to_string(), client_ids: None })
        else {
            panic!("malformed week start accepted");
        };
        assert!(matches!(err.downcast_ref::<ReconcileError>(), Some(ReconcileError::Validation(_))));

        let Err(err) = api.set_cutoff("someday", "10:00") else {
            panic!("malformed cutoff day accepted");
        };
        assert!(matches!(err.downcast_ref::<ReconcileError>(), Some(ReconcileError::Validation(_))));

        cleanup(&db_path);
        Ok(())
    }

    #[test]
    fn migrate_dry_run_reports_plan_without_applying() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = WeeklyOrdersApi::new(db_path.clone());

        let plan = api.migrate(true)?;
        assert_eq!(plan.would_apply_versions, vec![1]);
        assert_eq!(api.schema_status()?.current_version, 0);

        let applied = api.migrate(false)?;
        assert_eq!(applied.after_version, Some(1));
        assert_eq!(applied.up_to_date, Some(true));
        assert!(api.integrity_check()?.quick_check_ok);

        cleanup(&db_path);
        Ok(())
    }
}
