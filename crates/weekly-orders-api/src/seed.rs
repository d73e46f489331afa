//! Fixture and migration ingestion: catalog, clients and configuration history in one
//! JSON document.
//!
//! Configurations may be given in the canonical tagged shape or as the legacy blobs the
//! portal stored; both are normalized and validated before they are written.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, OffsetDateTime};
use weekly_orders_core::model::iso_date;
use weekly_orders_core::{
    parse_legacy_configuration, CatalogItem, ClientId, ClientProfile, HistorySnapshot,
    StandingConfiguration, VendorRecord,
};
use weekly_orders_store_sqlite::SqliteStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SeedDocument {
    #[serde(default)]
    pub vendors: Vec<VendorRecord>,
    #[serde(default)]
    pub items: Vec<CatalogItem>,
    #[serde(default)]
    pub clients: Vec<SeedClient>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeedClient {
    pub id: ClientId,
    pub full_name: String,
    #[serde(default = "default_true")]
    pub deliveries_allowed: bool,
    #[serde(default, with = "iso_date::option", skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_configuration: Option<Value>,
    #[serde(default)]
    pub history: Vec<SeedHistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeedHistoryEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default)]
    pub summary: String,
    pub configuration: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SeedResult {
    pub vendors: usize,
    pub items: usize,
    pub clients: usize,
    pub history_entries: usize,
}

fn default_true() -> bool {
    true
}

fn default_actor() -> String {
    "seed".to_string()
}

/// Canonical tagged configuration, else the legacy blob shapes.
///
/// # Errors
/// Returns an error when the value matches neither shape or fails validation.
pub fn ingest_configuration(value: &Value) -> Result<StandingConfiguration> {
    if let Ok(configuration) = serde_json::from_value::<StandingConfiguration>(value.clone()) {
        let configuration = configuration.normalized();
        configuration.validate()?;
        return Ok(configuration);
    }
    Ok(parse_legacy_configuration(value)?)
}

/// Write every entity of `document`. History entries are appended, so seeding the same
/// document twice doubles the logs.
///
/// # Errors
/// Returns an error when a configuration is malformed or any write fails.
pub fn apply_seed(store: &mut SqliteStore, document: &SeedDocument) -> Result<SeedResult> {
    let mut result = SeedResult::default();

    for vendor in &document.vendors {
        store.upsert_vendor(vendor)?;
        result.vendors += 1;
    }
    for item in &document.items {
        store.upsert_catalog_item(item)?;
        result.items += 1;
    }

    for client in &document.clients {
        if client.id.as_str().trim().is_empty() {
            return Err(anyhow!("seed client id MUST be non-empty"));
        }
        let live_configuration = client
            .live_configuration
            .as_ref()
            .map(ingest_configuration)
            .transpose()
            .with_context(|| format!("invalid live configuration for client {}", client.id))?;
        store.upsert_client(&ClientProfile {
            id: client.id.clone(),
            full_name: client.full_name.clone(),
            deliveries_allowed: client.deliveries_allowed,
            expiration_date: client.expiration_date,
            live_configuration,
        })?;
        result.clients += 1;

        for (position, entry) in client.history.iter().enumerate() {
            let configuration = ingest_configuration(&entry.configuration).with_context(|| {
                format!("invalid history entry {position} for client {}", client.id)
            })?;
            store.append_history(&HistorySnapshot {
                client_id: client.id.clone(),
                recorded_at: entry.recorded_at,
                created_at: entry.created_at.unwrap_or(entry.recorded_at),
                actor: entry.actor.clone(),
                summary: entry.summary.clone(),
                configuration,
            })?;
            result.history_entries += 1;
        }
    }

    tracing::info!(
        vendors = result.vendors,
        items = result.items,
        clients = result.clients,
        history_entries = result.history_entries,
        "seed document applied"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;
    use weekly_orders_core::{ServiceKind, ServicePlan};

    use super::*;

    #[test]
    fn accepts_canonical_and_legacy_configurations() -> Result<()> {
        let legacy = json!({
            "serviceType": "Food",
            "vendorSelections": [
                {"vendorId": "V1", "items": {"I1": 2}, "selectedDeliveryDays": ["Monday"]}
            ]
        });
        let parsed = ingest_configuration(&legacy)?;
        assert_eq!(parsed.plan.service_kind(), ServiceKind::Food);

        let canonical = serde_json::to_value(&parsed)?;
        assert_eq!(ingest_configuration(&canonical)?, parsed);
        Ok(())
    }

    #[test]
    fn rejects_unrecognizable_configuration() {
        assert!(ingest_configuration(&json!({"hello": "world"})).is_err());
        assert!(ingest_configuration(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn seed_writes_catalog_clients_and_history() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        let document: SeedDocument = serde_json::from_value(json!({
            "vendors": [{"id": "V1", "name": "Green Kitchen", "deliveryDays": ["Monday"], "isActive": true}],
            "items": [{"id": "I1", "kind": "menu", "name": "Soup", "unitValue": 5.0, "isActive": true}],
            "clients": [{
                "id": "C",
                "fullName": "Client C",
                "liveConfiguration": {"serviceKind": "Custom", "custom_name": "Groceries", "custom_price": 12.5, "deliveryDay": "Friday"},
                "history": [{
                    "recordedAt": "2026-02-10T12:00:00Z",
                    "configuration": {"serviceKind": "Food", "vendorSelections": [{"vendorId": "V1", "items": {"I1": 2}}]}
                }]
            }]
        }))?;

        let result = apply_seed(&mut store, &document)?;
        assert_eq!(
            result,
            SeedResult { vendors: 1, items: 1, clients: 1, history_entries: 1 }
        );

        let history = store.read_history(&[ClientId::from("C")])?;
        let entries = &history[&ClientId::from("C")];
        assert_eq!(entries[0].actor, "seed");
        assert_eq!(entries[0].created_at, entries[0].recorded_at);
        assert!(matches!(entries[0].configuration.plan, ServicePlan::Food(_)));
        Ok(())
    }
}
