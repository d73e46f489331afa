use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use weekly_orders_api::{
    ApiSettings, CheckReport, CheckRequest, CreateReport, CreateRequest, MigrateResult,
    WeeklyOrdersApi, API_CONTRACT_VERSION,
};
use weekly_orders_core::{CutoffPolicy, ReconcileError, DEFAULT_PAGE_SIZE};
use weekly_orders_store_sqlite::SchemaStatus;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: WeeklyOrdersApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "weekly-orders-service")]
#[command(about = "Local HTTP service for weekly order reconciliation")]
struct Args {
    #[arg(long, default_value = "./weekly_orders.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Weekday of the cutoff, overriding the stored setting.
    #[arg(long, requires = "cutoff_time")]
    cutoff_day: Option<String>,
    /// Time of day of the cutoff (HH:MM, UTC), overriding the stored setting.
    #[arg(long, requires = "cutoff_day")]
    cutoff_time: Option<String>,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,
}

impl Args {
    fn api_settings(&self) -> Result<ApiSettings> {
        let cutoff = match (&self.cutoff_day, &self.cutoff_time) {
            (Some(day), Some(time_of_day)) => Some(CutoffPolicy::parse(day, time_of_day)?),
            _ => None,
        };
        Ok(ApiSettings { cutoff, page_size: self.page_size })
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceState {
    /// Validation failures are the caller's fault; anything else is ours.
    fn error(err: &anyhow::Error) -> ServiceError {
        let status = match err.downcast_ref::<ReconcileError>() {
            Some(ReconcileError::Validation(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: format!("{err:#}"),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/missing-orders/check", post(missing_orders_check))
        .route("/v1/missing-orders/create", post(missing_orders_create))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let state = ServiceState { api: WeeklyOrdersApi::with_settings(args.db.clone(), args.api_settings()?) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, db = %args.db.display(), "weekly orders service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let result = state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn missing_orders_check(
    State(state): State<ServiceState>,
    Json(request): Json<CheckRequest>,
) -> Result<Json<ServiceEnvelope<CheckReport>>, ServiceError> {
    let report = state.api.check(&request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(report)))
}

async fn missing_orders_create(
    State(state): State<ServiceState>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<ServiceEnvelope<CreateReport>>, ServiceError> {
    let report = state.api.create(&request).map_err(|err| {
        tracing::error!(error = %format!("{err:#}"), "missing-order creation failed");
        ServiceState::error(&err)
    })?;
    Ok(Json(envelope(report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use http::Request;
    use rust_decimal::Decimal;
    use time::macros::date;
    use tower::ServiceExt;
    use weekly_orders_core::{
        CatalogItem, ClientId, ClientProfile, DeliveryDay, HistorySnapshot, ItemId, ItemKind,
        StandingConfiguration, VendorId, VendorRecord,
    };
    use weekly_orders_store_sqlite::SqliteStore;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("weekly-orders-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn cleanup(db_path: &std::path::Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", db_path.display()));
        }
    }

    fn seed_scenario(db_path: &std::path::Path) -> Result<()> {
        let mut store = SqliteStore::open(db_path)?;
        store.migrate()?;
        store.upsert_vendor(&VendorRecord {
            id: VendorId::from("V1"),
            name: "Green Kitchen".to_string(),
            delivery_days: vec![DeliveryDay::Monday],
            is_active: true,
        })?;
        store.upsert_catalog_item(&CatalogItem {
            id: ItemId::from("I1"),
            kind: ItemKind::Menu,
            vendor_id: Some(VendorId::from("V1")),
            name: "Soup".to_string(),
            unit_value: Decimal::new(500, 2),
            is_active: true,
        })?;
        store.upsert_client(&ClientProfile {
            id: ClientId::from("C"),
            full_name: "Client C".to_string(),
            deliveries_allowed: true,
            expiration_date: Some(date!(2026 - 12 - 31)),
            live_configuration: None,
        })?;
        let configuration: StandingConfiguration = serde_json::from_value(serde_json::json!({
            "plan": {
                "serviceKind": "Food",
                "vendorSelections": [
                    {"vendorId": "V1", "items": {"I1": 2}, "deliveryDays": ["Monday"]}
                ]
            }
        }))?;
        store.append_history(&HistorySnapshot {
            client_id: ClientId::from("C"),
            recorded_at: time::macros::datetime!(2026-02-10 12:00 UTC),
            created_at: time::macros::datetime!(2026-02-10 12:00 UTC),
            actor: "navigator".to_string(),
            summary: "weekly soup".to_string(),
            configuration,
        })?;
        Ok(())
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn post_json(router: Router, uri: &str, payload: &serde_json::Value) -> Response {
        match router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(payload.to_string()))
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let state = ServiceState { api: WeeklyOrdersApi::new(unique_temp_db_path()) };
        let router = app(state);

        let response = match router
            .oneshot(
                Request::builder()
                    .uri("/v1/health")
                    .method("GET")
                    .body(axum::body::Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        };
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(
            value.get("api_contract_version").and_then(serde_json::Value::as_str),
            Some(API_CONTRACT_VERSION)
        );
    }

    #[tokio::test]
    async fn openapi_endpoint_lists_reconciliation_routes() {
        let state = ServiceState { api: WeeklyOrdersApi::new(unique_temp_db_path()) };
        let router = app(state);

        let response = match router
            .oneshot(
                Request::builder()
                    .uri("/v1/openapi")
                    .method("GET")
                    .body(axum::body::Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        };
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/missing-orders/check"));
        assert!(body.contains("/v1/missing-orders/create"));
    }

    #[tokio::test]
    async fn check_create_and_recheck_round_trip() {
        let db_path = unique_temp_db_path();
        if let Err(err) = seed_scenario(&db_path) {
            panic!("failed to seed scenario: {err:#}");
        }
        let router = app(ServiceState { api: WeeklyOrdersApi::new(db_path.clone()) });
        let week = serde_json::json!({"weekStart": "2026-02-22"});

        let check = post_json(router.clone(), "/v1/missing-orders/check", &week).await;
        assert_eq!(check.status(), StatusCode::OK);
        let check_value = response_json(check).await;
        let data = &check_value["data"];
        assert_eq!(data["weekEnd"], "2026-02-28");
        assert_eq!(data["cutoffDayName"], "Tuesday");
        assert_eq!(data["missingCount"], 1);
        assert_eq!(data["byClient"][0]["missing"][0]["scheduledDeliveryDate"], "2026-02-23");
        assert_eq!(data["byClient"][0]["snapshotUsedAt"]["source"], "snapshot");

        let create_payload = serde_json::json!({
            "missing": data["byClient"][0]["missing"].clone(),
            "creationId": 5
        });
        let create = post_json(router.clone(), "/v1/missing-orders/create", &create_payload).await;
        assert_eq!(create.status(), StatusCode::OK);
        let create_value = response_json(create).await;
        assert_eq!(create_value["data"]["created"], 1);
        assert_eq!(create_value["data"]["creationId"], 5);
        assert_eq!(create_value["data"]["orderNumbers"][0], 100_000);
        assert_eq!(create_value["data"]["details"][0]["clientName"], "Client C");

        let recheck = post_json(router, "/v1/missing-orders/check", &week).await;
        let recheck_value = response_json(recheck).await;
        assert_eq!(recheck_value["data"]["missingCount"], 0);
        assert_eq!(
            recheck_value["data"]["byClient"][0]["existingOrders"][0]["status"],
            "matched"
        );

        cleanup(&db_path);
    }

    #[tokio::test]
    async fn malformed_week_start_is_a_bad_request() {
        let db_path = unique_temp_db_path();
        let router = app(ServiceState { api: WeeklyOrdersApi::new(db_path.clone()) });

        let response = post_json(
            router,
            "/v1/missing-orders/check",
            &serde_json::json!({"weekStart": "2026-13-01"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert!(value
            .get("error")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|error| error.contains("weekStart")));

        cleanup(&db_path);
    }

    #[tokio::test]
    async fn migrate_then_schema_version_reports_latest() {
        let db_path = unique_temp_db_path();
        let router = app(ServiceState { api: WeeklyOrdersApi::new(db_path.clone()) });

        let migrate =
            post_json(router.clone(), "/v1/db/migrate", &serde_json::json!({"dry_run": false}))
                .await;
        assert_eq!(migrate.status(), StatusCode::OK);
        let migrate_value = response_json(migrate).await;
        assert_eq!(migrate_value["data"]["up_to_date"], true);

        let status = match router
            .oneshot(
                Request::builder()
                    .uri("/v1/db/schema-version")
                    .method("POST")
                    .body(axum::body::Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        };
        let status_value = response_json(status).await;
        assert_eq!(status_value["data"]["current_version"], 1);
        assert_eq!(status_value["data"]["pending_versions"], serde_json::json!([]));

        cleanup(&db_path);
    }
}
