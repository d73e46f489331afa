use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, TransactionBehavior,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use ulid::Ulid;
use weekly_orders_core::{
    format_iso_date, next_order_number, parse_iso_date, BoxSelection, BoxTypeId, CatalogItem,
    CatalogState, ClientId, ClientProfile, ConcreteOrder, CutoffPolicy, DeliveryDay,
    HistorySnapshot, ItemId, ItemKind, NewOrder, OrderId, OrderLine, OrderStatus, OrderStore,
    Page, SelectionId, ServiceKind, StandingConfiguration, StoreError, VendorId, VendorRecord,
    VendorSelection, WeekBounds,
};

pub const CUTOFF_DAY_SETTING: &str = "weekly_cutoff_day";
pub const CUTOFF_TIME_SETTING: &str = "weekly_cutoff_time";

const LATEST_SCHEMA_VERSION: i64 = 1;

// Keeps dynamic `IN (...)` lists well below SQLite's bound-parameter limit.
const IN_LIST_CHUNK: usize = 500;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS app_settings (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vendors (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  delivery_days_json TEXT NOT NULL,
  is_active INTEGER NOT NULL CHECK (is_active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS menu_items (
  id TEXT PRIMARY KEY,
  vendor_id TEXT,
  name TEXT NOT NULL,
  unit_value TEXT NOT NULL,
  is_active INTEGER NOT NULL CHECK (is_active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS meal_items (
  id TEXT PRIMARY KEY,
  vendor_id TEXT,
  name TEXT NOT NULL,
  unit_value TEXT NOT NULL,
  is_active INTEGER NOT NULL CHECK (is_active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS clients (
  id TEXT PRIMARY KEY,
  full_name TEXT NOT NULL,
  deliveries_allowed INTEGER NOT NULL CHECK (deliveries_allowed IN (0, 1)),
  expiration_date TEXT,
  live_configuration_json TEXT
);

CREATE TABLE IF NOT EXISTS client_history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  client_id TEXT NOT NULL,
  recorded_at TEXT NOT NULL,
  created_at TEXT NOT NULL,
  actor TEXT NOT NULL,
  summary TEXT NOT NULL,
  configuration_json TEXT NOT NULL,
  FOREIGN KEY (client_id) REFERENCES clients(id)
);

CREATE TABLE IF NOT EXISTS orders (
  id TEXT PRIMARY KEY,
  order_number INTEGER NOT NULL UNIQUE CHECK (order_number >= 100000),
  client_id TEXT NOT NULL,
  service_kind TEXT NOT NULL CHECK (service_kind IN ('Food','Meal','Boxes','Custom')),
  status TEXT NOT NULL CHECK (status IN ('scheduled','pending','confirmed','completed','cancelled')),
  scheduled_delivery_date TEXT NOT NULL,
  total_value TEXT NOT NULL,
  total_items INTEGER NOT NULL CHECK (total_items >= 0),
  notes TEXT,
  case_id TEXT,
  creation_id INTEGER,
  created_at TEXT NOT NULL,
  FOREIGN KEY (client_id) REFERENCES clients(id)
);

CREATE TABLE IF NOT EXISTS order_vendor_selections (
  id TEXT PRIMARY KEY,
  order_id TEXT NOT NULL,
  vendor_id TEXT,
  box_type_id TEXT,
  box_quantity INTEGER,
  box_unit_value TEXT,
  box_total_value TEXT,
  FOREIGN KEY (order_id) REFERENCES orders(id)
);

CREATE TABLE IF NOT EXISTS order_items (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  vendor_selection_id TEXT NOT NULL,
  menu_item_id TEXT,
  meal_item_id TEXT,
  custom_description TEXT,
  quantity INTEGER NOT NULL CHECK (quantity >= 0),
  unit_value TEXT NOT NULL,
  total_value TEXT NOT NULL,
  notes TEXT,
  FOREIGN KEY (vendor_selection_id) REFERENCES order_vendor_selections(id)
);

CREATE INDEX IF NOT EXISTS idx_client_history_client ON client_history(client_id, id);
CREATE INDEX IF NOT EXISTS idx_orders_scheduled ON orders(scheduled_delivery_date, order_number);
CREATE INDEX IF NOT EXISTS idx_orders_client ON orders(client_id);
CREATE INDEX IF NOT EXISTS idx_orders_creation ON orders(creation_id);
CREATE INDEX IF NOT EXISTS idx_selections_order ON order_vendor_selections(order_id);
CREATE INDEX IF NOT EXISTS idx_items_selection ON order_items(vendor_selection_id);
";

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_001_SQL)];

const ORDER_COLUMNS: &str = "id, order_number, client_id, service_kind, status, \
     scheduled_delivery_date, total_value, total_items, notes, case_id, creation_id, created_at";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed order ledger and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = MIGRATIONS
            .iter()
            .map(|(version, _)| *version)
            .filter(|version| *version > current_version)
            .collect();

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let current = current_schema_version(&self.conn)?;
        if current > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {current}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > current) {
            let tx = self
                .conn
                .transaction()
                .with_context(|| format!("failed to start migration v{version} transaction"))?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
            record_schema_version(&tx, *version)?;
            tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        }

        Ok(())
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    /// Persisted cutoff policy, if both settings are present.
    ///
    /// # Errors
    /// Returns an error when settings cannot be read or hold malformed values.
    pub fn cutoff_policy(&self) -> Result<Option<CutoffPolicy>> {
        let day = self.setting(CUTOFF_DAY_SETTING)?;
        let time_of_day = self.setting(CUTOFF_TIME_SETTING)?;
        if day.is_none() && time_of_day.is_none() {
            return Ok(None);
        }

        let defaults = CutoffPolicy::default();
        let day = day.unwrap_or_else(|| defaults.day.as_str().to_string());
        let time_of_day = time_of_day.unwrap_or_else(|| defaults.time_of_day());
        let policy = CutoffPolicy::parse(&day, &time_of_day)
            .map_err(|err| anyhow!("stored cutoff settings are invalid: {err}"))?;
        Ok(Some(policy))
    }

    /// # Errors
    /// Returns an error when the settings cannot be written.
    pub fn set_cutoff_policy(&mut self, policy: &CutoffPolicy) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start settings transaction")?;
        upsert_setting(&tx, CUTOFF_DAY_SETTING, policy.day.as_str())?;
        upsert_setting(&tx, CUTOFF_TIME_SETTING, &policy.time_of_day())?;
        tx.commit().context("failed to commit settings transaction")?;
        Ok(())
    }

    fn setting(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM app_settings WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .with_context(|| format!("failed to read setting {key}"))
    }

    /// # Errors
    /// Returns an error when the vendor row cannot be written.
    pub fn upsert_vendor(&mut self, vendor: &VendorRecord) -> Result<()> {
        let days: Vec<&str> = vendor.delivery_days.iter().map(|day| day.as_str()).collect();
        self.conn
            .execute(
                "INSERT INTO vendors(id, name, delivery_days_json, is_active) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   delivery_days_json = excluded.delivery_days_json,
                   is_active = excluded.is_active",
                params![
                    vendor.id.as_str(),
                    vendor.name,
                    serde_json::to_string(&days).context("failed to serialize delivery days")?,
                    vendor.is_active,
                ],
            )
            .with_context(|| format!("failed to upsert vendor {}", vendor.id))?;
        Ok(())
    }

    /// Hard-delete a vendor. Configurations still pointing at it become blocked.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_vendor(&mut self, vendor_id: &VendorId) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM vendors WHERE id = ?1", params![vendor_id.as_str()])
            .with_context(|| format!("failed to delete vendor {vendor_id}"))?;
        Ok(removed > 0)
    }

    /// # Errors
    /// Returns an error when the item row cannot be written.
    pub fn upsert_catalog_item(&mut self, item: &CatalogItem) -> Result<()> {
        let sql = format!(
            "INSERT INTO {table}(id, vendor_id, name, unit_value, is_active) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
               vendor_id = excluded.vendor_id,
               name = excluded.name,
               unit_value = excluded.unit_value,
               is_active = excluded.is_active",
            table = item_table(item.kind)
        );
        self.conn
            .execute(
                &sql,
                params![
                    item.id.as_str(),
                    item.vendor_id.as_ref().map(VendorId::as_str),
                    item.name,
                    item.unit_value.to_string(),
                    item.is_active,
                ],
            )
            .with_context(|| format!("failed to upsert {} item {}", item.kind.as_str(), item.id))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_catalog_item(&mut self, kind: ItemKind, item_id: &ItemId) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", item_table(kind));
        let removed = self
            .conn
            .execute(&sql, params![item_id.as_str()])
            .with_context(|| format!("failed to delete {} item {item_id}", kind.as_str()))?;
        Ok(removed > 0)
    }

    /// # Errors
    /// Returns an error when the live configuration is invalid or the row cannot be written.
    pub fn upsert_client(&mut self, client: &ClientProfile) -> Result<()> {
        let live = match &client.live_configuration {
            Some(configuration) => {
                configuration
                    .validate()
                    .map_err(|err| anyhow!("live configuration for {} is invalid: {err}", client.id))?;
                Some(serde_json::to_string(configuration).context("failed to serialize configuration")?)
            }
            None => None,
        };
        self.conn
            .execute(
                "INSERT INTO clients(id, full_name, deliveries_allowed, expiration_date, live_configuration_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   full_name = excluded.full_name,
                   deliveries_allowed = excluded.deliveries_allowed,
                   expiration_date = excluded.expiration_date,
                   live_configuration_json = excluded.live_configuration_json",
                params![
                    client.id.as_str(),
                    client.full_name,
                    client.deliveries_allowed,
                    client.expiration_date.map(format_iso_date),
                    live,
                ],
            )
            .with_context(|| format!("failed to upsert client {}", client.id))?;
        Ok(())
    }

    /// Append one configuration change to a client's history log.
    ///
    /// # Errors
    /// Returns an error when the configuration is invalid or the row cannot be written.
    pub fn append_history(&mut self, entry: &HistorySnapshot) -> Result<()> {
        entry
            .configuration
            .validate()
            .map_err(|err| anyhow!("history configuration for {} is invalid: {err}", entry.client_id))?;
        self.conn
            .execute(
                "INSERT INTO client_history(client_id, recorded_at, created_at, actor, summary, configuration_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.client_id.as_str(),
                    rfc3339(entry.recorded_at)?,
                    rfc3339(entry.created_at)?,
                    entry.actor,
                    entry.summary,
                    serde_json::to_string(&entry.configuration)
                        .context("failed to serialize configuration")?,
                ],
            )
            .with_context(|| format!("failed to append history for client {}", entry.client_id))?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when catalog rows cannot be read or decoded.
    pub fn read_catalog(&self) -> Result<CatalogState> {
        let mut vendors = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, delivery_days_json, is_active FROM vendors ORDER BY id ASC")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let days_json: String = row.get(2)?;
            let day_names: Vec<String> = serde_json::from_str(&days_json)
                .with_context(|| format!("invalid delivery days for vendor {id}"))?;
            let delivery_days = day_names
                .iter()
                .map(|name| {
                    DeliveryDay::parse(name).ok_or_else(|| anyhow!("unknown delivery day: {name}"))
                })
                .collect::<Result<Vec<_>>>()?;
            vendors.push(VendorRecord {
                id: VendorId::new(id),
                name: row.get(1)?,
                delivery_days,
                is_active: row.get(3)?,
            });
        }

        let mut items = Vec::new();
        for kind in [ItemKind::Menu, ItemKind::Meal] {
            let sql = format!(
                "SELECT id, vendor_id, name, unit_value, is_active FROM {} ORDER BY id ASC",
                item_table(kind)
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                items.push(CatalogItem {
                    id: ItemId::new(row.get::<_, String>(0)?),
                    kind,
                    vendor_id: row.get::<_, Option<String>>(1)?.map(VendorId::new),
                    name: row.get(2)?,
                    unit_value: parse_decimal(&row.get::<_, String>(3)?)?,
                    is_active: row.get(4)?,
                });
            }
        }

        Ok(CatalogState::from_parts(vendors, items))
    }

    /// # Errors
    /// Returns an error when client rows cannot be read or decoded.
    pub fn read_clients(
        &self,
        filter: Option<&[ClientId]>,
        page: Page,
    ) -> Result<Vec<ClientProfile>> {
        if filter.is_some_and(<[ClientId]>::is_empty) {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT id, full_name, deliveries_allowed, expiration_date, live_configuration_json
             FROM clients",
        );
        let mut values = Vec::new();
        if let Some(ids) = filter {
            sql.push_str(&format!(" WHERE id IN ({})", placeholders(ids.len())));
            values.extend(ids.iter().map(|id| SqlValue::Text(id.to_string())));
        }
        sql.push_str(" ORDER BY id ASC LIMIT ? OFFSET ?");
        values.push(SqlValue::Integer(to_i64(page.limit)?));
        values.push(SqlValue::Integer(to_i64(page.offset)?));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut clients = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let live_configuration = row
                .get::<_, Option<String>>(4)?
                .map(|raw| serde_json::from_str::<StandingConfiguration>(&raw))
                .transpose()
                .with_context(|| format!("invalid live configuration for client {id}"))?;
            clients.push(ClientProfile {
                id: ClientId::new(id),
                full_name: row.get(1)?,
                deliveries_allowed: row.get(2)?,
                expiration_date: row.get::<_, Option<String>>(3)?.as_deref().map(parse_date).transpose()?,
                live_configuration,
            });
        }
        Ok(clients)
    }

    /// History logs for `client_ids`, each in recording order.
    ///
    /// # Errors
    /// Returns an error when history rows cannot be read or decoded.
    pub fn read_history(
        &self,
        client_ids: &[ClientId],
    ) -> Result<BTreeMap<ClientId, Vec<HistorySnapshot>>> {
        let mut history: BTreeMap<ClientId, Vec<HistorySnapshot>> = BTreeMap::new();
        for chunk in client_ids.chunks(IN_LIST_CHUNK) {
            let sql = format!(
                "SELECT client_id, recorded_at, created_at, actor, summary, configuration_json
                 FROM client_history
                 WHERE client_id IN ({})
                 ORDER BY client_id ASC, id ASC",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter().map(ClientId::as_str)))?;
            while let Some(row) = rows.next()? {
                let client_id = ClientId::new(row.get::<_, String>(0)?);
                let configuration_json: String = row.get(5)?;
                let configuration = serde_json::from_str(&configuration_json)
                    .with_context(|| format!("invalid history configuration for client {client_id}"))?;
                let entry = HistorySnapshot {
                    client_id: client_id.clone(),
                    recorded_at: parse_rfc3339(&row.get::<_, String>(1)?)?,
                    created_at: parse_rfc3339(&row.get::<_, String>(2)?)?,
                    actor: row.get(3)?,
                    summary: row.get(4)?,
                    configuration,
                };
                history.entry(client_id).or_default().push(entry);
            }
        }
        Ok(history)
    }

    /// Orders scheduled inside `week`, ordered by date then order number.
    ///
    /// # Errors
    /// Returns an error when order rows cannot be read or decoded.
    pub fn read_orders_in_week(
        &self,
        week: WeekBounds,
        filter: Option<&[ClientId]>,
        page: Page,
    ) -> Result<Vec<ConcreteOrder>> {
        if filter.is_some_and(<[ClientId]>::is_empty) {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE scheduled_delivery_date BETWEEN ? AND ?"
        );
        let mut values =
            vec![SqlValue::Text(format_iso_date(week.start)), SqlValue::Text(format_iso_date(week.end))];
        if let Some(ids) = filter {
            sql.push_str(&format!(" AND client_id IN ({})", placeholders(ids.len())));
            values.extend(ids.iter().map(|id| SqlValue::Text(id.to_string())));
        }
        sql.push_str(" ORDER BY scheduled_delivery_date ASC, order_number ASC LIMIT ? OFFSET ?");
        values.push(SqlValue::Integer(to_i64(page.limit)?));
        values.push(SqlValue::Integer(to_i64(page.offset)?));

        let mut orders = {
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            let mut orders = Vec::new();
            while let Some(row) = rows.next()? {
                orders.push(order_from_row(row)?);
            }
            orders
        };
        self.attach_selections(&mut orders)?;
        Ok(orders)
    }

    /// Every order that shares `creation_id`, ordered by order number.
    ///
    /// # Errors
    /// Returns an error when order rows cannot be read or decoded.
    pub fn read_orders_by_creation(&self, creation_id: u64) -> Result<Vec<ConcreteOrder>> {
        let mut orders = {
            let sql = format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE creation_id = ?1 ORDER BY order_number ASC"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params![u64_to_i64(creation_id)?])?;
            let mut orders = Vec::new();
            while let Some(row) = rows.next()? {
                orders.push(order_from_row(row)?);
            }
            orders
        };
        self.attach_selections(&mut orders)?;
        Ok(orders)
    }

    fn attach_selections(&self, orders: &mut [ConcreteOrder]) -> Result<()> {
        let mut selections: BTreeMap<String, Vec<VendorSelection>> = BTreeMap::new();
        let order_ids: Vec<String> = orders.iter().map(|order| order.id.to_string()).collect();

        for chunk in order_ids.chunks(IN_LIST_CHUNK) {
            let sql = format!(
                "SELECT id, order_id, vendor_id, box_type_id, box_quantity, box_unit_value, box_total_value
                 FROM order_vendor_selections
                 WHERE order_id IN ({})
                 ORDER BY order_id ASC, id ASC",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                let selection_id = parse_ulid(&row.get::<_, String>(0)?)?;
                let order_id: String = row.get(1)?;
                let box_quantity: Option<i64> = row.get(4)?;
                let box_selection = match box_quantity {
                    Some(quantity) => Some(BoxSelection {
                        box_type_id: row.get::<_, Option<String>>(3)?.map(BoxTypeId::new),
                        quantity: to_u32(quantity)?,
                        unit_value: parse_decimal(&row.get::<_, Option<String>>(5)?.unwrap_or_default())?,
                        total_value: parse_decimal(&row.get::<_, Option<String>>(6)?.unwrap_or_default())?,
                    }),
                    None => None,
                };
                selections.entry(order_id).or_default().push(VendorSelection {
                    id: SelectionId(selection_id),
                    vendor_id: row.get::<_, Option<String>>(2)?.map(VendorId::new),
                    box_selection,
                    lines: Vec::new(),
                });
            }
        }

        let selection_ids: Vec<String> =
            selections.values().flatten().map(|selection| selection.id.to_string()).collect();
        let mut lines: BTreeMap<String, Vec<OrderLine>> = BTreeMap::new();
        for chunk in selection_ids.chunks(IN_LIST_CHUNK) {
            let sql = format!(
                "SELECT vendor_selection_id, menu_item_id, meal_item_id, custom_description,
                        quantity, unit_value, total_value, notes
                 FROM order_items
                 WHERE vendor_selection_id IN ({})
                 ORDER BY vendor_selection_id ASC, id ASC",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                let menu_item: Option<String> = row.get(1)?;
                let meal_item: Option<String> = row.get(2)?;
                let (item_id, item_kind) = match (meal_item, menu_item) {
                    (Some(id), _) => (Some(ItemId::new(id)), Some(ItemKind::Meal)),
                    (None, Some(id)) => (Some(ItemId::new(id)), Some(ItemKind::Menu)),
                    (None, None) => (None, None),
                };
                lines.entry(row.get(0)?).or_default().push(OrderLine {
                    item_id,
                    item_kind,
                    custom_description: row.get(3)?,
                    quantity: to_u32(row.get(4)?)?,
                    unit_value: parse_decimal(&row.get::<_, String>(5)?)?,
                    total_value: parse_decimal(&row.get::<_, String>(6)?)?,
                    notes: row.get(7)?,
                });
            }
        }

        for order in orders.iter_mut() {
            let mut order_selections = selections.remove(&order.id.to_string()).unwrap_or_default();
            for selection in &mut order_selections {
                selection.lines = lines.remove(&selection.id.to_string()).unwrap_or_default();
            }
            order.vendor_selections = order_selections;
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error when client rows cannot be read.
    pub fn read_client_names(&self, client_ids: &[ClientId]) -> Result<BTreeMap<ClientId, String>> {
        let mut names = BTreeMap::new();
        for chunk in client_ids.chunks(IN_LIST_CHUNK) {
            let sql = format!(
                "SELECT id, full_name FROM clients WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter().map(ClientId::as_str)))?;
            while let Some(row) = rows.next()? {
                names.insert(ClientId::new(row.get::<_, String>(0)?), row.get(1)?);
            }
        }
        Ok(names)
    }

    /// # Errors
    /// Returns an error when orders cannot be read.
    pub fn read_max_creation_id(&self) -> Result<Option<u64>> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(creation_id) FROM orders", [], |row| row.get(0))
            .context("failed to read max creation_id")?;
        max.map(i64_to_u64).transpose()
    }

    /// Insert one order, its vendor selection and line items in a single immediate
    /// transaction, allocating `MAX(order_number) + 1` inside it.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock before the maximum is read, so writers
    /// sharing this database file are serialized. The UNIQUE constraint on
    /// `order_number` rejects anything that slips past that.
    ///
    /// # Errors
    /// Returns an error when the write lock cannot be taken or any insert fails.
    pub fn create_order(&mut self, order: &NewOrder) -> Result<ConcreteOrder> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start order transaction")?;

        let current_max: Option<i64> = tx
            .query_row("SELECT MAX(order_number) FROM orders", [], |row| row.get(0))
            .context("failed to read max order_number")?;
        let order_number = next_order_number(current_max.map(i64_to_u64).transpose()?);
        let order_id = OrderId::new();
        let created_at = OffsetDateTime::now_utc();

        tx.execute(
            "INSERT INTO orders(
                id, order_number, client_id, service_kind, status, scheduled_delivery_date,
                total_value, total_items, notes, case_id, creation_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                order_id.to_string(),
                u64_to_i64(order_number)?,
                order.client_id.as_str(),
                order.service_kind.as_str(),
                order.status.as_str(),
                format_iso_date(order.scheduled_delivery_date),
                order.total_value.to_string(),
                i64::from(order.total_items),
                order.notes,
                order.case_id,
                u64_to_i64(order.creation_id)?,
                rfc3339(created_at)?,
            ],
        )
        .with_context(|| format!("failed to insert order for client {}", order.client_id))?;

        let selection_id = SelectionId::new();
        let box_selection = order.vendor_selection.box_selection.as_ref();
        tx.execute(
            "INSERT INTO order_vendor_selections(
                id, order_id, vendor_id, box_type_id, box_quantity, box_unit_value, box_total_value
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                selection_id.to_string(),
                order_id.to_string(),
                order.vendor_selection.vendor_id.as_ref().map(VendorId::as_str),
                box_selection.and_then(|b| b.box_type_id.as_ref()).map(BoxTypeId::as_str),
                box_selection.map(|b| i64::from(b.quantity)),
                box_selection.map(|b| b.unit_value.to_string()),
                box_selection.map(|b| b.total_value.to_string()),
            ],
        )
        .context("failed to insert order vendor selection")?;

        for line in &order.vendor_selection.lines {
            let item_id = line.item_id.as_ref().map(ItemId::as_str);
            let (menu_item_id, meal_item_id) = match line.item_kind {
                Some(ItemKind::Meal) => (None, item_id),
                Some(ItemKind::Menu) | None => (item_id, None),
            };
            tx.execute(
                "INSERT INTO order_items(
                    vendor_selection_id, menu_item_id, meal_item_id, custom_description,
                    quantity, unit_value, total_value, notes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    selection_id.to_string(),
                    menu_item_id,
                    meal_item_id,
                    line.custom_description,
                    i64::from(line.quantity),
                    line.unit_value.to_string(),
                    line.total_value.to_string(),
                    line.notes,
                ],
            )
            .context("failed to insert order item")?;
        }

        tx.commit().context("failed to commit order transaction")?;

        Ok(ConcreteOrder {
            id: order_id,
            order_number,
            client_id: order.client_id.clone(),
            service_kind: order.service_kind,
            status: order.status,
            scheduled_delivery_date: order.scheduled_delivery_date,
            total_value: order.total_value,
            total_items: order.total_items,
            notes: order.notes.clone(),
            case_id: order.case_id.clone(),
            creation_id: Some(order.creation_id),
            created_at,
            vendor_selections: vec![VendorSelection {
                id: selection_id,
                vendor_id: order.vendor_selection.vendor_id.clone(),
                box_selection: order.vendor_selection.box_selection.clone(),
                lines: order.vendor_selection.lines.clone(),
            }],
        })
    }
}

impl OrderStore for SqliteStore {
    fn load_catalog(&self) -> Result<CatalogState, StoreError> {
        self.read_catalog().map_err(|err| classify(&err))
    }

    fn list_clients(
        &self,
        filter: Option<&[ClientId]>,
        page: Page,
    ) -> Result<Vec<ClientProfile>, StoreError> {
        self.read_clients(filter, page).map_err(|err| classify(&err))
    }

    fn load_history(
        &self,
        client_ids: &[ClientId],
    ) -> Result<BTreeMap<ClientId, Vec<HistorySnapshot>>, StoreError> {
        self.read_history(client_ids).map_err(|err| classify(&err))
    }

    fn list_orders_in_week(
        &self,
        week: WeekBounds,
        filter: Option<&[ClientId]>,
        page: Page,
    ) -> Result<Vec<ConcreteOrder>, StoreError> {
        self.read_orders_in_week(week, filter, page).map_err(|err| classify(&err))
    }

    fn client_names(
        &self,
        client_ids: &[ClientId],
    ) -> Result<BTreeMap<ClientId, String>, StoreError> {
        self.read_client_names(client_ids).map_err(|err| classify(&err))
    }

    fn max_creation_id(&self) -> Result<Option<u64>, StoreError> {
        self.read_max_creation_id().map_err(|err| classify(&err))
    }

    fn insert_order(&mut self, order: &NewOrder) -> Result<ConcreteOrder, StoreError> {
        self.create_order(order).map_err(|err| classify(&err))
    }
}

/// Constraint violations reject a single write; every other failure means the store
/// cannot be trusted for the rest of the run.
fn classify(err: &anyhow::Error) -> StoreError {
    let rejected = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == ErrorCode::ConstraintViolation
        )
    });
    let message = format!("{err:#}");
    if rejected {
        StoreError::Rejected(message)
    } else {
        StoreError::Unavailable(message)
    }
}

fn order_from_row(row: &rusqlite::Row<'_>) -> Result<ConcreteOrder> {
    let service_kind_raw: String = row.get(3)?;
    let status_raw: String = row.get(4)?;
    Ok(ConcreteOrder {
        id: OrderId(parse_ulid(&row.get::<_, String>(0)?)?),
        order_number: i64_to_u64(row.get(1)?)?,
        client_id: ClientId::new(row.get::<_, String>(2)?),
        service_kind: ServiceKind::parse(&service_kind_raw)
            .ok_or_else(|| anyhow!("unknown service_kind: {service_kind_raw}"))?,
        status: OrderStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown order status: {status_raw}"))?,
        scheduled_delivery_date: parse_date(&row.get::<_, String>(5)?)?,
        total_value: parse_decimal(&row.get::<_, String>(6)?)?,
        total_items: to_u32(row.get(7)?)?,
        notes: row.get(8)?,
        case_id: row.get(9)?,
        creation_id: row.get::<_, Option<i64>>(10)?.map(i64_to_u64).transpose()?,
        created_at: parse_rfc3339(&row.get::<_, String>(11)?)?,
        vendor_selections: Vec::new(),
    })
}

fn item_table(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Menu => "menu_items",
        ItemKind::Meal => "meal_items",
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn upsert_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO app_settings(key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now_rfc3339()?],
    )
    .with_context(|| format!("failed to write setting {key}"))?;
    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn parse_date(value: &str) -> Result<Date> {
    parse_iso_date(value).map_err(|err| anyhow!(err))
}

fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("invalid decimal amount: {value:?}"))
}

fn parse_ulid(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))
}

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("value out of range for sqlite: {value}"))
}

fn u64_to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("value out of range for sqlite: {value}"))
}

fn i64_to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).with_context(|| format!("negative value where unsigned expected: {value}"))
}

fn to_u32(value: i64) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("value out of range for u32: {value}"))
}
