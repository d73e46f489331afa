use std::collections::{BTreeMap, BTreeSet};

use time::OffsetDateTime;

use crate::catalog::{CatalogItem, CatalogState, VendorRecord};
use crate::client::ClientProfile;
use crate::model::{ClientId, ItemId, OrderId, SelectionId, VendorId};
use crate::order::{next_order_number, ConcreteOrder, NewOrder, VendorSelection};
use crate::snapshot::HistorySnapshot;
use crate::week::WeekBounds;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    /// The backing store cannot be reached; nothing further can be attempted.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A single write was refused (constraint violation and the like).
    #[error("store rejected write: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    #[must_use]
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit: limit.max(1) }
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self { offset: self.offset + self.limit, limit: self.limit }
    }
}

/// Storage port used by the reconciliation engine.
///
/// Reads are bounded by [`Page`]. Paged results MUST come back in a stable order so
/// successive pages neither skip nor repeat rows.
pub trait OrderStore {
    /// # Errors
    /// Returns [`StoreError::Unavailable`] when the catalog cannot be read.
    fn load_catalog(&self) -> Result<CatalogState, StoreError>;

    /// Clients ordered by id, optionally restricted to `filter`.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] when clients cannot be read.
    fn list_clients(
        &self,
        filter: Option<&[ClientId]>,
        page: Page,
    ) -> Result<Vec<ClientProfile>, StoreError>;

    /// Configuration history per client, each log in recording order.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] when history cannot be read.
    fn load_history(
        &self,
        client_ids: &[ClientId],
    ) -> Result<BTreeMap<ClientId, Vec<HistorySnapshot>>, StoreError>;

    /// Orders scheduled inside `week`, ordered by date then order number.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] when orders cannot be read.
    fn list_orders_in_week(
        &self,
        week: WeekBounds,
        filter: Option<&[ClientId]>,
        page: Page,
    ) -> Result<Vec<ConcreteOrder>, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Unavailable`] when clients cannot be read.
    fn client_names(&self, client_ids: &[ClientId])
        -> Result<BTreeMap<ClientId, String>, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Unavailable`] when orders cannot be read.
    fn max_creation_id(&self) -> Result<Option<u64>, StoreError>;

    /// Insert one order with its vendor selection and lines, allocating the next order
    /// number in the same serialized step.
    ///
    /// # Errors
    /// Returns [`StoreError::Rejected`] when this order cannot be written and
    /// [`StoreError::Unavailable`] when the store itself fails.
    fn insert_order(&mut self, order: &NewOrder) -> Result<ConcreteOrder, StoreError>;
}

/// In-process store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    vendors: BTreeMap<VendorId, VendorRecord>,
    items: Vec<CatalogItem>,
    clients: BTreeMap<ClientId, ClientProfile>,
    history: BTreeMap<ClientId, Vec<HistorySnapshot>>,
    orders: Vec<ConcreteOrder>,
    rejected_clients: BTreeSet<ClientId>,
    unavailable: bool,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_vendor(&mut self, vendor: VendorRecord) {
        self.vendors.insert(vendor.id.clone(), vendor);
    }

    pub fn remove_vendor(&mut self, vendor_id: &VendorId) {
        self.vendors.remove(vendor_id);
    }

    pub fn upsert_item(&mut self, item: CatalogItem) {
        self.items.retain(|existing| !(existing.id == item.id && existing.kind == item.kind));
        self.items.push(item);
    }

    pub fn remove_item(&mut self, item_id: &ItemId) {
        self.items.retain(|existing| &existing.id != item_id);
    }

    pub fn upsert_client(&mut self, client: ClientProfile) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn append_history(&mut self, entry: HistorySnapshot) {
        self.history.entry(entry.client_id.clone()).or_default().push(entry);
    }

    /// Make every insert for `client_id` fail with [`StoreError::Rejected`].
    pub fn reject_inserts_for(&mut self, client_id: ClientId) {
        self.rejected_clients.insert(client_id);
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    #[must_use]
    pub fn orders(&self) -> &[ConcreteOrder] {
        &self.orders
    }

    fn available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }
}

fn in_filter(filter: Option<&[ClientId]>, client_id: &ClientId) -> bool {
    filter.map_or(true, |ids| ids.contains(client_id))
}

impl OrderStore for InMemoryStore {
    fn load_catalog(&self) -> Result<CatalogState, StoreError> {
        self.available()?;
        Ok(CatalogState::from_parts(self.vendors.values().cloned().collect(), self.items.clone()))
    }

    fn list_clients(
        &self,
        filter: Option<&[ClientId]>,
        page: Page,
    ) -> Result<Vec<ClientProfile>, StoreError> {
        self.available()?;
        Ok(self
            .clients
            .values()
            .filter(|client| in_filter(filter, &client.id))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    fn load_history(
        &self,
        client_ids: &[ClientId],
    ) -> Result<BTreeMap<ClientId, Vec<HistorySnapshot>>, StoreError> {
        self.available()?;
        Ok(client_ids
            .iter()
            .filter_map(|id| self.history.get(id).map(|log| (id.clone(), log.clone())))
            .collect())
    }

    fn list_orders_in_week(
        &self,
        week: WeekBounds,
        filter: Option<&[ClientId]>,
        page: Page,
    ) -> Result<Vec<ConcreteOrder>, StoreError> {
        self.available()?;
        let mut matching: Vec<&ConcreteOrder> = self
            .orders
            .iter()
            .filter(|order| week.contains(order.scheduled_delivery_date))
            .filter(|order| in_filter(filter, &order.client_id))
            .collect();
        matching.sort_by_key(|order| (order.scheduled_delivery_date, order.order_number));
        Ok(matching.into_iter().skip(page.offset).take(page.limit).cloned().collect())
    }

    fn client_names(
        &self,
        client_ids: &[ClientId],
    ) -> Result<BTreeMap<ClientId, String>, StoreError> {
        self.available()?;
        Ok(client_ids
            .iter()
            .filter_map(|id| self.clients.get(id).map(|client| (id.clone(), client.full_name.clone())))
            .collect())
    }

    fn max_creation_id(&self) -> Result<Option<u64>, StoreError> {
        self.available()?;
        Ok(self.orders.iter().filter_map(|order| order.creation_id).max())
    }

    fn insert_order(&mut self, order: &NewOrder) -> Result<ConcreteOrder, StoreError> {
        self.available()?;
        if self.rejected_clients.contains(&order.client_id) {
            return Err(StoreError::Rejected(format!(
                "inserts for client {} are rejected",
                order.client_id
            )));
        }

        let current_max = self.orders.iter().map(|existing| existing.order_number).max();
        let stored = ConcreteOrder {
            id: OrderId::new(),
            order_number: next_order_number(current_max),
            client_id: order.client_id.clone(),
            service_kind: order.service_kind,
            status: order.status,
            scheduled_delivery_date: order.scheduled_delivery_date,
            total_value: order.total_value,
            total_items: order.total_items,
            notes: order.notes.clone(),
            case_id: order.case_id.clone(),
            creation_id: Some(order.creation_id),
            created_at: OffsetDateTime::now_utc(),
            vendor_selections: vec![VendorSelection {
                id: SelectionId::new(),
                vendor_id: order.vendor_selection.vendor_id.clone(),
                box_selection: order.vendor_selection.box_selection.clone(),
                lines: order.vendor_selection.lines.clone(),
            }],
        };
        self.orders.push(stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use time::macros::date;

    use super::*;
    use crate::model::{OrderStatus, ServiceKind};
    use crate::order::NewVendorSelection;

    fn new_order(client: &str, day: time::Date) -> NewOrder {
        NewOrder {
            client_id: ClientId::from(client),
            service_kind: ServiceKind::Food,
            status: OrderStatus::Scheduled,
            scheduled_delivery_date: day,
            total_value: Decimal::TEN,
            total_items: 2,
            notes: None,
            case_id: None,
            creation_id: 1,
            vendor_selection: NewVendorSelection {
                vendor_id: Some(VendorId::from("V1")),
                box_selection: None,
                lines: vec![],
            },
        }
    }

    #[test]
    fn inserts_allocate_sequential_numbers_and_page_by_week() -> Result<(), StoreError> {
        let mut store = InMemoryStore::new();
        let first = store.insert_order(&new_order("C1", date!(2026 - 02 - 23)))?;
        let second = store.insert_order(&new_order("C2", date!(2026 - 02 - 24)))?;
        store.insert_order(&new_order("C1", date!(2026 - 03 - 02)))?;
        assert_eq!((first.order_number, second.order_number), (100_000, 100_001));

        let week = WeekBounds::containing(date!(2026 - 02 - 22));
        let page = store.list_orders_in_week(week, None, Page::first(1))?;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].order_number, 100_000);
        let rest = store.list_orders_in_week(week, None, Page::first(1).next())?;
        assert_eq!(rest[0].order_number, 100_001);

        let filter = [ClientId::from("C2")];
        let filtered = store.list_orders_in_week(week, Some(&filter), Page::first(10))?;
        assert_eq!(filtered.len(), 1);
        assert_eq!(store.max_creation_id()?, Some(1));
        Ok(())
    }

    #[test]
    fn failure_hooks_surface_store_errors() {
        let mut store = InMemoryStore::new();
        store.reject_inserts_for(ClientId::from("C1"));
        assert!(matches!(
            store.insert_order(&new_order("C1", date!(2026 - 02 - 23))),
            Err(StoreError::Rejected(_))
        ));
        store.set_unavailable(true);
        assert!(matches!(store.load_catalog(), Err(StoreError::Unavailable(_))));
    }
}
