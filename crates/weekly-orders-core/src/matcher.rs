use std::collections::BTreeMap;

use crate::model::ClientId;
use crate::order::ConcreteOrder;
use crate::store::{OrderStore, Page, StoreError};
use crate::week::WeekBounds;

/// Ledger orders for one week, grouped per client.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ExistingOrders {
    by_client: BTreeMap<ClientId, Vec<ConcreteOrder>>,
}

impl ExistingOrders {
    #[must_use]
    pub fn from_orders(orders: Vec<ConcreteOrder>) -> Self {
        let mut by_client: BTreeMap<ClientId, Vec<ConcreteOrder>> = BTreeMap::new();
        for order in orders {
            by_client.entry(order.client_id.clone()).or_default().push(order);
        }
        for orders in by_client.values_mut() {
            orders.sort_by_key(|order| (order.scheduled_delivery_date, order.order_number));
        }
        Self { by_client }
    }

    /// Orders for `client_id`; empty when the client has none.
    #[must_use]
    pub fn for_client(&self, client_id: &ClientId) -> &[ConcreteOrder] {
        self.by_client.get(client_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientId> {
        self.by_client.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConcreteOrder> {
        self.by_client.values().flatten()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_client.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }
}

/// Page through every order scheduled in `week`.
///
/// # Errors
/// Propagates the first [`StoreError`] returned by the store.
pub fn load_existing_orders<S: OrderStore + ?Sized>(
    store: &S,
    week: WeekBounds,
    filter: Option<&[ClientId]>,
    page_size: usize,
) -> Result<ExistingOrders, StoreError> {
    let mut page = Page::first(page_size);
    let mut orders = Vec::new();
    loop {
        let batch = store.list_orders_in_week(week, filter, page)?;
        let exhausted = batch.len() < page.limit;
        orders.extend(batch);
        if exhausted {
            break;
        }
        page = page.next();
    }
    Ok(ExistingOrders::from_orders(orders))
}
