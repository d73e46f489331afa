use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::model::{iso_date, ClientId, OrderId, ServiceKind, VendorId};
use crate::order::{ConcreteOrder, ExpectedOrder};

/// Identity used to decide whether an expected order already exists in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "camelCase")]
pub struct MatchKey {
    pub client_id: ClientId,
    pub service_kind: ServiceKind,
    pub vendor_id: Option<VendorId>,
    #[serde(with = "iso_date")]
    pub scheduled_date: Date,
}

impl MatchKey {
    #[must_use]
    pub fn of_expected(order: &ExpectedOrder) -> Self {
        Self {
            client_id: order.client_id.clone(),
            service_kind: order.service_kind,
            vendor_id: order.vendor_id.clone(),
            scheduled_date: order.scheduled_delivery_date,
        }
    }

    /// One key per vendor selection; an order without selections has a vendorless key.
    #[must_use]
    pub fn of_order(order: &ConcreteOrder) -> Vec<Self> {
        let key = |vendor_id: Option<VendorId>| Self {
            client_id: order.client_id.clone(),
            service_kind: order.service_kind,
            vendor_id,
            scheduled_date: order.scheduled_delivery_date,
        };
        if order.vendor_selections.is_empty() {
            return vec![key(None)];
        }
        let mut keys: Vec<Self> =
            order.vendor_selections.iter().map(|selection| key(selection.vendor_id.clone())).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoveredOrder {
    pub expected: ExpectedOrder,
    pub order_id: OrderId,
    pub order_number: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileDiff {
    pub missing: Vec<ExpectedOrder>,
    pub covered: Vec<CoveredOrder>,
    pub extra: Vec<ConcreteOrder>,
}

impl ReconcileDiff {
    #[must_use]
    pub fn expected_count(&self) -> usize {
        self.missing.len() + self.covered.len()
    }
}

/// Report ordering: client name, client id, date, kind, vendor, meal category.
#[must_use]
pub fn compare_expected(lhs: &ExpectedOrder, rhs: &ExpectedOrder) -> Ordering {
    lhs.client_name
        .cmp(&rhs.client_name)
        .then_with(|| lhs.client_id.cmp(&rhs.client_id))
        .then_with(|| lhs.scheduled_delivery_date.cmp(&rhs.scheduled_delivery_date))
        .then_with(|| lhs.service_kind.cmp(&rhs.service_kind))
        .then_with(|| lhs.vendor_id.cmp(&rhs.vendor_id))
        .then_with(|| lhs.meal_category.cmp(&rhs.meal_category))
}

pub fn sort_expected(orders: &mut [ExpectedOrder]) {
    orders.sort_by(compare_expected);
}

/// Split expected orders into missing and covered against the existing ledger.
///
/// Matching is a multiset: each existing order covers at most one expected order, and
/// candidates are consumed in ascending order number. Existing orders left unconsumed
/// are returned as `extra`; they are never touched.
#[must_use]
pub fn reconcile(mut expected: Vec<ExpectedOrder>, existing: &[ConcreteOrder]) -> ReconcileDiff {
    sort_expected(&mut expected);

    let mut by_number: Vec<usize> = (0..existing.len()).collect();
    by_number.sort_by_key(|index| (existing[*index].order_number, existing[*index].id));

    let mut candidates: BTreeMap<MatchKey, Vec<usize>> = BTreeMap::new();
    for index in &by_number {
        for key in MatchKey::of_order(&existing[*index]) {
            candidates.entry(key).or_default().push(*index);
        }
    }

    let mut consumed = vec![false; existing.len()];
    let mut diff = ReconcileDiff::default();
    for order in expected {
        let key = MatchKey::of_expected(&order);
        let hit = candidates
            .get(&key)
            .and_then(|indices| indices.iter().copied().find(|index| !consumed[*index]));
        match hit {
            Some(index) => {
                consumed[index] = true;
                diff.covered.push(CoveredOrder {
                    expected: order,
                    order_id: existing[index].id,
                    order_number: existing[index].order_number,
                });
            }
            None => diff.missing.push(order),
        }
    }

    diff.extra = by_number
        .into_iter()
        .filter(|index| !consumed[*index])
        .map(|index| existing[index].clone())
        .collect();
    diff.extra.sort_by(|lhs, rhs| {
        lhs.scheduled_delivery_date
            .cmp(&rhs.scheduled_delivery_date)
            .then_with(|| lhs.order_number.cmp(&rhs.order_number))
    });
    diff
}
