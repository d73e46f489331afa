use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};
use weekly_orders_core::diff::compare_expected;
use weekly_orders_core::{
    blocking_issues, derive_expected_orders, format_iso_date, load_existing_orders,
    parse_week_start, reconcile, select_snapshot, CatalogState, ClientId, ClientProfile,
    ConcreteOrder, CutoffPolicy, Derivation, ExistingOrders, ExpectedOrder, HistorySnapshot,
    NewOrder, OrderStore, Page, ReconcileError, StoreError, WeekBounds, DEFAULT_PAGE_SIZE,
};

use crate::report::{
    CheckReport, CheckRequest, ClientReport, CreateReport, CreateRequest, CreatedOrder,
    ExistingOrderSummary, ExpectedSummary, FailedOrder, MatchStatus, SnapshotUsedAt,
};

/// Knobs shared by check and create runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub cutoff: CutoffPolicy,
    pub page_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { cutoff: CutoffPolicy::default(), page_size: DEFAULT_PAGE_SIZE }
    }
}

/// Compute expected, missing and extra orders for one week. Never writes.
///
/// Data-quality problems (blocked configurations, skipped derivations) are reported
/// per client instead of failing the run.
///
/// # Errors
/// Returns [`ReconcileError::Validation`] for a malformed request and
/// [`ReconcileError::Store`] when the store cannot be read.
pub fn check_week<S: OrderStore + ?Sized>(
    store: &S,
    request: &CheckRequest,
    settings: &EngineSettings,
) -> Result<CheckReport, ReconcileError> {
    let week = parse_week_start(&request.week_start)?;
    let filter = request.client_ids.as_deref().map(client_filter).transpose()?;
    run_check(store, week, filter.as_deref(), settings)
}

fn client_filter(raw: &[String]) -> Result<Vec<ClientId>, ReconcileError> {
    let mut ids = BTreeSet::new();
    for value in raw {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ReconcileError::Validation(
                "clientIds MUST NOT contain blank values".to_string(),
            ));
        }
        ids.insert(ClientId::from(trimmed));
    }
    Ok(ids.into_iter().collect())
}

fn run_check<S: OrderStore + ?Sized>(
    store: &S,
    week: WeekBounds,
    filter: Option<&[ClientId]>,
    settings: &EngineSettings,
) -> Result<CheckReport, ReconcileError> {
    let cutoff = settings.cutoff.cutoff_for(week);
    let catalog = store.load_catalog()?;
    let existing = load_existing_orders(store, week, filter, settings.page_size)?;

    let mut by_client = Vec::new();
    let mut page = Page::first(settings.page_size);
    loop {
        let clients = store.list_clients(filter, page)?;
        let exhausted = clients.len() < page.limit;

        let eligible: Vec<&ClientProfile> = clients
            .iter()
            .filter(|client| {
                let eligible = client.is_eligible(week.start);
                if !eligible {
                    tracing::debug!(client_id = %client.id, "client not eligible for week");
                }
                eligible
            })
            .collect();
        let ids: Vec<ClientId> = eligible.iter().map(|client| client.id.clone()).collect();
        let history = store.load_history(&ids)?;

        for client in eligible {
            let log = history.get(&client.id).map(Vec::as_slice).unwrap_or_default();
            if let Some(report) = evaluate_client(client, log, week, cutoff, &catalog, &existing) {
                by_client.push(report);
            }
        }

        if exhausted {
            break;
        }
        page = page.next();
    }

    if let Some(requested) = filter {
        by_client.extend(requested_without_rows(store, requested, &by_client)?);
    }

    by_client.sort_by(|lhs: &ClientReport, rhs: &ClientReport| {
        lhs.client_name.cmp(&rhs.client_name).then_with(|| lhs.client_id.cmp(&rhs.client_id))
    });

    let report = CheckReport {
        week_start: week.start,
        week_end: week.end,
        cutoff_used_at: cutoff,
        cutoff_day_name: settings.cutoff.day.as_str().to_string(),
        expected_count: by_client.iter().map(|client| client.expected_summary.len()).sum(),
        missing_count: by_client.iter().map(|client| client.missing.len()).sum(),
        blocked_count: by_client.iter().filter(|client| client.is_blocked()).count(),
        missing_fingerprint: String::new(),
        by_client,
    };
    let fingerprint = missing_fingerprint(&report.missing_orders());

    tracing::info!(
        week_start = %format_iso_date(week.start),
        clients = report.by_client.len(),
        expected = report.expected_count,
        missing = report.missing_count,
        blocked = report.blocked_count,
        "weekly order check complete"
    );

    Ok(CheckReport { missing_fingerprint: fingerprint, ..report })
}

/// Explicitly requested clients always get a row, empty when nothing is expected or
/// on file for the week. Ids without a profile are named by their id.
fn requested_without_rows<S: OrderStore + ?Sized>(
    store: &S,
    requested: &[ClientId],
    reported: &[ClientReport],
) -> Result<Vec<ClientReport>, ReconcileError> {
    let present: BTreeSet<&ClientId> = reported.iter().map(|client| &client.client_id).collect();
    let absent: Vec<ClientId> =
        requested.iter().filter(|id| !present.contains(id)).cloned().collect();
    if absent.is_empty() {
        return Ok(Vec::new());
    }

    let names = store.client_names(&absent)?;
    Ok(absent
        .into_iter()
        .map(|client_id| ClientReport {
            client_name: names.get(&client_id).cloned().unwrap_or_else(|| client_id.to_string()),
            client_id,
            missing: Vec::new(),
            expected_summary: Vec::new(),
            snapshot_used_at: None,
            snapshot_order_config: None,
            existing_orders: Vec::new(),
            blocking_issues: Vec::new(),
            skipped: Vec::new(),
        })
        .collect())
}

fn evaluate_client(
    client: &ClientProfile,
    history: &[HistorySnapshot],
    week: WeekBounds,
    cutoff: time::OffsetDateTime,
    catalog: &CatalogState,
    existing: &ExistingOrders,
) -> Option<ClientReport> {
    let ledger = existing.for_client(&client.id);
    let selected = select_snapshot(history, client.live_configuration.as_ref(), cutoff);
    if selected.is_none() && ledger.is_empty() {
        return None;
    }

    let mut issues = Vec::new();
    let mut derivation = Derivation::default();
    if let Some(snapshot) = &selected {
        issues = blocking_issues(&snapshot.configuration, catalog);
        if issues.is_empty() {
            derivation = derive_expected_orders(
                &client.id,
                &client.full_name,
                &snapshot.configuration,
                week,
                catalog,
            );
        } else {
            tracing::debug!(client_id = %client.id, issues = issues.len(), "configuration blocked");
        }
    }

    let diff = reconcile(derivation.orders, ledger);

    let mut summary_rows: Vec<(&ExpectedOrder, Option<u64>)> = diff
        .covered
        .iter()
        .map(|covered| (&covered.expected, Some(covered.order_number)))
        .chain(diff.missing.iter().map(|order| (order, None)))
        .collect();
    summary_rows.sort_by(|lhs, rhs| compare_expected(lhs.0, rhs.0).then_with(|| lhs.1.cmp(&rhs.1)));
    let expected_summary =
        summary_rows.into_iter().map(|(order, number)| ExpectedSummary::of(order, number)).collect();

    let matched: BTreeSet<_> = diff.covered.iter().map(|covered| covered.order_id).collect();
    let existing_orders = ledger
        .iter()
        .map(|order| existing_summary(order, matched.contains(&order.id)))
        .collect();

    Some(ClientReport {
        client_id: client.id.clone(),
        client_name: client.full_name.clone(),
        missing: diff.missing,
        expected_summary,
        snapshot_used_at: selected.as_ref().map(|snapshot| SnapshotUsedAt {
            timestamp: snapshot.recorded_at,
            created_at: snapshot.created_at,
            source: snapshot.source,
        }),
        snapshot_order_config: selected.map(|snapshot| snapshot.configuration),
        existing_orders,
        blocking_issues: issues,
        skipped: derivation.skipped,
    })
}

fn existing_summary(order: &ConcreteOrder, matched: bool) -> ExistingOrderSummary {
    let mut vendor_ids: Vec<_> =
        order.vendor_selections.iter().filter_map(|selection| selection.vendor_id.clone()).collect();
    vendor_ids.sort();
    vendor_ids.dedup();
    ExistingOrderSummary {
        order_id: order.id,
        order_number: order.order_number,
        service_kind: order.service_kind,
        scheduled_delivery_date: order.scheduled_delivery_date,
        vendor_ids,
        total_value: order.total_value,
        total_items: order.total_items,
        order_status: order.status,
        status: if matched { MatchStatus::Matched } else { MatchStatus::Extra },
    }
}

/// Stable digest of a missing list, for comparing runs without diffing full reports.
#[must_use]
pub fn missing_fingerprint(missing: &[ExpectedOrder]) -> String {
    let mut hasher = Sha256::new();
    for order in missing {
        hasher.update(
            format!(
                "{}|{}|{}|{}|{}|{}|{}\n",
                order.client_id,
                order.service_kind.as_str(),
                order.vendor_id.as_ref().map_or("", |id| id.as_str()),
                format_iso_date(order.scheduled_delivery_date),
                order.meal_category.as_deref().unwrap_or_default(),
                order.total_value.normalize(),
                order.total_items,
            )
            .as_bytes(),
        );
        for line in &order.items {
            hasher.update(
                format!(
                    "  {}|{}|{}\n",
                    line.item_id,
                    line.quantity,
                    line.unit_value.normalize()
                )
                .as_bytes(),
            );
        }
    }
    let digest = hasher.finalize();
    format!("sha256:{digest:x}")
}

/// Materialize missing orders. Append-only.
///
/// Orders the ledger already covers are never written twice: a recompute request
/// diffs the week first, and a direct list is re-diffed against the ledger before
/// any insert. A rejected insert is logged and reported in `failed`; an unavailable
/// store aborts the run.
///
/// # Errors
/// Returns [`ReconcileError::Validation`] for a malformed request and
/// [`ReconcileError::Store`] when the store becomes unavailable.
pub fn create_orders<S: OrderStore + ?Sized>(
    store: &mut S,
    request: &CreateRequest,
    settings: &EngineSettings,
) -> Result<CreateReport, ReconcileError> {
    let (to_create, already_covered, requested_creation_id) = match request {
        CreateRequest::Recompute { week_start, client_id, creation_id } => {
            let week = parse_week_start(week_start)?;
            let filter = match client_id {
                Some(raw) => Some(client_filter(std::slice::from_ref(raw))?),
                None => None,
            };
            let report = run_check(&*store, week, filter.as_deref(), settings)?;
            let covered = report.expected_count - report.missing_count;
            (report.missing_orders(), covered, *creation_id)
        }
        CreateRequest::Direct { missing, creation_id } => {
            for order in missing {
                order.validate()?;
            }
            let (pending, covered) = still_missing(&*store, missing, settings.page_size)?;
            (pending, covered, *creation_id)
        }
    };

    let creation_id = match requested_creation_id {
        Some(id) => id,
        None => store.max_creation_id()?.map_or(1, |max| max.saturating_add(1)),
    };

    let mut report = CreateReport {
        created: 0,
        order_numbers: Vec::new(),
        details: Vec::new(),
        creation_id,
        already_covered,
        failed: Vec::new(),
    };

    for expected in &to_create {
        let new_order = NewOrder::from_expected(expected, creation_id);
        match store.insert_order(&new_order) {
            Ok(order) => {
                report.order_numbers.push(order.order_number);
                report.details.push(CreatedOrder {
                    order_id: order.id,
                    order_number: order.order_number,
                    client_name: expected.client_name.clone(),
                    date: order.scheduled_delivery_date,
                });
            }
            Err(StoreError::Rejected(reason)) => {
                tracing::warn!(
                    client_id = %expected.client_id,
                    date = %format_iso_date(expected.scheduled_delivery_date),
                    reason = %reason,
                    "skipping order the store rejected"
                );
                report.failed.push(FailedOrder {
                    client_id: expected.client_id.clone(),
                    client_name: expected.client_name.clone(),
                    date: expected.scheduled_delivery_date,
                    reason,
                });
            }
            Err(err @ StoreError::Unavailable(_)) => return Err(err.into()),
        }
    }
    report.created = report.details.len();

    tracing::info!(
        creation_id,
        created = report.created,
        already_covered = report.already_covered,
        failed = report.failed.len(),
        "weekly order creation complete"
    );
    Ok(report)
}

/// Drop orders from a caller-supplied list that the ledger already covers.
fn still_missing<S: OrderStore + ?Sized>(
    store: &S,
    requested: &[ExpectedOrder],
    page_size: usize,
) -> Result<(Vec<ExpectedOrder>, usize), ReconcileError> {
    let mut by_week: BTreeMap<WeekBounds, Vec<ExpectedOrder>> = BTreeMap::new();
    for order in requested {
        by_week
            .entry(WeekBounds::containing(order.scheduled_delivery_date))
            .or_default()
            .push(order.clone());
    }

    let mut pending = Vec::new();
    let mut covered = 0;
    for (week, orders) in by_week {
        let clients: Vec<ClientId> =
            orders.iter().map(|order| order.client_id.clone()).collect::<BTreeSet<_>>().into_iter().collect();
        let ledger = load_existing_orders(store, week, Some(&clients), page_size)?;
        let existing: Vec<ConcreteOrder> = ledger.iter().cloned().collect();
        let diff = reconcile(orders, &existing);
        covered += diff.covered.len();
        pending.extend(diff.missing);
    }
    Ok((pending, covered))
}
