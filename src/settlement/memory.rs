use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use super::models::*;
use super::store::*;

/// Company directory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub business_number: Option<String>,
    #[serde(default)]
    pub ceo_name: Option<String>,
    #[serde(default)]
    pub payment: PaymentInfo,
}

/// User directory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// One side's charge on an order, as kept by the order ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: Uuid,
    pub side: Side,
    pub counterparty_id: Uuid,
    pub amount: Decimal,
    #[serde(default = "default_completed")]
    pub completed: bool,
    #[serde(default)]
    pub departure_date: Option<NaiveDate>,
    #[serde(default)]
    pub arrival_date: Option<NaiveDate>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub bundle_id: Option<Uuid>,
}

fn default_completed() -> bool {
    true
}

/// Directory and ledger rows loaded into the memory store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSeed {
    #[serde(default)]
    pub companies: Vec<CompanyRecord>,
    #[serde(default)]
    pub managers: Vec<ManagerRecord>,
    #[serde(default)]
    pub orders: Vec<OrderRecord>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    companies: HashMap<Uuid, CompanyRecord>,
    managers: HashMap<Uuid, ManagerRecord>,
    orders: HashMap<(Side, Uuid), OrderRecord>,
    bundles: HashMap<Uuid, Bundle>,
    // Vecs keep insertion order for detail views
    items: Vec<BundleItem>,
    bundle_adjustments: Vec<BundleAdjustment>,
    item_adjustments: Vec<ItemAdjustment>,
}

impl MemoryState {
    fn invoice_taken(&self, bundle_id: Uuid, invoice_no: Option<&str>) -> bool {
        match invoice_no {
            Some(no) => self
                .bundles
                .values()
                .any(|b| b.id != bundle_id && b.invoice_no.as_deref() == Some(no)),
            None => false,
        }
    }

    fn detail(&self, bundle_id: Uuid) -> Option<BundleDetail> {
        let bundle = self.bundles.get(&bundle_id)?.clone();
        let items = self
            .items
            .iter()
            .filter(|i| i.bundle_id == bundle_id)
            .cloned()
            .collect();
        let item_adjustments = self
            .item_adjustments
            .iter()
            .filter(|a| a.bundle_id == bundle_id)
            .cloned()
            .collect();
        let adjustments = self
            .bundle_adjustments
            .iter()
            .filter(|a| a.bundle_id == bundle_id)
            .cloned()
            .collect();
        Some(BundleDetail::assemble(bundle, items, item_adjustments, adjustments))
    }

    fn filtered_bundles(&self, filter: &BundleFilter) -> Vec<&Bundle> {
        self.bundles
            .values()
            .filter(|b| bundle_matches(b, filter))
            .collect()
    }
}

/// In-process store with the same transactional contract as the Postgres one.
///
/// A transaction holds the store lock until it commits or is dropped, so all
/// writers are serialized and a dropped transaction leaves no trace.
#[derive(Clone, Default)]
pub struct MemorySettlementStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, seed: LedgerSeed) {
        let mut state = self.state.lock().await;
        for company in seed.companies {
            state.companies.insert(company.id, company);
        }
        for manager in seed.managers {
            state.managers.insert(manager.id, manager);
        }
        for order in seed.orders {
            state.orders.insert((order.side, order.order_id), order);
        }
    }

    pub async fn from_seed_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::Config(format!("Cannot read seed file {}: {}", path.display(), e)))?;
        let seed: LedgerSeed = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Invalid seed file {}: {}", path.display(), e)))?;

        info!(
            "Seeding memory store: {} companies, {} managers, {} order charges",
            seed.companies.len(),
            seed.managers.len(),
            seed.orders.len()
        );

        let store = Self::new();
        store.seed(seed).await;
        Ok(store)
    }

    /// Which bundle currently holds an order charge, `None` if the order is unknown
    pub async fn order_bundle(&self, side: Side, order_id: Uuid) -> Option<Option<Uuid>> {
        let state = self.state.lock().await;
        state.orders.get(&(side, order_id)).map(|o| o.bundle_id)
    }

    /// Row counts of (bundles, items, bundle adjustments, item adjustments)
    pub async fn row_counts(&self) -> (usize, usize, usize, usize) {
        let state = self.state.lock().await;
        (
            state.bundles.len(),
            state.items.len(),
            state.bundle_adjustments.len(),
            state.item_adjustments.len(),
        )
    }
}

#[async_trait]
impl SettlementStore for MemorySettlementStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> AppResult<Box<dyn SettlementTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn find_counterparty(&self, company_id: Uuid) -> AppResult<Option<CounterpartyProfile>> {
        let state = self.state.lock().await;
        Ok(state.companies.get(&company_id).map(|c| CounterpartyProfile {
            snapshot: CompanySnapshot {
                name: c.name.clone(),
                business_number: c.business_number.clone(),
                ceo_name: c.ceo_name.clone(),
            },
            payment: c.payment.clone(),
        }))
    }

    async fn find_manager(&self, user_id: Uuid) -> AppResult<Option<ManagerSnapshot>> {
        let state = self.state.lock().await;
        Ok(state.managers.get(&user_id).map(|m| ManagerSnapshot {
            name: m.name.clone(),
            email: m.email.clone(),
            phone: m.phone.clone(),
        }))
    }

    async fn get_bundle(&self, bundle_id: Uuid) -> AppResult<Option<BundleDetail>> {
        let state = self.state.lock().await;
        Ok(state.detail(bundle_id))
    }

    async fn list_bundles(
        &self,
        filter: &BundleFilter,
        pagination: Pagination,
    ) -> AppResult<Page<Bundle>> {
        let state = self.state.lock().await;
        let mut bundles = state.filtered_bundles(filter);
        bundles.sort_by(|a, b| compare_bundles(a, b, filter.sort_by, filter.sort_dir));

        let total = bundles.len() as i64;
        let items = bundles
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }

    async fn summarize_bundles(&self, filter: &BundleFilter) -> AppResult<Vec<StatusSummary>> {
        let state = self.state.lock().await;
        let bundles = state.filtered_bundles(filter);

        let summaries = BundleStatus::all()
            .into_iter()
            .filter_map(|status| {
                let group: Vec<&&Bundle> = bundles.iter().filter(|b| b.status == status).collect();
                if group.is_empty() {
                    return None;
                }
                Some(StatusSummary {
                    status,
                    bundle_count: group.len() as i64,
                    total_amount: group.iter().map(|b| b.totals.total_amount).sum(),
                    total_tax_amount: group.iter().map(|b| b.totals.total_tax_amount).sum(),
                    total_amount_with_tax: group
                        .iter()
                        .map(|b| b.totals.total_amount_with_tax)
                        .sum(),
                })
            })
            .collect();

        Ok(summaries)
    }

    async fn list_waiting_orders(
        &self,
        filter: &WaitingOrderFilter,
        pagination: Pagination,
    ) -> AppResult<Page<WaitingOrder>> {
        let state = self.state.lock().await;

        let mut orders: Vec<WaitingOrder> = state
            .orders
            .values()
            .filter(|o| o.side == filter.side && o.completed && o.bundle_id.is_none())
            .map(|o| {
                let company = state.companies.get(&o.counterparty_id);
                WaitingOrder {
                    order_id: o.order_id,
                    side: o.side,
                    counterparty_id: o.counterparty_id,
                    counterparty_name: company.map(|c| c.name.clone()).unwrap_or_default(),
                    business_number: company.and_then(|c| c.business_number.clone()),
                    amount: o.amount,
                    departure_date: o.departure_date,
                    arrival_date: o.arrival_date,
                    created_at: o.created_at,
                }
            })
            .filter(|o| order_matches(o, filter))
            .collect();

        orders.sort_by(|a, b| compare_orders(a, b, filter.sort_by, filter.sort_dir));

        let total = orders.len() as i64;
        let items = orders
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect();

        Ok(Page {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl SettlementTx for MemoryTx {
    async fn lock_orders(&mut self, side: Side, order_ids: &[Uuid]) -> AppResult<Vec<LedgerOrder>> {
        Ok(order_ids
            .iter()
            .filter_map(|id| self.working.orders.get(&(side, *id)))
            .filter(|o| o.completed)
            .map(|o| LedgerOrder {
                order_id: o.order_id,
                counterparty_id: o.counterparty_id,
                amount: o.amount,
                bundle_id: o.bundle_id,
            })
            .collect())
    }

    async fn mark_orders_settled(
        &mut self,
        side: Side,
        order_ids: &[Uuid],
        bundle_id: Uuid,
    ) -> AppResult<u64> {
        let mut marked = 0;
        for id in order_ids {
            if let Some(order) = self.working.orders.get_mut(&(side, *id)) {
                if order.bundle_id.is_none() {
                    order.bundle_id = Some(bundle_id);
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    async fn release_orders(&mut self, side: Side, bundle_id: Uuid) -> AppResult<u64> {
        let mut released = 0;
        for order in self.working.orders.values_mut() {
            if order.side == side && order.bundle_id == Some(bundle_id) {
                order.bundle_id = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn insert_bundle(&mut self, bundle: &Bundle) -> AppResult<()> {
        if self.working.bundles.contains_key(&bundle.id) {
            return Err(AppError::Conflict(format!("Bundle {} already exists", bundle.id)));
        }
        if self.working.invoice_taken(bundle.id, bundle.invoice_no.as_deref()) {
            return Err(AppError::Conflict("Invoice number already in use".to_string()));
        }
        self.working.bundles.insert(bundle.id, bundle.clone());
        Ok(())
    }

    async fn lock_bundle(&mut self, bundle_id: Uuid) -> AppResult<Option<Bundle>> {
        Ok(self.working.bundles.get(&bundle_id).cloned())
    }

    async fn save_bundle(&mut self, bundle: &Bundle, actor: &Actor) -> AppResult<i32> {
        if self.working.invoice_taken(bundle.id, bundle.invoice_no.as_deref()) {
            return Err(AppError::Conflict("Invoice number already in use".to_string()));
        }

        let stored = self
            .working
            .bundles
            .get_mut(&bundle.id)
            .ok_or_else(|| AppError::NotFound(format!("Bundle {} not found", bundle.id)))?;

        if stored.version != bundle.version {
            return Err(AppError::Conflict(format!(
                "Bundle {} was modified concurrently (version {} != {})",
                bundle.id, stored.version, bundle.version
            )));
        }

        let mut next = bundle.clone();
        next.version = bundle.version + 1;
        next.updated_by = Some(actor.id);
        *stored = next;

        Ok(bundle.version + 1)
    }

    async fn insert_item(&mut self, item: &BundleItem) -> AppResult<()> {
        if !self.working.bundles.contains_key(&item.bundle_id) {
            return Err(AppError::NotFound(format!("Bundle {} not found", item.bundle_id)));
        }
        let taken = self
            .working
            .items
            .iter()
            .any(|i| !i.released && i.side == item.side && i.order_id == item.order_id);
        if taken {
            return Err(AppError::Conflict(format!(
                "Order {} is already settled in another bundle",
                item.order_id
            )));
        }
        self.working.items.push(item.clone());
        Ok(())
    }

    async fn load_items(&mut self, bundle_id: Uuid) -> AppResult<Vec<BundleItem>> {
        Ok(self
            .working
            .items
            .iter()
            .filter(|i| i.bundle_id == bundle_id)
            .cloned()
            .collect())
    }

    async fn release_items(&mut self, bundle_id: Uuid) -> AppResult<u64> {
        let mut released = 0;
        for item in self.working.items.iter_mut() {
            if item.bundle_id == bundle_id && !item.released {
                item.released = true;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn load_bundle_adjustments(&mut self, bundle_id: Uuid) -> AppResult<Vec<BundleAdjustment>> {
        Ok(self
            .working
            .bundle_adjustments
            .iter()
            .filter(|a| a.bundle_id == bundle_id)
            .cloned()
            .collect())
    }

    async fn insert_bundle_adjustment(&mut self, adjustment: &BundleAdjustment) -> AppResult<()> {
        if !self.working.bundles.contains_key(&adjustment.bundle_id) {
            return Err(AppError::NotFound(format!(
                "Bundle {} not found",
                adjustment.bundle_id
            )));
        }
        self.working.bundle_adjustments.push(adjustment.clone());
        Ok(())
    }

    async fn update_bundle_adjustment(&mut self, adjustment: &BundleAdjustment) -> AppResult<bool> {
        match self
            .working
            .bundle_adjustments
            .iter_mut()
            .find(|a| a.id == adjustment.id && a.bundle_id == adjustment.bundle_id)
        {
            Some(stored) => {
                *stored = adjustment.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_bundle_adjustment(&mut self, bundle_id: Uuid, adjustment_id: Uuid) -> AppResult<bool> {
        let before = self.working.bundle_adjustments.len();
        self.working
            .bundle_adjustments
            .retain(|a| !(a.id == adjustment_id && a.bundle_id == bundle_id));
        Ok(self.working.bundle_adjustments.len() < before)
    }

    async fn load_item_adjustments(&mut self, bundle_id: Uuid) -> AppResult<Vec<ItemAdjustment>> {
        Ok(self
            .working
            .item_adjustments
            .iter()
            .filter(|a| a.bundle_id == bundle_id)
            .cloned()
            .collect())
    }

    async fn insert_item_adjustment(&mut self, adjustment: &ItemAdjustment) -> AppResult<()> {
        let parent_exists = self
            .working
            .items
            .iter()
            .any(|i| i.id == adjustment.bundle_item_id && i.bundle_id == adjustment.bundle_id);
        if !parent_exists {
            return Err(AppError::NotFound(format!(
                "Bundle item {} not found",
                adjustment.bundle_item_id
            )));
        }
        self.working.item_adjustments.push(adjustment.clone());
        Ok(())
    }

    async fn update_item_adjustment(&mut self, adjustment: &ItemAdjustment) -> AppResult<bool> {
        match self
            .working
            .item_adjustments
            .iter_mut()
            .find(|a| a.id == adjustment.id && a.bundle_item_id == adjustment.bundle_item_id)
        {
            Some(stored) => {
                *stored = adjustment.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_item_adjustment(&mut self, bundle_item_id: Uuid, adjustment_id: Uuid) -> AppResult<bool> {
        let before = self.working.item_adjustments.len();
        self.working
            .item_adjustments
            .retain(|a| !(a.id == adjustment_id && a.bundle_item_id == bundle_item_id));
        Ok(self.working.item_adjustments.len() < before)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

// ========== FILTERING ==========

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

fn date_in_range(date: Option<NaiveDate>, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    if from.is_none() && to.is_none() {
        return true;
    }
    match date {
        Some(d) => from.map_or(true, |f| d >= f) && to.map_or(true, |t| d <= t),
        None => false,
    }
}

fn bundle_matches(bundle: &Bundle, filter: &BundleFilter) -> bool {
    if filter.side.map_or(false, |side| bundle.side != side) {
        return false;
    }
    if filter.status.map_or(false, |status| bundle.status != status) {
        return false;
    }
    if filter.counterparty_id.map_or(false, |id| bundle.counterparty_id != id) {
        return false;
    }
    if filter.manager_id.map_or(false, |id| bundle.manager_id != id) {
        return false;
    }
    if let Some(name) = &filter.counterparty_name {
        if !contains_ci(Some(&bundle.counterparty.name), name) {
            return false;
        }
    }
    if let Some(number) = &filter.business_number {
        if !contains_ci(bundle.counterparty.business_number.as_deref(), number) {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        let hit = contains_ci(Some(&bundle.counterparty.name), search)
            || contains_ci(bundle.counterparty.business_number.as_deref(), search)
            || contains_ci(bundle.invoice_no.as_deref(), search);
        if !hit {
            return false;
        }
    }

    match filter.date_field {
        BundleDateField::Period => {
            filter.date_from.map_or(true, |from| bundle.period_to >= from)
                && filter.date_to.map_or(true, |to| bundle.period_from <= to)
        }
        BundleDateField::CreatedAt => date_in_range(
            Some(bundle.created_at.date_naive()),
            filter.date_from,
            filter.date_to,
        ),
        BundleDateField::InvoiceIssuedAt => date_in_range(
            bundle.invoice_issued_at.map(|at| at.date_naive()),
            filter.date_from,
            filter.date_to,
        ),
    }
}

fn order_matches(order: &WaitingOrder, filter: &WaitingOrderFilter) -> bool {
    if filter.counterparty_id.map_or(false, |id| order.counterparty_id != id) {
        return false;
    }
    if let Some(name) = &filter.counterparty_name {
        if !contains_ci(Some(&order.counterparty_name), name) {
            return false;
        }
    }
    if let Some(number) = &filter.business_number {
        if !contains_ci(order.business_number.as_deref(), number) {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        let hit = contains_ci(Some(&order.counterparty_name), search)
            || contains_ci(order.business_number.as_deref(), search);
        if !hit {
            return false;
        }
    }

    let date = match filter.date_field {
        OrderDateField::DepartureDate => order.departure_date,
        OrderDateField::ArrivalDate => order.arrival_date,
        OrderDateField::CreatedAt => Some(order.created_at.date_naive()),
    };
    date_in_range(date, filter.date_from, filter.date_to)
}

// ========== SORTING ==========

/// Orders like `ORDER BY x <dir> NULLS LAST`
fn cmp_nulls_last<T: Ord>(a: Option<T>, b: Option<T>, dir: SortDirection) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match dir {
            SortDirection::Asc => a.cmp(&b),
            SortDirection::Desc => b.cmp(&a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_bundles(a: &Bundle, b: &Bundle, field: BundleSortField, dir: SortDirection) -> Ordering {
    let primary = match field {
        BundleSortField::CreatedAt => cmp_nulls_last(Some(a.created_at), Some(b.created_at), dir),
        BundleSortField::PeriodFrom => cmp_nulls_last(Some(a.period_from), Some(b.period_from), dir),
        BundleSortField::PeriodTo => cmp_nulls_last(Some(a.period_to), Some(b.period_to), dir),
        BundleSortField::TotalAmountWithTax => cmp_nulls_last(
            Some(a.totals.total_amount_with_tax),
            Some(b.totals.total_amount_with_tax),
            dir,
        ),
        BundleSortField::CounterpartyName => cmp_nulls_last(
            Some(&a.counterparty.name),
            Some(&b.counterparty.name),
            dir,
        ),
        BundleSortField::InvoiceIssuedAt => {
            cmp_nulls_last(a.invoice_issued_at, b.invoice_issued_at, dir)
        }
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

fn compare_orders(a: &WaitingOrder, b: &WaitingOrder, field: OrderSortField, dir: SortDirection) -> Ordering {
    let primary = match field {
        OrderSortField::CreatedAt => cmp_nulls_last(Some(a.created_at), Some(b.created_at), dir),
        OrderSortField::DepartureDate => cmp_nulls_last(a.departure_date, b.departure_date, dir),
        OrderSortField::ArrivalDate => cmp_nulls_last(a.arrival_date, b.arrival_date, dir),
        OrderSortField::Amount => cmp_nulls_last(Some(a.amount), Some(b.amount), dir),
        OrderSortField::CounterpartyName => cmp_nulls_last(
            Some(&a.counterparty_name),
            Some(&b.counterparty_name),
            dir,
        ),
    };
    primary.then_with(|| a.order_id.cmp(&b.order_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::testing::sample_bundle;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_dropped_transaction_leaves_no_trace() {
        let store = MemorySettlementStore::new();
        let bundle = sample_bundle(Uuid::new_v4());

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_bundle(&bundle).await.unwrap();
            // dropped without commit
        }
        assert_eq!(store.row_counts().await.0, 0);

        let mut tx = store.begin().await.unwrap();
        tx.insert_bundle(&bundle).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.row_counts().await.0, 1);
    }

    #[tokio::test]
    async fn test_active_order_cannot_be_itemized_twice() {
        let store = MemorySettlementStore::new();
        let first = sample_bundle(Uuid::new_v4());
        let second = sample_bundle(Uuid::new_v4());
        let order_id = Uuid::new_v4();
        let item = |bundle_id| BundleItem {
            id: Uuid::new_v4(),
            bundle_id,
            side: Side::Sales,
            order_id,
            base_amount: dec!(100),
            released: false,
            created_at: Utc::now(),
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_bundle(&first).await.unwrap();
        tx.insert_bundle(&second).await.unwrap();
        tx.insert_item(&item(first.id)).await.unwrap();

        let err = tx.insert_item(&item(second.id)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // once released the order may be itemized again
        tx.release_items(first.id).await.unwrap();
        tx.insert_item(&item(second.id)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = MemorySettlementStore::new();
        let bundle = sample_bundle(Uuid::new_v4());
        let actor = Actor::new(Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        tx.insert_bundle(&bundle).await.unwrap();
        let version = tx.save_bundle(&bundle, &actor).await.unwrap();
        assert_eq!(version, bundle.version + 1);

        // still carrying the old version
        let err = tx.save_bundle(&bundle, &actor).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_nulls_sort_last_in_both_directions() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 1);
        let b = NaiveDate::from_ymd_opt(2024, 2, 1);

        assert_eq!(cmp_nulls_last(a, b, SortDirection::Asc), Ordering::Less);
        assert_eq!(cmp_nulls_last(a, b, SortDirection::Desc), Ordering::Greater);
        assert_eq!(cmp_nulls_last(None, b, SortDirection::Asc), Ordering::Greater);
        assert_eq!(cmp_nulls_last(None, b, SortDirection::Desc), Ordering::Greater);
    }

    #[test]
    fn test_seed_file_format() {
        let raw = r#"{
            "companies": [{"id": "7d0c3f8e-3a53-4a0c-9f4e-2b1b7f9a0c11", "name": "Hanbit Logistics"}],
            "orders": [{
                "order_id": "0b6f2d4e-7b0e-4f61-8f54-0f4a3b2c1d00",
                "side": "sales",
                "counterparty_id": "7d0c3f8e-3a53-4a0c-9f4e-2b1b7f9a0c11",
                "amount": "150000"
            }]
        }"#;

        let seed: LedgerSeed = serde_json::from_str(raw).unwrap();
        assert_eq!(seed.companies.len(), 1);
        assert!(seed.managers.is_empty());
        assert!(seed.orders[0].completed);
        assert_eq!(seed.orders[0].amount, dec!(150000));
        assert!(seed.orders[0].bundle_id.is_none());
    }
}
