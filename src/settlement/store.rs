use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use super::models::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleSortField {
    #[default]
    CreatedAt,
    PeriodFrom,
    PeriodTo,
    TotalAmountWithTax,
    CounterpartyName,
    InvoiceIssuedAt,
}

/// Which bundle date a date-range filter applies to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleDateField {
    /// Matches bundles whose period overlaps the range
    #[default]
    Period,
    CreatedAt,
    InvoiceIssuedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSortField {
    #[default]
    CreatedAt,
    DepartureDate,
    ArrivalDate,
    Amount,
    CounterpartyName,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDateField {
    #[default]
    DepartureDate,
    ArrivalDate,
    CreatedAt,
}

/// Offset pagination, 1-based pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Counted with the same predicate as the page; may drift under concurrent writes
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleFilter {
    pub side: Option<Side>,
    pub counterparty_id: Option<Uuid>,
    pub counterparty_name: Option<String>,
    pub business_number: Option<String>,
    pub status: Option<BundleStatus>,
    pub manager_id: Option<Uuid>,
    pub date_field: BundleDateField,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Free text over counterparty name, business number and invoice number
    pub search: Option<String>,
    pub sort_by: BundleSortField,
    pub sort_dir: SortDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingOrderFilter {
    pub side: Side,
    #[serde(default)]
    pub counterparty_id: Option<Uuid>,
    #[serde(default)]
    pub counterparty_name: Option<String>,
    #[serde(default)]
    pub business_number: Option<String>,
    #[serde(default)]
    pub date_field: OrderDateField,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: OrderSortField,
    #[serde(default)]
    pub sort_dir: SortDirection,
}

impl WaitingOrderFilter {
    pub fn for_side(side: Side) -> Self {
        Self {
            side,
            counterparty_id: None,
            counterparty_name: None,
            business_number: None,
            date_field: OrderDateField::default(),
            date_from: None,
            date_to: None,
            search: None,
            sort_by: OrderSortField::default(),
            sort_dir: SortDirection::default(),
        }
    }
}

/// Read side of the bundle repository plus the directories it snapshots from.
///
/// Writes only happen through a [`SettlementTx`] obtained from [`SettlementStore::begin`].
#[async_trait]
pub trait SettlementStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn begin(&self) -> AppResult<Box<dyn SettlementTx>>;

    async fn find_counterparty(&self, company_id: Uuid) -> AppResult<Option<CounterpartyProfile>>;

    async fn find_manager(&self, user_id: Uuid) -> AppResult<Option<ManagerSnapshot>>;

    async fn get_bundle(&self, bundle_id: Uuid) -> AppResult<Option<BundleDetail>>;

    async fn list_bundles(
        &self,
        filter: &BundleFilter,
        pagination: Pagination,
    ) -> AppResult<Page<Bundle>>;

    async fn summarize_bundles(&self, filter: &BundleFilter) -> AppResult<Vec<StatusSummary>>;

    async fn list_waiting_orders(
        &self,
        filter: &WaitingOrderFilter,
        pagination: Pagination,
    ) -> AppResult<Page<WaitingOrder>>;

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// One unit of work. Dropping it without calling `commit` rolls everything back.
#[async_trait]
pub trait SettlementTx: Send {
    // ========== ORDER LEDGER ==========

    /// Lock the ledger charges for `order_ids` on `side`; only completed orders are returned
    async fn lock_orders(&mut self, side: Side, order_ids: &[Uuid]) -> AppResult<Vec<LedgerOrder>>;

    /// Flag charges as consumed by `bundle_id`; returns how many were still unsettled
    async fn mark_orders_settled(
        &mut self,
        side: Side,
        order_ids: &[Uuid],
        bundle_id: Uuid,
    ) -> AppResult<u64>;

    /// Return every charge consumed by `bundle_id` to the waiting pool
    async fn release_orders(&mut self, side: Side, bundle_id: Uuid) -> AppResult<u64>;

    // ========== BUNDLES ==========

    async fn insert_bundle(&mut self, bundle: &Bundle) -> AppResult<()>;

    /// Row-lock the bundle for the rest of the transaction
    async fn lock_bundle(&mut self, bundle_id: Uuid) -> AppResult<Option<Bundle>>;

    /// Persist header, totals and status. Fails with `Conflict` unless the stored
    /// version still equals `bundle.version`; returns the new version.
    async fn save_bundle(&mut self, bundle: &Bundle, actor: &Actor) -> AppResult<i32>;

    // ========== ITEMS ==========

    /// Fails with `Conflict` if the order already sits in another active bundle
    async fn insert_item(&mut self, item: &BundleItem) -> AppResult<()>;

    async fn load_items(&mut self, bundle_id: Uuid) -> AppResult<Vec<BundleItem>>;

    async fn release_items(&mut self, bundle_id: Uuid) -> AppResult<u64>;

    // ========== ADJUSTMENTS ==========

    async fn load_bundle_adjustments(&mut self, bundle_id: Uuid) -> AppResult<Vec<BundleAdjustment>>;

    async fn insert_bundle_adjustment(&mut self, adjustment: &BundleAdjustment) -> AppResult<()>;

    async fn update_bundle_adjustment(&mut self, adjustment: &BundleAdjustment) -> AppResult<bool>;

    async fn delete_bundle_adjustment(&mut self, bundle_id: Uuid, adjustment_id: Uuid) -> AppResult<bool>;

    async fn load_item_adjustments(&mut self, bundle_id: Uuid) -> AppResult<Vec<ItemAdjustment>>;

    async fn insert_item_adjustment(&mut self, adjustment: &ItemAdjustment) -> AppResult<()>;

    async fn update_item_adjustment(&mut self, adjustment: &ItemAdjustment) -> AppResult<bool>;

    async fn delete_item_adjustment(&mut self, bundle_item_id: Uuid, adjustment_id: Uuid) -> AppResult<bool>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
