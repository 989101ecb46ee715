use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Which side of the brokerage a bundle settles.
/// Sales bundles bill shippers, purchase bundles pay carriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "settlement_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Sales,
    Purchase,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Sales => "sales",
            Side::Purchase => "purchase",
        }
    }

    /// One-letter code used in generated invoice numbers
    pub fn code(&self) -> char {
        match self {
            Side::Sales => 'S',
            Side::Purchase => 'P',
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bundle lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "settlement_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    Draft,
    Issued,
    Paid,
    Canceled,
}

impl BundleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStatus::Draft => "draft",
            BundleStatus::Issued => "issued",
            BundleStatus::Paid => "paid",
            BundleStatus::Canceled => "canceled",
        }
    }

    pub fn all() -> [BundleStatus; 4] {
        [
            BundleStatus::Draft,
            BundleStatus::Issued,
            BundleStatus::Paid,
            BundleStatus::Canceled,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BundleStatus::Paid | BundleStatus::Canceled)
    }

    /// Amounts, items and adjustments may only change while draft or issued
    pub fn allows_financial_edits(&self) -> bool {
        matches!(self, BundleStatus::Draft | BundleStatus::Issued)
    }
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which order date the settlement period refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "settlement_period_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Departure,
    Arrival,
    Etc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "adjustment_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentType {
    Surcharge,
    Discount,
}

impl AdjustmentType {
    /// Applies the sign carried by the type to a stored magnitude
    pub fn signed(&self, magnitude: Decimal) -> Decimal {
        match self {
            AdjustmentType::Surcharge => magnitude,
            AdjustmentType::Discount => -magnitude,
        }
    }
}

/// Audit context supplied by the caller. The engine never authenticates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub access_level: Option<String>,
}

impl Actor {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            name: None,
            email: None,
            access_level: None,
        }
    }
}

/// Counterparty data frozen onto the bundle at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanySnapshot {
    pub name: String,
    pub business_number: Option<String>,
    pub ceo_name: Option<String>,
}

/// Manager data frozen onto the bundle at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub method: Option<String>,
    pub bank_code: Option<String>,
    pub bank_account: Option<String>,
    pub bank_holder: Option<String>,
}

impl PaymentInfo {
    pub fn is_empty(&self) -> bool {
        self.method.is_none()
            && self.bank_code.is_none()
            && self.bank_account.is_none()
            && self.bank_holder.is_none()
    }
}

/// What the company directory hands out for snapshotting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartyProfile {
    pub snapshot: CompanySnapshot,
    /// Registered bank details, used when a bundle request carries none
    pub payment: PaymentInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub total_amount: Decimal,
    pub total_tax_amount: Decimal,
    pub total_amount_with_tax: Decimal,
}

/// Bundle entity - the settlement unit for one counterparty over one period
///
/// INVARIANT: totals.total_amount_with_tax == total_amount + total_tax_amount
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub id: Uuid,
    pub side: Side,

    pub counterparty_id: Uuid,
    pub counterparty: CompanySnapshot,
    pub manager_id: Uuid,
    pub manager: ManagerSnapshot,
    pub payment: PaymentInfo,

    pub period_type: PeriodType,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,

    pub status: BundleStatus,
    /// Frozen at creation; zero for tax-exempt bundles
    pub tax_rate: Decimal,
    #[serde(flatten)]
    pub totals: Totals,

    pub invoice_no: Option<String>,
    pub invoice_issued_at: Option<DateTime<Utc>>,
    pub deposit_received_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub memo: Option<String>,
    pub order_count: i32,

    /// Bumped on every write, used for optimistic checks
    pub version: i32,
    pub created_by: Uuid,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One consumed order inside a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BundleItem {
    pub id: Uuid,
    pub bundle_id: Uuid,
    pub side: Side,
    pub order_id: Uuid,
    pub base_amount: Decimal,
    /// Set when the parent bundle is canceled and the order went back to the pool
    pub released: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BundleAdjustment {
    pub id: Uuid,
    pub bundle_id: Uuid,
    #[serde(rename = "type")]
    pub kind: AdjustmentType,
    pub description: Option<String>,
    pub amount: Decimal,
    pub tax_amount: Decimal,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ItemAdjustment {
    pub id: Uuid,
    pub bundle_item_id: Uuid,
    pub bundle_id: Uuid,
    #[serde(rename = "type")]
    pub kind: AdjustmentType,
    pub description: Option<String>,
    pub amount: Decimal,
    pub tax_amount: Decimal,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleItemDetail {
    #[serde(flatten)]
    pub item: BundleItem,
    pub adjustments: Vec<ItemAdjustment>,
}

/// Bundle with everything hanging off it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleDetail {
    #[serde(flatten)]
    pub bundle: Bundle,
    pub items: Vec<BundleItemDetail>,
    pub adjustments: Vec<BundleAdjustment>,
}

impl BundleDetail {
    pub fn assemble(
        bundle: Bundle,
        items: Vec<BundleItem>,
        mut item_adjustments: Vec<ItemAdjustment>,
        adjustments: Vec<BundleAdjustment>,
    ) -> Self {
        let items = items
            .into_iter()
            .map(|item| {
                let (mine, rest): (Vec<_>, Vec<_>) = item_adjustments
                    .drain(..)
                    .partition(|adj| adj.bundle_item_id == item.id);
                item_adjustments = rest;
                BundleItemDetail {
                    item,
                    adjustments: mine,
                }
            })
            .collect();

        Self {
            bundle,
            items,
            adjustments,
        }
    }
}

/// One order charge as the Order Ledger exposes it to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LedgerOrder {
    pub order_id: Uuid,
    pub counterparty_id: Uuid,
    pub amount: Decimal,
    /// Bundle that consumed this charge, if any
    pub bundle_id: Option<Uuid>,
}

/// Row of the "waiting" pool: completed orders not yet settled on a side
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WaitingOrder {
    pub order_id: Uuid,
    pub side: Side,
    pub counterparty_id: Uuid,
    pub counterparty_name: String,
    pub business_number: Option<String>,
    pub amount: Decimal,
    pub departure_date: Option<NaiveDate>,
    pub arrival_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Per-status aggregate used by reporting
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StatusSummary {
    pub status: BundleStatus,
    pub bundle_count: i64,
    pub total_amount: Decimal,
    pub total_tax_amount: Decimal,
    pub total_amount_with_tax: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_adjustment_sign_comes_from_type() {
        assert_eq!(AdjustmentType::Surcharge.signed(dec!(50)), dec!(50));
        assert_eq!(AdjustmentType::Discount.signed(dec!(50)), dec!(-50));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!BundleStatus::Draft.is_terminal());
        assert!(!BundleStatus::Issued.is_terminal());
        assert!(BundleStatus::Paid.is_terminal());
        assert!(BundleStatus::Canceled.is_terminal());

        assert!(BundleStatus::Issued.allows_financial_edits());
        assert!(!BundleStatus::Paid.allows_financial_edits());
    }

    #[test]
    fn test_detail_groups_item_adjustments() {
        let bundle_id = Uuid::new_v4();
        let now = Utc::now();
        let item = |id: Uuid| BundleItem {
            id,
            bundle_id,
            side: Side::Sales,
            order_id: Uuid::new_v4(),
            base_amount: dec!(100),
            released: false,
            created_at: now,
        };
        let adj = |item_id: Uuid| ItemAdjustment {
            id: Uuid::new_v4(),
            bundle_item_id: item_id,
            bundle_id,
            kind: AdjustmentType::Surcharge,
            description: None,
            amount: dec!(10),
            tax_amount: dec!(1),
            created_by: Uuid::nil(),
            created_at: now,
            updated_by: None,
            updated_at: now,
        };

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let items = vec![item(a), item(b)];
        let adjustments = vec![adj(b), adj(a), adj(b)];

        let detail_items = BundleDetail::assemble(
            crate::settlement::testing::sample_bundle(bundle_id),
            items,
            adjustments,
            vec![],
        )
        .items;

        assert_eq!(detail_items[0].adjustments.len(), 1);
        assert_eq!(detail_items[1].adjustments.len(), 2);
    }

    #[test]
    fn test_side_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Purchase).unwrap(), "\"purchase\"");
        let status: BundleStatus = serde_json::from_str("\"canceled\"").unwrap();
        assert_eq!(status, BundleStatus::Canceled);
    }
}
