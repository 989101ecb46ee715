use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{prelude::FromRow, PgConnection, PgPool, Postgres, QueryBuilder, Transaction};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use super::models::*;
use super::store::*;

const BUNDLE_COLUMNS: &str = r#"
    id, side,
    counterparty_id, counterparty_name, counterparty_business_number, counterparty_ceo_name,
    manager_id, manager_name, manager_email, manager_phone,
    payment_method, bank_code, bank_account, bank_holder,
    period_type, period_from, period_to,
    status, tax_rate, total_amount, total_tax_amount, total_amount_with_tax,
    invoice_no, invoice_issued_at, deposit_received_at, settled_at, canceled_at,
    memo, order_count, version, created_by, updated_by, created_at, updated_at
"#;

const ITEM_COLUMNS: &str = "id, bundle_id, side, order_id, base_amount, released, created_at";

const ADJUSTMENT_COLUMNS: &str = r#"
    id, bundle_id, kind, description, amount, tax_amount,
    created_by, created_at, updated_by, updated_at
"#;

const ITEM_ADJUSTMENT_COLUMNS: &str = r#"
    id, bundle_item_id, bundle_id, kind, description, amount, tax_amount,
    created_by, created_at, updated_by, updated_at
"#;

/// Order Ledger charge table for a side
fn ledger_table(side: Side) -> &'static str {
    match side {
        Side::Sales => "order_sales",
        Side::Purchase => "order_purchases",
    }
}

/// Flat row of `settlement_bundles`; snapshots are stored column by column
#[derive(Debug, FromRow)]
struct BundleRow {
    id: Uuid,
    side: Side,
    counterparty_id: Uuid,
    counterparty_name: String,
    counterparty_business_number: Option<String>,
    counterparty_ceo_name: Option<String>,
    manager_id: Uuid,
    manager_name: String,
    manager_email: Option<String>,
    manager_phone: Option<String>,
    payment_method: Option<String>,
    bank_code: Option<String>,
    bank_account: Option<String>,
    bank_holder: Option<String>,
    period_type: PeriodType,
    period_from: NaiveDate,
    period_to: NaiveDate,
    status: BundleStatus,
    tax_rate: Decimal,
    total_amount: Decimal,
    total_tax_amount: Decimal,
    total_amount_with_tax: Decimal,
    invoice_no: Option<String>,
    invoice_issued_at: Option<DateTime<Utc>>,
    deposit_received_at: Option<DateTime<Utc>>,
    settled_at: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,
    memo: Option<String>,
    order_count: i32,
    version: i32,
    created_by: Uuid,
    updated_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BundleRow> for Bundle {
    fn from(row: BundleRow) -> Self {
        Bundle {
            id: row.id,
            side: row.side,
            counterparty_id: row.counterparty_id,
            counterparty: CompanySnapshot {
                name: row.counterparty_name,
                business_number: row.counterparty_business_number,
                ceo_name: row.counterparty_ceo_name,
            },
            manager_id: row.manager_id,
            manager: ManagerSnapshot {
                name: row.manager_name,
                email: row.manager_email,
                phone: row.manager_phone,
            },
            payment: PaymentInfo {
                method: row.payment_method,
                bank_code: row.bank_code,
                bank_account: row.bank_account,
                bank_holder: row.bank_holder,
            },
            period_type: row.period_type,
            period_from: row.period_from,
            period_to: row.period_to,
            status: row.status,
            tax_rate: row.tax_rate,
            totals: Totals {
                total_amount: row.total_amount,
                total_tax_amount: row.total_tax_amount,
                total_amount_with_tax: row.total_amount_with_tax,
            },
            invoice_no: row.invoice_no,
            invoice_issued_at: row.invoice_issued_at,
            deposit_received_at: row.deposit_received_at,
            settled_at: row.settled_at,
            canceled_at: row.canceled_at,
            memo: row.memo,
            order_count: row.order_count,
            version: row.version,
            created_by: row.created_by,
            updated_by: row.updated_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CompanyRow {
    name: String,
    business_number: Option<String>,
    ceo_name: Option<String>,
    payment_method: Option<String>,
    bank_code: Option<String>,
    bank_account: Option<String>,
    bank_holder: Option<String>,
}

/// Postgres-backed bundle repository and Order Ledger adapter
pub struct PgSettlementStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgSettlementStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ========== SHARED ROW LOADERS ==========

async fn fetch_bundle(conn: &mut PgConnection, bundle_id: Uuid, lock: bool) -> AppResult<Option<Bundle>> {
    let sql = format!(
        "SELECT {} FROM settlement_bundles WHERE id = $1{}",
        BUNDLE_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, BundleRow>(&sql)
        .bind(bundle_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(Bundle::from))
}

async fn fetch_items(conn: &mut PgConnection, bundle_id: Uuid) -> AppResult<Vec<BundleItem>> {
    let sql = format!(
        "SELECT {} FROM settlement_bundle_items WHERE bundle_id = $1 ORDER BY seq",
        ITEM_COLUMNS
    );
    Ok(sqlx::query_as::<_, BundleItem>(&sql)
        .bind(bundle_id)
        .fetch_all(conn)
        .await?)
}

async fn fetch_bundle_adjustments(conn: &mut PgConnection, bundle_id: Uuid) -> AppResult<Vec<BundleAdjustment>> {
    let sql = format!(
        "SELECT {} FROM settlement_bundle_adjustments WHERE bundle_id = $1 ORDER BY seq",
        ADJUSTMENT_COLUMNS
    );
    Ok(sqlx::query_as::<_, BundleAdjustment>(&sql)
        .bind(bundle_id)
        .fetch_all(conn)
        .await?)
}

async fn fetch_item_adjustments(conn: &mut PgConnection, bundle_id: Uuid) -> AppResult<Vec<ItemAdjustment>> {
    let sql = format!(
        "SELECT {} FROM settlement_item_adjustments WHERE bundle_id = $1 ORDER BY seq",
        ITEM_ADJUSTMENT_COLUMNS
    );
    Ok(sqlx::query_as::<_, ItemAdjustment>(&sql)
        .bind(bundle_id)
        .fetch_all(conn)
        .await?)
}

// ========== FILTER PREDICATES ==========

fn like(value: &str) -> String {
    format!("%{}%", value)
}

fn push_bundle_predicates(qb: &mut QueryBuilder<'_, Postgres>, filter: &BundleFilter) {
    qb.push(" WHERE 1=1");

    if let Some(side) = filter.side {
        qb.push(" AND side = ").push_bind(side);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(counterparty_id) = filter.counterparty_id {
        qb.push(" AND counterparty_id = ").push_bind(counterparty_id);
    }
    if let Some(manager_id) = filter.manager_id {
        qb.push(" AND manager_id = ").push_bind(manager_id);
    }
    if let Some(name) = &filter.counterparty_name {
        qb.push(" AND counterparty_name ILIKE ").push_bind(like(name));
    }
    if let Some(number) = &filter.business_number {
        qb.push(" AND counterparty_business_number ILIKE ").push_bind(like(number));
    }
    if let Some(search) = &filter.search {
        let pattern = like(search);
        qb.push(" AND (counterparty_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR counterparty_business_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR invoice_no ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    match filter.date_field {
        BundleDateField::Period => {
            if let Some(from) = filter.date_from {
                qb.push(" AND period_to >= ").push_bind(from);
            }
            if let Some(to) = filter.date_to {
                qb.push(" AND period_from <= ").push_bind(to);
            }
        }
        BundleDateField::CreatedAt => push_date_range(qb, "created_at::date", filter.date_from, filter.date_to),
        BundleDateField::InvoiceIssuedAt => {
            push_date_range(qb, "invoice_issued_at::date", filter.date_from, filter.date_to)
        }
    }
}

fn push_date_range(
    qb: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) {
    if let Some(from) = from {
        qb.push(format!(" AND {} >= ", column)).push_bind(from);
    }
    if let Some(to) = to {
        qb.push(format!(" AND {} <= ", column)).push_bind(to);
    }
}

fn bundle_sort_column(field: BundleSortField) -> &'static str {
    match field {
        BundleSortField::CreatedAt => "created_at",
        BundleSortField::PeriodFrom => "period_from",
        BundleSortField::PeriodTo => "period_to",
        BundleSortField::TotalAmountWithTax => "total_amount_with_tax",
        BundleSortField::CounterpartyName => "counterparty_name",
        BundleSortField::InvoiceIssuedAt => "invoice_issued_at",
    }
}

/// FROM/WHERE shared by the waiting-order page and its count
fn push_waiting_source(qb: &mut QueryBuilder<'_, Postgres>, filter: &WaitingOrderFilter) {
    qb.push(format!(
        " FROM {} l JOIN orders o ON o.id = l.order_id JOIN companies c ON c.id = l.company_id \
          WHERE o.status = 'completed' AND l.bundle_id IS NULL",
        ledger_table(filter.side)
    ));

    if let Some(counterparty_id) = filter.counterparty_id {
        qb.push(" AND l.company_id = ").push_bind(counterparty_id);
    }
    if let Some(name) = &filter.counterparty_name {
        qb.push(" AND c.name ILIKE ").push_bind(like(name));
    }
    if let Some(number) = &filter.business_number {
        qb.push(" AND c.business_number ILIKE ").push_bind(like(number));
    }
    if let Some(search) = &filter.search {
        let pattern = like(search);
        qb.push(" AND (c.name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.business_number ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    let column = match filter.date_field {
        OrderDateField::DepartureDate => "o.departure_date",
        OrderDateField::ArrivalDate => "o.arrival_date",
        OrderDateField::CreatedAt => "o.created_at::date",
    };
    push_date_range(qb, column, filter.date_from, filter.date_to);
}

fn order_sort_column(field: OrderSortField) -> &'static str {
    match field {
        OrderSortField::CreatedAt => "o.created_at",
        OrderSortField::DepartureDate => "o.departure_date",
        OrderSortField::ArrivalDate => "o.arrival_date",
        OrderSortField::Amount => "l.amount",
        OrderSortField::CounterpartyName => "c.name",
    }
}

#[async_trait]
impl SettlementStore for PgSettlementStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> AppResult<Box<dyn SettlementTx>> {
        let mut tx = self.pool.begin().await?;

        // SET LOCAL does not take bind parameters
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgSettlementTx { tx }))
    }

    async fn find_counterparty(&self, company_id: Uuid) -> AppResult<Option<CounterpartyProfile>> {
        let row = sqlx::query_as::<_, CompanyRow>(
            r#"
            SELECT name, business_number, ceo_name, payment_method, bank_code, bank_account, bank_holder
            FROM companies
            WHERE id = $1
            "#,
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|c| CounterpartyProfile {
            snapshot: CompanySnapshot {
                name: c.name,
                business_number: c.business_number,
                ceo_name: c.ceo_name,
            },
            payment: PaymentInfo {
                method: c.payment_method,
                bank_code: c.bank_code,
                bank_account: c.bank_account,
                bank_holder: c.bank_holder,
            },
        }))
    }

    async fn find_manager(&self, user_id: Uuid) -> AppResult<Option<ManagerSnapshot>> {
        let row = sqlx::query_as::<_, (String, Option<String>, Option<String>)>(
            "SELECT name, email, phone FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(name, email, phone)| ManagerSnapshot { name, email, phone }))
    }

    async fn get_bundle(&self, bundle_id: Uuid) -> AppResult<Option<BundleDetail>> {
        // One snapshot for the header and its children
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let Some(bundle) = fetch_bundle(&mut tx, bundle_id, false).await? else {
            return Ok(None);
        };
        let items = fetch_items(&mut tx, bundle_id).await?;
        let item_adjustments = fetch_item_adjustments(&mut tx, bundle_id).await?;
        let adjustments = fetch_bundle_adjustments(&mut tx, bundle_id).await?;
        tx.commit().await?;

        Ok(Some(BundleDetail::assemble(bundle, items, item_adjustments, adjustments)))
    }

    async fn list_bundles(
        &self,
        filter: &BundleFilter,
        pagination: Pagination,
    ) -> AppResult<Page<Bundle>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM settlement_bundles");
        push_bundle_predicates(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut page = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM settlement_bundles", BUNDLE_COLUMNS));
        push_bundle_predicates(&mut page, filter);
        page.push(format!(
            " ORDER BY {} {} NULLS LAST, id ASC LIMIT ",
            bundle_sort_column(filter.sort_by),
            filter.sort_dir.as_sql()
        ))
        .push_bind(pagination.limit())
        .push(" OFFSET ")
        .push_bind(pagination.offset());

        let rows = page.build_query_as::<BundleRow>().fetch_all(&self.pool).await?;

        Ok(Page {
            items: rows.into_iter().map(Bundle::from).collect(),
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }

    async fn summarize_bundles(&self, filter: &BundleFilter) -> AppResult<Vec<StatusSummary>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT status,
                   COUNT(*) AS bundle_count,
                   COALESCE(SUM(total_amount), 0) AS total_amount,
                   COALESCE(SUM(total_tax_amount), 0) AS total_tax_amount,
                   COALESCE(SUM(total_amount_with_tax), 0) AS total_amount_with_tax
            FROM settlement_bundles
            "#,
        );
        push_bundle_predicates(&mut qb, filter);
        qb.push(" GROUP BY status ORDER BY status");

        Ok(qb.build_query_as::<StatusSummary>().fetch_all(&self.pool).await?)
    }

    async fn list_waiting_orders(
        &self,
        filter: &WaitingOrderFilter,
        pagination: Pagination,
    ) -> AppResult<Page<WaitingOrder>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        push_waiting_source(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut page = QueryBuilder::<Postgres>::new(format!(
            r#"
            SELECT l.order_id, '{}'::settlement_side AS side, l.company_id AS counterparty_id,
                   c.name AS counterparty_name, c.business_number, l.amount,
                   o.departure_date, o.arrival_date, o.created_at
            "#,
            filter.side.as_str()
        ));
        push_waiting_source(&mut page, filter);
        page.push(format!(
            " ORDER BY {} {} NULLS LAST, l.order_id ASC LIMIT ",
            order_sort_column(filter.sort_by),
            filter.sort_dir.as_sql()
        ))
        .push_bind(pagination.limit())
        .push(" OFFSET ")
        .push_bind(pagination.offset());

        let items = page.build_query_as::<WaitingOrder>().fetch_all(&self.pool).await?;

        Ok(Page {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
        })
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Dropping this without `commit` lets sqlx roll the transaction back
pub struct PgSettlementTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SettlementTx for PgSettlementTx {
    async fn lock_orders(&mut self, side: Side, order_ids: &[Uuid]) -> AppResult<Vec<LedgerOrder>> {
        // Fixed lock order so overlapping builds cannot deadlock
        let sql = format!(
            r#"
            SELECT l.order_id, l.company_id AS counterparty_id, l.amount, l.bundle_id
            FROM {} l
            JOIN orders o ON o.id = l.order_id
            WHERE l.order_id = ANY($1) AND o.status = 'completed'
            ORDER BY l.order_id
            FOR UPDATE OF l
            "#,
            ledger_table(side)
        );

        Ok(sqlx::query_as::<_, LedgerOrder>(&sql)
            .bind(order_ids)
            .fetch_all(&mut *self.tx)
            .await?)
    }

    async fn mark_orders_settled(
        &mut self,
        side: Side,
        order_ids: &[Uuid],
        bundle_id: Uuid,
    ) -> AppResult<u64> {
        let sql = format!(
            "UPDATE {} SET bundle_id = $1, settled_at = NOW() WHERE order_id = ANY($2) AND bundle_id IS NULL",
            ledger_table(side)
        );
        let result = sqlx::query(&sql)
            .bind(bundle_id)
            .bind(order_ids)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn release_orders(&mut self, side: Side, bundle_id: Uuid) -> AppResult<u64> {
        let sql = format!(
            "UPDATE {} SET bundle_id = NULL, settled_at = NULL WHERE bundle_id = $1",
            ledger_table(side)
        );
        let result = sqlx::query(&sql)
            .bind(bundle_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_bundle(&mut self, bundle: &Bundle) -> AppResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO settlement_bundles ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34)
            "#,
            BUNDLE_COLUMNS
        ))
        .bind(bundle.id)
        .bind(bundle.side)
        .bind(bundle.counterparty_id)
        .bind(&bundle.counterparty.name)
        .bind(&bundle.counterparty.business_number)
        .bind(&bundle.counterparty.ceo_name)
        .bind(bundle.manager_id)
        .bind(&bundle.manager.name)
        .bind(&bundle.manager.email)
        .bind(&bundle.manager.phone)
        .bind(&bundle.payment.method)
        .bind(&bundle.payment.bank_code)
        .bind(&bundle.payment.bank_account)
        .bind(&bundle.payment.bank_holder)
        .bind(bundle.period_type)
        .bind(bundle.period_from)
        .bind(bundle.period_to)
        .bind(bundle.status)
        .bind(bundle.tax_rate)
        .bind(bundle.totals.total_amount)
        .bind(bundle.totals.total_tax_amount)
        .bind(bundle.totals.total_amount_with_tax)
        .bind(&bundle.invoice_no)
        .bind(bundle.invoice_issued_at)
        .bind(bundle.deposit_received_at)
        .bind(bundle.settled_at)
        .bind(bundle.canceled_at)
        .bind(&bundle.memo)
        .bind(bundle.order_count)
        .bind(bundle.version)
        .bind(bundle.created_by)
        .bind(bundle.updated_by)
        .bind(bundle.created_at)
        .bind(bundle.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_constraint(e, "Invoice number already in use"))?;

        Ok(())
    }

    async fn lock_bundle(&mut self, bundle_id: Uuid) -> AppResult<Option<Bundle>> {
        fetch_bundle(&mut self.tx, bundle_id, true).await
    }

    async fn save_bundle(&mut self, bundle: &Bundle, actor: &Actor) -> AppResult<i32> {
        let version = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE settlement_bundles
            SET manager_id = $3, manager_name = $4, manager_email = $5, manager_phone = $6,
                payment_method = $7, bank_code = $8, bank_account = $9, bank_holder = $10,
                period_type = $11, period_from = $12, period_to = $13,
                status = $14, total_amount = $15, total_tax_amount = $16, total_amount_with_tax = $17,
                invoice_no = $18, invoice_issued_at = $19, deposit_received_at = $20,
                settled_at = $21, canceled_at = $22, memo = $23,
                version = version + 1, updated_by = $24, updated_at = $25
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(bundle.id)
        .bind(bundle.version)
        .bind(bundle.manager_id)
        .bind(&bundle.manager.name)
        .bind(&bundle.manager.email)
        .bind(&bundle.manager.phone)
        .bind(&bundle.payment.method)
        .bind(&bundle.payment.bank_code)
        .bind(&bundle.payment.bank_account)
        .bind(&bundle.payment.bank_holder)
        .bind(bundle.period_type)
        .bind(bundle.period_from)
        .bind(bundle.period_to)
        .bind(bundle.status)
        .bind(bundle.totals.total_amount)
        .bind(bundle.totals.total_tax_amount)
        .bind(bundle.totals.total_amount_with_tax)
        .bind(&bundle.invoice_no)
        .bind(bundle.invoice_issued_at)
        .bind(bundle.deposit_received_at)
        .bind(bundle.settled_at)
        .bind(bundle.canceled_at)
        .bind(&bundle.memo)
        .bind(actor.id)
        .bind(bundle.updated_at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_constraint(e, "Invoice number already in use"))?;

        version.ok_or_else(|| {
            AppError::Conflict(format!(
                "Bundle {} was modified concurrently (expected version {})",
                bundle.id, bundle.version
            ))
        })
    }

    async fn insert_item(&mut self, item: &BundleItem) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO settlement_bundle_items ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            ITEM_COLUMNS
        ))
        .bind(item.id)
        .bind(item.bundle_id)
        .bind(item.side)
        .bind(item.order_id)
        .bind(item.base_amount)
        .bind(item.released)
        .bind(item.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            AppError::from_constraint(
                e,
                format!("Order {} is already settled in another bundle", item.order_id),
            )
        })?;

        Ok(())
    }

    async fn load_items(&mut self, bundle_id: Uuid) -> AppResult<Vec<BundleItem>> {
        fetch_items(&mut self.tx, bundle_id).await
    }

    async fn release_items(&mut self, bundle_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE settlement_bundle_items SET released = TRUE WHERE bundle_id = $1 AND NOT released",
        )
        .bind(bundle_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn load_bundle_adjustments(&mut self, bundle_id: Uuid) -> AppResult<Vec<BundleAdjustment>> {
        fetch_bundle_adjustments(&mut self.tx, bundle_id).await
    }

    async fn insert_bundle_adjustment(&mut self, adjustment: &BundleAdjustment) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO settlement_bundle_adjustments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            ADJUSTMENT_COLUMNS
        ))
        .bind(adjustment.id)
        .bind(adjustment.bundle_id)
        .bind(adjustment.kind)
        .bind(&adjustment.description)
        .bind(adjustment.amount)
        .bind(adjustment.tax_amount)
        .bind(adjustment.created_by)
        .bind(adjustment.created_at)
        .bind(adjustment.updated_by)
        .bind(adjustment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_constraint(e, "Adjustment already exists"))?;

        Ok(())
    }

    async fn update_bundle_adjustment(&mut self, adjustment: &BundleAdjustment) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE settlement_bundle_adjustments
            SET kind = $3, description = $4, amount = $5, tax_amount = $6, updated_by = $7, updated_at = $8
            WHERE id = $1 AND bundle_id = $2
            "#,
        )
        .bind(adjustment.id)
        .bind(adjustment.bundle_id)
        .bind(adjustment.kind)
        .bind(&adjustment.description)
        .bind(adjustment.amount)
        .bind(adjustment.tax_amount)
        .bind(adjustment.updated_by)
        .bind(adjustment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_constraint(e, "Adjustment already exists"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_bundle_adjustment(&mut self, bundle_id: Uuid, adjustment_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM settlement_bundle_adjustments WHERE id = $1 AND bundle_id = $2")
            .bind(adjustment_id)
            .bind(bundle_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn load_item_adjustments(&mut self, bundle_id: Uuid) -> AppResult<Vec<ItemAdjustment>> {
        fetch_item_adjustments(&mut self.tx, bundle_id).await
    }

    async fn insert_item_adjustment(&mut self, adjustment: &ItemAdjustment) -> AppResult<()> {
        sqlx::query(&format!(
            "INSERT INTO settlement_item_adjustments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            ITEM_ADJUSTMENT_COLUMNS
        ))
        .bind(adjustment.id)
        .bind(adjustment.bundle_item_id)
        .bind(adjustment.bundle_id)
        .bind(adjustment.kind)
        .bind(&adjustment.description)
        .bind(adjustment.amount)
        .bind(adjustment.tax_amount)
        .bind(adjustment.created_by)
        .bind(adjustment.created_at)
        .bind(adjustment.updated_by)
        .bind(adjustment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_constraint(e, "Adjustment already exists"))?;

        Ok(())
    }

    async fn update_item_adjustment(&mut self, adjustment: &ItemAdjustment) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE settlement_item_adjustments
            SET kind = $3, description = $4, amount = $5, tax_amount = $6, updated_by = $7, updated_at = $8
            WHERE id = $1 AND bundle_item_id = $2
            "#,
        )
        .bind(adjustment.id)
        .bind(adjustment.bundle_item_id)
        .bind(adjustment.kind)
        .bind(&adjustment.description)
        .bind(adjustment.amount)
        .bind(adjustment.tax_amount)
        .bind(adjustment.updated_by)
        .bind(adjustment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::from_constraint(e, "Adjustment already exists"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_item_adjustment(&mut self, bundle_item_id: Uuid, adjustment_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM settlement_item_adjustments WHERE id = $1 AND bundle_item_id = $2")
            .bind(adjustment_id)
            .bind(bundle_item_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        debug!("Settlement transaction committed");
        Ok(())
    }
}
