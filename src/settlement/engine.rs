use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use super::models::{Actor, Bundle, BundleDetail};
use super::store::{Pagination, SettlementStore, SettlementTx};
use super::totals::TaxPolicy;

/// Engine-wide settings, derived from [`crate::config::Config`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tax: TaxPolicy,
    /// Upper bound for one unit of work; exceeding it rolls the transaction back
    pub tx_timeout: Duration,
    pub auto_invoice_numbers: bool,
    pub invoice_prefix: String,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tax: TaxPolicy {
                default_rate: dec!(0.1),
                scale: 0,
            },
            tx_timeout: Duration::from_secs(5),
            auto_invoice_numbers: true,
            invoice_prefix: "INV".to_string(),
            default_page_size: 20,
            max_page_size: 200,
        }
    }
}

/// Settlement Bundle Engine.
///
/// The operations live in `builder`, `adjustments`, `lifecycle` and `query`;
/// this file holds the pieces they share.
pub struct SettlementEngine {
    store: Arc<dyn SettlementStore>,
    config: EngineConfig,
}

impl SettlementEngine {
    pub fn new(store: Arc<dyn SettlementStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn SettlementStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one unit of work under the transaction timeout.
    ///
    /// The transaction lives inside `work`, so a timeout drops it uncommitted.
    pub(crate) async fn within_timeout<T, F>(&self, operation: &str, work: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.config.tx_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "⏱️  {} exceeded {}ms, rolled back",
                    operation,
                    self.config.tx_timeout.as_millis()
                );
                Err(AppError::Timeout(operation.to_string()))
            }
        }
    }

    /// Clamp caller paging into `[1, max_page_size]`
    pub fn pagination(&self, page: Option<u32>, page_size: Option<u32>) -> Pagination {
        let page_size = page_size
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1));
        Pagination::new(page.unwrap_or(1).max(1), page_size)
    }

    // ========== TRANSACTION HELPERS ==========

    pub(crate) async fn lock_existing(
        &self,
        tx: &mut dyn SettlementTx,
        bundle_id: Uuid,
    ) -> AppResult<Bundle> {
        tx.lock_bundle(bundle_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Bundle {} not found", bundle_id)))
    }

    /// Re-derive totals from the rows currently visible to `tx`
    pub(crate) async fn recompute_totals(
        &self,
        tx: &mut dyn SettlementTx,
        bundle: &mut Bundle,
    ) -> AppResult<()> {
        let items = tx.load_items(bundle.id).await?;
        let item_adjustments = tx.load_item_adjustments(bundle.id).await?;
        let adjustments = tx.load_bundle_adjustments(bundle.id).await?;

        bundle.totals =
            self.config
                .tax
                .recompute(bundle.tax_rate, &items, &item_adjustments, &adjustments)?;
        Ok(())
    }

    /// Stamp audit fields and write the bundle back under its version guard
    pub(crate) async fn persist(
        &self,
        tx: &mut dyn SettlementTx,
        bundle: &mut Bundle,
        actor: &Actor,
    ) -> AppResult<()> {
        bundle.updated_by = Some(actor.id);
        bundle.updated_at = Utc::now();
        bundle.version = tx.save_bundle(bundle, actor).await?;
        Ok(())
    }

    pub(crate) async fn load_detail(
        &self,
        tx: &mut dyn SettlementTx,
        bundle: Bundle,
    ) -> AppResult<BundleDetail> {
        let items = tx.load_items(bundle.id).await?;
        let item_adjustments = tx.load_item_adjustments(bundle.id).await?;
        let adjustments = tx.load_bundle_adjustments(bundle.id).await?;
        Ok(BundleDetail::assemble(bundle, items, item_adjustments, adjustments))
    }

    /// Tax carried by an adjustment when the caller does not supply one
    pub(crate) fn adjustment_tax(&self, amount: Decimal, tax_rate: Decimal) -> AppResult<Decimal> {
        self.config.tax.tax_for(amount, tax_rate)
    }

    pub(crate) fn check_amount(&self, field: &str, amount: Decimal) -> AppResult<()> {
        self.config.tax.check_amount(field, amount)
    }

    pub(crate) fn check_adjustment_amounts(
        &self,
        amount: Option<Decimal>,
        tax_amount: Option<Decimal>,
    ) -> AppResult<()> {
        if let Some(amount) = amount {
            self.check_amount("amount", amount)?;
        }
        if let Some(tax_amount) = tax_amount {
            self.check_amount("tax_amount", tax_amount)?;
        }
        Ok(())
    }
}

/// Fails with `Conflict` when the caller saw an older version of the bundle
pub(crate) fn check_expected_version(bundle: &Bundle, expected: Option<i32>) -> AppResult<()> {
    match expected {
        Some(version) if version != bundle.version => Err(AppError::Conflict(format!(
            "Bundle {} is at version {}, expected {}",
            bundle.id, bundle.version, version
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::memory::MemorySettlementStore;
    use crate::settlement::testing::sample_bundle;

    fn engine(config: EngineConfig) -> SettlementEngine {
        SettlementEngine::new(Arc::new(MemorySettlementStore::new()), config)
    }

    #[test]
    fn test_pagination_is_clamped() {
        let engine = engine(EngineConfig::default());

        assert_eq!(engine.pagination(None, None), Pagination::new(1, 20));
        assert_eq!(engine.pagination(Some(0), Some(0)), Pagination::new(1, 1));
        assert_eq!(engine.pagination(Some(4), Some(10_000)), Pagination::new(4, 200));
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_timeout_error() {
        let engine = engine(EngineConfig {
            tx_timeout: Duration::from_millis(10),
            ..EngineConfig::default()
        });

        let result: AppResult<()> = engine
            .within_timeout("slow work", async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AppError::Timeout(op)) if op == "slow work"));
    }

    #[tokio::test]
    async fn test_timed_out_transaction_is_rolled_back() {
        let store = Arc::new(MemorySettlementStore::new());
        let engine = SettlementEngine::new(
            store.clone(),
            EngineConfig {
                tx_timeout: Duration::from_millis(10),
                ..EngineConfig::default()
            },
        );

        let result: AppResult<()> = engine
            .within_timeout("insert then stall", async {
                let mut tx = store.begin().await?;
                tx.insert_bundle(&sample_bundle(Uuid::new_v4())).await?;
                tokio::time::sleep(Duration::from_millis(200)).await;
                tx.commit().await
            })
            .await;

        assert!(matches!(result, Err(AppError::Timeout(_))));
        assert_eq!(store.row_counts().await.0, 0);
    }

    #[test]
    fn test_expected_version_mismatch_conflicts() {
        let bundle = sample_bundle(Uuid::new_v4());

        assert!(check_expected_version(&bundle, None).is_ok());
        assert!(check_expected_version(&bundle, Some(bundle.version)).is_ok());
        assert!(matches!(
            check_expected_version(&bundle, Some(bundle.version + 3)),
            Err(AppError::Conflict(_))
        ));
    }
}
