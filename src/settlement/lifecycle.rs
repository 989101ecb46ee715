use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use super::engine::{check_expected_version, SettlementEngine};
use super::models::*;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransitionRequest {
    pub target: BundleStatus,
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub invoice_no: Option<String>,
    #[serde(default)]
    pub invoice_issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deposit_received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expected_version: Option<i32>,
}

impl TransitionRequest {
    pub fn to(target: BundleStatus) -> Self {
        Self {
            target,
            invoice_no: None,
            invoice_issued_at: None,
            deposit_received_at: None,
            expected_version: None,
        }
    }
}

/// Header fields that can change after creation
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateBundleInfo {
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub memo: Option<String>,
    #[serde(default)]
    pub payment: Option<PaymentInfo>,
    #[serde(default)]
    pub period_type: Option<PeriodType>,
    #[serde(default)]
    pub period_from: Option<NaiveDate>,
    #[serde(default)]
    pub period_to: Option<NaiveDate>,
    #[serde(default)]
    pub manager_id: Option<Uuid>,
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub invoice_no: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i32>,
}

impl UpdateBundleInfo {
    fn touches_memo_only(&self) -> bool {
        self.payment.is_none()
            && self.period_type.is_none()
            && self.period_from.is_none()
            && self.period_to.is_none()
            && self.manager_id.is_none()
            && self.invoice_no.is_none()
    }

    fn is_empty(&self) -> bool {
        self.memo.is_none() && self.touches_memo_only()
    }
}

/// Allowed moves: draft -> issued -> paid, and draft|issued -> canceled.
pub fn validate_transition(current: BundleStatus, target: BundleStatus) -> AppResult<()> {
    use BundleStatus::*;

    match (current, target) {
        (Draft, Issued) | (Issued, Paid) | (Draft, Canceled) | (Issued, Canceled) => Ok(()),
        (Draft, Paid) => Err(AppError::invalid_state(current, "be paid before it is issued")),
        (_, Draft) => Err(AppError::invalid_state(current, "return to draft")),
        _ => Err(AppError::invalid_state(current, format!("move to {}", target))),
    }
}

/// `{prefix}-{S|P}-{YYYYMMDD}-{first 8 hex digits of the bundle id}`
pub fn generate_invoice_no(prefix: &str, bundle: &Bundle, issued_at: DateTime<Utc>) -> String {
    let id = bundle.id.simple().to_string();
    format!(
        "{}-{}-{}-{}",
        prefix,
        bundle.side.code(),
        issued_at.format("%Y%m%d"),
        id[..8].to_uppercase()
    )
}

impl SettlementEngine {
    // ========== LIFECYCLE ==========

    /// Move a bundle to `req.target`, stamping the timestamps the target needs.
    ///
    /// Canceling hands every consumed order back to the waiting pool in the same
    /// transaction; the bundle row itself is kept.
    pub async fn transition(
        &self,
        bundle_id: Uuid,
        req: TransitionRequest,
        actor: &Actor,
    ) -> AppResult<BundleDetail> {
        req.validate()?;

        let (previous, detail) = self
            .within_timeout("transition bundle", async {
                let mut tx = self.store().begin().await?;
                let mut bundle = self.lock_existing(tx.as_mut(), bundle_id).await?;

                check_expected_version(&bundle, req.expected_version)?;
                validate_transition(bundle.status, req.target)?;

                let previous = bundle.status;
                let now = Utc::now();

                match req.target {
                    BundleStatus::Issued => {
                        let issued_at = req.invoice_issued_at.unwrap_or(now);
                        let invoice_no = match req.invoice_no.clone().or_else(|| bundle.invoice_no.clone()) {
                            Some(no) => no,
                            None if self.config().auto_invoice_numbers => {
                                generate_invoice_no(&self.config().invoice_prefix, &bundle, issued_at)
                            }
                            None => {
                                return Err(AppError::Validation(
                                    "invoice_no is required to issue this bundle".to_string(),
                                ))
                            }
                        };
                        bundle.invoice_no = Some(invoice_no);
                        bundle.invoice_issued_at = Some(issued_at);
                    }
                    BundleStatus::Paid => {
                        let deposit_received_at = req.deposit_received_at.ok_or_else(|| {
                            AppError::Validation(
                                "deposit_received_at is required to mark a bundle paid".to_string(),
                            )
                        })?;
                        bundle.deposit_received_at = Some(deposit_received_at);
                        bundle.settled_at = Some(now);
                    }
                    BundleStatus::Canceled => {
                        let items = tx.release_items(bundle.id).await?;
                        let orders = tx.release_orders(bundle.side, bundle.id).await?;
                        info!(
                            bundle_id = %bundle.id,
                            "↩️  Released {} items and {} ledger charges",
                            items,
                            orders
                        );
                        bundle.canceled_at = Some(now);
                    }
                    BundleStatus::Draft => {
                        return Err(AppError::invalid_state(previous, "return to draft"))
                    }
                }

                bundle.status = req.target;
                self.persist(tx.as_mut(), &mut bundle, actor).await?;
                let detail = self.load_detail(tx.as_mut(), bundle).await?;

                tx.commit().await?;
                Ok((previous, detail))
            })
            .await?;

        info!(
            bundle_id = %bundle_id,
            "📋 Bundle {} -> {} by {}",
            previous,
            detail.bundle.status,
            actor.id
        );

        Ok(detail)
    }

    /// Edit header fields. Memo stays editable until cancel; the rest only
    /// while the bundle is draft or issued.
    pub async fn update_bundle_info(
        &self,
        bundle_id: Uuid,
        update: UpdateBundleInfo,
        actor: &Actor,
    ) -> AppResult<BundleDetail> {
        update.validate()?;
        if update.is_empty() {
            return Err(AppError::Validation("Nothing to update".to_string()));
        }

        let manager = match update.manager_id {
            Some(manager_id) => Some(
                self.store()
                    .find_manager(manager_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Manager {} not found", manager_id)))?,
            ),
            None => None,
        };

        self.within_timeout("update bundle", async {
            let mut tx = self.store().begin().await?;
            let mut bundle = self.lock_existing(tx.as_mut(), bundle_id).await?;

            check_expected_version(&bundle, update.expected_version)?;

            if bundle.status == BundleStatus::Canceled {
                return Err(AppError::invalid_state(bundle.status, "be edited"));
            }
            if !bundle.status.allows_financial_edits() && !update.touches_memo_only() {
                return Err(AppError::invalid_state(bundle.status, "change anything but the memo"));
            }

            if let Some(memo) = &update.memo {
                bundle.memo = Some(memo.clone());
            }
            if let Some(payment) = &update.payment {
                bundle.payment = payment.clone();
            }
            if let Some(period_type) = update.period_type {
                bundle.period_type = period_type;
            }
            if let Some(from) = update.period_from {
                bundle.period_from = from;
            }
            if let Some(to) = update.period_to {
                bundle.period_to = to;
            }
            if bundle.period_from > bundle.period_to {
                return Err(AppError::Validation(format!(
                    "period_from {} is after period_to {}",
                    bundle.period_from, bundle.period_to
                )));
            }
            if let (Some(manager_id), Some(snapshot)) = (update.manager_id, &manager) {
                bundle.manager_id = manager_id;
                bundle.manager = snapshot.clone();
            }
            if let Some(invoice_no) = &update.invoice_no {
                bundle.invoice_no = Some(invoice_no.clone());
            }

            self.persist(tx.as_mut(), &mut bundle, actor).await?;
            let detail = self.load_detail(tx.as_mut(), bundle).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::engine::EngineConfig;
    use crate::settlement::store::WaitingOrderFilter;
    use crate::settlement::testing::{sample_bundle, Fixture};
    use rust_decimal_macros::dec;

    #[test]
    fn test_transition_table() {
        use BundleStatus::*;

        let allowed = [(Draft, Issued), (Issued, Paid), (Draft, Canceled), (Issued, Canceled)];
        for from in BundleStatus::all() {
            for to in BundleStatus::all() {
                let result = validate_transition(from, to);
                if allowed.contains(&(from, to)) {
                    assert!(result.is_ok(), "{from} -> {to} should be allowed");
                } else {
                    assert!(
                        matches!(result, Err(AppError::InvalidState { current, .. }) if current == from),
                        "{from} -> {to} should be rejected"
                    );
                }
            }
        }
    }

    #[test]
    fn test_generated_invoice_number_format() {
        let bundle = sample_bundle(Uuid::parse_str("3f2a9c1e-0000-4000-8000-000000000000").unwrap());
        let issued_at = DateTime::parse_from_rfc3339("2024-03-05T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(
            generate_invoice_no("INV", &bundle, issued_at),
            "INV-S-20240305-3F2A9C1E"
        );
    }

    #[tokio::test]
    async fn test_issue_generates_invoice_number() {
        let fx = Fixture::new().await;
        let bundle = fx.bundle(Side::Purchase, &[dec!(100)]).await;

        let issued = fx
            .engine
            .transition(bundle.bundle.id, TransitionRequest::to(BundleStatus::Issued), &fx.actor)
            .await
            .unwrap();

        assert_eq!(issued.bundle.status, BundleStatus::Issued);
        assert!(issued.bundle.invoice_issued_at.is_some());
        assert!(issued.bundle.invoice_no.as_deref().unwrap().starts_with("INV-P-"));
    }

    #[tokio::test]
    async fn test_issue_without_invoice_number_fails_when_generation_is_off() {
        let fx = Fixture::with_config(EngineConfig {
            auto_invoice_numbers: false,
            ..EngineConfig::default()
        })
        .await;
        let bundle = fx.bundle(Side::Sales, &[dec!(100)]).await;

        let err = fx
            .engine
            .transition(bundle.bundle.id, TransitionRequest::to(BundleStatus::Issued), &fx.actor)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let issued = fx
            .engine
            .transition(
                bundle.bundle.id,
                TransitionRequest {
                    invoice_no: Some("TAX-2024-0001".to_string()),
                    ..TransitionRequest::to(BundleStatus::Issued)
                },
                &fx.actor,
            )
            .await
            .unwrap();
        assert_eq!(issued.bundle.invoice_no.as_deref(), Some("TAX-2024-0001"));
    }

    #[tokio::test]
    async fn test_paid_requires_deposit_and_is_terminal() {
        let fx = Fixture::new().await;
        let bundle = fx.bundle(Side::Sales, &[dec!(100)]).await;
        let id = bundle.bundle.id;

        fx.engine
            .transition(id, TransitionRequest::to(BundleStatus::Issued), &fx.actor)
            .await
            .unwrap();

        let err = fx
            .engine
            .transition(id, TransitionRequest::to(BundleStatus::Paid), &fx.actor)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let deposit = Utc::now();
        let paid = fx
            .engine
            .transition(
                id,
                TransitionRequest {
                    deposit_received_at: Some(deposit),
                    ..TransitionRequest::to(BundleStatus::Paid)
                },
                &fx.actor,
            )
            .await
            .unwrap();
        assert_eq!(paid.bundle.deposit_received_at, Some(deposit));
        assert!(paid.bundle.settled_at.is_some());

        let err = fx
            .engine
            .transition(id, TransitionRequest::to(BundleStatus::Canceled), &fx.actor)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState { current: BundleStatus::Paid, .. }));

        let err = fx
            .engine
            .transition(id, TransitionRequest::to(BundleStatus::Paid), &fx.actor)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState { current: BundleStatus::Paid, .. }));
    }

    #[tokio::test]
    async fn test_state_is_checked_before_deposit() {
        let fx = Fixture::new().await;
        let bundle = fx.bundle(Side::Purchase, &[dec!(100)]).await;
        let id = bundle.bundle.id;

        fx.engine
            .transition(id, TransitionRequest::to(BundleStatus::Canceled), &fx.actor)
            .await
            .unwrap();

        let err = fx
            .engine
            .transition(id, TransitionRequest::to(BundleStatus::Paid), &fx.actor)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState { current: BundleStatus::Canceled, .. }));
    }

    #[tokio::test]
    async fn test_cancel_returns_orders_to_waiting_pool() {
        let fx = Fixture::new().await;
        let bundle = fx.bundle(Side::Sales, &[dec!(100), dec!(250)]).await;
        let id = bundle.bundle.id;

        fx.engine
            .transition(id, TransitionRequest::to(BundleStatus::Issued), &fx.actor)
            .await
            .unwrap();
        let canceled = fx
            .engine
            .transition(id, TransitionRequest::to(BundleStatus::Canceled), &fx.actor)
            .await
            .unwrap();

        assert_eq!(canceled.bundle.status, BundleStatus::Canceled);
        assert!(canceled.bundle.canceled_at.is_some());
        assert!(canceled.items.iter().all(|item| item.item.released));
        // figures are kept for audit
        assert_eq!(canceled.bundle.totals.total_amount, dec!(350));

        let waiting = fx
            .engine
            .list_waiting_orders(WaitingOrderFilter::for_side(Side::Sales), None, None)
            .await
            .unwrap();
        assert_eq!(waiting.total, 2);

        // the released orders can be bundled again
        let order_ids: Vec<Uuid> = canceled.items.iter().map(|item| item.item.order_id).collect();
        let rebuilt = fx
            .engine
            .create_bundle(fx.command(Side::Sales, &order_ids), &fx.actor)
            .await
            .unwrap();
        assert_eq!(rebuilt.bundle.order_count, 2);
    }

    #[tokio::test]
    async fn test_stale_version_loses_the_race() {
        let fx = Fixture::new().await;
        let bundle = fx.bundle(Side::Sales, &[dec!(100)]).await;
        let id = bundle.bundle.id;
        let seen = bundle.bundle.version;

        fx.engine
            .transition(
                id,
                TransitionRequest {
                    expected_version: Some(seen),
                    ..TransitionRequest::to(BundleStatus::Issued)
                },
                &fx.actor,
            )
            .await
            .unwrap();

        let err = fx
            .engine
            .transition(
                id,
                TransitionRequest {
                    expected_version: Some(seen),
                    ..TransitionRequest::to(BundleStatus::Canceled)
                },
                &fx.actor,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let current = fx.engine.get_bundle(id).await.unwrap();
        assert_eq!(current.bundle.status, BundleStatus::Issued);
    }

    #[tokio::test]
    async fn test_update_info_respects_status() {
        let fx = Fixture::new().await;
        let bundle = fx.bundle(Side::Sales, &[dec!(100)]).await;
        let id = bundle.bundle.id;

        let updated = fx
            .engine
            .update_bundle_info(
                id,
                UpdateBundleInfo {
                    memo: Some("March run".to_string()),
                    manager_id: Some(fx.manager),
                    ..Default::default()
                },
                &fx.actor,
            )
            .await
            .unwrap();
        assert_eq!(updated.bundle.memo.as_deref(), Some("March run"));
        assert_eq!(updated.bundle.updated_by, Some(fx.actor.id));

        fx.engine
            .transition(id, TransitionRequest::to(BundleStatus::Canceled), &fx.actor)
            .await
            .unwrap();

        let err = fx
            .engine
            .update_bundle_info(
                id,
                UpdateBundleInfo {
                    memo: Some("too late".to_string()),
                    ..Default::default()
                },
                &fx.actor,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_update_rejects_inverted_period() {
        let fx = Fixture::new().await;
        let bundle = fx.bundle(Side::Sales, &[dec!(100)]).await;

        let err = fx
            .engine
            .update_bundle_info(
                bundle.bundle.id,
                UpdateBundleInfo {
                    period_from: NaiveDate::from_ymd_opt(2030, 1, 1),
                    ..Default::default()
                },
                &fx.actor,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
