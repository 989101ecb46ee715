use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::{AppError, AppResult};
use super::adjustments::AdjustmentInput;
use super::engine::SettlementEngine;
use super::models::*;
use super::totals::MAX_AMOUNT;

/// One order the caller wants consumed into the bundle
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewBundleItem {
    pub order_id: Uuid,
    /// Falls back to the ledger charge when omitted
    #[serde(default)]
    #[validate(custom = "positive_amount")]
    pub base_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBundle {
    pub side: Side,
    pub counterparty_id: Uuid,
    pub manager_id: Uuid,
    pub period_type: PeriodType,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,

    #[validate(length(min = 1, message = "at least one order is required"))]
    pub items: Vec<NewBundleItem>,
    #[serde(default)]
    pub adjustments: Vec<AdjustmentInput>,

    /// Bank details for the bundle; the counterparty's registered ones are used when absent
    #[serde(default)]
    pub payment: Option<PaymentInfo>,
    #[serde(default)]
    pub tax_exempt: bool,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub memo: Option<String>,
}

impl CreateBundle {
    /// Everything that can be rejected without touching the store
    fn check(&self) -> AppResult<()> {
        self.validate()?;
        for item in &self.items {
            item.validate()?;
        }
        for adjustment in &self.adjustments {
            adjustment.validate()?;
        }

        if self.period_from > self.period_to {
            return Err(AppError::Validation(format!(
                "period_from {} is after period_to {}",
                self.period_from, self.period_to
            )));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !seen.insert(item.order_id) {
                return Err(AppError::Validation(format!(
                    "Order {} is listed more than once",
                    item.order_id
                )));
            }
        }

        Ok(())
    }
}

fn amount_within_bounds(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount >= MAX_AMOUNT {
        let mut error = ValidationError::new("amount_too_large");
        error.message = Some(format!("must be below {}", MAX_AMOUNT).into());
        return Err(error);
    }
    Ok(())
}

pub(crate) fn positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        let mut error = ValidationError::new("positive_amount");
        error.message = Some("must be greater than zero".into());
        return Err(error);
    }
    amount_within_bounds(amount)
}

pub(crate) fn non_negative_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        let mut error = ValidationError::new("non_negative_amount");
        error.message = Some("must not be negative".into());
        return Err(error);
    }
    amount_within_bounds(amount)
}

impl SettlementEngine {
    // ========== BUNDLE BUILDER ==========

    /// Consume a set of waiting orders into a new draft bundle.
    ///
    /// Bundle row, items, initial adjustments and the ledger flags are written in
    /// one transaction. Any failure, including a timeout, leaves nothing behind.
    pub async fn create_bundle(&self, cmd: CreateBundle, actor: &Actor) -> AppResult<BundleDetail> {
        cmd.check()?;
        for item in &cmd.items {
            if let Some(base_amount) = item.base_amount {
                self.check_amount("base_amount", base_amount)?;
            }
        }
        for adjustment in &cmd.adjustments {
            self.check_adjustment_amounts(Some(adjustment.amount), adjustment.tax_amount)?;
        }

        let counterparty = self
            .store()
            .find_counterparty(cmd.counterparty_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Counterparty {} not found", cmd.counterparty_id))
            })?;
        let manager = self
            .store()
            .find_manager(cmd.manager_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Manager {} not found", cmd.manager_id)))?;

        let payment = match &cmd.payment {
            Some(payment) if !payment.is_empty() => payment.clone(),
            _ => counterparty.payment.clone(),
        };
        let tax_rate = self.config().tax.rate_for(cmd.tax_exempt);

        let result = self
            .within_timeout("create bundle", async {
                let mut tx = self.store().begin().await?;
                let order_ids: Vec<Uuid> = cmd.items.iter().map(|item| item.order_id).collect();

                let ledger: HashMap<Uuid, LedgerOrder> = tx
                    .lock_orders(cmd.side, &order_ids)
                    .await?
                    .into_iter()
                    .map(|order| (order.order_id, order))
                    .collect();

                let now = Utc::now();
                let bundle_id = Uuid::new_v4();

                let mut items = Vec::with_capacity(cmd.items.len());
                for requested in &cmd.items {
                    let order = ledger.get(&requested.order_id).ok_or_else(|| {
                        AppError::NotFound(format!(
                            "Order {} has no completed {} charge",
                            requested.order_id, cmd.side
                        ))
                    })?;

                    if order.counterparty_id != cmd.counterparty_id {
                        return Err(AppError::Validation(format!(
                            "Order {} belongs to counterparty {}, not {}",
                            order.order_id, order.counterparty_id, cmd.counterparty_id
                        )));
                    }
                    if let Some(owner) = order.bundle_id {
                        return Err(AppError::Conflict(format!(
                            "Order {} is already settled in bundle {}",
                            order.order_id, owner
                        )));
                    }

                    let base_amount = requested.base_amount.unwrap_or(order.amount);
                    if base_amount <= Decimal::ZERO {
                        return Err(AppError::Validation(format!(
                            "Order {} has a non-positive charge {}",
                            order.order_id, base_amount
                        )));
                    }
                    self.check_amount("base_amount", base_amount)?;

                    items.push(BundleItem {
                        id: Uuid::new_v4(),
                        bundle_id,
                        side: cmd.side,
                        order_id: order.order_id,
                        base_amount,
                        released: false,
                        created_at: now,
                    });
                }

                let mut adjustments = Vec::with_capacity(cmd.adjustments.len());
                for input in &cmd.adjustments {
                    let tax_amount = match input.tax_amount {
                        Some(tax) => tax,
                        None => self.adjustment_tax(input.amount, tax_rate)?,
                    };
                    adjustments.push(BundleAdjustment {
                        id: Uuid::new_v4(),
                        bundle_id,
                        kind: input.kind,
                        description: input.description.clone(),
                        amount: input.amount,
                        tax_amount,
                        created_by: actor.id,
                        created_at: now,
                        updated_by: None,
                        updated_at: now,
                    });
                }

                let totals = self
                    .config()
                    .tax
                    .recompute(tax_rate, &items, &[], &adjustments)?;

                let bundle = Bundle {
                    id: bundle_id,
                    side: cmd.side,
                    counterparty_id: cmd.counterparty_id,
                    counterparty: counterparty.snapshot.clone(),
                    manager_id: cmd.manager_id,
                    manager: manager.clone(),
                    payment: payment.clone(),
                    period_type: cmd.period_type,
                    period_from: cmd.period_from,
                    period_to: cmd.period_to,
                    status: BundleStatus::Draft,
                    tax_rate,
                    totals,
                    invoice_no: None,
                    invoice_issued_at: None,
                    deposit_received_at: None,
                    settled_at: None,
                    canceled_at: None,
                    memo: cmd.memo.clone(),
                    order_count: items.len() as i32,
                    version: 1,
                    created_by: actor.id,
                    updated_by: None,
                    created_at: now,
                    updated_at: now,
                };

                tx.insert_bundle(&bundle).await?;
                for item in &items {
                    tx.insert_item(item).await?;
                }
                for adjustment in &adjustments {
                    tx.insert_bundle_adjustment(adjustment).await?;
                }

                // Consumption runs last so a lost race aborts the inserts above
                let marked = tx
                    .mark_orders_settled(cmd.side, &order_ids, bundle_id)
                    .await?;
                if marked != order_ids.len() as u64 {
                    return Err(AppError::Conflict(format!(
                        "Only {} of {} orders could be claimed",
                        marked,
                        order_ids.len()
                    )));
                }

                tx.commit().await?;
                Ok(BundleDetail::assemble(bundle, items, Vec::new(), adjustments))
            })
            .await;

        match &result {
            Ok(detail) => info!(
                bundle_id = %detail.bundle.id,
                side = %detail.bundle.side,
                order_count = detail.bundle.order_count,
                "✅ Bundle created: {} with tax {}",
                detail.bundle.totals.total_amount_with_tax,
                detail.bundle.totals.total_tax_amount
            ),
            Err(e) => warn!(
                side = %cmd.side,
                counterparty_id = %cmd.counterparty_id,
                "Bundle creation rolled back: {}",
                e
            ),
        }

        result
    }
}
