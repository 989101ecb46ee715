use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use super::builder::{non_negative_amount, positive_amount};
use super::engine::SettlementEngine;
use super::models::*;
use super::store::SettlementTx;

/// A new surcharge or discount. `amount` is a magnitude, the sign comes from `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdjustmentInput {
    #[serde(rename = "type")]
    pub kind: AdjustmentType,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(custom = "positive_amount")]
    pub amount: Decimal,
    /// Derived from the bundle's tax rate when omitted
    #[serde(default)]
    #[validate(custom = "non_negative_amount")]
    pub tax_amount: Option<Decimal>,
}

/// Partial edit of an existing adjustment
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AdjustmentPatch {
    #[serde(default, rename = "type")]
    pub kind: Option<AdjustmentType>,
    /// Absent keeps the description, `null` clears it
    #[serde(default, deserialize_with = "present_or_null")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    #[validate(custom = "positive_amount")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    #[validate(custom = "non_negative_amount")]
    pub tax_amount: Option<Decimal>,
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl AdjustmentPatch {
    fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.description.is_none()
            && self.amount.is_none()
            && self.tax_amount.is_none()
    }
}

/// Where an adjustment hangs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentScope {
    Bundle,
    Item(Uuid),
}

#[derive(Debug, Clone)]
pub enum AdjustmentChange {
    Add(AdjustmentInput),
    Edit(Uuid, AdjustmentPatch),
    Remove(Uuid),
}

impl AdjustmentChange {
    fn check(&self) -> AppResult<()> {
        match self {
            AdjustmentChange::Add(input) => input.validate()?,
            AdjustmentChange::Edit(_, patch) => {
                patch.validate()?;
                if let Some(Some(description)) = &patch.description {
                    if description.chars().count() > 500 {
                        return Err(AppError::Validation(
                            "description: must be at most 500 characters".to_string(),
                        ));
                    }
                }
                if patch.is_empty() {
                    return Err(AppError::Validation("Nothing to update".to_string()));
                }
            }
            AdjustmentChange::Remove(_) => {}
        }
        Ok(())
    }

    fn verb(&self) -> &'static str {
        match self {
            AdjustmentChange::Add(_) => "add",
            AdjustmentChange::Edit(..) => "edit",
            AdjustmentChange::Remove(_) => "remove",
        }
    }
}

/// Result of an adjustment operation: the touched row and the recomputed bundle
#[derive(Debug, Clone, Serialize)]
pub struct AdjustmentOutcome {
    pub adjustment_id: Uuid,
    pub bundle: BundleDetail,
}

/// Values an edit settles on after the patch is applied
struct Patched {
    kind: AdjustmentType,
    description: Option<String>,
    amount: Decimal,
    tax_amount: Decimal,
}

impl SettlementEngine {
    // ========== ADJUSTMENT MANAGER ==========

    pub async fn add_bundle_adjustment(
        &self,
        bundle_id: Uuid,
        input: AdjustmentInput,
        actor: &Actor,
    ) -> AppResult<AdjustmentOutcome> {
        self.apply_adjustment(bundle_id, AdjustmentScope::Bundle, AdjustmentChange::Add(input), actor)
            .await
    }

    pub async fn edit_bundle_adjustment(
        &self,
        bundle_id: Uuid,
        adjustment_id: Uuid,
        patch: AdjustmentPatch,
        actor: &Actor,
    ) -> AppResult<AdjustmentOutcome> {
        self.apply_adjustment(
            bundle_id,
            AdjustmentScope::Bundle,
            AdjustmentChange::Edit(adjustment_id, patch),
            actor,
        )
        .await
    }

    pub async fn remove_bundle_adjustment(
        &self,
        bundle_id: Uuid,
        adjustment_id: Uuid,
        actor: &Actor,
    ) -> AppResult<AdjustmentOutcome> {
        self.apply_adjustment(
            bundle_id,
            AdjustmentScope::Bundle,
            AdjustmentChange::Remove(adjustment_id),
            actor,
        )
        .await
    }

    pub async fn add_item_adjustment(
        &self,
        bundle_id: Uuid,
        bundle_item_id: Uuid,
        input: AdjustmentInput,
        actor: &Actor,
    ) -> AppResult<AdjustmentOutcome> {
        self.apply_adjustment(
            bundle_id,
            AdjustmentScope::Item(bundle_item_id),
            AdjustmentChange::Add(input),
            actor,
        )
        .await
    }

    pub async fn edit_item_adjustment(
        &self,
        bundle_id: Uuid,
        bundle_item_id: Uuid,
        adjustment_id: Uuid,
        patch: AdjustmentPatch,
        actor: &Actor,
    ) -> AppResult<AdjustmentOutcome> {
        self.apply_adjustment(
            bundle_id,
            AdjustmentScope::Item(bundle_item_id),
            AdjustmentChange::Edit(adjustment_id, patch),
            actor,
        )
        .await
    }

    pub async fn remove_item_adjustment(
        &self,
        bundle_id: Uuid,
        bundle_item_id: Uuid,
        adjustment_id: Uuid,
        actor: &Actor,
    ) -> AppResult<AdjustmentOutcome> {
        self.apply_adjustment(
            bundle_id,
            AdjustmentScope::Item(bundle_item_id),
            AdjustmentChange::Remove(adjustment_id),
            actor,
        )
        .await
    }

    /// Apply one adjustment change and recompute the bundle, all under the bundle lock
    pub async fn apply_adjustment(
        &self,
        bundle_id: Uuid,
        scope: AdjustmentScope,
        change: AdjustmentChange,
        actor: &Actor,
    ) -> AppResult<AdjustmentOutcome> {
        change.check()?;
        match &change {
            AdjustmentChange::Add(input) => {
                self.check_adjustment_amounts(Some(input.amount), input.tax_amount)?
            }
            AdjustmentChange::Edit(_, patch) => {
                self.check_adjustment_amounts(patch.amount, patch.tax_amount)?
            }
            AdjustmentChange::Remove(_) => {}
        }
        let verb = change.verb();

        let outcome = self
            .within_timeout("change adjustment", async {
                let mut tx = self.store().begin().await?;
                let mut bundle = self.lock_existing(tx.as_mut(), bundle_id).await?;

                if !bundle.status.allows_financial_edits() {
                    return Err(AppError::invalid_state(bundle.status, format!("{} adjustments", verb)));
                }

                let adjustment_id = match scope {
                    AdjustmentScope::Bundle => {
                        self.change_bundle_adjustment(tx.as_mut(), &bundle, change, actor)
                            .await?
                    }
                    AdjustmentScope::Item(item_id) => {
                        self.change_item_adjustment(tx.as_mut(), &bundle, item_id, change, actor)
                            .await?
                    }
                };

                self.recompute_totals(tx.as_mut(), &mut bundle).await?;
                self.persist(tx.as_mut(), &mut bundle, actor).await?;
                let detail = self.load_detail(tx.as_mut(), bundle).await?;

                tx.commit().await?;
                Ok(AdjustmentOutcome {
                    adjustment_id,
                    bundle: detail,
                })
            })
            .await?;

        info!(
            bundle_id = %bundle_id,
            adjustment_id = %outcome.adjustment_id,
            "🧾 Adjustment {} ({:?}), bundle total now {}",
            verb,
            scope,
            outcome.bundle.bundle.totals.total_amount_with_tax
        );

        Ok(outcome)
    }

    /// Re-derive totals from the stored rows without changing anything else
    pub async fn recalculate_bundle(&self, bundle_id: Uuid, actor: &Actor) -> AppResult<BundleDetail> {
        self.within_timeout("recalculate bundle", async {
            let mut tx = self.store().begin().await?;
            let mut bundle = self.lock_existing(tx.as_mut(), bundle_id).await?;

            if !bundle.status.allows_financial_edits() {
                return Err(AppError::invalid_state(bundle.status, "recalculate totals"));
            }

            let before = bundle.totals;
            self.recompute_totals(tx.as_mut(), &mut bundle).await?;
            if bundle.totals != before {
                info!(
                    bundle_id = %bundle_id,
                    "Bundle totals drifted: {} -> {}",
                    before.total_amount_with_tax,
                    bundle.totals.total_amount_with_tax
                );
            }

            self.persist(tx.as_mut(), &mut bundle, actor).await?;
            let detail = self.load_detail(tx.as_mut(), bundle).await?;
            tx.commit().await?;
            Ok(detail)
        })
        .await
    }

    async fn change_bundle_adjustment(
        &self,
        tx: &mut dyn SettlementTx,
        bundle: &Bundle,
        change: AdjustmentChange,
        actor: &Actor,
    ) -> AppResult<Uuid> {
        let now = Utc::now();
        match change {
            AdjustmentChange::Add(input) => {
                let tax_amount = match input.tax_amount {
                    Some(tax) => tax,
                    None => self.adjustment_tax(input.amount, bundle.tax_rate)?,
                };
                let row = BundleAdjustment {
                    id: Uuid::new_v4(),
                    bundle_id: bundle.id,
                    kind: input.kind,
                    description: input.description,
                    amount: input.amount,
                    tax_amount,
                    created_by: actor.id,
                    created_at: now,
                    updated_by: None,
                    updated_at: now,
                };
                tx.insert_bundle_adjustment(&row).await?;
                Ok(row.id)
            }
            AdjustmentChange::Edit(adjustment_id, patch) => {
                let mut row = tx
                    .load_bundle_adjustments(bundle.id)
                    .await?
                    .into_iter()
                    .find(|adj| adj.id == adjustment_id)
                    .ok_or_else(|| adjustment_not_found(adjustment_id))?;

                let patched = self.patch_values(
                    bundle.tax_rate,
                    (row.kind, row.description.clone(), row.amount, row.tax_amount),
                    patch,
                )?;
                row.kind = patched.kind;
                row.description = patched.description;
                row.amount = patched.amount;
                row.tax_amount = patched.tax_amount;
                row.updated_by = Some(actor.id);
                row.updated_at = now;

                if !tx.update_bundle_adjustment(&row).await? {
                    return Err(adjustment_not_found(adjustment_id));
                }
                Ok(row.id)
            }
            AdjustmentChange::Remove(adjustment_id) => {
                if !tx.delete_bundle_adjustment(bundle.id, adjustment_id).await? {
                    return Err(adjustment_not_found(adjustment_id));
                }
                Ok(adjustment_id)
            }
        }
    }

    async fn change_item_adjustment(
        &self,
        tx: &mut dyn SettlementTx,
        bundle: &Bundle,
        item_id: Uuid,
        change: AdjustmentChange,
        actor: &Actor,
    ) -> AppResult<Uuid> {
        let item = tx
            .load_items(bundle.id)
            .await?
            .into_iter()
            .find(|item| item.id == item_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Item {} not found in bundle {}", item_id, bundle.id))
            })?;
        if item.released {
            return Err(AppError::Validation(format!(
                "Item {} was released back to the waiting pool",
                item_id
            )));
        }

        let now = Utc::now();
        match change {
            AdjustmentChange::Add(input) => {
                let tax_amount = match input.tax_amount {
                    Some(tax) => tax,
                    None => self.adjustment_tax(input.amount, bundle.tax_rate)?,
                };
                let row = ItemAdjustment {
                    id: Uuid::new_v4(),
                    bundle_item_id: item.id,
                    bundle_id: bundle.id,
                    kind: input.kind,
                    description: input.description,
                    amount: input.amount,
                    tax_amount,
                    created_by: actor.id,
                    created_at: now,
                    updated_by: None,
                    updated_at: now,
                };
                tx.insert_item_adjustment(&row).await?;
                Ok(row.id)
            }
            AdjustmentChange::Edit(adjustment_id, patch) => {
                let mut row = tx
                    .load_item_adjustments(bundle.id)
                    .await?
                    .into_iter()
                    .find(|adj| adj.id == adjustment_id && adj.bundle_item_id == item.id)
                    .ok_or_else(|| adjustment_not_found(adjustment_id))?;

                let patched = self.patch_values(
                    bundle.tax_rate,
                    (row.kind, row.description.clone(), row.amount, row.tax_amount),
                    patch,
                )?;
                row.kind = patched.kind;
                row.description = patched.description;
                row.amount = patched.amount;
                row.tax_amount = patched.tax_amount;
                row.updated_by = Some(actor.id);
                row.updated_at = now;

                if !tx.update_item_adjustment(&row).await? {
                    return Err(adjustment_not_found(adjustment_id));
                }
                Ok(row.id)
            }
            AdjustmentChange::Remove(adjustment_id) => {
                if !tx.delete_item_adjustment(item.id, adjustment_id).await? {
                    return Err(adjustment_not_found(adjustment_id));
                }
                Ok(adjustment_id)
            }
        }
    }

    /// A new amount without an explicit tax re-derives the tax from the bundle rate
    fn patch_values(
        &self,
        tax_rate: Decimal,
        (kind, description, amount, tax_amount): (AdjustmentType, Option<String>, Decimal, Decimal),
        patch: AdjustmentPatch,
    ) -> AppResult<Patched> {
        let new_amount = patch.amount.unwrap_or(amount);
        let new_tax = match (patch.tax_amount, patch.amount) {
            (Some(tax), _) => tax,
            (None, Some(changed)) => self.adjustment_tax(changed, tax_rate)?,
            (None, None) => tax_amount,
        };

        Ok(Patched {
            kind: patch.kind.unwrap_or(kind),
            description: patch.description.unwrap_or(description),
            amount: new_amount,
            tax_amount: new_tax,
        })
    }
}

fn adjustment_not_found(adjustment_id: Uuid) -> AppError {
    AppError::NotFound(format!("Adjustment {} not found", adjustment_id))
}
