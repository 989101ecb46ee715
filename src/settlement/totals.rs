use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::error::{AppError, AppResult};
use super::models::{BundleAdjustment, BundleItem, ItemAdjustment, Totals};

/// Exclusive ceiling for any stored amount; `NUMERIC(20, 4)` holds 16 integer digits
pub const MAX_AMOUNT: Decimal = dec!(10000000000000000);

/// Decimal places the amount columns keep
pub const MAX_SCALE: u32 = 4;

fn overflow() -> AppError {
    AppError::Validation(format!("Amounts must stay below {}", MAX_AMOUNT))
}

fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> AppResult<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(value))
        .ok_or_else(overflow)
}

/// Tax rule applied when a bundle is created.
///
/// The rate is frozen onto the bundle, so later recomputation never depends on
/// the configured rate. Tax is truncated to `scale` decimal places.
#[derive(Debug, Clone, Copy)]
pub struct TaxPolicy {
    pub default_rate: Decimal,
    pub scale: u32,
}

impl TaxPolicy {
    pub fn rate_for(&self, tax_exempt: bool) -> Decimal {
        if tax_exempt {
            Decimal::ZERO
        } else {
            self.default_rate
        }
    }

    pub fn tax_for(&self, amount: Decimal, rate: Decimal) -> AppResult<Decimal> {
        let tax = amount.checked_mul(rate).ok_or_else(overflow)?;
        Ok(tax.round_dp_with_strategy(self.scale, RoundingStrategy::ToZero))
    }

    /// Reject amounts the store cannot hold exactly: too large, or finer than `scale`
    pub fn check_amount(&self, field: &str, amount: Decimal) -> AppResult<()> {
        if amount.abs() >= MAX_AMOUNT {
            return Err(AppError::Validation(format!(
                "{} {} must stay below {}",
                field, amount, MAX_AMOUNT
            )));
        }
        if amount.normalize().scale() > self.scale {
            return Err(AppError::Validation(format!(
                "{} {} has more than {} decimal places",
                field, amount, self.scale
            )));
        }
        Ok(())
    }

    /// Recompute a bundle's totals from its rows.
    ///
    /// Released items (canceled bundles) still count so a canceled bundle keeps
    /// the figures it had when it was canceled.
    pub fn recompute(
        &self,
        tax_rate: Decimal,
        items: &[BundleItem],
        item_adjustments: &[ItemAdjustment],
        adjustments: &[BundleAdjustment],
    ) -> AppResult<Totals> {
        let base = checked_sum(items.iter().map(|item| item.base_amount))?;

        let item_amount = checked_sum(item_adjustments.iter().map(|adj| adj.kind.signed(adj.amount)))?;
        let item_tax = checked_sum(item_adjustments.iter().map(|adj| adj.kind.signed(adj.tax_amount)))?;

        let bundle_amount = checked_sum(adjustments.iter().map(|adj| adj.kind.signed(adj.amount)))?;
        let bundle_tax = checked_sum(adjustments.iter().map(|adj| adj.kind.signed(adj.tax_amount)))?;

        let total_amount = checked_sum([base, item_amount, bundle_amount])?;
        let total_tax_amount = checked_sum([self.tax_for(base, tax_rate)?, item_tax, bundle_tax])?;
        let total_amount_with_tax = checked_sum([total_amount, total_tax_amount])?;

        if total_amount < Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Discounts exceed the bundle amount (total would be {})",
                total_amount
            )));
        }
        if total_tax_amount < Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Discounts exceed the bundle tax (tax would be {})",
                total_tax_amount
            )));
        }

        if total_amount_with_tax >= MAX_AMOUNT {
            return Err(overflow());
        }

        Ok(Totals {
            total_amount,
            total_tax_amount,
            total_amount_with_tax,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::models::{AdjustmentType, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn policy() -> TaxPolicy {
        TaxPolicy {
            default_rate: dec!(0.1),
            scale: 0,
        }
    }

    fn items(amounts: &[Decimal]) -> Vec<BundleItem> {
        let bundle_id = Uuid::new_v4();
        amounts
            .iter()
            .map(|amount| BundleItem {
                id: Uuid::new_v4(),
                bundle_id,
                side: Side::Sales,
                order_id: Uuid::new_v4(),
                base_amount: *amount,
                released: false,
                created_at: Utc::now(),
            })
            .collect()
    }

    fn adjustment(kind: AdjustmentType, amount: Decimal, tax_amount: Decimal) -> BundleAdjustment {
        BundleAdjustment {
            id: Uuid::new_v4(),
            bundle_id: Uuid::new_v4(),
            kind,
            description: None,
            amount,
            tax_amount,
            created_by: Uuid::nil(),
            created_at: Utc::now(),
            updated_by: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_base_totals_with_default_rate() {
        let totals = policy()
            .recompute(dec!(0.1), &items(&[dec!(100), dec!(200), dec!(300)]), &[], &[])
            .unwrap();

        assert_eq!(totals.total_amount, dec!(600));
        assert_eq!(totals.total_tax_amount, dec!(60));
        assert_eq!(totals.total_amount_with_tax, dec!(660));
    }

    #[test]
    fn test_surcharge_adds_amount_and_tax() {
        let rows = items(&[dec!(100), dec!(200), dec!(300)]);
        let surcharge = adjustment(AdjustmentType::Surcharge, dec!(50), dec!(5));

        let totals = policy().recompute(dec!(0.1), &rows, &[], &[surcharge]).unwrap();

        assert_eq!(totals.total_amount, dec!(650));
        assert_eq!(totals.total_tax_amount, dec!(65));
        assert_eq!(totals.total_amount_with_tax, dec!(715));
    }

    #[test]
    fn test_discount_subtracts() {
        let rows = items(&[dec!(1000)]);
        let discount = adjustment(AdjustmentType::Discount, dec!(100), dec!(10));

        let totals = policy().recompute(dec!(0.1), &rows, &[], &[discount]).unwrap();

        assert_eq!(totals.total_amount, dec!(900));
        assert_eq!(totals.total_tax_amount, dec!(90));
    }

    #[test]
    fn test_discount_beyond_total_is_rejected() {
        let rows = items(&[dec!(100)]);
        let discount = adjustment(AdjustmentType::Discount, dec!(150), dec!(0));

        let err = policy().recompute(dec!(0.1), &rows, &[], &[discount]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_exempt_bundle_has_no_tax() {
        let rate = policy().rate_for(true);
        let totals = policy().recompute(rate, &items(&[dec!(12345)]), &[], &[]).unwrap();

        assert_eq!(totals.total_tax_amount, Decimal::ZERO);
        assert_eq!(totals.total_amount_with_tax, dec!(12345));
    }

    #[test]
    fn test_tax_truncates_to_scale() {
        assert_eq!(policy().tax_for(dec!(1239), dec!(0.1)).unwrap(), dec!(123));

        let cents = TaxPolicy {
            default_rate: dec!(0.1),
            scale: 2,
        };
        assert_eq!(cents.tax_for(dec!(10.99), dec!(0.1)).unwrap(), dec!(1.09));
    }

    #[test]
    fn test_oversized_totals_are_rejected_not_panicking() {
        let huge = items(&[Decimal::MAX - Decimal::ONE, Decimal::MAX - Decimal::ONE]);
        let err = policy().recompute(dec!(0.1), &huge, &[], &[]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let near_cap = items(&[dec!(6000000000000000), dec!(5000000000000000)]);
        let err = policy().recompute(dec!(0.1), &near_cap, &[], &[]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(policy().tax_for(Decimal::MAX, dec!(2)).is_err());
    }

    #[test]
    fn test_check_amount_bounds_and_scale() {
        assert!(policy().check_amount("base_amount", dec!(100)).is_ok());
        assert!(policy().check_amount("base_amount", dec!(100.000)).is_ok());
        assert!(policy().check_amount("base_amount", dec!(100.123456789)).is_err());
        assert!(policy().check_amount("base_amount", MAX_AMOUNT).is_err());

        let cents = TaxPolicy {
            default_rate: dec!(0.1),
            scale: 2,
        };
        assert!(cents.check_amount("amount", dec!(10.99)).is_ok());
        assert!(cents.check_amount("amount", dec!(10.999)).is_err());
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let rows = items(&[dec!(333), dec!(333), dec!(334)]);
        let adjs = vec![
            adjustment(AdjustmentType::Surcharge, dec!(17), dec!(1)),
            adjustment(AdjustmentType::Discount, dec!(3), dec!(0)),
        ];

        let first = policy().recompute(dec!(0.1), &rows, &[], &adjs).unwrap();
        let second = policy().recompute(dec!(0.1), &rows, &[], &adjs).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.total_amount_with_tax,
            first.total_amount + first.total_tax_amount
        );
    }
}
