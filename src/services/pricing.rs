//! Order pricing: subtotal, voucher discount and the amount actually charged.

use crate::errors::ServiceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Discount terms lifted from a voucher row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoucherTerms {
    pub discount_percent: Decimal,
    /// Zero means the discount is not capped
    pub max_discount: Decimal,
}

impl From<&crate::entities::voucher::Model> for VoucherTerms {
    fn from(voucher: &crate::entities::voucher::Model) -> Self {
        Self {
            discount_percent: voucher.discount_percent,
            max_discount: voucher.max_discount,
        }
    }
}

/// Breakdown of what a buyer pays for `quantity` units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PriceQuote {
    pub unit_price: Decimal,
    pub quantity: i32,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

/// Discount granted on `subtotal`.
///
/// The percentage is applied and truncated to whole currency units, then
/// capped by `max_discount` when that is positive. The result never exceeds
/// the subtotal and is never negative.
pub fn voucher_discount(subtotal: Decimal, percent: Decimal, max_discount: Decimal) -> Decimal {
    if subtotal <= Decimal::ZERO || percent <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let mut discount = (subtotal * percent / HUNDRED).trunc();
    if max_discount > Decimal::ZERO && discount > max_discount {
        discount = max_discount;
    }
    discount.min(subtotal)
}

/// Prices an order line, optionally applying voucher terms.
pub fn quote(
    unit_price: Decimal,
    quantity: i32,
    voucher: Option<VoucherTerms>,
) -> Result<PriceQuote, ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "Quantity must be at least 1".to_string(),
        ));
    }
    if unit_price <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Unit price must be positive".to_string(),
        ));
    }

    let subtotal = unit_price * Decimal::from(quantity);
    let discount_amount = voucher
        .map(|terms| voucher_discount(subtotal, terms.discount_percent, terms.max_discount))
        .unwrap_or(Decimal::ZERO);

    Ok(PriceQuote {
        unit_price,
        quantity,
        subtotal,
        discount_amount,
        total_amount: subtotal - discount_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn terms(percent: Decimal, max: Decimal) -> Option<VoucherTerms> {
        Some(VoucherTerms {
            discount_percent: percent,
            max_discount: max,
        })
    }

    #[test]
    fn quote_without_voucher_charges_subtotal() {
        let q = quote(dec!(25000), 3, None).unwrap();
        assert_eq!(q.subtotal, dec!(75000));
        assert_eq!(q.discount_amount, Decimal::ZERO);
        assert_eq!(q.total_amount, dec!(75000));
    }

    #[test]
    fn discount_is_truncated_to_whole_units() {
        // 10% of 999 is 99.9
        assert_eq!(voucher_discount(dec!(999), dec!(10), Decimal::ZERO), dec!(99));
    }

    #[test]
    fn discount_is_capped_by_max_discount() {
        let q = quote(dec!(100000), 5, terms(dec!(20), dec!(50000))).unwrap();
        assert_eq!(q.subtotal, dec!(500000));
        assert_eq!(q.discount_amount, dec!(50000));
        assert_eq!(q.total_amount, dec!(450000));
    }

    #[test]
    fn zero_max_discount_means_uncapped() {
        let q = quote(dec!(100000), 5, terms(dec!(20), Decimal::ZERO)).unwrap();
        assert_eq!(q.discount_amount, dec!(100000));
    }

    #[test]
    fn full_discount_never_goes_negative() {
        let q = quote(dec!(10), 1, terms(dec!(100), Decimal::ZERO)).unwrap();
        assert_eq!(q.total_amount, Decimal::ZERO);
    }

    #[test]
    fn rejects_zero_quantity() {
        assert!(matches!(
            quote(dec!(10), 0, None),
            Err(ServiceError::ValidationError(_))
        ));
    }

    proptest! {
        #[test]
        fn discount_respects_cap_and_subtotal(
            price in 1u32..1_000_000,
            qty in 1i32..500,
            percent in 1u32..=100,
            max in 0u32..200_000,
        ) {
            let max = Decimal::from(max);
            let q = quote(Decimal::from(price), qty, terms(Decimal::from(percent), max)).unwrap();

            prop_assert!(q.discount_amount >= Decimal::ZERO);
            prop_assert!(q.discount_amount <= q.subtotal);
            if max > Decimal::ZERO {
                prop_assert!(q.discount_amount <= max);
            }
            prop_assert_eq!(q.total_amount + q.discount_amount, q.subtotal);
        }
    }
}
