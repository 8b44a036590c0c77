//! Fixed-precision helpers shared by the pricing, distribution and ledger code.
//!
//! Every amount is a [`Decimal`]; floats never enter a calculation.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::ServiceError;

/// Default decimal places for money amounts
pub const MONEY_DP: u32 = 2;
/// Decimal places kept for quantities
pub const QUANTITY_DP: u32 = 4;
/// Decimal places kept for unit prices derived from net prices
pub const UNIT_PRICE_DP: u32 = 4;

/// Rounds half away from zero, the convention used for every monetary figure.
pub fn round_money(amount: Decimal, dp: u32) -> Decimal {
    amount.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_quantity(quantity: Decimal) -> Decimal {
    quantity.round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Strips tax out of a tax-inclusive price.
pub fn net_of_tax(gross: Decimal, tax_rate: Decimal) -> Decimal {
    round_money(gross / (Decimal::ONE + tax_rate), UNIT_PRICE_DP)
}

pub fn ensure_positive(value: Decimal, field: &str) -> Result<(), ServiceError> {
    if value <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "{} must be greater than zero, got {}",
            field, value
        )));
    }
    Ok(())
}

/// Rejects amounts carrying more decimals than the currency allows.
pub fn ensure_precision(value: Decimal, dp: u32, field: &str) -> Result<(), ServiceError> {
    if value.normalize().scale() > dp {
        return Err(ServiceError::ValidationError(format!(
            "{} {} has more than {} decimal places",
            field, value, dp
        )));
    }
    Ok(())
}

pub fn ensure_non_negative(value: Decimal, field: &str) -> Result<(), ServiceError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "{} must not be negative, got {}",
            field, value
        )));
    }
    Ok(())
}

/// Normalizes an ISO-4217 style currency code.
pub fn normalize_currency(code: &str) -> Result<String, ServiceError> {
    let code = code.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ServiceError::ValidationError(format!(
            "invalid currency code '{}'",
            code
        )));
    }
    Ok(code)
}
