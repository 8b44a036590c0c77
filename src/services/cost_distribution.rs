//! Proportional spreading of an incremental cost over purchase order lines.
//!
//! Each line's base cost (`quantity × unit_price`) is normalized into the
//! cost's currency with the supplied exchange rates. The increment of a line
//! is its share of the normalized base times the cost total, rounded to the
//! currency precision. Whatever rounding leaves over, including any digits
//! of the total finer than that precision, goes to the line with the largest
//! share (the first one on ties) so increments sum to the total exactly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::money::round_money;

const PERCENTAGE_DP: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionInput {
    pub purchase_order_id: Uuid,
    pub purchase_order_line_id: Uuid,
    /// Lines without a material are left out of the distribution
    pub material_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionLine {
    pub purchase_order_id: Uuid,
    pub purchase_order_line_id: Uuid,
    pub material_id: Uuid,
    pub base_cost: Decimal,
    pub base_currency: String,
    pub normalized_cost: Decimal,
    pub percentage: Decimal,
    pub increment: Decimal,
}

/// Rate of `currency` into the distribution currency.
fn rate_for(
    currency: &str,
    target: &str,
    rates: &BTreeMap<String, Decimal>,
) -> Result<Decimal, ServiceError> {
    if currency == target {
        return Ok(Decimal::ONE);
    }
    match rates.get(currency) {
        Some(rate) if *rate > Decimal::ZERO => Ok(*rate),
        Some(rate) => Err(ServiceError::ValidationError(format!(
            "exchange rate for {} must be positive, got {}",
            currency, rate
        ))),
        None => Err(ServiceError::MissingExchangeRate(currency.to_string())),
    }
}

pub fn distribute(
    inputs: &[DistributionInput],
    rates: &BTreeMap<String, Decimal>,
    total: Decimal,
    currency: &str,
    dp: u32,
) -> Result<Vec<DistributionLine>, ServiceError> {
    if total <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "incremental cost total must be positive, got {}",
            total
        )));
    }

    let mut lines = Vec::new();
    for input in inputs {
        let Some(material_id) = input.material_id else {
            continue;
        };
        let rate = rate_for(&input.currency, currency, rates)?;
        let base_cost = input.quantity * input.unit_price;
        lines.push(DistributionLine {
            purchase_order_id: input.purchase_order_id,
            purchase_order_line_id: input.purchase_order_line_id,
            material_id,
            base_cost,
            base_currency: input.currency.clone(),
            normalized_cost: base_cost * rate,
            percentage: Decimal::ZERO,
            increment: Decimal::ZERO,
        });
    }

    let base: Decimal = lines.iter().map(|l| l.normalized_cost).sum();
    if lines.is_empty() {
        return Err(ServiceError::NoDistributionBase(
            "no material lines to distribute over".to_string(),
        ));
    }
    if base <= Decimal::ZERO {
        return Err(ServiceError::NoDistributionBase(format!(
            "normalized base of {} lines is {}",
            lines.len(),
            base
        )));
    }

    let mut largest = 0;
    for (index, line) in lines.iter().enumerate() {
        if line.normalized_cost > lines[largest].normalized_cost {
            largest = index;
        }
    }

    for line in lines.iter_mut() {
        let share = line.normalized_cost / base;
        line.percentage = (share * Decimal::ONE_HUNDRED).round_dp(PERCENTAGE_DP);
        line.increment = round_money(share * total, dp);
    }

    let assigned: Decimal = lines.iter().map(|l| l.increment).sum();
    let residual = total - assigned;
    if !residual.is_zero() {
        lines[largest].increment += residual;
    }

    Ok(lines)
}
