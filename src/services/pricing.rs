//! Order pricing shared by quote consolidation and purchase order edits.
//!
//! Tax and withholding are decided per line: import lines are exempt, every
//! other line contributes `line_subtotal × rate`. The order-level figures are
//! rounded once, after summing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::prelude::Json;
use serde::{Deserialize, Serialize};

use crate::config::ProcurementConfig;
use crate::errors::ServiceError;
use crate::money::{net_of_tax, round_money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRates {
    pub tax_rate: Decimal,
    pub withholding_rate: Decimal,
}

impl From<&ProcurementConfig> for TaxRates {
    fn from(cfg: &ProcurementConfig) -> Self {
        Self {
            tax_rate: cfg.tax_rate,
            withholding_rate: cfg.withholding_rate,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PricedLine {
    pub quantity: Decimal,
    /// Pre-tax unit price
    pub unit_price: Decimal,
    pub is_import: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub withholding: Decimal,
    pub total: Decimal,
}

/// Frozen calculation behind a forced total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsSnapshot {
    pub rates: TaxRates,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub withholding: Decimal,
    pub total: Decimal,
    pub captured_at: DateTime<Utc>,
}

impl TotalsSnapshot {
    pub fn capture(totals: OrderTotals, rates: TaxRates) -> Self {
        Self {
            rates,
            subtotal: totals.subtotal,
            tax: totals.tax,
            withholding: totals.withholding,
            total: totals.total,
            captured_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<Json, ServiceError> {
        serde_json::to_value(self)
            .map_err(|e| ServiceError::InternalError(format!("Failed to encode totals snapshot: {}", e)))
    }

    pub fn from_json(value: &Json) -> Result<Self, ServiceError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ServiceError::InternalError(format!("Corrupt totals snapshot: {}", e)))
    }
}

/// Pre-tax unit price for a quoted price.
pub fn resolve_base_unit_price(price: Decimal, is_net_price: bool, rates: &TaxRates) -> Decimal {
    if is_net_price {
        net_of_tax(price, rates.tax_rate)
    } else {
        price
    }
}

pub fn line_subtotal(quantity: Decimal, unit_price: Decimal, dp: u32) -> Decimal {
    round_money(quantity * unit_price, dp)
}

pub fn compute_order_totals(lines: &[PricedLine], rates: &TaxRates, dp: u32) -> OrderTotals {
    let mut subtotal = Decimal::ZERO;
    let mut taxable = Decimal::ZERO;

    for line in lines {
        let amount = line_subtotal(line.quantity, line.unit_price, dp);
        subtotal += amount;
        if !line.is_import {
            taxable += amount;
        }
    }

    let tax = round_money(taxable * rates.tax_rate, dp);
    let withholding = round_money(taxable * rates.withholding_rate, dp);

    OrderTotals {
        subtotal,
        tax,
        withholding,
        total: subtotal + tax - withholding,
    }
}

/// Totals for an order whose total is forced: the line figures are still
/// derived with the frozen rates, the total is kept as given.
pub fn forced_totals(
    lines: &[PricedLine],
    snapshot: &TotalsSnapshot,
    dp: u32,
) -> (OrderTotals, TotalsSnapshot) {
    let mut totals = compute_order_totals(lines, &snapshot.rates, dp);
    totals.total = snapshot.total;
    let refreshed = TotalsSnapshot {
        captured_at: snapshot.captured_at,
        ..TotalsSnapshot::capture(totals, snapshot.rates)
    };
    (totals, refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rates() -> TaxRates {
        TaxRates {
            tax_rate: dec!(0.16),
            withholding_rate: Decimal::ZERO,
        }
    }

    #[test]
    fn import_lines_are_exempt_per_line() {
        let lines = [
            PricedLine {
                quantity: dec!(2),
                unit_price: dec!(100),
                is_import: false,
            },
            PricedLine {
                quantity: dec!(1),
                unit_price: dec!(50),
                is_import: true,
            },
        ];

        let totals = compute_order_totals(&lines, &rates(), 2);
        assert_eq!(totals.subtotal, dec!(250));
        assert_eq!(totals.tax, dec!(32));
        assert_eq!(totals.withholding, Decimal::ZERO);
        assert_eq!(totals.total, dec!(282));
    }

    #[test]
    fn withholding_is_subtracted() {
        let rates = TaxRates {
            tax_rate: dec!(0.16),
            withholding_rate: dec!(0.04),
        };
        let lines = [PricedLine {
            quantity: dec!(3),
            unit_price: dec!(33.33),
            is_import: false,
        }];

        let totals = compute_order_totals(&lines, &rates, 2);
        assert_eq!(totals.subtotal, dec!(99.99));
        assert_eq!(totals.tax, dec!(16.00));
        assert_eq!(totals.withholding, dec!(4.00));
        assert_eq!(totals.total, dec!(111.99));
    }

    #[test]
    fn net_prices_are_reduced_before_pricing() {
        assert_eq!(resolve_base_unit_price(dec!(116), true, &rates()), dec!(100));
        assert_eq!(resolve_base_unit_price(dec!(116), false, &rates()), dec!(116));
    }

    #[test]
    fn forced_total_survives_recomputation() {
        let lines = [PricedLine {
            quantity: dec!(10),
            unit_price: dec!(10),
            is_import: false,
        }];
        let frozen = TotalsSnapshot::capture(
            OrderTotals {
                subtotal: dec!(100),
                tax: dec!(16),
                withholding: Decimal::ZERO,
                total: dec!(115),
            },
            rates(),
        );

        let (totals, snapshot) = forced_totals(&lines, &frozen, 2);
        assert_eq!(totals.total, dec!(115));
        assert_eq!(totals.subtotal, dec!(100));
        assert_eq!(snapshot.total, dec!(115));
        assert_eq!(snapshot.captured_at, frozen.captured_at);

        let decoded = TotalsSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
    }
}
