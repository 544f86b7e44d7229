//! Pure arithmetic for splitting released funds and growing held balances.
//!
//! Nothing here performs I/O or keeps state. Every function works on
//! `rust_decimal::Decimal`, so the three parts of a split always add back up to
//! the input exactly.

use super::money::to_money_scale;
use crate::error::{EscrowError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The three parts of a released amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompoundingResult {
    /// `amount * allocation_rate`, sent to the allocation destination.
    pub allocation_a: Decimal,
    /// `amount * feedback_rate`, sent to the feedback destination.
    pub allocation_b: Decimal,
    /// Whatever is left; re-held for the next cycle.
    pub remainder: Decimal,
}

/// Checks that both rates are non-negative and leave something behind.
pub fn validate_rates(feedback_rate: Decimal, allocation_rate: Decimal) -> Result<()> {
    if feedback_rate < Decimal::ZERO
        || allocation_rate < Decimal::ZERO
        || feedback_rate + allocation_rate >= Decimal::ONE
    {
        return Err(EscrowError::InvalidRates {
            feedback: feedback_rate,
            allocation: allocation_rate,
        });
    }
    Ok(())
}

/// Splits `amount` into two allocations and a remainder.
///
/// Allocations are truncated to the money scale and the remainder takes the
/// difference, so `allocation_a + allocation_b + remainder == amount`.
pub fn split(
    amount: Decimal,
    feedback_rate: Decimal,
    allocation_rate: Decimal,
) -> Result<CompoundingResult> {
    validate_rates(feedback_rate, allocation_rate)?;
    if amount < Decimal::ZERO {
        return Err(EscrowError::InvalidAmount(amount));
    }

    let allocation_b = amount
        .checked_mul(feedback_rate)
        .map(to_money_scale)
        .ok_or(EscrowError::InvalidAmount(amount))?;
    let allocation_a = amount
        .checked_mul(allocation_rate)
        .map(to_money_scale)
        .ok_or(EscrowError::InvalidAmount(amount))?;
    let remainder = amount - allocation_a - allocation_b;

    Ok(CompoundingResult {
        allocation_a,
        allocation_b,
        remainder,
    })
}

/// Growth applied to an owner's held balance on each compounding pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Growth {
    /// Balance stays as it is.
    #[default]
    Flat,
    /// `balance * factor`
    Multiplier { factor: Decimal },
    /// `balance * (1 + balance / divisor) ^ exponent`
    Viral { divisor: Decimal, exponent: u32 },
}

impl Growth {
    pub fn validate(&self) -> Result<()> {
        match self {
            Growth::Flat => Ok(()),
            Growth::Multiplier { factor } if *factor >= Decimal::ZERO => Ok(()),
            Growth::Multiplier { factor } => Err(EscrowError::InvalidConfig(format!(
                "growth factor must be non-negative, got {factor}"
            ))),
            Growth::Viral { divisor, .. } if *divisor > Decimal::ZERO => Ok(()),
            Growth::Viral { divisor, .. } => Err(EscrowError::InvalidConfig(format!(
                "growth divisor must be positive, got {divisor}"
            ))),
        }
    }

    /// Applies the growth, bailing out with `None` on overflow or once the
    /// running value passes `ceiling`.
    fn apply(&self, balance: Decimal, ceiling: Decimal) -> Option<Decimal> {
        match self {
            Growth::Flat => Some(balance),
            Growth::Multiplier { factor } => balance.checked_mul(*factor),
            Growth::Viral { divisor, exponent } => {
                let factor = Decimal::ONE.checked_add(balance.checked_div(*divisor)?)?;
                compound(balance, factor, *exponent, ceiling)
            }
        }
    }
}

/// `value * factor ^ exponent` by repeated squaring, for `factor >= 1`.
///
/// Takes at most 32 squarings whatever the exponent. Returns `None` on
/// overflow or as soon as the result is known to pass `ceiling`.
fn compound(
    mut value: Decimal,
    mut factor: Decimal,
    mut exponent: u32,
    ceiling: Decimal,
) -> Option<Decimal> {
    while exponent > 0 {
        if exponent & 1 == 1 {
            value = value.checked_mul(factor)?;
            if value > ceiling {
                return None;
            }
        }
        exponent >>= 1;
        if exponent > 0 {
            factor = factor.checked_mul(factor)?;
        }
    }
    Some(value)
}

/// Returns `min(growth(balance), cap)`.
///
/// Any overflow in the growth computation saturates to `cap`.
pub fn amplify(balance: Decimal, cap: Decimal, growth: &Growth) -> Decimal {
    if balance <= Decimal::ZERO {
        return balance.min(cap);
    }
    match growth.apply(balance, cap) {
        Some(value) => to_money_scale(value).min(cap),
        None => cap,
    }
}
