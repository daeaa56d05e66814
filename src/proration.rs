//! Mid-cycle proration arithmetic.
//!
//! Money is [`Decimal`] throughout; every intermediate amount is rounded to
//! cents, half away from zero.

use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TiergateError};

/// Credit for the unused part of the old price, and charge for the rest of the
/// cycle at the new price.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proration {
    pub credit: Decimal,
    pub charge: Decimal,
    /// `charge - credit`. Negative means the subject is owed money.
    pub net: Decimal,
}

impl Proration {
    #[must_use]
    pub fn is_refund(&self) -> bool {
        self.net.is_sign_negative() && !self.net.is_zero()
    }
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// Multiply first so thirds of a cent never get truncated before rounding
fn share_of(price: Decimal, remaining: Decimal, total: Decimal) -> Result<Decimal> {
    price
        .checked_mul(remaining)
        .and_then(|scaled| scaled.checked_div(total))
        .map(round2)
        .ok_or_else(|| TiergateError::bad_request(format!("price {} is too large to prorate", price)))
}

/// Prorate a switch from `old_price` to `new_price` with `days_remaining`
/// of `total_days` left in the cycle.
///
/// # Errors
///
/// `BadRequest` when `total_days` is zero or `days_remaining` exceeds it.
/// Also when a price is negative or too large to scale by the cycle.
pub fn prorate(days_remaining: u32, total_days: u32, old_price: Decimal, new_price: Decimal) -> Result<Proration> {
    if total_days == 0 {
        return Err(TiergateError::bad_request("total_days must be greater than 0"));
    }
    if days_remaining > total_days {
        return Err(TiergateError::bad_request(format!(
            "days_remaining ({}) exceeds total_days ({})",
            days_remaining, total_days
        )));
    }
    if old_price.is_sign_negative() || new_price.is_sign_negative() {
        return Err(TiergateError::bad_request("prices must not be negative"));
    }

    let (remaining, total) = (Decimal::from(days_remaining), Decimal::from(total_days));
    let credit = share_of(old_price, remaining, total)?;
    let charge = share_of(new_price, remaining, total)?;

    Ok(Proration {
        credit,
        charge,
        net: round2(charge - credit),
    })
}

/// One billing cycle: `start` inclusive, `end` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCycle {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingCycle {
    /// The cycle that contains `today` for a subscription anchored on `anchor`.
    ///
    /// Cycles renew on the anchor's day of month, clamped to shorter months:
    /// an anchor of Jan 31 renews on Feb 28 (or 29), then Mar 31.
    ///
    /// # Errors
    ///
    /// `BadRequest` if `today` precedes `anchor`.
    pub fn containing(anchor: NaiveDate, today: NaiveDate) -> Result<Self> {
        if today < anchor {
            return Err(TiergateError::bad_request(format!(
                "{} precedes the billing anchor {}",
                today, anchor
            )));
        }

        let months_between = (today.year() - anchor.year()) * 12 + today.month() as i32 - anchor.month() as i32;
        let mut offset = u32::try_from(months_between).unwrap_or(0);

        let mut start = add_months(anchor, offset)?;
        if start > today {
            offset = offset.saturating_sub(1);
            start = add_months(anchor, offset)?;
        }
        let end = add_months(anchor, offset + 1)?;

        Ok(Self { start, end })
    }

    #[must_use]
    pub fn total_days(&self) -> u32 {
        u32::try_from((self.end - self.start).num_days()).unwrap_or(0)
    }

    /// Days left including `today`.
    #[must_use]
    pub fn days_remaining(&self, today: NaiveDate) -> u32 {
        let days = (self.end - today.max(self.start)).num_days();
        u32::try_from(days).unwrap_or(0)
    }

    /// True after the first day of the cycle.
    #[must_use]
    pub fn is_mid_cycle(&self, today: NaiveDate) -> bool {
        today > self.start && today < self.end
    }

    /// Prorate a price change made on `today`.
    pub fn prorate(&self, today: NaiveDate, old_price: Decimal, new_price: Decimal) -> Result<Proration> {
        prorate(self.days_remaining(today), self.total_days(), old_price, new_price)
    }
}

fn add_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| TiergateError::bad_request(format!("billing cycle out of range from {}", date)))
}
