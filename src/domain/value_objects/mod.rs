//! Value Objects for the marketplace

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{EcommerceError, Result};

/// Money value object, in minor currency units (single-currency marketplace).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn new(amount: i64) -> Self { Self(amount) }
    pub fn amount(&self) -> i64 { self.0 }
    pub fn is_zero(&self) -> bool { self.0 == 0 }
    pub fn is_negative(&self) -> bool { self.0 < 0 }
    /// `self * qty`. Fails instead of wrapping when the product leaves the i64 range.
    pub fn multiply(&self, qty: i32) -> Result<Money> {
        self.0
            .checked_mul(i64::from(qty))
            .map(Money)
            .ok_or_else(|| EcommerceError::invalid("quantity", "overflow", "amount is out of range"))
    }

    /// `self * fraction`, rounded down to the currency unit.
    pub fn percent(&self, fraction: Decimal) -> Money {
        let raw = (Decimal::from(self.0) * fraction).floor();
        Money(raw.to_i64().unwrap_or(0))
    }

    /// Subtraction that refuses to go below zero.
    pub fn subtract(&self, other: Money) -> Option<Money> {
        if other.0 > self.0 { None } else { Some(Money(self.0 - other.0)) }
    }

    /// Share of `self` proportional to `part / whole`, rounded down.
    pub fn share(&self, part: Money, whole: Money) -> Money {
        if whole.0 <= 0 { return Money::ZERO; }
        Money((i128::from(self.0) * i128::from(part.0) / i128::from(whole.0)) as i64)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl Add for Money { type Output = Money; fn add(self, rhs: Money) -> Money { Money(self.0 + rhs.0) } }
impl Sub for Money { type Output = Money; fn sub(self, rhs: Money) -> Money { Money(self.0 - rhs.0) } }
impl Neg for Money { type Output = Money; fn neg(self) -> Money { Money(-self.0) } }
impl AddAssign for Money { fn add_assign(&mut self, rhs: Money) { self.0 += rhs.0; } }
impl SubAssign for Money { fn sub_assign(&mut self, rhs: Money) { self.0 -= rhs.0; } }
impl Sum for Money { fn sum<I: Iterator<Item = Money>>(iter: I) -> Money { iter.fold(Money::ZERO, Add::add) } }

/// Shipping address, used for delivery fee lookups.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub street: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub province: String,
    #[validate(length(min = 5, max = 10))]
    pub zip: String,
}

/// Human-readable, unique invoice number: `INV/<yyyymmdd>/MPL/<suffix>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Invoice(String);

impl Invoice {
    pub fn generate(at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string()[..10].to_uppercase();
        Self(format!("INV/{}/MPL/{}", at.format("%Y%m%d"), suffix))
    }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_string(self) -> String { self.0 }
}

impl fmt::Display for Invoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Last four digits of a card number, for logs and events.
pub fn mask_card(card_number: &str) -> String {
    let digits: Vec<char> = card_number.chars().filter(|c| c.is_ascii_digit()).collect();
    let tail: String = digits.iter().skip(digits.len().saturating_sub(4)).collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_add() {
        let a = Money::new(100);
        let b = Money::new(50);
        assert_eq!(a + b, Money::new(150));
    }

    #[test]
    fn test_percent_rounds_down() {
        assert_eq!(Money::new(33_333).percent(Decimal::new(10, 2)), Money::new(3_333));
        assert_eq!(Money::new(50_000).percent(Decimal::new(15, 2)), Money::new(7_500));
    }

    #[test]
    fn test_subtract_never_negative() {
        assert_eq!(Money::new(10).subtract(Money::new(11)), None);
        assert_eq!(Money::new(10).subtract(Money::new(10)), Some(Money::ZERO));
    }

    #[test]
    fn test_multiply_rejects_overflow() {
        assert_eq!(Money::new(12_500).multiply(4).unwrap(), Money::new(50_000));
        let err = Money::new(i64::MAX / 2).multiply(3).unwrap_err();
        assert!(matches!(err, EcommerceError::Validation(_)));
    }

    #[test]
    fn test_share() {
        let discount = Money::new(10_000);
        assert_eq!(discount.share(Money::new(30_000), Money::new(90_000)), Money::new(3_333));
        assert_eq!(discount.share(Money::new(1), Money::ZERO), Money::ZERO);
    }

    #[test]
    fn test_invoice_format() {
        let invoice = Invoice::generate(Utc::now());
        assert!(invoice.as_str().starts_with("INV/"));
        assert_eq!(invoice.as_str().split('/').count(), 4);
    }

    #[test]
    fn test_mask_card() {
        assert_eq!(mask_card("4111 1111 1111 1234"), "****1234");
    }
}
