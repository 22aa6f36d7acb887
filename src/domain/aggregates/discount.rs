//! Vouchers and promotions

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Money;
use crate::{EcommerceError, Result};

/// How a discount is computed. Exactly one form, never both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// Fraction of the price, in `(0, 1]`.
    Percentage(Decimal),
    Fixed(Money),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub kind: DiscountKind,
    pub min_product_price: Money,
    pub max_discount_price: Money,
}

impl DiscountRule {
    /// Builds a rule from the raw optional columns, enforcing the one-of shape.
    pub fn from_parts(percentage: Option<Decimal>, amount: Option<Money>, min_product_price: Money, max_discount_price: Money) -> Result<Self> {
        let kind = match (percentage, amount) {
            (Some(p), None) if p > Decimal::ZERO && p <= Decimal::ONE => DiscountKind::Percentage(p),
            (Some(_), None) => return Err(EcommerceError::invalid("percentage", "range", "percentage must be in (0, 1]")),
            (None, Some(a)) if a > Money::ZERO => DiscountKind::Fixed(a),
            (None, Some(_)) => return Err(EcommerceError::invalid("amount", "range", "amount must be positive")),
            _ => return Err(EcommerceError::invalid("percentage", "discount_kind", "exactly one of percentage or amount is required")),
        };
        if min_product_price.is_negative() || max_discount_price <= Money::ZERO {
            return Err(EcommerceError::invalid("max_discount_price", "range", "discount bounds must be positive"));
        }
        Ok(Self { kind, min_product_price, max_discount_price })
    }

    pub fn percentage(&self) -> Option<Decimal> {
        match self.kind { DiscountKind::Percentage(p) => Some(p), DiscountKind::Fixed(_) => None }
    }

    pub fn amount(&self) -> Option<Money> {
        match self.kind { DiscountKind::Fixed(a) => Some(a), DiscountKind::Percentage(_) => None }
    }

    /// Discount for `price`, capped by `max_discount_price` and by the price itself.
    pub fn discount_for(&self, price: Money) -> std::result::Result<Money, Ineligible> {
        if price < self.min_product_price {
            return Err(Ineligible::BelowMinimum);
        }
        let raw = match self.kind {
            DiscountKind::Percentage(p) => price.percent(p),
            DiscountKind::Fixed(a) => a,
        };
        let discount = raw.min(self.max_discount_price).min(price);
        if discount.is_zero() { Err(Ineligible::NothingToDiscount) } else { Ok(discount) }
    }
}

/// Why a discount was left out. Never surfaced as an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ineligible { Inactive, QuotaExhausted, BelowMinimum, WrongScope, NothingToDiscount }

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Inactive => "outside its active window",
            Self::QuotaExhausted => "quota exhausted",
            Self::BelowMinimum => "price below minimum",
            Self::WrongScope => "not valid for this scope",
            Self::NothingToDiscount => "nothing to discount",
        };
        f.write_str(reason)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoucherScope { Shop(Uuid), Marketplace }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Voucher {
    pub id: Uuid,
    /// `None` for marketplace vouchers.
    pub shop_id: Option<Uuid>,
    pub code: String,
    pub quota: i32,
    pub actived_date: DateTime<Utc>,
    pub expired_date: DateTime<Utc>,
    pub rule: DiscountRule,
}

impl Voucher {
    pub fn scope(&self) -> VoucherScope {
        self.shop_id.map_or(VoucherScope::Marketplace, VoucherScope::Shop)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool { self.actived_date <= now && now <= self.expired_date }

    pub fn evaluate(&self, scope: VoucherScope, subtotal: Money, now: DateTime<Utc>) -> std::result::Result<Money, Ineligible> {
        if self.scope() != scope { return Err(Ineligible::WrongScope); }
        if !self.is_active(now) { return Err(Ineligible::Inactive); }
        if self.quota <= 0 { return Err(Ineligible::QuotaExhausted); }
        self.rule.discount_for(subtotal)
    }

    pub fn redeem(&mut self) -> std::result::Result<(), Ineligible> {
        if self.quota <= 0 { return Err(Ineligible::QuotaExhausted); }
        self.quota -= 1;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Promotion {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub quota: i32,
    /// Units per order that receive the discount.
    pub max_quantity: i32,
    pub actived_date: DateTime<Utc>,
    pub expired_date: DateTime<Utc>,
    pub rule: DiscountRule,
}

impl Promotion {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool { self.actived_date <= now && now <= self.expired_date }

    /// Discount for `units` units at `unit_price`; the rule applies per unit.
    pub fn evaluate(&self, unit_price: Money, units: i32, now: DateTime<Utc>) -> std::result::Result<Money, Ineligible> {
        if !self.is_active(now) { return Err(Ineligible::Inactive); }
        if units <= 0 { return Err(Ineligible::NothingToDiscount); }
        // Bounded by the line total, which has already been checked for overflow.
        self.rule.discount_for(unit_price)?.multiply(units).map_err(|_| Ineligible::NothingToDiscount)
    }

    pub fn redeem(&mut self) -> std::result::Result<(), Ineligible> {
        if self.quota <= 0 { return Err(Ineligible::QuotaExhausted); }
        self.quota -= 1;
        Ok(())
    }
}

/// Which rule produced an applied discount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "snake_case")]
pub enum DiscountSource {
    Promotion(Uuid),
    ShopVoucher(Uuid),
    MarketplaceVoucher(Uuid),
}

impl DiscountSource {
    pub fn kind(&self) -> &'static str {
        match self { Self::Promotion(_) => "promotion", Self::ShopVoucher(_) => "shop_voucher", Self::MarketplaceVoucher(_) => "marketplace_voucher" }
    }

    pub fn id(&self) -> Uuid {
        match self { Self::Promotion(id) | Self::ShopVoucher(id) | Self::MarketplaceVoucher(id) => *id }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "promotion" => Some(Self::Promotion(id)),
            "shop_voucher" => Some(Self::ShopVoucher(id)),
            "marketplace_voucher" => Some(Self::MarketplaceVoucher(id)),
            _ => None,
        }
    }
}
