//! Discount engine.
//!
//! Promotions apply per line, then the shop voucher on what is left of the
//! order, then the marketplace voucher on what is left of the whole cart.
//! Anything ineligible is skipped with a log line; only an unknown voucher id
//! is an error.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::aggregates::{Promotion, Voucher, VoucherScope};
use crate::domain::value_objects::Money;
use crate::store::UnitOfWork;
use crate::{EcommerceError, Result};

/// Vouchers and promotions touched by one checkout, with their quota as
/// redeemed so far. Written back once at the end.
pub struct DiscountBook {
    now: DateTime<Utc>,
    promotions: HashMap<Uuid, Option<Promotion>>,
    vouchers: HashMap<Uuid, Voucher>,
}

/// Per-order redemption state: each rule's quota drops once per order, and a
/// promotion covers at most `max_quantity` units of the order.
#[derive(Default)]
pub struct OrderRedemptions {
    redeemed: HashSet<Uuid>,
    promoted_units: HashMap<Uuid, i32>,
}

impl DiscountBook {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now, promotions: HashMap::new(), vouchers: HashMap::new() }
    }

    async fn promotion(&mut self, uow: &mut dyn UnitOfWork, product_id: Uuid) -> Result<Option<&mut Promotion>> {
        if !self.promotions.contains_key(&product_id) {
            let found = uow.active_promotion(product_id, self.now).await?;
            self.promotions.insert(product_id, found);
        }
        Ok(self.promotions.get_mut(&product_id).and_then(Option::as_mut))
    }

    async fn voucher(&mut self, uow: &mut dyn UnitOfWork, voucher_id: Uuid) -> Result<&mut Voucher> {
        if !self.vouchers.contains_key(&voucher_id) {
            let voucher = uow.voucher(voucher_id).await?.ok_or_else(|| EcommerceError::not_found("voucher", voucher_id))?;
            self.vouchers.insert(voucher_id, voucher);
        }
        self.vouchers.get_mut(&voucher_id).ok_or_else(|| EcommerceError::not_found("voucher", voucher_id))
    }

    /// Promotion discount for one cart line, if any applies.
    pub async fn apply_promotion(
        &mut self,
        uow: &mut dyn UnitOfWork,
        shop_id: Uuid,
        product_id: Uuid,
        unit_price: Money,
        quantity: i32,
        order: &mut OrderRedemptions,
    ) -> Result<Option<(Uuid, Money)>> {
        let now = self.now;
        let Some(promotion) = self.promotion(uow, product_id).await? else {
            return Ok(None);
        };
        if promotion.shop_id != shop_id {
            debug!(promotion_id = %promotion.id, "promotion belongs to another shop");
            return Ok(None);
        }
        let used = order.promoted_units.get(&promotion.id).copied().unwrap_or(0);
        let units = quantity.min(promotion.max_quantity - used);
        let discount = match promotion.evaluate(unit_price, units, now) {
            Ok(discount) => discount,
            Err(reason) => {
                info!(promotion_id = %promotion.id, %reason, "promotion skipped");
                return Ok(None);
            }
        };
        if !order.redeemed.contains(&promotion.id) {
            if let Err(reason) = promotion.redeem() {
                info!(promotion_id = %promotion.id, %reason, "promotion skipped");
                return Ok(None);
            }
            order.redeemed.insert(promotion.id);
        }
        *order.promoted_units.entry(promotion.id).or_insert(0) += units;
        Ok(Some((promotion.id, discount)))
    }

    /// Voucher discount on `subtotal` within `scope`, redeeming the voucher when it applies.
    pub async fn apply_voucher(
        &mut self,
        uow: &mut dyn UnitOfWork,
        voucher_id: Uuid,
        scope: VoucherScope,
        subtotal: Money,
    ) -> Result<Option<Money>> {
        let now = self.now;
        let voucher = self.voucher(uow, voucher_id).await?;
        let discount = match voucher.evaluate(scope, subtotal, now) {
            Ok(discount) => discount,
            Err(reason) => {
                info!(voucher_id = %voucher_id, code = %voucher.code, %reason, "voucher skipped");
                return Ok(None);
            }
        };
        if let Err(reason) = voucher.redeem() {
            info!(voucher_id = %voucher_id, %reason, "voucher skipped");
            return Ok(None);
        }
        Ok(Some(discount))
    }

    /// Persists the updated quotas.
    pub async fn flush(self, uow: &mut dyn UnitOfWork) -> Result<()> {
        for promotion in self.promotions.into_values().flatten() {
            uow.save_promotion(&promotion).await?;
        }
        for voucher in self.vouchers.into_values() {
            uow.save_voucher(&voucher).await?;
        }
        Ok(())
    }
}

/// Splits `discount` across `bases` in proportion, rounding down, then hands the
/// remainder out front to back without letting any share exceed its base.
/// `discount` must not exceed the sum of `bases`.
pub fn distribute(discount: Money, bases: &[Money]) -> Vec<Money> {
    let whole: Money = bases.iter().copied().sum();
    let mut shares: Vec<Money> = bases.iter().map(|base| discount.share(*base, whole)).collect();
    let mut left = discount - shares.iter().copied().sum::<Money>();
    for (share, base) in shares.iter_mut().zip(bases) {
        if left <= Money::ZERO {
            break;
        }
        let room = *base - *share;
        let extra = room.min(left);
        *share += extra;
        left -= extra;
    }
    shares
}
