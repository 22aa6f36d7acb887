//! Stock ledger. Every call runs inside the caller's unit of work.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::domain::aggregates::ProductDetail;
use crate::store::UnitOfWork;
use crate::{EcommerceError, Result};

/// Takes `quantity` units off the offer, failing closed when there are not enough.
pub async fn reserve(uow: &mut dyn UnitOfWork, offer_id: Uuid, quantity: i32, now: DateTime<Utc>) -> Result<ProductDetail> {
    let mut offer = uow.offer(offer_id).await?.ok_or_else(|| EcommerceError::not_found("offer", offer_id))?;
    offer.remove_stock(quantity, now)?;
    uow.save_offer(&offer).await?;
    debug!(offer_id = %offer_id, quantity, remaining = offer.stock, "stock reserved");
    Ok(offer)
}

pub async fn release(uow: &mut dyn UnitOfWork, offer_id: Uuid, quantity: i32, now: DateTime<Utc>) -> Result<()> {
    let mut offer = uow.offer(offer_id).await?.ok_or_else(|| EcommerceError::not_found("offer", offer_id))?;
    offer.add_stock(quantity, now);
    uow.save_offer(&offer).await?;
    debug!(offer_id = %offer_id, quantity, stock = offer.stock, "stock released");
    Ok(())
}

/// Puts back everything an order took.
pub async fn release_order(uow: &mut dyn UnitOfWork, order_id: Uuid, now: DateTime<Utc>) -> Result<()> {
    for item in uow.order_items(order_id).await? {
        release(uow, item.offer_id, item.quantity, now).await?;
    }
    Ok(())
}
