//! Order lifecycle operations for buyers and sellers.

use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use super::payment::{cancel_unpaid, reverse_payment};
use super::{stock, Context};
use crate::config::OrderPolicy;
use crate::domain::aggregates::{AppliedDiscount, Order, OrderItem, OrderStatus, Party};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::store::UnitOfWork;
use crate::{EcommerceError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub discounts: Vec<AppliedDiscount>,
}

impl OrderDetail {
    pub(crate) async fn load(uow: &mut dyn UnitOfWork, order: Order) -> Result<Self> {
        let items = uow.order_items(order.id).await?;
        let discounts = uow.applied_discounts(order.id).await?;
        Ok(Self { order, items, discounts })
    }
}

/// Which side of the order `user_id` is on: the buyer, or the owner of the selling shop.
pub(crate) async fn acting_party(uow: &mut dyn UnitOfWork, order: &Order, user_id: Uuid) -> Result<Party> {
    if order.buyer_id == user_id {
        return Ok(Party::Buyer);
    }
    let shop = uow.shop(order.shop_id).await?.ok_or_else(|| EcommerceError::not_found("shop", order.shop_id))?;
    if shop.owner_id == user_id {
        Ok(Party::Seller)
    } else {
        Err(EcommerceError::Unauthorized("not a party to this order"))
    }
}

pub(crate) async fn load_order(uow: &mut dyn UnitOfWork, order_id: Uuid) -> Result<Order> {
    uow.order(order_id).await?.ok_or_else(|| EcommerceError::not_found("order", order_id))
}

pub(crate) fn status_changed(order: &Order, from: OrderStatus) -> DomainEvent {
    DomainEvent::Order(OrderEvent::StatusChanged { order_id: order.id, from, to: order.status })
}

#[derive(Clone)]
pub struct OrderService {
    ctx: Context,
    policy: OrderPolicy,
}

impl OrderService {
    pub(crate) fn new(ctx: Context, policy: OrderPolicy) -> Self {
        Self { ctx, policy }
    }

    /// Seller hands the parcel to the courier. The arrival deadline starts now.
    #[instrument(skip(self, tracking_number))]
    pub async fn ship(&self, seller_id: Uuid, order_id: Uuid, tracking_number: &str) -> Result<Order> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() || tracking_number.len() > 64 {
            return Err(EcommerceError::invalid("tracking_number", "length", "tracking number must be 1 to 64 characters"));
        }
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let mut order = load_order(uow.as_mut(), order_id).await?;
        if acting_party(uow.as_mut(), &order, seller_id).await? != Party::Seller {
            return Err(EcommerceError::Unauthorized("only the seller can ship an order"));
        }
        let from = order.status;
        order.ship(tracking_number.to_string(), now + self.policy.arrival_window, now)?;
        uow.save_order(&order).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch_all([
            status_changed(&order, from),
            DomainEvent::Order(OrderEvent::Shipped { order_id, tracking_number: tracking_number.to_string() }),
        ]);
        info!(order_id = %order_id, "order shipped");
        Ok(order)
    }

    /// Buyer confirms arrival.
    #[instrument(skip(self))]
    pub async fn complete(&self, buyer_id: Uuid, order_id: Uuid) -> Result<Order> {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let mut order = load_order(uow.as_mut(), order_id).await?;
        if acting_party(uow.as_mut(), &order, buyer_id).await? != Party::Buyer {
            return Err(EcommerceError::Unauthorized("only the buyer can confirm arrival"));
        }
        let from = order.status;
        order.complete(now)?;
        uow.save_order(&order).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch(status_changed(&order, from));
        info!(order_id = %order_id, "order completed by buyer");
        Ok(order)
    }

    /// Either party may cancel a paid order before shipping; it is refunded over
    /// its payment rail. An unpaid order can only be canceled by its buyer and
    /// takes its whole transaction with it.
    #[instrument(skip(self))]
    pub async fn cancel(&self, user_id: Uuid, order_id: Uuid) -> Result<Order> {
        let now = self.ctx.clock.now();
        let mut events = Vec::new();
        let mut uow = self.ctx.store.begin().await?;
        // Transaction before order, the same lock order the card callback takes.
        let transaction_id = uow
            .order_transaction_id(order_id)
            .await?
            .ok_or_else(|| EcommerceError::not_found("order", order_id))?;
        let mut transaction = uow
            .transaction(transaction_id)
            .await?
            .ok_or_else(|| EcommerceError::not_found("transaction", transaction_id))?;
        let mut order = load_order(uow.as_mut(), order_id).await?;
        let party = acting_party(uow.as_mut(), &order, user_id).await?;

        match order.status {
            OrderStatus::Unpaid if party == Party::Seller => {
                return Err(EcommerceError::Unauthorized("an unpaid order can only be canceled by its buyer"));
            }
            OrderStatus::Unpaid => {
                cancel_unpaid(uow.as_mut(), &mut transaction, now, &mut events).await?;
                order = load_order(uow.as_mut(), order_id).await?;
            }
            OrderStatus::Processing => {
                let from = order.status;
                order.cancel(now)?;
                stock::release_order(uow.as_mut(), order.id, now).await?;
                let description = format!("Order canceled by {}", party.as_str());
                reverse_payment(uow.as_mut(), &transaction, &order, order.total_price, &description, now, &mut events).await?;
                uow.save_order(&order).await?;
                events.push(status_changed(&order, from));
            }
            from => {
                return Err(EcommerceError::InvalidTransition { order_id, from, to: OrderStatus::Canceled });
            }
        }
        uow.commit().await?;
        self.ctx.notifier.dispatch_all(events);
        info!(order_id = %order_id, by = party.as_str(), "order canceled");
        Ok(order)
    }

    pub async fn detail(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetail> {
        let mut uow = self.ctx.store.begin().await?;
        let order = load_order(uow.as_mut(), order_id).await?;
        acting_party(uow.as_mut(), &order, user_id).await?;
        OrderDetail::load(uow.as_mut(), order).await
    }

    /// Sweep step: completes one overdue delivery. Already-moved orders are left alone.
    pub(crate) async fn complete_if_due(&self, order_id: Uuid) -> Result<bool> {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let mut order = load_order(uow.as_mut(), order_id).await?;
        if !order.is_due(now) {
            return Ok(false);
        }
        let from = order.status;
        order.complete(now)?;
        uow.save_order(&order).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch(status_changed(&order, from));
        Ok(true)
    }
}
