//! Refund disputes.
//!
//! A refund is opened by one party and awaits the other. Accepting returns the
//! stock and the money and ends the order; rejecting parks the order in
//! refund-rejected until the rejection sweep hands it back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::orders::{acting_party, load_order, status_changed};
use super::payment::reverse_payment;
use super::{stock, Context};
use crate::config::OrderPolicy;
use crate::domain::aggregates::{Order, OrderStatus, Party, Refund, RefundThread};
use crate::domain::events::{DomainEvent, RefundEvent};
use crate::store::UnitOfWork;
use crate::{EcommerceError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RefundRequest {
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
    #[validate(url)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RefundMessage {
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundDetail {
    pub refund: Refund,
    pub messages: Vec<RefundThread>,
}

#[derive(Clone)]
pub struct RefundService {
    ctx: Context,
    policy: OrderPolicy,
}

impl RefundService {
    pub(crate) fn new(ctx: Context, policy: OrderPolicy) -> Self {
        Self { ctx, policy }
    }

    async fn load(uow: &mut dyn UnitOfWork, refund_id: Uuid, user_id: Uuid) -> Result<(Refund, Order, Party)> {
        let refund = uow.refund(refund_id).await?.ok_or_else(|| EcommerceError::not_found("refund", refund_id))?;
        let order = load_order(uow, refund.order_id).await?;
        let party = acting_party(uow, &order, user_id).await?;
        Ok((refund, order, party))
    }

    /// Buyers may ask while the parcel is travelling or within the refund window
    /// after completion; sellers only while it is travelling.
    fn ensure_refundable(&self, order: &Order, party: Party, now: DateTime<Utc>) -> Result<()> {
        match (party, order.status) {
            (_, OrderStatus::OnDelivery) => Ok(()),
            (Party::Buyer, OrderStatus::Completed) => {
                let closes = order.completed_at.map(|at| at + self.policy.refund_window);
                if closes.is_some_and(|closes| now <= closes) {
                    Ok(())
                } else {
                    Err(EcommerceError::RefundWindowClosed(order.id))
                }
            }
            (_, from) => Err(EcommerceError::InvalidTransition { order_id: order.id, from, to: OrderStatus::RefundRequested }),
        }
    }

    #[instrument(skip(self, request))]
    pub async fn request(&self, user_id: Uuid, order_id: Uuid, request: RefundRequest) -> Result<Refund> {
        request.validate()?;
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let mut order = load_order(uow.as_mut(), order_id).await?;
        let party = acting_party(uow.as_mut(), &order, user_id).await?;
        if uow.active_refund(order_id).await?.is_some() {
            return Err(EcommerceError::RefundAlreadyOpen(order_id));
        }
        self.ensure_refundable(&order, party, now)?;

        let previous = order.open_refund(now)?;
        let refund = Refund::open(order_id, party, request.reason, request.image_url, previous, now);
        uow.save_order(&order).await?;
        uow.save_refund(&refund).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch_all([
            status_changed(&order, previous),
            DomainEvent::Refund(RefundEvent::Requested { refund_id: refund.id, order_id, awaiting: refund.awaiting }),
        ]);
        info!(refund_id = %refund.id, order_id = %order_id, by = party.as_str(), "refund requested");
        Ok(refund)
    }

    #[instrument(skip(self, message))]
    pub async fn post_message(&self, user_id: Uuid, refund_id: Uuid, message: RefundMessage) -> Result<RefundThread> {
        message.validate()?;
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let (refund, _, party) = Self::load(uow.as_mut(), refund_id, user_id).await?;
        if !refund.is_open() {
            return Err(EcommerceError::RefundClosed(refund_id));
        }
        let entry = RefundThread { id: Uuid::now_v7(), refund_id, author_id: user_id, author: party, message: message.message, created_at: now };
        uow.insert_refund_message(&entry).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch(DomainEvent::Refund(RefundEvent::MessagePosted { refund_id, author: party }));
        Ok(entry)
    }

    pub async fn messages(&self, user_id: Uuid, refund_id: Uuid) -> Result<Vec<RefundThread>> {
        let mut uow = self.ctx.store.begin().await?;
        Self::load(uow.as_mut(), refund_id, user_id).await?;
        uow.refund_messages(refund_id).await
    }

    pub async fn detail(&self, user_id: Uuid, refund_id: Uuid) -> Result<RefundDetail> {
        let mut uow = self.ctx.store.begin().await?;
        let (refund, _, _) = Self::load(uow.as_mut(), refund_id, user_id).await?;
        let messages = uow.refund_messages(refund_id).await?;
        Ok(RefundDetail { refund, messages })
    }

    /// The awaiting party agrees: stock goes back, the buyer is paid back, the order ends.
    #[instrument(skip(self))]
    pub async fn accept(&self, user_id: Uuid, refund_id: Uuid) -> Result<Refund> {
        let now = self.ctx.clock.now();
        let mut events = Vec::new();
        let mut uow = self.ctx.store.begin().await?;
        let (mut refund, mut order, party) = Self::load(uow.as_mut(), refund_id, user_id).await?;
        refund.accept(party, now)?;
        let from = order.status;
        order.accept_refund(now)?;

        let transaction = uow
            .transaction(order.transaction_id)
            .await?
            .ok_or_else(|| EcommerceError::not_found("transaction", order.transaction_id))?;
        stock::release_order(uow.as_mut(), order.id, now).await?;
        reverse_payment(uow.as_mut(), &transaction, &order, order.total_price, "Refund accepted", now, &mut events).await?;
        uow.save_order(&order).await?;
        uow.save_refund(&refund).await?;
        uow.commit().await?;

        events.push(status_changed(&order, from));
        events.push(DomainEvent::Refund(RefundEvent::Accepted { refund_id, order_id: order.id }));
        self.ctx.notifier.dispatch_all(events);
        info!(refund_id = %refund_id, order_id = %order.id, amount = %order.total_price, "refund accepted");
        Ok(refund)
    }

    #[instrument(skip(self, reason))]
    pub async fn reject(&self, user_id: Uuid, refund_id: Uuid, reason: RefundMessage) -> Result<Refund> {
        reason.validate()?;
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let (mut refund, mut order, party) = Self::load(uow.as_mut(), refund_id, user_id).await?;
        refund.reject(party, reason.message, now)?;
        let from = order.status;
        order.reject_refund(now)?;
        uow.save_order(&order).await?;
        uow.save_refund(&refund).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch_all([
            status_changed(&order, from),
            DomainEvent::Refund(RefundEvent::Rejected { refund_id, order_id: order.id }),
        ]);
        info!(refund_id = %refund_id, order_id = %order.id, "refund rejected");
        Ok(refund)
    }

    /// Sweep step: returns the order of a rejected refund to where it was before.
    pub(crate) async fn restore_if_settled(&self, refund_id: Uuid) -> Result<bool> {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let mut refund = uow.refund(refund_id).await?.ok_or_else(|| EcommerceError::not_found("refund", refund_id))?;
        let settled = refund.rejected_at.is_some_and(|at| at + self.policy.refund_rejection_grace <= now);
        if refund.processed_at.is_some() || !settled {
            return Ok(false);
        }
        let mut order = load_order(uow.as_mut(), refund.order_id).await?;
        let from = order.status;
        order.restore_after_rejection(refund.previous_status, now)?;
        refund.mark_processed(now);
        uow.save_order(&order).await?;
        uow.save_refund(&refund).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch(status_changed(&order, from));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        let ok = RefundRequest { reason: "arrived broken".into(), image_url: Some("https://img.example.com/1.jpg".into()) };
        assert!(ok.validate().is_ok());
        let blank = RefundRequest { reason: String::new(), image_url: None };
        assert!(blank.validate().is_err());
        let bad_url = RefundRequest { reason: "broken".into(), image_url: Some("not a url".into()) };
        assert!(bad_url.validate().is_err());
    }
}
