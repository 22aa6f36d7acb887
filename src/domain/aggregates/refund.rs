//! Refund Aggregate and its dispute thread

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::order::{OrderStatus, Party};
use crate::{EcommerceError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub order_id: Uuid,
    pub requested_by: Party,
    /// Whose move it is: only this party may accept or reject.
    pub awaiting: Party,
    pub reason: String,
    pub image_url: Option<String>,
    /// Order status before the refund was opened.
    pub previous_status: OrderStatus,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    /// Set once the rejection sweep handed the order back.
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Refund {
    pub fn open(order_id: Uuid, requested_by: Party, reason: String, image_url: Option<String>, previous_status: OrderStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(), order_id, requested_by, awaiting: requested_by.other(), reason, image_url, previous_status,
            accepted_at: None, rejected_at: None, rejection_reason: None, processed_at: None, created_at: now, updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool { self.accepted_at.is_none() && self.rejected_at.is_none() }

    fn ensure_actor(&self, actor: Party) -> Result<()> {
        if !self.is_open() { return Err(EcommerceError::RefundClosed(self.id)); }
        if actor != self.awaiting { return Err(EcommerceError::Unauthorized("refund is awaiting the other party")); }
        Ok(())
    }

    pub fn accept(&mut self, actor: Party, now: DateTime<Utc>) -> Result<()> {
        self.ensure_actor(actor)?;
        self.accepted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(&mut self, actor: Party, reason: String, now: DateTime<Utc>) -> Result<()> {
        self.ensure_actor(actor)?;
        self.rejected_at = Some(now);
        self.rejection_reason = Some(reason);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.processed_at = Some(now);
        self.updated_at = now;
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefundThread {
    pub id: Uuid,
    pub refund_id: Uuid,
    pub author_id: Uuid,
    pub author: Party,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buyer_refund_awaits_seller() {
        let refund = Refund::open(Uuid::new_v4(), Party::Buyer, "broken".into(), None, OrderStatus::Completed, Utc::now());
        assert_eq!(refund.awaiting, Party::Seller);
        let refund = Refund::open(Uuid::new_v4(), Party::Seller, "lost in transit".into(), None, OrderStatus::OnDelivery, Utc::now());
        assert_eq!(refund.awaiting, Party::Buyer);
    }

    #[test]
    fn test_only_awaiting_party_resolves() {
        let now = Utc::now();
        let mut refund = Refund::open(Uuid::new_v4(), Party::Buyer, "broken".into(), None, OrderStatus::Completed, now);
        assert!(matches!(refund.accept(Party::Buyer, now), Err(EcommerceError::Unauthorized(_))));
        refund.reject(Party::Seller, "works fine".into(), now).unwrap();
        assert!(!refund.is_open());
        assert!(matches!(refund.accept(Party::Seller, now), Err(EcommerceError::RefundClosed(_))));
    }
}
