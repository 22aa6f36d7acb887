//! Order Aggregate

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::discount::DiscountSource;
use crate::domain::value_objects::Money;
use crate::{EcommerceError, Result};

/// Order lifecycle. The main line only moves forward; cancel and refund are side branches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Unpaid,
    Processing,
    OnDelivery,
    Completed,
    Canceled,
    RefundRequested,
    RefundAccepted,
    RefundRejected,
}

impl OrderStatus {
    pub fn code(self) -> i16 {
        match self {
            Self::Unpaid => 1,
            Self::Processing => 2,
            Self::OnDelivery => 3,
            Self::Completed => 4,
            Self::Canceled => 5,
            Self::RefundRequested => 6,
            Self::RefundAccepted => 7,
            Self::RefundRejected => 8,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Some(match code {
            1 => Self::Unpaid,
            2 => Self::Processing,
            3 => Self::OnDelivery,
            4 => Self::Completed,
            5 => Self::Canceled,
            6 => Self::RefundRequested,
            7 => Self::RefundAccepted,
            8 => Self::RefundRejected,
            _ => return None,
        })
    }

    /// The single source of truth for legal moves.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Unpaid, Processing)
                | (Unpaid, Canceled)
                | (Processing, OnDelivery)
                | (Processing, Canceled)
                | (OnDelivery, Completed)
                | (OnDelivery, RefundRequested)
                | (Completed, RefundRequested)
                | (RefundRequested, RefundAccepted)
                | (RefundRequested, RefundRejected)
                | (RefundRejected, OnDelivery)
                | (RefundRejected, Completed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unpaid => "unpaid",
            Self::Processing => "processing",
            Self::OnDelivery => "on_delivery",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::RefundRequested => "refund_requested",
            Self::RefundAccepted => "refund_accepted",
            Self::RefundRejected => "refund_rejected",
        };
        f.write_str(name)
    }
}

/// The two sides of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party { Buyer, Seller }

impl Party {
    pub fn other(self) -> Party { match self { Self::Buyer => Self::Seller, Self::Seller => Self::Buyer } }
    pub fn as_str(self) -> &'static str { match self { Self::Buyer => "buyer", Self::Seller => "seller" } }
    pub fn parse(value: &str) -> Option<Party> {
        match value { "buyer" => Some(Self::Buyer), "seller" => Some(Self::Seller), _ => None }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub shop_id: Uuid,
    pub buyer_id: Uuid,
    pub courier_id: Uuid,
    pub voucher_id: Option<Uuid>,
    pub status: OrderStatus,
    pub total_price: Money,
    pub delivery_fee: Money,
    pub tracking_number: Option<String>,
    /// Arrival deadline; the delivery sweep completes the order once it passes.
    pub arrived_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub offer_id: Uuid,
    pub quantity: i32,
    /// Captured at purchase, never recomputed.
    pub unit_price: Money,
    pub total_price: Money,
    pub review_done: bool,
}

/// Audit row for a discount applied at checkout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Option<Uuid>,
    pub source: DiscountSource,
    pub amount: Money,
}

impl AppliedDiscount {
    pub fn new(order_id: Uuid, order_item_id: Option<Uuid>, source: DiscountSource, amount: Money) -> Self {
        Self { id: Uuid::now_v7(), order_id, order_item_id, source, amount }
    }
}

impl Order {
    fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EcommerceError::InvalidTransition { order_id: self.id, from: self.status, to: next });
        }
        self.status = next;
        self.touch(now);
        Ok(())
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<()> { self.transition(OrderStatus::Processing, now) }

    pub fn ship(&mut self, tracking_number: String, arrive_by: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        self.transition(OrderStatus::OnDelivery, now)?;
        self.tracking_number = Some(tracking_number);
        self.arrived_at = Some(arrive_by);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(OrderStatus::Completed, now)?;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> { self.transition(OrderStatus::Canceled, now) }

    /// Moves into refund-requested and returns the status to come back to on rejection.
    pub fn open_refund(&mut self, now: DateTime<Utc>) -> Result<OrderStatus> {
        let previous = self.status;
        self.transition(OrderStatus::RefundRequested, now)?;
        Ok(previous)
    }

    pub fn accept_refund(&mut self, now: DateTime<Utc>) -> Result<()> { self.transition(OrderStatus::RefundAccepted, now) }
    pub fn reject_refund(&mut self, now: DateTime<Utc>) -> Result<()> { self.transition(OrderStatus::RefundRejected, now) }
    pub fn restore_after_rejection(&mut self, previous: OrderStatus, now: DateTime<Utc>) -> Result<()> { self.transition(previous, now) }

    /// Arrival deadline has passed while still on delivery.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::OnDelivery && self.arrived_at.is_some_and(|at| at <= now)
    }

    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }
}
