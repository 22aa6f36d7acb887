//! Domain events
//!
//! Collected while a unit of work runs and handed to the notifier only after commit.

use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{OrderStatus, Party};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEvent {
    Transaction(TransactionEvent),
    Order(OrderEvent),
    Refund(RefundEvent),
    Wallet(WalletEvent),
    Payment(PaymentEvent),
}

impl DomainEvent {
    /// NATS subject suffix.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transaction(_) => "transaction",
            Self::Order(_) => "order",
            Self::Refund(_) => "refund",
            Self::Wallet(_) => "wallet",
            Self::Payment(_) => "payment",
        }
    }

    pub fn subject(&self) -> String { format!("marketplace.{}", self.kind()) }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionEvent {
    Created { transaction_id: Uuid, buyer_id: Uuid, invoice: String, total_price: Money },
    Paid { transaction_id: Uuid },
    Canceled { transaction_id: Uuid },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    Shipped { order_id: Uuid, tracking_number: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefundEvent {
    Requested { refund_id: Uuid, order_id: Uuid, awaiting: Party },
    MessagePosted { refund_id: Uuid, author: Party },
    Accepted { refund_id: Uuid, order_id: Uuid },
    Rejected { refund_id: Uuid, order_id: Uuid },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletEvent {
    Debited { wallet_id: Uuid, amount: Money },
    Credited { wallet_id: Uuid, amount: Money },
    Locked { wallet_id: Uuid },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    /// Card rail money has to go back to the buyer; the gateway integration picks this up.
    CardReversalRequested { transaction_id: Uuid, order_id: Uuid, card: String, amount: Money },
}
