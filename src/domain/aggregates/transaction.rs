//! Transaction Aggregate: one checkout, one payment, many orders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{mask_card, Money};
use crate::{EcommerceError, Result};

/// Exactly one payment rail per transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Wallet(Uuid),
    Card(String),
}

impl PaymentMethod {
    pub fn wallet_id(&self) -> Option<Uuid> { match self { Self::Wallet(id) => Some(*id), Self::Card(_) => None } }
    pub fn card_number(&self) -> Option<&str> { match self { Self::Card(n) => Some(n), Self::Wallet(_) => None } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus { AwaitingPayment, Paid, Canceled }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub buyer_id: Uuid,
    /// Marketplace voucher, only when it was actually applied.
    pub voucher_id: Option<Uuid>,
    pub payment: PaymentMethod,
    pub invoice: String,
    pub total_price: Money,
    pub paid_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    /// Payment deadline on the card rail.
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn status(&self) -> TransactionStatus {
        match (self.paid_at, self.canceled_at) {
            (Some(_), _) => TransactionStatus::Paid,
            (None, Some(_)) => TransactionStatus::Canceled,
            (None, None) => TransactionStatus::AwaitingPayment,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status() == TransactionStatus::AwaitingPayment && self.expired_at.is_some_and(|at| at <= now)
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status() != TransactionStatus::AwaitingPayment {
            return Err(EcommerceError::invalid("transaction", "not_payable", "transaction is no longer awaiting payment"));
        }
        self.paid_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status() != TransactionStatus::AwaitingPayment {
            return Err(EcommerceError::invalid("transaction", "not_cancelable", "only unpaid transactions can be canceled"));
        }
        self.canceled_at = Some(now);
        Ok(())
    }

    /// Copy safe to hand back to clients: the card number keeps its last four digits.
    pub fn masked(mut self) -> Self {
        if let PaymentMethod::Card(number) = &mut self.payment {
            *number = mask_card(number);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn transaction(expired_at: Option<DateTime<Utc>>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(), buyer_id: Uuid::new_v4(), voucher_id: None, payment: PaymentMethod::Card("4111111111111111".into()),
            invoice: "INV/20240101/MPL/ABC".into(), total_price: Money::new(10_000), paid_at: None, canceled_at: None,
            expired_at, created_at: Utc::now(),
        }
    }

    #[test]
    fn test_paid_and_canceled_are_exclusive() {
        let now = Utc::now();
        let mut txn = transaction(None);
        txn.mark_paid(now).unwrap();
        assert!(txn.cancel(now).is_err());
        assert_eq!(txn.status(), TransactionStatus::Paid);
        assert!(txn.canceled_at.is_none());
    }

    #[test]
    fn test_overdue() {
        let now = Utc::now();
        let txn = transaction(Some(now));
        assert!(txn.is_overdue(now));
        assert!(!txn.is_overdue(now - Duration::seconds(1)));
        assert!(!transaction(None).is_overdue(now));
    }
}
