//! Payment settlement: the card gateway callback, buyer cancellation of unpaid
//! transactions, and the reversal path shared by cancellations and refunds.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::orders::OrderDetail;
use super::wallet as ledger;
use super::{stock, Context};
use crate::config::CardGatewayConfig;
use crate::domain::aggregates::{Order, OrderStatus, PaymentMethod, Transaction, TransactionStatus};
use crate::domain::events::{DomainEvent, OrderEvent, PaymentEvent, TransactionEvent};
use crate::domain::value_objects::{mask_card, Money};
use crate::store::UnitOfWork;
use crate::{EcommerceError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Gateway status that settles a transaction. Anything else cancels it.
pub const STATUS_PAID: &str = "TXN_PAID";

/// Asynchronous notification from the card gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardCallback {
    pub txn_id: String,
    pub amount: i64,
    pub merchant_code: String,
    pub status: String,
    #[serde(default)]
    pub message: String,
    pub signature: String,
}

impl CardCallback {
    fn signing_input(&self) -> String {
        format!("{}:{}:{}:{}:{}", self.txn_id, self.amount, self.merchant_code, self.status, self.message)
    }
}

/// Hex HMAC-SHA256 over `txn_id:amount:merchant_code:status:message`.
pub fn callback_signature(secret: &str, callback: &CardCallback) -> Result<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).map_err(|_| EcommerceError::InvalidSignature)?;
    mac.update(callback.signing_input().as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn verify_signature(secret: &str, callback: &CardCallback) -> Result<()> {
    let provided = hex::decode(callback.signature.trim()).map_err(|_| EcommerceError::InvalidSignature)?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).map_err(|_| EcommerceError::InvalidSignature)?;
    mac.update(callback.signing_input().as_bytes());
    mac.verify_slice(&provided).map_err(|_| EcommerceError::InvalidSignature)
}

/// Cancels an unpaid transaction with all of its orders and puts their stock back.
pub(crate) async fn cancel_unpaid(
    uow: &mut dyn UnitOfWork,
    transaction: &mut Transaction,
    now: DateTime<Utc>,
    events: &mut Vec<DomainEvent>,
) -> Result<()> {
    transaction.cancel(now)?;
    for mut order in uow.orders_of_transaction(transaction.id).await? {
        if order.status != OrderStatus::Unpaid {
            continue;
        }
        order.cancel(now)?;
        stock::release_order(uow, order.id, now).await?;
        uow.save_order(&order).await?;
        events.push(DomainEvent::Order(OrderEvent::StatusChanged { order_id: order.id, from: OrderStatus::Unpaid, to: OrderStatus::Canceled }));
    }
    uow.save_transaction(transaction).await?;
    events.push(DomainEvent::Transaction(TransactionEvent::Canceled { transaction_id: transaction.id }));
    Ok(())
}

/// Sends `amount` of an order back to the buyer over the rail it was paid with.
pub(crate) async fn reverse_payment(
    uow: &mut dyn UnitOfWork,
    transaction: &Transaction,
    order: &Order,
    amount: Money,
    description: &str,
    now: DateTime<Utc>,
    events: &mut Vec<DomainEvent>,
) -> Result<()> {
    match &transaction.payment {
        PaymentMethod::Wallet(wallet_id) => {
            let from = format!("invoice:{}", transaction.invoice);
            ledger::credit(uow, *wallet_id, amount, &from, description, now, events).await?;
        }
        PaymentMethod::Card(card_number) => {
            info!(order_id = %order.id, amount = %amount, "card reversal requested");
            events.push(DomainEvent::Payment(PaymentEvent::CardReversalRequested {
                transaction_id: transaction.id,
                order_id: order.id,
                card: mask_card(card_number),
                amount,
            }));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionDetail {
    pub transaction: Transaction,
    pub status: TransactionStatus,
    pub orders: Vec<OrderDetail>,
}

#[derive(Clone)]
pub struct PaymentService {
    ctx: Context,
    gateway: CardGatewayConfig,
}

impl PaymentService {
    pub(crate) fn new(ctx: Context, gateway: CardGatewayConfig) -> Self {
        Self { ctx, gateway }
    }

    /// Settles or cancels a card transaction. The signature is checked before anything is read.
    #[instrument(skip(self, callback), fields(txn_id = %callback.txn_id, status = %callback.status))]
    pub async fn card_callback(&self, callback: CardCallback) -> Result<Transaction> {
        if let Err(e) = verify_signature(&self.gateway.api_secret, &callback) {
            warn!("card callback rejected: bad signature");
            return Err(e);
        }
        let transaction_id = Uuid::parse_str(&callback.txn_id)
            .map_err(|_| EcommerceError::invalid("txn_id", "format", "txn_id is not a transaction reference"))?;
        if callback.merchant_code != self.gateway.merchant_code {
            return Err(EcommerceError::invalid("merchant_code", "mismatch", "merchant code does not match"));
        }

        let now = self.ctx.clock.now();
        let mut events = Vec::new();
        let mut uow = self.ctx.store.begin().await?;
        let mut transaction = uow
            .transaction(transaction_id)
            .await?
            .ok_or_else(|| EcommerceError::not_found("transaction", transaction_id))?;
        if transaction.payment.card_number().is_none() {
            return Err(EcommerceError::invalid("txn_id", "not_card", "transaction is not paid by card"));
        }
        if callback.amount != transaction.total_price.amount() {
            return Err(EcommerceError::invalid("amount", "mismatch", "amount does not match the transaction total"));
        }

        match transaction.status() {
            TransactionStatus::Paid => {
                info!(transaction_id = %transaction_id, "duplicate callback for a paid transaction");
                return Ok(transaction);
            }
            TransactionStatus::Canceled => {
                return Err(EcommerceError::invalid("txn_id", "canceled", "transaction has been canceled"));
            }
            TransactionStatus::AwaitingPayment => {}
        }

        if callback.status == STATUS_PAID {
            transaction.mark_paid(now)?;
            for mut order in uow.orders_of_transaction(transaction_id).await? {
                order.mark_paid(now)?;
                uow.save_order(&order).await?;
                events.push(DomainEvent::Order(OrderEvent::StatusChanged { order_id: order.id, from: OrderStatus::Unpaid, to: OrderStatus::Processing }));
            }
            uow.save_transaction(&transaction).await?;
            events.push(DomainEvent::Transaction(TransactionEvent::Paid { transaction_id }));
            info!(transaction_id = %transaction_id, "card payment settled");
        } else {
            cancel_unpaid(uow.as_mut(), &mut transaction, now, &mut events).await?;
            info!(transaction_id = %transaction_id, message = %callback.message, "card payment failed, transaction canceled");
        }
        uow.commit().await?;
        self.ctx.notifier.dispatch_all(events);
        Ok(transaction)
    }

    #[instrument(skip(self))]
    pub async fn cancel_transaction(&self, buyer_id: Uuid, transaction_id: Uuid) -> Result<Transaction> {
        let now = self.ctx.clock.now();
        let mut events = Vec::new();
        let mut uow = self.ctx.store.begin().await?;
        let mut transaction = uow
            .transaction(transaction_id)
            .await?
            .ok_or_else(|| EcommerceError::not_found("transaction", transaction_id))?;
        if transaction.buyer_id != buyer_id {
            return Err(EcommerceError::Unauthorized("transaction belongs to another buyer"));
        }
        cancel_unpaid(uow.as_mut(), &mut transaction, now, &mut events).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch_all(events);
        info!(transaction_id = %transaction_id, "transaction canceled by buyer");
        Ok(transaction)
    }

    pub async fn transaction_detail(&self, buyer_id: Uuid, transaction_id: Uuid) -> Result<TransactionDetail> {
        let mut uow = self.ctx.store.begin().await?;
        let transaction = uow
            .transaction(transaction_id)
            .await?
            .ok_or_else(|| EcommerceError::not_found("transaction", transaction_id))?;
        if transaction.buyer_id != buyer_id {
            return Err(EcommerceError::Unauthorized("transaction belongs to another buyer"));
        }
        let mut orders = Vec::new();
        for order in uow.orders_of_transaction(transaction_id).await? {
            orders.push(OrderDetail::load(uow.as_mut(), order).await?);
        }
        Ok(TransactionDetail { status: transaction.status(), transaction: transaction.masked(), orders })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(status: &str) -> CardCallback {
        CardCallback {
            txn_id: Uuid::nil().to_string(),
            amount: 109_000,
            merchant_code: "MPL".into(),
            status: status.into(),
            message: "ok".into(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_signature_round_trip() {
        let mut cb = callback(STATUS_PAID);
        cb.signature = callback_signature("secret", &cb).unwrap();
        assert_eq!(cb.signature.len(), 64);
        assert!(verify_signature("secret", &cb).is_ok());
        assert!(matches!(verify_signature("other", &cb), Err(EcommerceError::InvalidSignature)));
    }

    #[test]
    fn test_tampered_status_fails() {
        let mut cb = callback("TXN_FAILED");
        cb.signature = callback_signature("secret", &cb).unwrap();
        cb.status = STATUS_PAID.into();
        assert!(matches!(verify_signature("secret", &cb), Err(EcommerceError::InvalidSignature)));
    }

    #[test]
    fn test_garbage_signature() {
        let mut cb = callback(STATUS_PAID);
        cb.signature = "not-hex".into();
        assert!(matches!(verify_signature("secret", &cb), Err(EcommerceError::InvalidSignature)));
    }
}
