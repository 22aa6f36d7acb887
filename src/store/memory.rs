//! In-memory store.
//!
//! One mutex guards every table, so a unit of work is serialized against all
//! others. The unit keeps a snapshot taken at `begin` and puts it back when it
//! is dropped uncommitted.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, UnitOfWork};
use crate::domain::aggregates::{
    AppliedDiscount, Order, OrderItem, OrderStatus, ProductDetail, Promotion, Refund, RefundThread, Shop, Transaction,
    Voucher, Wallet, WalletHistory,
};
use crate::Result;

#[derive(Clone, Default)]
struct Tables {
    shops: HashMap<Uuid, Shop>,
    offers: HashMap<Uuid, ProductDetail>,
    vouchers: HashMap<Uuid, Voucher>,
    promotions: HashMap<Uuid, Promotion>,
    transactions: HashMap<Uuid, Transaction>,
    orders: HashMap<Uuid, Order>,
    order_items: Vec<OrderItem>,
    order_discounts: Vec<AppliedDiscount>,
    wallets: HashMap<Uuid, Wallet>,
    wallet_histories: Vec<WalletHistory>,
    refunds: HashMap<Uuid, Refund>,
    refund_threads: Vec<RefundThread>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.tables.clone().lock_owned().await;
        let snapshot = Some(guard.clone());
        Ok(Box::new(MemoryUnitOfWork { guard, snapshot }))
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    /// `None` once committed.
    snapshot: Option<Tables>,
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

fn sorted_by_created<T, K: Ord>(mut rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    rows.sort_by_key(key);
    rows
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn shop(&mut self, id: Uuid) -> Result<Option<Shop>> {
        Ok(self.guard.shops.get(&id).cloned())
    }

    async fn save_shop(&mut self, shop: &Shop) -> Result<()> {
        self.guard.shops.insert(shop.id, shop.clone());
        Ok(())
    }

    async fn offer(&mut self, id: Uuid) -> Result<Option<ProductDetail>> {
        Ok(self.guard.offers.get(&id).cloned())
    }

    async fn save_offer(&mut self, offer: &ProductDetail) -> Result<()> {
        self.guard.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn voucher(&mut self, id: Uuid) -> Result<Option<Voucher>> {
        Ok(self.guard.vouchers.get(&id).cloned())
    }

    async fn save_voucher(&mut self, voucher: &Voucher) -> Result<()> {
        self.guard.vouchers.insert(voucher.id, voucher.clone());
        Ok(())
    }

    async fn active_promotion(&mut self, product_id: Uuid, now: DateTime<Utc>) -> Result<Option<Promotion>> {
        Ok(self
            .guard
            .promotions
            .values()
            .filter(|p| p.product_id == product_id && p.is_active(now))
            .min_by_key(|p| (p.actived_date, p.id))
            .cloned())
    }

    async fn save_promotion(&mut self, promotion: &Promotion) -> Result<()> {
        self.guard.promotions.insert(promotion.id, promotion.clone());
        Ok(())
    }

    async fn transaction(&mut self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.guard.transactions.get(&id).cloned())
    }

    async fn save_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.guard.transactions.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn overdue_transactions(&mut self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = self.guard.transactions.values().filter(|t| t.is_overdue(now)).cloned().collect();
        Ok(sorted_by_created(rows, |t: &Transaction| t.created_at).into_iter().map(|t| t.id).collect())
    }

    async fn order_transaction_id(&mut self, order_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self.guard.orders.get(&order_id).map(|o| o.transaction_id))
    }

    async fn order(&mut self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.guard.orders.get(&id).cloned())
    }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        self.guard.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn orders_of_transaction(&mut self, transaction_id: Uuid) -> Result<Vec<Order>> {
        let rows = self.guard.orders.values().filter(|o| o.transaction_id == transaction_id).cloned().collect();
        Ok(sorted_by_created(rows, |o: &Order| (o.created_at, o.id)))
    }

    async fn due_deliveries(&mut self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = self.guard.orders.values().filter(|o| o.is_due(now)).cloned().collect();
        Ok(sorted_by_created(rows, |o: &Order| o.arrived_at).into_iter().map(|o| o.id).collect())
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<()> {
        self.guard.order_items.push(item.clone());
        Ok(())
    }

    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        Ok(self.guard.order_items.iter().filter(|i| i.order_id == order_id).cloned().collect())
    }

    async fn insert_applied_discount(&mut self, discount: &AppliedDiscount) -> Result<()> {
        self.guard.order_discounts.push(discount.clone());
        Ok(())
    }

    async fn applied_discounts(&mut self, order_id: Uuid) -> Result<Vec<AppliedDiscount>> {
        Ok(self.guard.order_discounts.iter().filter(|d| d.order_id == order_id).cloned().collect())
    }

    async fn wallet(&mut self, id: Uuid) -> Result<Option<Wallet>> {
        Ok(self.guard.wallets.get(&id).cloned())
    }

    async fn wallet_by_user(&mut self, user_id: Uuid) -> Result<Option<Wallet>> {
        Ok(self.guard.wallets.values().find(|w| w.user_id == user_id).cloned())
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        self.guard.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn insert_wallet_history(&mut self, entry: &WalletHistory) -> Result<()> {
        self.guard.wallet_histories.push(entry.clone());
        Ok(())
    }

    async fn wallet_history(&mut self, wallet_id: Uuid) -> Result<Vec<WalletHistory>> {
        Ok(self.guard.wallet_histories.iter().filter(|h| h.wallet_id == wallet_id).cloned().collect())
    }

    async fn refund(&mut self, id: Uuid) -> Result<Option<Refund>> {
        Ok(self.guard.refunds.get(&id).cloned())
    }

    async fn active_refund(&mut self, order_id: Uuid) -> Result<Option<Refund>> {
        Ok(self.guard.refunds.values().find(|r| r.order_id == order_id && r.is_open()).cloned())
    }

    async fn save_refund(&mut self, refund: &Refund) -> Result<()> {
        self.guard.refunds.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn settled_rejections(&mut self, before: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = self
            .guard
            .refunds
            .values()
            .filter(|r| r.processed_at.is_none() && r.rejected_at.is_some_and(|at| at <= before))
            .cloned()
            .collect();
        Ok(sorted_by_created(rows, |r: &Refund| r.rejected_at).into_iter().map(|r| r.id).collect())
    }

    async fn insert_refund_message(&mut self, message: &RefundThread) -> Result<()> {
        self.guard.refund_threads.push(message.clone());
        Ok(())
    }

    async fn refund_messages(&mut self, refund_id: Uuid) -> Result<Vec<RefundThread>> {
        Ok(self.guard.refund_threads.iter().filter(|m| m.refund_id == refund_id).cloned().collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut unit = self;
        unit.snapshot = None;
        Ok(())
    }
}
