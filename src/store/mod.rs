//! Persistence seam.
//!
//! A [`Store`] hands out [`UnitOfWork`]s. Everything read or written through a
//! unit commits together or not at all: dropping a unit without calling
//! [`UnitOfWork::commit`] rolls it back. Reads of rows that are about to be
//! mutated (offers, wallets, vouchers, promotions) lock the row for the rest of
//! the unit.
//!
//! # Implementations
//!
//! - [`PgStore`]: PostgreSQL through `sqlx`
//! - [`MemoryStore`]: in-process tables, used by tests and when no database is configured

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::aggregates::{
    AppliedDiscount, Order, OrderItem, ProductDetail, Promotion, Refund, RefundThread, Shop, Transaction, Voucher, Wallet,
    WalletHistory,
};
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    // Catalog
    async fn shop(&mut self, id: Uuid) -> Result<Option<Shop>>;
    async fn save_shop(&mut self, shop: &Shop) -> Result<()>;
    async fn offer(&mut self, id: Uuid) -> Result<Option<ProductDetail>>;
    async fn save_offer(&mut self, offer: &ProductDetail) -> Result<()>;

    // Discounts
    async fn voucher(&mut self, id: Uuid) -> Result<Option<Voucher>>;
    async fn save_voucher(&mut self, voucher: &Voucher) -> Result<()>;
    /// The promotion running for `product_id` at `now`, if any.
    async fn active_promotion(&mut self, product_id: Uuid, now: DateTime<Utc>) -> Result<Option<Promotion>>;
    async fn save_promotion(&mut self, promotion: &Promotion) -> Result<()>;

    // Transactions and orders
    async fn transaction(&mut self, id: Uuid) -> Result<Option<Transaction>>;
    async fn save_transaction(&mut self, transaction: &Transaction) -> Result<()>;
    /// Unpaid, uncanceled transactions whose payment deadline is at or before `now`.
    async fn overdue_transactions(&mut self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;
    /// Unlocked lookup of the transaction an order belongs to, so callers can
    /// lock the transaction before its orders.
    async fn order_transaction_id(&mut self, order_id: Uuid) -> Result<Option<Uuid>>;
    async fn order(&mut self, id: Uuid) -> Result<Option<Order>>;
    async fn save_order(&mut self, order: &Order) -> Result<()>;
    async fn orders_of_transaction(&mut self, transaction_id: Uuid) -> Result<Vec<Order>>;
    /// On-delivery orders whose arrival deadline is at or before `now`.
    async fn due_deliveries(&mut self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;
    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<()>;
    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>>;
    async fn insert_applied_discount(&mut self, discount: &AppliedDiscount) -> Result<()>;
    async fn applied_discounts(&mut self, order_id: Uuid) -> Result<Vec<AppliedDiscount>>;

    // Wallets
    async fn wallet(&mut self, id: Uuid) -> Result<Option<Wallet>>;
    async fn wallet_by_user(&mut self, user_id: Uuid) -> Result<Option<Wallet>>;
    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<()>;
    async fn insert_wallet_history(&mut self, entry: &WalletHistory) -> Result<()>;
    /// Oldest first.
    async fn wallet_history(&mut self, wallet_id: Uuid) -> Result<Vec<WalletHistory>>;

    // Refunds
    async fn refund(&mut self, id: Uuid) -> Result<Option<Refund>>;
    /// The unresolved refund of `order_id`, if any.
    async fn active_refund(&mut self, order_id: Uuid) -> Result<Option<Refund>>;
    async fn save_refund(&mut self, refund: &Refund) -> Result<()>;
    /// Rejected at or before `before` and not yet handed back.
    async fn settled_rejections(&mut self, before: DateTime<Utc>) -> Result<Vec<Uuid>>;
    async fn insert_refund_message(&mut self, message: &RefundThread) -> Result<()>;
    /// Creation order.
    async fn refund_messages(&mut self, refund_id: Uuid) -> Result<Vec<RefundThread>>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
