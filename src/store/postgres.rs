//! PostgreSQL store.
//!
//! A unit of work is a `sqlx::Transaction`; dropping it without commit rolls
//! back. Rows that are about to change are read with `FOR UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{Postgres, Transaction as PgTransaction};
use uuid::Uuid;

use super::{Store, UnitOfWork};
use crate::domain::aggregates::{
    AppliedDiscount, DiscountRule, DiscountSource, Order, OrderItem, OrderStatus, Party, PaymentMethod, ProductCondition,
    ProductDetail, Promotion, Refund, RefundThread, Shop, Transaction, Voucher, Wallet, WalletHistory,
};
use crate::domain::value_objects::{Address, Money};
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EcommerceError::StorageError(e.to_string()))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

struct PgUnitOfWork {
    tx: PgTransaction<'static, Postgres>,
}

fn corrupt(table: &str, column: &str, value: impl std::fmt::Display) -> EcommerceError {
    EcommerceError::StorageError(format!("unexpected {table}.{column} value {value}"))
}

fn party(table: &str, column: &str, value: &str) -> Result<Party> {
    Party::parse(value).ok_or_else(|| corrupt(table, column, value))
}

fn status(table: &str, column: &str, code: i16) -> Result<OrderStatus> {
    OrderStatus::from_code(code).ok_or_else(|| corrupt(table, column, code))
}

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
struct ShopRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    address: Json<Address>,
}

impl From<ShopRow> for Shop {
    fn from(r: ShopRow) -> Self {
        Shop { id: r.id, owner_id: r.owner_id, name: r.name, address: r.address.0 }
    }
}

#[derive(sqlx::FromRow)]
struct OfferRow {
    id: Uuid,
    product_id: Uuid,
    shop_id: Uuid,
    price: i64,
    stock: i32,
    weight: i32,
    size: String,
    hazardous: bool,
    condition: String,
    bulk_price: bool,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OfferRow> for ProductDetail {
    type Error = EcommerceError;
    fn try_from(r: OfferRow) -> Result<Self> {
        let condition = ProductCondition::parse(&r.condition).ok_or_else(|| corrupt("product_details", "condition", &r.condition))?;
        Ok(ProductDetail {
            id: r.id, product_id: r.product_id, shop_id: r.shop_id, price: Money::new(r.price), stock: r.stock,
            weight: r.weight, size: r.size, hazardous: r.hazardous, condition, bulk_price: r.bulk_price, updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VoucherRow {
    id: Uuid,
    shop_id: Option<Uuid>,
    code: String,
    quota: i32,
    actived_date: DateTime<Utc>,
    expired_date: DateTime<Utc>,
    percentage: Option<Decimal>,
    amount: Option<i64>,
    min_product_price: i64,
    max_discount_price: i64,
}

impl TryFrom<VoucherRow> for Voucher {
    type Error = EcommerceError;
    fn try_from(r: VoucherRow) -> Result<Self> {
        let rule = DiscountRule::from_parts(r.percentage, r.amount.map(Money::new), Money::new(r.min_product_price), Money::new(r.max_discount_price))
            .map_err(|_| corrupt("vouchers", "discount", r.id))?;
        Ok(Voucher { id: r.id, shop_id: r.shop_id, code: r.code, quota: r.quota, actived_date: r.actived_date, expired_date: r.expired_date, rule })
    }
}

#[derive(sqlx::FromRow)]
struct PromotionRow {
    id: Uuid,
    shop_id: Uuid,
    product_id: Uuid,
    name: String,
    quota: i32,
    max_quantity: i32,
    actived_date: DateTime<Utc>,
    expired_date: DateTime<Utc>,
    percentage: Option<Decimal>,
    amount: Option<i64>,
    min_product_price: i64,
    max_discount_price: i64,
}

impl TryFrom<PromotionRow> for Promotion {
    type Error = EcommerceError;
    fn try_from(r: PromotionRow) -> Result<Self> {
        let rule = DiscountRule::from_parts(r.percentage, r.amount.map(Money::new), Money::new(r.min_product_price), Money::new(r.max_discount_price))
            .map_err(|_| corrupt("promotions", "discount", r.id))?;
        Ok(Promotion {
            id: r.id, shop_id: r.shop_id, product_id: r.product_id, name: r.name, quota: r.quota, max_quantity: r.max_quantity,
            actived_date: r.actived_date, expired_date: r.expired_date, rule,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    buyer_id: Uuid,
    voucher_id: Option<Uuid>,
    wallet_id: Option<Uuid>,
    card_number: Option<String>,
    invoice: String,
    total_price: i64,
    paid_at: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = EcommerceError;
    fn try_from(r: TransactionRow) -> Result<Self> {
        let payment = match (r.wallet_id, r.card_number) {
            (Some(wallet), None) => PaymentMethod::Wallet(wallet),
            (None, Some(card)) => PaymentMethod::Card(card),
            _ => return Err(corrupt("transactions", "payment", r.id)),
        };
        Ok(Transaction {
            id: r.id, buyer_id: r.buyer_id, voucher_id: r.voucher_id, payment, invoice: r.invoice, total_price: Money::new(r.total_price),
            paid_at: r.paid_at, canceled_at: r.canceled_at, expired_at: r.expired_at, created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    transaction_id: Uuid,
    shop_id: Uuid,
    buyer_id: Uuid,
    courier_id: Uuid,
    voucher_id: Option<Uuid>,
    status: i16,
    total_price: i64,
    delivery_fee: i64,
    tracking_number: Option<String>,
    arrived_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = EcommerceError;
    fn try_from(r: OrderRow) -> Result<Self> {
        Ok(Order {
            id: r.id, transaction_id: r.transaction_id, shop_id: r.shop_id, buyer_id: r.buyer_id, courier_id: r.courier_id,
            voucher_id: r.voucher_id, status: status("orders", "status", r.status)?, total_price: Money::new(r.total_price),
            delivery_fee: Money::new(r.delivery_fee), tracking_number: r.tracking_number, arrived_at: r.arrived_at,
            completed_at: r.completed_at, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    offer_id: Uuid,
    quantity: i32,
    unit_price: i64,
    total_price: i64,
    review_done: bool,
}

impl From<OrderItemRow> for OrderItem {
    fn from(r: OrderItemRow) -> Self {
        OrderItem {
            id: r.id, order_id: r.order_id, offer_id: r.offer_id, quantity: r.quantity, unit_price: Money::new(r.unit_price),
            total_price: Money::new(r.total_price), review_done: r.review_done,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DiscountRow {
    id: Uuid,
    order_id: Uuid,
    order_item_id: Option<Uuid>,
    source: String,
    source_id: Uuid,
    amount: i64,
}

impl TryFrom<DiscountRow> for AppliedDiscount {
    type Error = EcommerceError;
    fn try_from(r: DiscountRow) -> Result<Self> {
        let source = DiscountSource::from_parts(&r.source, r.source_id).ok_or_else(|| corrupt("order_discounts", "source", &r.source))?;
        Ok(AppliedDiscount { id: r.id, order_id: r.order_id, order_item_id: r.order_item_id, source, amount: Money::new(r.amount) })
    }
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    user_id: Uuid,
    balance: i64,
    pin_hash: Option<String>,
    pin_attempts: i32,
    blocked_until: Option<DateTime<Utc>>,
    activated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(r: WalletRow) -> Self {
        Wallet {
            id: r.id, user_id: r.user_id, balance: Money::new(r.balance), pin_hash: r.pin_hash, pin_attempts: r.pin_attempts,
            blocked_until: r.blocked_until, activated_at: r.activated_at, created_at: r.created_at, updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct WalletHistoryRow {
    id: Uuid,
    wallet_id: Uuid,
    from_party: String,
    to_party: String,
    amount: i64,
    description: String,
    created_at: DateTime<Utc>,
}

impl From<WalletHistoryRow> for WalletHistory {
    fn from(r: WalletHistoryRow) -> Self {
        WalletHistory {
            id: r.id, wallet_id: r.wallet_id, from: r.from_party, to: r.to_party, amount: Money::new(r.amount),
            description: r.description, created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    order_id: Uuid,
    requested_by: String,
    awaiting: String,
    reason: String,
    image_url: Option<String>,
    previous_status: i16,
    accepted_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RefundRow> for Refund {
    type Error = EcommerceError;
    fn try_from(r: RefundRow) -> Result<Self> {
        Ok(Refund {
            id: r.id, order_id: r.order_id, requested_by: party("refunds", "requested_by", &r.requested_by)?,
            awaiting: party("refunds", "awaiting", &r.awaiting)?, reason: r.reason, image_url: r.image_url,
            previous_status: status("refunds", "previous_status", r.previous_status)?, accepted_at: r.accepted_at,
            rejected_at: r.rejected_at, rejection_reason: r.rejection_reason, processed_at: r.processed_at,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RefundThreadRow {
    id: Uuid,
    refund_id: Uuid,
    author_id: Uuid,
    author: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RefundThreadRow> for RefundThread {
    type Error = EcommerceError;
    fn try_from(r: RefundThreadRow) -> Result<Self> {
        Ok(RefundThread {
            id: r.id, refund_id: r.refund_id, author_id: r.author_id, author: party("refund_threads", "author", &r.author)?,
            message: r.message, created_at: r.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = EcommerceError>,
{
    rows.into_iter().map(T::try_from).collect()
}

const TRANSACTION_COLUMNS: &str =
    "id, buyer_id, voucher_id, wallet_id, card_number, invoice, total_price, paid_at, canceled_at, expired_at, created_at";
const ORDER_COLUMNS: &str = "id, transaction_id, shop_id, buyer_id, courier_id, voucher_id, status, total_price, delivery_fee, \
                             tracking_number, arrived_at, completed_at, created_at, updated_at";
const REFUND_COLUMNS: &str = "id, order_id, requested_by, awaiting, reason, image_url, previous_status, accepted_at, rejected_at, \
                              rejection_reason, processed_at, created_at, updated_at";

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn shop(&mut self, id: Uuid) -> Result<Option<Shop>> {
        let row = sqlx::query_as::<_, ShopRow>("SELECT id, owner_id, name, address FROM shops WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Shop::from))
    }

    async fn save_shop(&mut self, shop: &Shop) -> Result<()> {
        sqlx::query(
            "INSERT INTO shops (id, owner_id, name, address) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, address = EXCLUDED.address",
        )
        .bind(shop.id)
        .bind(shop.owner_id)
        .bind(&shop.name)
        .bind(Json(&shop.address))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn offer(&mut self, id: Uuid) -> Result<Option<ProductDetail>> {
        let row = sqlx::query_as::<_, OfferRow>(
            "SELECT id, product_id, shop_id, price, stock, weight, size, hazardous, condition, bulk_price, updated_at \
             FROM product_details WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ProductDetail::try_from).transpose()
    }

    async fn save_offer(&mut self, offer: &ProductDetail) -> Result<()> {
        sqlx::query(
            "INSERT INTO product_details (id, product_id, shop_id, price, stock, weight, size, hazardous, condition, bulk_price, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE SET price = EXCLUDED.price, stock = EXCLUDED.stock, weight = EXCLUDED.weight, \
             size = EXCLUDED.size, hazardous = EXCLUDED.hazardous, condition = EXCLUDED.condition, \
             bulk_price = EXCLUDED.bulk_price, updated_at = EXCLUDED.updated_at",
        )
        .bind(offer.id)
        .bind(offer.product_id)
        .bind(offer.shop_id)
        .bind(offer.price.amount())
        .bind(offer.stock)
        .bind(offer.weight)
        .bind(&offer.size)
        .bind(offer.hazardous)
        .bind(offer.condition.as_str())
        .bind(offer.bulk_price)
        .bind(offer.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn voucher(&mut self, id: Uuid) -> Result<Option<Voucher>> {
        let row = sqlx::query_as::<_, VoucherRow>(
            "SELECT id, shop_id, code, quota, actived_date, expired_date, percentage, amount, min_product_price, max_discount_price \
             FROM vouchers WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Voucher::try_from).transpose()
    }

    async fn save_voucher(&mut self, voucher: &Voucher) -> Result<()> {
        sqlx::query(
            "INSERT INTO vouchers (id, shop_id, code, quota, actived_date, expired_date, percentage, amount, min_product_price, max_discount_price) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET quota = EXCLUDED.quota, actived_date = EXCLUDED.actived_date, \
             expired_date = EXCLUDED.expired_date",
        )
        .bind(voucher.id)
        .bind(voucher.shop_id)
        .bind(&voucher.code)
        .bind(voucher.quota)
        .bind(voucher.actived_date)
        .bind(voucher.expired_date)
        .bind(voucher.rule.percentage())
        .bind(voucher.rule.amount().map(|a| a.amount()))
        .bind(voucher.rule.min_product_price.amount())
        .bind(voucher.rule.max_discount_price.amount())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn active_promotion(&mut self, product_id: Uuid, now: DateTime<Utc>) -> Result<Option<Promotion>> {
        let row = sqlx::query_as::<_, PromotionRow>(
            "SELECT id, shop_id, product_id, name, quota, max_quantity, actived_date, expired_date, percentage, amount, \
             min_product_price, max_discount_price FROM promotions \
             WHERE product_id = $1 AND actived_date <= $2 AND expired_date >= $2 \
             ORDER BY actived_date, id LIMIT 1 FOR UPDATE",
        )
        .bind(product_id)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Promotion::try_from).transpose()
    }

    async fn save_promotion(&mut self, promotion: &Promotion) -> Result<()> {
        sqlx::query(
            "INSERT INTO promotions (id, shop_id, product_id, name, quota, max_quantity, actived_date, expired_date, percentage, amount, \
             min_product_price, max_discount_price) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (id) DO UPDATE SET quota = EXCLUDED.quota, max_quantity = EXCLUDED.max_quantity, \
             actived_date = EXCLUDED.actived_date, expired_date = EXCLUDED.expired_date",
        )
        .bind(promotion.id)
        .bind(promotion.shop_id)
        .bind(promotion.product_id)
        .bind(&promotion.name)
        .bind(promotion.quota)
        .bind(promotion.max_quantity)
        .bind(promotion.actived_date)
        .bind(promotion.expired_date)
        .bind(promotion.rule.percentage())
        .bind(promotion.rule.amount().map(|a| a.amount()))
        .bind(promotion.rule.min_product_price.amount())
        .bind(promotion.rule.max_discount_price.amount())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn transaction(&mut self, id: Uuid) -> Result<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn save_transaction(&mut self, t: &Transaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO transactions (id, buyer_id, voucher_id, wallet_id, card_number, invoice, total_price, paid_at, canceled_at, \
             expired_at, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE SET paid_at = EXCLUDED.paid_at, canceled_at = EXCLUDED.canceled_at",
        )
        .bind(t.id)
        .bind(t.buyer_id)
        .bind(t.voucher_id)
        .bind(t.payment.wallet_id())
        .bind(t.payment.card_number())
        .bind(&t.invoice)
        .bind(t.total_price.amount())
        .bind(t.paid_at)
        .bind(t.canceled_at)
        .bind(t.expired_at)
        .bind(t.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn overdue_transactions(&mut self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM transactions WHERE paid_at IS NULL AND canceled_at IS NULL AND expired_at <= $1 ORDER BY created_at",
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn order_transaction_id(&mut self, order_id: Uuid) -> Result<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT transaction_id FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn order(&mut self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn save_order(&mut self, o: &Order) -> Result<()> {
        sqlx::query(
            "INSERT INTO orders (id, transaction_id, shop_id, buyer_id, courier_id, voucher_id, status, total_price, delivery_fee, \
             tracking_number, arrived_at, completed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, tracking_number = EXCLUDED.tracking_number, \
             arrived_at = EXCLUDED.arrived_at, completed_at = EXCLUDED.completed_at, updated_at = EXCLUDED.updated_at",
        )
        .bind(o.id)
        .bind(o.transaction_id)
        .bind(o.shop_id)
        .bind(o.buyer_id)
        .bind(o.courier_id)
        .bind(o.voucher_id)
        .bind(o.status.code())
        .bind(o.total_price.amount())
        .bind(o.delivery_fee.amount())
        .bind(&o.tracking_number)
        .bind(o.arrived_at)
        .bind(o.completed_at)
        .bind(o.created_at)
        .bind(o.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn orders_of_transaction(&mut self, transaction_id: Uuid) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE transaction_id = $1 ORDER BY created_at, id FOR UPDATE"
        ))
        .bind(transaction_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn due_deliveries(&mut self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE status = $1 AND arrived_at <= $2 ORDER BY arrived_at")
            .bind(OrderStatus::OnDelivery.code())
            .bind(now)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO order_items (id, order_id, offer_id, quantity, unit_price, total_price, review_done) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(item.id)
        .bind(item.order_id)
        .bind(item.offer_id)
        .bind(item.quantity)
        .bind(item.unit_price.amount())
        .bind(item.total_price.amount())
        .bind(item.review_done)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT id, order_id, offer_id, quantity, unit_price, total_price, review_done FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    async fn insert_applied_discount(&mut self, d: &AppliedDiscount) -> Result<()> {
        sqlx::query(
            "INSERT INTO order_discounts (id, order_id, order_item_id, source, source_id, amount) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(d.id)
        .bind(d.order_id)
        .bind(d.order_item_id)
        .bind(d.source.kind())
        .bind(d.source.id())
        .bind(d.amount.amount())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn applied_discounts(&mut self, order_id: Uuid) -> Result<Vec<AppliedDiscount>> {
        let rows = sqlx::query_as::<_, DiscountRow>(
            "SELECT id, order_id, order_item_id, source, source_id, amount FROM order_discounts WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn wallet(&mut self, id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT id, user_id, balance, pin_hash, pin_attempts, blocked_until, activated_at, created_at, updated_at \
             FROM wallets WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Wallet::from))
    }

    async fn wallet_by_user(&mut self, user_id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(
            "SELECT id, user_id, balance, pin_hash, pin_attempts, blocked_until, activated_at, created_at, updated_at \
             FROM wallets WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Wallet::from))
    }

    async fn save_wallet(&mut self, w: &Wallet) -> Result<()> {
        sqlx::query(
            "INSERT INTO wallets (id, user_id, balance, pin_hash, pin_attempts, blocked_until, activated_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO UPDATE SET balance = EXCLUDED.balance, pin_hash = EXCLUDED.pin_hash, \
             pin_attempts = EXCLUDED.pin_attempts, blocked_until = EXCLUDED.blocked_until, \
             activated_at = EXCLUDED.activated_at, updated_at = EXCLUDED.updated_at",
        )
        .bind(w.id)
        .bind(w.user_id)
        .bind(w.balance.amount())
        .bind(&w.pin_hash)
        .bind(w.pin_attempts)
        .bind(w.blocked_until)
        .bind(w.activated_at)
        .bind(w.created_at)
        .bind(w.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_wallet_history(&mut self, h: &WalletHistory) -> Result<()> {
        sqlx::query(
            "INSERT INTO wallet_histories (id, wallet_id, from_party, to_party, amount, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(h.id)
        .bind(h.wallet_id)
        .bind(&h.from)
        .bind(&h.to)
        .bind(h.amount.amount())
        .bind(&h.description)
        .bind(h.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn wallet_history(&mut self, wallet_id: Uuid) -> Result<Vec<WalletHistory>> {
        let rows = sqlx::query_as::<_, WalletHistoryRow>(
            "SELECT id, wallet_id, from_party, to_party, amount, description, created_at FROM wallet_histories \
             WHERE wallet_id = $1 ORDER BY seq",
        )
        .bind(wallet_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(WalletHistory::from).collect())
    }

    async fn refund(&mut self, id: Uuid) -> Result<Option<Refund>> {
        let row = sqlx::query_as::<_, RefundRow>(&format!("SELECT {REFUND_COLUMNS} FROM refunds WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Refund::try_from).transpose()
    }

    async fn active_refund(&mut self, order_id: Uuid) -> Result<Option<Refund>> {
        let row = sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE order_id = $1 AND accepted_at IS NULL AND rejected_at IS NULL FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Refund::try_from).transpose()
    }

    async fn save_refund(&mut self, r: &Refund) -> Result<()> {
        sqlx::query(
            "INSERT INTO refunds (id, order_id, requested_by, awaiting, reason, image_url, previous_status, accepted_at, rejected_at, \
             rejection_reason, processed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE SET awaiting = EXCLUDED.awaiting, accepted_at = EXCLUDED.accepted_at, \
             rejected_at = EXCLUDED.rejected_at, rejection_reason = EXCLUDED.rejection_reason, \
             processed_at = EXCLUDED.processed_at, updated_at = EXCLUDED.updated_at",
        )
        .bind(r.id)
        .bind(r.order_id)
        .bind(r.requested_by.as_str())
        .bind(r.awaiting.as_str())
        .bind(&r.reason)
        .bind(&r.image_url)
        .bind(r.previous_status.code())
        .bind(r.accepted_at)
        .bind(r.rejected_at)
        .bind(&r.rejection_reason)
        .bind(r.processed_at)
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn settled_rejections(&mut self, before: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM refunds WHERE processed_at IS NULL AND rejected_at <= $1 ORDER BY rejected_at",
        )
        .bind(before)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn insert_refund_message(&mut self, m: &RefundThread) -> Result<()> {
        sqlx::query(
            "INSERT INTO refund_threads (id, refund_id, author_id, author, message, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(m.id)
        .bind(m.refund_id)
        .bind(m.author_id)
        .bind(m.author.as_str())
        .bind(&m.message)
        .bind(m.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn refund_messages(&mut self, refund_id: Uuid) -> Result<Vec<RefundThread>> {
        let rows = sqlx::query_as::<_, RefundThreadRow>(
            "SELECT id, refund_id, author_id, author, message, created_at FROM refund_threads WHERE refund_id = $1 ORDER BY seq",
        )
        .bind(refund_id)
        .fetch_all(&mut *self.tx)
        .await?;
        convert_all(rows)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
