//! Cart to transaction: one Transaction, one Order per (shop, courier, voucher) group.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::delivery::DeliveryFeeCalculator;
use super::discount::{distribute, DiscountBook, OrderRedemptions};
use super::wallet::{self as ledger, ensure_card_format, WalletService};
use super::{stock, Context};
use crate::config::CardGatewayConfig;
use crate::domain::aggregates::{
    AppliedDiscount, DiscountSource, Order, OrderItem, OrderStatus, PaymentMethod, Transaction, VoucherScope,
};
use crate::domain::events::{DomainEvent, OrderEvent, TransactionEvent};
use crate::domain::value_objects::{Address, Invoice, Money};
use crate::{EcommerceError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CartLine {
    pub offer_id: Uuid,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShopGroup {
    pub shop_id: Uuid,
    pub courier_id: Uuid,
    pub voucher_id: Option<Uuid>,
    #[validate]
    pub lines: Vec<CartLine>,
}

/// Exactly one of `wallet_id` (with `pin`) or `card_number`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate]
    pub address: Address,
    #[validate]
    pub shops: Vec<ShopGroup>,
    pub wallet_id: Option<Uuid>,
    pub pin: Option<String>,
    pub card_number: Option<String>,
    /// Marketplace voucher.
    pub voucher_id: Option<Uuid>,
}

impl CheckoutRequest {
    fn payment_method(&self) -> Result<PaymentMethod> {
        match (self.wallet_id, &self.card_number) {
            (Some(wallet_id), None) => {
                if self.pin.is_none() {
                    return Err(EcommerceError::invalid("pin", "required", "PIN is required for wallet payments"));
                }
                Ok(PaymentMethod::Wallet(wallet_id))
            }
            (None, Some(card_number)) => {
                ensure_card_format(card_number)?;
                Ok(PaymentMethod::Card(card_number.clone()))
            }
            _ => Err(EcommerceError::invalid("payment", "payment_method", "exactly one of wallet_id or card_number is required")),
        }
    }

    fn ensure_shape(&self) -> Result<()> {
        self.validate()?;
        if self.shops.is_empty() {
            return Err(EcommerceError::invalid("shops", "empty_cart", "cart is empty"));
        }
        let mut groups = HashSet::new();
        for group in &self.shops {
            if group.lines.is_empty() {
                return Err(EcommerceError::invalid("lines", "empty_group", "every shop group needs at least one line"));
            }
            if !groups.insert((group.shop_id, group.courier_id, group.voucher_id)) {
                return Err(EcommerceError::invalid("shops", "duplicate_group", "shop, courier and voucher must be unique per group"));
            }
            let mut offers = HashSet::new();
            if !group.lines.iter().all(|line| offers.insert(line.offer_id)) {
                return Err(EcommerceError::invalid("lines", "duplicate_offer", "an offer may appear once per group"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    pub transaction_id: Uuid,
    pub invoice: String,
    pub total_price: Money,
    pub paid: bool,
    /// Card payment deadline.
    pub expired_at: Option<DateTime<Utc>>,
    pub order_ids: Vec<Uuid>,
}

/// One order being assembled, with everything that gets written alongside it.
struct OrderDraft {
    order: Order,
    items: Vec<OrderItem>,
    discounts: Vec<AppliedDiscount>,
    /// Item total after promotions and the shop voucher.
    net: Money,
}

#[derive(Clone)]
pub struct CheckoutService {
    ctx: Context,
    wallets: WalletService,
    delivery: Arc<dyn DeliveryFeeCalculator>,
    gateway: CardGatewayConfig,
}

impl CheckoutService {
    pub(crate) fn new(ctx: Context, wallets: WalletService, delivery: Arc<dyn DeliveryFeeCalculator>, gateway: CardGatewayConfig) -> Self {
        Self { ctx, wallets, delivery, gateway }
    }

    #[instrument(skip(self, request))]
    pub async fn checkout(&self, buyer_id: Uuid, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        request.ensure_shape()?;
        let payment = request.payment_method()?;
        if let (PaymentMethod::Wallet(wallet_id), Some(pin)) = (&payment, &request.pin) {
            self.wallets.verify_pin(buyer_id, *wallet_id, pin).await?;
        }

        let now = self.ctx.clock.now();
        let transaction_id = Uuid::now_v7();
        let mut uow = self.ctx.store.begin().await?;
        let mut book = DiscountBook::new(now);
        let mut drafts = Vec::with_capacity(request.shops.len());

        for group in &request.shops {
            let shop = uow.shop(group.shop_id).await?.ok_or_else(|| EcommerceError::not_found("shop", group.shop_id))?;
            if shop.owner_id == buyer_id {
                return Err(EcommerceError::invalid("shop_id", "own_shop", "cannot buy from your own shop"));
            }

            let order_id = Uuid::now_v7();
            let mut redemptions = OrderRedemptions::default();
            let mut items = Vec::with_capacity(group.lines.len());
            let mut discounts = Vec::new();
            let mut weight_grams = 0i64;

            for line in &group.lines {
                let offer = stock::reserve(uow.as_mut(), line.offer_id, line.quantity, now).await?;
                if offer.shop_id != shop.id {
                    return Err(EcommerceError::invalid("offer_id", "wrong_shop", "offer is not sold by this shop"));
                }
                let item = OrderItem {
                    id: Uuid::now_v7(),
                    order_id,
                    offer_id: offer.id,
                    quantity: line.quantity,
                    unit_price: offer.price,
                    total_price: offer.price.multiply(line.quantity)?,
                    review_done: false,
                };
                weight_grams += i64::from(offer.weight) * i64::from(line.quantity);
                let promotion = book
                    .apply_promotion(uow.as_mut(), shop.id, offer.product_id, offer.price, line.quantity, &mut redemptions)
                    .await?;
                if let Some((promotion_id, amount)) = promotion {
                    discounts.push(AppliedDiscount::new(order_id, Some(item.id), DiscountSource::Promotion(promotion_id), amount));
                }
                items.push(item);
            }

            let gross: Money = items.iter().map(|i| i.total_price).sum();
            let mut net = gross - discounts.iter().map(|d| d.amount).sum::<Money>();
            let mut voucher_id = None;
            if let Some(id) = group.voucher_id {
                if let Some(amount) = book.apply_voucher(uow.as_mut(), id, VoucherScope::Shop(shop.id), net).await? {
                    discounts.push(AppliedDiscount::new(order_id, None, DiscountSource::ShopVoucher(id), amount));
                    net -= amount;
                    voucher_id = Some(id);
                }
            }

            let delivery_fee = self.delivery.fee(&shop.address, &request.address, group.courier_id, weight_grams).await?;
            let order = Order {
                id: order_id,
                transaction_id,
                shop_id: shop.id,
                buyer_id,
                courier_id: group.courier_id,
                voucher_id,
                status: OrderStatus::Unpaid,
                total_price: net + delivery_fee,
                delivery_fee,
                tracking_number: None,
                arrived_at: None,
                completed_at: None,
                created_at: now,
                updated_at: now,
            };
            drafts.push(OrderDraft { order, items, discounts, net });
        }

        let mut marketplace_voucher = None;
        if let Some(id) = request.voucher_id {
            let nets: Vec<Money> = drafts.iter().map(|d| d.net).collect();
            let cart_net: Money = nets.iter().copied().sum();
            if let Some(amount) = book.apply_voucher(uow.as_mut(), id, VoucherScope::Marketplace, cart_net).await? {
                for (draft, share) in drafts.iter_mut().zip(distribute(amount, &nets)) {
                    if share.is_zero() {
                        continue;
                    }
                    draft.discounts.push(AppliedDiscount::new(draft.order.id, None, DiscountSource::MarketplaceVoucher(id), share));
                    draft.order.total_price -= share;
                }
                marketplace_voucher = Some(id);
            }
        }

        let invoice = Invoice::generate(now).into_string();
        let mut transaction = Transaction {
            id: transaction_id,
            buyer_id,
            voucher_id: marketplace_voucher,
            payment: payment.clone(),
            invoice: invoice.clone(),
            total_price: drafts.iter().map(|d| d.order.total_price).sum(),
            paid_at: None,
            canceled_at: None,
            expired_at: None,
            created_at: now,
        };

        let mut events = vec![DomainEvent::Transaction(TransactionEvent::Created {
            transaction_id,
            buyer_id,
            invoice: invoice.clone(),
            total_price: transaction.total_price,
        })];
        match &payment {
            PaymentMethod::Wallet(wallet_id) => {
                let description = format!("Payment for {invoice}");
                ledger::debit(uow.as_mut(), *wallet_id, transaction.total_price, &format!("invoice:{invoice}"), &description, now, &mut events).await?;
                transaction.mark_paid(now)?;
                for draft in &mut drafts {
                    draft.order.mark_paid(now)?;
                    events.push(DomainEvent::Order(OrderEvent::StatusChanged {
                        order_id: draft.order.id,
                        from: OrderStatus::Unpaid,
                        to: OrderStatus::Processing,
                    }));
                }
                events.push(DomainEvent::Transaction(TransactionEvent::Paid { transaction_id }));
            }
            PaymentMethod::Card(_) => transaction.expired_at = Some(now + self.gateway.payment_ttl),
        }

        uow.save_transaction(&transaction).await?;
        for draft in &drafts {
            uow.save_order(&draft.order).await?;
            for item in &draft.items {
                uow.insert_order_item(item).await?;
            }
            for discount in &draft.discounts {
                uow.insert_applied_discount(discount).await?;
            }
        }
        book.flush(uow.as_mut()).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch_all(events);

        info!(transaction_id = %transaction_id, invoice = %invoice, total = %transaction.total_price, orders = drafts.len(), "checkout completed");
        Ok(CheckoutReceipt {
            transaction_id,
            invoice,
            total_price: transaction.total_price,
            paid: transaction.paid_at.is_some(),
            expired_at: transaction.expired_at,
            order_ids: drafts.iter().map(|d| d.order.id).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            address: Address {
                name: "Rina".into(),
                street: "Jl. Merdeka 1".into(),
                city: "Bandung".into(),
                province: "Jawa Barat".into(),
                zip: "40111".into(),
            },
            shops: vec![ShopGroup {
                shop_id: Uuid::new_v4(),
                courier_id: Uuid::new_v4(),
                voucher_id: None,
                lines: vec![CartLine { offer_id: Uuid::new_v4(), quantity: 1 }],
            }],
            wallet_id: None,
            pin: None,
            card_number: Some("4111111111111111".into()),
            voucher_id: None,
        }
    }

    #[test]
    fn test_exactly_one_payment_method() {
        let mut both = request();
        both.wallet_id = Some(Uuid::new_v4());
        both.pin = Some("123456".into());
        assert!(both.payment_method().is_err());

        let mut neither = request();
        neither.card_number = None;
        assert!(neither.payment_method().is_err());

        let mut wallet_without_pin = request();
        wallet_without_pin.card_number = None;
        wallet_without_pin.wallet_id = Some(Uuid::new_v4());
        assert!(wallet_without_pin.payment_method().is_err());

        assert!(matches!(request().payment_method(), Ok(PaymentMethod::Card(_))));
    }

    #[test]
    fn test_shape_rules() {
        assert!(request().ensure_shape().is_ok());

        let mut empty = request();
        empty.shops.clear();
        assert!(matches!(empty.ensure_shape(), Err(EcommerceError::Validation(_))));

        let mut zero_quantity = request();
        zero_quantity.shops[0].lines[0].quantity = 0;
        assert!(zero_quantity.ensure_shape().is_err());

        let mut duplicated = request();
        let group = duplicated.shops[0].clone();
        duplicated.shops.push(group);
        assert!(duplicated.ensure_shape().is_err());
    }
}
