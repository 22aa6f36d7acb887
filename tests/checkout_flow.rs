mod common;

use chrono::Duration;
use uuid::Uuid;

use common::*;
use opensase_marketplace::domain::aggregates::{DiscountSource, OrderStatus, TransactionStatus};
use opensase_marketplace::domain::events::{DomainEvent, TransactionEvent};
use opensase_marketplace::services::{callback_signature, CardCallback, ShopGroup, CartLine, STATUS_PAID};
use opensase_marketplace::{Clock, EcommerceError, Money};

fn signed(secret: &str, mut callback: CardCallback) -> CardCallback {
    callback.signature = callback_signature(secret, &callback).unwrap();
    callback
}

fn callback(txn_id: Uuid, amount: Money, status: &str) -> CardCallback {
    CardCallback {
        txn_id: txn_id.to_string(),
        amount: amount.amount(),
        merchant_code: "MPL".into(),
        status: status.into(),
        message: String::new(),
        signature: String::new(),
    }
}

#[tokio::test]
async fn test_wallet_checkout_debits_and_reserves() {
    let mut h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 50_000, 10).await;
    let wallet = h.funded_wallet(buyer, 200_000).await;
    h.drain_events();

    let request = pay_with_wallet(single_shop_request(shop.id, &[(offer.id, 2)]), wallet.id, PIN);
    let receipt = h.market.checkout.checkout(buyer, request).await.unwrap();

    let expected = Money::new(100_000) + fee();
    assert!(receipt.paid);
    assert_eq!(receipt.total_price, expected);
    assert_eq!(h.balance_of(buyer).await, Money::new(200_000) - expected);
    assert_eq!(h.stock_of(offer.id).await, 8);

    let detail = h.market.payments.transaction_detail(buyer, receipt.transaction_id).await.unwrap();
    assert_eq!(detail.status, TransactionStatus::Paid);
    assert_eq!(detail.orders.len(), 1);
    assert_eq!(detail.orders[0].order.status, OrderStatus::Processing);
    assert_eq!(detail.orders[0].items[0].unit_price, Money::new(50_000));
    let order_sum: Money = detail.orders.iter().map(|o| o.order.total_price).sum();
    assert_eq!(order_sum, detail.transaction.total_price);

    let history = h.market.wallets.history(buyer).await.unwrap();
    assert_eq!(history[0].amount, -expected);
    assert_eq!(history[0].to, format!("invoice:{}", receipt.invoice));

    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(e, DomainEvent::Transaction(TransactionEvent::Paid { .. }))));
}

#[tokio::test]
async fn test_insufficient_stock_persists_nothing() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let plenty = h.seed_offer(shop.id, 10_000, 5).await;
    let scarce = h.seed_offer(shop.id, 10_000, 1).await;
    let wallet = h.funded_wallet(buyer, 200_000).await;

    let request = pay_with_wallet(single_shop_request(shop.id, &[(plenty.id, 2), (scarce.id, 2)]), wallet.id, PIN);
    let err = h.market.checkout.checkout(buyer, request).await.unwrap_err();

    assert!(matches!(err, EcommerceError::InsufficientStock { requested: 2, available: 1, .. }));
    assert_eq!(h.stock_of(scarce.id).await, 1);
    assert_eq!(h.stock_of(plenty.id).await, 5);
    assert_eq!(h.balance_of(buyer).await, Money::new(200_000));
    assert_eq!(h.market.wallets.history(buyer).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_insufficient_balance_rolls_back_reservation() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 50_000, 3).await;
    let wallet = h.funded_wallet(buyer, 20_000).await;

    let request = pay_with_wallet(single_shop_request(shop.id, &[(offer.id, 1)]), wallet.id, PIN);
    let err = h.market.checkout.checkout(buyer, request).await.unwrap_err();

    assert!(matches!(err, EcommerceError::InsufficientBalance { .. }));
    assert_eq!(h.stock_of(offer.id).await, 3);
    assert_eq!(h.balance_of(buyer).await, Money::new(20_000));
}

#[tokio::test]
async fn test_wrong_pin_blocks_checkout() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 10_000, 3).await;
    let wallet = h.funded_wallet(buyer, 100_000).await;

    let request = pay_with_wallet(single_shop_request(shop.id, &[(offer.id, 1)]), wallet.id, "000000");
    let err = h.market.checkout.checkout(buyer, request).await.unwrap_err();

    assert!(matches!(err, EcommerceError::WrongPin { remaining_attempts: 4 }));
    assert_eq!(h.stock_of(offer.id).await, 3);
    assert_eq!(h.market.wallets.balance(buyer).await.unwrap().pin_attempts, 1);
}

#[tokio::test]
async fn test_cannot_buy_from_own_shop() {
    let h = harness();
    let owner = Uuid::new_v4();
    let shop = h.seed_shop(owner).await;
    let offer = h.seed_offer(shop.id, 10_000, 3).await;

    let request = pay_with_card(single_shop_request(shop.id, &[(offer.id, 1)]));
    let err = h.market.checkout.checkout(owner, request).await.unwrap_err();
    assert!(matches!(err, EcommerceError::Validation(_)));
    assert_eq!(h.stock_of(offer.id).await, 3);
}

#[tokio::test]
async fn test_discounts_stack_and_consume_quota() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 50_000, 10).await;
    let promotion = h.seed_promotion(&offer, percent_rule(10, 0, 20_000), 5).await;
    let shop_voucher = h.seed_voucher(Some(shop.id), fixed_rule(5_000, 0, 5_000), 3).await;
    let marketplace_voucher = h.seed_voucher(None, percent_rule(10, 0, 3_000), 3).await;

    let mut request = pay_with_card(single_shop_request(shop.id, &[(offer.id, 2)]));
    request.shops[0].voucher_id = Some(shop_voucher.id);
    request.voucher_id = Some(marketplace_voucher.id);
    let receipt = h.market.checkout.checkout(buyer, request).await.unwrap();

    // 100_000 - 10_000 promotion - 5_000 shop voucher - 3_000 marketplace voucher + fee
    assert_eq!(receipt.total_price, Money::new(82_000) + fee());
    assert!(!receipt.paid);
    assert!(receipt.expired_at.is_some());

    let detail = h.market.payments.transaction_detail(buyer, receipt.transaction_id).await.unwrap();
    let order = &detail.orders[0];
    assert_eq!(order.order.voucher_id, Some(shop_voucher.id));
    assert_eq!(detail.transaction.voucher_id, Some(marketplace_voucher.id));
    assert_eq!(order.discounts.len(), 3);
    assert!(order.discounts.iter().any(|d| d.source == DiscountSource::Promotion(promotion.id) && d.amount == Money::new(10_000)));
    let item_total: Money = order.items.iter().map(|i| i.total_price).sum();
    let discount_total: Money = order.discounts.iter().map(|d| d.amount).sum();
    assert_eq!(order.order.total_price, item_total + order.order.delivery_fee - discount_total);

    assert_eq!(h.voucher_quota(shop_voucher.id).await, 2);
    assert_eq!(h.voucher_quota(marketplace_voucher.id).await, 2);
}

#[tokio::test]
async fn test_ineligible_voucher_is_skipped() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 20_000, 10).await;
    let exhausted = h.seed_voucher(Some(shop.id), fixed_rule(5_000, 0, 5_000), 0).await;
    let too_expensive = h.seed_voucher(None, fixed_rule(5_000, 1_000_000, 5_000), 3).await;

    let mut request = pay_with_card(single_shop_request(shop.id, &[(offer.id, 1)]));
    request.shops[0].voucher_id = Some(exhausted.id);
    request.voucher_id = Some(too_expensive.id);
    let receipt = h.market.checkout.checkout(buyer, request).await.unwrap();

    assert_eq!(receipt.total_price, Money::new(20_000) + fee());
    assert_eq!(h.voucher_quota(exhausted.id).await, 0);
    assert_eq!(h.voucher_quota(too_expensive.id).await, 3);
    let detail = h.market.payments.transaction_detail(buyer, receipt.transaction_id).await.unwrap();
    assert_eq!(detail.orders[0].order.voucher_id, None);
    assert_eq!(detail.transaction.voucher_id, None);
}

#[tokio::test]
async fn test_exhausted_promotion_is_skipped() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 20_000, 10).await;
    let mut promotion = h.seed_promotion(&offer, percent_rule(10, 0, 5_000), 5).await;
    promotion.quota = 0;
    h.save_promotion(&promotion).await;

    let receipt = h.market.checkout.checkout(buyer, pay_with_card(single_shop_request(shop.id, &[(offer.id, 2)]))).await.unwrap();

    assert_eq!(receipt.total_price, Money::new(40_000) + fee());
    let detail = h.market.payments.transaction_detail(buyer, receipt.transaction_id).await.unwrap();
    assert!(detail.orders[0].discounts.is_empty());
    assert_eq!(h.promotion_quota(offer.product_id).await, 0);
}

#[tokio::test]
async fn test_promotion_applies_only_inside_its_window() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 20_000, 10).await;
    let mut promotion = h.seed_promotion(&offer, percent_rule(10, 0, 5_000), 5).await;
    promotion.actived_date = h.clock.now() + Duration::days(1);
    promotion.expired_date = h.clock.now() + Duration::days(3);
    h.save_promotion(&promotion).await;

    let early = h.market.checkout.checkout(buyer, pay_with_card(single_shop_request(shop.id, &[(offer.id, 1)]))).await.unwrap();
    assert_eq!(early.total_price, Money::new(20_000) + fee());

    h.clock.advance(Duration::days(2));
    let during = h.market.checkout.checkout(buyer, pay_with_card(single_shop_request(shop.id, &[(offer.id, 1)]))).await.unwrap();
    assert_eq!(during.total_price, Money::new(18_000) + fee());
    assert_eq!(h.promotion_quota(offer.product_id).await, 9);

    h.clock.advance(Duration::days(2));
    let late = h.market.checkout.checkout(buyer, pay_with_card(single_shop_request(shop.id, &[(offer.id, 1)]))).await.unwrap();
    assert_eq!(late.total_price, Money::new(20_000) + fee());
    let detail = h.market.payments.transaction_detail(buyer, late.transaction_id).await.unwrap();
    assert!(detail.orders[0].discounts.is_empty());
}

#[tokio::test]
async fn test_marketplace_voucher_spreads_over_shops() {
    let h = harness();
    let buyer = Uuid::new_v4();
    let first = h.seed_shop(Uuid::new_v4()).await;
    let second = h.seed_shop(Uuid::new_v4()).await;
    let a = h.seed_offer(first.id, 30_000, 5).await;
    let b = h.seed_offer(second.id, 10_000, 5).await;
    let voucher = h.seed_voucher(None, fixed_rule(10_001, 0, 10_001), 1).await;

    let mut request = pay_with_card(single_shop_request(first.id, &[(a.id, 1)]));
    request.shops.push(ShopGroup {
        shop_id: second.id,
        courier_id: Uuid::new_v4(),
        voucher_id: None,
        lines: vec![CartLine { offer_id: b.id, quantity: 1 }],
    });
    request.voucher_id = Some(voucher.id);
    let receipt = h.market.checkout.checkout(buyer, request).await.unwrap();

    assert_eq!(receipt.order_ids.len(), 2);
    assert_eq!(receipt.total_price, Money::new(40_000 - 10_001) + fee() + fee());
    let detail = h.market.payments.transaction_detail(buyer, receipt.transaction_id).await.unwrap();
    let sum: Money = detail.orders.iter().map(|o| o.order.total_price).sum();
    assert_eq!(sum, receipt.total_price);
}

#[tokio::test]
async fn test_card_callback_settles_once() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 25_000, 4).await;
    let secret = h.config.card_gateway.api_secret.clone();

    let receipt = h.market.checkout.checkout(buyer, pay_with_card(single_shop_request(shop.id, &[(offer.id, 1)]))).await.unwrap();
    assert_eq!(h.stock_of(offer.id).await, 3);

    let mut tampered = signed(&secret, callback(receipt.transaction_id, receipt.total_price, "TXN_FAILED"));
    tampered.status = STATUS_PAID.into();
    let err = h.market.payments.card_callback(tampered).await.unwrap_err();
    assert!(matches!(err, EcommerceError::InvalidSignature));
    let detail = h.market.payments.transaction_detail(buyer, receipt.transaction_id).await.unwrap();
    assert_eq!(detail.status, TransactionStatus::AwaitingPayment);

    let wrong_amount = signed(&secret, callback(receipt.transaction_id, Money::new(1), STATUS_PAID));
    assert!(matches!(h.market.payments.card_callback(wrong_amount).await, Err(EcommerceError::Validation(_))));

    let paid = signed(&secret, callback(receipt.transaction_id, receipt.total_price, STATUS_PAID));
    let transaction = h.market.payments.card_callback(paid.clone()).await.unwrap();
    assert_eq!(transaction.status(), TransactionStatus::Paid);
    let again = h.market.payments.card_callback(paid).await.unwrap();
    assert_eq!(again.paid_at, transaction.paid_at);

    let detail = h.market.payments.transaction_detail(buyer, receipt.transaction_id).await.unwrap();
    assert_eq!(detail.orders[0].order.status, OrderStatus::Processing);
    assert_eq!(detail.transaction.payment.card_number(), Some("****1111"));
}

#[tokio::test]
async fn test_failed_card_callback_cancels_and_restocks() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 25_000, 4).await;
    let secret = h.config.card_gateway.api_secret.clone();

    let receipt = h.market.checkout.checkout(buyer, pay_with_card(single_shop_request(shop.id, &[(offer.id, 2)]))).await.unwrap();
    let failed = signed(&secret, callback(receipt.transaction_id, receipt.total_price, "TXN_FAILED"));
    let transaction = h.market.payments.card_callback(failed).await.unwrap();

    assert_eq!(transaction.status(), TransactionStatus::Canceled);
    assert_eq!(h.stock_of(offer.id).await, 4);
    let paid = signed(&secret, callback(receipt.transaction_id, receipt.total_price, STATUS_PAID));
    assert!(matches!(h.market.payments.card_callback(paid).await, Err(EcommerceError::Validation(_))));
}

#[tokio::test]
async fn test_unpaid_transactions_expire() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 25_000, 4).await;

    let receipt = h.market.checkout.checkout(buyer, pay_with_card(single_shop_request(shop.id, &[(offer.id, 3)]))).await.unwrap();
    let report = h.market.sweeps.expire_unpaid_transactions().await.unwrap();
    assert_eq!(report.processed, 0);

    h.clock.advance(h.config.card_gateway.payment_ttl + Duration::minutes(1));
    let report = h.market.sweeps.expire_unpaid_transactions().await.unwrap();
    assert_eq!((report.processed, report.failed), (1, 0));
    assert_eq!(h.stock_of(offer.id).await, 4);

    let detail = h.market.payments.transaction_detail(buyer, receipt.transaction_id).await.unwrap();
    assert_eq!(detail.status, TransactionStatus::Canceled);
    assert_eq!(detail.orders[0].order.status, OrderStatus::Canceled);
    assert_eq!(h.market.sweeps.expire_unpaid_transactions().await.unwrap().processed, 0);
}

#[tokio::test]
async fn test_buyer_cancels_unpaid_transaction() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 25_000, 4).await;

    let receipt = h.market.checkout.checkout(buyer, pay_with_card(single_shop_request(shop.id, &[(offer.id, 1)]))).await.unwrap();
    assert!(matches!(
        h.market.payments.cancel_transaction(Uuid::new_v4(), receipt.transaction_id).await,
        Err(EcommerceError::Unauthorized(_))
    ));
    let transaction = h.market.payments.cancel_transaction(buyer, receipt.transaction_id).await.unwrap();
    assert!(transaction.canceled_at.is_some());
    assert_eq!(h.stock_of(offer.id).await, 4);
    assert!(h.market.payments.cancel_transaction(buyer, receipt.transaction_id).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_checkouts_share_one_wallet() {
    let h = harness();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 10_000, 5).await;
    // 19_000 per order: enough for three of the eight attempts.
    let wallet = h.funded_wallet(buyer, 60_000).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let market = h.market.clone();
        let request = pay_with_wallet(single_shop_request(shop.id, &[(offer.id, 1)]), wallet.id, PIN);
        tasks.push(tokio::spawn(async move { market.checkout.checkout(buyer, request).await }));
    }
    let mut paid = Money::ZERO;
    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(receipt) => {
                assert!(receipt.paid);
                paid += receipt.total_price;
                succeeded += 1;
            }
            Err(err) => assert!(matches!(err, EcommerceError::InsufficientBalance { .. }), "{err}"),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(h.stock_of(offer.id).await, 5 - succeeded);
    let balance = h.balance_of(buyer).await;
    assert_eq!(balance, Money::new(60_000) - paid);
    let history = h.market.wallets.history(buyer).await.unwrap();
    assert_eq!(history.iter().map(|e| e.amount).sum::<Money>(), balance);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_checkouts_never_oversell() {
    let h = harness();
    let seller = Uuid::new_v4();
    let shop = h.seed_shop(seller).await;
    let offer = h.seed_offer(shop.id, 10_000, 3).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let market = h.market.clone();
        let request = pay_with_card(single_shop_request(shop.id, &[(offer.id, 1)]));
        tasks.push(tokio::spawn(async move { market.checkout.checkout(Uuid::new_v4(), request).await }));
    }
    let mut reserved = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => reserved += 1,
            Err(err) => assert!(matches!(err, EcommerceError::InsufficientStock { .. }), "{err}"),
        }
    }

    assert_eq!(reserved, 3);
    assert_eq!(h.stock_of(offer.id).await, 0);
}
