#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use uuid::Uuid;

use opensase_marketplace::config::DeliveryRates;
use opensase_marketplace::domain::aggregates::{DiscountRule, ProductCondition, ProductDetail, Promotion, Shop, Voucher, Wallet};
use opensase_marketplace::domain::events::DomainEvent;
use opensase_marketplace::domain::value_objects::Address;
use opensase_marketplace::notify::Notifier;
use opensase_marketplace::services::{CartLine, CheckoutRequest, ShopGroup, TableRateCalculator};
use opensase_marketplace::store::{MemoryStore, Store, UnitOfWork};
use opensase_marketplace::{Clock, Config, ManualClock, Marketplace, Money};

pub const PIN: &str = "123456";
pub const CARD: &str = "4111111111111111";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub market: Marketplace,
    pub config: Config,
    pub events: mpsc::Receiver<DomainEvent>,
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.wallet.pin_hash_cost = 4;
    config
}

pub fn harness() -> Harness {
    let config = config();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
    let (notifier, events) = Notifier::channel(1024);
    let delivery = TableRateCalculator::new(DeliveryRates { base_fee: Money::new(9_000), fee_per_kg: Money::ZERO });
    let market = Marketplace::new(store.clone(), &config, clock.clone(), Arc::new(delivery), notifier);
    Harness { store, clock, market, config, events }
}

pub fn fee() -> Money {
    Money::new(9_000)
}

pub fn address() -> Address {
    Address {
        name: "Rina".into(),
        street: "Jl. Merdeka 1".into(),
        city: "Bandung".into(),
        province: "Jawa Barat".into(),
        zip: "40111".into(),
    }
}

impl Harness {
    pub async fn seed_shop(&self, owner_id: Uuid) -> Shop {
        let shop = Shop { id: Uuid::new_v4(), owner_id, name: "Toko Rina".into(), address: address() };
        let mut uow = self.store.begin().await.unwrap();
        uow.save_shop(&shop).await.unwrap();
        uow.commit().await.unwrap();
        shop
    }

    pub async fn seed_offer(&self, shop_id: Uuid, price: i64, stock: i32) -> ProductDetail {
        let offer = ProductDetail {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            shop_id,
            price: Money::new(price),
            stock,
            weight: 500,
            size: "M".into(),
            hazardous: false,
            condition: ProductCondition::New,
            bulk_price: false,
            updated_at: self.clock.now(),
        };
        let mut uow = self.store.begin().await.unwrap();
        uow.save_offer(&offer).await.unwrap();
        uow.commit().await.unwrap();
        offer
    }

    pub async fn seed_voucher(&self, shop_id: Option<Uuid>, rule: DiscountRule, quota: i32) -> Voucher {
        let now = self.clock.now();
        let voucher = Voucher {
            id: Uuid::new_v4(),
            shop_id,
            code: format!("V{}", &Uuid::new_v4().simple().to_string()[..6]),
            quota,
            actived_date: now - Duration::days(1),
            expired_date: now + Duration::days(30),
            rule,
        };
        let mut uow = self.store.begin().await.unwrap();
        uow.save_voucher(&voucher).await.unwrap();
        uow.commit().await.unwrap();
        voucher
    }

    pub async fn seed_promotion(&self, offer: &ProductDetail, rule: DiscountRule, max_quantity: i32) -> Promotion {
        let now = self.clock.now();
        let promotion = Promotion {
            id: Uuid::new_v4(),
            shop_id: offer.shop_id,
            product_id: offer.product_id,
            name: "Ramadan sale".into(),
            quota: 10,
            max_quantity,
            actived_date: now - Duration::days(1),
            expired_date: now + Duration::days(7),
            rule,
        };
        let mut uow = self.store.begin().await.unwrap();
        uow.save_promotion(&promotion).await.unwrap();
        uow.commit().await.unwrap();
        promotion
    }

    pub async fn save_promotion(&self, promotion: &Promotion) {
        let mut uow = self.store.begin().await.unwrap();
        uow.save_promotion(promotion).await.unwrap();
        uow.commit().await.unwrap();
    }

    /// Quota of the promotion running for `product_id` right now.
    pub async fn promotion_quota(&self, product_id: Uuid) -> i32 {
        let mut uow = self.store.begin().await.unwrap();
        uow.active_promotion(product_id, self.clock.now()).await.unwrap().unwrap().quota
    }

    pub async fn funded_wallet(&self, user_id: Uuid, balance: i64) -> Wallet {
        let wallets = &self.market.wallets;
        let wallet = wallets.create_wallet(user_id).await.unwrap();
        wallets.activate(user_id, PIN).await.unwrap();
        if balance > 0 {
            wallets.top_up(user_id, Money::new(balance), CARD).await.unwrap();
        }
        wallet
    }

    pub async fn stock_of(&self, offer_id: Uuid) -> i32 {
        let mut uow = self.store.begin().await.unwrap();
        uow.offer(offer_id).await.unwrap().unwrap().stock
    }

    pub async fn voucher_quota(&self, voucher_id: Uuid) -> i32 {
        let mut uow = self.store.begin().await.unwrap();
        uow.voucher(voucher_id).await.unwrap().unwrap().quota
    }

    pub async fn balance_of(&self, user_id: Uuid) -> Money {
        self.market.wallets.balance(user_id).await.unwrap().balance
    }

    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn single_shop_request(shop_id: Uuid, lines: &[(Uuid, i32)]) -> CheckoutRequest {
    CheckoutRequest {
        address: address(),
        shops: vec![ShopGroup {
            shop_id,
            courier_id: Uuid::new_v4(),
            voucher_id: None,
            lines: lines.iter().map(|&(offer_id, quantity)| CartLine { offer_id, quantity }).collect(),
        }],
        wallet_id: None,
        pin: None,
        card_number: None,
        voucher_id: None,
    }
}

pub fn pay_with_wallet(mut request: CheckoutRequest, wallet_id: Uuid, pin: &str) -> CheckoutRequest {
    request.wallet_id = Some(wallet_id);
    request.pin = Some(pin.to_string());
    request
}

pub fn pay_with_card(mut request: CheckoutRequest) -> CheckoutRequest {
    request.card_number = Some(CARD.to_string());
    request
}

pub fn percent_rule(percent: i64, min: i64, cap: i64) -> DiscountRule {
    DiscountRule::from_parts(Some(Decimal::new(percent, 2)), None, Money::new(min), Money::new(cap)).unwrap()
}

pub fn fixed_rule(amount: i64, min: i64, cap: i64) -> DiscountRule {
    DiscountRule::from_parts(None, Some(Money::new(amount)), Money::new(min), Money::new(cap)).unwrap()
}
