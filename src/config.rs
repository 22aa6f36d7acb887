//! Service configuration read from the environment.
//!
//! `main` loads `.env` through `dotenvy` and builds one [`Config`]; every
//! service receives the slice it needs at construction.

use std::env;
use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

use crate::Money;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Clone, Debug)]
pub struct WalletPolicy {
    pub max_pin_attempts: i32,
    pub lock_duration: Duration,
    pub pin_hash_cost: u32,
    pub min_top_up: Money,
    pub max_top_up: Money,
}

impl Default for WalletPolicy {
    fn default() -> Self {
        Self {
            max_pin_attempts: 5,
            lock_duration: Duration::minutes(15),
            pin_hash_cost: 10,
            min_top_up: Money::new(10_000),
            max_top_up: Money::new(10_000_000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrderPolicy {
    /// Arrival deadline granted when a seller ships.
    pub arrival_window: Duration,
    /// How long after completion a buyer may still ask for a refund.
    pub refund_window: Duration,
    /// Delay before a rejected refund hands the order back to its previous status.
    pub refund_rejection_grace: Duration,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            arrival_window: Duration::days(3),
            refund_window: Duration::days(3),
            refund_rejection_grace: Duration::hours(24),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CardGatewayConfig {
    pub merchant_code: String,
    pub api_secret: String,
    pub payment_ttl: Duration,
}

impl Default for CardGatewayConfig {
    fn default() -> Self {
        Self {
            merchant_code: "MPL".to_string(),
            api_secret: "dev-card-secret".to_string(),
            payment_ttl: Duration::minutes(1440),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DeliveryRates {
    pub base_fee: Money,
    pub fee_per_kg: Money,
}

impl Default for DeliveryRates {
    fn default() -> Self {
        Self { base_fee: Money::new(9_000), fee_per_kg: Money::new(4_000) }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub port: u16,
    pub jwt_secret: String,
    pub internal_api_key: String,
    pub sweep_interval: std::time::Duration,
    pub wallet: WalletPolicy,
    pub orders: OrderPolicy,
    pub card_gateway: CardGatewayConfig,
    pub delivery: DeliveryRates,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            nats_url: None,
            port: 8083,
            jwt_secret: "dev-jwt-secret".to_string(),
            internal_api_key: "dev-internal-key".to_string(),
            sweep_interval: std::time::Duration::from_secs(60),
            wallet: WalletPolicy::default(),
            orders: OrderPolicy::default(),
            card_gateway: CardGatewayConfig::default(),
            delivery: DeliveryRates::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            nats_url: env::var("NATS_URL").ok().filter(|v| !v.is_empty()),
            port: parsed("PORT", defaults.port)?,
            jwt_secret: required("JWT_SECRET")?,
            internal_api_key: required("INTERNAL_API_KEY")?,
            sweep_interval: std::time::Duration::from_secs(parsed("SWEEP_INTERVAL_SECONDS", 60)?),
            wallet: WalletPolicy {
                max_pin_attempts: parsed("WALLET_MAX_PIN_ATTEMPTS", defaults.wallet.max_pin_attempts)?,
                lock_duration: Duration::minutes(parsed("WALLET_LOCK_MINUTES", 15)?),
                pin_hash_cost: parsed("PIN_HASH_COST", defaults.wallet.pin_hash_cost)?,
                ..defaults.wallet
            },
            orders: OrderPolicy {
                arrival_window: Duration::days(parsed("ARRIVAL_WINDOW_DAYS", 3)?),
                refund_window: Duration::days(parsed("REFUND_WINDOW_DAYS", 3)?),
                refund_rejection_grace: Duration::hours(parsed("REFUND_REJECTION_GRACE_HOURS", 24)?),
            },
            card_gateway: CardGatewayConfig {
                merchant_code: required("CARD_MERCHANT_CODE")?,
                api_secret: required("CARD_API_SECRET")?,
                payment_ttl: Duration::minutes(parsed("CARD_PAYMENT_TTL_MINUTES", 1440)?),
            },
            delivery: DeliveryRates {
                base_fee: Money::new(parsed("DELIVERY_BASE_FEE", defaults.delivery.base_fee.amount())?),
                fee_per_kg: Money::new(parsed("DELIVERY_FEE_PER_KG", defaults.delivery.fee_per_kg.amount())?),
            },
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).ok().filter(|v| !v.is_empty()).ok_or(ConfigError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
