//! Delivery fee lookup.

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::DeliveryRates;
use crate::domain::value_objects::{Address, Money};
use crate::{EcommerceError, Result};

/// Prices one parcel from a shop to a buyer.
#[async_trait]
pub trait DeliveryFeeCalculator: Send + Sync {
    async fn fee(&self, origin: &Address, destination: &Address, courier_id: Uuid, weight_grams: i64) -> Result<Money>;
}

/// Base fee plus a per-kilogram rate, weight rounded up to the next kilogram.
#[derive(Clone, Copy, Debug)]
pub struct TableRateCalculator {
    rates: DeliveryRates,
}

impl TableRateCalculator {
    pub fn new(rates: DeliveryRates) -> Self {
        Self { rates }
    }
}

#[async_trait]
impl DeliveryFeeCalculator for TableRateCalculator {
    async fn fee(&self, _origin: &Address, _destination: &Address, _courier_id: Uuid, weight_grams: i64) -> Result<Money> {
        let kilograms = (weight_grams.max(0) + 999) / 1000;
        self.rates
            .fee_per_kg
            .amount()
            .checked_mul(kilograms)
            .and_then(|weighted| weighted.checked_add(self.rates.base_fee.amount()))
            .map(Money::new)
            .ok_or_else(|| EcommerceError::invalid("weight", "overflow", "delivery fee is out of range"))
    }
}
