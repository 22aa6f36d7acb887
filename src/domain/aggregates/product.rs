//! Offer (product detail) and Shop aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Address, Money};
use crate::{EcommerceError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Shop {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub address: Address,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductCondition { #[default] New, Used }

impl ProductCondition {
    pub fn as_str(&self) -> &'static str { match self { Self::New => "new", Self::Used => "used" } }
    pub fn parse(value: &str) -> Option<Self> {
        match value { "new" => Some(Self::New), "used" => Some(Self::Used), _ => None }
    }
}

/// A purchasable variant of a product, carrying its own price and stock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductDetail {
    pub id: Uuid,
    pub product_id: Uuid,
    pub shop_id: Uuid,
    pub price: Money,
    pub stock: i32,
    /// Grams per unit.
    pub weight: i32,
    pub size: String,
    pub hazardous: bool,
    pub condition: ProductCondition,
    pub bulk_price: bool,
    pub updated_at: DateTime<Utc>,
}

impl ProductDetail {
    pub fn remove_stock(&mut self, qty: i32, now: DateTime<Utc>) -> Result<()> {
        if qty > self.stock {
            return Err(EcommerceError::InsufficientStock { offer_id: self.id, requested: qty, available: self.stock });
        }
        self.stock -= qty;
        self.updated_at = now;
        Ok(())
    }

    /// Returned stock simply adds back; there is no ceiling.
    pub fn add_stock(&mut self, qty: i32, now: DateTime<Utc>) {
        self.stock = self.stock.saturating_add(qty);
        self.updated_at = now;
    }
}
