//! OpenSASE Marketplace
//!
//! Multi-shop marketplace backend: the order, payment, refund and wallet pipeline.
//!
//! ## Features
//! - Multi-shop checkout with promotions, shop vouchers and marketplace vouchers
//! - Atomic stock reservation
//! - Wallet payments (PIN-gated) and card payments settled by a signed callback
//! - Order status lifecycle with scheduled sweeps
//! - Refund disputes with a message thread

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use validator::{ValidationError, ValidationErrors};

pub mod clock;
pub mod config;
pub mod domain;
pub mod http;
pub mod notify;
pub mod services;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use domain::value_objects::Money;
pub use services::Marketplace;

use domain::aggregates::OrderStatus;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("insufficient stock for offer {offer_id}: requested {requested}, available {available}")]
    InsufficientStock { offer_id: Uuid, requested: i32, available: i32 },

    #[error("insufficient balance in wallet {wallet_id}: balance {balance}, requested {requested}")]
    InsufficientBalance { wallet_id: Uuid, balance: Money, requested: Money },

    #[error("wallet {0} is not activated")]
    WalletIsNotActivated(Uuid),

    #[error("wallet {wallet_id} is blocked until {until}")]
    WalletIsBlocked { wallet_id: Uuid, until: DateTime<Utc> },

    #[error("wrong PIN, {remaining_attempts} attempts left")]
    WrongPin { remaining_attempts: i32 },

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("callback signature does not match")]
    InvalidSignature,

    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition { order_id: Uuid, from: OrderStatus, to: OrderStatus },

    #[error("order {0} already has an active refund")]
    RefundAlreadyOpen(Uuid),

    #[error("refund window for order {0} has closed")]
    RefundWindowClosed(Uuid),

    #[error("refund {0} is already resolved")]
    RefundClosed(Uuid),

    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Coarse classification used by the HTTP layer and by sweeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    BusinessRule,
    Authorization,
    NotFound,
    Integrity,
    Infrastructure,
}

impl EcommerceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::InsufficientStock { .. }
            | Self::InsufficientBalance { .. }
            | Self::WalletIsNotActivated(_)
            | Self::WalletIsBlocked { .. }
            | Self::InvalidTransition { .. }
            | Self::RefundAlreadyOpen(_)
            | Self::RefundWindowClosed(_)
            | Self::RefundClosed(_) => ErrorCategory::BusinessRule,
            Self::WrongPin { .. } | Self::Unauthorized(_) => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidSignature => ErrorCategory::Integrity,
            Self::StorageError(_) => ErrorCategory::Infrastructure,
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Single field-level validation failure.
    pub fn invalid(field: &'static str, code: &'static str, message: &'static str) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, field_error(code, message));
        Self::Validation(errors)
    }
}

pub(crate) fn field_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

impl From<sqlx::Error> for EcommerceError {
    fn from(e: sqlx::Error) -> Self {
        Self::StorageError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
