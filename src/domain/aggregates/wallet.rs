//! Wallet Aggregate

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::Money;
use crate::{EcommerceError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: Money,
    #[serde(skip_serializing)]
    pub pin_hash: Option<String>,
    pub pin_attempts: i32,
    pub blocked_until: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn create(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(), user_id, balance: Money::ZERO, pin_hash: None, pin_attempts: 0,
            blocked_until: None, activated_at: None, created_at: now, updated_at: now,
        }
    }

    pub fn is_activated(&self) -> bool { self.activated_at.is_some() && self.pin_hash.is_some() }

    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool { self.blocked_until.is_some_and(|until| until > now) }

    /// Activated and not locked out.
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_activated() {
            return Err(EcommerceError::WalletIsNotActivated(self.id));
        }
        match self.blocked_until {
            Some(until) if self.is_blocked(now) => Err(EcommerceError::WalletIsBlocked { wallet_id: self.id, until }),
            _ => Ok(()),
        }
    }

    pub fn activate(&mut self, pin_hash: String, now: DateTime<Utc>) {
        self.pin_hash = Some(pin_hash);
        self.activated_at = Some(now);
        self.touch(now);
    }

    pub fn replace_pin_hash(&mut self, pin_hash: String, now: DateTime<Utc>) {
        self.pin_hash = Some(pin_hash);
        self.touch(now);
    }

    /// Counts a wrong PIN and locks the wallet once `max_attempts` is reached.
    /// Returns the error the caller should surface.
    pub fn record_failed_pin(&mut self, max_attempts: i32, lock_for: Duration, now: DateTime<Utc>) -> EcommerceError {
        self.pin_attempts += 1;
        self.touch(now);
        if self.pin_attempts >= max_attempts {
            let until = now + lock_for;
            self.pin_attempts = 0;
            self.blocked_until = Some(until);
            return EcommerceError::WalletIsBlocked { wallet_id: self.id, until };
        }
        EcommerceError::WrongPin { remaining_attempts: max_attempts - self.pin_attempts }
    }

    /// Returns whether anything changed.
    pub fn reset_pin_attempts(&mut self, now: DateTime<Utc>) -> bool {
        if self.pin_attempts == 0 && self.blocked_until.is_none() {
            return false;
        }
        self.pin_attempts = 0;
        self.blocked_until = None;
        self.touch(now);
        true
    }

    pub fn debit(&mut self, amount: Money, now: DateTime<Utc>) -> Result<()> {
        let balance = self.balance.subtract(amount).ok_or(EcommerceError::InsufficientBalance {
            wallet_id: self.id,
            balance: self.balance,
            requested: amount,
        })?;
        self.balance = balance;
        self.touch(now);
        Ok(())
    }

    pub fn credit(&mut self, amount: Money, now: DateTime<Utc>) {
        self.balance += amount;
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }
}

/// Append-only trail of balance changes. `amount` is the signed delta.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletHistory {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub from: String,
    pub to: String,
    pub amount: Money,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_wallet(balance: i64) -> Wallet {
        let now = Utc::now();
        let mut wallet = Wallet::create(Uuid::new_v4(), now);
        wallet.activate("hash".into(), now);
        wallet.credit(Money::new(balance), now);
        wallet
    }

    #[test]
    fn test_debit_refuses_overdraft() {
        let mut wallet = active_wallet(100);
        let err = wallet.debit(Money::new(101), Utc::now()).unwrap_err();
        assert!(matches!(err, EcommerceError::InsufficientBalance { .. }));
        assert_eq!(wallet.balance, Money::new(100));
        wallet.debit(Money::new(100), Utc::now()).unwrap();
        assert_eq!(wallet.balance, Money::ZERO);
    }

    #[test]
    fn test_lockout_after_max_attempts() {
        let now = Utc::now();
        let mut wallet = active_wallet(0);
        for remaining in (1..5).rev() {
            let err = wallet.record_failed_pin(5, Duration::minutes(15), now);
            assert!(matches!(err, EcommerceError::WrongPin { remaining_attempts } if remaining_attempts == remaining));
        }
        let err = wallet.record_failed_pin(5, Duration::minutes(15), now);
        assert!(matches!(err, EcommerceError::WalletIsBlocked { .. }));
        assert!(wallet.ensure_usable(now + Duration::minutes(14)).is_err());
        assert!(wallet.ensure_usable(now + Duration::minutes(15)).is_ok());
    }

    #[test]
    fn test_not_activated() {
        let wallet = Wallet::create(Uuid::new_v4(), Utc::now());
        assert!(matches!(wallet.ensure_usable(Utc::now()), Err(EcommerceError::WalletIsNotActivated(_))));
    }
}
