//! Wallet ledger and the wallet-facing operations.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::Context;
use crate::config::WalletPolicy;
use crate::domain::aggregates::{Wallet, WalletHistory};
use crate::domain::events::{DomainEvent, WalletEvent};
use crate::domain::value_objects::{mask_card, Money};
use crate::store::UnitOfWork;
use crate::{EcommerceError, Result};

pub(crate) fn wallet_party(wallet_id: Uuid) -> String {
    format!("wallet:{wallet_id}")
}

/// Takes `amount` out of the wallet. Requires an activated, unlocked wallet.
pub async fn debit(
    uow: &mut dyn UnitOfWork,
    wallet_id: Uuid,
    amount: Money,
    to: &str,
    description: &str,
    now: DateTime<Utc>,
    events: &mut Vec<DomainEvent>,
) -> Result<Wallet> {
    let mut wallet = uow.wallet(wallet_id).await?.ok_or_else(|| EcommerceError::not_found("wallet", wallet_id))?;
    wallet.ensure_usable(now)?;
    wallet.debit(amount, now)?;
    uow.save_wallet(&wallet).await?;
    uow.insert_wallet_history(&WalletHistory {
        id: Uuid::now_v7(),
        wallet_id,
        from: wallet_party(wallet_id),
        to: to.to_string(),
        amount: -amount,
        description: description.to_string(),
        created_at: now,
    })
    .await?;
    events.push(DomainEvent::Wallet(WalletEvent::Debited { wallet_id, amount }));
    Ok(wallet)
}

/// Adds `amount` to the wallet. Credits land even on a locked wallet.
pub async fn credit(
    uow: &mut dyn UnitOfWork,
    wallet_id: Uuid,
    amount: Money,
    from: &str,
    description: &str,
    now: DateTime<Utc>,
    events: &mut Vec<DomainEvent>,
) -> Result<Wallet> {
    let mut wallet = uow.wallet(wallet_id).await?.ok_or_else(|| EcommerceError::not_found("wallet", wallet_id))?;
    wallet.credit(amount, now);
    uow.save_wallet(&wallet).await?;
    uow.insert_wallet_history(&WalletHistory {
        id: Uuid::now_v7(),
        wallet_id,
        from: from.to_string(),
        to: wallet_party(wallet_id),
        amount,
        description: description.to_string(),
        created_at: now,
    })
    .await?;
    events.push(DomainEvent::Wallet(WalletEvent::Credited { wallet_id, amount }));
    Ok(wallet)
}

fn ensure_pin_format(field: &'static str, pin: &str) -> Result<()> {
    if pin.len() == 6 && pin.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(EcommerceError::invalid(field, "pin_format", "PIN must be exactly 6 digits"))
    }
}

pub(crate) fn ensure_card_format(card_number: &str) -> Result<()> {
    let valid = (12..=19).contains(&card_number.len()) && card_number.chars().all(|c| c.is_ascii_digit());
    if valid { Ok(()) } else { Err(EcommerceError::invalid("card_number", "card_format", "card number must be 12 to 19 digits")) }
}

async fn hash_pin(pin: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(pin, cost))
        .await
        .map_err(|e| EcommerceError::StorageError(format!("PIN hashing task failed: {e}")))?
        .map_err(|e| EcommerceError::StorageError(format!("PIN hashing failed: {e}")))
}

async fn pin_matches(pin: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(pin, &hash))
        .await
        .map_err(|e| EcommerceError::StorageError(format!("PIN check task failed: {e}")))?
        .map_err(|e| EcommerceError::StorageError(format!("PIN check failed: {e}")))
}

#[derive(Clone)]
pub struct WalletService {
    ctx: Context,
    policy: WalletPolicy,
}

impl WalletService {
    pub(crate) fn new(ctx: Context, policy: WalletPolicy) -> Self {
        Self { ctx, policy }
    }

    async fn owned_wallet(uow: &mut dyn UnitOfWork, user_id: Uuid) -> Result<Wallet> {
        uow.wallet_by_user(user_id).await?.ok_or_else(|| EcommerceError::not_found("wallet", user_id))
    }

    #[instrument(skip(self))]
    pub async fn create_wallet(&self, user_id: Uuid) -> Result<Wallet> {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        if uow.wallet_by_user(user_id).await?.is_some() {
            return Err(EcommerceError::invalid("user_id", "wallet_exists", "user already has a wallet"));
        }
        let wallet = Wallet::create(user_id, now);
        uow.save_wallet(&wallet).await?;
        uow.commit().await?;
        info!(wallet_id = %wallet.id, "wallet created");
        Ok(wallet)
    }

    #[instrument(skip(self, pin))]
    pub async fn activate(&self, user_id: Uuid, pin: &str) -> Result<Wallet> {
        ensure_pin_format("pin", pin)?;
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let mut wallet = Self::owned_wallet(uow.as_mut(), user_id).await?;
        if wallet.is_activated() {
            return Err(EcommerceError::invalid("pin", "already_activated", "wallet is already activated"));
        }
        let hash = hash_pin(pin.to_string(), self.policy.pin_hash_cost).await?;
        wallet.activate(hash, now);
        uow.save_wallet(&wallet).await?;
        uow.commit().await?;
        info!(wallet_id = %wallet.id, "wallet activated");
        Ok(wallet)
    }

    /// Checks `pin` and persists the attempt counter whatever the outcome.
    /// On success the still-open unit is handed back so the caller can keep mutating the wallet.
    async fn check_pin(&self, mut uow: Box<dyn UnitOfWork>, mut wallet: Wallet, pin: &str, now: DateTime<Utc>) -> Result<(Box<dyn UnitOfWork>, Wallet)> {
        wallet.ensure_usable(now)?;
        let hash = wallet.pin_hash.clone().ok_or(EcommerceError::WalletIsNotActivated(wallet.id))?;
        if pin_matches(pin.to_string(), hash).await? {
            if wallet.reset_pin_attempts(now) {
                uow.save_wallet(&wallet).await?;
            }
            return Ok((uow, wallet));
        }

        let rejection = wallet.record_failed_pin(self.policy.max_pin_attempts, self.policy.lock_duration, now);
        uow.save_wallet(&wallet).await?;
        uow.commit().await?;
        if let EcommerceError::WalletIsBlocked { until, .. } = &rejection {
            warn!(wallet_id = %wallet.id, until = %until, "wallet locked after repeated wrong PINs");
            self.ctx.notifier.dispatch(DomainEvent::Wallet(WalletEvent::Locked { wallet_id: wallet.id }));
        }
        Err(rejection)
    }

    /// PIN gate for a wallet payment. Runs in its own unit so failed attempts survive a later rollback.
    #[instrument(skip(self, pin))]
    pub async fn verify_pin(&self, user_id: Uuid, wallet_id: Uuid, pin: &str) -> Result<()> {
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let wallet = uow.wallet(wallet_id).await?.ok_or_else(|| EcommerceError::not_found("wallet", wallet_id))?;
        if wallet.user_id != user_id {
            return Err(EcommerceError::Unauthorized("wallet belongs to another user"));
        }
        let (uow, _) = self.check_pin(uow, wallet, pin, now).await?;
        uow.commit().await
    }

    #[instrument(skip(self, old_pin, new_pin))]
    pub async fn change_pin(&self, user_id: Uuid, old_pin: &str, new_pin: &str) -> Result<()> {
        ensure_pin_format("new_pin", new_pin)?;
        let now = self.ctx.clock.now();
        let mut uow = self.ctx.store.begin().await?;
        let wallet = Self::owned_wallet(uow.as_mut(), user_id).await?;
        let (mut uow, mut wallet) = self.check_pin(uow, wallet, old_pin, now).await?;
        let hash = hash_pin(new_pin.to_string(), self.policy.pin_hash_cost).await?;
        wallet.replace_pin_hash(hash, now);
        uow.save_wallet(&wallet).await?;
        uow.commit().await?;
        info!(wallet_id = %wallet.id, "wallet PIN changed");
        Ok(())
    }

    #[instrument(skip(self, card_number))]
    pub async fn top_up(&self, user_id: Uuid, amount: Money, card_number: &str) -> Result<Wallet> {
        if amount < self.policy.min_top_up || amount > self.policy.max_top_up {
            return Err(EcommerceError::invalid("amount", "top_up_range", "top-up amount is outside the allowed range"));
        }
        ensure_card_format(card_number)?;
        let now = self.ctx.clock.now();
        let mut events = Vec::new();
        let mut uow = self.ctx.store.begin().await?;
        let wallet = Self::owned_wallet(uow.as_mut(), user_id).await?;
        if !wallet.is_activated() {
            return Err(EcommerceError::WalletIsNotActivated(wallet.id));
        }
        let from = format!("card:{}", mask_card(card_number));
        let wallet = credit(uow.as_mut(), wallet.id, amount, &from, "Top up", now, &mut events).await?;
        uow.commit().await?;
        self.ctx.notifier.dispatch_all(events);
        info!(wallet_id = %wallet.id, amount = %amount, "wallet topped up");
        Ok(wallet)
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<Wallet> {
        let mut uow = self.ctx.store.begin().await?;
        Self::owned_wallet(uow.as_mut(), user_id).await
    }

    /// Newest first.
    pub async fn history(&self, user_id: Uuid) -> Result<Vec<WalletHistory>> {
        let mut uow = self.ctx.store.begin().await?;
        let wallet = Self::owned_wallet(uow.as_mut(), user_id).await?;
        let mut rows = uow.wallet_history(wallet.id).await?;
        rows.reverse();
        Ok(rows)
    }
}
