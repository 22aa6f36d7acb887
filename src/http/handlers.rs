//! Route handlers. Each one authenticates, calls a single service operation and
//! serialises the result.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::auth::{AuthUser, InternalKey};
use super::AppState;
use crate::domain::aggregates::{Order, Refund, RefundThread, Transaction, Wallet, WalletHistory};
use crate::services::{
    CardCallback, CheckoutReceipt, CheckoutRequest, OrderDetail, RefundDetail, RefundMessage, RefundRequest, SweepReport,
    TransactionDetail,
};
use crate::{Money, Result};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "opensase-marketplace" }))
}

// ===== Checkout and transactions =====

pub async fn checkout(
    State(s): State<AppState>,
    AuthUser(buyer): AuthUser,
    Json(r): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>)> {
    let receipt = s.marketplace.checkout.checkout(buyer, r).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn get_transaction(
    State(s): State<AppState>,
    AuthUser(buyer): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionDetail>> {
    Ok(Json(s.marketplace.payments.transaction_detail(buyer, id).await?))
}

pub async fn cancel_transaction(
    State(s): State<AppState>,
    AuthUser(buyer): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>> {
    let transaction = s.marketplace.payments.cancel_transaction(buyer, id).await?;
    Ok(Json(transaction.masked()))
}

/// Called by the card gateway, authenticated by the payload signature only.
pub async fn card_callback(State(s): State<AppState>, Json(r): Json<CardCallback>) -> Result<Json<Value>> {
    let transaction = s.marketplace.payments.card_callback(r).await?;
    Ok(Json(json!({ "transaction_id": transaction.id, "status": transaction.status() })))
}

// ===== Orders =====

#[derive(Debug, Deserialize)]
pub struct ShipRequest {
    pub tracking_number: String,
}

pub async fn get_order(State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<Uuid>) -> Result<Json<OrderDetail>> {
    Ok(Json(s.marketplace.orders.detail(user, id).await?))
}

pub async fn ship_order(
    State(s): State<AppState>,
    AuthUser(seller): AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<ShipRequest>,
) -> Result<Json<Order>> {
    Ok(Json(s.marketplace.orders.ship(seller, id, &r.tracking_number).await?))
}

pub async fn complete_order(State(s): State<AppState>, AuthUser(buyer): AuthUser, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    Ok(Json(s.marketplace.orders.complete(buyer, id).await?))
}

pub async fn cancel_order(State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<Uuid>) -> Result<Json<Order>> {
    Ok(Json(s.marketplace.orders.cancel(user, id).await?))
}

pub async fn request_refund(
    State(s): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<RefundRequest>,
) -> Result<(StatusCode, Json<Refund>)> {
    let refund = s.marketplace.refunds.request(user, id, r).await?;
    Ok((StatusCode::CREATED, Json(refund)))
}

// ===== Refunds =====

pub async fn get_refund(State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<Uuid>) -> Result<Json<RefundDetail>> {
    Ok(Json(s.marketplace.refunds.detail(user, id).await?))
}

pub async fn list_refund_messages(
    State(s): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RefundThread>>> {
    Ok(Json(s.marketplace.refunds.messages(user, id).await?))
}

pub async fn post_refund_message(
    State(s): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<RefundMessage>,
) -> Result<(StatusCode, Json<RefundThread>)> {
    let entry = s.marketplace.refunds.post_message(user, id, r).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn accept_refund(State(s): State<AppState>, AuthUser(user): AuthUser, Path(id): Path<Uuid>) -> Result<Json<Refund>> {
    Ok(Json(s.marketplace.refunds.accept(user, id).await?))
}

pub async fn reject_refund(
    State(s): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(r): Json<RefundMessage>,
) -> Result<Json<Refund>> {
    Ok(Json(s.marketplace.refunds.reject(user, id, r).await?))
}

// ===== Wallet =====

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePinRequest {
    pub old_pin: String,
    pub new_pin: String,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: Money,
    pub card_number: String,
}

pub async fn create_wallet(State(s): State<AppState>, AuthUser(user): AuthUser) -> Result<(StatusCode, Json<Wallet>)> {
    let wallet = s.marketplace.wallets.create_wallet(user).await?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

pub async fn get_wallet(State(s): State<AppState>, AuthUser(user): AuthUser) -> Result<Json<Wallet>> {
    Ok(Json(s.marketplace.wallets.balance(user).await?))
}

pub async fn activate_wallet(State(s): State<AppState>, AuthUser(user): AuthUser, Json(r): Json<PinRequest>) -> Result<Json<Wallet>> {
    Ok(Json(s.marketplace.wallets.activate(user, &r.pin).await?))
}

pub async fn change_pin(State(s): State<AppState>, AuthUser(user): AuthUser, Json(r): Json<ChangePinRequest>) -> Result<StatusCode> {
    s.marketplace.wallets.change_pin(user, &r.old_pin, &r.new_pin).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn top_up(State(s): State<AppState>, AuthUser(user): AuthUser, Json(r): Json<TopUpRequest>) -> Result<Json<Wallet>> {
    Ok(Json(s.marketplace.wallets.top_up(user, r.amount, &r.card_number).await?))
}

pub async fn wallet_history(State(s): State<AppState>, AuthUser(user): AuthUser) -> Result<Json<Vec<WalletHistory>>> {
    Ok(Json(s.marketplace.wallets.history(user).await?))
}

// ===== Internal sweeps =====

pub async fn sweep_deliveries(State(s): State<AppState>, _: InternalKey) -> Result<Json<SweepReport>> {
    Ok(Json(s.marketplace.sweeps.complete_due_deliveries().await?))
}

pub async fn sweep_expired_transactions(State(s): State<AppState>, _: InternalKey) -> Result<Json<SweepReport>> {
    Ok(Json(s.marketplace.sweeps.expire_unpaid_transactions().await?))
}

pub async fn sweep_rejected_refunds(State(s): State<AppState>, _: InternalKey) -> Result<Json<SweepReport>> {
    Ok(Json(s.marketplace.sweeps.process_rejected_refunds().await?))
}
