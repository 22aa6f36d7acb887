//! HTTP surface over [`Marketplace`].

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::Marketplace;

pub mod auth;
pub mod error;
pub mod handlers;

use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub marketplace: Marketplace,
    pub jwt_secret: String,
    pub internal_api_key: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/transactions/:id", get(get_transaction))
        .route("/api/v1/transactions/:id/cancel", post(cancel_transaction))
        .route("/api/v1/payments/card/callback", post(card_callback))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/ship", post(ship_order))
        .route("/api/v1/orders/:id/complete", post(complete_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/refund", post(request_refund))
        .route("/api/v1/refunds/:id", get(get_refund))
        .route("/api/v1/refunds/:id/messages", get(list_refund_messages).post(post_refund_message))
        .route("/api/v1/refunds/:id/accept", post(accept_refund))
        .route("/api/v1/refunds/:id/reject", post(reject_refund))
        .route("/api/v1/wallet", get(get_wallet).post(create_wallet))
        .route("/api/v1/wallet/activate", post(activate_wallet))
        .route("/api/v1/wallet/pin", post(change_pin))
        .route("/api/v1/wallet/top-up", post(top_up))
        .route("/api/v1/wallet/history", get(wallet_history))
        .route("/internal/sweeps/deliveries", post(sweep_deliveries))
        .route("/internal/sweeps/expired-transactions", post(sweep_expired_transactions))
        .route("/internal/sweeps/rejected-refunds", post(sweep_rejected_refunds))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
