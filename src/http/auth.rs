//! Bearer-token identity and the internal key guarding the sweep endpoints.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
}

/// Signs an HS256 token for `user_id`. Token issuance lives with the identity
/// service; this is here for tooling and tests.
pub fn issue_token(secret: &str, user_id: Uuid, ttl: Duration) -> jsonwebtoken::errors::Result<String> {
    let claims = Claims { sub: user_id, exp: (Utc::now() + ttl).timestamp() };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

#[derive(Debug)]
pub struct AuthRejection(&'static str);

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": self.0 }))).into_response()
    }
}

/// The caller, taken from `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AuthRejection("missing bearer token"))?;
        let data = decode::<Claims>(
            token.trim(),
            &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AuthRejection("invalid bearer token"))?;
        Ok(AuthUser(data.claims.sub))
    }
}

/// Gate for `/internal/*`: the `X-Internal-Key` header must match.
#[derive(Debug, Clone, Copy)]
pub struct InternalKey;

pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";

#[axum::async_trait]
impl<S> FromRequestParts<S> for InternalKey
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let provided = parts
            .headers
            .get(INTERNAL_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthRejection("missing internal key"))?;
        // Fixed-length digests, compared whole.
        if Sha256::digest(provided.as_bytes()) == Sha256::digest(state.internal_api_key.as_bytes()) {
            Ok(InternalKey)
        } else {
            Err(AuthRejection("invalid internal key"))
        }
    }
}
