//! Error to response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use tracing::error;
use validator::ValidationErrors;

use crate::{EcommerceError, ErrorCategory};

fn field_errors(errors: &ValidationErrors) -> Value {
    let mut fields = Map::new();
    for (field, list) in errors.field_errors() {
        let entries = list
            .iter()
            .map(|e| json!({ "code": e.code, "message": e.message }))
            .collect::<Vec<_>>();
        fields.insert(field.to_string(), Value::Array(entries));
    }
    Value::Object(fields)
}

impl IntoResponse for EcommerceError {
    fn into_response(self) -> Response {
        let (status, body) = match (&self, self.category()) {
            (EcommerceError::Validation(errors), _) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "validation_failed", "fields": field_errors(errors) }),
            ),
            (_, ErrorCategory::Integrity) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({
                    "error": "validation_failed",
                    "fields": { "signature": [{ "code": "invalid_signature", "message": self.to_string() }] }
                }),
            ),
            (_, ErrorCategory::BusinessRule) => (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() })),
            (_, ErrorCategory::Authorization) => (StatusCode::FORBIDDEN, json!({ "error": self.to_string() })),
            (_, ErrorCategory::NotFound) => (StatusCode::NOT_FOUND, json!({ "error": self.to_string() })),
            (_, _) => {
                error!(error = %self, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal server error" }))
            }
        };
        (status, Json(body)).into_response()
    }
}
