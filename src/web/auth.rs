//! API-key authentication for the HTTP endpoints.
//!
//! Every data route requires the `X-API-KEY` header issued at /start.
//! The error body uses a `detail` field, which is what the terminal
//! monitor already parses.

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use crate::store::{Store, User};

/// JSON error body.
#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub detail: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            detail: detail.into(),
        }),
    )
}

/// Resolve the `X-API-KEY` header to a registered user.
///
/// Missing header is 401, unknown key is 403.
pub fn require_key(store: &Store, headers: &HeaderMap) -> Result<User, ApiError> {
    let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) else {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Missing X-API-KEY"));
    };
    match store.user_by_key(key) {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(api_error(StatusCode::FORBIDDEN, "Invalid key")),
        Err(e) => {
            tracing::error!("Key lookup failed: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Store unavailable",
            ))
        }
    }
}
