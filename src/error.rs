//! Error taxonomy for the pricing cache gateway.
//!
//! Mirrors the kinds called out in the design doc: `Transient` errors are
//! recovered locally (stale fallback, retry), `Permanent` errors propagate
//! to the caller untouched, `Coordination` errors are logged and treated
//! as no-ops because the shared store enforces the real invariants, and
//! `Saturation` means the breaker is open.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::fmt;

#[derive(Debug, Clone)]
pub enum PricingError {
    /// Empty or malformed attributes. Callers get an empty result, not an
    /// error — kept as a variant so internal call sites can match on it.
    InvalidInput(String),
    /// The upstream oracle returned a non-success response.
    UpstreamError { code: u16, body: String },
    /// A follower's wait (including its retries) never observed a
    /// published value or a usable cache/stale entry.
    WaitTimeout,
    /// This caller did not win the lease; internal signal only, the cache
    /// layer converts it into follower behavior and it never escapes.
    LeaseUnavailable,
    /// The breaker is open and no stale value exists to fall back to.
    ServiceUnavailable,
    /// A store operation itself failed (connection error, timeout, etc).
    StoreError(String),
}

impl fmt::Display for PricingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::UpstreamError { code, body } => {
                write!(f, "upstream error {code}: {body}")
            }
            Self::WaitTimeout => write!(f, "timed out waiting for coalesced result"),
            Self::LeaseUnavailable => write!(f, "lease unavailable"),
            Self::ServiceUnavailable => {
                write!(f, "pricing service unavailable, no stale data to serve")
            }
            Self::StoreError(msg) => write!(f, "shared store error: {msg}"),
        }
    }
}

impl std::error::Error for PricingError {}

impl PricingError {
    /// True for errors a caller may reasonably retry shortly.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WaitTimeout | Self::StoreError(_) | Self::LeaseUnavailable
        )
    }
}

impl IntoResponse for PricingError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::UpstreamError { code, body } => (
                StatusCode::BAD_GATEWAY,
                format!("upstream returned {code}: {body}"),
            ),
            Self::WaitTimeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            Self::LeaseUnavailable => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Self::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Self::StoreError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
