// SPDX-License-Identifier: MIT
//! Error taxonomy for the core API.
//!
//! Four caller-visible categories, kept distinct so the HTTP adapters (and
//! any other shell) can map them without string matching:
//!
//! - validation   → 400
//! - authorization → 402
//! - rate limited  → 429
//! - not found     → 404
//!
//! Transient collaborator failures (DNS, store, webhook sinks) are soft and
//! never surface through this enum on the ingest hot path — see the router
//! and ownership modules.

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed input: bad domain, bad prefix, malformed token, oversized
    /// webhook URL. Rejected synchronously.
    #[error("{0}")]
    Validation(String),

    /// Caller identity or tier is insufficient for the operation.
    #[error("{0}")]
    Authorization(String),

    /// The caller hit a rate limit or a ban and must back off.
    #[error("rate limited ({tier})")]
    RateLimited { tier: crate::tier::Tier },

    /// Token or resource does not exist (or has expired, which reads the same).
    #[error("not found")]
    NotFound,

    /// Store-level failure outside the ingest hot path.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Authorization(_) => StatusCode::PAYMENT_REQUIRED,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
