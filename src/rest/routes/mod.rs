// rest/routes — one file per endpoint family.

pub mod community;
pub mod custom;
pub mod inbox;
pub mod stats;
pub mod webhook;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::error::RelayError;

/// Map the core taxonomy to an HTTP error body.
pub(crate) fn error_response(err: RelayError) -> (StatusCode, Json<Value>) {
    (err.status_code(), Json(json!({ "error": err.to_string() })))
}
