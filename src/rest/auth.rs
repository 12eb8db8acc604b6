// rest/auth.rs — Optional account authentication for API requests.
//
// Callers may present an account id + one-time code; most endpoints work
// without one. The passport service decides the tier. "Tried and failed"
// is an error; "did not try" is anonymous.

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};

use crate::identity::LoginOutcome;
use crate::tier::Tier;
use crate::AppContext;

pub const ID_HEADER: &str = "x-wispmail-id";
pub const OTP_HEADER: &str = "x-wispmail-otp";

/// A verified account for the duration of one request.
#[derive(Debug, Clone)]
pub struct AuthedAccount {
    pub id: String,
    pub tier: Tier,
}

pub type AuthError = (StatusCode, Json<Value>);

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Extract credentials from headers. Dedicated headers win; the
/// `Authorization` header with a comma-separated `id,otp` pair is the
/// fallback for clients that cannot set custom headers.
fn credentials(headers: &HeaderMap) -> Option<(String, String)> {
    if let (Some(id), Some(otp)) = (header(headers, ID_HEADER), header(headers, OTP_HEADER)) {
        return Some((id.to_string(), otp.to_string()));
    }
    let auth = header(headers, "authorization")?;
    let (id, otp) = auth.split_once(',')?;
    Some((id.trim().to_string(), otp.trim().to_string()))
}

/// Authenticate the request if it carries credentials.
///
/// Returns `Ok(None)` for anonymous requests, `Ok(Some(account))` for a
/// verified paid-or-not account, and an error response when credentials
/// were presented but rejected.
pub async fn authenticate(
    ctx: &AppContext,
    headers: &HeaderMap,
) -> Result<Option<AuthedAccount>, AuthError> {
    let Some((id, otp)) = credentials(headers) else {
        return Ok(None);
    };

    match ctx.identity.login(&id, &otp).await {
        LoginOutcome::Tier(tier) => Ok(Some(AuthedAccount { id, tier })),
        LoginOutcome::Expired => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "expired account (please add more time); the free tier needs no account",
            })),
        )),
        LoginOutcome::Invalid => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid login" })),
        )),
    }
}

/// Best client-IP guess: the CDN header when present, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    header(headers, "cf-connecting-ip")
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| peer.ip())
}
