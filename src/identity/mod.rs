// SPDX-License-Identifier: MIT
//! Remote identity verification ("passport" service).
//!
//! The daemon never stores credentials: a caller presents an account id and
//! a one-time code, the passport service answers with subscription expiry
//! timestamps, and the resulting tier is cached briefly to avoid hammering
//! the remote on every request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::tier::Tier;

static ACCOUNT_ID_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{24}$").unwrap());
static OTP_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{6}$").unwrap());

/// Result of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Verified, with an active subscription tier.
    Tier(Tier),
    /// The account exists but has no subscription time left.
    Expired,
    /// Bad id, bad code, or a passport-side failure.
    Invalid,
}

#[derive(Deserialize)]
struct PassportResponse {
    #[serde(default)]
    plus_until: i64,
    #[serde(default)]
    ultra_until: i64,
}

/// Pick the tier implied by the subscription expiry timestamps.
fn tier_from_expiries(plus_until: i64, ultra_until: i64, now_millis: i64) -> LoginOutcome {
    if ultra_until > now_millis {
        LoginOutcome::Tier(Tier::Ultra)
    } else if plus_until > now_millis {
        LoginOutcome::Tier(Tier::Plus)
    } else {
        LoginOutcome::Expired
    }
}

pub struct PassportClient {
    base_url: String,
    subcode: String,
    client: reqwest::Client,
    /// Successful logins cached per account id; cleared wholesale on a
    /// timer rather than per-entry TTLs.
    cache: Mutex<HashMap<String, Tier>>,
}

pub type SharedPassportClient = Arc<PassportClient>;

impl PassportClient {
    pub fn new(base_url: impl Into<String>, subcode: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            subcode: subcode.into(),
            client: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Verify an account id + one-time code against the passport service.
    ///
    /// Malformed inputs short-circuit to `Invalid` without a remote call;
    /// so do transport failures — an unverifiable caller is an unverified
    /// caller.
    pub async fn login(&self, account_id: &str, otp_code: &str) -> LoginOutcome {
        if !ACCOUNT_ID_SHAPE.is_match(account_id) || !OTP_SHAPE.is_match(otp_code) {
            return LoginOutcome::Invalid;
        }

        if let Some(tier) = self.cache.lock().await.get(account_id) {
            return LoginOutcome::Tier(*tier);
        }

        let url = format!(
            "{}/login?id={}&mfa={}&subcode={}",
            self.base_url, account_id, otp_code, self.subcode
        );
        let response = match self.client.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(status = %r.status(), "passport login rejected");
                return LoginOutcome::Invalid;
            }
            Err(e) => {
                warn!(err = %e, "passport service unreachable");
                return LoginOutcome::Invalid;
            }
        };

        let parsed: PassportResponse = match response.json().await {
            Ok(p) => p,
            Err(_) => return LoginOutcome::Invalid,
        };

        let outcome = tier_from_expiries(
            parsed.plus_until,
            parsed.ultra_until,
            Utc::now().timestamp_millis(),
        );
        if let LoginOutcome::Tier(tier) = outcome {
            self.cache.lock().await.insert(account_id.to_string(), tier);
        }
        outcome
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    #[cfg(test)]
    async fn prime_cache(&self, account_id: &str, tier: Tier) {
        self.cache.lock().await.insert(account_id.to_string(), tier);
    }
}

/// Periodic login-cache eviction, for the process lifetime.
pub async fn run_cache_eviction_loop(client: SharedPassportClient, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        client.clear_cache().await;
    }
}
