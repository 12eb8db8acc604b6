// SPDX-License-Identifier: MIT
//! Custom-domain ownership verification over DNS TXT records.
//!
//! A challenge is derived deterministically from
//! `(account_id, server_secret, domain)` — SHA-512, hex, truncated — so the
//! server never has to persist issued challenges. Two protocols consume it:
//!
//! - **Current**: the derived value is the TXT record *name* under the
//!   domain; its value must equal [`CHALLENGE_SENTINEL`] exactly.
//! - **Legacy**: the TXT value at the derived name is compared against
//!   `sha512(password)`; and plain custom-domain polling checks
//!   `_tmpml.<domain>` against `sha512(token)`.
//!
//! Every check is idempotent and side-effect free. DNS resolution failures
//! and empty results are *verification failures*, never errors — callers
//! must treat unverifiable as unverified.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha512};
use tracing::debug;

/// Expected TXT value for the current verification protocol.
pub const CHALLENGE_SENTINEL: &str = "tm-custom-domain-verification";

/// TXT record prefix for legacy custom-domain polling.
pub const POLLING_LABEL: &str = "_tmpml";

/// Hex length the derived challenge is truncated to.
const CHALLENGE_LEN: usize = 60;

pub fn sha512_hex(input: &str) -> String {
    hex::encode(Sha512::digest(input.as_bytes()))
}

// ─── Resolver seam ───────────────────────────────────────────────────────────

/// The one DNS primitive this module needs. Production wraps a real
/// resolver; tests inject a static map.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// TXT record strings at `name`, or `None` on any resolution failure.
    async fn lookup_txt(&self, name: &str) -> Option<Vec<String>>;
}

/// System-configured hickory resolver.
pub struct HickoryTxtResolver {
    resolver: hickory_resolver::TokioAsyncResolver,
}

impl HickoryTxtResolver {
    pub fn new() -> Self {
        let resolver = hickory_resolver::TokioAsyncResolver::tokio(
            hickory_resolver::config::ResolverConfig::default(),
            hickory_resolver::config::ResolverOpts::default(),
        );
        Self { resolver }
    }
}

impl Default for HickoryTxtResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Option<Vec<String>> {
        let lookup = self.resolver.txt_lookup(name.to_string()).await.ok()?;
        let records: Vec<String> = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part).into_owned())
                    .collect::<String>()
            })
            .collect();
        Some(records)
    }
}

// ─── Verifier ────────────────────────────────────────────────────────────────

pub struct OwnershipVerifier {
    server_secret: String,
    resolver: Arc<dyn TxtResolver>,
}

pub type SharedOwnershipVerifier = Arc<OwnershipVerifier>;

impl OwnershipVerifier {
    pub fn new(server_secret: impl Into<String>, resolver: Arc<dyn TxtResolver>) -> Self {
        Self {
            server_secret: server_secret.into(),
            resolver,
        }
    }

    /// Deterministic per-(account, domain) challenge.
    ///
    /// The secret is folded in twice so the challenge cannot be recomputed
    /// from one leaked concatenation boundary.
    pub fn derive_challenge(&self, account_id: &str, domain: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(account_id.as_bytes());
        hasher.update(self.server_secret.as_bytes());
        hasher.update(self.server_secret.as_bytes());
        hasher.update(domain.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(CHALLENGE_LEN);
        digest
    }

    /// Current protocol: TXT at `<derived>.<domain>` must equal the
    /// sentinel exactly (case-sensitive).
    pub async fn verify_current(&self, account_id: &str, domain: &str) -> bool {
        let name = format!("{}.{}", self.derive_challenge(account_id, domain), domain);
        match self.first_txt(&name).await {
            Some(value) => value == CHALLENGE_SENTINEL,
            None => {
                debug!(%domain, "could not verify custom domain owner");
                false
            }
        }
    }

    /// Legacy protocol: TXT at `<derived>.<domain>` must equal
    /// `sha512(password)` lowercase hex.
    pub async fn verify_legacy_password(
        &self,
        account_id: &str,
        domain: &str,
        password: &str,
    ) -> bool {
        let name = format!("{}.{}", self.derive_challenge(account_id, domain), domain);
        match self.first_txt(&name).await {
            Some(value) => value == sha512_hex(password),
            None => false,
        }
    }

    /// Legacy polling check: TXT at `_tmpml.<domain>` must equal
    /// `sha512(token)` lowercase hex.
    pub async fn verify_polling_token(&self, domain: &str, token: &str) -> bool {
        let name = format!("{POLLING_LABEL}.{domain}");
        match self.first_txt(&name).await {
            Some(value) => value == sha512_hex(token),
            None => false,
        }
    }

    async fn first_txt(&self, name: &str) -> Option<String> {
        self.resolver
            .lookup_txt(name)
            .await
            .and_then(|records| records.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticResolver {
        records: HashMap<String, Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl TxtResolver for StaticResolver {
        async fn lookup_txt(&self, name: &str) -> Option<Vec<String>> {
            if self.fail {
                return None;
            }
            self.records.get(name).cloned()
        }
    }

    fn verifier_with(records: HashMap<String, Vec<String>>, fail: bool) -> OwnershipVerifier {
        OwnershipVerifier::new("s3cret", Arc::new(StaticResolver { records, fail }))
    }

    fn expected_challenge(account_id: &str, domain: &str) -> String {
        let mut h = sha512_hex(&format!("{account_id}s3crets3cret{domain}"));
        h.truncate(60);
        h
    }

    #[test]
    fn challenge_is_deterministic_and_truncated() {
        let v = verifier_with(HashMap::new(), false);
        let c1 = v.derive_challenge("acct-a", "custom.example");
        let c2 = v.derive_challenge("acct-a", "custom.example");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 60);
        assert_eq!(c1, expected_challenge("acct-a", "custom.example"));
        // Different account or domain, different challenge.
        assert_ne!(c1, v.derive_challenge("acct-b", "custom.example"));
        assert_ne!(c1, v.derive_challenge("acct-a", "other.example"));
    }

    #[tokio::test]
    async fn current_protocol_requires_exact_sentinel() {
        let name = format!("{}.custom.example", expected_challenge("acct", "custom.example"));
        let mut records = HashMap::new();
        records.insert(name.clone(), vec![CHALLENGE_SENTINEL.to_string()]);
        let v = verifier_with(records, false);
        assert!(v.verify_current("acct", "custom.example").await);

        // Case differences fail.
        let mut records = HashMap::new();
        records.insert(name, vec![CHALLENGE_SENTINEL.to_uppercase()]);
        let v = verifier_with(records, false);
        assert!(!v.verify_current("acct", "custom.example").await);
    }

    #[tokio::test]
    async fn dns_failure_is_unverified_not_error() {
        let v = verifier_with(HashMap::new(), true);
        assert!(!v.verify_current("acct", "custom.example").await);
        assert!(!v.verify_polling_token("custom.example", "tok").await);
        assert!(!v.verify_legacy_password("acct", "custom.example", "pw").await);
    }

    #[tokio::test]
    async fn polling_token_check_matches_sha512_hex() {
        let mut records = HashMap::new();
        records.insert(
            "_tmpml.custom.example".to_string(),
            vec![sha512_hex("the-token")],
        );
        let v = verifier_with(records, false);
        assert!(v.verify_polling_token("custom.example", "the-token").await);
        assert!(!v.verify_polling_token("custom.example", "wrong").await);
    }

    #[tokio::test]
    async fn legacy_password_check_matches_sha512_hex() {
        let name = format!("{}.custom.example", expected_challenge("acct", "custom.example"));
        let mut records = HashMap::new();
        records.insert(name, vec![sha512_hex("hunter2")]);
        let v = verifier_with(records, false);
        assert!(v.verify_legacy_password("acct", "custom.example", "hunter2").await);
        assert!(!v.verify_legacy_password("acct", "custom.example", "hunter3").await);
    }
}
