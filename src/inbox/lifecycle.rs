// SPDX-License-Identifier: MIT
//! Inbox lifecycle: address generation, token-authenticated drains, and the
//! periodic sweeps that keep the store and the stats cache honest.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use chrono::Utc;
use once_cell::sync::Lazy;
use rand_core::{OsRng, RngCore};
use regex::Regex;
use tracing::{debug, info, warn};

use super::model::{InboxRecord, Message};
use super::store::{token_is_well_formed, InboxStore};
use crate::domains::SharedDomainRegistry;
use crate::error::{RelayError, RelayResult};
use crate::router::bucket::SharedHoldingBucket;
use crate::tier::{Tier, TierPolicy};

/// Random bytes behind each token: 384 bits, well past the 256-bit floor.
const TOKEN_BYTES: usize = 48;

/// Optional caller-chosen local-part prefix: short, lowercase alphanumeric.
static PREFIX_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-z]{1,12}$").unwrap());

/// Parameters for one generate request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// Specific domain to use. `None` picks a random system domain.
    pub domain: Option<String>,
    /// Pick a random community domain instead (ignored when `domain` set).
    pub community: bool,
    /// Optional local-part prefix.
    pub prefix: Option<String>,
    pub tier: Tier,
    /// Verified account id, when authenticated.
    pub owner_id: Option<String>,
}

pub struct InboxService {
    store: Arc<dyn InboxStore>,
    domains: SharedDomainRegistry,
    bucket: SharedHoldingBucket,
    /// Cached live-inbox count, refreshed on a timer — the live aggregate
    /// is too expensive to compute per stats call.
    active_cached: AtomicU64,
}

pub type SharedInboxService = Arc<InboxService>;

impl InboxService {
    pub fn new(
        store: Arc<dyn InboxStore>,
        domains: SharedDomainRegistry,
        bucket: SharedHoldingBucket,
    ) -> Self {
        Self {
            store,
            domains,
            bucket,
            active_cached: AtomicU64::new(0),
        }
    }

    /// Create a new inbox and return its record (address + token).
    pub async fn generate_address(&self, req: GenerateRequest) -> RelayResult<InboxRecord> {
        let domain = match &req.domain {
            Some(d) => {
                let d = d.to_ascii_lowercase();
                if !self.domains.is_recognized(&d).await {
                    return Err(RelayError::Validation("invalid domain".into()));
                }
                d
            }
            None if req.community => self
                .domains
                .random_community_domain()
                .await
                .ok_or_else(|| RelayError::Validation("no domains configured".into()))?,
            None => self
                .domains
                .random_system_domain()
                .await
                .ok_or_else(|| RelayError::Validation("no domains configured".into()))?,
        };

        let prefix = match &req.prefix {
            Some(p) => {
                let p = p.to_ascii_lowercase();
                if !PREFIX_SHAPE.is_match(&p) {
                    return Err(RelayError::Validation(
                        "invalid prefix (1-12 lowercase alphanumeric characters)".into(),
                    ));
                }
                Some(p)
            }
            None => None,
        };

        let policy = TierPolicy::for_tier(req.tier);
        let now = Utc::now().timestamp_millis();

        // An Ultra creator with an account-level webhook gets it bound to the
        // inbox up front so routing needs no second lookup.
        let webhook_url = match (&req.owner_id, policy.webhook_eligible) {
            (Some(owner), true) => self.store.get_account_webhook(owner).await?,
            _ => None,
        };

        // Token collisions are astronomically unlikely, but `put` refuses to
        // overwrite, so a conflicting insert just gets a fresh token.
        for _ in 0..3 {
            let record = InboxRecord {
                address: synthesize_address(prefix.as_deref(), &domain),
                token: generate_token(),
                expires_at: now + policy.expiry_hours * 3_600_000,
                tier: req.tier,
                owner_id: req.owner_id.clone(),
                webhook_url: webhook_url.clone(),
                created_at: now,
            };
            match self.store.put(&record).await {
                Ok(()) => {
                    info!(address = %record.address, tier = %record.tier, "generated inbox");
                    return Ok(record);
                }
                Err(e) => debug!(err = %e, "inbox insert conflict, regenerating"),
            }
        }
        Err(RelayError::Storage(anyhow::anyhow!(
            "could not insert a unique inbox record"
        )))
    }

    /// Drain an inbox: return all pending messages and clear the queue in
    /// the same operation. A second immediate drain returns empty.
    ///
    /// Unknown, malformed, and expired tokens all read as [`RelayError::NotFound`],
    /// which is distinct from found-but-empty.
    pub async fn get_inbox(&self, token: &str) -> RelayResult<Vec<Message>> {
        if !token_is_well_formed(token) {
            return Err(RelayError::NotFound);
        }
        let Some(record) = self.store.get_by_token(token).await? else {
            return Err(RelayError::NotFound);
        };
        Ok(self.store.drain_messages(&record.token).await?)
    }

    /// Drain a custom domain's holding bucket. Callers verify ownership
    /// first (see the ownership module); this is just the drain.
    pub async fn drain_custom_domain(&self, domain: &str) -> Vec<Message> {
        self.bucket.drain(domain).await
    }

    /// Cached count of live inboxes plus held custom domains.
    pub fn active_count(&self) -> u64 {
        self.active_cached.load(Ordering::Relaxed)
    }

    pub async fn refresh_active_count(&self) {
        match self.store.count_active().await {
            Ok(count) => {
                let total = count + self.bucket.domain_count().await as u64;
                self.active_cached.store(total, Ordering::Relaxed);
            }
            Err(e) => warn!(err = %e, "failed to refresh active inbox count"),
        }
    }

    pub async fn sweep_expired(&self) {
        match self.store.sweep_expired().await {
            Ok(0) => {}
            Ok(n) => debug!(swept = n, "expired inboxes removed"),
            Err(e) => warn!(err = %e, "expiration sweep failed"),
        }
        self.bucket.sweep_aged(Utc::now().timestamp_millis()).await;
    }

    pub async fn received_total(&self) -> u64 {
        self.store.received_total().await.unwrap_or(0)
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Local part: optional prefix, four random hex characters, and the
/// low digits of the seconds clock so addresses sort roughly by creation.
fn synthesize_address(prefix: Option<&str>, domain: &str) -> String {
    let mut rand_bytes = [0u8; 2];
    OsRng.fill_bytes(&mut rand_bytes);
    let clock = Utc::now().timestamp().to_string();
    let suffix = &clock[3.min(clock.len())..];
    format!(
        "{}{}{}@{}",
        prefix.unwrap_or(""),
        hex::encode(rand_bytes),
        suffix,
        domain
    )
    .to_ascii_lowercase()
}

// ─── Background loops ────────────────────────────────────────────────────────

/// Expiration sweep, every `period` for the process lifetime.
pub async fn run_sweep_loop(service: SharedInboxService, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        service.sweep_expired().await;
    }
}

/// Active-count cache refresh, every `period` for the process lifetime.
pub async fn run_count_refresh_loop(service: SharedInboxService, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        service.refresh_active_count().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::DomainRegistry;
    use crate::inbox::store::SqliteStore;
    use crate::router::bucket::HoldingBucket;

    async fn service() -> (InboxService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::new(dir.path()).await.unwrap());
        let domains = Arc::new(DomainRegistry::new(
            &["wisp.example".into()],
            &["pool.example".into()],
            &[],
        ));
        let bucket = Arc::new(HoldingBucket::default());
        (InboxService::new(store, domains, bucket), dir)
    }

    #[tokio::test]
    async fn generated_address_matches_requested_domain() {
        let (svc, _dir) = service().await;
        let rec = svc
            .generate_address(GenerateRequest {
                domain: Some("WISP.example".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(rec.address.ends_with("@wisp.example"));
        assert_eq!(rec.address, rec.address.to_ascii_lowercase());
    }

    #[tokio::test]
    async fn no_domain_picks_a_recognized_one() {
        let (svc, _dir) = service().await;
        let rec = svc.generate_address(GenerateRequest::default()).await.unwrap();
        assert!(rec.address.ends_with("@wisp.example"));
        let rec = svc
            .generate_address(GenerateRequest {
                community: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(rec.address.ends_with("@pool.example"));
    }

    #[tokio::test]
    async fn unrecognized_domain_is_a_validation_error() {
        let (svc, _dir) = service().await;
        let err = svc
            .generate_address(GenerateRequest {
                domain: Some("custom.example".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn prefix_is_applied_and_validated() {
        let (svc, _dir) = service().await;
        let rec = svc
            .generate_address(GenerateRequest {
                prefix: Some("Spam".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(rec.address.starts_with("spam"));

        for bad in ["has space", "thirteenchars!", "über"] {
            let err = svc
                .generate_address(GenerateRequest {
                    prefix: Some(bad.into()),
                    ..Default::default()
                })
                .await
                .unwrap_err();
            assert!(matches!(err, RelayError::Validation(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn expiry_scales_with_tier() {
        let (svc, _dir) = service().await;
        let hour = 3_600_000i64;
        for (tier, hours) in [(Tier::None, 1), (Tier::Plus, 10), (Tier::Ultra, 30)] {
            let before = Utc::now().timestamp_millis();
            let rec = svc
                .generate_address(GenerateRequest {
                    tier,
                    ..Default::default()
                })
                .await
                .unwrap();
            let after = Utc::now().timestamp_millis();
            assert!(rec.expires_at >= before + hours * hour);
            assert!(rec.expires_at <= after + hours * hour);
        }
    }

    #[tokio::test]
    async fn tokens_are_long_and_unique() {
        let (svc, _dir) = service().await;
        let a = svc.generate_address(GenerateRequest::default()).await.unwrap();
        let b = svc.generate_address(GenerateRequest::default()).await.unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 64);
        assert!(token_is_well_formed(&a.token));
    }

    #[tokio::test]
    async fn drain_twice_returns_empty_second_time() {
        let (svc, _dir) = service().await;
        let rec = svc.generate_address(GenerateRequest::default()).await.unwrap();
        let m = Message::new("s@remote.example", &rec.address, "s", "b", None, 0, "203.0.113.9");
        svc.store.append_message(&rec.token, &m).await.unwrap();

        assert_eq!(svc.get_inbox(&rec.token).await.unwrap().len(), 1);
        assert!(svc.get_inbox(&rec.token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_token_is_not_found_not_empty() {
        let (svc, _dir) = service().await;
        assert!(matches!(
            svc.get_inbox("does-not-exist").await,
            Err(RelayError::NotFound)
        ));
        assert!(matches!(
            svc.get_inbox("bad token!").await,
            Err(RelayError::NotFound)
        ));
        // A live but empty inbox is Ok(empty) — a different outcome.
        let rec = svc.generate_address(GenerateRequest::default()).await.unwrap();
        assert!(svc.get_inbox(&rec.token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ultra_owner_gets_account_webhook_bound() {
        let (svc, _dir) = service().await;
        svc.store
            .set_account_webhook("acct", "https://sink.example/hook")
            .await
            .unwrap();
        let rec = svc
            .generate_address(GenerateRequest {
                tier: Tier::Ultra,
                owner_id: Some("acct".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rec.webhook_url.as_deref(), Some("https://sink.example/hook"));

        // Plus tier is not webhook-eligible; nothing is bound.
        let rec = svc
            .generate_address(GenerateRequest {
                tier: Tier::Plus,
                owner_id: Some("acct".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(rec.webhook_url.is_none());
    }

    #[tokio::test]
    async fn active_count_tracks_store_and_bucket() {
        let (svc, _dir) = service().await;
        svc.generate_address(GenerateRequest::default()).await.unwrap();
        let m = Message::new("s@remote.example", "x@held.example", "s", "b", None, 0, "203.0.113.9");
        svc.bucket.push("held.example", m).await;
        svc.refresh_active_count().await;
        assert_eq!(svc.active_count(), 2);
    }
}
