// SPDX-License-Identifier: MIT

pub mod config;
pub mod domains;
pub mod error;
pub mod identity;
pub mod inbox;
pub mod ingest;
pub mod ownership;
pub mod ratelimit;
pub mod rest;
pub mod router;
pub mod tier;
pub mod webhook;

use std::sync::Arc;

use config::RelayConfig;
use domains::DomainRegistry;
use identity::PassportClient;
use inbox::lifecycle::{InboxService, SharedInboxService};
use inbox::store::{InboxStore, SqliteStore};
use ingest::{MailIngest, SharedMailIngest};
use ownership::{HickoryTxtResolver, OwnershipVerifier, SharedOwnershipVerifier};
use ratelimit::{RateLimitConfig, RateLimiter, SharedRateLimiter};
use router::bucket::{HoldingBucket, SharedHoldingBucket};
use router::{MailRouter, SharedMailRouter};
use webhook::{SharedWebhookDispatcher, WebhookDispatcher};

/// Shared application state passed to every HTTP handler, the ingest
/// boundary, and the background loops.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<RelayConfig>,
    pub store: Arc<dyn InboxStore>,
    pub domains: domains::SharedDomainRegistry,
    pub limiter: SharedRateLimiter,
    pub bucket: SharedHoldingBucket,
    pub dispatcher: SharedWebhookDispatcher,
    pub router: SharedMailRouter,
    pub ingest: SharedMailIngest,
    pub inboxes: SharedInboxService,
    pub identity: identity::SharedPassportClient,
    pub ownership: SharedOwnershipVerifier,
    pub started_at: std::time::Instant,
}

impl AppContext {
    /// Wire every component against the SQLite store under the configured
    /// data directory.
    pub async fn init(config: RelayConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let store: Arc<dyn InboxStore> = Arc::new(SqliteStore::new(&config.data_dir).await?);
        let domains = Arc::new(DomainRegistry::new(
            &config.domains.system,
            &config.domains.community,
            &config.domains.banned_words,
        ));
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            window_secs: config.limits.window_secs,
            ip_threshold: config.limits.ip_threshold,
            publish_gap_secs: config.limits.publish_gap_secs,
        }));
        let bucket = Arc::new(HoldingBucket::default());
        let dispatcher = Arc::new(WebhookDispatcher::new());
        let router = Arc::new(MailRouter::new(
            Arc::clone(&store),
            Arc::clone(&domains),
            Arc::clone(&bucket),
            Arc::clone(&dispatcher),
        ));
        let ingest = Arc::new(MailIngest::new(
            Arc::clone(&router),
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            config.webhook.webmaster_sink.clone(),
        ));
        let inboxes = Arc::new(InboxService::new(
            Arc::clone(&store),
            Arc::clone(&domains),
            Arc::clone(&bucket),
        ));
        let identity = Arc::new(PassportClient::new(
            config.identity.passport_url.clone(),
            config.identity.subcode.clone(),
        ));
        let ownership = Arc::new(OwnershipVerifier::new(
            config.secrets.domain_challenge_secret.clone(),
            Arc::new(HickoryTxtResolver::new()),
        ));

        Ok(Self {
            config,
            store,
            domains,
            limiter,
            bucket,
            dispatcher,
            router,
            ingest,
            inboxes,
            identity,
            ownership,
            started_at: std::time::Instant::now(),
        })
    }
}
