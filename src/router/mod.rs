// SPDX-License-Identifier: MIT
//! Mail routing: one arriving message, exactly one destination.
//!
//! In order: a live inbox with a tier-eligible webhook gets a push (and the
//! message is never queued); a live inbox without one gets the message
//! appended to its queue; a dead address on a recognized domain is a silent
//! discard; an unrecognized domain goes to its registered webhook when the
//! owning account's subscription is live, else into the bounded holding
//! bucket.
//!
//! The store is the only hot-path collaborator that can fail; a store
//! failure drops the message for delivery purposes instead of blocking the
//! sender (who already has SMTP acceptance and no feedback channel).

pub mod bucket;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::domains::SharedDomainRegistry;
use crate::inbox::model::Message;
use crate::inbox::store::InboxStore;
use crate::tier::TierPolicy;
use crate::webhook::SharedWebhookDispatcher;
use bucket::SharedHoldingBucket;

/// Where a message ended up. Exactly one per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingOutcome {
    /// Forwarded to a webhook sink (inbox-bound or domain-bound).
    Webhook,
    /// Appended to a live inbox's pending queue.
    Queued,
    /// Recognized domain, no live inbox — dropped silently.
    Discarded,
    /// Held in the unrecognized-domain bucket.
    Bucketed,
    /// Bucket at capacity — dropped silently.
    DroppedAtCap,
    /// Store unavailable on the hot path — dropped, logged.
    DroppedStoreFailure,
}

pub struct MailRouter {
    store: Arc<dyn InboxStore>,
    domains: SharedDomainRegistry,
    bucket: SharedHoldingBucket,
    dispatcher: SharedWebhookDispatcher,
}

pub type SharedMailRouter = Arc<MailRouter>;

impl MailRouter {
    pub fn new(
        store: Arc<dyn InboxStore>,
        domains: SharedDomainRegistry,
        bucket: SharedHoldingBucket,
        dispatcher: SharedWebhookDispatcher,
    ) -> Self {
        Self {
            store,
            domains,
            bucket,
            dispatcher,
        }
    }

    pub async fn route(&self, message: Message) -> RoutingOutcome {
        let inbox = match self.store.get_by_address(&message.to).await {
            Ok(inbox) => inbox,
            Err(e) => {
                warn!(to = %message.to, err = %e, "store unavailable, dropping message");
                return RoutingOutcome::DroppedStoreFailure;
            }
        };

        if let Some(inbox) = inbox {
            // Webhook delivery and queued-polling delivery are mutually
            // exclusive for a given inbox.
            if let Some(url) = inbox.webhook_url.as_deref() {
                if TierPolicy::for_tier(inbox.tier).webhook_eligible {
                    self.dispatcher.dispatch(url, vec![message]);
                    return RoutingOutcome::Webhook;
                }
            }
            return match self.store.append_message(&inbox.token, &message).await {
                Ok(()) => RoutingOutcome::Queued,
                Err(e) => {
                    warn!(to = %message.to, err = %e, "store unavailable, dropping message");
                    RoutingOutcome::DroppedStoreFailure
                }
            };
        }

        let Some(domain) = message.to_domain().map(str::to_owned) else {
            return RoutingOutcome::Discarded;
        };

        if self.domains.is_recognized(&domain).await {
            // Expired or never existed; nothing worth surfacing.
            debug!(to = %message.to, "no live inbox on recognized domain, discarding");
            return RoutingOutcome::Discarded;
        }

        if let Some(url) = self.domain_webhook(&domain).await {
            self.dispatcher.dispatch(&url, vec![message]);
            return RoutingOutcome::Webhook;
        }

        if self.bucket.push(&domain, message).await {
            RoutingOutcome::Bucketed
        } else {
            RoutingOutcome::DroppedAtCap
        }
    }

    /// Webhook URL for a registered custom domain whose owning account's
    /// subscription is still live. Binding lookups are soft: a store
    /// failure here means "no webhook" and the message falls to the bucket.
    async fn domain_webhook(&self, domain: &str) -> Option<String> {
        let binding = self.store.get_domain_binding(domain).await.ok()??;
        if !binding.is_live(Utc::now().timestamp_millis()) {
            return None;
        }
        self.store
            .get_account_webhook(&binding.owner_id)
            .await
            .ok()?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::DomainRegistry;
    use crate::inbox::model::InboxRecord;
    use crate::inbox::store::{DomainBinding, SqliteStore};
    use crate::tier::Tier;
    use crate::webhook::WebhookDispatcher;
    use bucket::HoldingBucket;

    async fn fixture() -> (MailRouter, Arc<SqliteStore>, SharedHoldingBucket, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::new(dir.path()).await.unwrap());
        let domains = Arc::new(DomainRegistry::new(
            &["wisp.example".into()],
            &["pool.example".into()],
            &[],
        ));
        let bucket = Arc::new(HoldingBucket::default());
        let dispatcher = Arc::new(WebhookDispatcher::new());
        let router = MailRouter::new(
            store.clone(),
            domains,
            bucket.clone(),
            dispatcher,
        );
        (router, store, bucket, dir)
    }

    fn live(token: &str, address: &str, tier: Tier, webhook: Option<&str>) -> InboxRecord {
        let now = Utc::now().timestamp_millis();
        InboxRecord {
            address: address.into(),
            token: token.into(),
            expires_at: now + 3_600_000,
            tier,
            owner_id: None,
            webhook_url: webhook.map(str::to_owned),
            created_at: now,
        }
    }

    fn msg(to: &str) -> Message {
        Message::new("sender@remote.example", to, "s", "b", None, 0, "203.0.113.9")
    }

    #[tokio::test]
    async fn live_inbox_queues_message() {
        let (router, store, _bucket, _dir) = fixture().await;
        store.put(&live("tok_a", "abc@wisp.example", Tier::None, None)).await.unwrap();
        assert_eq!(router.route(msg("abc@wisp.example")).await, RoutingOutcome::Queued);
        assert_eq!(store.drain_messages("tok_a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn routing_lowercases_recipients() {
        let (router, store, _bucket, _dir) = fixture().await;
        store.put(&live("tok_a", "abc@wisp.example", Tier::None, None)).await.unwrap();
        assert_eq!(router.route(msg("ABC@WISP.example")).await, RoutingOutcome::Queued);
    }

    #[tokio::test]
    async fn eligible_webhook_forwards_and_never_queues() {
        let (router, store, _bucket, _dir) = fixture().await;
        store
            .put(&live("tok_u", "u@wisp.example", Tier::Ultra, Some("https://sink.invalid/hook")))
            .await
            .unwrap();
        assert_eq!(router.route(msg("u@wisp.example")).await, RoutingOutcome::Webhook);
        assert!(store.drain_messages("tok_u").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ineligible_tier_webhook_is_ignored_and_message_queued() {
        let (router, store, _bucket, _dir) = fixture().await;
        store
            .put(&live("tok_p", "p@wisp.example", Tier::Plus, Some("https://sink.invalid/hook")))
            .await
            .unwrap();
        assert_eq!(router.route(msg("p@wisp.example")).await, RoutingOutcome::Queued);
        assert_eq!(store.drain_messages("tok_p").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recognized_domain_without_inbox_discards() {
        let (router, _store, bucket, _dir) = fixture().await;
        assert_eq!(router.route(msg("ghost@wisp.example")).await, RoutingOutcome::Discarded);
        assert_eq!(router.route(msg("ghost@pool.example")).await, RoutingOutcome::Discarded);
        assert_eq!(bucket.domain_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_domain_lands_in_bucket_until_cap() {
        let (router, _store, bucket, _dir) = fixture().await;
        for _ in 0..bucket::DEFAULT_CAP {
            assert_eq!(
                router.route(msg("any@custom.example")).await,
                RoutingOutcome::Bucketed
            );
        }
        assert_eq!(
            router.route(msg("any@custom.example")).await,
            RoutingOutcome::DroppedAtCap
        );
        assert_eq!(bucket.drain("custom.example").await.len(), bucket::DEFAULT_CAP);
    }

    #[tokio::test]
    async fn bound_custom_domain_with_live_subscription_forwards() {
        let (router, store, bucket, _dir) = fixture().await;
        let now = Utc::now().timestamp_millis();
        store
            .put_domain_binding(&DomainBinding {
                domain: "custom.example".into(),
                owner_id: "acct".into(),
                valid_until: now + 3_600_000,
                created_at: now,
            })
            .await
            .unwrap();
        store.set_account_webhook("acct", "https://sink.invalid/hook").await.unwrap();
        assert_eq!(router.route(msg("any@custom.example")).await, RoutingOutcome::Webhook);
        assert_eq!(bucket.domain_count().await, 0);
    }

    #[tokio::test]
    async fn lapsed_subscription_falls_back_to_bucket() {
        let (router, store, bucket, _dir) = fixture().await;
        let now = Utc::now().timestamp_millis();
        store
            .put_domain_binding(&DomainBinding {
                domain: "custom.example".into(),
                owner_id: "acct".into(),
                valid_until: now - 1,
                created_at: now - 10,
            })
            .await
            .unwrap();
        store.set_account_webhook("acct", "https://sink.invalid/hook").await.unwrap();
        assert_eq!(router.route(msg("any@custom.example")).await, RoutingOutcome::Bucketed);
        assert_eq!(bucket.domain_count().await, 1);
    }
}
