// SPDX-License-Identifier: MIT
//! Protocol-boundary ingestion.
//!
//! The SMTP wire protocol lives in a protocol library outside this crate;
//! what reaches us is one parsed [`InboundMail`] per accepted DATA: envelope
//! sender, primary recipient, any Cc/Bcc addresses, subject, bodies, and
//! the peer address. This module turns that into independent [`Message`]
//! deliveries — one per valid recipient — and hands each to the router.
//!
//! Recipient addresses must match the generated shape (short lowercase
//! alphanumeric local part); anything else is rejected here and never
//! reaches the core. Mail addressed to the webmaster is forwarded straight
//! to the configured ops sink instead of being routed.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::inbox::model::Message;
use crate::inbox::store::InboxStore;
use crate::router::{RoutingOutcome, SharedMailRouter};
use crate::webhook::SharedWebhookDispatcher;

/// Local part of every generated address: lowercase alphanumeric, bounded.
static RECIPIENT_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-z]{4,24}@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,16}$").unwrap());

const WEBMASTER_LOCAL: &str = "webmaster";

/// One parsed piece of mail from the protocol layer.
#[derive(Debug, Clone)]
pub struct InboundMail {
    pub from:      String,
    /// Primary envelope recipient.
    pub to:        String,
    pub cc:        Vec<String>,
    pub bcc:       Vec<String>,
    pub subject:   String,
    pub body:      String,
    pub html:      Option<String>,
    pub source_ip: String,
}

pub fn is_valid_recipient(address: &str) -> bool {
    RECIPIENT_SHAPE.is_match(&address.to_ascii_lowercase())
}

/// Expand an inbound mail into one message per valid recipient, preserving
/// primary → cc → bcc order. Invalid recipients are dropped here.
pub fn expand(mail: &InboundMail, received_at: i64) -> Vec<Message> {
    std::iter::once(mail.to.as_str())
        .chain(mail.cc.iter().map(String::as_str))
        .chain(mail.bcc.iter().map(String::as_str))
        .filter(|rcpt| {
            let ok = is_valid_recipient(rcpt);
            if !ok {
                debug!(recipient = %rcpt, "dropping recipient outside the accepted shape");
            }
            ok
        })
        .map(|rcpt| {
            Message::new(
                mail.from.clone(),
                rcpt,
                mail.subject.clone(),
                mail.body.clone(),
                mail.html.clone(),
                received_at,
                mail.source_ip.clone(),
            )
        })
        .collect()
}

pub struct MailIngest {
    router: SharedMailRouter,
    store: Arc<dyn InboxStore>,
    dispatcher: SharedWebhookDispatcher,
    /// Sink for webmaster-addressed mail. `None` drops it.
    webmaster_sink: Option<String>,
}

pub type SharedMailIngest = Arc<MailIngest>;

impl MailIngest {
    pub fn new(
        router: SharedMailRouter,
        store: Arc<dyn InboxStore>,
        dispatcher: SharedWebhookDispatcher,
        webmaster_sink: Option<String>,
    ) -> Self {
        Self {
            router,
            store,
            dispatcher,
            webmaster_sink,
        }
    }

    /// Accept one parsed mail: expand, count, and route every delivery.
    ///
    /// Each expanded recipient is an independent message with its own
    /// routing decision and its own statistics increment.
    pub async fn accept(&self, mail: InboundMail) -> Vec<RoutingOutcome> {
        let received_at = Utc::now().timestamp_millis();

        // Webmaster mail bypasses routing entirely.
        if mail.to.to_ascii_lowercase().starts_with(&format!("{WEBMASTER_LOCAL}@")) {
            if let Some(sink) = &self.webmaster_sink {
                let message = Message::new(
                    mail.from.clone(),
                    &mail.to,
                    mail.subject.clone(),
                    mail.body.clone(),
                    mail.html.clone(),
                    received_at,
                    mail.source_ip.clone(),
                );
                self.dispatcher.dispatch(sink, vec![message]);
            }
            return Vec::new();
        }

        let mut outcomes = Vec::new();
        for message in expand(&mail, received_at) {
            if let Err(e) = self.store.increment_received().await {
                warn!(err = %e, "failed to increment received counter");
            }
            outcomes.push(self.router.route(message).await);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::DomainRegistry;
    use crate::inbox::model::InboxRecord;
    use crate::inbox::store::SqliteStore;
    use crate::router::bucket::HoldingBucket;
    use crate::router::MailRouter;
    use crate::tier::Tier;
    use crate::webhook::WebhookDispatcher;

    fn mail(to: &str, cc: Vec<&str>, bcc: Vec<&str>) -> InboundMail {
        InboundMail {
            from: "sender@remote.example".into(),
            to: to.into(),
            cc: cc.into_iter().map(String::from).collect(),
            bcc: bcc.into_iter().map(String::from).collect(),
            subject: "s".into(),
            body: "b".into(),
            html: None,
            source_ip: "203.0.113.9".into(),
        }
    }

    async fn ingest() -> (MailIngest, Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::new(dir.path()).await.unwrap());
        let domains = Arc::new(DomainRegistry::new(&["wisp.example".into()], &[], &[]));
        let bucket = Arc::new(HoldingBucket::default());
        let dispatcher = Arc::new(WebhookDispatcher::new());
        let router = Arc::new(MailRouter::new(
            store.clone(),
            domains,
            bucket,
            dispatcher.clone(),
        ));
        (
            MailIngest::new(router, store.clone(), dispatcher, None),
            store,
            dir,
        )
    }

    #[test]
    fn recipient_shape_accepts_generated_addresses() {
        assert!(is_valid_recipient("ab127650000@wisp.example"));
        assert!(is_valid_recipient("spamab127650000@wisp.example"));
        assert!(is_valid_recipient("ABC1234@wisp.example"));
        assert!(!is_valid_recipient("a@wisp.example"));
        assert!(!is_valid_recipient("has.dots@wisp.example"));
        assert!(!is_valid_recipient("no-domain"));
        assert!(!is_valid_recipient("user@nodots"));
    }

    #[test]
    fn expansion_yields_one_message_per_valid_recipient() {
        let m = mail(
            "abc1234@wisp.example",
            vec!["def5678@wisp.example", "not valid"],
            vec!["ghi9012@pool.example"],
        );
        let messages = expand(&m, 42);
        let tos: Vec<&str> = messages.iter().map(|m| m.to.as_str()).collect();
        assert_eq!(
            tos,
            [
                "abc1234@wisp.example",
                "def5678@wisp.example",
                "ghi9012@pool.example"
            ]
        );
        assert!(messages.iter().all(|m| m.received_at == 42));
    }

    #[tokio::test]
    async fn accept_counts_each_expansion_independently() {
        let (ingest, store, _dir) = ingest().await;
        let now = Utc::now().timestamp_millis();
        for token in ["tok_a", "tok_b"] {
            store
                .put(&InboxRecord {
                    address: format!("{token}11@wisp.example").replace('_', ""),
                    token: token.into(),
                    expires_at: now + 3_600_000,
                    tier: Tier::None,
                    owner_id: None,
                    webhook_url: None,
                    created_at: now,
                })
                .await
                .unwrap();
        }
        let outcomes = ingest
            .accept(mail(
                "toka11@wisp.example",
                vec!["tokb11@wisp.example"],
                vec![],
            ))
            .await;
        assert_eq!(outcomes, vec![RoutingOutcome::Queued, RoutingOutcome::Queued]);
        assert_eq!(store.received_total().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn webmaster_mail_is_intercepted_not_routed() {
        let (ingest, store, _dir) = ingest().await;
        let outcomes = ingest.accept(mail("webmaster@wisp.example", vec![], vec![])).await;
        assert!(outcomes.is_empty());
        assert_eq!(store.received_total().await.unwrap(), 0);
    }
}
