// SPDX-License-Identifier: MIT
//! Webhook delivery: formatting, throttle retry, URL validation.
//!
//! Two formatting modes, selected by the sink URL shape:
//!
//! - **Chat-webhook mode** — messages go one at a time as a short text
//!   summary plus the HTML and plain-text bodies attached as two file
//!   parts, matching what chat platforms render inline.
//! - **Generic mode** — the whole message array is POSTed as one JSON body
//!   with a descriptive User-Agent.
//!
//! Delivery is best-effort and fire-and-forget: the router never waits on
//! it and the original sender has no SMTP feedback channel past acceptance.
//! A sink answering 429 gets the same payload again after a fixed delay, up
//! to a bounded attempt count; any other non-success completes the attempt.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{RelayError, RelayResult};
use crate::inbox::model::Message;

const USER_AGENT: &str = "Wispmail Webhook/1.0";
const CHAT_WEBHOOK_PREFIX: &str = "https://discord.com/api/webhooks/";
const MAX_URL_LEN: usize = 256;

/// Attempt ceiling for 429 retries. The sink stays at-least-once; the
/// ceiling keeps a permanently throttling sink from pinning a task forever.
const MAX_ATTEMPTS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(5);

static URL_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(www\.)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b([-a-zA-Z0-9()@:%_+.~#?&/=]*)$")
        .unwrap()
});

/// Validate a caller-supplied webhook URL, defaulting the scheme to https.
/// Returns the normalized URL.
pub fn validate_webhook_url(url: &str) -> RelayResult<String> {
    if url.len() > MAX_URL_LEN {
        return Err(RelayError::Validation(
            "webhook URL too long (cannot exceed 256 characters)".into(),
        ));
    }
    let normalized = if url.starts_with("https://") || url.starts_with("http://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    if !URL_SHAPE.is_match(&normalized) {
        return Err(RelayError::Validation("invalid webhook URL".into()));
    }
    Ok(normalized)
}

pub fn is_chat_webhook(url: &str) -> bool {
    url.starts_with(CHAT_WEBHOOK_PREFIX)
}

/// One-line-per-field text summary for chat-webhook mode.
fn chat_summary(message: &Message) -> String {
    format!(
        "## Wispmail Webhook\n**Subject**: {}\n**From**: {}\n**To**: {}\n",
        message.subject, message.from, message.to
    )
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    retry_delay: Duration,
    max_attempts: u32,
}

pub type SharedWebhookDispatcher = Arc<WebhookDispatcher>;

impl WebhookDispatcher {
    pub fn new() -> Self {
        Self::with_retry(RETRY_DELAY, MAX_ATTEMPTS)
    }

    /// Test hook: shrink the delay so retry paths run fast.
    pub fn with_retry(retry_delay: Duration, max_attempts: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            retry_delay,
            max_attempts,
        }
    }

    /// Push `messages` to `sink_url` without blocking the caller.
    pub fn dispatch(&self, sink_url: &str, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        let dispatcher = self.clone();
        let url = sink_url.to_string();
        tokio::spawn(async move {
            dispatcher.send(&url, &messages).await;
        });
    }

    /// Synchronous-await variant, used by the spawn above and by tests.
    pub async fn send(&self, sink_url: &str, messages: &[Message]) {
        if is_chat_webhook(sink_url) {
            for message in messages {
                self.post_with_retry(sink_url, || self.chat_request(sink_url, message))
                    .await;
            }
        } else {
            self.post_with_retry(sink_url, || self.generic_request(sink_url, messages))
                .await;
        }
    }

    fn chat_request(&self, url: &str, message: &Message) -> reqwest::RequestBuilder {
        let payload = json!({
            "content": chat_summary(message),
            "attachments": [
                { "id": 0, "description": "html", "filename": "email.html" },
                { "id": 1, "description": "text", "filename": "email.txt" },
            ],
        });
        let html_part = Part::text(message.html.clone().unwrap_or_default())
            .file_name("email.html");
        let text_part = Part::text(message.body.clone()).file_name("email.txt");
        let form = Form::new()
            .text("payload_json", payload.to_string())
            .part("files[0]", html_part)
            .part("files[1]", text_part);
        self.client.post(url).multipart(form)
    }

    fn generic_request(&self, url: &str, messages: &[Message]) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("User-Agent", USER_AGENT)
            .json(messages)
    }

    /// POST the request; on 429 re-attempt the same payload after a fixed
    /// delay, up to the attempt ceiling. Any other outcome completes the
    /// delivery — there is no caller-visible failure.
    async fn post_with_retry<F>(&self, url: &str, make_request: F)
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        for attempt in 1..=self.max_attempts {
            match make_request().send().await {
                Ok(response) if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    if attempt == self.max_attempts {
                        warn!(%url, attempts = attempt, "webhook sink kept throttling, dropping payload");
                        return;
                    }
                    debug!(%url, attempt, "webhook sink throttled, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Ok(response) => {
                    if !response.status().is_success() {
                        debug!(%url, status = %response.status(), "webhook delivery not accepted");
                    }
                    return;
                }
                Err(e) => {
                    debug!(%url, err = %e, "webhook delivery failed");
                    return;
                }
            }
        }
    }

    /// Plain-text ops notification (fire-and-forget, errors swallowed).
    pub fn notify_ops(&self, sink_url: &str, text: &str) {
        let client = self.client.clone();
        let url = sink_url.to_string();
        let body = json!({
            "content": text,
            "allowed_mentions": { "parse": [] },
        });
        tokio::spawn(async move {
            let _ = client.post(&url).json(&body).send().await;
        });
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> Message {
        Message::new(
            "sender@remote.example",
            "abc123@wisp.example",
            "hello",
            "plain body",
            Some("<p>html body</p>".into()),
            0,
            "203.0.113.9",
        )
    }

    #[test]
    fn chat_mode_is_detected_by_url_prefix() {
        assert!(is_chat_webhook("https://discord.com/api/webhooks/1/abc"));
        assert!(!is_chat_webhook("https://sink.example/hook"));
        assert!(!is_chat_webhook("http://discord.com/api/webhooks/1/abc"));
    }

    #[test]
    fn summary_carries_subject_from_and_to() {
        let s = chat_summary(&msg());
        assert!(s.contains("**Subject**: hello"));
        assert!(s.contains("**From**: sender@remote.example"));
        assert!(s.contains("**To**: abc123@wisp.example"));
    }

    #[test]
    fn url_validation_defaults_scheme() {
        assert_eq!(
            validate_webhook_url("sink.example/hook").unwrap(),
            "https://sink.example/hook"
        );
        assert_eq!(
            validate_webhook_url("http://sink.example/hook").unwrap(),
            "http://sink.example/hook"
        );
    }

    #[test]
    fn url_validation_rejects_oversized_and_malformed() {
        let long = format!("https://sink.example/{}", "a".repeat(300));
        assert!(matches!(
            validate_webhook_url(&long),
            Err(RelayError::Validation(_))
        ));
        assert!(validate_webhook_url("not a url").is_err());
        assert!(validate_webhook_url("ftp://sink.example").is_err());
    }
}
