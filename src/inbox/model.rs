// SPDX-License-Identifier: MIT
// Inbox data model.

use serde::{Deserialize, Serialize};

use crate::tier::Tier;

// ─── Message ─────────────────────────────────────────────────────────────────

/// A delivered piece of mail. Immutable once constructed; `to` is
/// lower-cased at construction so routing never sees mixed case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub from:    String,
    pub to:      String,
    pub subject: String,
    pub body:    String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html:    Option<String>,
    /// Unix millis at acceptance.
    #[serde(rename = "date")]
    pub received_at: i64,
    #[serde(rename = "ip")]
    pub source_ip: String,
}

impl Message {
    pub fn new(
        from: impl Into<String>,
        to: &str,
        subject: impl Into<String>,
        body: impl Into<String>,
        html: Option<String>,
        received_at: i64,
        source_ip: impl Into<String>,
    ) -> Message {
        Message {
            from: from.into(),
            to: to.to_ascii_lowercase(),
            subject: subject.into(),
            body: body.into(),
            html,
            received_at,
            source_ip: source_ip.into(),
        }
    }

    /// The domain part of the recipient address, if any.
    pub fn to_domain(&self) -> Option<&str> {
        self.to.split_once('@').map(|(_, d)| d)
    }
}

// ─── InboxRecord ─────────────────────────────────────────────────────────────

/// Metadata for one live inbox. The token is the only read credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxRecord {
    pub address:    String,
    pub token:      String,
    /// Unix millis after which the inbox reads as not-found and is swept.
    pub expires_at: i64,
    pub tier:       Tier,
    /// Verified account id of the creator, when authenticated.
    pub owner_id:   Option<String>,
    /// Bound webhook sink. Honored only for webhook-eligible tiers.
    pub webhook_url: Option<String>,
    pub created_at: i64,
}

impl InboxRecord {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at <= now_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_lowercases_recipient() {
        let m = Message::new("a@b.example", "User@WISP.Example", "s", "b", None, 0, "127.0.0.1");
        assert_eq!(m.to, "user@wisp.example");
        assert_eq!(m.to_domain(), Some("wisp.example"));
    }

    #[test]
    fn message_without_at_has_no_domain() {
        let m = Message::new("a@b.example", "not-an-address", "s", "b", None, 0, "127.0.0.1");
        assert_eq!(m.to_domain(), None);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let rec = InboxRecord {
            address: "x@wisp.example".into(),
            token: "t".into(),
            expires_at: 1_000,
            tier: Tier::None,
            owner_id: None,
            webhook_url: None,
            created_at: 0,
        };
        assert!(!rec.is_expired(999));
        assert!(rec.is_expired(1_000));
    }

    #[test]
    fn message_json_uses_original_field_names() {
        let m = Message::new("a@b.example", "u@wisp.example", "s", "b", None, 42, "127.0.0.1");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["date"], 42);
        assert_eq!(v["ip"], "127.0.0.1");
        assert!(v.get("html").is_none());
    }
}
