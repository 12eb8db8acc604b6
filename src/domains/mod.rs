// SPDX-License-Identifier: MIT
//! Domain classification and community-domain publishing.
//!
//! The registry answers one question for every other component: is this
//! domain one of ours (*system*), a shared user-contributed pool domain
//! (*community*), or unrecognized (a candidate custom domain)? Lookups are
//! case-insensitive and never mutate their input.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use rand_core::{OsRng, RngCore};
use regex::Regex;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::{RelayError, RelayResult};

/// Outcome of a domain lookup. `Unknown` is a valid, expected result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainClass {
    System,
    Community,
    Unknown,
}

/// Shape check for published community domains. Rejects empty labels and
/// anything that is not a plausible hostname.
static DOMAIN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,16}$").unwrap());

struct Lists {
    system: HashSet<String>,
    community: HashSet<String>,
    /// Kept in insertion order for the random pick.
    system_ordered: Vec<String>,
    community_ordered: Vec<String>,
}

impl Lists {
    fn build(system: &[String], community: &[String]) -> Lists {
        let norm = |v: &[String]| -> (HashSet<String>, Vec<String>) {
            let ordered: Vec<String> = v.iter().map(|d| d.to_ascii_lowercase()).collect();
            (ordered.iter().cloned().collect(), ordered)
        };
        let (system, system_ordered) = norm(system);
        let (community, community_ordered) = norm(community);
        Lists {
            system,
            community,
            system_ordered,
            community_ordered,
        }
    }
}

/// Shared, refreshable domain registry.
pub struct DomainRegistry {
    lists: RwLock<Lists>,
    banned_words: Vec<String>,
    /// Community domains submitted for review, drained out-of-band.
    candidates: Mutex<Vec<String>>,
}

pub type SharedDomainRegistry = Arc<DomainRegistry>;

impl DomainRegistry {
    pub fn new(system: &[String], community: &[String], banned_words: &[String]) -> Self {
        DomainRegistry {
            lists: RwLock::new(Lists::build(system, community)),
            banned_words: banned_words.iter().map(|w| w.to_ascii_lowercase()).collect(),
            candidates: Mutex::new(Vec::new()),
        }
    }

    /// Classify a domain. Case-insensitive, no side effects.
    pub async fn classify(&self, domain: &str) -> DomainClass {
        let d = domain.to_ascii_lowercase();
        let lists = self.lists.read().await;
        if lists.system.contains(&d) {
            DomainClass::System
        } else if lists.community.contains(&d) {
            DomainClass::Community
        } else {
            DomainClass::Unknown
        }
    }

    /// True for system and community domains alike.
    pub async fn is_recognized(&self, domain: &str) -> bool {
        self.classify(domain).await != DomainClass::Unknown
    }

    /// A random system domain, for generate requests that name none.
    pub async fn random_system_domain(&self) -> Option<String> {
        let lists = self.lists.read().await;
        pick(&lists.system_ordered)
    }

    /// A random community domain. Falls back to a system domain when the
    /// community pool is empty.
    pub async fn random_community_domain(&self) -> Option<String> {
        let lists = self.lists.read().await;
        pick(&lists.community_ordered).or_else(|| pick(&lists.system_ordered))
    }

    /// Swap in freshly loaded lists. Used by the periodic refresh loop.
    pub async fn replace_lists(&self, system: &[String], community: &[String]) {
        let mut lists = self.lists.write().await;
        *lists = Lists::build(system, community);
        info!(
            system = lists.system.len(),
            community = lists.community.len(),
            "domain lists refreshed"
        );
    }

    /// Submit a domain to the community pool review queue.
    ///
    /// Validates length and hostname shape, and screens against the
    /// banned-word list. A banned-word hit is reported as success to the
    /// caller but never queued.
    pub async fn publish_candidate(&self, domain: &str) -> RelayResult<()> {
        let d = domain.to_ascii_lowercase();
        if d.is_empty() || d.len() > 64 {
            return Err(RelayError::Validation(
                "domain is an invalid length (cannot be more than 64 characters)".into(),
            ));
        }
        if !DOMAIN_SHAPE.is_match(&d) {
            return Err(RelayError::Validation("invalid domain".into()));
        }
        if self.banned_words.iter().any(|w| d.contains(w.as_str())) {
            warn!(domain = %d, "published domain violates word screening");
            return Ok(());
        }
        self.candidates.lock().await.push(d);
        Ok(())
    }

    /// Drain the pending review queue.
    pub async fn take_candidates(&self) -> Vec<String> {
        std::mem::take(&mut *self.candidates.lock().await)
    }
}

fn pick(ordered: &[String]) -> Option<String> {
    if ordered.is_empty() {
        return None;
    }
    let idx = (OsRng.next_u32() as usize) % ordered.len();
    ordered.get(idx).cloned()
}
