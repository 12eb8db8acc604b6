// SPDX-License-Identifier: MIT
//! Service tiers and the policy table keyed by them.
//!
//! A tier controls inbox expiration length, webhook eligibility, and the
//! per-account address-generation ceiling. Every tier-dependent decision in
//! the daemon goes through [`TierPolicy`] so the policy lives in one place.

use serde::{Deserialize, Serialize};

/// Service level of an account (or of an inbox created by it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Anonymous or unpaid caller.
    #[default]
    None,
    /// Paid mid tier.
    Plus,
    /// Paid top tier — required for webhook delivery.
    Ultra,
}

impl Tier {
    /// Parse the storage representation written by [`Tier::as_str`].
    ///
    /// Unknown strings map to `None` rather than erroring — a record written
    /// by a newer build must not wedge an older one.
    pub fn parse(s: &str) -> Tier {
        match s {
            "plus" => Tier::Plus,
            "ultra" => Tier::Ultra,
            _ => Tier::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::None => "none",
            Tier::Plus => "plus",
            Tier::Ultra => "ultra",
        }
    }

    /// True for tiers that represent an active paid subscription.
    pub fn is_paid(&self) -> bool {
        !matches!(self, Tier::None)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── TierPolicy ───────────────────────────────────────────────────────────────

/// Per-tier policy values.
#[derive(Debug, Clone, Copy)]
pub struct TierPolicy {
    /// Inbox lifetime in hours.
    pub expiry_hours: i64,
    /// Whether inboxes owned by this tier may bind a webhook sink.
    pub webhook_eligible: bool,
    /// Address-generation ceiling per rate window for authenticated accounts.
    pub generate_ceiling: u64,
    /// Paid tiers skip the per-IP generation limiter entirely.
    pub bypasses_ip_limit: bool,
}

impl TierPolicy {
    /// The single policy lookup table.
    pub fn for_tier(tier: Tier) -> TierPolicy {
        match tier {
            Tier::None => TierPolicy {
                expiry_hours: 1,
                webhook_eligible: false,
                generate_ceiling: 25,
                bypasses_ip_limit: false,
            },
            Tier::Plus => TierPolicy {
                expiry_hours: 10,
                webhook_eligible: false,
                generate_ceiling: 100,
                bypasses_ip_limit: true,
            },
            Tier::Ultra => TierPolicy {
                expiry_hours: 30,
                webhook_eligible: true,
                generate_ceiling: 200,
                bypasses_ip_limit: true,
            },
        }
    }
}
