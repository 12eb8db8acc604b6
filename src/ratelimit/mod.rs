// SPDX-License-Identifier: MIT
//! Address-generation rate limiting and ban escalation.
//!
//! Two independent tracks guard the generate path:
//!
//! - **Unauthenticated IP track** — a sliding window per source IP. An IP
//!   that exceeds the window threshold is rejected *and* escalated into the
//!   ban set, which covers the whole CIDR block anchored at that IP. Bans
//!   outlive the raw counters: the ban set clears on its own, longer timer.
//! - **Authenticated-account track** — paid tiers skip IP limiting and get
//!   a per-account sliding window with a tier-dependent ceiling instead.
//!   An authenticated caller with no paid tier stays on the IP track.
//!
//! A third, simpler limiter enforces a flat minimum gap between
//! community-domain publish requests per IP.
//!
//! Everything here is memory-resident and approximate — a process restart
//! resets all counters and bans.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::tier::{Tier, TierPolicy};

// ─── Sliding window ──────────────────────────────────────────────────────────

/// A sliding-window event counter.
pub struct SlidingWindow {
    window_secs: u64,
    events: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs,
            events: VecDeque::new(),
        }
    }

    /// Discard events older than the window boundary.
    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(self.window_secs as i64);
        while self.events.front().is_some_and(|t| *t <= cutoff) {
            self.events.pop_front();
        }
    }

    pub fn record_event(&mut self, at: DateTime<Utc>) {
        self.evict(at);
        self.events.push_back(at);
    }

    pub fn count_in_window(&mut self, now: DateTime<Utc>) -> u64 {
        self.evict(now);
        self.events.len() as u64
    }
}

// ─── CIDR ban blocks ─────────────────────────────────────────────────────────

/// Ban strictness: how wide a block a single offending IP poisons.
pub const IPV4_BAN_PREFIX: u8 = 30;
pub const IPV6_BAN_PREFIX: u8 = 114;

/// The network address of the ban block containing `ip`.
///
/// Two addresses map to the same block iff they share the configured prefix,
/// so a `HashSet<IpAddr>` of masked addresses is the whole ban set.
pub fn ban_block(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let mask = if IPV4_BAN_PREFIX == 0 {
                0
            } else {
                u32::MAX << (32 - IPV4_BAN_PREFIX as u32)
            };
            IpAddr::V4(Ipv4Addr::from(bits & mask))
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let mask = if IPV6_BAN_PREFIX == 0 {
                0
            } else {
                u128::MAX << (128 - IPV6_BAN_PREFIX as u32)
            };
            IpAddr::V6(Ipv6Addr::from(bits & mask))
        }
    }
}

// ─── Limiter ─────────────────────────────────────────────────────────────────

/// Tunables for [`RateLimiter`]. Policy constants, not protocol requirements.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sliding window length for generation counting.
    pub window_secs: u64,
    /// Generate calls allowed per window for an anonymous IP.
    pub ip_threshold: u64,
    /// Minimum gap between community-domain publish requests per IP.
    pub publish_gap_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            ip_threshold: 25,
            publish_gap_secs: 5,
        }
    }
}

struct LimiterInner {
    per_ip: HashMap<IpAddr, SlidingWindow>,
    per_account: HashMap<String, SlidingWindow>,
    bans: HashSet<IpAddr>,
    publish_last: HashMap<IpAddr, DateTime<Utc>>,
}

/// Shared limiter state. Cheap to clone via `Arc`.
pub struct RateLimiter {
    config: RateLimitConfig,
    inner: Mutex<LimiterInner>,
}

pub type SharedRateLimiter = Arc<RateLimiter>;

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            config,
            inner: Mutex::new(LimiterInner {
                per_ip: HashMap::new(),
                per_account: HashMap::new(),
                bans: HashSet::new(),
                publish_last: HashMap::new(),
            }),
        }
    }

    /// Admit or reject one address-generation attempt.
    ///
    /// `account` carries the verified account id and tier when the caller
    /// authenticated. Only paid tiers switch to the account track; see the
    /// module docs for the `Tier::None` policy.
    pub async fn check_generate(
        &self,
        ip: IpAddr,
        account: Option<(&str, Tier)>,
    ) -> RelayResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        if let Some((account_id, tier)) = account {
            let policy = TierPolicy::for_tier(tier);
            if policy.bypasses_ip_limit {
                let window = inner
                    .per_account
                    .entry(account_id.to_string())
                    .or_insert_with(|| SlidingWindow::new(self.config.window_secs));
                if window.count_in_window(now) >= policy.generate_ceiling {
                    debug!(account = account_id, %tier, "account generation ceiling hit");
                    return Err(RelayError::RateLimited { tier });
                }
                window.record_event(now);
                return Ok(());
            }
        }

        // IP track. A banned block rejects before any counting.
        let block = ban_block(ip);
        if inner.bans.contains(&block) {
            return Err(RelayError::RateLimited { tier: Tier::None });
        }

        let window_secs = self.config.window_secs;
        let count = inner
            .per_ip
            .entry(ip)
            .or_insert_with(|| SlidingWindow::new(window_secs))
            .count_in_window(now);
        if count >= self.config.ip_threshold {
            warn!(%ip, "generation flood, escalating to CIDR ban");
            inner.bans.insert(block);
            return Err(RelayError::RateLimited { tier: Tier::None });
        }
        if let Some(window) = inner.per_ip.get_mut(&ip) {
            window.record_event(now);
        }
        Ok(())
    }

    /// Admit or reject one community-domain publish request.
    pub async fn check_publish(&self, ip: IpAddr) -> RelayResult<()> {
        let now = Utc::now();
        let gap = chrono::Duration::seconds(self.config.publish_gap_secs as i64);
        let mut inner = self.inner.lock().await;
        if let Some(last) = inner.publish_last.get(&ip) {
            if now - *last < gap {
                return Err(RelayError::RateLimited { tier: Tier::None });
            }
        }
        inner.publish_last.insert(ip, now);
        Ok(())
    }

    /// True when `ip` falls inside a banned block.
    pub async fn is_banned(&self, ip: IpAddr) -> bool {
        self.inner.lock().await.bans.contains(&ban_block(ip))
    }

    /// Drop all counters. The windows already slide; this bounds map growth.
    pub async fn clear_counters(&self) {
        let mut inner = self.inner.lock().await;
        inner.per_ip.clear();
        inner.per_account.clear();
        inner.publish_last.clear();
    }

    /// Drop the ban set. Runs on its own, longer timer than the counters.
    pub async fn clear_bans(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.bans.is_empty() {
            info!(count = inner.bans.len(), "clearing ban set");
        }
        inner.bans.clear();
    }
}

/// Periodic counter reset, for the process lifetime.
pub async fn run_counter_reset_loop(limiter: SharedRateLimiter, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        limiter.clear_counters().await;
    }
}

/// Periodic ban-set reset. Independent of (and longer than) the counter
/// reset so bans outlive the raw counters.
pub async fn run_ban_reset_loop(limiter: SharedRateLimiter, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        limiter.clear_bans().await;
    }
}
