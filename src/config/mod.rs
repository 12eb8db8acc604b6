// SPDX-License-Identifier: MIT
//! Daemon configuration: TOML sections with defaults, plus the periodic
//! domain-list refresh that re-reads the file while the daemon runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::domains::SharedDomainRegistry;

const DEFAULT_HTTP_PORT: u16 = 8443;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── ServerConfig ─────────────────────────────────────────────────────────────

/// HTTP shell settings (`[server]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_port: u16,
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            bind_address: default_bind_address(),
        }
    }
}

// ─── DomainsConfig ────────────────────────────────────────────────────────────

/// Domain lists (`[domains]` in config.toml). Refreshed on a timer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DomainsConfig {
    /// Operator-owned primary domains.
    pub system: Vec<String>,
    /// Shared user-contributed pool domains.
    pub community: Vec<String>,
    /// Substrings that disqualify a published community domain.
    pub banned_words: Vec<String>,
}

// ─── LimitsConfig ─────────────────────────────────────────────────────────────

/// Rate-limit policy constants (`[limits]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Sliding-window length for generation counting, seconds.
    pub window_secs: u64,
    /// Generate calls allowed per window for an anonymous IP.
    pub ip_threshold: u64,
    /// Minimum gap between community-domain publish requests, seconds.
    pub publish_gap_secs: u64,
    /// Counter map reset period, seconds.
    pub counter_reset_secs: u64,
    /// Ban-set reset period, seconds. Longer than the counter reset so
    /// bans outlive the raw counters.
    pub ban_reset_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            ip_threshold: 25,
            publish_gap_secs: 5,
            counter_reset_secs: 300,
            ban_reset_secs: 3_600,
        }
    }
}

// ─── TimersConfig ─────────────────────────────────────────────────────────────

/// Background sweep periods (`[timers]` in config.toml), seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimersConfig {
    pub sweep_secs: u64,
    pub count_refresh_secs: u64,
    pub domain_refresh_secs: u64,
    pub login_cache_secs: u64,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            sweep_secs: 30,
            count_refresh_secs: 10,
            domain_refresh_secs: 600,
            login_cache_secs: 600,
        }
    }
}

// ─── IdentityConfig ───────────────────────────────────────────────────────────

/// Passport service settings (`[identity]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub passport_url: String,
    /// Shared secret sent with every login request.
    pub subcode: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            passport_url: "https://passport.invalid".to_string(),
            subcode: String::new(),
        }
    }
}

// ─── WebhookConfig ────────────────────────────────────────────────────────────

/// Webhook and ops-sink settings (`[webhook]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WebhookConfig {
    /// Sink for mail addressed to the webmaster. `None` drops it.
    pub webmaster_sink: Option<String>,
    /// Sink for operational notifications.
    pub ops_sink: Option<String>,
}

// ─── SecretsConfig ────────────────────────────────────────────────────────────

/// Server-side secret material (`[secrets]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecretsConfig {
    /// Folded into every domain-ownership challenge. The daemon refuses to
    /// start without it.
    pub domain_challenge_secret: String,
}

// ─── RelayConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub domains: DomainsConfig,
    pub limits: LimitsConfig,
    pub timers: TimersConfig,
    pub identity: IdentityConfig,
    pub webhook: WebhookConfig,
    pub secrets: SecretsConfig,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl RelayConfig {
    /// Load from a TOML file, falling back to defaults when it is absent.
    pub fn load(path: &Path, data_dir: PathBuf) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str::<RelayConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?,
            Err(_) => {
                info!(path = %path.display(), "no config file, using defaults");
                RelayConfig::default()
            }
        };
        config.data_dir = data_dir;
        Ok(config)
    }
}

/// Re-read the config file on a timer and swap the registry's domain lists.
/// Runs for the process lifetime.
pub async fn run_domain_refresh_loop(
    path: PathBuf,
    registry: SharedDomainRegistry,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<RelayConfig>(&contents) {
                Ok(fresh) => {
                    registry
                        .replace_lists(&fresh.domains.system, &fresh.domains.community)
                        .await;
                }
                Err(e) => warn!(err = %e, "config reload failed, keeping current domain lists"),
            },
            Err(e) => warn!(err = %e, "config file unreadable, keeping current domain lists"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let c = RelayConfig::default();
        assert_eq!(c.server.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(c.limits.ip_threshold, 25);
        assert_eq!(c.limits.window_secs, 300);
        assert!(c.limits.ban_reset_secs > c.limits.counter_reset_secs);
        assert_eq!(c.timers.sweep_secs, 30);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let parsed: RelayConfig = toml::from_str(
            r#"
            [domains]
            system = ["wisp.example"]

            [limits]
            ip_threshold = 50
            "#,
        )
        .unwrap();
        assert_eq!(parsed.domains.system, vec!["wisp.example".to_string()]);
        assert!(parsed.domains.community.is_empty());
        assert_eq!(parsed.limits.ip_threshold, 50);
        assert_eq!(parsed.limits.window_secs, 300);
        assert_eq!(parsed.server.http_port, DEFAULT_HTTP_PORT);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::load(&dir.path().join("nope.toml"), dir.path().into()).unwrap();
        assert_eq!(config.server.http_port, DEFAULT_HTTP_PORT);
    }
}
