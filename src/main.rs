// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use wispmail::{config, identity, inbox, ratelimit, rest, AppContext};

#[derive(Parser)]
#[command(
    name = "wispmaild",
    about = "wispmail — disposable-email relay daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config.toml
    #[arg(long, env = "WISPMAIL_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Data directory for the SQLite database
    #[arg(long, env = "WISPMAIL_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// HTTP API port (overrides the config file)
    #[arg(long, env = "WISPMAIL_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "WISPMAIL_LOG", default_value = "info")]
    log: String,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "WISPMAIL_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand given).
    Serve,
}

/// Install the tracing subscriber.
///
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("wispmaild.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(EnvFilter::new(log_level))
            .with(fmt::layer().compact())
            .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = setup_logging(&args.log, args.log_file.as_deref());

    match args.command {
        None | Some(Command::Serve) => serve(args).await,
    }
}

async fn serve(args: Args) -> Result<()> {
    let mut config = config::RelayConfig::load(&args.config, args.data_dir.clone())
        .context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.http_port = port;
    }
    if config.secrets.domain_challenge_secret.is_empty() {
        anyhow::bail!(
            "secrets.domain_challenge_secret is not set in {} — refusing to start",
            args.config.display()
        );
    }
    if config.domains.system.is_empty() {
        warn!("no system domains configured; every generate request without a domain will fail");
    }

    let ctx = Arc::new(AppContext::init(config).await?);
    info!("wispmaild starting");

    spawn_background_loops(&ctx, args.config.clone());

    if let Some(ops) = &ctx.config.webhook.ops_sink {
        ctx.dispatcher.notify_ops(ops, "wispmaild started");
    }

    rest::start_rest_server(ctx).await
}

/// Independent, non-cancelable loops for the process lifetime: expiration
/// sweep, stats-cache refresh, rate-limit resets, login-cache eviction,
/// and domain-list refresh.
fn spawn_background_loops(ctx: &Arc<AppContext>, config_path: PathBuf) {
    let timers = &ctx.config.timers;
    let limits = &ctx.config.limits;

    tokio::spawn(inbox::lifecycle::run_sweep_loop(
        Arc::clone(&ctx.inboxes),
        Duration::from_secs(timers.sweep_secs),
    ));
    tokio::spawn(inbox::lifecycle::run_count_refresh_loop(
        Arc::clone(&ctx.inboxes),
        Duration::from_secs(timers.count_refresh_secs),
    ));
    tokio::spawn(ratelimit::run_counter_reset_loop(
        Arc::clone(&ctx.limiter),
        Duration::from_secs(limits.counter_reset_secs),
    ));
    tokio::spawn(ratelimit::run_ban_reset_loop(
        Arc::clone(&ctx.limiter),
        Duration::from_secs(limits.ban_reset_secs),
    ));
    tokio::spawn(identity::run_cache_eviction_loop(
        Arc::clone(&ctx.identity),
        Duration::from_secs(timers.login_cache_secs),
    ));
    tokio::spawn(config::run_domain_refresh_loop(
        config_path,
        Arc::clone(&ctx.domains),
        Duration::from_secs(timers.domain_refresh_secs),
    ));
}
