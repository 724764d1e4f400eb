use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pm2_notify::config::AppConfig;
use pm2_notify::logging::{self, LoggingConfig, VERBOSE_LOG_FILTER};
use pm2_notify::notification::BatchNotifier;
use pm2_notify::source;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "PM2_NOTIFY_CONFIG", default_value = "pm2-notify.toml")]
    config: PathBuf,

    /// Directory for rolling log files, overrides `logging.dir`
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Listen for events and send batched notifications
    #[default]
    Run,
    /// Validate the configuration and templates, then exit
    Check,
    /// Send one synthetic notification through the configured channel
    Test,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let log_dir = args.log_dir.as_deref().or(config.logging.dir.as_deref());
    let filter = if args.verbose {
        Some(VERBOSE_LOG_FILTER)
    } else {
        config.logging.filter.as_deref()
    };
    let (logging, _guard) = logging::init_logging(log_dir, filter)?;

    let notifier = Arc::new(
        config
            .build_notifier()
            .context("Invalid notification setup")?,
    );

    match args.command.unwrap_or_default() {
        Command::Run => run(&args.config, &config, notifier, logging).await,
        Command::Check => {
            print_summary(&config, &notifier);
            Ok(())
        }
        Command::Test => notifier
            .send_test()
            .await
            .context("Test notification failed"),
    }
}

async fn run(
    config_path: &Path,
    config: &AppConfig,
    notifier: Arc<BatchNotifier>,
    logging: Arc<LoggingConfig>,
) -> anyhow::Result<()> {
    let cancel_token = CancellationToken::new();
    logging.start_retention_cleanup(cancel_token.clone());
    #[cfg(unix)]
    reload_log_filter_on_hangup(config_path.to_path_buf(), logging, cancel_token.clone());
    #[cfg(not(unix))]
    let _ = (config_path, logging);

    let reader = source::connect(&config.source)
        .await
        .context("Failed to subscribe to process events")?;

    info!(
        events = ?config.events,
        interval_ms = config.polling_interval().as_millis() as u64,
        channel = notifier.channel_type(),
        "pm2-notify started"
    );

    notifier.start_flush_task();
    let listener = notifier.listen_for_bus_events(reader);

    shutdown_signal().await;
    info!("Shutdown signal received");

    cancel_token.cancel();
    notifier.stop().await;
    if let Err(e) = listener.await {
        warn!(error = %e, "Bus event listener ended abnormally");
    }

    let stats = notifier.stats();
    info!(
        delivered = stats.events_delivered,
        dropped = stats.dropped_events,
        discarded = stats.queued,
        "pm2-notify stopped"
    );
    Ok(())
}

fn print_summary(config: &AppConfig, notifier: &BatchNotifier) {
    println!("Configuration OK");
    println!("  events:      {}", config.events.join(", "));
    println!("  interval:    {:?}", config.polling_interval());
    println!("  attach logs: {}", config.attach_logs);
    println!("  from/to:     {} -> {}", config.mail.from, config.mail.to);
    println!("  timezone:    {}", config.timezone.as_deref().unwrap_or("local"));
    println!("  channel:     {}", notifier.channel_type());
    println!("  source:      {}", config.source);
    if let Some(path) = config.template_path() {
        println!("  template:    {}", path.display());
    }
}

/// Re-read `logging.filter` from the configuration file on SIGHUP.
///
/// Only the log filter is reloaded; other settings need a restart.
#[cfg(unix)]
fn reload_log_filter_on_hangup(
    config_path: PathBuf,
    logging: Arc<LoggingConfig>,
    cancel_token: CancellationToken,
) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Failed to listen for SIGHUP, log filter reload disabled");
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    let result = AppConfig::load(&config_path)
                        .and_then(|config| logging.reload(config.logging.filter.as_deref()));
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to reload log filter");
                    }
                }
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
