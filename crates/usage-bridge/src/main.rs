//! Usage Bridge - forwards upstream usage events to the usage collector

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use usage_bridge::{
    auth::StaticToken,
    bridge::{BridgeCollaborators, EventBridge, EventFilter, IdentityMapper, UsageObserver},
    carry_over::PassThroughCarryOver,
    checkpoint::{CacheStatistics, CheckpointCache, CouchCheckpointStore},
    clock::SystemClock,
    config::BridgeConfig,
    convert::AppUsageConverter,
    delay::{whole_millis, DelayGenerator},
    executor::{execute, LifecycleEvent},
    filter::OrgFilter,
    health::HealthChecker,
    model::Progress,
    progress::ProgressTracker,
    reader::{HttpEventSource, PagingStatistics},
    report::HttpUsageReporter,
    statistics::BridgeStatistics,
};
use usage_bridge_common::logging::{init_logging, LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "usage-bridge")]
#[command(author, version, about = "Forwards upstream usage events to the usage collector")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the upstream feed until interrupted
    Run,

    /// Show the stored progress
    Progress {
        /// Reset the progress so the next run starts from the beginning
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("usage-bridge")
        .build();

    // Environment variables take precedence over the flags
    let log_config = log_config.merge_from(|name| std::env::var(name).ok())?;
    let _guard = init_logging(&log_config)?;

    let config = BridgeConfig::from_env().context("Failed to load configuration")?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let store = Arc::new(CouchCheckpointStore::new(
        client.clone(),
        config.checkpoint.url.clone(),
        config.checkpoint.database.clone(),
    ));
    let cache_statistics = Arc::new(CacheStatistics::default());
    let cache = CheckpointCache::new(
        store.clone(),
        config.checkpoint.document_id.clone(),
        cache_statistics.clone(),
    );
    let progress = Arc::new(ProgressTracker::new(
        cache,
        config.polling.last_known_guid.clone(),
    ));

    match cli.command {
        Command::Run => {
            load_progress(&store, &progress, &config).await;
            run(config, client, progress, cache_statistics).await
        },
        Command::Progress { clear } => {
            progress.load().await.context("Failed to load progress")?;
            if clear {
                progress.clear().await.context("Failed to clear progress")?;
            }
            println!("{}", serde_json::to_string_pretty(&progress.get())?);
            Ok(())
        },
    }
}

/// Load the stored progress, retrying with backoff until it succeeds
async fn load_progress(store: &CouchCheckpointStore, progress: &ProgressTracker, config: &BridgeConfig) {
    let mut delay = DelayGenerator::new(config.polling.min_interval(), config.polling.max_interval());
    loop {
        match try_load_progress(store, progress).await {
            Ok(loaded) => {
                info!(guid = ?loaded.guid, timestamp = ?loaded.timestamp, "Event polling progress loaded");
                return;
            },
            Err(e) => {
                let wait = delay.next_delay();
                warn!(error = %e, retry_in_ms = whole_millis(wait), "Failed to load progress");
                tokio::time::sleep(wait).await;
            },
        }
    }
}

async fn try_load_progress(
    store: &CouchCheckpointStore,
    progress: &ProgressTracker,
) -> usage_bridge::Result<Progress> {
    store.ensure_database().await?;
    progress.load().await
}

async fn run(
    config: BridgeConfig,
    client: reqwest::Client,
    progress: Arc<ProgressTracker>,
    cache_statistics: Arc<CacheStatistics>,
) -> Result<()> {
    info!(
        api = %config.upstream.url,
        collector = %config.collector.url,
        orgs = ?config.polling.orgs,
        "Starting usage bridge"
    );

    let paging_statistics = Arc::new(PagingStatistics::default());
    let statistics = Arc::new(BridgeStatistics::new(cache_statistics, paging_statistics.clone()));
    let health = Arc::new(HealthChecker::new(config.health.failure_threshold()));

    let source = Arc::new(HttpEventSource::new(
        client.clone(),
        config.upstream.url.clone(),
        config.upstream.events_path.clone(),
        Arc::new(StaticToken::new(config.upstream.token.clone())),
        paging_statistics,
    ));
    let reporter = Arc::new(HttpUsageReporter::new(
        client,
        config.collector.url.clone(),
        Arc::new(StaticToken::new(config.collector.token.clone())),
        config.collector.secured,
    ));

    let mut filters: Vec<Arc<dyn EventFilter>> = Vec::new();
    if let Some(orgs) = config.polling.orgs.clone() {
        filters.push(Arc::new(OrgFilter::new(orgs)));
    }

    let bridge = Arc::new(EventBridge::new(BridgeCollaborators {
        source,
        clock: Arc::new(SystemClock),
        min_age: config.polling.min_age(),
        filters,
        mapper: Arc::new(IdentityMapper),
        converter: Arc::new(AppUsageConverter),
        carry_over: Arc::new(PassThroughCarryOver),
        reporter,
        progress,
        delay: DelayGenerator::new(config.polling.min_interval(), config.polling.max_interval()),
        observers: vec![
            statistics.clone() as Arc<dyn UsageObserver>,
            health.clone() as Arc<dyn UsageObserver>,
        ],
    }));

    let monitor = CancellationToken::new();
    let monitor_task = tokio::spawn(watch_health(
        health,
        statistics.clone(),
        config.polling.min_interval(),
        monitor.clone(),
    ));

    let mut execution = execute(bridge, shutdown_signal());
    let mut start_failure = None;
    while let Some(event) = execution.next_event().await {
        match event {
            LifecycleEvent::StartSuccess => info!("Started background job"),
            LifecycleEvent::StartFailure(e) => {
                error!(error = %e, "Failed to start background job");
                start_failure = Some(e);
            },
            LifecycleEvent::StopSuccess => info!("Stopped background job"),
            LifecycleEvent::StopFailure(e) => error!(error = %e, "Failed to stop background job"),
        }
    }
    execution.finished().await.context("Bridge task failed")?;

    monitor.cancel();
    if let Err(e) = monitor_task.await {
        warn!(error = %e, "Health monitor did not shut down cleanly");
    }

    let snapshot = statistics.snapshot();
    info!(statistics = %serde_json::to_string(&snapshot)?, "Usage bridge shut down");

    match start_failure {
        Some(e) => Err(e.context("Bridge failed to start")),
        None => Ok(()),
    }
}

/// Log every change of health together with the current statistics
async fn watch_health(
    health: Arc<HealthChecker>,
    statistics: Arc<BridgeStatistics>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    let mut healthy = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let now_healthy = health.is_healthy();
        if now_healthy == healthy {
            continue;
        }
        healthy = now_healthy;

        let snapshot = serde_json::to_string(&statistics.snapshot()).unwrap_or_default();
        if healthy {
            info!(statistics = %snapshot, "Usage bridge is healthy again");
        } else {
            warn!(statistics = %snapshot, "Usage bridge is unhealthy");
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping");
        },
    }
}
