//! Pref Desk Binary
//!
//! Runs the rotating quote cache against the paper quote stream, keeps the
//! benchmark references warm, and periodically logs the best candidates
//! for every side.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin pref-desk
//! ```
//!
//! # Environment Variables
//!
//! All optional:
//! - `PREF_DESK_UNIVERSE`: Symbol lists, e.g. `T:BAC-PL,JPM-PD;C:PSA-PH`
//! - `PREF_DESK_MAX_SUBSCRIPTIONS`: Upstream subscription cap (default: 45)
//! - `PREF_DESK_CACHE_TIMEOUT_SECS`: Quote freshness window (default: 5)
//! - `PREF_DESK_FIRST_TICK_TIMEOUT_SECS`: First quote deadline (default: 10)
//! - `PREF_DESK_ROTATION_INTERVAL_SECS`: Rotation period (default: 45)
//! - `PREF_DESK_ROTATION_BATCH_SIZE`: Symbols per rotation tick (default: 20)
//! - `PREF_DESK_ROTATION_SETTLE_SECS`: Wait before snapshotting (default: 5)
//! - `PREF_DESK_REFERENCE_A` / `PREF_DESK_REFERENCE_B`: Benchmark ETFs (default: PFF / TLT)
//! - `PREF_DESK_HEALTH_PORT`: Health check HTTP port (default: 8085)
//! - `PREF_DESK_REPORT_INTERVAL_SECS`: Candidate log period (default: 30)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pref_desk::application::services::{
    BenchmarkService, RankingService, RotationResults, RotationScheduler, RotationTask,
    SubscriptionCache, SubscriptionRequests, request_queue, spawn_quote_ingest,
};
use pref_desk::domain::benchmark::{BenchmarkEngine, Group};
use pref_desk::domain::scoring::{ScoringEngine, Side};
use pref_desk::domain::streaming::Symbol;
use pref_desk::infrastructure::health::{HealthServer, HealthServerState};
use pref_desk::infrastructure::paper_stream::{PaperQuoteStream, PaperStreamConfig};
use pref_desk::infrastructure::telemetry;
use pref_desk::{DeskConfig, init_metrics};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Candidates logged per side on each report.
const REPORT_DEPTH: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Pref Desk");

    let _metrics_handle = init_metrics();

    let config = DeskConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Quote stream
    let stream = Arc::new(PaperQuoteStream::new(PaperStreamConfig {
        tick_interval: config.paper.tick_interval,
        channel_capacity: config.paper.channel_capacity,
    }));
    stream.set_connected(true);
    tasks.push(tokio::spawn(
        Arc::clone(&stream).run(shutdown_token.clone()),
    ));

    // Cache, ingestion and request worker
    let cache = Arc::new(SubscriptionCache::new(
        Arc::clone(&stream),
        config.cache.max_subscriptions,
        config.cache.freshness_policy(),
    ));
    tasks.push(spawn_quote_ingest(
        Arc::clone(&cache),
        stream.as_ref(),
        shutdown_token.clone(),
    ));

    let (requests, worker) = request_queue::channel(Arc::clone(&cache), config.cache.queue_capacity);
    tasks.push(worker.spawn(shutdown_token.clone()));

    // Benchmarks and ranking
    let benchmarks = Arc::new(BenchmarkService::new(
        Arc::clone(&cache),
        BenchmarkEngine::new(config.benchmark.weights),
        config.benchmark.reference_a.clone(),
        config.benchmark.reference_b.clone(),
    ));
    for reference in benchmarks.reference_symbols() {
        if let Err(e) = requests.add_and_wait(reference.clone()).await {
            tracing::warn!(symbol = %reference, error = %e, "Reference subscribe failed");
        }
    }

    let ranking = Arc::new(RankingService::new(
        Arc::clone(&cache),
        Arc::clone(&benchmarks),
        ScoringEngine::new(config.scoring),
    ));

    // Rotation
    let rotation = Arc::new(
        RotationScheduler::new(Arc::clone(&cache), config.rotation.rotation_config())
            .with_keep_warm(benchmarks.reference_symbols()),
    );
    rotation.set_universe(&config.symbol_lists());
    let rotation_results = rotation.results();
    let rotation_task = Arc::clone(&rotation).spawn_task(&shutdown_token);

    // Candidate reports
    tasks.push(tokio::spawn(report_candidates(
        Arc::clone(&ranking),
        Arc::clone(&rotation_results),
        config.classified_universe(),
        config.server.report_interval,
        shutdown_token.clone(),
    )));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&cache),
        Arc::clone(&benchmarks),
        Arc::clone(&rotation_results),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tasks.push(tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    }));

    tracing::info!(
        universe = rotation.universe_len(),
        capacity = cache.capacity(),
        "Pref desk ready"
    );

    wait_for_signal().await;
    shutdown(rotation_task, &requests, &cache, shutdown_token, tasks).await;

    tracing::info!("Pref desk stopped");
    Ok(())
}

/// Log the best candidates per side and the biggest rotation movers.
async fn report_candidates<Q>(
    ranking: Arc<RankingService<Q>>,
    results: Arc<RotationResults>,
    universe: Vec<(Symbol, Group)>,
    every: Duration,
    shutdown: CancellationToken,
) where
    Q: pref_desk::application::ports::QuoteStreamPort + 'static,
{
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = shutdown.cancelled() => break,
        }

        for &side in Side::all() {
            let candidates = ranking.rank_classified(&universe, side);
            for (rank, candidate) in candidates.iter().take(REPORT_DEPTH).enumerate() {
                tracing::info!(
                    side = side.as_str(),
                    rank = rank + 1,
                    symbol = %candidate.symbol,
                    group = candidate.group.as_str(),
                    score = %candidate.composite_score,
                    target = %candidate.target_price,
                    relative_cents = %candidate.relative_cents,
                    "Top candidate"
                );
            }
        }

        for mover in results.top_movers(REPORT_DEPTH) {
            tracing::info!(
                symbol = %mover.symbol,
                change_cents = %mover.change_cents,
                "Top mover"
            );
        }
    }
}

/// Stop rotation, release every subscription, then stop background tasks.
async fn shutdown<Q>(
    rotation: RotationTask,
    requests: &SubscriptionRequests,
    cache: &SubscriptionCache<Q>,
    shutdown_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
) where
    Q: pref_desk::application::ports::QuoteStreamPort + 'static,
{
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    // A tick after the clear would subscribe a batch nobody releases.
    rotation.stop().await;

    match requests.clear_all_and_wait().await {
        Ok(summary) => tracing::info!(
            cleared = summary.cleared,
            failed_handles = summary.failed_handles,
            "Subscriptions released"
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Request worker unavailable, clearing directly");
            cache.clear_all().await;
        }
    }

    shutdown_token.cancel();

    let joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
    })
    .await;

    if joined.is_err() {
        tracing::warn!("Shutdown timed out waiting for background tasks");
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &DeskConfig) {
    tracing::info!(
        max_subscriptions = config.cache.max_subscriptions,
        rotation_interval_secs = config.rotation.interval.as_secs(),
        batch_size = config.rotation.batch_size,
        reference_a = %config.benchmark.reference_a,
        reference_b = %config.benchmark.reference_b,
        health_port = config.server.health_port,
        lists = config.universe.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        weights = ?config.benchmark.weights,
        scoring = ?config.scoring,
        "Scoring parameters"
    );
}

/// Wait for SIGTERM or SIGINT.
#[allow(clippy::expect_used)]
async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
