//! Rotation Scheduler
//!
//! Walks the tracked universe in fixed-size batches so every symbol gets a
//! quote snapshot even though far fewer upstream slots exist than symbols.
//!
//! Each tick:
//! 1. Re-add the keep-warm symbols (benchmark references) so rotation never
//!    evicts them.
//! 2. Subscribe the next batch from the cursor, wrapping to the start.
//! 3. Wait for the settle delay so first quotes can arrive.
//! 4. Copy the fresh quotes the batch received into [`RotationResults`].
//! 5. Advance the cursor by the batch size, modulo universe length.
//!
//! The effective batch never exceeds the cache slots left after the
//! keep-warm symbols, so a tick cannot evict its own batch.
//!
//! Rotation is best-effort. Per-symbol failures are counted and logged, the
//! cursor always advances, and ticks are skipped while the stream is down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::QuoteStreamPort;
use crate::application::services::SubscriptionCache;
use crate::domain::streaming::{Quote, Symbol};
use crate::infrastructure::metrics::{self, TickOutcome};

/// Rotation timing and batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Symbols subscribed per tick.
    pub batch_size: usize,
    /// Wait between subscribing a batch and snapshotting it.
    pub settle_delay: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(45),
            batch_size: 20,
            settle_delay: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Last quote captured for a symbol by rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationSnapshot {
    /// Captured quote.
    pub quote: Quote,
    /// When rotation captured it.
    pub captured_at: DateTime<Utc>,
}

/// A symbol's daily move as captured by rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mover {
    /// Symbol.
    pub symbol: Symbol,
    /// `last - close` in cents.
    pub change_cents: Decimal,
}

/// Long-lived table of rotation snapshots, one per symbol ever rotated.
///
/// Independent of the subscription cache: entries survive eviction.
#[derive(Debug, Default)]
pub struct RotationResults {
    snapshots: RwLock<HashMap<Symbol, RotationSnapshot>>,
}

impl RotationResults {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot, replacing any older one for the symbol.
    pub fn record(&self, quote: Quote, captured_at: DateTime<Utc>) {
        self.snapshots.write().insert(
            quote.symbol.clone(),
            RotationSnapshot { quote, captured_at },
        );
    }

    /// Latest snapshot for `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<RotationSnapshot> {
        self.snapshots.read().get(symbol).cloned()
    }

    /// Number of symbols with a snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Whether no snapshot has been captured yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }

    /// Largest absolute daily moves, biggest first, ties by symbol.
    ///
    /// Snapshots without both `last` and `close` are skipped.
    #[must_use]
    pub fn top_movers(&self, limit: usize) -> Vec<Mover> {
        let mut movers: Vec<Mover> = self
            .snapshots
            .read()
            .values()
            .filter_map(|snapshot| {
                Some(Mover {
                    symbol: snapshot.quote.symbol.clone(),
                    change_cents: snapshot.quote.change_cents()?,
                })
            })
            .collect();

        movers.sort_by(|a, b| {
            b.change_cents
                .abs()
                .cmp(&a.change_cents.abs())
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        movers.truncate(limit);
        movers
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Summary of one rotation tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// What the tick did.
    pub outcome: TickOutcome,
    /// Symbols in the batch.
    pub batch: Vec<Symbol>,
    /// Batch symbols whose subscribe failed.
    pub failed: usize,
    /// Batch symbols whose quote was captured.
    pub captured: usize,
    /// Cursor after the tick.
    pub cursor: usize,
}

#[derive(Debug, Default)]
struct Universe {
    symbols: Vec<Symbol>,
    cursor: usize,
}

/// Periodic batch subscriber over the tracked universe.
pub struct RotationScheduler<Q>
where
    Q: QuoteStreamPort,
{
    cache: Arc<SubscriptionCache<Q>>,
    config: RotationConfig,
    universe: Mutex<Universe>,
    keep_warm: Vec<Symbol>,
    results: Arc<RotationResults>,
}

impl<Q> RotationScheduler<Q>
where
    Q: QuoteStreamPort + 'static,
{
    /// Create a scheduler with an empty universe.
    #[must_use]
    pub fn new(cache: Arc<SubscriptionCache<Q>>, config: RotationConfig) -> Self {
        Self {
            cache,
            config: RotationConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            universe: Mutex::new(Universe::default()),
            keep_warm: Vec::new(),
            results: Arc::new(RotationResults::new()),
        }
    }

    /// Symbols re-added on every tick so they stay subscribed.
    #[must_use]
    pub fn with_keep_warm(mut self, symbols: impl IntoIterator<Item = Symbol>) -> Self {
        self.keep_warm = symbols.into_iter().collect();
        self
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Shared results table.
    #[must_use]
    pub fn results(&self) -> Arc<RotationResults> {
        Arc::clone(&self.results)
    }

    /// Replace the universe with the concatenation of `lists`.
    ///
    /// Duplicates keep their first position. The cursor restarts at zero.
    pub fn set_universe(&self, lists: &[Vec<Symbol>]) {
        let mut seen = HashSet::new();
        let symbols: Vec<Symbol> = lists
            .iter()
            .flatten()
            .filter(|symbol| seen.insert(symbol.as_str()))
            .cloned()
            .collect();

        tracing::info!(
            lists = lists.len(),
            symbols = symbols.len(),
            "Rotation universe updated"
        );
        *self.universe.lock() = Universe { symbols, cursor: 0 };
    }

    /// Number of symbols in the universe.
    #[must_use]
    pub fn universe_len(&self) -> usize {
        self.universe.lock().symbols.len()
    }

    /// Current cursor position.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.universe.lock().cursor
    }

    /// Symbols the next tick will subscribe, wrapping past the end.
    #[must_use]
    pub fn next_batch(&self) -> Vec<Symbol> {
        let batch_size = self.effective_batch_size();
        let universe = self.universe.lock();
        let take = batch_size.min(universe.symbols.len());

        universe
            .symbols
            .iter()
            .cycle()
            .skip(universe.cursor)
            .take(take)
            .cloned()
            .collect()
    }

    /// Batch size capped to the slots the keep-warm symbols leave free.
    #[must_use]
    pub fn effective_batch_size(&self) -> usize {
        let room = self
            .cache
            .capacity()
            .saturating_sub(self.keep_warm.len())
            .max(1);
        self.config.batch_size.min(room)
    }

    fn advance_cursor(&self) -> usize {
        let batch_size = self.effective_batch_size();
        let mut universe = self.universe.lock();
        let len = universe.symbols.len();
        if len > 0 {
            universe.cursor = (universe.cursor + batch_size) % len;
        }
        universe.cursor
    }

    /// Run one rotation tick.
    ///
    /// Returns early (after advancing the cursor) if `shutdown` fires during
    /// the settle delay.
    pub async fn tick(&self, shutdown: &CancellationToken) -> TickReport {
        if !self.cache.is_upstream_connected() {
            tracing::debug!("Quote stream disconnected, skipping rotation tick");
            metrics::record_rotation_tick(TickOutcome::Disconnected);
            return TickReport {
                outcome: TickOutcome::Disconnected,
                batch: Vec::new(),
                failed: 0,
                captured: 0,
                cursor: self.cursor(),
            };
        }

        for symbol in &self.keep_warm {
            if let Err(e) = self.cache.add_subscription(symbol).await {
                tracing::warn!(symbol = %symbol, error = %e, "Keep-warm subscribe failed");
            }
        }

        let batch = self.next_batch();
        if batch.is_empty() {
            metrics::record_rotation_tick(TickOutcome::Idle);
            return TickReport {
                outcome: TickOutcome::Idle,
                batch,
                failed: 0,
                captured: 0,
                cursor: self.cursor(),
            };
        }

        let mut failed = 0;
        for symbol in &batch {
            if self.cache.is_active(symbol) {
                continue;
            }
            if let Err(e) = self.cache.add_subscription(symbol).await {
                tracing::warn!(symbol = %symbol, error = %e, "Rotation subscribe failed");
                failed += 1;
            }
        }
        if failed > 0 {
            metrics::record_rotation_failures(u64::try_from(failed).unwrap_or(u64::MAX));
        }

        let cancelled = tokio::select! {
            () = tokio::time::sleep(self.config.settle_delay) => false,
            () = shutdown.cancelled() => true,
        };

        let mut captured = 0;
        if !cancelled {
            let now = Utc::now();
            for symbol in &batch {
                if let Some(quote) = self.cache.get_at(symbol, now).and_then(|entry| entry.quote) {
                    self.results.record(quote, now);
                    captured += 1;
                }
            }
        }

        let cursor = self.advance_cursor();
        metrics::record_rotation_tick(TickOutcome::Completed);
        tracing::info!(
            batch = batch.len(),
            failed,
            captured,
            cursor,
            results = self.results.len(),
            "Rotation tick complete"
        );

        TickReport {
            outcome: TickOutcome::Completed,
            batch,
            failed,
            captured,
            cursor,
        }
    }

    /// Run ticks on the configured interval until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting rotation scheduler"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&shutdown).await;
                }
                () = shutdown.cancelled() => {
                    tracing::info!("Rotation scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn [`Self::run`] on the runtime.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Spawn [`Self::run`] under a child of `parent` that can be stopped on
    /// its own, ahead of the rest of the process.
    pub fn spawn_task(self: Arc<Self>, parent: &CancellationToken) -> RotationTask {
        let token = parent.child_token();
        let handle = self.spawn(token.clone());
        RotationTask { token, handle }
    }
}

/// A running rotation loop.
pub struct RotationTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RotationTask {
    /// Cancel the loop and wait for any in-flight tick to finish.
    ///
    /// Once this returns no further subscriptions are issued by rotation.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Rotation task ended abnormally");
        }
    }
}
