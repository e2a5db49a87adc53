//! Ranking Service
//!
//! Scores a symbol universe from fresh cached quotes against the current
//! benchmark. Symbols with no fresh quote are skipped, never an error.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::application::ports::QuoteStreamPort;
use crate::application::services::{BenchmarkService, SubscriptionCache};
use crate::domain::benchmark::Group;
use crate::domain::scoring::{Candidate, ScoringEngine, Side};
use crate::domain::streaming::{Quote, Symbol};
use crate::infrastructure::metrics;

/// Ranks candidates for one side of the book.
pub struct RankingService<Q>
where
    Q: QuoteStreamPort,
{
    cache: Arc<SubscriptionCache<Q>>,
    benchmarks: Arc<BenchmarkService<Q>>,
    engine: ScoringEngine,
}

impl<Q> RankingService<Q>
where
    Q: QuoteStreamPort + 'static,
{
    /// Create a ranking service.
    pub const fn new(
        cache: Arc<SubscriptionCache<Q>>,
        benchmarks: Arc<BenchmarkService<Q>>,
        engine: ScoringEngine,
    ) -> Self {
        Self {
            cache,
            benchmarks,
            engine,
        }
    }

    /// Rank a single-group universe.
    #[must_use]
    pub fn rank_candidates(&self, universe: &[Symbol], side: Side, group: Group) -> Vec<Candidate> {
        let classified: Vec<(Symbol, Group)> =
            universe.iter().map(|symbol| (symbol.clone(), group)).collect();
        self.rank_classified(&classified, side)
    }

    /// Rank a universe whose symbols carry their own group.
    #[must_use]
    pub fn rank_classified(&self, universe: &[(Symbol, Group)], side: Side) -> Vec<Candidate> {
        self.rank_at(universe, side, Utc::now())
    }

    /// [`Self::rank_classified`] evaluated at an explicit time.
    #[must_use]
    pub fn rank_at(
        &self,
        universe: &[(Symbol, Group)],
        side: Side,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let started = Instant::now();
        let benchmark = self.benchmarks.benchmark_at(now);

        let quotes: Vec<(Quote, Group)> = universe
            .iter()
            .filter_map(|(symbol, group)| {
                let quote = self.cache.get_at(symbol, now)?.quote?;
                Some((quote, *group))
            })
            .collect();

        let candidates = self.engine.rank(
            quotes.iter().map(|(quote, group)| (quote, *group)),
            side,
            &benchmark,
        );

        metrics::record_ranking_duration(side.as_str(), started.elapsed());
        tracing::debug!(
            side = side.as_str(),
            universe = universe.len(),
            quoted = quotes.len(),
            eligible = candidates.len(),
            benchmark_degraded = benchmark.degraded,
            "Ranked candidates"
        );
        candidates
    }
}
