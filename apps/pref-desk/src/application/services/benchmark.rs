//! Benchmark Service
//!
//! Reads the two reference ETFs from the subscription cache and computes
//! the current T/C composites on demand.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::application::ports::QuoteStreamPort;
use crate::application::services::SubscriptionCache;
use crate::domain::benchmark::{BenchmarkEngine, BenchmarkSnapshot};
use crate::domain::streaming::Symbol;

/// Computes composites from cached reference quotes.
pub struct BenchmarkService<Q>
where
    Q: QuoteStreamPort,
{
    cache: Arc<SubscriptionCache<Q>>,
    engine: BenchmarkEngine,
    reference_a: Symbol,
    reference_b: Symbol,
}

impl<Q> BenchmarkService<Q>
where
    Q: QuoteStreamPort + 'static,
{
    /// Create a service for the given reference symbols.
    pub fn new(
        cache: Arc<SubscriptionCache<Q>>,
        engine: BenchmarkEngine,
        reference_a: impl Into<Symbol>,
        reference_b: impl Into<Symbol>,
    ) -> Self {
        Self {
            cache,
            engine,
            reference_a: reference_a.into(),
            reference_b: reference_b.into(),
        }
    }

    /// Reference symbols, A first.
    #[must_use]
    pub fn reference_symbols(&self) -> [Symbol; 2] {
        [self.reference_a.clone(), self.reference_b.clone()]
    }

    /// Current composites.
    ///
    /// Never fails: missing or stale references yield a degraded snapshot.
    #[must_use]
    pub fn current_benchmark(&self) -> BenchmarkSnapshot {
        self.benchmark_at(Utc::now())
    }

    /// Composites evaluated at an explicit time.
    #[must_use]
    pub fn benchmark_at(&self, now: DateTime<Utc>) -> BenchmarkSnapshot {
        let a = self.cache.peek_at(&self.reference_a, now);
        let b = self.cache.peek_at(&self.reference_b, now);
        let snapshot = self.engine.compute(a.as_ref(), b.as_ref(), now);

        if snapshot.degraded {
            tracing::debug!(
                reference_a = %self.reference_a,
                reference_b = %self.reference_b,
                a_cached = a.is_some(),
                b_cached = b.is_some(),
                "Benchmark degraded"
            );
        }
        snapshot
    }
}
