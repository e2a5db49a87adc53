//! Subscription Cache Service
//!
//! Bounded quote cache in front of the quote stream. Holds at most
//! `capacity` upstream subscriptions, evicting the least-recently-touched
//! symbol when a new one is added at capacity, and serves cached quotes
//! with a read-time freshness check.
//!
//! # Locking
//!
//! - `book` (`parking_lot::Mutex`) guards every map and the eviction queue.
//!   It is never held across an `.await`.
//! - `upstream` (`tokio::sync::Mutex`) serializes subscribe/unsubscribe
//!   sequences so only one upstream mutation is in flight at a time.
//!
//! Quote pushes only take `book`, so they never wait on the network.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::application::ports::{QuoteStreamError, QuoteStreamPort};
use crate::domain::streaming::{CacheEntry, FreshnessPolicy, Quote, Symbol};
use crate::domain::subscription::{
    Admission, CacheStats, QuoteUpdate, Subscription, SubscriptionBook,
};
use crate::infrastructure::metrics::{self, QuoteOutcome, UpstreamOp};

/// Default cap on simultaneous upstream subscriptions.
pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 45;

/// Subscription cache errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Upstream subscribe failed; the symbol was not added.
    #[error("subscribe failed for {symbol}: {source}")]
    Subscribe {
        /// Symbol that failed.
        symbol: Symbol,
        /// Upstream error.
        source: QuoteStreamError,
    },

    /// One or more upstream cancellations failed. Tracking was released anyway.
    #[error("unsubscribe failed for {symbol} ({failed} handle(s)): {source}")]
    Unsubscribe {
        /// Symbol whose handles failed.
        symbol: Symbol,
        /// Number of handles that failed to cancel.
        failed: usize,
        /// First upstream error.
        source: QuoteStreamError,
    },
}

impl CacheError {
    /// Whether retrying later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Subscribe { source, .. } | Self::Unsubscribe { source, .. } => {
                source.is_transient()
            }
        }
    }
}

/// Result of clearing every subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearSummary {
    /// Symbols released.
    pub cleared: usize,
    /// Upstream handles whose cancellation failed.
    pub failed_handles: usize,
}

/// Bounded, rotating quote subscription cache.
pub struct SubscriptionCache<Q>
where
    Q: QuoteStreamPort,
{
    stream: Arc<Q>,
    book: Mutex<SubscriptionBook>,
    upstream: tokio::sync::Mutex<()>,
    freshness: FreshnessPolicy,
}

impl<Q> SubscriptionCache<Q>
where
    Q: QuoteStreamPort + 'static,
{
    /// Create a cache with the given capacity and freshness rules.
    #[must_use]
    pub fn new(stream: Arc<Q>, capacity: usize, freshness: FreshnessPolicy) -> Self {
        Self {
            stream,
            book: Mutex::new(SubscriptionBook::new(capacity)),
            upstream: tokio::sync::Mutex::new(()),
            freshness,
        }
    }

    /// Create a cache with default capacity and freshness rules.
    #[must_use]
    pub fn with_defaults(stream: Arc<Q>) -> Self {
        Self::new(stream, DEFAULT_MAX_SUBSCRIPTIONS, FreshnessPolicy::default())
    }

    /// Freshness rules applied on reads.
    #[must_use]
    pub const fn freshness(&self) -> &FreshnessPolicy {
        &self.freshness
    }

    /// Maximum simultaneous upstream subscriptions.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.book.lock().capacity()
    }

    /// Whether the quote stream is connected.
    #[must_use]
    pub fn is_upstream_connected(&self) -> bool {
        self.stream.is_connected()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fresh entry for `symbol`.
    ///
    /// Returns `None` if the symbol is not cached or its quote is older
    /// than the cache timeout (the entry itself is kept).
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<CacheEntry> {
        self.get_at(symbol, Utc::now())
    }

    /// [`Self::get`] evaluated at an explicit time.
    #[must_use]
    pub fn get_at(&self, symbol: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        self.peek_at(symbol, now).filter(|entry| !entry.stale)
    }

    /// Entry for `symbol` regardless of freshness.
    #[must_use]
    pub fn peek(&self, symbol: &str) -> Option<CacheEntry> {
        self.peek_at(symbol, Utc::now())
    }

    /// [`Self::peek`] evaluated at an explicit time.
    #[must_use]
    pub fn peek_at(&self, symbol: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        self.book.lock().entry(symbol, now, &self.freshness)
    }

    /// Whether `symbol` holds an upstream subscription.
    #[must_use]
    pub fn is_active(&self, symbol: &str) -> bool {
        self.book.lock().contains(symbol)
    }

    /// Number of active upstream subscriptions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.book.lock().active_count()
    }

    /// Active symbols in eviction order (next victim first).
    #[must_use]
    pub fn eviction_order(&self) -> Vec<Symbol> {
        self.book.lock().eviction_order().cloned().collect()
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.book.lock().stats(Utc::now(), &self.freshness)
    }

    // =========================================================================
    // Quote pushes
    // =========================================================================

    /// Apply a quote push from the stream.
    ///
    /// Pushes for symbols without a subscription (late deliveries after
    /// removal) are dropped.
    pub fn on_quote(&self, quote: Quote) -> QuoteUpdate {
        let symbol = quote.symbol.clone();
        let update = self.book.lock().apply_quote(quote);

        match update {
            QuoteUpdate::Applied => metrics::record_quotes(QuoteOutcome::Applied, 1),
            QuoteUpdate::OutOfOrder => {
                metrics::record_quotes(QuoteOutcome::OutOfOrder, 1);
                tracing::debug!(symbol = %symbol, "Ignoring out-of-order quote");
            }
            QuoteUpdate::Untracked => {
                metrics::record_quotes(QuoteOutcome::Untracked, 1);
                tracing::trace!(symbol = %symbol, "Dropping quote for untracked symbol");
            }
        }

        update
    }

    // =========================================================================
    // Subscription mutations
    // =========================================================================

    /// Subscribe to `symbol`, evicting the least-recently-touched symbol
    /// when at capacity.
    ///
    /// Adding an already active symbol only touches it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Subscribe`] if the upstream subscribe fails; the
    /// symbol is not added. A failed cancellation of the evicted symbol is
    /// logged but does not fail the add.
    pub async fn add_subscription(&self, symbol: &str) -> Result<(), CacheError> {
        let _upstream = self.upstream.lock().await;

        let victim = {
            let mut book = self.book.lock();
            if book.touch(symbol) {
                tracing::trace!(symbol = %symbol, "Already subscribed, touched");
                return Ok(());
            }

            if book.is_full() {
                debug_assert!(
                    book.next_eviction().is_some(),
                    "subscription book full with an empty eviction queue"
                );
                let Some(victim) = book.evict_front() else {
                    tracing::error!(
                        symbol = %symbol,
                        active = book.active_count(),
                        capacity = book.capacity(),
                        "Eviction queue empty at capacity, skipping subscribe"
                    );
                    return Ok(());
                };
                Some(victim)
            } else {
                None
            }
        };

        if let Some(victim) = victim {
            metrics::record_eviction();
            tracing::debug!(
                evicted = %victim.symbol,
                incoming = %symbol,
                "Evicting least-recently-touched subscription"
            );
            if let Err(e) = self.cancel_upstream(&victim).await {
                tracing::warn!(error = %e, "Evicted subscription not cleanly cancelled");
            }
        }

        match self.stream.subscribe(symbol).await {
            Ok(handle) => {
                let (admission, active) = {
                    let mut book = self.book.lock();
                    let admission = book.record_subscribed(symbol.to_string(), handle, Utc::now());
                    (admission, book.active_count())
                };
                metrics::set_active_subscriptions(active);

                if admission == Admission::Duplicate {
                    tracing::warn!(
                        symbol = %symbol,
                        handle = %handle,
                        "Symbol subscribed more than once, tracking extra handle"
                    );
                } else {
                    tracing::debug!(symbol = %symbol, handle = %handle, active, "Subscribed");
                }
                Ok(())
            }
            Err(source) => {
                metrics::record_upstream_error(UpstreamOp::Subscribe);
                metrics::set_active_subscriptions(self.active_count());
                tracing::warn!(symbol = %symbol, error = %source, "Subscribe failed");
                Err(CacheError::Subscribe {
                    symbol: symbol.to_string(),
                    source,
                })
            }
        }
    }

    /// Unsubscribe `symbol`, cancelling every upstream handle recorded for it.
    ///
    /// Removing a symbol that is not subscribed is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unsubscribe`] if any cancellation fails. The
    /// symbol is released from tracking either way.
    pub async fn remove_subscription(&self, symbol: &str) -> Result<(), CacheError> {
        let _upstream = self.upstream.lock().await;

        let (removed, active) = {
            let mut book = self.book.lock();
            let removed = book.remove(symbol);
            (removed, book.active_count())
        };

        let Some(subscription) = removed else {
            return Ok(());
        };
        metrics::set_active_subscriptions(active);
        tracing::debug!(symbol = %symbol, active, "Unsubscribing");

        self.cancel_upstream(&subscription).await
    }

    /// Move `symbol` to the back of the eviction queue without resubscribing.
    ///
    /// Returns `false` if the symbol is not subscribed.
    pub fn prioritize_symbol(&self, symbol: &str) -> bool {
        self.book.lock().touch(symbol)
    }

    /// Unsubscribe everything (disconnect path).
    ///
    /// Completes even when individual cancellations fail.
    pub async fn clear_all(&self) -> ClearSummary {
        let _upstream = self.upstream.lock().await;

        let drained = self.book.lock().drain();
        metrics::set_active_subscriptions(0);

        let mut summary = ClearSummary {
            cleared: drained.len(),
            failed_handles: 0,
        };
        for subscription in &drained {
            if let Err(CacheError::Unsubscribe { failed, .. }) =
                self.cancel_upstream(subscription).await
            {
                summary.failed_handles += failed;
            }
        }

        tracing::info!(
            cleared = summary.cleared,
            failed_handles = summary.failed_handles,
            "Cleared all subscriptions"
        );
        summary
    }

    /// Cancel every upstream handle of an already-untracked subscription.
    async fn cancel_upstream(&self, subscription: &Subscription) -> Result<(), CacheError> {
        let mut failed = 0;
        let mut first_error = None;

        for handle in &subscription.handles {
            if let Err(e) = self.stream.unsubscribe(*handle).await {
                metrics::record_upstream_error(UpstreamOp::Unsubscribe);
                tracing::warn!(
                    symbol = %subscription.symbol,
                    handle = %handle,
                    error = %e,
                    "Unsubscribe failed, assuming cancelled"
                );
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => Ok(()),
            Some(source) => Err(CacheError::Unsubscribe {
                symbol: subscription.symbol.clone(),
                failed,
                source,
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::paper_stream::PaperQuoteStream;
    use chrono::TimeDelta;
    use rust_decimal_macros::dec;

    fn cache(capacity: usize) -> (Arc<PaperQuoteStream>, SubscriptionCache<PaperQuoteStream>) {
        let stream = Arc::new(PaperQuoteStream::connected());
        let cache = SubscriptionCache::new(
            Arc::clone(&stream),
            capacity,
            FreshnessPolicy::default(),
        );
        (stream, cache)
    }

    #[tokio::test]
    async fn add_subscribes_upstream_once() {
        let (stream, cache) = cache(3);

        cache.add_subscription("BAC-PL").await.unwrap();
        cache.add_subscription("BAC-PL").await.unwrap();

        assert!(cache.is_active("BAC-PL"));
        assert_eq!(stream.subscribe_calls(), vec!["BAC-PL".to_string()]);
        assert_eq!(cache.active_count(), 1);
    }

    #[tokio::test]
    async fn add_at_capacity_evicts_oldest_touch() {
        let (stream, cache) = cache(2);

        cache.add_subscription("A").await.unwrap();
        cache.add_subscription("B").await.unwrap();
        cache.add_subscription("C").await.unwrap();

        assert!(!cache.is_active("A"));
        assert_eq!(cache.eviction_order(), vec!["B".to_string(), "C".to_string()]);
        assert_eq!(stream.unsubscribe_calls().len(), 1);
        assert_eq!(stream.live_symbols(), vec!["B".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn re_adding_active_symbol_protects_it() {
        let (_stream, cache) = cache(2);

        cache.add_subscription("A").await.unwrap();
        cache.add_subscription("B").await.unwrap();
        cache.add_subscription("A").await.unwrap();
        cache.add_subscription("C").await.unwrap();

        assert!(cache.is_active("A"));
        assert!(!cache.is_active("B"));
    }

    #[tokio::test]
    async fn failed_subscribe_is_not_added() {
        let (stream, cache) = cache(2);
        stream.reject_symbol("BAD");

        let err = cache.add_subscription("BAD").await.unwrap_err();

        assert!(matches!(err, CacheError::Subscribe { ref symbol, .. } if symbol == "BAD"));
        assert!(!err.is_transient());
        assert!(!cache.is_active("BAD"));
        assert_eq!(cache.active_count(), 0);
    }

    #[tokio::test]
    async fn failed_unsubscribe_still_releases_slot() {
        let (stream, cache) = cache(2);
        cache.add_subscription("A").await.unwrap();
        stream.fail_unsubscribes(true);

        let err = cache.remove_subscription("A").await.unwrap_err();

        assert!(matches!(err, CacheError::Unsubscribe { failed: 1, .. }));
        assert!(!cache.is_active("A"));
        assert!(cache.peek("A").is_none());
    }

    #[tokio::test]
    async fn remove_twice_unsubscribes_once() {
        let (stream, cache) = cache(2);
        cache.add_subscription("A").await.unwrap();

        cache.remove_subscription("A").await.unwrap();
        cache.remove_subscription("A").await.unwrap();

        assert_eq!(stream.unsubscribe_calls().len(), 1);
    }

    #[tokio::test]
    async fn get_returns_pushed_quote() {
        let (_stream, cache) = cache(2);
        cache.add_subscription("A").await.unwrap();
        let quote = Quote::new("A", Utc::now())
            .with_bid_ask(dec!(24.95), dec!(25.05))
            .with_close(dec!(25.00));

        assert_eq!(cache.on_quote(quote.clone()), QuoteUpdate::Applied);

        let entry = cache.get("A").unwrap();
        assert_eq!(entry.quote, Some(quote));
        assert!(!entry.stale);
    }

    #[tokio::test]
    async fn stale_entry_reads_as_missing_but_is_kept() {
        let (_stream, cache) = cache(2);
        cache.add_subscription("A").await.unwrap();
        let now = Utc::now();
        cache.on_quote(Quote::new("A", now - TimeDelta::seconds(6)).with_last(dec!(25)));

        assert!(cache.get_at("A", now).is_none());
        let entry = cache.peek_at("A", now).unwrap();
        assert!(entry.stale);
        assert!(cache.is_active("A"));
    }

    #[tokio::test]
    async fn prioritize_only_touches_subscribed_symbols() {
        let (stream, cache) = cache(3);
        cache.add_subscription("A").await.unwrap();
        cache.add_subscription("B").await.unwrap();

        assert!(cache.prioritize_symbol("A"));
        assert!(!cache.prioritize_symbol("Z"));

        assert_eq!(cache.eviction_order(), vec!["B".to_string(), "A".to_string()]);
        assert_eq!(stream.subscribe_calls().len(), 2);
    }

    #[tokio::test]
    async fn clear_all_completes_despite_failures() {
        let (stream, cache) = cache(3);
        cache.add_subscription("A").await.unwrap();
        cache.add_subscription("B").await.unwrap();
        stream.fail_unsubscribes(true);

        let summary = cache.clear_all().await;

        assert_eq!(summary.cleared, 2);
        assert_eq!(summary.failed_handles, 2);
        assert_eq!(cache.active_count(), 0);
    }

    #[tokio::test]
    async fn disconnected_stream_surfaces_transient_error() {
        let (stream, cache) = cache(3);
        stream.set_connected(false);

        let err = cache.add_subscription("A").await.unwrap_err();

        assert!(err.is_transient());
        assert!(!cache.is_upstream_connected());
    }

    #[tokio::test]
    async fn stats_report_capacity_and_freshness() {
        let (_stream, cache) = cache(4);
        cache.add_subscription("A").await.unwrap();
        cache.add_subscription("B").await.unwrap();
        cache.on_quote(Quote::new("A", Utc::now()).with_last(dec!(25)));

        let stats = cache.stats();

        assert_eq!(stats.active, 2);
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.fresh, 1);
    }
}
