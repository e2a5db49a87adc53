//! Subscription Bookkeeping
//!
//! Domain types for tracking which symbols hold one of the scarce upstream
//! quote subscriptions, in which order they should be evicted, and the
//! latest quote each one has delivered.
//!
//! # Design
//!
//! The book tracks:
//! - The active set (symbol → subscription metadata + latest quote)
//! - An eviction queue ordered by last touch (front = evicted first)
//! - Every upstream handle issued for a symbol
//!
//! A "touch" is an initial add or an explicit prioritization. Quote pushes
//! never touch, so a symbol that keeps streaming but is no longer wanted can
//! still age out of the queue.
//!
//! The book performs no I/O. Callers apply the upstream side effects
//! (subscribe/unsubscribe) described by the values it returns.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::streaming::{CacheEntry, FreshnessPolicy, Quote, Symbol};

// =============================================================================
// Types
// =============================================================================

/// Opaque identifier returned by the quote stream for one upstream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Wrap a raw provider handle.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw provider handle.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Upstream subscription metadata for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    /// Subscribed symbol.
    pub symbol: Symbol,
    /// When the first upstream subscription was acknowledged.
    pub subscribed_at: DateTime<Utc>,
    /// Whether the subscription still holds an upstream slot.
    pub active: bool,
    /// Every upstream handle issued for this symbol. Normally one; more
    /// than one only when the same symbol was subscribed concurrently.
    pub handles: Vec<SubscriptionHandle>,
}

impl Subscription {
    /// Create an active subscription with a single handle.
    #[must_use]
    pub fn new(symbol: Symbol, handle: SubscriptionHandle, subscribed_at: DateTime<Utc>) -> Self {
        Self {
            symbol,
            subscribed_at,
            active: true,
            handles: vec![handle],
        }
    }
}

/// Outcome of recording an acknowledged upstream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The symbol was not tracked and now occupies a slot.
    New,
    /// The symbol was already tracked; the handle was appended.
    Duplicate,
}

/// Outcome of applying a quote push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteUpdate {
    /// The quote replaced the cached one.
    Applied,
    /// The quote was older than the cached one and was ignored.
    OutOfOrder,
    /// The symbol holds no subscription (late push after removal).
    Untracked,
}

/// Point-in-time statistics for the book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Symbols holding an upstream slot.
    pub active: usize,
    /// Maximum simultaneous upstream slots.
    pub capacity: usize,
    /// Entries with a fresh quote.
    pub fresh: usize,
    /// Entries still waiting on a first quote past the first-tick timeout.
    pub degraded: usize,
    /// Upstream handles outstanding (>= active when duplicates exist).
    pub handles: usize,
}

#[derive(Debug)]
struct Tracked {
    subscription: Subscription,
    quote: Option<Quote>,
}

// =============================================================================
// Subscription Book
// =============================================================================

/// Capacity-bounded subscription book with FIFO-by-touch eviction.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use pref_desk::domain::subscription::{SubscriptionBook, SubscriptionHandle};
///
/// let mut book = SubscriptionBook::new(2);
/// book.record_subscribed("A".to_string(), SubscriptionHandle::new(1), Utc::now());
/// book.record_subscribed("B".to_string(), SubscriptionHandle::new(2), Utc::now());
///
/// // "A" was touched again, so "B" is now first in line for eviction
/// book.touch("A");
/// assert!(book.is_full());
/// let evicted = book.evict_front().unwrap();
/// assert_eq!(evicted.symbol, "B");
/// ```
#[derive(Debug)]
pub struct SubscriptionBook {
    capacity: usize,
    tracked: HashMap<Symbol, Tracked>,
    eviction_queue: VecDeque<Symbol>,
}

impl SubscriptionBook {
    /// Create an empty book. A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tracked: HashMap::with_capacity(capacity),
            eviction_queue: VecDeque::with_capacity(capacity),
        }
    }

    /// Maximum simultaneous upstream subscriptions.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of symbols holding an upstream slot.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.tracked.len()
    }

    /// Whether the next new symbol requires an eviction.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tracked.len() >= self.capacity
    }

    /// Whether `symbol` holds an upstream slot.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.tracked.contains_key(symbol)
    }

    /// Move `symbol` to the back of the eviction queue.
    ///
    /// Returns `false` (and does nothing) if the symbol is not tracked.
    pub fn touch(&mut self, symbol: &str) -> bool {
        if !self.tracked.contains_key(symbol) {
            return false;
        }

        if let Some(pos) = self.eviction_queue.iter().position(|s| s == symbol)
            && let Some(existing) = self.eviction_queue.remove(pos)
        {
            self.eviction_queue.push_back(existing);
        }
        true
    }

    /// The symbol that would be evicted next.
    #[must_use]
    pub fn next_eviction(&self) -> Option<&Symbol> {
        self.eviction_queue.front()
    }

    /// Symbols in eviction order (front first).
    pub fn eviction_order(&self) -> impl Iterator<Item = &Symbol> {
        self.eviction_queue.iter()
    }

    /// Remove the least-recently-touched symbol.
    ///
    /// Returns the deactivated subscription, whose handles the caller must
    /// cancel upstream.
    pub fn evict_front(&mut self) -> Option<Subscription> {
        while let Some(symbol) = self.eviction_queue.pop_front() {
            if let Some(tracked) = self.tracked.remove(&symbol) {
                return Some(deactivate(tracked));
            }
        }
        None
    }

    /// Remove `symbol` from the active set and the eviction queue.
    ///
    /// Returns `None` if the symbol was not tracked.
    pub fn remove(&mut self, symbol: &str) -> Option<Subscription> {
        let tracked = self.tracked.remove(symbol)?;
        self.eviction_queue.retain(|s| s != symbol);
        Some(deactivate(tracked))
    }

    /// Record an acknowledged upstream subscription.
    ///
    /// A symbol that is already tracked keeps its slot, gains the extra
    /// handle and counts as touched.
    pub fn record_subscribed(
        &mut self,
        symbol: Symbol,
        handle: SubscriptionHandle,
        at: DateTime<Utc>,
    ) -> Admission {
        if let Some(tracked) = self.tracked.get_mut(&symbol) {
            tracked.subscription.handles.push(handle);
            self.touch(&symbol);
            return Admission::Duplicate;
        }

        self.eviction_queue.push_back(symbol.clone());
        self.tracked.insert(
            symbol.clone(),
            Tracked {
                subscription: Subscription::new(symbol, handle, at),
                quote: None,
            },
        );
        Admission::New
    }

    /// Apply a quote push (last write wins on `observed_at`).
    ///
    /// Never changes eviction order.
    pub fn apply_quote(&mut self, quote: Quote) -> QuoteUpdate {
        let Some(tracked) = self.tracked.get_mut(&quote.symbol) else {
            return QuoteUpdate::Untracked;
        };

        if let Some(current) = &tracked.quote
            && quote.observed_at < current.observed_at
        {
            return QuoteUpdate::OutOfOrder;
        }

        tracked.quote = Some(quote);
        QuoteUpdate::Applied
    }

    /// Entry view for `symbol`, classified at `now`, stale or not.
    #[must_use]
    pub fn entry(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        policy: &FreshnessPolicy,
    ) -> Option<CacheEntry> {
        self.tracked.get(symbol).map(|tracked| {
            CacheEntry::classify(
                tracked.subscription.clone(),
                tracked.quote.clone(),
                now,
                policy,
            )
        })
    }

    /// Remove every subscription, returning them for upstream cancellation.
    pub fn drain(&mut self) -> Vec<Subscription> {
        let order: Vec<Symbol> = self.eviction_queue.drain(..).collect();
        let mut drained = Vec::with_capacity(order.len());

        for symbol in order {
            if let Some(tracked) = self.tracked.remove(&symbol) {
                drained.push(deactivate(tracked));
            }
        }
        // Anything left means the queue and the map diverged; cancel it too.
        drained.extend(self.tracked.drain().map(|(_, tracked)| deactivate(tracked)));
        drained
    }

    /// Statistics classified at `now`.
    #[must_use]
    pub fn stats(&self, now: DateTime<Utc>, policy: &FreshnessPolicy) -> CacheStats {
        let mut stats = CacheStats {
            active: self.tracked.len(),
            capacity: self.capacity,
            ..CacheStats::default()
        };

        for tracked in self.tracked.values() {
            stats.handles += tracked.subscription.handles.len();
            let entry = CacheEntry::classify(
                tracked.subscription.clone(),
                tracked.quote.clone(),
                now,
                policy,
            );
            if !entry.stale {
                stats.fresh += 1;
            }
            if entry.degraded {
                stats.degraded += 1;
            }
        }

        stats
    }
}

fn deactivate(tracked: Tracked) -> Subscription {
    let mut subscription = tracked.subscription;
    subscription.active = false;
    subscription
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn book_with(capacity: usize, symbols: &[&str]) -> SubscriptionBook {
        let mut book = SubscriptionBook::new(capacity);
        for (i, symbol) in symbols.iter().enumerate() {
            book.record_subscribed(
                (*symbol).to_string(),
                SubscriptionHandle::new(i as u64 + 1),
                Utc::now(),
            );
        }
        book
    }

    fn order(book: &SubscriptionBook) -> Vec<&str> {
        book.eviction_order().map(String::as_str).collect()
    }

    #[test]
    fn record_new_symbol_occupies_slot() {
        let mut book = SubscriptionBook::new(3);

        let admission =
            book.record_subscribed("AAPL".to_string(), SubscriptionHandle::new(7), Utc::now());

        assert_eq!(admission, Admission::New);
        assert!(book.contains("AAPL"));
        assert_eq!(book.active_count(), 1);
        assert!(!book.is_full());
    }

    #[test]
    fn record_duplicate_appends_handle_and_touches() {
        let mut book = book_with(3, &["A", "B"]);

        let admission =
            book.record_subscribed("A".to_string(), SubscriptionHandle::new(99), Utc::now());

        assert_eq!(admission, Admission::Duplicate);
        assert_eq!(book.active_count(), 2);
        assert_eq!(order(&book), vec!["B", "A"]);

        let removed = book.remove("A").unwrap();
        assert_eq!(
            removed.handles,
            vec![SubscriptionHandle::new(1), SubscriptionHandle::new(99)]
        );
    }

    #[test]
    fn touch_moves_symbol_to_back() {
        let mut book = book_with(3, &["A", "B", "C"]);

        assert!(book.touch("A"));

        assert_eq!(order(&book), vec!["B", "C", "A"]);
        assert_eq!(book.next_eviction().map(String::as_str), Some("B"));
    }

    #[test]
    fn touch_unknown_symbol_is_noop() {
        let mut book = book_with(3, &["A"]);

        assert!(!book.touch("Z"));
        assert_eq!(order(&book), vec!["A"]);
    }

    #[test]
    fn evict_front_removes_oldest_touch() {
        let mut book = book_with(2, &["A", "B"]);

        let evicted = book.evict_front().unwrap();

        assert_eq!(evicted.symbol, "A");
        assert!(!evicted.active);
        assert!(!book.contains("A"));
        assert_eq!(order(&book), vec!["B"]);
    }

    #[test]
    fn evict_front_on_empty_book() {
        let mut book = SubscriptionBook::new(2);
        assert!(book.evict_front().is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut book = book_with(3, &["A", "B"]);

        assert!(book.remove("A").is_some());
        assert!(book.remove("A").is_none());
        assert_eq!(order(&book), vec!["B"]);
    }

    #[test]
    fn quote_push_does_not_touch() {
        let mut book = book_with(3, &["A", "B"]);

        let update = book.apply_quote(Quote::new("A", Utc::now()).with_last(dec!(25)));

        assert_eq!(update, QuoteUpdate::Applied);
        assert_eq!(order(&book), vec!["A", "B"]);
    }

    #[test]
    fn older_quote_is_ignored() {
        let mut book = book_with(1, &["A"]);
        let now = Utc::now();

        book.apply_quote(Quote::new("A", now).with_last(dec!(25.10)));
        let update =
            book.apply_quote(Quote::new("A", now - TimeDelta::seconds(1)).with_last(dec!(24.00)));

        assert_eq!(update, QuoteUpdate::OutOfOrder);
        let entry = book.entry("A", now, &FreshnessPolicy::default()).unwrap();
        assert_eq!(entry.quote.unwrap().last, Some(dec!(25.10)));
    }

    #[test]
    fn quote_for_untracked_symbol_is_dropped() {
        let mut book = book_with(1, &["A"]);

        let update = book.apply_quote(Quote::new("Z", Utc::now()));

        assert_eq!(update, QuoteUpdate::Untracked);
        assert!(book.entry("Z", Utc::now(), &FreshnessPolicy::default()).is_none());
    }

    #[test]
    fn drain_returns_everything_in_eviction_order() {
        let mut book = book_with(3, &["A", "B", "C"]);
        book.touch("A");

        let drained: Vec<Symbol> = book.drain().into_iter().map(|s| s.symbol).collect();

        assert_eq!(drained, vec!["B", "C", "A"]);
        assert_eq!(book.active_count(), 0);
        assert!(book.next_eviction().is_none());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let book = SubscriptionBook::new(0);
        assert_eq!(book.capacity(), 1);
    }

    #[test]
    fn stats_classify_entries() {
        let mut book = book_with(4, &["A", "B"]);
        let now = Utc::now();
        book.apply_quote(Quote::new("A", now).with_last(dec!(25)));

        let stats = book.stats(now, &FreshnessPolicy::default());

        assert_eq!(stats.active, 2);
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.fresh, 1);
        assert_eq!(stats.degraded, 0);
        assert_eq!(stats.handles, 2);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        Touch(u8),
        Remove(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u8..12).prop_map(Op::Add),
            2 => (0u8..12).prop_map(Op::Touch),
            1 => (0u8..12).prop_map(Op::Remove),
        ]
    }

    proptest! {
        /// Replays random add/touch/remove sequences against a simple model
        /// (a Vec ordered by last touch) and checks the cap and eviction choice.
        #[test]
        fn eviction_always_picks_least_recently_touched(
            capacity in 1usize..6,
            ops in prop::collection::vec(op_strategy(), 1..80),
        ) {
            let mut book = SubscriptionBook::new(capacity);
            let mut model: Vec<String> = Vec::new();
            let mut next_handle = 0u64;

            for op in ops {
                match op {
                    Op::Add(n) => {
                        let symbol = format!("S{n}");
                        if book.contains(&symbol) {
                            book.touch(&symbol);
                            model.retain(|s| s != &symbol);
                            model.push(symbol);
                            continue;
                        }
                        if book.is_full() {
                            let evicted = book.evict_front().map(|s| s.symbol);
                            let expected = model.first().cloned();
                            prop_assert_eq!(evicted, expected);
                            model.remove(0);
                        }
                        next_handle += 1;
                        book.record_subscribed(
                            symbol.clone(),
                            SubscriptionHandle::new(next_handle),
                            Utc::now(),
                        );
                        model.push(symbol);
                    }
                    Op::Touch(n) => {
                        let symbol = format!("S{n}");
                        let touched = book.touch(&symbol);
                        prop_assert_eq!(touched, model.contains(&symbol));
                        if touched {
                            model.retain(|s| s != &symbol);
                            model.push(symbol);
                        }
                    }
                    Op::Remove(n) => {
                        let symbol = format!("S{n}");
                        let removed = book.remove(&symbol).is_some();
                        prop_assert_eq!(removed, model.contains(&symbol));
                        model.retain(|s| s != &symbol);
                    }
                }

                prop_assert!(book.active_count() <= capacity);
                let actual: Vec<String> = book.eviction_order().cloned().collect();
                prop_assert_eq!(&actual, &model);
            }
        }
    }
}
