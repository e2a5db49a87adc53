//! Market Data Streaming Types
//!
//! Core domain types for streamed market data: the quote snapshot pushed by
//! the provider and the cache entry view handed to consumers. Every price
//! field is optional because a freshly subscribed symbol may not have
//! received a given tick yet; absent never means zero.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::subscription::Subscription;

/// A symbol string (preferred-stock ticker or reference ETF).
pub type Symbol = String;

/// Cents per dollar, used when expressing moves in cents.
pub const CENTS_PER_DOLLAR: Decimal = Decimal::ONE_HUNDRED;

// =============================================================================
// Quote
// =============================================================================

/// Latest known market data for a single symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Symbol the quote belongs to.
    pub symbol: Symbol,
    /// Best bid price.
    pub bid: Option<Decimal>,
    /// Best ask price.
    pub ask: Option<Decimal>,
    /// Last trade price.
    pub last: Option<Decimal>,
    /// Previous session close.
    pub close: Option<Decimal>,
    /// Cumulative session volume.
    pub volume: Option<i64>,
    /// Provider-reported daily change in percent.
    pub change_percent: Option<Decimal>,
    /// When the provider observed this snapshot.
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    /// Create an empty quote (no fields populated yet).
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, observed_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            bid: None,
            ask: None,
            last: None,
            close: None,
            volume: None,
            change_percent: None,
            observed_at,
        }
    }

    /// Set the bid and ask.
    #[must_use]
    pub const fn with_bid_ask(mut self, bid: Decimal, ask: Decimal) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    /// Set the last trade price.
    #[must_use]
    pub const fn with_last(mut self, last: Decimal) -> Self {
        self.last = Some(last);
        self
    }

    /// Set the previous close.
    #[must_use]
    pub const fn with_close(mut self, close: Decimal) -> Self {
        self.close = Some(close);
        self
    }

    /// Set the session volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: i64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Set the provider daily change percent.
    #[must_use]
    pub const fn with_change_percent(mut self, change_percent: Decimal) -> Self {
        self.change_percent = Some(change_percent);
        self
    }

    /// Bid/ask spread in dollars, when both sides are present.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.ask? - self.bid?)
    }

    /// Daily move (`last - close`) in cents, when both are present.
    #[must_use]
    pub fn change_cents(&self) -> Option<Decimal> {
        Some((self.last? - self.close?) * CENTS_PER_DOLLAR)
    }

    /// Check whether the quote is older than `timeout` at `now`.
    ///
    /// Quotes stamped in the future (clock skew) count as fresh.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.observed_at) > to_time_delta(timeout)
    }
}

// =============================================================================
// Freshness
// =============================================================================

/// Read-side freshness rules for cached entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Maximum quote age before an entry reads as stale.
    pub cache_timeout: Duration,
    /// How long a new subscription may go without a first quote before it
    /// is reported as degraded.
    pub first_tick_timeout: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            cache_timeout: Duration::from_secs(5),
            first_tick_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// Consumer view of a cached symbol: subscription metadata plus the latest
/// quote and read-time classifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    /// Subscription metadata.
    pub subscription: Subscription,
    /// Latest quote, `None` until the first push arrives.
    pub quote: Option<Quote>,
    /// The quote is missing or older than the cache timeout.
    pub stale: bool,
    /// No first quote arrived within the first-tick timeout.
    pub degraded: bool,
}

impl CacheEntry {
    /// Build an entry view, classifying staleness at `now`.
    #[must_use]
    pub fn classify(
        subscription: Subscription,
        quote: Option<Quote>,
        now: DateTime<Utc>,
        policy: &FreshnessPolicy,
    ) -> Self {
        let stale = quote
            .as_ref()
            .is_none_or(|q| q.is_stale_at(now, policy.cache_timeout));
        let degraded = quote.is_none()
            && now.signed_duration_since(subscription.subscribed_at)
                > to_time_delta(policy.first_tick_timeout);

        Self {
            subscription,
            quote,
            stale,
            degraded,
        }
    }

    /// Symbol of this entry.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.subscription.symbol
    }

    /// The quote, only if fresh.
    #[must_use]
    pub fn fresh_quote(&self) -> Option<&Quote> {
        if self.stale { None } else { self.quote.as_ref() }
    }
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::SubscriptionHandle;
    use rust_decimal_macros::dec;

    fn subscription_at(at: DateTime<Utc>) -> Subscription {
        Subscription::new("BAC-PL".to_string(), SubscriptionHandle::new(1), at)
    }

    #[test]
    fn spread_requires_both_sides() {
        let now = Utc::now();
        let one_sided = Quote::new("BAC-PL", now).with_last(dec!(24.10));
        assert_eq!(one_sided.spread(), None);

        let quote = Quote::new("BAC-PL", now).with_bid_ask(dec!(9.80), dec!(10.00));
        assert_eq!(quote.spread(), Some(dec!(0.20)));
    }

    #[test]
    fn change_cents_from_last_and_close() {
        let quote = Quote::new("PFF", Utc::now())
            .with_last(dec!(31.60))
            .with_close(dec!(31.50));
        assert_eq!(quote.change_cents(), Some(dec!(10)));

        let no_close = Quote::new("PFF", Utc::now()).with_last(dec!(31.60));
        assert_eq!(no_close.change_cents(), None);
    }

    #[test]
    fn quote_staleness_boundary() {
        let now = Utc::now();
        let timeout = Duration::from_secs(5);

        let fresh = Quote::new("X", now - TimeDelta::seconds(5));
        assert!(!fresh.is_stale_at(now, timeout));

        let stale = Quote::new("X", now - TimeDelta::seconds(6));
        assert!(stale.is_stale_at(now, timeout));

        let future = Quote::new("X", now + TimeDelta::seconds(2));
        assert!(!future.is_stale_at(now, timeout));
    }

    #[test]
    fn entry_without_quote_is_stale_but_not_yet_degraded() {
        let now = Utc::now();
        let entry = CacheEntry::classify(
            subscription_at(now),
            None,
            now,
            &FreshnessPolicy::default(),
        );

        assert!(entry.stale);
        assert!(!entry.degraded);
        assert!(entry.fresh_quote().is_none());
    }

    #[test]
    fn entry_without_first_tick_becomes_degraded() {
        let now = Utc::now();
        let entry = CacheEntry::classify(
            subscription_at(now - TimeDelta::seconds(30)),
            None,
            now,
            &FreshnessPolicy::default(),
        );

        assert!(entry.degraded);
    }

    #[test]
    fn entry_with_recent_quote_is_fresh() {
        let now = Utc::now();
        let quote = Quote::new("BAC-PL", now).with_bid_ask(dec!(24.00), dec!(24.10));
        let entry = CacheEntry::classify(
            subscription_at(now - TimeDelta::seconds(60)),
            Some(quote.clone()),
            now,
            &FreshnessPolicy::default(),
        );

        assert!(!entry.stale);
        assert!(!entry.degraded);
        assert_eq!(entry.fresh_quote(), Some(&quote));
    }
}
