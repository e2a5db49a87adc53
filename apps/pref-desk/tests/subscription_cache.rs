//! Subscription Cache Integration Tests
//!
//! Exercises the cache against the paper quote stream: capacity, eviction
//! order, upstream side effects, freshness and concurrent callers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

use pref_desk::domain::subscription::QuoteUpdate;
use pref_desk::{
    CacheError, FreshnessPolicy, PaperQuoteStream, Quote, QuoteStreamPort, SubscriptionCache,
};

fn setup(capacity: usize) -> (Arc<PaperQuoteStream>, Arc<SubscriptionCache<PaperQuoteStream>>) {
    let stream = Arc::new(PaperQuoteStream::connected());
    let cache = Arc::new(SubscriptionCache::new(
        Arc::clone(&stream),
        capacity,
        FreshnessPolicy::default(),
    ));
    (stream, cache)
}

#[tokio::test]
async fn cap_holds_and_oldest_touch_is_evicted() {
    let (stream, cache) = setup(3);

    for symbol in ["A", "B", "C", "D", "E"] {
        assert_ok!(cache.add_subscription(symbol).await);
        assert!(cache.active_count() <= 3);
    }

    assert_eq!(
        cache.eviction_order(),
        vec!["C".to_string(), "D".to_string(), "E".to_string()]
    );
    assert_eq!(stream.unsubscribe_calls().len(), 2);
    assert_eq!(stream.live_symbols(), cache.eviction_order());
}

#[tokio::test]
async fn prioritized_symbol_outlives_capacity_pressure() {
    let (_stream, cache) = setup(3);
    for symbol in ["A", "B", "C"] {
        cache.add_subscription(symbol).await.unwrap();
    }

    assert!(cache.prioritize_symbol("A"));
    cache.add_subscription("D").await.unwrap();
    cache.add_subscription("E").await.unwrap();

    assert!(cache.is_active("A"));
    assert!(!cache.is_active("B"));
    assert!(!cache.is_active("C"));
}

#[tokio::test]
async fn concurrent_adds_never_leak_slots() {
    let (stream, cache) = setup(5);

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.add_subscription(&format!("S{i}")).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(cache.active_count(), 5);
    assert_eq!(stream.live_symbols().len(), 5);
    assert_eq!(stream.subscribe_calls().len(), 20);
    assert_eq!(stream.unsubscribe_calls().len(), 15);
}

#[tokio::test]
async fn repeated_removes_cancel_upstream_once() {
    let (stream, cache) = setup(3);
    cache.add_subscription("A").await.unwrap();

    for _ in 0..3 {
        assert_ok!(cache.remove_subscription("A").await);
    }

    assert_eq!(stream.unsubscribe_calls().len(), 1);
    assert!(stream.live_symbols().is_empty());
}

#[tokio::test]
async fn pushed_quote_is_returned_until_it_goes_stale() {
    let (_stream, cache) = setup(3);
    cache.add_subscription("BAC-PL").await.unwrap();
    let observed = Utc::now();
    let quote = Quote::new("BAC-PL", observed)
        .with_bid_ask(dec!(24.95), dec!(25.05))
        .with_last(dec!(25.00))
        .with_close(dec!(24.90));

    cache.on_quote(quote.clone());

    let entry = cache.get_at("BAC-PL", observed).unwrap();
    assert_eq!(entry.quote, Some(quote));

    let later = observed + TimeDelta::seconds(6);
    assert!(cache.get_at("BAC-PL", later).is_none());
    assert!(cache.peek_at("BAC-PL", later).unwrap().stale);
    assert!(cache.is_active("BAC-PL"));
}

#[tokio::test]
async fn missing_first_tick_marks_entry_degraded() {
    let (_stream, cache) = setup(3);
    cache.add_subscription("A").await.unwrap();

    let soon = cache.peek_at("A", Utc::now()).unwrap();
    let much_later = cache.peek_at("A", Utc::now() + TimeDelta::seconds(11)).unwrap();

    assert!(!soon.degraded);
    assert!(much_later.degraded);
    assert!(cache.is_active("A"));
}

#[tokio::test]
async fn late_quote_after_removal_is_dropped() {
    let (_stream, cache) = setup(3);
    cache.add_subscription("A").await.unwrap();
    cache.remove_subscription("A").await.unwrap();

    let update = cache.on_quote(Quote::new("A", Utc::now()).with_last(dec!(25)));

    assert_eq!(update, QuoteUpdate::Untracked);
    assert!(cache.peek("A").is_none());
}

#[tokio::test]
async fn rejected_symbol_leaves_cache_unchanged() {
    let (stream, cache) = setup(2);
    cache.add_subscription("A").await.unwrap();
    stream.reject_symbol("BAD");

    let err = assert_err!(cache.add_subscription("BAD").await);

    assert!(matches!(err, CacheError::Subscribe { .. }));
    assert_eq!(cache.eviction_order(), vec!["A".to_string()]);
}

#[tokio::test]
async fn rejected_symbol_at_capacity_still_frees_the_victim() {
    let (stream, cache) = setup(1);
    cache.add_subscription("A").await.unwrap();
    stream.reject_symbol("BAD");

    assert_err!(cache.add_subscription("BAD").await);

    assert_eq!(cache.active_count(), 0);
    assert!(stream.live_symbols().is_empty());
}

#[tokio::test]
async fn clear_all_releases_everything() {
    let (stream, cache) = setup(4);
    for symbol in ["A", "B", "C"] {
        cache.add_subscription(symbol).await.unwrap();
    }

    let summary = cache.clear_all().await;

    assert_eq!(summary.cleared, 3);
    assert_eq!(summary.failed_handles, 0);
    assert_eq!(cache.active_count(), 0);
    assert!(stream.live_symbols().is_empty());
}

#[tokio::test]
async fn quotes_flow_from_stream_into_cache() {
    let (stream, cache) = setup(4);
    let shutdown = tokio_util::sync::CancellationToken::new();
    let ingest = pref_desk::application::services::spawn_quote_ingest(
        Arc::clone(&cache),
        stream.as_ref(),
        shutdown.clone(),
    );
    cache.add_subscription("A").await.unwrap();

    stream.publish_round();

    let mut fresh = None;
    for _ in 0..50 {
        fresh = cache.get("A");
        if fresh.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let entry = fresh.expect("quote should reach the cache");
    assert!(entry.quote.unwrap().spread().unwrap() > dec!(0));
    assert!(stream.is_connected());

    shutdown.cancel();
    ingest.await.unwrap();
}
