//! Paper Quote Stream
//!
//! In-process [`QuoteStreamPort`] adapter. Every subscribed symbol gets a
//! random-walk price seeded on first subscribe, and [`PaperQuoteStream::run`]
//! publishes a full quote for each live symbol once per tick.
//!
//! The adapter records every upstream call and can be told to refuse
//! symbols, fail cancellations or drop its connection, so it doubles as
//! the stream double in tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{QuoteStreamError, QuoteStreamPort};
use crate::domain::streaming::{Quote, Symbol};
use crate::domain::subscription::SubscriptionHandle;

/// Paper stream configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaperStreamConfig {
    /// Time between quote rounds.
    pub tick_interval: Duration,
    /// Broadcast channel capacity.
    pub channel_capacity: usize,
}

impl Default for PaperStreamConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            channel_capacity: 10_000,
        }
    }
}

/// Simulated price state, in cents.
#[derive(Debug, Clone, Copy)]
struct PaperPrice {
    close: i64,
    last: i64,
    volume: i64,
}

#[derive(Debug, Default)]
struct PaperState {
    handles: HashMap<SubscriptionHandle, Symbol>,
    prices: HashMap<Symbol, PaperPrice>,
    rejected: HashSet<Symbol>,
    subscribe_calls: Vec<Symbol>,
    unsubscribe_calls: Vec<SubscriptionHandle>,
}

/// Random-walk quote stream.
pub struct PaperQuoteStream {
    config: PaperStreamConfig,
    connected: AtomicBool,
    fail_unsubscribe: AtomicBool,
    next_handle: AtomicU64,
    state: Mutex<PaperState>,
    tx: broadcast::Sender<Quote>,
}

impl PaperQuoteStream {
    /// Create a disconnected stream.
    #[must_use]
    pub fn new(config: PaperStreamConfig) -> Self {
        let (tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            config,
            connected: AtomicBool::new(false),
            fail_unsubscribe: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
            state: Mutex::new(PaperState::default()),
            tx,
        }
    }

    /// Create a connected stream with default settings.
    #[must_use]
    pub fn connected() -> Self {
        let stream = Self::new(PaperStreamConfig::default());
        stream.set_connected(true);
        stream
    }

    /// Simulate connecting or dropping the connection.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Refuse future subscriptions for `symbol`.
    pub fn reject_symbol(&self, symbol: &str) {
        self.state.lock().rejected.insert(symbol.to_string());
    }

    /// Make every cancellation fail (handles stay live upstream).
    pub fn fail_unsubscribes(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    /// Publish a quote as if it came from the provider.
    ///
    /// Returns the number of receivers it reached.
    pub fn publish(&self, quote: Quote) -> usize {
        self.tx.send(quote).unwrap_or(0)
    }

    /// Every symbol passed to `subscribe`, in call order.
    #[must_use]
    pub fn subscribe_calls(&self) -> Vec<Symbol> {
        self.state.lock().subscribe_calls.clone()
    }

    /// Every handle passed to `unsubscribe`, in call order.
    #[must_use]
    pub fn unsubscribe_calls(&self) -> Vec<SubscriptionHandle> {
        self.state.lock().unsubscribe_calls.clone()
    }

    /// Symbols with at least one live handle, sorted.
    #[must_use]
    pub fn live_symbols(&self) -> Vec<Symbol> {
        let state = self.state.lock();
        let live: BTreeSet<&Symbol> = state.handles.values().collect();
        live.into_iter().cloned().collect()
    }

    /// Publish one quote per live symbol.
    ///
    /// Returns the number of quotes published. Nothing is published while
    /// disconnected.
    pub fn publish_round(&self) -> usize {
        if !self.is_connected() {
            return 0;
        }
        let quotes = self.next_round();
        let count = quotes.len();
        for quote in quotes {
            self.publish(quote);
        }
        count
    }

    fn next_round(&self) -> Vec<Quote> {
        let mut rng = rand::rng();
        let now = Utc::now();
        let mut state = self.state.lock();

        let live: BTreeSet<Symbol> = state.handles.values().cloned().collect();
        live.into_iter()
            .filter_map(|symbol| {
                let price = state.prices.get_mut(&symbol)?;
                price.last = (price.last + rng.random_range(-2..=2)).max(1);
                price.volume += rng.random_range(0..=500);
                let spread = rng.random_range(1..=12);
                let bid = (price.last - spread / 2).max(1);

                Some(
                    Quote::new(symbol, now)
                        .with_bid_ask(cents(bid), cents(bid + spread))
                        .with_last(cents(price.last))
                        .with_close(cents(price.close))
                        .with_volume(price.volume)
                        .with_change_percent(change_percent(price)),
                )
            })
            .collect()
    }

    /// Publish quote rounds on the configured interval until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            tick_interval = ?self.config.tick_interval,
            "Paper quote stream started"
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let published = self.publish_round();
                    tracing::trace!(published, "Paper quote round");
                }
                () = shutdown.cancelled() => {
                    tracing::info!("Paper quote stream stopped");
                    break;
                }
            }
        }
    }
}

fn cents(value: i64) -> Decimal {
    Decimal::new(value, 2)
}

fn change_percent(price: &PaperPrice) -> Decimal {
    if price.close == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(price.last - price.close) * Decimal::ONE_HUNDRED / Decimal::from(price.close))
        .round_dp(4)
}

#[async_trait]
impl QuoteStreamPort for PaperQuoteStream {
    async fn subscribe(&self, symbol: &str) -> Result<SubscriptionHandle, QuoteStreamError> {
        let mut state = self.state.lock();
        state.subscribe_calls.push(symbol.to_string());

        if !self.is_connected() {
            return Err(QuoteStreamError::NotConnected);
        }
        if state.rejected.contains(symbol) {
            return Err(QuoteStreamError::SubscribeRejected {
                symbol: symbol.to_string(),
                reason: "symbol not permitted".to_string(),
            });
        }

        let handle = SubscriptionHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        state.handles.insert(handle, symbol.to_string());
        state.prices.entry(symbol.to_string()).or_insert_with(|| {
            let close = rand::rng().random_range(1_800..=2_600);
            PaperPrice {
                close,
                last: close,
                volume: 0,
            }
        });

        tracing::debug!(symbol = %symbol, handle = %handle, "Paper subscribe");
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), QuoteStreamError> {
        let mut state = self.state.lock();
        state.unsubscribe_calls.push(handle);

        if !self.is_connected() {
            return Err(QuoteStreamError::NotConnected);
        }
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(QuoteStreamError::Transport {
                message: "cancel request timed out".to_string(),
            });
        }

        state
            .handles
            .remove(&handle)
            .map(|_| ())
            .ok_or(QuoteStreamError::UnknownHandle(handle))
    }

    fn quote_updates(&self) -> broadcast::Receiver<Quote> {
        self.tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_issues_unique_handles() {
        let stream = PaperQuoteStream::connected();

        let a = stream.subscribe("A").await.unwrap();
        let b = stream.subscribe("A").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(stream.live_symbols(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn disconnected_stream_refuses_calls() {
        let stream = PaperQuoteStream::new(PaperStreamConfig::default());

        assert_eq!(
            stream.subscribe("A").await,
            Err(QuoteStreamError::NotConnected)
        );
        assert_eq!(stream.subscribe_calls(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn unknown_handle_is_reported() {
        let stream = PaperQuoteStream::connected();
        let handle = SubscriptionHandle::new(99);

        assert_eq!(
            stream.unsubscribe(handle).await,
            Err(QuoteStreamError::UnknownHandle(handle))
        );
    }

    #[tokio::test]
    async fn round_publishes_complete_quotes() {
        let stream = PaperQuoteStream::connected();
        let mut rx = stream.quote_updates();
        stream.subscribe("BAC-PL").await.unwrap();

        assert_eq!(stream.publish_round(), 1);

        let quote = rx.recv().await.unwrap();
        assert_eq!(quote.symbol, "BAC-PL");
        let (bid, ask) = (quote.bid.unwrap(), quote.ask.unwrap());
        assert!(ask > bid);
        assert!(quote.close.is_some());
        assert!(quote.change_cents().is_some());
    }

    #[tokio::test]
    async fn cancelled_symbols_stop_streaming() {
        let stream = PaperQuoteStream::connected();
        let handle = stream.subscribe("A").await.unwrap();
        stream.unsubscribe(handle).await.unwrap();

        assert_eq!(stream.publish_round(), 0);
        assert!(stream.live_symbols().is_empty());
    }

    #[test]
    fn change_percent_from_cents() {
        let price = PaperPrice {
            close: 2_000,
            last: 2_050,
            volume: 0,
        };
        assert_eq!(change_percent(&price), Decimal::new(25, 1));
    }
}
