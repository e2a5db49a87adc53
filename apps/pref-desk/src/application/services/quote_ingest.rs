//! Quote Ingestion
//!
//! Drains the quote stream's broadcast channel into the subscription cache.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::QuoteStreamPort;
use crate::application::services::SubscriptionCache;
use crate::domain::streaming::Quote;
use crate::infrastructure::metrics::{self, QuoteOutcome};

/// Apply quote pushes to `cache` until the channel closes or `shutdown` fires.
///
/// A lagging receiver skips the overwritten pushes; the next push for each
/// symbol replaces them anyway.
pub async fn run_quote_ingest<Q>(
    cache: Arc<SubscriptionCache<Q>>,
    mut updates: broadcast::Receiver<Quote>,
    shutdown: CancellationToken,
) where
    Q: QuoteStreamPort + 'static,
{
    tracing::info!("Quote ingestion started");

    loop {
        let received = tokio::select! {
            received = updates.recv() => received,
            () = shutdown.cancelled() => break,
        };

        match received {
            Ok(quote) => {
                cache.on_quote(quote);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                metrics::record_quotes(QuoteOutcome::Lagged, skipped);
                tracing::warn!(skipped, "Quote ingestion lagged, pushes dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::warn!("Quote stream channel closed");
                break;
            }
        }
    }

    tracing::info!("Quote ingestion stopped");
}

/// Spawn [`run_quote_ingest`] subscribed to `cache`'s stream.
pub fn spawn_quote_ingest<Q>(
    cache: Arc<SubscriptionCache<Q>>,
    stream: &Q,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    Q: QuoteStreamPort + 'static,
{
    let updates = stream.quote_updates();
    tokio::spawn(run_quote_ingest(cache, updates, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::FreshnessPolicy;
    use crate::infrastructure::paper_stream::PaperQuoteStream;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn pushes_reach_the_cache() {
        let stream = Arc::new(PaperQuoteStream::connected());
        let cache = Arc::new(SubscriptionCache::new(
            Arc::clone(&stream),
            4,
            FreshnessPolicy::default(),
        ));
        cache.add_subscription("A").await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = spawn_quote_ingest(Arc::clone(&cache), stream.as_ref(), shutdown.clone());

        stream.publish(Quote::new("A", Utc::now()).with_bid_ask(dec!(24.90), dec!(25.00)));

        let mut applied = false;
        for _ in 0..50 {
            if cache.get("A").is_some() {
                applied = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(applied);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
