//! Subscription Request Queue
//!
//! UI-facing front door for subscription changes. Callers enqueue requests
//! on a bounded channel and a single worker task applies them to the
//! [`SubscriptionCache`] in order, so UI navigation never waits on the
//! quote provider.
//!
//! Fire-and-forget methods (`add`, `remove`, `prioritize`) drop the request
//! when the queue is full; the `*_and_wait` variants reply over a oneshot.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::QuoteStreamPort;
use crate::application::services::{CacheError, ClearSummary, SubscriptionCache};
use crate::domain::streaming::Symbol;

/// Default request queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type Reply<T> = Option<oneshot::Sender<T>>;

/// A queued subscription change.
#[derive(Debug)]
pub enum SubscriptionRequest {
    /// Subscribe (or touch) a symbol.
    Add {
        /// Symbol.
        symbol: Symbol,
        /// Where to send the result, if anyone is waiting.
        reply: Reply<Result<(), CacheError>>,
    },
    /// Unsubscribe a symbol.
    Remove {
        /// Symbol.
        symbol: Symbol,
        /// Where to send the result, if anyone is waiting.
        reply: Reply<Result<(), CacheError>>,
    },
    /// Move a symbol to the back of the eviction queue.
    Prioritize {
        /// Symbol.
        symbol: Symbol,
    },
    /// Unsubscribe everything.
    ClearAll {
        /// Where to send the summary, if anyone is waiting.
        reply: Reply<ClearSummary>,
    },
}

/// Request queue errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestQueueError {
    /// The queue is at capacity; the request was dropped.
    #[error("subscription request queue is full")]
    QueueFull,

    /// The worker has stopped.
    #[error("subscription worker stopped")]
    WorkerStopped,

    /// The cache rejected the request.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl<T> From<mpsc::error::TrySendError<T>> for RequestQueueError {
    fn from(e: mpsc::error::TrySendError<T>) -> Self {
        match e {
            mpsc::error::TrySendError::Full(_) => Self::QueueFull,
            mpsc::error::TrySendError::Closed(_) => Self::WorkerStopped,
        }
    }
}

/// Cloneable handle for enqueueing subscription requests.
#[derive(Debug, Clone)]
pub struct SubscriptionRequests {
    tx: mpsc::Sender<SubscriptionRequest>,
}

impl SubscriptionRequests {
    /// Enqueue an add without waiting for the result.
    ///
    /// # Errors
    ///
    /// Returns error if the queue is full or the worker stopped.
    pub fn add(&self, symbol: impl Into<Symbol>) -> Result<(), RequestQueueError> {
        Ok(self.tx.try_send(SubscriptionRequest::Add {
            symbol: symbol.into(),
            reply: None,
        })?)
    }

    /// Enqueue a removal without waiting for the result.
    ///
    /// # Errors
    ///
    /// Returns error if the queue is full or the worker stopped.
    pub fn remove(&self, symbol: impl Into<Symbol>) -> Result<(), RequestQueueError> {
        Ok(self.tx.try_send(SubscriptionRequest::Remove {
            symbol: symbol.into(),
            reply: None,
        })?)
    }

    /// Enqueue a prioritization.
    ///
    /// # Errors
    ///
    /// Returns error if the queue is full or the worker stopped.
    pub fn prioritize(&self, symbol: impl Into<Symbol>) -> Result<(), RequestQueueError> {
        Ok(self.tx.try_send(SubscriptionRequest::Prioritize {
            symbol: symbol.into(),
        })?)
    }

    /// Add a symbol and wait for the upstream result.
    ///
    /// # Errors
    ///
    /// Returns error if the worker stopped or the subscribe failed.
    pub async fn add_and_wait(&self, symbol: impl Into<Symbol>) -> Result<(), RequestQueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(SubscriptionRequest::Add {
            symbol: symbol.into(),
            reply: Some(reply),
        })
        .await?;
        rx.await
            .map_err(|_| RequestQueueError::WorkerStopped)?
            .map_err(RequestQueueError::from)
    }

    /// Remove a symbol and wait for the upstream result.
    ///
    /// # Errors
    ///
    /// Returns error if the worker stopped or a cancellation failed.
    pub async fn remove_and_wait(
        &self,
        symbol: impl Into<Symbol>,
    ) -> Result<(), RequestQueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(SubscriptionRequest::Remove {
            symbol: symbol.into(),
            reply: Some(reply),
        })
        .await?;
        rx.await
            .map_err(|_| RequestQueueError::WorkerStopped)?
            .map_err(RequestQueueError::from)
    }

    /// Clear every subscription and wait for the summary.
    ///
    /// # Errors
    ///
    /// Returns error if the worker stopped.
    pub async fn clear_all_and_wait(&self) -> Result<ClearSummary, RequestQueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(SubscriptionRequest::ClearAll { reply: Some(reply) })
            .await?;
        rx.await.map_err(|_| RequestQueueError::WorkerStopped)
    }

    async fn send(&self, request: SubscriptionRequest) -> Result<(), RequestQueueError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| RequestQueueError::WorkerStopped)
    }
}

/// Applies queued requests to the cache, one at a time.
pub struct SubscriptionWorker<Q>
where
    Q: QuoteStreamPort,
{
    cache: Arc<SubscriptionCache<Q>>,
    rx: mpsc::Receiver<SubscriptionRequest>,
}

/// Create a request handle and its worker.
#[must_use]
pub fn channel<Q>(
    cache: Arc<SubscriptionCache<Q>>,
    capacity: usize,
) -> (SubscriptionRequests, SubscriptionWorker<Q>)
where
    Q: QuoteStreamPort + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SubscriptionRequests { tx }, SubscriptionWorker { cache, rx })
}

impl<Q> SubscriptionWorker<Q>
where
    Q: QuoteStreamPort + 'static,
{
    /// Process requests until every handle is dropped or `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Subscription worker started");

        loop {
            let request = tokio::select! {
                request = self.rx.recv() => request,
                () = shutdown.cancelled() => None,
            };
            let Some(request) = request else {
                break;
            };
            self.handle(request).await;
        }

        tracing::info!("Subscription worker stopped");
    }

    /// Spawn [`Self::run`] on the runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn handle(&self, request: SubscriptionRequest) {
        match request {
            SubscriptionRequest::Add { symbol, reply } => {
                let result = self.cache.add_subscription(&symbol).await;
                respond(reply, result);
            }
            SubscriptionRequest::Remove { symbol, reply } => {
                let result = self.cache.remove_subscription(&symbol).await;
                respond(reply, result);
            }
            SubscriptionRequest::Prioritize { symbol } => {
                if !self.cache.prioritize_symbol(&symbol) {
                    tracing::debug!(symbol = %symbol, "Prioritize ignored, not subscribed");
                }
            }
            SubscriptionRequest::ClearAll { reply } => {
                let summary = self.cache.clear_all().await;
                if let Some(reply) = reply {
                    let _ = reply.send(summary);
                }
            }
        }
    }
}

fn respond(reply: Reply<Result<(), CacheError>>, result: Result<(), CacheError>) {
    match reply {
        Some(reply) => {
            // Caller may have stopped waiting.
            let _ = reply.send(result);
        }
        None => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Queued subscription request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::FreshnessPolicy;
    use crate::infrastructure::paper_stream::PaperQuoteStream;

    fn setup(
        queue: usize,
    ) -> (
        Arc<PaperQuoteStream>,
        Arc<SubscriptionCache<PaperQuoteStream>>,
        SubscriptionRequests,
        SubscriptionWorker<PaperQuoteStream>,
    ) {
        let stream = Arc::new(PaperQuoteStream::connected());
        let cache = Arc::new(SubscriptionCache::new(
            Arc::clone(&stream),
            4,
            FreshnessPolicy::default(),
        ));
        let (requests, worker) = channel(Arc::clone(&cache), queue);
        (stream, cache, requests, worker)
    }

    #[tokio::test]
    async fn add_and_wait_reports_result() {
        let (stream, cache, requests, worker) = setup(8);
        stream.reject_symbol("BAD");
        let shutdown = CancellationToken::new();
        let handle = worker.spawn(shutdown.clone());

        requests.add_and_wait("A").await.unwrap();
        let err = requests.add_and_wait("BAD").await.unwrap_err();

        assert!(cache.is_active("A"));
        assert!(matches!(err, RequestQueueError::Cache(CacheError::Subscribe { .. })));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn requests_apply_in_order() {
        let (_stream, cache, requests, worker) = setup(8);
        let shutdown = CancellationToken::new();
        let handle = worker.spawn(shutdown.clone());

        requests.add("A").unwrap();
        requests.add("B").unwrap();
        requests.prioritize("A").unwrap();
        requests.remove("B").unwrap();
        let summary = requests.clear_all_and_wait().await.unwrap();

        assert_eq!(summary.cleared, 1);
        assert_eq!(cache.active_count(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn full_queue_drops_fire_and_forget_requests() {
        let (_stream, _cache, requests, _worker) = setup(1);

        requests.add("A").unwrap();

        assert_eq!(requests.add("B"), Err(RequestQueueError::QueueFull));
    }

    #[tokio::test]
    async fn stopped_worker_is_reported() {
        let (_stream, _cache, requests, worker) = setup(4);
        drop(worker);

        assert_eq!(requests.add("A"), Err(RequestQueueError::WorkerStopped));
        assert_eq!(
            requests.add_and_wait("A").await,
            Err(RequestQueueError::WorkerStopped)
        );
    }
}
