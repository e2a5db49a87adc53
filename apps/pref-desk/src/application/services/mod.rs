//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionCache`: Bounded quote cache, the only caller of the stream port
//! - `RotationScheduler`: Periodic batch subscriptions over the universe
//! - `BenchmarkService`: T/C composites from cached reference quotes
//! - `RankingService`: Scored candidates per side
//! - `SubscriptionRequests`: Queue front door for UI-driven changes
//! - `run_quote_ingest`: Applies quote pushes to the cache

mod benchmark;
mod quote_ingest;
mod ranking;
pub mod request_queue;
mod rotation;
mod subscription_cache;

pub use benchmark::BenchmarkService;
pub use quote_ingest::{run_quote_ingest, spawn_quote_ingest};
pub use ranking::RankingService;
pub use request_queue::{
    DEFAULT_QUEUE_CAPACITY, RequestQueueError, SubscriptionRequest, SubscriptionRequests,
    SubscriptionWorker,
};
pub use rotation::{
    Mover, RotationConfig, RotationResults, RotationScheduler, RotationSnapshot, RotationTask,
    TickReport,
};
pub use subscription_cache::{
    CacheError, ClearSummary, DEFAULT_MAX_SUBSCRIPTIONS, SubscriptionCache,
};
