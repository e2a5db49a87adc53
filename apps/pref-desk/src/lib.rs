#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Pref Desk - Rotating Quote Cache and Opportunity Scorer
//!
//! Keeps a capped set of live quote subscriptions warm across a
//! preferred-stock universe, computes two composite ETF benchmarks, and
//! ranks order candidates by spread and benchmark-relative daily move.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and algorithms
//!   - `streaming`: Quotes, freshness rules, cache entry views
//!   - `subscription`: Capacity-bounded subscription book with FIFO eviction
//!   - `benchmark`: T/C composites from two reference moves
//!   - `scoring`: Target prices, relative moves and candidate ranking
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Quote stream interface
//!   - `services`: Subscription cache, rotation, benchmark and ranking
//!     services, request queue, quote ingestion
//!
//! - **Infrastructure**: Adapters and process concerns
//!   - `paper_stream`: In-process random-walk quote stream
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                    subscribe/unsubscribe
//! RotationScheduler ─┐        ▲
//! Request worker ────┼──► SubscriptionCache ◄── quote ingest ◄── QuoteStream
//!                    │        │
//!                    │        ▼ fresh quotes
//!                    │  BenchmarkService ──► RankingService ──► candidates
//!                    └──► RotationResults ──► top movers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure types and algorithms with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::benchmark::{BenchmarkEngine, BenchmarkSnapshot, BenchmarkWeights, Group};
pub use domain::scoring::{Candidate, ScoringConfig, ScoringEngine, Side};
pub use domain::streaming::{CacheEntry, FreshnessPolicy, Quote, Symbol};
pub use domain::subscription::{CacheStats, SubscriptionHandle};

// Ports
pub use application::ports::{QuoteStreamError, QuoteStreamPort};

// Services
pub use application::services::{
    BenchmarkService, CacheError, RankingService, RotationConfig, RotationResults,
    RotationScheduler, RotationTask, SubscriptionCache, SubscriptionRequests,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, DeskConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Paper stream
pub use infrastructure::paper_stream::{PaperQuoteStream, PaperStreamConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
