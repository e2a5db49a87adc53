//! Domain Layer - Core market data types and algorithms.
//!
//! This layer contains the quote, subscription, benchmark and scoring
//! logic with no I/O. Everything here is synchronous and deterministic.

/// Quotes, cache entries and freshness rules.
pub mod streaming;

/// Capacity-bounded subscription bookkeeping and eviction order.
pub mod subscription;

/// Composite T/C benchmarks derived from reference ETFs.
pub mod benchmark;

/// Benchmark-relative candidate scoring and ranking.
pub mod scoring;
