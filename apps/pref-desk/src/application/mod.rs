//! Application Layer - Services and port definitions.
//!
//! This layer contains the services that drive the domain against the
//! quote stream port: the subscription cache, rotation, benchmark and
//! ranking services, and the background request/ingest workers.

/// Port interfaces for external systems (quote stream).
pub mod ports;

/// Application services for caching, rotation and ranking.
pub mod services;
