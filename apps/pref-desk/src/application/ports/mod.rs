//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteStreamPort`: Live quote provider accepting subscribe/unsubscribe
//!   requests and pushing quote updates

mod quote_stream_port;

pub use quote_stream_port::{QuoteStreamError, QuoteStreamPort};
