//! Quote Stream Port
//!
//! Defines the interface for the live quote provider. Only the subscription
//! cache may call `subscribe`/`unsubscribe`; everything else reads quotes
//! through the cache. Adapters:
//!
//! - `PaperQuoteStream` - In-process random-walk feed for paper sessions and tests

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::streaming::{Quote, Symbol};
use crate::domain::subscription::SubscriptionHandle;

/// Quote stream errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteStreamError {
    /// The provider connection is down.
    #[error("quote stream is not connected")]
    NotConnected,

    /// The provider refused the subscription.
    #[error("subscription rejected for {symbol}: {reason}")]
    SubscribeRejected {
        /// Rejected symbol.
        symbol: Symbol,
        /// Provider reason.
        reason: String,
    },

    /// The provider does not know the handle.
    #[error("unknown subscription handle {0}")]
    UnknownHandle(SubscriptionHandle),

    /// Network or protocol failure.
    #[error("quote stream transport error: {message}")]
    Transport {
        /// Error details.
        message: String,
    },
}

impl QuoteStreamError {
    /// Whether retrying later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Transport { .. })
    }
}

/// Port for the live quote provider.
///
/// Implementations deliver quote pushes on the broadcast channel returned by
/// [`QuoteStreamPort::quote_updates`]; each push is a full snapshot for one
/// symbol.
#[async_trait]
pub trait QuoteStreamPort: Send + Sync {
    /// Subscribe to quotes for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns error if the provider is unreachable or rejects the symbol.
    async fn subscribe(&self, symbol: &str) -> Result<SubscriptionHandle, QuoteStreamError>;

    /// Cancel one upstream subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the cancellation could not be delivered.
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), QuoteStreamError>;

    /// Get a receiver for quote pushes.
    fn quote_updates(&self) -> broadcast::Receiver<Quote>;

    /// Check if the provider is connected.
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(QuoteStreamError::NotConnected.is_transient());
        assert!(
            QuoteStreamError::Transport {
                message: "reset".to_string()
            }
            .is_transient()
        );
        assert!(!QuoteStreamError::UnknownHandle(SubscriptionHandle::new(3)).is_transient());
        assert!(
            !QuoteStreamError::SubscribeRejected {
                symbol: "X".to_string(),
                reason: "no permissions".to_string()
            }
            .is_transient()
        );
    }
}
