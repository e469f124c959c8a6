//! Venue collaborators
//!
//! The replica never talks to a venue directly. Venue glue implements
//! [`SnapshotSource`] (one-shot REST style fetch) and [`DiffSource`]
//! (streaming subscription), and the sync layer drives them.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use types::ids::MarketId;

use crate::events::{DepthSnapshot, DiffEvent};

/// Failures reported by venue collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Network failure, rate limit or timeout. Retryable.
    #[error("transient source failure: {0}")]
    Transient(String),

    /// The stream ended.
    #[error("source closed")]
    Closed,

    /// The venue does not serve this symbol or is down for maintenance.
    /// Retried on the same policy as `Transient`.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Full-book fetcher.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, symbol: &MarketId) -> Result<DepthSnapshot, SourceError>;
}

/// Streaming diff feed.
#[async_trait]
pub trait DiffSource: Send + Sync {
    /// Open a subscription. Events arrive in venue order.
    async fn subscribe(&self, symbol: &MarketId) -> Result<DiffSubscription, SourceError>;

    /// Release the current subscription. Safe to call any number of times,
    /// with or without an open subscription.
    async fn unsubscribe(&self);
}

/// Receiving ends of one subscription.
///
/// `errors` is the out-of-band channel: any message there, or either
/// channel closing, ends the subscription.
#[derive(Debug)]
pub struct DiffSubscription {
    pub events: mpsc::Receiver<DiffEvent>,
    pub errors: mpsc::Receiver<SourceError>,
}

impl DiffSubscription {
    /// Build a subscription and the sender halves that feed it.
    pub fn channel(
        capacity: usize,
    ) -> (
        mpsc::Sender<DiffEvent>,
        mpsc::Sender<SourceError>,
        DiffSubscription,
    ) {
        let (event_tx, events) = mpsc::channel(capacity.max(1));
        let (error_tx, errors) = mpsc::channel(1);
        (event_tx, error_tx, DiffSubscription { events, errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SourceError::Transient("429".into()).to_string(),
            "transient source failure: 429"
        );
        assert_eq!(SourceError::Closed.to_string(), "source closed");
        assert_eq!(
            SourceError::Unavailable("delisted".into()).to_string(),
            "source unavailable: delisted"
        );
    }

    #[tokio::test]
    async fn test_subscription_channel_delivers_in_order() {
        let (events, _errors, mut sub) = DiffSubscription::channel(4);

        for seq in 1..=3u64 {
            events
                .send(DiffEvent {
                    first_sequence: seq,
                    last_sequence: seq,
                    bid_changes: vec![],
                    ask_changes: vec![],
                })
                .await
                .unwrap();
        }
        drop(events);

        let mut seen = Vec::new();
        while let Some(event) = sub.events.recv().await {
            seen.push(event.last_sequence);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
