// Shared traits + messages for venue adapters

use futures::stream::BoxStream;

use crate::market_data::types::{Snapshot, SnapshotFetchError, TransportError};

/// What a feed connection yields, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Opened,
    Closed,
    Error(String),
    // One frame of a combined stream; `payload` is the raw depth diff JSON
    Message { stream: String, payload: serde_json::Value },
}

pub type FeedStream = BoxStream<'static, FeedMessage>;

#[async_trait::async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Either a complete, fully normalised snapshot or an error. Never partial.
    async fn fetch(&self, symbol: &str) -> Result<Snapshot, SnapshotFetchError>;
}

#[async_trait::async_trait]
pub trait FeedTransport: Send + Sync {
    /// Open a fresh connection to `stream_key`. Dropping the returned stream
    /// releases the connection.
    async fn open(&self, stream_key: &str) -> Result<FeedStream, TransportError>;
}

pub mod binance;
pub mod binance_types;
