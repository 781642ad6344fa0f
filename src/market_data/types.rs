// Normalised depth events + the error kinds of the sync pipeline
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::types::PriceLevel;

/// Incremental book update covering the update id range `[first_update_id, final_update_id]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEvent {
    pub first_update_id: u64,         // U
    pub final_update_id: u64,         // u
    pub prev_final_update_id: Option<u64>, // pu, absent on streams without continuation ids
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Point-in-time book, authoritative up to `last_update_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

// Wire form of one depth diff, e.g.
// {"e":"depthUpdate","U":157,"u":160,"pu":149,"b":[["0.0024","10"]],"a":[["0.0026","100"]]}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireDepthUpdate {
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "pu", default)]
    pub prev_final_update_id: Option<u64>,
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>, // [price, qty]
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
}

// Wire form of the REST depth snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    #[serde(default)]
    pub bids: Vec<[String; 2]>,
    #[serde(default)]
    pub asks: Vec<[String; 2]>,
}

/// A wire value that cannot be turned into an exact tick/lot amount.
/// Events carrying one are dropped whole.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormaliseError {
    #[error("empty numeric field")]
    Empty,
    #[error("invalid decimal {value:?}")]
    InvalidNumber { value: String },
    #[error("{value:?} has more than {decimals} significant decimals")]
    ExcessPrecision { value: String, decimals: u32 },
    #[error("{value:?} overflows the configured scale")]
    Overflow { value: String },
    #[error("update range is inverted: U={first} > u={last}")]
    InvertedRange { first: u64, last: u64 },
    #[error("undecodable depth payload: {0}")]
    Payload(String),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("sequence gap: expected pu={expected}, received pu={received}")]
pub struct SequenceGap {
    pub expected: u64,
    pub received: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotFetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("snapshot request returned HTTP {0}")]
    Status(u16),
    #[error("snapshot parse error: {0}")]
    Parse(String),
}

impl From<NormaliseError> for SnapshotFetchError {
    fn from(e: NormaliseError) -> Self {
        SnapshotFetchError::Parse(e.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("transport protocol error: {0}")]
    Protocol(String),
}

/// Terminal failures of a controller. Everything else is recovered by resyncing.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("snapshot for {symbol} unavailable after {attempts} attempts: {source}")]
    SnapshotFetch {
        symbol: String,
        attempts: u32,
        #[source]
        source: SnapshotFetchError,
    },
    #[error("feed {stream} unavailable after {attempts} attempts: {source}")]
    Transport {
        stream: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },
}
