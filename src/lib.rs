//! Local replica of an exchange order book, kept in sync from a REST depth
//! snapshot plus a streamed diff feed.

pub mod config;
pub mod engine;
pub mod market_data;
pub mod telemetry;

pub use engine::analytics::AnalyticsView;
pub use engine::book::OrderBookStore;
pub use engine::types::{AnalyticsError, LevelChange, PriceLevel, Side, TopLevels};
pub use market_data::sequencer::{EventSequencer, SequencerState};
pub use market_data::sync_controller::{ControllerConfig, ControllerState, SyncController, SyncHandle};
pub use market_data::types::{DiffEvent, SequenceGap, Snapshot, SyncError};
