// Market data module entrypoint
pub mod adapters;        // snapshot/feed traits + venue implementations (Binance)
pub mod normaliser;      // converts strings -> ticks/lots
pub mod retry;           // bounded backoff for snapshot fetch + reconnect
pub mod sequencer;       // aligns the diff stream with a snapshot
pub mod sync_controller; // per-symbol lifecycle, resync on gap/disconnect
pub mod types;           // normalised events, wire forms, errors
