//! Aligns a diff stream with a REST snapshot.
//!
//! Events are buffered in arrival order. Once an anchor (the snapshot's
//! `lastUpdateId`) is known, stale events at the head of the buffer are
//! discarded until one straddles `anchor + 1`; that bridging event and
//! everything after it are applied to the book in order.

use std::collections::VecDeque;

use tracing::{debug, instrument, trace, warn};

use crate::engine::book::OrderBookStore;
use crate::engine::types::Side;
use crate::market_data::types::{DiffEvent, SequenceGap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// No anchor yet. Incoming events are only buffered.
    Empty,
    /// Anchor set, waiting for an event that covers `anchor + 1`.
    Buffering,
    /// Bridged; events are applied as they arrive.
    Synced,
}

#[derive(Debug, Default)]
pub struct EventSequencer {
    pending: VecDeque<DiffEvent>,
    anchor: Option<u64>,
    last_applied_update_id: u64,
    has_bridged: bool,
    expected_continuation: Option<u64>,
    // events dropped while buffering that started past anchor + 1
    discarded_ahead: u64,
}

impl EventSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SequencerState {
        match (self.anchor, self.has_bridged) {
            (None, _) => SequencerState::Empty,
            (Some(_), false) => SequencerState::Buffering,
            (Some(_), true) => SequencerState::Synced,
        }
    }

    pub fn last_applied_update_id(&self) -> u64 {
        self.last_applied_update_id
    }

    pub fn has_bridged(&self) -> bool {
        self.has_bridged
    }

    pub fn expected_continuation(&self) -> Option<u64> {
        self.expected_continuation
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// True when buffering has thrown away events that begin after `anchor + 1`.
    /// With monotone event ranges nothing later can bridge, so the snapshot is
    /// older than the stream and has to be refetched.
    pub fn is_behind_stream(&self) -> bool {
        !self.has_bridged && self.discarded_ahead > 0
    }

    /// Drop everything, back to `Empty`.
    pub fn reset(&mut self) {
        *self = Self::default();
        debug!("Sequencer reset");
    }

    /// Anchor the buffer to a freshly loaded snapshot and apply whatever
    /// buffered events already bridge it. Events received since the last
    /// `reset` are kept: they may contain the bridging event.
    #[instrument(level = "debug", skip(self, book))]
    pub fn set_anchor(&mut self, last_update_id: u64, book: &mut OrderBookStore) -> usize {
        self.anchor = Some(last_update_id);
        self.last_applied_update_id = last_update_id;
        self.has_bridged = false;
        self.discarded_ahead = 0;
        debug!(buffered = self.pending.len(), "Anchor set");
        self.drain(book)
    }

    /// Accept the next event from the stream. A continuation mismatch is
    /// reported without touching any state; the caller is expected to resync.
    pub fn ingest(&mut self, event: DiffEvent, book: &mut OrderBookStore) -> Result<usize, SequenceGap> {
        if let (Some(expected), Some(received)) = (self.expected_continuation, event.prev_final_update_id) {
            if expected != received {
                warn!(expected, received, u = event.final_update_id, "Continuation mismatch");
                return Err(SequenceGap { expected, received });
            }
        }

        trace!(U = event.first_update_id, u = event.final_update_id, "Buffered event");
        self.expected_continuation = Some(event.final_update_id);
        self.pending.push_back(event);
        Ok(self.drain(book))
    }

    /// Bridge (if still needed), then apply every buffered event in order.
    /// Returns the number of events applied.
    pub fn drain(&mut self, book: &mut OrderBookStore) -> usize {
        if self.anchor.is_none() {
            return 0;
        }

        if !self.has_bridged && !self.bridge() {
            return 0;
        }

        let mut applied = 0;
        while let Some(event) = self.pending.pop_front() {
            if event.final_update_id <= self.last_applied_update_id {
                debug!(u = event.final_update_id, last = self.last_applied_update_id, "Skipping already applied event");
                continue;
            }
            for level in &event.bids {
                book.apply_level(Side::Bid, level.price, level.qty);
            }
            for level in &event.asks {
                book.apply_level(Side::Ask, level.price, level.qty);
            }
            self.last_applied_update_id = event.final_update_id;
            applied += 1;
        }

        if applied > 0 {
            metrics::counter!("depthsync_events_applied_total").increment(applied as u64);
            trace!(applied, last = self.last_applied_update_id, "Drained buffer");
        }
        applied
    }

    // Pop head events until one satisfies U <= last + 1 <= u. The bridging
    // event stays at the head. Returns whether the buffer is bridged.
    fn bridge(&mut self) -> bool {
        let next = self.last_applied_update_id.saturating_add(1);
        let mut discarded = 0u64;

        while let Some(head) = self.pending.front() {
            if head.first_update_id <= next && next <= head.final_update_id {
                self.has_bridged = true;
                debug!(U = head.first_update_id, u = head.final_update_id, discarded, "Bridged snapshot to stream");
                break;
            }
            if head.first_update_id > next {
                self.discarded_ahead += 1;
            }
            self.pending.pop_front();
            discarded += 1;
        }

        if discarded > 0 {
            metrics::counter!("depthsync_events_discarded_total").increment(discarded);
        }
        if !self.has_bridged && self.discarded_ahead > 0 {
            warn!(next, discarded_ahead = self.discarded_ahead, "Stream is ahead of snapshot");
        }
        self.has_bridged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::PriceLevel;

    fn event(first: u64, last: u64, pu: Option<u64>) -> DiffEvent {
        DiffEvent {
            first_update_id: first,
            final_update_id: last,
            prev_final_update_id: pu,
            bids: vec![],
            asks: vec![],
        }
    }

    fn event_with_bid(first: u64, last: u64, price: i64, qty: u64) -> DiffEvent {
        DiffEvent { bids: vec![PriceLevel::new(price, qty)], ..event(first, last, None) }
    }

    #[test]
    fn test_initial_state_is_empty() {
        let seq = EventSequencer::new();
        assert_eq!(seq.state(), SequencerState::Empty);
        assert_eq!(seq.pending_len(), 0);
        assert_eq!(seq.expected_continuation(), None);
    }

    #[test]
    fn test_bridging_after_anchor() {
        let mut book = OrderBookStore::new();
        let mut seq = EventSequencer::new();
        seq.set_anchor(100, &mut book);
        assert_eq!(seq.state(), SequencerState::Buffering);

        assert_eq!(seq.ingest(event_with_bid(90, 95, 1, 1), &mut book), Ok(0));
        assert_eq!(seq.state(), SequencerState::Buffering);
        assert_eq!(seq.pending_len(), 0);

        assert_eq!(seq.ingest(event_with_bid(96, 105, 2, 1), &mut book), Ok(1));
        assert_eq!(seq.state(), SequencerState::Synced);
        assert_eq!(seq.last_applied_update_id(), 105);

        assert_eq!(seq.ingest(event_with_bid(106, 110, 3, 1), &mut book), Ok(1));
        assert_eq!(seq.last_applied_update_id(), 110);

        // the discarded event never reached the book
        assert_eq!(book.qty_at(Side::Bid, 1), None);
        assert_eq!(book.qty_at(Side::Bid, 2), Some(1));
        assert_eq!(book.qty_at(Side::Bid, 3), Some(1));
    }

    #[test]
    fn test_bridging_with_events_buffered_before_anchor() {
        let mut book = OrderBookStore::new();
        let mut seq = EventSequencer::new();
        for e in [event_with_bid(90, 95, 1, 1), event_with_bid(96, 105, 2, 1), event_with_bid(106, 110, 3, 1)] {
            assert_eq!(seq.ingest(e, &mut book), Ok(0));
        }
        assert_eq!(seq.state(), SequencerState::Empty);
        assert_eq!(seq.pending_len(), 3);
        assert!(book.is_empty());

        assert_eq!(seq.set_anchor(100, &mut book), 2);
        assert_eq!(seq.state(), SequencerState::Synced);
        assert_eq!(seq.last_applied_update_id(), 110);
        assert_eq!(book.qty_at(Side::Bid, 1), None);
        assert_eq!(book.depth(Side::Bid), 2);
    }

    #[test]
    fn test_event_exactly_at_boundary_bridges() {
        let mut book = OrderBookStore::new();
        let mut seq = EventSequencer::new();
        seq.set_anchor(100, &mut book);
        assert_eq!(seq.ingest(event(101, 101, None), &mut book), Ok(1));
        assert_eq!(seq.last_applied_update_id(), 101);
    }

    #[test]
    fn test_waits_when_buffer_exhausted_without_bridge() {
        let mut book = OrderBookStore::new();
        let mut seq = EventSequencer::new();
        seq.set_anchor(100, &mut book);
        assert_eq!(seq.ingest(event(50, 60, None), &mut book), Ok(0));
        assert_eq!(seq.ingest(event(61, 99, None), &mut book), Ok(0));
        assert_eq!(seq.state(), SequencerState::Buffering);
        assert_eq!(seq.last_applied_update_id(), 100);
        assert!(!seq.is_behind_stream());
    }

    #[test]
    fn test_stream_ahead_of_snapshot_is_flagged() {
        let mut book = OrderBookStore::new();
        let mut seq = EventSequencer::new();
        seq.set_anchor(100, &mut book);
        assert_eq!(seq.ingest(event(120, 130, None), &mut book), Ok(0));
        assert_eq!(seq.state(), SequencerState::Buffering);
        assert!(seq.is_behind_stream());
    }

    #[test]
    fn test_gap_detected_when_pu_mismatches() {
        let mut book = OrderBookStore::new();
        let mut seq = EventSequencer::new();
        seq.set_anchor(100, &mut book);
        assert_eq!(seq.ingest(event(99, 105, Some(98)), &mut book), Ok(1));
        let gap = seq.ingest(event(107, 110, Some(106)), &mut book).unwrap_err();
        assert_eq!(gap, SequenceGap { expected: 105, received: 106 });
        // the rejected event left no trace
        assert_eq!(seq.expected_continuation(), Some(105));
        assert_eq!(seq.last_applied_update_id(), 105);
        assert_eq!(seq.pending_len(), 0);
    }

    #[test]
    fn test_no_gap_without_pu_or_before_first_event() {
        let mut book = OrderBookStore::new();
        let mut seq = EventSequencer::new();
        // first event: nothing to compare against
        assert!(seq.ingest(event(1, 5, Some(777)), &mut book).is_ok());
        // pu absent: never a gap
        assert!(seq.ingest(event(50, 60, None), &mut book).is_ok());
        // pu matches previous u
        assert!(seq.ingest(event(61, 70, Some(60)), &mut book).is_ok());
        assert_eq!(seq.expected_continuation(), Some(70));
    }

    #[test]
    fn test_gap_detected_before_anchor() {
        let mut book = OrderBookStore::new();
        let mut seq = EventSequencer::new();
        seq.ingest(event(1, 5, None), &mut book).unwrap();
        assert!(seq.ingest(event(7, 9, Some(6)), &mut book).is_err());
    }

    #[test]
    fn test_reapplied_range_never_decreases_last_applied() {
        let mut book = OrderBookStore::new();
        let mut seq = EventSequencer::new();
        seq.set_anchor(100, &mut book);
        seq.ingest(event_with_bid(96, 105, 1, 5), &mut book).unwrap();
        seq.ingest(event_with_bid(106, 110, 1, 7), &mut book).unwrap();
        assert_eq!(seq.last_applied_update_id(), 110);

        // replay of an old range from a stream without continuation ids
        assert_eq!(seq.ingest(event_with_bid(96, 105, 1, 5), &mut book), Ok(0));
        assert_eq!(seq.last_applied_update_id(), 110);
        assert_eq!(book.qty_at(Side::Bid, 1), Some(7));
    }

    #[test]
    fn test_zero_quantity_deletes_level() {
        let mut book = OrderBookStore::new();
        book.load_snapshot(&[PriceLevel::new(10, 3)], &[]);
        let mut seq = EventSequencer::new();
        seq.set_anchor(100, &mut book);
        seq.ingest(event_with_bid(100, 102, 10, 0), &mut book).unwrap();
        assert_eq!(book.qty_at(Side::Bid, 10), None);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut book = OrderBookStore::new();
        let mut seq = EventSequencer::new();
        seq.set_anchor(100, &mut book);
        seq.ingest(event(96, 105, None), &mut book).unwrap();
        seq.ingest(event(106, 110, None), &mut book).unwrap();
        seq.reset();
        assert_eq!(seq.state(), SequencerState::Empty);
        assert_eq!(seq.last_applied_update_id(), 0);
        assert_eq!(seq.expected_continuation(), None);
        assert!(!seq.has_bridged());
    }

    #[test]
    fn test_events_are_applied_in_arrival_order() {
        let mut book = OrderBookStore::new();
        let mut rx = book.subscribe();
        let mut seq = EventSequencer::new();
        seq.ingest(event_with_bid(101, 101, 5, 1), &mut book).unwrap();
        seq.ingest(event_with_bid(102, 102, 5, 2), &mut book).unwrap();
        seq.ingest(event_with_bid(103, 103, 5, 3), &mut book).unwrap();
        seq.set_anchor(100, &mut book);

        let quantities: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok()).map(|c| c.qty).collect();
        assert_eq!(quantities, vec![1, 2, 3]);
        assert_eq!(book.qty_at(Side::Bid, 5), Some(3));
    }
}
