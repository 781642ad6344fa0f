use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};

use crate::engine::types::{LevelChange, Lots, PriceLevel, Side, Ticks, TopLevels};

/// Aggregated L2 replica of one symbol's book.
///
/// Both sides are keyed by price in ticks. A level with zero quantity is never
/// stored: `apply_level` with `qty == 0` removes it.
#[derive(Debug, Default)]
pub struct OrderBookStore {
    bids: BTreeMap<Ticks, Lots>, // highest price = best bid
    asks: BTreeMap<Ticks, Lots>, // lowest price  = best ask
    subscribers: Vec<mpsc::UnboundedSender<LevelChange>>,
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Every applied level change is delivered in the
    /// order it hit the book. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<LevelChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        debug!(subscribers = self.subscribers.len(), "Added book subscriber");
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn apply_level(&mut self, side: Side, price: Ticks, qty: Lots) {
        let levels = self.side_mut(side);
        if qty == 0 {
            levels.remove(&price);
        } else {
            levels.insert(price, qty);
        }
        trace!(%side, price, qty, "Applied level");

        let change = LevelChange { side, price, qty };
        self.subscribers.retain(|tx| tx.send(change).is_ok());
    }

    /// Replace the whole book with a fresh snapshot
    #[instrument(level = "debug", skip_all, fields(bids = bids.len(), asks = asks.len()))]
    pub fn load_snapshot(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.bids = bids.iter().filter(|l| l.qty > 0).map(|l| (l.price, l.qty)).collect();
        self.asks = asks.iter().filter(|l| l.qty > 0).map(|l| (l.price, l.qty)).collect();
        debug!(bid_levels = self.bids.len(), ask_levels = self.asks.len(), "Loaded snapshot");
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        debug!("Cleared book");
    }

    pub fn top_levels(&self, n: usize) -> TopLevels {
        let bids = self.bids.iter().rev().take(n).map(|(p, q)| PriceLevel::new(*p, *q)).collect();
        let asks = self.asks.iter().take(n).map(|(p, q)| PriceLevel::new(*p, *q)).collect();
        TopLevels { bids, asks }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.iter().next_back().map(|(p, q)| PriceLevel::new(*p, *q))
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(p, q)| PriceLevel::new(*p, *q))
    }

    pub fn spread(&self) -> Option<Ticks> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(ask.price - bid.price)
    }

    pub fn qty_at(&self, side: Side, price: Ticks) -> Option<Lots> {
        self.side_ref(side).get(&price).copied()
    }

    /// Number of price levels on one side.
    pub fn depth(&self, side: Side) -> usize {
        self.side_ref(side).len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    fn side_ref(&self, side: Side) -> &BTreeMap<Ticks, Lots> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Ticks, Lots> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }
}
