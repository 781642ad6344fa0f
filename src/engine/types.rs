use thiserror::Error;

/// Price in integer ticks (see `Normaliser::price_scale`).
pub type Ticks = i64;
/// Quantity in integer lots (see `Normaliser::size_scale`).
pub type Lots = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

// One aggregated price level as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Ticks,
    pub qty: Lots,
}

impl PriceLevel {
    pub fn new(price: Ticks, qty: Lots) -> Self {
        Self { price, qty }
    }
}

impl From<(Ticks, Lots)> for PriceLevel {
    fn from((price, qty): (Ticks, Lots)) -> Self {
        Self { price, qty }
    }
}

/// Pushed to subscribers for every level change applied to the book.
/// `qty == 0` means the level was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub side: Side,
    pub price: Ticks,
    pub qty: Lots,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopLevels {
    pub bids: Vec<PriceLevel>, // best (highest) first
    pub asks: Vec<PriceLevel>, // best (lowest) first
}

impl TopLevels {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceLevel> {
        self.bids.iter().chain(self.asks.iter())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalyticsError {
    #[error("book pressure undefined: no liquidity in the top {depth} levels")]
    DivisionByZero { depth: usize },
    #[error("book pressure overflowed over the top {depth} levels")]
    Overflow { depth: usize },
}
