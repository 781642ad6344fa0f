use tracing::trace;

use crate::engine::book::OrderBookStore;
use crate::engine::types::AnalyticsError;

/// Pull-based metrics derived from the current state of an `OrderBookStore`.
///
/// Prices are stored as ticks; `price_scale` converts results back to price units.
pub struct AnalyticsView<'a> {
    book: &'a OrderBookStore,
    price_scale: i64,
}

impl<'a> AnalyticsView<'a> {
    pub fn new(book: &'a OrderBookStore, price_scale: i64) -> Self {
        Self { book, price_scale: price_scale.max(1) }
    }

    /// Liquidity-weighted average price over the top `n` levels of both sides:
    /// `Σ(price·qty) / Σ(qty)`.
    pub fn book_pressure(&self, n: usize) -> Result<f64, AnalyticsError> {
        let top = self.book.top_levels(n);

        let mut weighted: i128 = 0;
        let mut total: i128 = 0;
        for level in top.iter() {
            weighted = (level.price as i128)
                .checked_mul(level.qty as i128)
                .and_then(|notional| weighted.checked_add(notional))
                .ok_or(AnalyticsError::Overflow { depth: n })?;
            total = total.checked_add(level.qty as i128).ok_or(AnalyticsError::Overflow { depth: n })?;
        }

        if total == 0 {
            return Err(AnalyticsError::DivisionByZero { depth: n });
        }

        let pressure = weighted as f64 / total as f64 / self.price_scale as f64;
        trace!(depth = n, pressure, "Computed book pressure");
        Ok(pressure)
    }

    pub fn mid_price(&self) -> Option<f64> {
        let bid = self.book.best_bid()?;
        let ask = self.book.best_ask()?;
        Some((bid.price as f64 + ask.price as f64) / 2.0 / self.price_scale as f64)
    }
}
