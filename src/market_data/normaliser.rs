// Convert wire strings into internal integer ticks/lots.
// Conversion is exact: anything that would lose digits is rejected, never truncated.

use crate::engine::types::{Lots, PriceLevel, Ticks};
use crate::market_data::types::{DiffEvent, NormaliseError, Snapshot, WireDepthUpdate, WireSnapshot};

// 10^18 still fits in i64
pub const MAX_DECIMALS: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normaliser {
    pub price_decimals: u32,
    pub size_decimals: u32,
    pub price_scale: i64, // e.g. 100_000_000 => 8 decimal places
    pub size_scale: u64,
}

impl Normaliser {
    pub fn new(price_decimals: u32, size_decimals: u32) -> Self {
        let price_decimals = price_decimals.min(MAX_DECIMALS);
        let size_decimals = size_decimals.min(MAX_DECIMALS);
        Self {
            price_decimals,
            size_decimals,
            price_scale: 10i64.pow(price_decimals),
            size_scale: 10u64.pow(size_decimals),
        }
    }

    pub fn price_to_ticks(&self, s: &str) -> Result<Ticks, NormaliseError> {
        let scaled = parse_scaled(s, self.price_decimals)?;
        Ticks::try_from(scaled).map_err(|_| NormaliseError::Overflow { value: s.to_string() })
    }

    pub fn size_to_lots(&self, s: &str) -> Result<Lots, NormaliseError> {
        let scaled = parse_scaled(s, self.size_decimals)?;
        Lots::try_from(scaled).map_err(|_| NormaliseError::Overflow { value: s.to_string() })
    }

    pub fn level(&self, raw: &[String; 2]) -> Result<PriceLevel, NormaliseError> {
        Ok(PriceLevel::new(self.price_to_ticks(&raw[0])?, self.size_to_lots(&raw[1])?))
    }

    pub fn levels(&self, raw: &[[String; 2]]) -> Result<Vec<PriceLevel>, NormaliseError> {
        raw.iter().map(|lvl| self.level(lvl)).collect()
    }

    /// All-or-nothing: one bad level rejects the whole event.
    pub fn diff_event(&self, wire: &WireDepthUpdate) -> Result<DiffEvent, NormaliseError> {
        if wire.first_update_id > wire.final_update_id {
            return Err(NormaliseError::InvertedRange {
                first: wire.first_update_id,
                last: wire.final_update_id,
            });
        }
        Ok(DiffEvent {
            first_update_id: wire.first_update_id,
            final_update_id: wire.final_update_id,
            prev_final_update_id: wire.prev_final_update_id,
            bids: self.levels(&wire.bids)?,
            asks: self.levels(&wire.asks)?,
        })
    }

    pub fn snapshot(&self, wire: &WireSnapshot) -> Result<Snapshot, NormaliseError> {
        Ok(Snapshot {
            last_update_id: wire.last_update_id,
            bids: self.levels(&wire.bids)?,
            asks: self.levels(&wire.asks)?,
        })
    }
}

// Parse an unsigned decimal string into an integer scaled by 10^decimals.
// Trailing zeros past the scale are fine ("0.50000000" at 2 dp), other digits are not.
fn parse_scaled(s: &str, decimals: u32) -> Result<i128, NormaliseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(NormaliseError::Empty);
    }
    let invalid = || NormaliseError::InvalidNumber { value: s.to_string() };

    let (integer_part, decimal_part) = match s.split_once('.') {
        Some((i, d)) => (i, d),
        None => (s, ""),
    };
    if integer_part.is_empty() && decimal_part.is_empty() {
        return Err(invalid());
    }
    if !integer_part.bytes().all(|b| b.is_ascii_digit()) || !decimal_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let keep = decimal_part.len().min(decimals as usize);
    let (kept, dropped) = decimal_part.split_at(keep);
    if dropped.bytes().any(|b| b != b'0') {
        return Err(NormaliseError::ExcessPrecision { value: s.to_string(), decimals });
    }

    let overflow = || NormaliseError::Overflow { value: s.to_string() };
    let mut value: i128 = 0;
    for b in integer_part.bytes().chain(kept.bytes()) {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as i128))
            .ok_or_else(overflow)?;
    }
    // pad the fraction out to the full scale
    for _ in keep..decimals as usize {
        value = value.checked_mul(10).ok_or_else(overflow)?;
    }
    Ok(value)
}
