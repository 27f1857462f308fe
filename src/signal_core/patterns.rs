//! Single and multi-bar shape flags

use crate::types::{Direction, PriceBar};
use serde::{Deserialize, Serialize};

/// Pattern flags for the most recent bar(s)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PatternFlags {
    /// Indecision bar (doji)
    pub indecision: bool,
    /// Pin/reversal bar and the side it rejects toward
    pub reversal: Option<Direction>,
    pub engulfing: Option<Direction>,
    pub inside_bar: bool,
}

impl PatternFlags {
    /// Scan the last one or two bars
    pub fn scan(bars: &[PriceBar]) -> Self {
        let Some(last) = bars.last() else {
            return Self::default();
        };
        let prev = bars.len().checked_sub(2).map(|i| &bars[i]);

        Self {
            indecision: is_indecision(last),
            reversal: reversal_bar(last),
            engulfing: prev.and_then(|p| engulfing(p, last)),
            inside_bar: prev.map(|p| is_inside_bar(p, last)).unwrap_or(false),
        }
    }
}

/// Body under 10% of the range
pub fn is_indecision(bar: &PriceBar) -> bool {
    let range = bar.range();
    range > 0.0 && bar.body() / range < 0.1
}

/// Long rejection wick: one wick >= 2x body, the other no larger than the body
pub fn reversal_bar(bar: &PriceBar) -> Option<Direction> {
    let range = bar.range();
    if range <= 0.0 {
        return None;
    }
    let body = bar.body();
    let upper = bar.high - bar.open.max(bar.close);
    let lower = bar.open.min(bar.close) - bar.low;

    // Doji-sized bodies still qualify when a single wick dominates the range
    let body = body.max(range * 0.05);

    if lower >= 2.0 * body && upper <= body {
        Some(Direction::Up)
    } else if upper >= 2.0 * body && lower <= body {
        Some(Direction::Down)
    } else {
        None
    }
}

/// Current body engulfs the previous opposite-colored body
pub fn engulfing(prev: &PriceBar, cur: &PriceBar) -> Option<Direction> {
    let prev_bull = prev.close > prev.open;
    let prev_bear = prev.close < prev.open;
    let cur_bull = cur.close > cur.open;
    let cur_bear = cur.close < cur.open;

    if prev_bear && cur_bull && cur.open <= prev.close && cur.close >= prev.open {
        return Some(Direction::Up);
    }
    if prev_bull && cur_bear && cur.open >= prev.close && cur.close <= prev.open {
        return Some(Direction::Down);
    }
    None
}

/// Current high/low inside the previous bar's
pub fn is_inside_bar(prev: &PriceBar, cur: &PriceBar) -> bool {
    cur.high <= prev.high && cur.low >= prev.low && (cur.high < prev.high || cur.low > prev.low)
}
