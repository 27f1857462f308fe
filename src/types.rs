use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tradable instrument as supplied by the universe resolver
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Provider token / identifier
    pub id: String,
    /// Exchange segment (e.g. "NSE", "NFO", "MCX")
    pub exchange: String,
    /// Human readable name (e.g. "NIFTY", "BANKNIFTY", "CRUDEOIL")
    pub name: String,
    #[serde(rename = "isIndex", default)]
    pub is_index: bool,
    #[serde(rename = "isCommodity", default)]
    pub is_commodity: bool,
}

impl Instrument {
    pub fn new(id: &str, exchange: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            exchange: exchange.to_string(),
            name: name.to_string(),
            is_index: false,
            is_commodity: false,
        }
    }

    pub fn index(mut self) -> Self {
        self.is_index = true;
        self
    }

    pub fn commodity(mut self) -> Self {
        self.is_commodity = true;
        self
    }
}

/// One OHLCV interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl PriceBar {
    /// Finite, positive prices with a consistent high/low envelope
    pub fn is_valid(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite() && *p > 0.0)
            && self.high >= self.low
            && self.volume.is_finite()
            && self.volume >= 0.0
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }
}

/// Drop invalid bars and enforce ascending, timestamp-unique order
pub fn clean_bars(bars: &[PriceBar]) -> Vec<PriceBar> {
    let mut out: Vec<PriceBar> = bars.iter().filter(|b| b.is_valid()).copied().collect();
    out.sort_by_key(|b| b.timestamp);
    // Later duplicates win: the provider re-sends the still-forming bar
    let mut deduped: Vec<PriceBar> = Vec::with_capacity(out.len());
    for bar in out {
        match deduped.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => deduped.push(bar),
        }
    }
    deduped
}

/// Per-cycle quote. Every field except LTP may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub ltp: f64,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    /// Previous session close
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(rename = "changePct", default)]
    pub change_pct: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x > 0.0)
}

impl QuoteSnapshot {
    pub fn from_ltp(ltp: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            ltp,
            open: None,
            high: None,
            low: None,
            close: None,
            change_pct: None,
            timestamp,
        }
    }

    /// Replace malformed fields with "absent". Returns `None` when LTP itself is unusable.
    pub fn sanitized(self) -> Option<Self> {
        if !self.ltp.is_finite() || self.ltp <= 0.0 {
            return None;
        }
        Some(Self {
            ltp: self.ltp,
            open: positive(self.open),
            high: positive(self.high),
            low: positive(self.low),
            close: positive(self.close),
            change_pct: self.change_pct.filter(|x| x.is_finite()),
            timestamp: self.timestamp,
        })
    }

    /// True when the day's open/high/low were all supplied
    pub fn has_ohlc(&self) -> bool {
        self.open.is_some() && self.high.is_some() && self.low.is_some()
    }

    pub fn open_or_ltp(&self) -> f64 {
        self.open.unwrap_or(self.ltp)
    }

    /// Day high, widened to include LTP
    pub fn high_or_ltp(&self) -> f64 {
        self.high.unwrap_or(self.ltp).max(self.ltp)
    }

    /// Day low, widened to include LTP
    pub fn low_or_ltp(&self) -> f64 {
        self.low.unwrap_or(self.ltp).min(self.ltp)
    }

    /// Reported change, else derived from previous close, else 0
    pub fn change_pct_or_derived(&self) -> f64 {
        if let Some(pct) = self.change_pct {
            return pct;
        }
        match self.close {
            Some(prev) if prev > 0.0 => (self.ltp - prev) / prev * 100.0,
            _ => 0.0,
        }
    }
}

/// Discrete trade signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

/// Alert direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    None,
}

impl Direction {
    pub fn from_signal(signal: Signal) -> Self {
        match signal {
            Signal::Buy => Direction::Up,
            Signal::Sell => Direction::Down,
            Signal::Hold => Direction::None,
        }
    }

    /// +1 / -1 / 0
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
            Direction::None => 0.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
            Direction::None => write!(f, "none"),
        }
    }
}

/// Confidence label attached to scores and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(min: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + min * 60, 0).unwrap()
    }

    fn bar(min: i64, close: f64) -> PriceBar {
        PriceBar {
            timestamp: ts(min),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn test_sanitize_drops_non_finite_fields() {
        let q = QuoteSnapshot {
            ltp: 100.0,
            open: Some(f64::NAN),
            high: Some(101.0),
            low: Some(-5.0),
            close: Some(f64::INFINITY),
            change_pct: Some(f64::NAN),
            timestamp: ts(0),
        };
        let q = q.sanitized().unwrap();
        assert_eq!(q.open, None);
        assert_eq!(q.high, Some(101.0));
        assert_eq!(q.low, None);
        assert_eq!(q.close, None);
        assert_eq!(q.change_pct, None);
        assert!(!q.has_ohlc());
        assert_eq!(q.low_or_ltp(), 100.0);
    }

    #[test]
    fn test_sanitize_rejects_bad_ltp() {
        assert!(QuoteSnapshot::from_ltp(f64::NAN, ts(0)).sanitized().is_none());
        assert!(QuoteSnapshot::from_ltp(0.0, ts(0)).sanitized().is_none());
    }

    #[test]
    fn test_change_pct_derived_from_prev_close() {
        let mut q = QuoteSnapshot::from_ltp(102.0, ts(0));
        assert_eq!(q.change_pct_or_derived(), 0.0);
        q.close = Some(100.0);
        assert!((q.change_pct_or_derived() - 2.0).abs() < 1e-9);
        q.change_pct = Some(-1.5);
        assert_eq!(q.change_pct_or_derived(), -1.5);
    }

    #[test]
    fn test_clean_bars_sorts_dedups_and_filters() {
        let mut bad = bar(3, 100.0);
        bad.high = 90.0;
        let bars = vec![bar(2, 102.0), bar(1, 101.0), bad, bar(2, 103.0)];
        let cleaned = clean_bars(&bars);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].close, 101.0);
        assert_eq!(cleaned[1].close, 103.0);
    }
}
