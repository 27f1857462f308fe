//! Tiered Indicator Resolver
//!
//! Builds an [`IndicatorBundle`] from whatever data is actually available:
//! - Tier 1: a usable bar series, full indicator library
//! - Tier 2: only the day's OHLC snapshot, pseudo-indicators
//! - Tier 3: only LTP and percent change
//!
//! Missing quote fields fall back to LTP here and nowhere else.

use serde::{Deserialize, Serialize};

use super::indicators::{self, Adx, Bands, Macd};
use super::patterns::PatternFlags;
use crate::config::ResolverConfig;
use crate::types::{clean_bars, Instrument, PriceBar, QuoteSnapshot};

/// Data-quality tier the bundle was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Full bar history
    Full = 1,
    /// Single OHLC snapshot proxy
    Snapshot = 2,
    /// Bare price change
    PriceOnly = 3,
}

impl Tier {
    pub fn number(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Regime {
    Trending,
    Sideways,
    InsufficientData,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Trending => write!(f, "trending"),
            Regime::Sideways => write!(f, "sideways"),
            Regime::InsufficientData => write!(f, "insufficient-data"),
        }
    }
}

/// Where support/resistance levels came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelSource {
    /// Recent bar range
    Bars,
    /// Pivot formula over the day's OHLC
    Pivot,
}

/// Recently observed high/low levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeLevels {
    pub resistance: f64,
    pub support: f64,
    pub source: LevelSource,
}

impl RangeLevels {
    pub fn width(&self) -> f64 {
        (self.resistance - self.support).max(0.0)
    }
}

/// Normalized indicator set for one instrument, one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorBundle {
    pub tier: Tier,
    pub price: f64,
    pub change_pct: f64,
    /// Fast trend average (Tier 1) or LTP (Tier 2 proxy)
    pub fast_avg: Option<f64>,
    /// Slow trend average (Tier 1) or day open (Tier 2 proxy)
    pub slow_avg: Option<f64>,
    /// Bounded oscillator in [0, 100], or the range-position proxy
    pub oscillator: Option<f64>,
    pub macd: Option<Macd>,
    /// VWAP (Tier 1) or pivot (Tier 2)
    pub vwap: Option<f64>,
    pub bands: Option<Bands>,
    pub adx: Option<Adx>,
    /// Absolute volatility: ATR (Tier 1) or day range (Tier 2); 0 when unknown
    pub volatility: f64,
    pub volatility_pct: f64,
    /// Most recent true range
    pub volatility_current: Option<f64>,
    /// Median of recent true ranges
    pub volatility_baseline: Option<f64>,
    pub regime: Regime,
    pub patterns: PatternFlags,
    pub levels: Option<RangeLevels>,
}

impl IndicatorBundle {
    /// (fast - slow) / price * 100, when both averages are known
    pub fn trend_spread_pct(&self) -> Option<f64> {
        match (self.fast_avg, self.slow_avg) {
            (Some(f), Some(s)) if self.price > 0.0 => Some((f - s) / self.price * 100.0),
            _ => None,
        }
    }

    /// (price - vwap) / price * 100
    pub fn vwap_distance_pct(&self) -> Option<f64> {
        match self.vwap {
            Some(v) if self.price > 0.0 => Some((self.price - v) / self.price * 100.0),
            _ => None,
        }
    }

    /// Trend histogram as percent of price
    pub fn histogram_pct(&self) -> Option<f64> {
        match self.macd {
            Some(m) if self.price > 0.0 => Some(m.histogram / self.price * 100.0),
            _ => None,
        }
    }

    fn price_only(price: f64, change_pct: f64) -> Self {
        Self {
            tier: Tier::PriceOnly,
            price,
            change_pct,
            fast_avg: None,
            slow_avg: None,
            oscillator: None,
            macd: None,
            vwap: None,
            bands: None,
            adx: None,
            volatility: 0.0,
            volatility_pct: change_pct.abs(),
            volatility_current: None,
            volatility_baseline: None,
            regime: Regime::InsufficientData,
            patterns: PatternFlags::default(),
            levels: None,
        }
    }
}

/// Resolve the best indicator bundle the available data supports
pub fn resolve(
    _instrument: &Instrument,
    quote: &QuoteSnapshot,
    bars: Option<&[PriceBar]>,
    config: &ResolverConfig,
) -> IndicatorBundle {
    let bars = bars.map(clean_bars).unwrap_or_default();

    if bars.len() >= config.min_full_bars.max(2) {
        return resolve_full(quote, &bars, config);
    }
    if quote.has_ohlc() {
        return resolve_snapshot(quote, config);
    }
    IndicatorBundle::price_only(quote.ltp, quote.change_pct_or_derived())
}

fn resolve_full(quote: &QuoteSnapshot, bars: &[PriceBar], config: &ResolverConfig) -> IndicatorBundle {
    let price = quote.ltp;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let n = closes.len();

    // Short histories use what they have rather than going dark
    let fast_period = config.ema_fast.min(n).max(1);
    let slow_period = config.ema_slow.min(n).max(1);
    let slow_series = indicators::ema_series(&closes, slow_period);

    let fast_avg = indicators::ema(&closes, fast_period);
    let slow_avg = slow_series.as_ref().and_then(|s| s.last().copied());

    let trs = indicators::true_ranges(bars);
    let volatility = indicators::atr(bars, config.atr_period)
        .or_else(|| {
            if trs.is_empty() {
                None
            } else {
                Some(trs.iter().sum::<f64>() / trs.len() as f64)
            }
        })
        .unwrap_or(0.0);
    let baseline_window = &trs[trs.len().saturating_sub(config.volatility_baseline_bars)..];

    let regime = if n < config.regime_min_bars {
        Regime::InsufficientData
    } else {
        classify_trend(fast_avg, slow_series.as_deref(), volatility, config)
    };

    // Levels exclude the latest bar so it can break them
    let prior = &bars[..n - 1];
    let levels = indicators::range_levels(prior, config.range_lookback).map(|(high, low)| RangeLevels {
        resistance: high,
        support: low,
        source: LevelSource::Bars,
    });

    IndicatorBundle {
        tier: Tier::Full,
        price,
        change_pct: quote.change_pct_or_derived(),
        fast_avg,
        slow_avg,
        oscillator: indicators::rsi(&closes, config.rsi_period),
        macd: indicators::macd(&closes, config.macd_fast, config.macd_slow, config.macd_signal),
        vwap: indicators::vwap(bars),
        bands: indicators::bollinger(&closes, config.bollinger_period, config.bollinger_width),
        adx: indicators::adx(bars, config.adx_period),
        volatility,
        volatility_pct: if price > 0.0 { volatility / price * 100.0 } else { 0.0 },
        volatility_current: trs.last().copied(),
        volatility_baseline: indicators::median(baseline_window),
        regime,
        patterns: PatternFlags::scan(bars),
        levels,
    }
}

/// Spread and slope of the averages relative to volatility
fn classify_trend(
    fast_avg: Option<f64>,
    slow_series: Option<&[f64]>,
    volatility: f64,
    config: &ResolverConfig,
) -> Regime {
    let (Some(fast), Some(slow_series)) = (fast_avg, slow_series) else {
        return Regime::InsufficientData;
    };
    let Some(&slow) = slow_series.last() else {
        return Regime::InsufficientData;
    };
    if volatility <= 0.0 {
        return Regime::Sideways;
    }

    let back = slow_series.len().saturating_sub(config.slope_lookback + 1);
    let slope = slow - slow_series[back];
    let spread = fast - slow;

    let aligned = spread.signum() == slope.signum();
    if aligned
        && spread.abs() >= config.trend_spread_atr * volatility
        && slope.abs() >= config.trend_slope_atr * volatility
    {
        Regime::Trending
    } else {
        Regime::Sideways
    }
}

fn resolve_snapshot(quote: &QuoteSnapshot, config: &ResolverConfig) -> IndicatorBundle {
    let price = quote.ltp;
    let open = quote.open_or_ltp();
    let high = quote.high_or_ltp().max(open);
    let low = quote.low_or_ltp().min(open);
    let range = high - low;

    let oscillator = if range > 0.0 { (price - low) / range * 100.0 } else { 50.0 };
    let pivot = (high + low + price) / 3.0;
    let range_pct = if price > 0.0 { range / price * 100.0 } else { 0.0 };
    let trend = price - open;

    let regime = if range_pct < config.snapshot_min_range_pct
        || trend.abs() < config.snapshot_trend_fraction * range
    {
        Regime::Sideways
    } else {
        Regime::Trending
    };

    let levels = if range > 0.0 {
        Some(RangeLevels {
            resistance: 2.0 * pivot - low,
            support: 2.0 * pivot - high,
            source: LevelSource::Pivot,
        })
    } else {
        None
    };

    IndicatorBundle {
        tier: Tier::Snapshot,
        price,
        change_pct: quote.change_pct_or_derived(),
        fast_avg: Some(price),
        slow_avg: Some(open),
        oscillator: Some(oscillator),
        macd: None,
        vwap: Some(pivot),
        bands: None,
        adx: None,
        volatility: range,
        volatility_pct: range_pct,
        volatility_current: None,
        volatility_baseline: None,
        regime,
        patterns: PatternFlags::default(),
        levels,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    pub(crate) fn ts(i: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + i * 300, 0).unwrap()
    }

    /// Steady climb with a small per-bar range
    pub(crate) fn rising_bars(n: usize) -> Vec<PriceBar> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 * 0.5;
                PriceBar {
                    timestamp: ts(i as i64),
                    open: c - 0.25,
                    high: c + 0.1,
                    low: c - 0.35,
                    close: c,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    pub(crate) fn quote_at(ltp: f64) -> QuoteSnapshot {
        QuoteSnapshot::from_ltp(ltp, ts(0))
    }

    fn instrument() -> Instrument {
        Instrument::new("26000", "NSE", "NIFTY").index()
    }

    #[test]
    fn test_tier1_rising_is_trending() {
        let bars = rising_bars(40);
        let quote = quote_at(bars.last().unwrap().close);
        let bundle = resolve(&instrument(), &quote, Some(&bars), &ResolverConfig::default());

        assert_eq!(bundle.tier, Tier::Full);
        assert_eq!(bundle.regime, Regime::Trending);
        assert!(bundle.trend_spread_pct().unwrap() > 0.0);
        assert!(bundle.volatility > 0.0);
        assert!(bundle.levels.is_some());
    }

    #[test]
    fn test_tier1_short_history_has_no_regime() {
        let bars = rising_bars(10);
        let quote = quote_at(bars.last().unwrap().close);
        let bundle = resolve(&instrument(), &quote, Some(&bars), &ResolverConfig::default());
        assert_eq!(bundle.tier, Tier::Full);
        assert_eq!(bundle.regime, Regime::InsufficientData);
        assert!(bundle.fast_avg.is_some());
        assert!(bundle.macd.is_none());
    }

    #[test]
    fn test_tier2_from_ohlc() {
        let mut quote = quote_at(102.0);
        quote.open = Some(100.0);
        quote.high = Some(102.5);
        quote.low = Some(99.5);
        let bundle = resolve(&instrument(), &quote, None, &ResolverConfig::default());

        assert_eq!(bundle.tier, Tier::Snapshot);
        assert_eq!(bundle.regime, Regime::Trending);
        let osc = bundle.oscillator.unwrap();
        assert!((osc - 2.5 / 3.0 * 100.0).abs() < 1e-9);
        let levels = bundle.levels.unwrap();
        assert_eq!(levels.source, LevelSource::Pivot);
        assert!(levels.support < levels.resistance);
    }

    #[test]
    fn test_tier2_flat_snapshot_no_division_by_zero() {
        let mut quote = quote_at(100.0);
        quote.open = Some(100.0);
        quote.high = Some(100.0);
        quote.low = Some(100.0);
        quote.close = Some(100.0);
        quote.change_pct = Some(0.0);
        let bundle = resolve(&instrument(), &quote, None, &ResolverConfig::default());

        assert_eq!(bundle.tier, Tier::Snapshot);
        assert_eq!(bundle.regime, Regime::Sideways);
        assert_eq!(bundle.oscillator, Some(50.0));
        assert_eq!(bundle.volatility, 0.0);
        assert!(bundle.levels.is_none());
        assert!(bundle.volatility_pct.is_finite());
    }

    #[test]
    fn test_tier3_price_only() {
        let mut quote = quote_at(100.0);
        quote.change_pct = Some(1.2);
        let bundle = resolve(&instrument(), &quote, Some(&[]), &ResolverConfig::default());
        assert_eq!(bundle.tier, Tier::PriceOnly);
        assert_eq!(bundle.regime, Regime::InsufficientData);
        assert_eq!(bundle.change_pct, 1.2);
    }

    #[test]
    fn test_tier_is_monotonic_with_data() {
        let bars = rising_bars(40);
        let mut quote = quote_at(bars.last().unwrap().close);
        quote.open = Some(100.0);
        quote.high = Some(120.0);
        quote.low = Some(99.0);
        let cfg = ResolverConfig::default();
        let inst = instrument();

        assert_eq!(resolve(&inst, &quote, Some(&bars), &cfg).tier, Tier::Full);
        assert_eq!(resolve(&inst, &quote, None, &cfg).tier, Tier::Snapshot);
        let bare = quote_at(quote.ltp);
        assert_eq!(resolve(&inst, &bare, None, &cfg).tier, Tier::PriceOnly);
    }

    #[test]
    fn test_invalid_bars_do_not_count() {
        let mut bars = rising_bars(6);
        for b in bars.iter_mut().take(3) {
            b.close = f64::NAN;
        }
        let quote = quote_at(102.0);
        let bundle = resolve(&instrument(), &quote, Some(&bars), &ResolverConfig::default());
        assert_eq!(bundle.tier, Tier::PriceOnly);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let bars = rising_bars(40);
        let quote = quote_at(bars.last().unwrap().close);
        let cfg = ResolverConfig::default();
        let a = resolve(&instrument(), &quote, Some(&bars), &cfg);
        let b = resolve(&instrument(), &quote, Some(&bars), &cfg);
        assert_eq!(a, b);
    }
}
