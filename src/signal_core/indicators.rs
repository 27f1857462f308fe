//! Indicator Library
//!
//! Pure functions over ordered bars or closes. Every function returns `None`
//! when the input is shorter than its window: absent means "not yet known",
//! never zero.

use crate::types::PriceBar;
use serde::{Deserialize, Serialize};

/// Exponential moving average, last value only
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).and_then(|s| s.last().copied())
}

/// Full EMA series, seeded with the SMA of the first `period` values.
///
/// Element `i` of the result corresponds to input index `period - 1 + i`.
pub fn ema_series(values: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for v in &values[period..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    Some(out)
}

/// Relative Strength Index with Wilder smoothing, bounded in [0, 100]
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;

    for c in &changes[period..] {
        avg_gain = (avg_gain * (period - 1) as f64 + c.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + (-c).max(0.0)) / period as f64;
    }

    if avg_gain == 0.0 && avg_loss == 0.0 {
        return Some(50.0);
    }
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Trend histogram (MACD) values at the last bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Difference of fast/slow EMAs with its own smoothed signal line
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || signal == 0 || slow <= fast {
        return None;
    }
    if closes.len() < slow + signal - 1 {
        return None;
    }

    let fast_series = ema_series(closes, fast)?;
    let slow_series = ema_series(closes, slow)?;

    // Align both series on input indices slow-1..
    let offset = slow - fast;
    let line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[i + offset] - s)
        .collect();

    let signal_series = ema_series(&line, signal)?;
    let last_line = *line.last()?;
    let last_signal = *signal_series.last()?;

    Some(Macd {
        line: last_line,
        signal: last_signal,
        histogram: last_line - last_signal,
    })
}

/// Banded volatility pair around a moving average
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// (upper - lower) / middle * 100
    pub width_pct: f64,
}

/// Bollinger bands over the last `period` closes (population std-dev)
pub fn bollinger(closes: &[f64], period: usize, width: f64) -> Option<Bands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();

    let upper = mean + width * std;
    let lower = mean - width * std;
    let width_pct = if mean > 0.0 { (upper - lower) / mean * 100.0 } else { 0.0 };

    Some(Bands { upper, middle: mean, lower, width_pct })
}

/// True range per bar, starting from the second bar
pub fn true_ranges(bars: &[PriceBar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let bar = &w[1];
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect()
}

/// Average True Range with Wilder smoothing
pub fn atr(bars: &[PriceBar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let trs = true_ranges(bars);
    let mut value = trs[..period].iter().sum::<f64>() / period as f64;
    for tr in &trs[period..] {
        value = (value * (period - 1) as f64 + tr) / period as f64;
    }
    Some(value)
}

/// Directional movement: trend strength plus directional indices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adx {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Wilder's ADX. Needs `2 * period` bars.
pub fn adx(bars: &[PriceBar], period: usize) -> Option<Adx> {
    if period == 0 || bars.len() < 2 * period {
        return None;
    }

    let mut trs = Vec::with_capacity(bars.len() - 1);
    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);

    for w in bars.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        trs.push(
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs()),
        );
    }

    let p = period as f64;
    let mut tr_s: f64 = trs[..period].iter().sum();
    let mut plus_s: f64 = plus_dm[..period].iter().sum();
    let mut minus_s: f64 = minus_dm[..period].iter().sum();

    let di = |dm: f64, tr: f64| if tr > 0.0 { 100.0 * dm / tr } else { 0.0 };
    let dx = |plus: f64, minus: f64| {
        let sum = plus + minus;
        if sum > 0.0 { 100.0 * (plus - minus).abs() / sum } else { 0.0 }
    };

    let mut plus_di = di(plus_s, tr_s);
    let mut minus_di = di(minus_s, tr_s);
    let mut dxs = vec![dx(plus_di, minus_di)];

    for i in period..trs.len() {
        tr_s = tr_s - tr_s / p + trs[i];
        plus_s = plus_s - plus_s / p + plus_dm[i];
        minus_s = minus_s - minus_s / p + minus_dm[i];
        plus_di = di(plus_s, tr_s);
        minus_di = di(minus_s, tr_s);
        dxs.push(dx(plus_di, minus_di));
    }

    if dxs.len() < period {
        return None;
    }

    let mut adx_value = dxs[..period].iter().sum::<f64>() / p;
    for d in &dxs[period..] {
        adx_value = (adx_value * (p - 1.0) + d) / p;
    }

    Some(Adx { adx: adx_value, plus_di, minus_di })
}

/// Volume-weighted typical price. Falls back to mean typical price when no volume traded.
pub fn vwap(bars: &[PriceBar]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }

    let mut sum_pv = 0.0;
    let mut sum_v = 0.0;
    for bar in bars {
        sum_pv += bar.typical_price() * bar.volume;
        sum_v += bar.volume;
    }

    if sum_v > 0.0 {
        Some(sum_pv / sum_v)
    } else {
        Some(bars.iter().map(|b| b.typical_price()).sum::<f64>() / bars.len() as f64)
    }
}

/// Highest high / lowest low over the last `lookback` bars
pub fn range_levels(bars: &[PriceBar], lookback: usize) -> Option<(f64, f64)> {
    if lookback == 0 || bars.is_empty() {
        return None;
    }
    let window = &bars[bars.len().saturating_sub(lookback)..];
    let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    Some((high, low))
}

/// Median of a slice; `None` when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bars_from(ohlc: &[(f64, f64, f64, f64)]) -> Vec<PriceBar> {
        ohlc.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| PriceBar {
                timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 300, 0).unwrap(),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    fn rising_bars(n: usize) -> Vec<PriceBar> {
        let ohlc: Vec<_> = (0..n)
            .map(|i| {
                let c = 100.0 + i as f64;
                (c - 0.5, c + 1.0, c - 1.0, c)
            })
            .collect();
        bars_from(&ohlc)
    }

    #[test]
    fn test_ema_absent_when_short() {
        assert_eq!(ema(&[1.0, 2.0], 3), None);
        assert_eq!(ema(&[1.0, 2.0, 3.0], 0), None);
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let series = ema_series(&[1.0, 2.0, 3.0, 4.0, 5.0], 3).unwrap();
        assert_eq!(series.len(), 3);
        assert!((series[0] - 2.0).abs() < 1e-9);
        // k = 0.5: 4*0.5 + 2*0.5 = 3, 5*0.5 + 3*0.5 = 4
        assert!((series[1] - 3.0).abs() < 1e-9);
        assert!((series[2] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_bounds() {
        let up: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&up, 14), Some(100.0));

        let down: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert!(rsi(&down, 14).unwrap() < 1e-9);

        let flat = vec![100.0; 30];
        assert_eq!(rsi(&flat, 14), Some(50.0));

        assert_eq!(rsi(&up[..14], 14), None);
    }

    #[test]
    fn test_macd_sign_follows_trend() {
        let up: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        let m = macd(&up, 12, 26, 9).unwrap();
        assert!(m.line > 0.0);

        let down: Vec<f64> = (0..60).map(|i| 200.0 - i as f64 * 0.5).collect();
        let m = macd(&down, 12, 26, 9).unwrap();
        assert!(m.line < 0.0);

        assert!(macd(&up[..33], 12, 26, 9).is_none());
        assert!(macd(&up[..34], 12, 26, 9).is_some());
    }

    #[test]
    fn test_bollinger_flat_series_has_zero_width() {
        let flat = vec![50.0; 20];
        let b = bollinger(&flat, 20, 2.0).unwrap();
        assert_eq!(b.upper, 50.0);
        assert_eq!(b.lower, 50.0);
        assert_eq!(b.width_pct, 0.0);
        assert!(bollinger(&flat[..19], 20, 2.0).is_none());
    }

    #[test]
    fn test_atr_constant_ranges() {
        let bars = rising_bars(20);
        // each bar: range 2, gap from prev close +1 => TR = max(2, 2, 0) = 2
        let value = atr(&bars, 14).unwrap();
        assert!((value - 2.0).abs() < 1e-9);
        assert!(atr(&bars[..14], 14).is_none());
    }

    #[test]
    fn test_adx_strong_in_steady_trend() {
        let bars = rising_bars(40);
        let a = adx(&bars, 14).unwrap();
        assert!(a.plus_di > a.minus_di);
        assert!(a.adx > 50.0);
        assert!(adx(&bars[..27], 14).is_none());
    }

    #[test]
    fn test_vwap_zero_volume_fallback() {
        let mut bars = bars_from(&[(10.0, 12.0, 8.0, 10.0), (10.0, 14.0, 10.0, 12.0)]);
        let weighted = vwap(&bars).unwrap();
        assert!((weighted - 11.0).abs() < 1e-9);

        for b in bars.iter_mut() {
            b.volume = 0.0;
        }
        assert!((vwap(&bars).unwrap() - 11.0).abs() < 1e-9);
        assert!(vwap(&[]).is_none());
    }

    #[test]
    fn test_range_levels_and_median() {
        let bars = rising_bars(30);
        let (high, low) = range_levels(&bars, 5).unwrap();
        assert_eq!(high, 130.0);
        assert_eq!(low, 124.0);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }
}
