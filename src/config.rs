//! Engine configuration
//!
//! Every heuristic threshold the engine uses lives here with its tuned
//! default. A JSON file may override any subset of fields.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Indicator periods and tiering thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum valid bars for Tier 1 (default: 5)
    pub min_full_bars: usize,
    /// Bars needed before a regime is classified (default: 30)
    pub regime_min_bars: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    pub adx_period: usize,
    pub bollinger_period: usize,
    pub bollinger_width: f64,
    /// Bars scanned for recent high/low levels (default: 20)
    pub range_lookback: usize,
    /// True ranges used for the median volatility baseline (default: 20)
    pub volatility_baseline_bars: usize,
    /// Bars back used for slow-average slope (default: 5)
    pub slope_lookback: usize,
    /// Trending needs |fast - slow| >= this * ATR (default: 0.25)
    pub trend_spread_atr: f64,
    /// Trending needs |slope| >= this * ATR (default: 0.1)
    pub trend_slope_atr: f64,
    /// Tier 2: day range below this percent is sideways (default: 0.3)
    pub snapshot_min_range_pct: f64,
    /// Tier 2: |ltp - open| below this fraction of range is sideways (default: 0.25)
    pub snapshot_trend_fraction: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_full_bars: 5,
            regime_min_bars: 30,
            ema_fast: 9,
            ema_slow: 21,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            adx_period: 14,
            bollinger_period: 20,
            bollinger_width: 2.0,
            range_lookback: 20,
            volatility_baseline_bars: 20,
            slope_lookback: 5,
            trend_spread_atr: 0.25,
            trend_slope_atr: 0.1,
            snapshot_min_range_pct: 0.3,
            snapshot_trend_fraction: 0.25,
        }
    }
}

/// Conviction scoring weights, gates and signal thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    /// Score needed to override a failing gate on the buy side (default: 72)
    pub gate_override_buy: f64,
    /// Score needed to override a failing gate on the sell side (default: 28)
    pub gate_override_sell: f64,
    pub spread_weight: f64,
    pub spread_cap: f64,
    pub vwap_weight: f64,
    pub vwap_cap: f64,
    pub oscillator_strong: f64,
    pub oscillator_mild: f64,
    pub oscillator_strong_points: f64,
    pub oscillator_mild_points: f64,
    pub histogram_weight: f64,
    pub histogram_cap: f64,
    pub regime_points: f64,
    pub commodity_penalty: f64,
    pub risk_off_penalty: f64,
    /// Tier 3: percent change multiplier (default: 8)
    pub change_weight: f64,
    pub change_cap: f64,
    /// Chop gate: |spread %| below this (default: 0.05)
    pub chop_spread_pct: f64,
    /// Chop gate: |vwap distance %| below this (default: 0.10)
    pub chop_vwap_pct: f64,
    /// Spike gate: current volatility above this multiple of median (default: 2.5)
    pub spike_multiple: f64,
    pub high_confidence_distance: f64,
    pub medium_confidence_signal: f64,
    pub medium_confidence_hold: f64,
    pub commodity_risk_bump: f64,
    pub high_risk_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            buy_threshold: 58.0,
            sell_threshold: 42.0,
            gate_override_buy: 72.0,
            gate_override_sell: 28.0,
            spread_weight: 40.0,
            spread_cap: 20.0,
            vwap_weight: 15.0,
            vwap_cap: 10.0,
            oscillator_strong: 10.0,
            oscillator_mild: 5.0,
            oscillator_strong_points: 10.0,
            oscillator_mild_points: 5.0,
            histogram_weight: 100.0,
            histogram_cap: 8.0,
            regime_points: 5.0,
            commodity_penalty: 3.0,
            risk_off_penalty: 5.0,
            change_weight: 8.0,
            change_cap: 20.0,
            chop_spread_pct: 0.05,
            chop_vwap_pct: 0.10,
            spike_multiple: 2.5,
            high_confidence_distance: 25.0,
            medium_confidence_signal: 8.0,
            medium_confidence_hold: 16.0,
            commodity_risk_bump: 10.0,
            high_risk_threshold: 45.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Consecutive matching raw signals before a flip is committed (default: 2)
    pub confirm_count: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self { confirm_count: 2 }
    }
}

/// Stop/target multipliers per mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    pub low_risk_stop: f64,
    pub low_risk_target1: f64,
    pub low_risk_target2: f64,
    pub high_risk_stop: f64,
    pub high_risk_target1: f64,
    pub high_risk_target2: f64,
    /// Volatility as percent of price when no measure is available (default: 0.6)
    pub fallback_volatility_pct: f64,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            low_risk_stop: 1.0,
            low_risk_target1: 1.6,
            low_risk_target2: 2.4,
            high_risk_stop: 1.2,
            high_risk_target1: 2.2,
            high_risk_target2: 3.2,
            fallback_volatility_pct: 0.6,
        }
    }
}

/// Detector thresholds and hold-confirmation timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Breakout: range as % of price must be below this (default: 1.2)
    pub tight_range_pct: f64,
    /// Breakout: price within this % of the boundary (default: 0.5)
    pub breakout_proximity_pct: f64,
    /// Breakout: score must lean this far from 50 (default: 5)
    pub breakout_min_lean: f64,
    pub pullback_rsi_low: f64,
    pub pullback_rsi_high: f64,
    pub breakdown_rsi_max: f64,
    /// Width of the support band in % (default: 0.6)
    pub support_band_pct: f64,
    /// Fallback trend rule: |change %| above this (default: 0.2)
    pub fallback_trend_change_pct: f64,
    /// Conflicting: score within this of neutral (default: 8)
    pub conflict_band: f64,
    /// Conflicting: volatility % at least this (default: 0.3)
    pub conflict_min_volatility_pct: f64,
    pub high_vol_index_pct: f64,
    pub high_vol_commodity_pct: f64,
    pub high_vol_default_pct: f64,
    /// Minimum risk unit as % of price (default: 0.2)
    pub min_unit_pct: f64,
    /// Seconds price must hold past the trigger (default: 120)
    pub hold_secs: u64,
    /// Seconds after READY before the key re-arms (default: 600)
    pub cooldown_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            tight_range_pct: 1.2,
            breakout_proximity_pct: 0.5,
            breakout_min_lean: 5.0,
            pullback_rsi_low: 25.0,
            pullback_rsi_high: 45.0,
            breakdown_rsi_max: 55.0,
            support_band_pct: 0.6,
            fallback_trend_change_pct: 0.2,
            conflict_band: 8.0,
            conflict_min_volatility_pct: 0.3,
            high_vol_index_pct: 1.5,
            high_vol_commodity_pct: 3.0,
            high_vol_default_pct: 2.5,
            min_unit_pct: 0.2,
            hold_secs: 120,
            cooldown_secs: 600,
        }
    }
}

/// Upper bound for hold and cooldown (one week)
pub const MAX_ALERT_SECS: u64 = 7 * 24 * 3600;

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::try_seconds(secs.min(MAX_ALERT_SECS) as i64).unwrap_or(chrono::Duration::zero())
}

impl AlertConfig {
    pub fn hold(&self) -> chrono::Duration {
        seconds(self.hold_secs)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        seconds(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    /// Minimum closes required (default: 30)
    pub min_samples: usize,
    pub default_horizon: usize,
    pub default_paths: usize,
    /// Crossing threshold as a fraction of the start price (default: 0.005)
    pub threshold: f64,
    pub cache_ttl_secs: u64,
    /// Fixed seed for reproducible projections; entropy when absent
    pub seed: Option<u64>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            min_samples: 30,
            default_horizon: 12,
            default_paths: 1000,
            threshold: 0.005,
            cache_ttl_secs: 300,
            seed: None,
        }
    }
}

impl MonteCarloConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Collaborator access policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    /// Bar interval in minutes (default: 5)
    pub interval_minutes: u32,
    /// Intervals of history requested per cycle (default: 200)
    pub lookback_bars: u32,
    /// Instruments evaluated concurrently (default: 4)
    pub max_concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 4_000,
            interval_minutes: 5,
            lookback_bars: 200,
            max_concurrency: 4,
        }
    }
}

/// One trading day
pub const MAX_INTERVAL_MINUTES: u32 = 1440;
pub const MAX_LOOKBACK_BARS: u32 = 100_000;

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn lookback(&self) -> chrono::Duration {
        let minutes = (self.interval_minutes.min(MAX_INTERVAL_MINUTES) as i64)
            .saturating_mul(self.lookback_bars.min(MAX_LOOKBACK_BARS) as i64);
        chrono::Duration::try_minutes(minutes).unwrap_or(chrono::Duration::zero())
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resolver: ResolverConfig,
    pub scoring: ScoringConfig,
    pub confirmation: ConfirmationConfig,
    pub trade: TradeConfig,
    pub alerts: AlertConfig,
    pub monte_carlo: MonteCarloConfig,
    pub fetch: FetchConfig,
    /// Watchlist cap (default: 10)
    pub max_instruments: usize,
    /// IANA zone that defines the trading session day (default: Asia/Kolkata)
    pub session_timezone: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            scoring: ScoringConfig::default(),
            confirmation: ConfirmationConfig::default(),
            trade: TradeConfig::default(),
            alerts: AlertConfig::default(),
            monte_carlo: MonteCarloConfig::default(),
            fetch: FetchConfig::default(),
            max_instruments: 10,
            session_timezone: "Asia/Kolkata".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load overrides from a JSON file; missing keys keep defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config.normalized())
    }

    pub fn session_tz(&self) -> Result<Tz> {
        self.session_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid session timezone {:?}: {}", self.session_timezone, e))
    }

    /// Zero caps mean "use the default"; oversized windows are clamped
    pub fn normalized(mut self) -> Self {
        if self.max_instruments == 0 {
            self.max_instruments = 10;
        }
        if self.fetch.max_concurrency == 0 {
            self.fetch.max_concurrency = 1;
        }
        if self.confirmation.confirm_count == 0 {
            self.confirmation.confirm_count = 1;
        }
        self.alerts.hold_secs = self.alerts.hold_secs.min(MAX_ALERT_SECS);
        self.alerts.cooldown_secs = self.alerts.cooldown_secs.min(MAX_ALERT_SECS);
        self.fetch.interval_minutes = self.fetch.interval_minutes.clamp(1, MAX_INTERVAL_MINUTES);
        self.fetch.lookback_bars = self.fetch.lookback_bars.min(MAX_LOOKBACK_BARS);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tuned_constants() {
        let config = EngineConfig::default().normalized();
        assert_eq!(config.confirmation.confirm_count, 2);
        assert_eq!(config.alerts.hold_secs, 120);
        assert_eq!(config.alerts.cooldown_secs, 600);
        assert_eq!(config.scoring.buy_threshold, 58.0);
        assert_eq!(config.scoring.sell_threshold, 42.0);
        assert_eq!(config.scoring.gate_override_buy, 72.0);
        assert_eq!(config.scoring.gate_override_sell, 28.0);
        assert_eq!(config.max_instruments, 10);
    }

    #[test]
    fn test_partial_json_override() {
        let json = r#"{ "alerts": { "hold_secs": 30 }, "confirmation": { "confirm_count": 3 } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        let config = config.normalized();
        assert_eq!(config.alerts.hold_secs, 30);
        assert_eq!(config.alerts.cooldown_secs, 600);
        assert_eq!(config.confirmation.confirm_count, 3);
        assert_eq!(config.scoring.buy_threshold, 58.0);
        assert_eq!(config.alerts.hold(), chrono::Duration::seconds(30));
    }

    #[test]
    fn test_session_timezone() {
        let config = EngineConfig::default();
        assert_eq!(config.session_tz().unwrap(), chrono_tz::Asia::Kolkata);
        let bad = EngineConfig { session_timezone: "Mars/Olympus".to_string(), ..EngineConfig::default() };
        assert!(bad.session_tz().is_err());
    }

    #[test]
    fn test_lookback_window() {
        let fetch = FetchConfig::default();
        assert_eq!(fetch.lookback(), chrono::Duration::minutes(1000));
    }

    #[test]
    fn test_huge_overrides_are_clamped() {
        let json = r#"{
            "alerts": { "hold_secs": 18446744073709551615, "cooldown_secs": 18446744073709551615 },
            "fetch": { "interval_minutes": 4294967295, "lookback_bars": 4294967295 }
        }"#;
        let raw: EngineConfig = serde_json::from_str(json).unwrap();

        // Accessors are safe even before normalization
        assert_eq!(raw.alerts.hold(), chrono::Duration::seconds(MAX_ALERT_SECS as i64));
        assert_eq!(
            raw.fetch.lookback(),
            chrono::Duration::minutes(MAX_INTERVAL_MINUTES as i64 * MAX_LOOKBACK_BARS as i64)
        );

        let config = raw.normalized();
        assert_eq!(config.alerts.hold_secs, MAX_ALERT_SECS);
        assert_eq!(config.alerts.cooldown(), chrono::Duration::seconds(MAX_ALERT_SECS as i64));
        assert_eq!(config.fetch.interval_minutes, MAX_INTERVAL_MINUTES);
        assert_eq!(config.fetch.lookback_bars, MAX_LOOKBACK_BARS);
    }
}
