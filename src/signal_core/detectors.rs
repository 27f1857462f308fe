//! Alert Detector Set
//!
//! Independent heuristics over one instrument's current state. Each returns
//! at most one [`AlertCandidate`]; per instrument only the strongest survives.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::resolver::{IndicatorBundle, LevelSource, RangeLevels, Regime};
use super::scorer::ScoreResult;
use crate::config::AlertConfig;
use crate::types::{Confidence, Direction, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    Breakout,
    PullbackEntry,
    BreakdownSetup,
    ConflictingSignal,
    HighVolatility,
}

impl AlertKind {
    /// Tie-break order: breakout > pullback/breakdown > warnings
    pub fn priority(&self) -> u8 {
        match self {
            AlertKind::Breakout => 3,
            AlertKind::PullbackEntry | AlertKind::BreakdownSetup => 2,
            AlertKind::ConflictingSignal | AlertKind::HighVolatility => 1,
        }
    }

    /// Warnings carry no actionable trigger and skip hold-confirmation
    pub fn is_warning(&self) -> bool {
        matches!(self, AlertKind::ConflictingSignal | AlertKind::HighVolatility)
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Breakout => write!(f, "Breakout"),
            AlertKind::PullbackEntry => write!(f, "Pullback entry"),
            AlertKind::BreakdownSetup => write!(f, "Breakdown setup"),
            AlertKind::ConflictingSignal => write!(f, "Conflicting signals"),
            AlertKind::HighVolatility => write!(f, "High volatility"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub kind: AlertKind,
    pub instrument_id: String,
    pub instrument_name: String,
    pub direction: Direction,
    pub trigger: Option<f64>,
    pub stop_loss: Option<f64>,
    pub target1: Option<f64>,
    pub target2: Option<f64>,
    /// 0-100
    pub strength: f64,
    pub confidence: Confidence,
    pub summary: String,
}

impl AlertCandidate {
    /// Whether `price` is at or past the trigger in the alert's direction
    pub fn crossed(&self, price: f64) -> bool {
        match (self.trigger, self.direction) {
            (Some(t), Direction::Up) => price >= t,
            (Some(t), Direction::Down) => price <= t,
            _ => false,
        }
    }
}

/// Everything a detector may look at
#[derive(Debug, Clone, Copy)]
pub struct DetectorInput<'a> {
    pub instrument: &'a Instrument,
    pub bundle: &'a IndicatorBundle,
    pub score: &'a ScoreResult,
}

impl DetectorInput<'_> {
    fn price(&self) -> f64 {
        self.bundle.price
    }

    /// Level spacing: volatility, floored at a small percent of price
    fn unit(&self, cfg: &AlertConfig) -> f64 {
        self.bundle.volatility.max(self.price() * cfg.min_unit_pct / 100.0)
    }

    /// Pivot levels (or none) put the detectors on percent change
    fn fallback_mode(&self) -> bool {
        !matches!(self.bundle.levels, Some(RangeLevels { source: LevelSource::Bars, .. }))
    }

    fn trend(&self, cfg: &AlertConfig) -> Direction {
        if self.fallback_mode() {
            let change = self.bundle.change_pct;
            if change >= cfg.fallback_trend_change_pct {
                Direction::Up
            } else if change <= -cfg.fallback_trend_change_pct {
                Direction::Down
            } else {
                Direction::None
            }
        } else {
            match (self.bundle.fast_avg, self.bundle.slow_avg) {
                (Some(f), Some(s)) if f > s => Direction::Up,
                (Some(f), Some(s)) if f < s => Direction::Down,
                _ => Direction::None,
            }
        }
    }

    fn candidate(&self, kind: AlertKind, direction: Direction, strength: f64, summary: String) -> AlertCandidate {
        AlertCandidate {
            kind,
            instrument_id: self.instrument.id.clone(),
            instrument_name: self.instrument.name.clone(),
            direction,
            trigger: None,
            stop_loss: None,
            target1: None,
            target2: None,
            strength: strength.clamp(0.0, 100.0),
            confidence: self.score.confidence,
            summary,
        }
    }
}

fn with_levels(mut c: AlertCandidate, trigger: f64, stop: f64, t1: f64, t2: f64) -> AlertCandidate {
    c.trigger = Some(trigger);
    c.stop_loss = Some(stop);
    c.target1 = Some(t1);
    c.target2 = Some(t2);
    c
}

/// Tight range with price pressing the boundary the score favors
pub fn breakout(input: &DetectorInput, cfg: &AlertConfig) -> Option<AlertCandidate> {
    let levels = input.bundle.levels?;
    let price = input.price();
    if price <= 0.0 || levels.width() / price * 100.0 >= cfg.tight_range_pct {
        return None;
    }

    let lean = input.score.lean();
    if lean.abs() < cfg.breakout_min_lean {
        return None;
    }

    let (direction, boundary) = if lean > 0.0 {
        (Direction::Up, levels.resistance)
    } else {
        (Direction::Down, levels.support)
    };
    let side = direction.sign();

    // Negative once crossed
    let gap_pct = side * (boundary - price) / price * 100.0;
    if gap_pct > cfg.breakout_proximity_pct || gap_pct < -cfg.breakout_proximity_pct {
        return None;
    }

    let unit = input.unit(cfg);
    let strength = 55.0 + lean.abs() - gap_pct.max(0.0) / cfg.breakout_proximity_pct * 10.0;
    let summary = format!(
        "{} coiled in a {:.2}% range, pressing {} {:.2}",
        input.instrument.name,
        levels.width() / price * 100.0,
        if side > 0.0 { "resistance" } else { "support" },
        boundary
    );

    Some(with_levels(
        input.candidate(AlertKind::Breakout, direction, strength, summary),
        boundary,
        boundary - side * unit,
        boundary + side * 1.5 * unit,
        boundary + side * 2.5 * unit,
    ))
}

/// Uptrend dipping into support with a cooled oscillator
pub fn pullback_entry(input: &DetectorInput, cfg: &AlertConfig) -> Option<AlertCandidate> {
    let levels = input.bundle.levels?;
    let osc = input.bundle.oscillator?;
    if input.trend(cfg) != Direction::Up {
        return None;
    }
    if osc < cfg.pullback_rsi_low || osc > cfg.pullback_rsi_high {
        return None;
    }

    let price = input.price();
    let support = levels.support;
    let band = support * cfg.support_band_pct / 100.0;
    if band <= 0.0 || price < support || price > support + band {
        return None;
    }

    let unit = input.unit(cfg);
    let trigger = support + 0.25 * unit;
    let closeness = 1.0 - (price - support) / band;
    let strength = 50.0 + (cfg.pullback_rsi_high - osc) * 0.5 + closeness * 10.0;
    let summary = format!(
        "{} pulled back to support {:.2} in an uptrend (oscillator {:.0})",
        input.instrument.name, support, osc
    );

    Some(with_levels(
        input.candidate(AlertKind::PullbackEntry, Direction::Up, strength, summary),
        trigger,
        support - 0.75 * unit,
        trigger + 1.5 * unit,
        trigger + 2.5 * unit,
    ))
}

/// Downtrend slipping just under support
pub fn breakdown_setup(input: &DetectorInput, cfg: &AlertConfig) -> Option<AlertCandidate> {
    let levels = input.bundle.levels?;
    let osc = input.bundle.oscillator?;
    if input.trend(cfg) != Direction::Down || osc >= cfg.breakdown_rsi_max {
        return None;
    }

    let price = input.price();
    let support = levels.support;
    let band = support * cfg.support_band_pct / 100.0;
    if band <= 0.0 || price > support || price < support - band {
        return None;
    }

    let unit = input.unit(cfg);
    let trigger = support - 0.25 * unit;
    let depth = (support - price) / band;
    let strength = 50.0 + (cfg.breakdown_rsi_max - osc) * 0.5 + depth * 10.0;
    let summary = format!(
        "{} slipping under support {:.2} in a downtrend",
        input.instrument.name, support
    );

    Some(with_levels(
        input.candidate(AlertKind::BreakdownSetup, Direction::Down, strength, summary),
        trigger,
        support + 0.75 * unit,
        trigger - 1.5 * unit,
        trigger - 2.5 * unit,
    ))
}

/// Near-neutral score in a sideways regime that still moves
pub fn conflicting_signal(input: &DetectorInput, cfg: &AlertConfig) -> Option<AlertCandidate> {
    let vol_pct = input.bundle.volatility_pct;
    if input.score.lean().abs() > cfg.conflict_band
        || input.bundle.regime != Regime::Sideways
        || vol_pct < cfg.conflict_min_volatility_pct
    {
        return None;
    }
    let summary = format!(
        "{} mixed signals in a sideways range ({:.2}% volatility), avoid",
        input.instrument.name, vol_pct
    );
    Some(input.candidate(AlertKind::ConflictingSignal, Direction::None, 35.0 + vol_pct * 5.0, summary))
}

/// Volatility above the instrument-class threshold
pub fn high_volatility(input: &DetectorInput, cfg: &AlertConfig) -> Option<AlertCandidate> {
    let threshold = if input.instrument.is_index {
        cfg.high_vol_index_pct
    } else if input.instrument.is_commodity {
        cfg.high_vol_commodity_pct
    } else {
        cfg.high_vol_default_pct
    };
    let vol_pct = input.bundle.volatility_pct;
    if !vol_pct.is_finite() || vol_pct <= threshold {
        return None;
    }

    let direction = Direction::from_signal(input.score.signal);
    let summary = format!(
        "{} volatility {:.2}% above {:.1}%, trade small",
        input.instrument.name, vol_pct, threshold
    );
    let c = input.candidate(
        AlertKind::HighVolatility,
        direction,
        45.0 + (vol_pct - threshold) * 10.0,
        summary,
    );
    if direction == Direction::None {
        return Some(c);
    }

    let price = input.price();
    let unit = input.unit(cfg);
    let side = direction.sign();
    Some(with_levels(
        c,
        price,
        price - side * 1.5 * unit,
        price + side * unit,
        price + side * 2.0 * unit,
    ))
}

/// Run every detector, returning all hits
pub fn detect_all(input: &DetectorInput, cfg: &AlertConfig) -> Vec<AlertCandidate> {
    let detectors: [fn(&DetectorInput, &AlertConfig) -> Option<AlertCandidate>; 5] = [
        breakout,
        pullback_entry,
        breakdown_setup,
        conflicting_signal,
        high_volatility,
    ];
    let hits: Vec<AlertCandidate> = detectors.iter().filter_map(|d| d(input, cfg)).collect();
    for hit in &hits {
        debug!(
            instrument = %input.instrument.name,
            kind = %hit.kind,
            strength = hit.strength,
            "detector hit"
        );
    }
    hits
}

/// Highest strength wins; ties go to the higher-priority kind
pub fn best_candidate(candidates: Vec<AlertCandidate>) -> Option<AlertCandidate> {
    candidates.into_iter().max_by(|a, b| {
        a.strength
            .total_cmp(&b.strength)
            .then(a.kind.priority().cmp(&b.kind.priority()))
    })
}

/// At most one alert per instrument per cycle
pub fn detect(input: &DetectorInput, cfg: &AlertConfig) -> Option<AlertCandidate> {
    best_candidate(detect_all(input, cfg))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::signal_core::patterns::PatternFlags;
    use crate::signal_core::resolver::Tier;
    use crate::signal_core::scorer::RiskMode;
    use crate::types::Signal;

    pub(crate) fn bundle(price: f64, support: f64, resistance: f64) -> IndicatorBundle {
        IndicatorBundle {
            tier: Tier::Full,
            price,
            change_pct: 0.0,
            fast_avg: Some(price),
            slow_avg: Some(price),
            oscillator: Some(50.0),
            macd: None,
            vwap: Some(price),
            bands: None,
            adx: None,
            volatility: 0.3,
            volatility_pct: 0.3 / price * 100.0,
            volatility_current: None,
            volatility_baseline: None,
            regime: Regime::Trending,
            patterns: PatternFlags::default(),
            levels: Some(RangeLevels { resistance, support, source: LevelSource::Bars }),
        }
    }

    pub(crate) fn score_at(score: f64, signal: Signal) -> ScoreResult {
        ScoreResult {
            score,
            signal,
            confidence: Confidence::Medium,
            risk: 20.0,
            mode: RiskMode::LowRisk,
            gates: Vec::new(),
            reason: String::new(),
        }
    }

    fn nifty() -> Instrument {
        Instrument::new("26000", "NSE", "NIFTY").index()
    }

    fn stock() -> Instrument {
        Instrument::new("2885", "NSE", "RELIANCE")
    }

    #[test]
    fn test_breakout_near_resistance() {
        let inst = nifty();
        let b = bundle(100.0, 99.5, 100.3);
        let s = score_at(60.0, Signal::Buy);
        let input = DetectorInput { instrument: &inst, bundle: &b, score: &s };
        let c = breakout(&input, &AlertConfig::default()).unwrap();

        assert_eq!(c.direction, Direction::Up);
        assert_eq!(c.trigger, Some(100.3));
        assert!((c.stop_loss.unwrap() - 100.0).abs() < 1e-9);
        assert!((c.target1.unwrap() - 100.75).abs() < 1e-9);
        assert!(!c.crossed(100.0));
        assert!(c.crossed(100.31));
    }

    #[test]
    fn test_breakout_needs_tight_range_and_lean() {
        let inst = nifty();
        let cfg = AlertConfig::default();
        let wide = bundle(100.0, 98.0, 100.3);
        let s = score_at(60.0, Signal::Buy);
        assert!(breakout(&DetectorInput { instrument: &inst, bundle: &wide, score: &s }, &cfg).is_none());

        let tight = bundle(100.0, 99.5, 100.3);
        let flat = score_at(52.0, Signal::Hold);
        assert!(breakout(&DetectorInput { instrument: &inst, bundle: &tight, score: &flat }, &cfg).is_none());
    }

    #[test]
    fn test_pullback_entry() {
        let inst = stock();
        let mut b = bundle(100.2, 100.0, 103.0);
        b.fast_avg = Some(101.0);
        b.slow_avg = Some(100.0);
        b.oscillator = Some(35.0);
        b.volatility = 0.5;
        let s = score_at(60.0, Signal::Buy);
        let input = DetectorInput { instrument: &inst, bundle: &b, score: &s };

        let c = pullback_entry(&input, &AlertConfig::default()).unwrap();
        assert_eq!(c.direction, Direction::Up);
        assert!((c.trigger.unwrap() - 100.125).abs() < 1e-9);
        assert!((c.stop_loss.unwrap() - 99.625).abs() < 1e-9);
        assert!(breakdown_setup(&input, &AlertConfig::default()).is_none());
    }

    #[test]
    fn test_breakdown_setup() {
        let inst = stock();
        let mut b = bundle(99.8, 100.0, 103.0);
        b.fast_avg = Some(99.0);
        b.slow_avg = Some(100.0);
        b.oscillator = Some(40.0);
        let s = score_at(45.0, Signal::Hold);
        let input = DetectorInput { instrument: &inst, bundle: &b, score: &s };

        let c = breakdown_setup(&input, &AlertConfig::default()).unwrap();
        assert_eq!(c.direction, Direction::Down);
        assert!(c.trigger.unwrap() < 100.0);
        assert!(c.target2.unwrap() < c.target1.unwrap());
        assert!(c.crossed(99.0));
    }

    #[test]
    fn test_fallback_trend_uses_change_pct() {
        let inst = stock();
        let mut b = bundle(100.2, 100.0, 103.0);
        b.tier = Tier::Snapshot;
        b.levels = Some(RangeLevels { resistance: 103.0, support: 100.0, source: LevelSource::Pivot });
        // averages disagree, change decides
        b.fast_avg = Some(99.0);
        b.slow_avg = Some(100.0);
        b.change_pct = 0.5;
        b.oscillator = Some(30.0);
        let s = score_at(55.0, Signal::Hold);
        let input = DetectorInput { instrument: &inst, bundle: &b, score: &s };
        assert!(input.fallback_mode());
        assert_eq!(input.trend(&AlertConfig::default()), Direction::Up);
        assert!(pullback_entry(&input, &AlertConfig::default()).is_some());
    }

    #[test]
    fn test_conflicting_warning() {
        let inst = stock();
        let mut b = bundle(100.0, 95.0, 105.0);
        b.regime = Regime::Sideways;
        b.volatility_pct = 0.5;
        let s = score_at(52.0, Signal::Hold);
        let input = DetectorInput { instrument: &inst, bundle: &b, score: &s };
        let c = conflicting_signal(&input, &AlertConfig::default()).unwrap();
        assert_eq!(c.direction, Direction::None);
        assert!(c.trigger.is_none());
        assert!(c.kind.is_warning());

        b.regime = Regime::Trending;
        let input = DetectorInput { instrument: &inst, bundle: &b, score: &s };
        assert!(conflicting_signal(&input, &AlertConfig::default()).is_none());
    }

    #[test]
    fn test_high_volatility_threshold_by_class() {
        let cfg = AlertConfig::default();
        let mut b = bundle(100.0, 90.0, 110.0);
        b.volatility = 2.0;
        b.volatility_pct = 2.0;
        let s = score_at(65.0, Signal::Buy);

        let idx = nifty();
        let c = high_volatility(&DetectorInput { instrument: &idx, bundle: &b, score: &s }, &cfg).unwrap();
        assert_eq!(c.direction, Direction::Up);
        assert!(c.summary.contains("trade small"));
        assert_eq!(c.stop_loss, Some(97.0));
        assert_eq!(c.target1, Some(102.0));

        let plain = stock();
        assert!(high_volatility(&DetectorInput { instrument: &plain, bundle: &b, score: &s }, &cfg).is_none());
    }

    #[test]
    fn test_best_candidate_tie_breaks_on_priority() {
        let inst = nifty();
        let b = bundle(100.0, 99.5, 100.3);
        let s = score_at(60.0, Signal::Buy);
        let input = DetectorInput { instrument: &inst, bundle: &b, score: &s };
        let warn = input.candidate(AlertKind::HighVolatility, Direction::Up, 70.0, String::new());
        let brk = input.candidate(AlertKind::Breakout, Direction::Up, 70.0, String::new());
        let weak = input.candidate(AlertKind::PullbackEntry, Direction::Up, 40.0, String::new());

        let best = best_candidate(vec![warn.clone(), weak, brk]).unwrap();
        assert_eq!(best.kind, AlertKind::Breakout);
        assert!(best_candidate(Vec::new()).is_none());

        let stronger = input.candidate(AlertKind::ConflictingSignal, Direction::None, 90.0, String::new());
        assert_eq!(best_candidate(vec![warn, stronger]).unwrap().kind, AlertKind::ConflictingSignal);
    }

    #[test]
    fn test_detect_keeps_one() {
        let inst = nifty();
        let mut b = bundle(100.0, 99.5, 100.3);
        b.volatility_pct = 2.0;
        let s = score_at(60.0, Signal::Buy);
        let input = DetectorInput { instrument: &inst, bundle: &b, score: &s };
        assert_eq!(detect_all(&input, &AlertConfig::default()).len(), 2);
        assert!(detect(&input, &AlertConfig::default()).is_some());
    }
}
