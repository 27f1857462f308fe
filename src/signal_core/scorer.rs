//! Conviction Scorer
//!
//! Combines an [`IndicatorBundle`] and context flags into a 0-100 score,
//! gate flags and a discrete signal. Pure: the same bundle always yields
//! the same [`ScoreResult`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::resolver::{IndicatorBundle, Regime, Tier};
use crate::config::ScoringConfig;
use crate::types::{Confidence, Instrument, Signal};

const NEUTRAL: f64 = 50.0;

/// Context flags that shift the score independently of the indicators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreContext {
    pub is_commodity: bool,
    pub is_index: bool,
    pub macro_risk_off: bool,
}

impl ScoreContext {
    pub fn for_instrument(instrument: &Instrument, macro_risk_off: bool) -> Self {
        Self {
            is_commodity: instrument.is_commodity,
            is_index: instrument.is_index,
            macro_risk_off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskMode {
    LowRisk,
    HighRisk,
}

impl std::fmt::Display for RiskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskMode::LowRisk => write!(f, "low-risk"),
            RiskMode::HighRisk => write!(f, "high-risk"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateKind {
    ChopZone,
    VolatilitySpike,
}

/// A failing hard condition and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateFlag {
    pub kind: GateKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub signal: Signal,
    pub confidence: Confidence,
    pub risk: f64,
    pub mode: RiskMode,
    pub gates: Vec<GateFlag>,
    pub reason: String,
}

impl ScoreResult {
    /// Signed distance from neutral
    pub fn lean(&self) -> f64 {
        self.score - NEUTRAL
    }
}

/// Running sum of labelled contributions
struct Tally {
    score: f64,
    parts: Vec<(&'static str, f64)>,
}

impl Tally {
    fn new() -> Self {
        Self { score: NEUTRAL, parts: Vec::new() }
    }

    fn add(&mut self, label: &'static str, value: f64) {
        if value != 0.0 && value.is_finite() {
            self.score += value;
            self.parts.push((label, value));
        }
    }

    /// Up to two largest drivers, in plain words
    fn summary(&self) -> String {
        let mut parts = self.parts.clone();
        parts.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        let words: Vec<String> = parts
            .iter()
            .take(2)
            .map(|(label, v)| format!("{} {}", label, if *v > 0.0 { "bullish" } else { "bearish" }))
            .collect();
        if words.is_empty() {
            "no directional edge".to_string()
        } else {
            words.join(", ")
        }
    }
}

fn capped(value: f64, weight: f64, cap: f64) -> f64 {
    (value * weight).clamp(-cap, cap)
}

fn oscillator_points(osc: f64, cfg: &ScoringConfig) -> f64 {
    let d = osc - NEUTRAL;
    if d >= cfg.oscillator_strong {
        cfg.oscillator_strong_points
    } else if d >= cfg.oscillator_mild {
        cfg.oscillator_mild_points
    } else if d <= -cfg.oscillator_strong {
        -cfg.oscillator_strong_points
    } else if d <= -cfg.oscillator_mild {
        -cfg.oscillator_mild_points
    } else {
        0.0
    }
}

/// Regime widens (trending) or narrows (sideways) the current lean
fn regime_points(regime: Regime, lean: f64, cfg: &ScoringConfig) -> f64 {
    if lean == 0.0 {
        return 0.0;
    }
    let side = lean.signum();
    match regime {
        Regime::Trending => side * cfg.regime_points,
        Regime::Sideways => -side * cfg.regime_points.min(lean.abs()),
        Regime::InsufficientData => 0.0,
    }
}

fn evaluate_gates(bundle: &IndicatorBundle, cfg: &ScoringConfig) -> Vec<GateFlag> {
    let mut gates = Vec::new();

    if let (Some(spread), Some(vwap)) = (bundle.trend_spread_pct(), bundle.vwap_distance_pct()) {
        if spread.abs() < cfg.chop_spread_pct && vwap.abs() < cfg.chop_vwap_pct {
            gates.push(GateFlag {
                kind: GateKind::ChopZone,
                reason: format!(
                    "Chop zone: averages {:.3}% apart, price {:.3}% from VWAP",
                    spread, vwap
                ),
            });
        }
    }

    if bundle.tier == Tier::Full {
        if let (Some(current), Some(baseline)) = (bundle.volatility_current, bundle.volatility_baseline) {
            if baseline > 0.0 && current > cfg.spike_multiple * baseline {
                gates.push(GateFlag {
                    kind: GateKind::VolatilitySpike,
                    reason: format!(
                        "Volatility spike: range {:.2} is {:.1}x the recent median",
                        current,
                        current / baseline
                    ),
                });
            }
        }
    }

    gates
}

fn confidence_for(signal: Signal, distance: f64, cfg: &ScoringConfig) -> Confidence {
    if distance >= cfg.high_confidence_distance {
        return Confidence::High;
    }
    let medium = match signal {
        Signal::Hold => cfg.medium_confidence_hold,
        _ => cfg.medium_confidence_signal,
    };
    if distance >= medium {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Score one bundle
pub fn score(bundle: &IndicatorBundle, ctx: &ScoreContext, cfg: &ScoringConfig) -> ScoreResult {
    let mut tally = Tally::new();

    if bundle.tier == Tier::PriceOnly {
        tally.add("day change", capped(bundle.change_pct, cfg.change_weight, cfg.change_cap));
    } else {
        if let Some(spread) = bundle.trend_spread_pct() {
            tally.add("trend averages", capped(spread, cfg.spread_weight, cfg.spread_cap));
        }
        if let Some(dist) = bundle.vwap_distance_pct() {
            tally.add("VWAP position", capped(dist, cfg.vwap_weight, cfg.vwap_cap));
        }
        if let Some(osc) = bundle.oscillator {
            tally.add("momentum", oscillator_points(osc, cfg));
        }
        if let Some(hist) = bundle.histogram_pct() {
            tally.add("trend histogram", capped(hist, cfg.histogram_weight, cfg.histogram_cap));
        }
    }

    let lean = tally.score - NEUTRAL;
    tally.add("regime", regime_points(bundle.regime, lean, cfg));

    if ctx.is_commodity {
        tally.add("commodity", -cfg.commodity_penalty);
    }
    if ctx.macro_risk_off {
        tally.add("macro risk-off", -cfg.risk_off_penalty);
    }

    let score = tally.score.clamp(0.0, 100.0);
    let gates = evaluate_gates(bundle, cfg);

    let (signal, reason) = if let Some(gate) = gates.first() {
        if score >= cfg.gate_override_buy {
            (Signal::Buy, format!("{} (overridden by extreme score)", tally.summary()))
        } else if score <= cfg.gate_override_sell {
            (Signal::Sell, format!("{} (overridden by extreme score)", tally.summary()))
        } else {
            debug!(score, gate = %gate.reason, "gate forced HOLD");
            (Signal::Hold, gate.reason.clone())
        }
    } else if score >= cfg.buy_threshold {
        (Signal::Buy, tally.summary())
    } else if score <= cfg.sell_threshold {
        (Signal::Sell, tally.summary())
    } else {
        (Signal::Hold, format!("Neutral: {}", tally.summary()))
    };

    let distance = (score - NEUTRAL).abs();
    let bump = if ctx.is_commodity { cfg.commodity_risk_bump } else { 0.0 };
    let vol_pct = if bundle.volatility_pct.is_finite() { bundle.volatility_pct } else { 0.0 };
    let risk = (vol_pct * 10.0 + distance + bump).clamp(0.0, 100.0);
    let mode = if risk >= cfg.high_risk_threshold { RiskMode::HighRisk } else { RiskMode::LowRisk };

    ScoreResult {
        score,
        signal,
        confidence: confidence_for(signal, distance, cfg),
        risk,
        mode,
        gates,
        reason,
    }
}
