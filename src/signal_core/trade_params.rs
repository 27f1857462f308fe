//! Trade Parameter Deriver
//!
//! Turns a committed signal into stop-loss/target levels and an
//! out-of-the-money option hint.

use serde::{Deserialize, Serialize};

use super::resolver::IndicatorBundle;
use super::scorer::RiskMode;
use crate::config::TradeConfig;
use crate::types::{Instrument, Signal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeParameters {
    pub signal: Signal,
    pub entry: f64,
    pub stop_loss: Option<f64>,
    pub target1: Option<f64>,
    pub target2: Option<f64>,
    /// e.g. "BUY NIFTY 22150 CE", or "NO TRADE"
    pub option_hint: String,
}

/// Volatility used for level spacing: measured when known, else a percent of price
pub fn effective_volatility(bundle: &IndicatorBundle, cfg: &TradeConfig) -> f64 {
    if bundle.volatility.is_finite() && bundle.volatility > 0.0 {
        bundle.volatility
    } else {
        bundle.price * cfg.fallback_volatility_pct / 100.0
    }
}

pub fn derive(
    instrument: &Instrument,
    signal: Signal,
    price: f64,
    mode: RiskMode,
    volatility: f64,
    cfg: &TradeConfig,
) -> TradeParameters {
    let (stop, t1, t2) = match mode {
        RiskMode::LowRisk => (cfg.low_risk_stop, cfg.low_risk_target1, cfg.low_risk_target2),
        RiskMode::HighRisk => (cfg.high_risk_stop, cfg.high_risk_target1, cfg.high_risk_target2),
    };

    let side = match signal {
        Signal::Buy => 1.0,
        Signal::Sell => -1.0,
        Signal::Hold => {
            return TradeParameters {
                signal,
                entry: price,
                stop_loss: None,
                target1: None,
                target2: None,
                option_hint: option_hint(instrument, signal, price),
            }
        }
    };

    TradeParameters {
        signal,
        entry: price,
        stop_loss: Some(price - side * volatility * stop),
        target1: Some(price + side * volatility * t1),
        target2: Some(price + side * volatility * t2),
        option_hint: option_hint(instrument, signal, price),
    }
}

/// Strike spacing for the instrument
pub fn strike_step(instrument: &Instrument, price: f64) -> f64 {
    if instrument.is_index {
        let name = instrument.name.to_uppercase();
        return if name.contains("BANK") || name.contains("SENSEX") { 100.0 } else { 50.0 };
    }
    match price {
        p if p >= 5000.0 => 100.0,
        p if p >= 1000.0 => 20.0,
        p if p >= 250.0 => 10.0,
        p if p >= 100.0 => 5.0,
        _ => 1.0,
    }
}

/// Nearest strike moved one step out of the money
pub fn option_hint(instrument: &Instrument, signal: Signal, price: f64) -> String {
    let step = strike_step(instrument, price);
    let atm = (price / step).round() * step;
    match signal {
        Signal::Buy => format!("BUY {} {:.0} CE", instrument.name, atm + step),
        Signal::Sell => format!("BUY {} {:.0} PE", instrument.name, atm - step),
        Signal::Hold => "NO TRADE".to_string(),
    }
}
