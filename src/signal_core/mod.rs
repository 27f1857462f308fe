//! Signal Core - the per-instrument evaluation pipeline
//!
//! This module contains the pure algorithmic pieces:
//! - Indicator library and bar pattern flags
//! - Tiered indicator resolution (full bars / OHLC snapshot / price only)
//! - Conviction scoring with chop and spike gates
//! - Signal confirmation buffer
//! - Stop/target and option-strike derivation
//! - Alert detectors and the hold-confirmation state machine
//! - Monte Carlo price projection

pub mod indicators;
pub mod patterns;
pub mod resolver;
pub mod scorer;
pub mod confirmation;
pub mod trade_params;
pub mod detectors;
pub mod alert_state;
pub mod monte_carlo;

// Re-export commonly used types
pub use indicators::{Adx, Bands, Macd};
pub use patterns::PatternFlags;
pub use resolver::{resolve, IndicatorBundle, LevelSource, RangeLevels, Regime, Tier};
pub use scorer::{score, GateFlag, GateKind, RiskMode, ScoreContext, ScoreResult};
pub use confirmation::ConfirmationBuffer;
pub use trade_params::TradeParameters;
pub use detectors::{AlertCandidate, AlertKind, DetectorInput};
pub use alert_state::{rank_alerts, AlertBook, AlertRow, AlertState, AlertStatus};
pub use monte_carlo::{MonteCarloCache, MonteCarloResult};
