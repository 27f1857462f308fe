//! Alert Hold-Confirmation State Machine
//!
//! Per (alert kind, direction) key within one instrument:
//! 1. WATCH - waiting for price to cross the trigger
//! 2. CONFIRMING - crossed, price must stay past the trigger for the hold duration
//! 3. READY - level held; reported for exactly one evaluation
//! 4. COOLDOWN - suppressed until the cooldown since READY has elapsed
//!
//! A key in CONFIRMING remembers the candidate it crossed, so it keeps
//! holding against that trigger after price runs on and the detector stops
//! surfacing it. Only a fall back across the trigger resets it.
//!
//! Warnings never enter the machine and are reported as WARNING.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::detectors::{AlertCandidate, AlertKind};
use crate::config::AlertConfig;
use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Watch,
    Confirming,
    Ready,
    Cooldown,
    /// Not hold-confirmed; informational only
    Warning,
}

impl AlertStatus {
    /// Ranking bucket: READY, then CONFIRMING/WATCH, then WARNING, then COOLDOWN
    pub fn bucket(&self) -> u8 {
        match self {
            AlertStatus::Ready => 0,
            AlertStatus::Confirming | AlertStatus::Watch => 1,
            AlertStatus::Warning => 2,
            AlertStatus::Cooldown => 3,
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Watch => write!(f, "WATCH"),
            AlertStatus::Confirming => write!(f, "CONFIRMING"),
            AlertStatus::Ready => write!(f, "READY"),
            AlertStatus::Cooldown => write!(f, "COOLDOWN"),
            AlertStatus::Warning => write!(f, "WARNING"),
        }
    }
}

/// State of one alert key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub status: AlertStatus,
    pub hold_start: Option<DateTime<Utc>>,
    pub last_ready: Option<DateTime<Utc>>,
    /// Candidate whose trigger is being held; set only while CONFIRMING
    pub armed: Option<AlertCandidate>,
}

impl Default for AlertState {
    fn default() -> Self {
        Self {
            status: AlertStatus::Watch,
            hold_start: None,
            last_ready: None,
            armed: None,
        }
    }
}

impl AlertState {
    /// Advance one evaluation. Returns the new status and hold progress in percent.
    pub fn advance(&mut self, crossed: bool, now: DateTime<Utc>, hold: Duration, cooldown: Duration) -> (AlertStatus, f64) {
        if matches!(self.status, AlertStatus::Ready | AlertStatus::Cooldown) {
            if let Some(ready_at) = self.last_ready {
                if now - ready_at < cooldown {
                    self.status = AlertStatus::Cooldown;
                    return (AlertStatus::Cooldown, 0.0);
                }
            }
            self.status = AlertStatus::Watch;
            self.hold_start = None;
        }

        match self.status {
            AlertStatus::Confirming => {
                let Some(start) = self.hold_start.filter(|_| crossed) else {
                    self.reset();
                    return (AlertStatus::Watch, 0.0);
                };
                let elapsed = now - start;
                if elapsed >= hold {
                    self.status = AlertStatus::Ready;
                    self.hold_start = None;
                    self.last_ready = Some(now);
                    (AlertStatus::Ready, 100.0)
                } else {
                    let pct = if hold > Duration::zero() {
                        elapsed.num_milliseconds() as f64 / hold.num_milliseconds() as f64 * 100.0
                    } else {
                        0.0
                    };
                    (AlertStatus::Confirming, pct.clamp(0.0, 99.9))
                }
            }
            _ if crossed => {
                self.status = AlertStatus::Confirming;
                self.hold_start = Some(now);
                (AlertStatus::Confirming, 0.0)
            }
            _ => {
                self.reset();
                (AlertStatus::Watch, 0.0)
            }
        }
    }

    fn reset(&mut self) {
        self.status = AlertStatus::Watch;
        self.hold_start = None;
        self.armed = None;
    }
}

/// One ranked alert line for consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRow {
    pub candidate: AlertCandidate,
    pub status: AlertStatus,
    pub progress_pct: f64,
    pub message: String,
}

impl AlertRow {
    fn new(candidate: AlertCandidate, status: AlertStatus, progress_pct: f64, price: f64) -> Self {
        let trigger = candidate.trigger.unwrap_or(price);
        let message = match status {
            AlertStatus::Watch => format!("{}: watching {:.2}", candidate.kind, trigger),
            AlertStatus::Confirming => format!(
                "{}: holding past {:.2} ({:.0}%)",
                candidate.kind, trigger, progress_pct
            ),
            AlertStatus::Ready => {
                info!(
                    instrument = %candidate.instrument_name,
                    kind = %candidate.kind,
                    direction = %candidate.direction,
                    trigger,
                    "alert READY"
                );
                format!("{} READY: {}", candidate.kind, candidate.summary)
            }
            AlertStatus::Cooldown => format!("{}: cooling down", candidate.kind),
            AlertStatus::Warning => candidate.summary.clone(),
        };
        Self { candidate, status, progress_pct, message }
    }
}

pub type AlertKey = (AlertKind, Direction);

/// All alert keys for a single instrument
#[derive(Debug, Clone, Default)]
pub struct AlertBook {
    states: HashMap<AlertKey, AlertState>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, kind: AlertKind, direction: Direction) -> Option<&AlertState> {
        self.states.get(&(kind, direction))
    }

    /// Evaluate this cycle's surfaced candidate, plus every held key, against `price`.
    ///
    /// Returns the highest-ranked resulting row.
    pub fn evaluate(
        &mut self,
        candidate: Option<AlertCandidate>,
        price: f64,
        now: DateTime<Utc>,
        cfg: &AlertConfig,
    ) -> Option<AlertRow> {
        let (hold, cooldown) = (cfg.hold(), cfg.cooldown());
        let surfaced = candidate
            .as_ref()
            .filter(|c| !c.kind.is_warning())
            .map(|c| (c.kind, c.direction));
        let mut rows = Vec::new();

        for (key, state) in self.states.iter_mut() {
            if Some(*key) == surfaced || state.status != AlertStatus::Confirming {
                continue;
            }
            let Some(armed) = state.armed.take() else {
                state.reset();
                continue;
            };
            let (status, progress_pct) = state.advance(armed.crossed(price), now, hold, cooldown);
            if status == AlertStatus::Confirming {
                state.armed = Some(armed.clone());
            }
            if status != AlertStatus::Watch {
                rows.push(AlertRow::new(armed, status, progress_pct, price));
            }
        }

        if let Some(candidate) = candidate {
            if candidate.kind.is_warning() {
                rows.push(AlertRow::new(candidate, AlertStatus::Warning, 0.0, price));
            } else {
                let state = self.states.entry((candidate.kind, candidate.direction)).or_default();
                let (status, progress_pct) = state.advance(candidate.crossed(price), now, hold, cooldown);
                state.armed = (status == AlertStatus::Confirming).then(|| candidate.clone());
                rows.push(AlertRow::new(candidate, status, progress_pct, price));
            }
        }

        rank_alerts(&mut rows);
        rows.into_iter().next()
    }
}

/// Order by bucket, strength descending within a bucket
pub fn rank_alerts(rows: &mut [AlertRow]) {
    rows.sort_by(|a, b| {
        a.status
            .bucket()
            .cmp(&b.status.bucket())
            .then(b.candidate.strength.total_cmp(&a.candidate.strength))
    });
}
