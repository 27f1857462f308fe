//! Signal engine: one polling cycle over the instrument universe
//!
//! Per instrument, in order: fetch (time-bounded) → resolve → score →
//! confirm → derive parameters → detect → hold-confirm. Instruments run
//! concurrently; each instrument's mutable state sits behind its own mutex,
//! held for the whole compute sequence so overlapping cycles serialize.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::feeds::{session_quote, BarSource, PriceCache, QuoteSource};
use crate::signal_core::{
    alert_state::{rank_alerts, AlertBook, AlertRow, AlertStatus},
    confirmation::ConfirmationBuffer,
    detectors::{self, DetectorInput},
    monte_carlo::{self, MonteCarloCache, MonteCarloResult, ProjectionKey},
    resolver::{self, IndicatorBundle, Tier},
    scorer::{self, ScoreContext, ScoreResult},
    trade_params::{self, TradeParameters},
};
use crate::types::{Instrument, PriceBar, QuoteSnapshot, Signal};

/// Macro risk-off threshold on the reference basket's mean change, in percent
pub const DEFAULT_RISK_OFF_PCT: f64 = -0.75;

/// Externally computed market-wide context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MacroContext {
    pub risk_off: bool,
}

impl MacroContext {
    /// Risk-off when the basket's mean percent change is at or below `threshold_pct`
    pub fn from_basket(changes_pct: &[f64], threshold_pct: f64) -> Self {
        let usable: Vec<f64> = changes_pct.iter().copied().filter(|c| c.is_finite()).collect();
        if usable.is_empty() {
            return Self::default();
        }
        let mean = usable.iter().sum::<f64>() / usable.len() as f64;
        Self { risk_off: mean <= threshold_pct }
    }
}

/// Resolve → score → confirm → derive output for one instrument
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentAnalysis {
    pub tier: Tier,
    pub bundle: IndicatorBundle,
    pub score: ScoreResult,
    pub confirmed_signal: Signal,
    pub trade_params: TradeParameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentReport {
    pub instrument: Instrument,
    pub snapshot: Option<QuoteSnapshot>,
    /// Absent only when no price at all was obtainable
    pub analysis: Option<InstrumentAnalysis>,
    pub alert: Option<AlertRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub at: DateTime<Utc>,
    pub instruments: Vec<InstrumentReport>,
    /// Ranked: READY, CONFIRMING/WATCH, WARNING, COOLDOWN
    pub alerts: Vec<AlertRow>,
}

/// Published to subscribers after each cycle
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SignalCommitted {
        instrument: String,
        from: Signal,
        to: Signal,
    },
    AlertReady(AlertRow),
    CycleComplete(Arc<CycleReport>),
}

/// Per-instrument state that survives across cycles
#[derive(Debug)]
struct SlotState {
    confirmation: ConfirmationBuffer,
    alerts: AlertBook,
}

type Slot = Arc<Mutex<SlotState>>;

pub struct SignalEngine {
    config: EngineConfig,
    tz: Tz,
    quotes: Arc<dyn QuoteSource>,
    bars: Arc<dyn BarSource>,
    slots: RwLock<HashMap<String, Slot>>,
    price_cache: PriceCache,
    mc_cache: Mutex<MonteCarloCache>,
    /// One gate per projection key being computed
    mc_inflight: Mutex<HashMap<ProjectionKey, Arc<Mutex<()>>>>,
    events: broadcast::Sender<EngineEvent>,
    cycles: AtomicU64,
}

impl SignalEngine {
    pub fn new(config: EngineConfig, quotes: Arc<dyn QuoteSource>, bars: Arc<dyn BarSource>) -> Result<Self> {
        let config = config.normalized();
        let tz = config.session_tz()?;
        let (events, _rx) = broadcast::channel(256);
        Ok(Self {
            mc_cache: Mutex::new(MonteCarloCache::new(config.monte_carlo.cache_ttl())),
            mc_inflight: Mutex::new(HashMap::new()),
            config,
            tz,
            quotes,
            bars,
            slots: RwLock::new(HashMap::new()),
            price_cache: PriceCache::new(),
            events,
            cycles: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn price_cache(&self) -> &PriceCache {
        &self.price_cache
    }

    /// Live tick hook; the next cycle picks it up if its quote fetch fails
    pub async fn record_tick(&self, instrument_id: &str, ltp: f64, at: DateTime<Utc>) {
        self.price_cache.record_tick(instrument_id, ltp, at).await;
    }

    /// Committed signal for an instrument, if it has been evaluated
    pub async fn committed_signal(&self, instrument_id: &str) -> Option<Signal> {
        let slot = self.slots.read().await.get(instrument_id).cloned()?;
        let state = slot.lock().await;
        Some(state.confirmation.committed())
    }

    async fn slot(&self, instrument_id: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(instrument_id) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots
            .entry(instrument_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SlotState {
                    confirmation: ConfirmationBuffer::new(self.config.confirmation.confirm_count),
                    alerts: AlertBook::new(),
                }))
            })
            .clone()
    }

    /// Run one evaluation cycle. Never fails: per-instrument problems degrade that instrument only.
    pub async fn run_cycle(&self, universe: &[Instrument], macro_ctx: MacroContext, now: DateTime<Utc>) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;

        let cap = self.config.max_instruments;
        if universe.len() > cap {
            warn!(
                "Universe has {} instruments, evaluating the first {}",
                universe.len(),
                cap
            );
        }
        let universe = &universe[..universe.len().min(cap)];

        let mut indexed: Vec<(usize, InstrumentReport)> = stream::iter(universe.iter().enumerate())
            .map(|(i, inst)| async move { (i, self.evaluate_instrument(inst, macro_ctx, now).await) })
            .buffer_unordered(self.config.fetch.max_concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);
        let instruments: Vec<InstrumentReport> = indexed.into_iter().map(|(_, r)| r).collect();

        let mut alerts: Vec<AlertRow> = instruments.iter().filter_map(|r| r.alert.clone()).collect();
        rank_alerts(&mut alerts);

        let report = CycleReport { cycle, at: now, instruments, alerts };
        debug!(cycle, instruments = report.instruments.len(), alerts = report.alerts.len(), "cycle complete");
        let _ = self.events.send(EngineEvent::CycleComplete(Arc::new(report.clone())));
        report
    }

    async fn fetch_quote(&self, inst: &Instrument) -> Option<QuoteSnapshot> {
        match timeout(self.config.fetch.timeout(), self.quotes.get_quote(inst)).await {
            Ok(Ok(Some(q))) => {
                let clean = q.sanitized();
                if clean.is_none() {
                    warn!("Discarding malformed quote for {} (ltp {})", inst.name, q.ltp);
                }
                clean
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!("Quote fetch failed for {}: {:#}", inst.name, e);
                None
            }
            Err(_) => {
                warn!("Quote fetch timed out for {}", inst.name);
                None
            }
        }
    }

    async fn fetch_bars(&self, inst: &Instrument, now: DateTime<Utc>) -> Option<Vec<PriceBar>> {
        let fetch = &self.config.fetch;
        let from = now - fetch.lookback();
        match timeout(fetch.timeout(), self.bars.get_bars(inst, fetch.interval_minutes, from, now)).await {
            Ok(Ok(bars)) => Some(bars),
            Ok(Err(e)) => {
                warn!("Bar fetch failed for {}: {:#}", inst.name, e);
                None
            }
            Err(_) => {
                warn!("Bar fetch timed out for {}", inst.name);
                None
            }
        }
    }

    /// Fresh quote (unless a newer tick is cached), else last cached, else synthesized from bars
    async fn snapshot(&self, inst: &Instrument, fetched: Option<QuoteSnapshot>, bars: Option<&[PriceBar]>) -> Option<QuoteSnapshot> {
        if let Some(q) = fetched {
            return Some(self.price_cache.put(&inst.id, q).await);
        }
        if let Some(q) = self.price_cache.get(&inst.id).await {
            debug!("Using cached quote for {}", inst.name);
            return Some(q);
        }
        let clean = bars.map(crate::types::clean_bars).unwrap_or_default();
        let synthesized = session_quote(&clean, self.tz).and_then(QuoteSnapshot::sanitized);
        if synthesized.is_some() {
            debug!("Synthesized quote for {} from {} bars", inst.name, clean.len());
        }
        synthesized
    }

    async fn evaluate_instrument(&self, inst: &Instrument, macro_ctx: MacroContext, now: DateTime<Utc>) -> InstrumentReport {
        let (fetched, bars) = tokio::join!(self.fetch_quote(inst), self.fetch_bars(inst, now));
        let snapshot = self.snapshot(inst, fetched, bars.as_deref()).await;

        let Some(quote) = snapshot else {
            warn!("No price available for {}, skipping this cycle", inst.name);
            return InstrumentReport {
                instrument: inst.clone(),
                snapshot: None,
                analysis: None,
                alert: None,
            };
        };

        let slot = self.slot(&inst.id).await;
        let mut state = slot.lock().await;

        let bundle = resolver::resolve(inst, &quote, bars.as_deref(), &self.config.resolver);
        let ctx = ScoreContext::for_instrument(inst, macro_ctx.risk_off);
        let score = scorer::score(&bundle, &ctx, &self.config.scoring);

        let previous = state.confirmation.committed();
        let confirmed = state.confirmation.update(score.signal);
        if confirmed != previous {
            info!(
                "{} signal committed: {} -> {} (score {:.1}, tier {})",
                inst.name, previous, confirmed, score.score, bundle.tier
            );
            let _ = self.events.send(EngineEvent::SignalCommitted {
                instrument: inst.name.clone(),
                from: previous,
                to: confirmed,
            });
        }

        let volatility = trade_params::effective_volatility(&bundle, &self.config.trade);
        let params = trade_params::derive(inst, confirmed, quote.ltp, score.mode, volatility, &self.config.trade);

        let input = DetectorInput { instrument: inst, bundle: &bundle, score: &score };
        let candidate = detectors::detect(&input, &self.config.alerts);
        let alert = state.alerts.evaluate(candidate, quote.ltp, now, &self.config.alerts);
        drop(state);

        if let Some(row) = alert.as_ref().filter(|r| r.status == AlertStatus::Ready) {
            let _ = self.events.send(EngineEvent::AlertReady(row.clone()));
        }

        InstrumentReport {
            instrument: inst.clone(),
            snapshot: Some(quote),
            analysis: Some(InstrumentAnalysis {
                tier: bundle.tier,
                bundle,
                score,
                confirmed_signal: confirmed,
                trade_params: params,
            }),
            alert,
        }
    }

    /// On-demand projection with the configured defaults filling unset arguments.
    ///
    /// `Ok(None)` when history is too short or unavailable. Concurrent misses
    /// on the same key wait for the first computation instead of repeating it.
    pub async fn project_monte_carlo(
        &self,
        inst: &Instrument,
        horizon: Option<usize>,
        paths: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Option<MonteCarloResult>> {
        let cfg = self.config.monte_carlo.clone();
        let horizon = horizon.unwrap_or(cfg.default_horizon);
        let paths = paths.unwrap_or(cfg.default_paths);
        let key = (inst.id.clone(), horizon, paths);

        if let Some(hit) = self.mc_cache.lock().await.get(&key, Instant::now()) {
            debug!("Monte Carlo cache hit for {}", inst.name);
            return Ok(Some(hit));
        }

        let gate = self.mc_inflight.lock().await.entry(key.clone()).or_default().clone();
        let result = {
            let _computing = gate.lock().await;
            self.project_uncached(inst, key.clone(), now).await
        };
        self.mc_inflight.lock().await.remove(&key);
        result
    }

    async fn project_uncached(
        &self,
        inst: &Instrument,
        key: ProjectionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<MonteCarloResult>> {
        // Filled while we waited on the gate
        if let Some(hit) = self.mc_cache.lock().await.get(&key, Instant::now()) {
            return Ok(Some(hit));
        }

        let cfg = self.config.monte_carlo.clone();
        let (horizon, paths) = (key.1, key.2);
        let Some(bars) = self.fetch_bars(inst, now).await else {
            return Ok(None);
        };
        let closes: Vec<f64> = crate::types::clean_bars(&bars).iter().map(|b| b.close).collect();

        let result = tokio::task::spawn_blocking(move || monte_carlo::project(&closes, horizon, paths, &cfg))
            .await
            .context("Monte Carlo task panicked")?;

        if let Some(r) = &result {
            info!(
                "{} projection ({} paths x {}): p10 {:.2} p50 {:.2} p90 {:.2}",
                inst.name, paths, horizon, r.p10, r.p50, r.p90
            );
            self.mc_cache.lock().await.put(key, r.clone(), Instant::now());
        }
        Ok(result)
    }
}
