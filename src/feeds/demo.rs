//! Seeded random-walk market for running the engine without data files

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::replay::ReplayFeed;
use crate::types::{Instrument, PriceBar};

/// Bars per 09:15-15:30 session at five-minute spacing
const SESSION_BARS: usize = 75;

/// Builder for a replayable random-walk feed
#[derive(Debug, Clone)]
pub struct DemoFeed {
    seed: u64,
    bars: usize,
    warmup: usize,
    first_session: NaiveDate,
    tz: Tz,
}

impl DemoFeed {
    pub fn new(seed: u64, tz: Tz) -> Self {
        Self {
            seed,
            bars: 400,
            warmup: 120,
            first_session: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap_or_default(),
            tz,
        }
    }

    pub fn bars(mut self, bars: usize) -> Self {
        self.bars = bars;
        self
    }

    pub fn warmup(mut self, warmup: usize) -> Self {
        self.warmup = warmup;
        self
    }

    /// Generate every instrument's path and wrap it in a replay cursor
    pub fn build(&self, universe: &[Instrument]) -> ReplayFeed {
        let times = session_times(self.first_session, self.bars, self.tz);
        let series: HashMap<String, Vec<PriceBar>> = universe
            .iter()
            .enumerate()
            .map(|(i, inst)| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64 * 7919));
                (inst.id.clone(), random_walk(&mut rng, base_price(inst), inst, &times))
            })
            .collect();
        ReplayFeed::from_series(series, self.tz, self.warmup)
    }
}

/// Rough price level so strike steps and thresholds look realistic
fn base_price(inst: &Instrument) -> f64 {
    let name = inst.name.to_uppercase();
    match name.as_str() {
        n if n.contains("BANKNIFTY") => 48_000.0,
        n if n.contains("NIFTY") => 22_000.0,
        n if n.contains("SENSEX") => 73_000.0,
        n if n.contains("CRUDE") => 6_500.0,
        n if n.contains("GOLD") => 62_000.0,
        _ if inst.is_index => 20_000.0,
        _ => 1_500.0,
    }
}

/// Five-minute bar opens across consecutive weekday sessions
fn session_times(first: NaiveDate, count: usize, tz: Tz) -> Vec<DateTime<Utc>> {
    let mut out = Vec::with_capacity(count);
    let mut day = first;
    while out.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            if let Some(open) = day
                .and_hms_opt(9, 15, 0)
                .and_then(|naive| tz.from_local_datetime(&naive).earliest())
            {
                let open = open.with_timezone(&Utc);
                for i in 0..SESSION_BARS.min(count - out.len()) {
                    out.push(open + Duration::minutes(5 * i as i64));
                }
            }
        }
        day = day.succ_opt().unwrap_or(day + Duration::days(1));
    }
    out
}

/// Log-normal steps whose drift flips every so often, so both trends and ranges appear
fn random_walk(rng: &mut StdRng, start: f64, inst: &Instrument, times: &[DateTime<Utc>]) -> Vec<PriceBar> {
    let sigma = if inst.is_commodity { 0.0025 } else if inst.is_index { 0.0012 } else { 0.0018 };
    let mut drift = 0.0;
    let mut price = start;
    let mut bars = Vec::with_capacity(times.len());

    for (i, ts) in times.iter().enumerate() {
        if i % 40 == 0 {
            drift = rng.gen_range(-1.5..1.5) * sigma * 0.4;
        }
        let z: f64 = rng.sample(StandardNormal);
        let upper: f64 = rng.sample(StandardNormal);
        let lower: f64 = rng.sample(StandardNormal);
        let open = price;
        let close = open * (drift + sigma * z).exp();
        let high = open.max(close) * (1.0 + upper.abs() * sigma * 0.5);
        let low = open.min(close) * (1.0 - lower.abs() * sigma * 0.5);
        bars.push(PriceBar {
            timestamp: *ts,
            open,
            high,
            low,
            close,
            volume: rng.gen_range(500.0..5_000.0_f64).round(),
        });
        price = close;
    }
    bars
}
