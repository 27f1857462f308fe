//! Monte Carlo Price Projector
//!
//! Geometric random walk driven by the mean and sample std-dev of historical
//! log returns. Paths are simulated in rayon chunks, each with its own RNG.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MonteCarloConfig;

/// Paths per rayon task
const CHUNK: usize = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub start_price: f64,
    /// Mean log return per step
    pub drift: f64,
    /// Sample std-dev of log returns per step
    pub volatility: f64,
    pub paths: usize,
    pub horizon: usize,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    /// Fraction of paths ending above start * (1 + threshold)
    pub prob_up: f64,
    /// Fraction of paths ending below start * (1 - threshold)
    pub prob_down: f64,
    pub threshold: f64,
}

pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn simulate_chunk(start: f64, horizon: usize, count: usize, step: &Normal<f64>, mut rng: StdRng) -> Vec<f64> {
    (0..count)
        .map(|_| {
            let mut price = start;
            for _ in 0..horizon {
                price *= step.sample(&mut rng).exp();
            }
            price
        })
        .collect()
}

/// Project `horizon` steps forward over `paths` simulated paths.
///
/// Returns `None` with fewer than `min_samples` usable closes or zero paths.
pub fn project(closes: &[f64], horizon: usize, paths: usize, cfg: &MonteCarloConfig) -> Option<MonteCarloResult> {
    if paths == 0 || closes.len() < cfg.min_samples.max(2) {
        return None;
    }
    if closes.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        return None;
    }

    let start_price = *closes.last()?;
    let returns = log_returns(closes);
    let (drift, volatility) = mean_and_std(&returns);
    let step = Normal::new(drift, volatility).ok()?;

    let chunks = paths.div_ceil(CHUNK);
    let seed = cfg.seed;
    let mut terminals: Vec<f64> = (0..chunks)
        .into_par_iter()
        .flat_map_iter(|chunk| {
            let count = CHUNK.min(paths - chunk * CHUNK);
            let rng = match seed {
                Some(s) => StdRng::seed_from_u64(s.wrapping_add(chunk as u64)),
                None => StdRng::from_entropy(),
            };
            simulate_chunk(start_price, horizon, count, &step, rng)
        })
        .collect();

    terminals.sort_by(|a, b| a.total_cmp(b));

    let up_level = start_price * (1.0 + cfg.threshold);
    let down_level = start_price * (1.0 - cfg.threshold);
    let n = terminals.len() as f64;
    let prob_up = terminals.iter().filter(|p| **p > up_level).count() as f64 / n;
    let prob_down = terminals.iter().filter(|p| **p < down_level).count() as f64 / n;

    Some(MonteCarloResult {
        start_price,
        drift,
        volatility,
        paths,
        horizon,
        p10: percentile(&terminals, 10.0),
        p50: percentile(&terminals, 50.0),
        p90: percentile(&terminals, 90.0),
        prob_up,
        prob_down,
        threshold: cfg.threshold,
    })
}

/// (instrument id, horizon, path count)
pub type ProjectionKey = (String, usize, usize);

/// Short-lived projection cache; entries expire after the TTL
#[derive(Debug)]
pub struct MonteCarloCache {
    ttl: Duration,
    entries: HashMap<ProjectionKey, (Instant, MonteCarloResult)>,
}

impl MonteCarloCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: HashMap::new() }
    }

    pub fn get(&self, key: &ProjectionKey, now: Instant) -> Option<MonteCarloResult> {
        self.entries
            .get(key)
            .filter(|(stored, _)| now.saturating_duration_since(*stored) < self.ttl)
            .map(|(_, result)| result.clone())
    }

    pub fn put(&mut self, key: ProjectionKey, result: MonteCarloResult, now: Instant) {
        self.entries.retain(|_, (stored, _)| now.saturating_duration_since(*stored) < self.ttl);
        self.entries.insert(key, (now, result));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MonteCarloConfig {
        MonteCarloConfig { seed: Some(7), ..MonteCarloConfig::default() }
    }

    #[test]
    fn test_constant_series_stays_put() {
        let closes = vec![250.0; 40];
        let r = project(&closes, 12, 500, &seeded()).unwrap();
        assert_eq!(r.volatility, 0.0);
        assert!((r.p10 - 250.0).abs() < 1e-9);
        assert!((r.p50 - 250.0).abs() < 1e-9);
        assert!((r.p90 - 250.0).abs() < 1e-9);
        assert_eq!(r.prob_up, 0.0);
        assert_eq!(r.prob_down, 0.0);
    }

    #[test]
    fn test_needs_minimum_samples() {
        let closes = vec![100.0; 29];
        assert!(project(&closes, 12, 100, &seeded()).is_none());
        let mut closes = vec![100.0; 40];
        closes[5] = f64::NAN;
        assert!(project(&closes, 12, 100, &seeded()).is_none());
        assert!(project(&vec![100.0; 40], 12, 0, &seeded()).is_none());
    }

    #[test]
    fn test_seeded_projection_is_reproducible() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 2.0 + i as f64 * 0.1).collect();
        let a = project(&closes, 12, 1000, &seeded()).unwrap();
        let b = project(&closes, 12, 1000, &seeded()).unwrap();
        assert_eq!(a, b);
        assert!(a.p10 <= a.p50 && a.p50 <= a.p90);
        assert!((0.0..=1.0).contains(&a.prob_up));
        assert!(a.prob_up + a.prob_down <= 1.0);
    }

    #[test]
    fn test_drift_tilts_probabilities() {
        // Strong steady uptrend with mild noise
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 * (1.004f64).powi(i) * (1.0 + if i % 2 == 0 { 0.001 } else { -0.001 }))
            .collect();
        let r = project(&closes, 12, 2000, &seeded()).unwrap();
        assert!(r.drift > 0.0);
        assert!(r.prob_up > r.prob_down);
        assert!(r.p50 > r.start_price);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        assert_eq!(percentile(&sorted, 10.0), 1.0);
        assert_eq!(percentile(&sorted, 50.0), 5.0);
        assert_eq!(percentile(&sorted, 90.0), 9.0);
        assert_eq!(percentile(&[3.0], 90.0), 3.0);
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let closes = vec![100.0; 40];
        let result = project(&closes, 12, 10, &seeded()).unwrap();
        let mut cache = MonteCarloCache::new(Duration::from_secs(300));
        let key: ProjectionKey = ("26000".to_string(), 12, 10);
        let t0 = Instant::now();

        assert!(cache.get(&key, t0).is_none());
        cache.put(key.clone(), result.clone(), t0);
        assert_eq!(cache.get(&key, t0 + Duration::from_secs(299)), Some(result));
        assert!(cache.get(&key, t0 + Duration::from_secs(300)).is_none());
        assert!(cache.get(&("26000".to_string(), 12, 20), t0).is_none());
    }
}
