//! Market data collaborators
//!
//! The engine only sees the [`QuoteSource`] and [`BarSource`] traits. Wire
//! clients live elsewhere; this module ships two local sources (CSV replay
//! and a seeded random walk) plus the shared last-price cache.

pub mod demo;
pub mod replay;

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::types::{Instrument, PriceBar, QuoteSnapshot};

pub use demo::DemoFeed;
pub use replay::ReplayFeed;

/// Per-cycle quote provider. `Ok(None)` means "no quote this cycle".
pub trait QuoteSource: Send + Sync {
    fn get_quote<'a>(&'a self, instrument: &'a Instrument) -> BoxFuture<'a, Result<Option<QuoteSnapshot>>>;
}

/// Historical bar provider. Bars may come back unsorted or empty.
pub trait BarSource: Send + Sync {
    fn get_bars<'a>(
        &'a self,
        instrument: &'a Instrument,
        interval_minutes: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<PriceBar>>>;
}

/// Build a quote from bars: LTP is the last close, OHLC covers the last
/// bar's exchange-local session, close is the previous session's last close.
pub fn session_quote(bars: &[PriceBar], tz: Tz) -> Option<QuoteSnapshot> {
    let last = bars.last()?;
    let session = last.timestamp.with_timezone(&tz).date_naive();
    let start = bars
        .iter()
        .position(|b| b.timestamp.with_timezone(&tz).date_naive() == session)
        .unwrap_or(bars.len() - 1);
    let today = &bars[start..];
    let prev_close = start.checked_sub(1).map(|i| bars[i].close);

    Some(QuoteSnapshot {
        ltp: last.close,
        open: Some(today[0].open),
        high: Some(today.iter().map(|b| b.high).fold(f64::MIN, f64::max)),
        low: Some(today.iter().map(|b| b.low).fold(f64::MAX, f64::min)),
        close: prev_close,
        change_pct: prev_close.filter(|c| *c > 0.0).map(|c| (last.close - c) / c * 100.0),
        timestamp: last.timestamp,
    })
}

/// Last-known quote per instrument id.
///
/// Writers replace whole snapshots, so a reader sees either the previous
/// or the new snapshot, never a mix.
#[derive(Debug, Default)]
pub struct PriceCache {
    quotes: RwLock<HashMap<String, QuoteSnapshot>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, instrument_id: &str) -> Option<QuoteSnapshot> {
        self.quotes.read().await.get(instrument_id).copied()
    }

    /// Store a fetched snapshot unless a newer one (e.g. a live tick) is
    /// already cached. Returns whichever snapshot the cache now holds.
    pub async fn put(&self, instrument_id: &str, quote: QuoteSnapshot) -> QuoteSnapshot {
        let mut quotes = self.quotes.write().await;
        match quotes.get(instrument_id) {
            Some(cached) if cached.timestamp > quote.timestamp => *cached,
            _ => {
                quotes.insert(instrument_id.to_string(), quote);
                quote
            }
        }
    }

    /// Apply a live tick: LTP moves, day high/low widen to include it
    pub async fn record_tick(&self, instrument_id: &str, ltp: f64, at: DateTime<Utc>) {
        if !ltp.is_finite() || ltp <= 0.0 {
            return;
        }
        let mut quotes = self.quotes.write().await;
        let next = match quotes.get(instrument_id) {
            Some(prev) => {
                let mut q = *prev;
                q.ltp = ltp;
                q.high = q.high.map(|h| h.max(ltp));
                q.low = q.low.map(|l| l.min(ltp));
                q.change_pct = q.close.filter(|c| *c > 0.0).map(|c| (ltp - c) / c * 100.0);
                q.timestamp = at;
                q
            }
            None => QuoteSnapshot::from_ltp(ltp, at),
        };
        quotes.insert(instrument_id.to_string(), next);
    }

    pub async fn len(&self) -> usize {
        self.quotes.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + s, 0).unwrap()
    }

    #[tokio::test]
    async fn test_record_tick_updates_whole_snapshot() {
        let cache = PriceCache::new();
        let mut q = QuoteSnapshot::from_ltp(100.0, ts(0));
        q.high = Some(101.0);
        q.low = Some(99.0);
        q.close = Some(98.0);
        cache.put("1", q).await;

        cache.record_tick("1", 102.0, ts(5)).await;
        let got = cache.get("1").await.unwrap();
        assert_eq!(got.ltp, 102.0);
        assert_eq!(got.high, Some(102.0));
        assert_eq!(got.low, Some(99.0));
        assert!((got.change_pct.unwrap() - 4.0 / 98.0 * 100.0).abs() < 1e-9);
        assert_eq!(got.timestamp, ts(5));
    }

    #[tokio::test]
    async fn test_put_keeps_newer_tick() {
        let cache = PriceCache::new();
        cache.record_tick("1", 101.0, ts(10)).await;

        // Fetch response stamped before the tick arrived
        let kept = cache.put("1", QuoteSnapshot::from_ltp(100.0, ts(5))).await;
        assert_eq!(kept.ltp, 101.0);
        assert_eq!(cache.get("1").await.unwrap().ltp, 101.0);

        let kept = cache.put("1", QuoteSnapshot::from_ltp(102.0, ts(10))).await;
        assert_eq!(kept.ltp, 102.0);
        assert_eq!(cache.get("1").await.unwrap().ltp, 102.0);
    }

    #[tokio::test]
    async fn test_record_tick_ignores_garbage_and_seeds_unknown() {
        let cache = PriceCache::new();
        cache.record_tick("1", f64::NAN, ts(0)).await;
        assert_eq!(cache.len().await, 0);
        cache.record_tick("1", 50.0, ts(0)).await;
        assert_eq!(cache.get("1").await.unwrap().ltp, 50.0);
    }
}
