//! Cursor-driven bar replay
//!
//! Holds a full bar series per instrument and exposes only the bars up to a
//! shared cursor. Each [`ReplayFeed::advance`] reveals one more bar, so the
//! engine sees history unfold the same way a live poller would.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{session_quote, BarSource, QuoteSource};
use crate::types::{clean_bars, Instrument, PriceBar, QuoteSnapshot};

/// Bars visible before the first advance
pub const DEFAULT_WARMUP: usize = 60;

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// RFC 3339, or a naive "YYYY-MM-DD HH:MM[:SS]" read in the exchange timezone
fn parse_timestamp(raw: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
        .with_context(|| format!("Failed to parse timestamp: {}", raw))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Timestamp does not exist in {}: {}", tz, raw))
}

/// Parse `timestamp,open,high,low,close,volume` rows
pub fn parse_bars<R: Read>(reader: R, tz: Tz) -> Result<Vec<PriceBar>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars = Vec::new();

    for result in csv_reader.deserialize() {
        let row: CsvRow = result.with_context(|| "Failed to parse CSV row")?;
        bars.push(PriceBar {
            timestamp: parse_timestamp(&row.timestamp, tz)?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }

    let parsed = bars.len();
    let bars = clean_bars(&bars);
    if bars.len() < parsed {
        debug!("Dropped {} invalid or duplicate bars", parsed - bars.len());
    }
    Ok(bars)
}

pub fn load_bars(path: &Path, tz: Tz) -> Result<Vec<PriceBar>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    parse_bars(file, tz).with_context(|| format!("Failed to load bars from {:?}", path))
}

/// Replays per-instrument bar series behind a shared cursor
#[derive(Debug)]
pub struct ReplayFeed {
    tz: Tz,
    series: HashMap<String, Vec<PriceBar>>,
    warmup: usize,
    step: AtomicUsize,
}

impl ReplayFeed {
    pub fn from_series(series: HashMap<String, Vec<PriceBar>>, tz: Tz, warmup: usize) -> Self {
        Self {
            tz,
            series,
            warmup: warmup.max(1),
            step: AtomicUsize::new(0),
        }
    }

    /// Load `<dir>/<NAME>.csv` (or `<dir>/<id>.csv`) for every instrument.
    ///
    /// Instruments without a file are left without data; they degrade to
    /// "no quote" rather than failing the load.
    pub fn from_csv_dir(dir: &Path, universe: &[Instrument], tz: Tz, warmup: usize) -> Result<Self> {
        let mut series = HashMap::new();
        for inst in universe {
            let candidates = [dir.join(format!("{}.csv", inst.name)), dir.join(format!("{}.csv", inst.id))];
            let Some(path) = candidates.iter().find(|p| p.exists()) else {
                warn!("No CSV for {} in {:?}", inst.name, dir);
                continue;
            };
            let bars = load_bars(path, tz)?;
            info!("Loaded {} bars for {} from {:?}", bars.len(), inst.name, path);
            series.insert(inst.id.clone(), bars);
        }
        Ok(Self::from_series(series, tz, warmup))
    }

    /// Reveal one more bar
    pub fn advance(&self) {
        self.step.fetch_add(1, Ordering::SeqCst);
    }

    /// True once every series is fully revealed
    pub fn is_exhausted(&self) -> bool {
        let end = self.warmup + self.step.load(Ordering::SeqCst);
        self.series.values().all(|bars| end >= bars.len())
    }

    fn visible(&self, instrument_id: &str) -> &[PriceBar] {
        let Some(bars) = self.series.get(instrument_id) else {
            return &[];
        };
        let end = (self.warmup + self.step.load(Ordering::SeqCst)).min(bars.len());
        &bars[..end]
    }

    /// Quote at the cursor
    pub fn quote_at_cursor(&self, instrument_id: &str) -> Option<QuoteSnapshot> {
        session_quote(self.visible(instrument_id), self.tz)
    }

    /// Closes revealed so far
    pub fn closes(&self, instrument_id: &str) -> Vec<f64> {
        self.visible(instrument_id).iter().map(|b| b.close).collect()
    }

    /// Replay time is the cursor, not the wall clock: the requested window
    /// length is honoured, its position is not.
    fn window(&self, instrument_id: &str, interval_minutes: u32, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<PriceBar> {
        let bars = self.visible(instrument_id);
        let span = (to - from).num_minutes().max(0) as usize;
        let count = span / interval_minutes.max(1) as usize;
        bars[bars.len().saturating_sub(count)..].to_vec()
    }
}

impl QuoteSource for ReplayFeed {
    fn get_quote<'a>(&'a self, instrument: &'a Instrument) -> BoxFuture<'a, Result<Option<QuoteSnapshot>>> {
        Box::pin(async move { Ok(self.quote_at_cursor(&instrument.id)) })
    }
}

impl BarSource for ReplayFeed {
    fn get_bars<'a>(
        &'a self,
        instrument: &'a Instrument,
        interval_minutes: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<PriceBar>>> {
        Box::pin(async move { Ok(self.window(&instrument.id, interval_minutes, from, to)) })
    }
}
