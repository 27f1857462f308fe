use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use signal_desk::{
    engine::DEFAULT_RISK_OFF_PCT,
    feeds::{replay::DEFAULT_WARMUP, DemoFeed, ReplayFeed},
    CycleReport, EngineConfig, Instrument, MacroContext, SignalEngine,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON file with engine overrides
    #[arg(short, long, env = "SIGNAL_DESK_CONFIG")]
    config: Option<PathBuf>,

    /// JSON array of instruments; a demo universe is used when absent
    #[arg(short, long, env = "SIGNAL_DESK_UNIVERSE")]
    universe: Option<PathBuf>,

    /// Directory of per-instrument CSV bars to replay; random-walk data when absent
    #[arg(long, env = "SIGNAL_DESK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Seconds between cycles
    #[arg(short, long, default_value = "5")]
    interval: u64,

    /// Stop after this many cycles (runs until Ctrl-C when absent)
    #[arg(long)]
    cycles: Option<u64>,

    /// Fetch timeout in milliseconds
    #[arg(long, env = "SIGNAL_DESK_FETCH_TIMEOUT_MS")]
    fetch_timeout_ms: Option<u64>,

    /// Alert hold duration in seconds
    #[arg(long)]
    hold_secs: Option<u64>,

    /// Alert cooldown in seconds
    #[arg(long)]
    cooldown_secs: Option<u64>,

    /// Seed for the demo random walk
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Print a Monte Carlo projection for the first instrument each cycle
    #[arg(long)]
    project: bool,
}

fn demo_universe() -> Vec<Instrument> {
    vec![
        Instrument::new("26000", "NSE", "NIFTY").index(),
        Instrument::new("26009", "NSE", "BANKNIFTY").index(),
        Instrument::new("2885", "NSE", "RELIANCE"),
        Instrument::new("1594", "NSE", "INFY"),
        Instrument::new("CRUDEOIL", "MCX", "CRUDEOIL").commodity(),
    ]
}

fn load_universe(path: &Path) -> Result<Vec<Instrument>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read universe {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse universe {}", path.display()))
}

fn log_cycle(report: &CycleReport) {
    for r in &report.instruments {
        match (&r.snapshot, &r.analysis) {
            (Some(q), Some(a)) => info!(
                "{:<10} {:>10.2} {:>+6.2}% | {} score {:>5.1} raw {} -> {} | {} | risk {:.0} {} | {}",
                r.instrument.name,
                q.ltp,
                q.change_pct_or_derived(),
                a.tier,
                a.score.score,
                a.score.signal,
                a.confirmed_signal,
                a.bundle.regime,
                a.score.risk,
                a.score.mode,
                a.trade_params.option_hint,
            ),
            _ => warn!("{:<10} no data", r.instrument.name),
        }
    }
    for row in &report.alerts {
        info!(
            "  [{}] {} {} ({:.0}) {}",
            row.status, row.candidate.instrument_name, row.candidate.kind, row.candidate.strength, row.message
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("signal_desk=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(ms) = args.fetch_timeout_ms {
        config.fetch.timeout_ms = ms;
    }
    if let Some(s) = args.hold_secs {
        config.alerts.hold_secs = s;
    }
    if let Some(s) = args.cooldown_secs {
        config.alerts.cooldown_secs = s;
    }
    let tz = config.session_tz()?;

    let universe = match &args.universe {
        Some(path) => load_universe(path)?,
        None => demo_universe(),
    };

    let feed = Arc::new(match &args.data_dir {
        Some(dir) => ReplayFeed::from_csv_dir(dir, &universe, tz, DEFAULT_WARMUP)?,
        None => DemoFeed::new(args.seed, tz).build(&universe),
    });

    info!("Starting Signal Desk");
    info!("Universe: {} instruments", universe.len());
    info!("Interval: {}s", args.interval);
    info!(
        "Hold {}s, cooldown {}s, confirm x{}",
        config.alerts.hold_secs, config.alerts.cooldown_secs, config.confirmation.confirm_count
    );

    let engine = SignalEngine::new(config, feed.clone(), feed.clone())?;
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    let mut completed = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }

        // Reference basket: the universe's own day changes
        let changes: Vec<f64> = futures::future::join_all(
            universe.iter().map(|i| engine.price_cache().get(&i.id)),
        )
        .await
        .into_iter()
        .flatten()
        .map(|q| q.change_pct_or_derived())
        .collect();
        let macro_ctx = MacroContext::from_basket(&changes, DEFAULT_RISK_OFF_PCT);

        let report = engine.run_cycle(&universe, macro_ctx, Utc::now()).await;
        info!("Cycle {} ({}risk-off)", report.cycle, if macro_ctx.risk_off { "" } else { "no " });
        log_cycle(&report);

        if args.project {
            if let Some(first) = universe.first() {
                match engine.project_monte_carlo(first, None, None, Utc::now()).await {
                    Ok(Some(p)) => info!(
                        "{} projection: P(up) {:.0}% P(down) {:.0}%",
                        first.name,
                        p.prob_up * 100.0,
                        p.prob_down * 100.0
                    ),
                    Ok(None) => info!("{} projection: not enough history", first.name),
                    Err(e) => warn!("{} projection failed: {:#}", first.name, e),
                }
            }
        }

        feed.advance();
        completed += 1;
        if args.cycles.is_some_and(|n| completed >= n) {
            break;
        }
        if feed.is_exhausted() {
            info!("Replay exhausted after {} cycles", completed);
            break;
        }
    }

    Ok(())
}
