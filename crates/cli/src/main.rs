//! liq-tuner - parameter tuner for liquidation hunting
//!
//! Usage:
//!   liq-tuner optimize --tuner tuner.json --data snapshot/   # Optimize every configured symbol
//!   liq-tuner history --symbol BTCUSDT                       # Show stored recommendations

mod snapshot;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use engine::{
    run_optimization, OptimizationReport, OptimizeProgress, OptimizerConfig, SearchMode,
    SymbolConfig, SymbolRecommendation,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::snapshot::SnapshotDataSource;

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "liq-tuner")]
#[command(about = "Parameter tuner for liquidation hunting strategies", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the optimizer over a data snapshot
    Optimize {
        /// Tuner file: {"optimizer": {...}, "symbols": [...]}
        #[arg(long)]
        tuner: PathBuf,
        /// Snapshot directory with one sub-directory per symbol
        #[arg(long)]
        data: PathBuf,
        /// Search mode override: quick, thorough
        #[arg(long)]
        mode: Option<String>,
        /// Seed override for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
        /// Attach search diagnostics to every recommendation
        #[arg(long)]
        diagnostics: bool,
        /// Write the JSON report here
        #[arg(long)]
        out: Option<PathBuf>,
        /// Do not store the report in the history database
        #[arg(long)]
        no_store: bool,
    },
    /// Show stored runs, or the latest recommendation for one symbol
    History {
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

/// Tuner file contents
#[derive(Debug, Deserialize)]
struct TunerFile {
    #[serde(default)]
    optimizer: OptimizerConfig,
    symbols: Vec<SymbolConfig>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,liq_tuner=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,liq_tuner=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("LIQ_TUNER_DB_PATH").unwrap_or_else(|_| "data/tuner.db".to_string())
}

async fn open_db() -> anyhow::Result<persistence::Database> {
    let path = db_path();
    persistence::Database::new(&path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Optimize {
            tuner,
            data,
            mode,
            seed,
            diagnostics,
            out,
            no_store,
        } => {
            cmd_optimize(tuner, data, mode, seed, diagnostics, out, no_store).await?;
        }
        Commands::History { symbol, limit } => {
            cmd_history(symbol, limit).await?;
        }
    }

    Ok(())
}

// ============================================================================
// optimize
// ============================================================================

async fn cmd_optimize(
    tuner: PathBuf,
    data: PathBuf,
    mode: Option<String>,
    seed: Option<u64>,
    diagnostics: bool,
    out: Option<PathBuf>,
    no_store: bool,
) -> anyhow::Result<()> {
    println!("\n=== liq-tuner v{} ===", APP_VERSION);

    let raw = std::fs::read_to_string(&tuner)
        .map_err(|e| anyhow::anyhow!("Cannot read tuner file {}: {}", tuner.display(), e))?;
    let TunerFile {
        optimizer: mut config,
        symbols,
    } = serde_json::from_str(&raw)?;

    if let Some(mode) = mode {
        config.mode = mode.parse::<SearchMode>()?;
    }
    if seed.is_some() {
        config.seed = seed;
    }
    config.diagnostics |= diagnostics;

    println!(
        "Symbols: {} | Mode: {} | Data: {}",
        symbols
            .iter()
            .map(|s| s.symbol.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        config.mode,
        data.display()
    );
    println!("Press Ctrl+C to stop after the current stage\n");

    let source = SnapshotDataSource::new(data);
    let progress = Arc::new(OptimizeProgress::new());

    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        progress_for_ctrlc.cancel();
    });

    let progress_clone = progress.clone();
    let handle = tokio::spawn(async move {
        run_optimization(&source, symbols, config, progress_clone).await
    });

    // Progress display loop
    while !handle.is_finished() {
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
        if !progress.is_running() {
            continue;
        }
        let pct = progress.progress_pct();
        let symbol = progress.current_symbol.read().unwrap().clone().unwrap_or_default();
        let bar_len = 30;
        let filled = ((pct / 100.0) * bar_len as f64) as usize;
        let bar: String = "=".repeat(filled.min(bar_len)) + &" ".repeat(bar_len - filled.min(bar_len));
        print!(
            "\r  {:<10} [{}] {:>5.1}% {:<24}",
            symbol,
            bar,
            pct,
            progress.stage_label()
        );
    }
    println!();

    let report = handle.await??;
    print_report(&report);

    if let Some(out) = out {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&out, &json)?;
        println!("\nReport written to {}", out.display());
    }

    if no_store {
        return Ok(());
    }
    let db = open_db().await?;
    store::save_report(&db, &report).await?;
    println!("Stored as run {} in {}", report.run_id, db_path());

    Ok(())
}

fn print_report(report: &OptimizationReport) {
    if report.cancelled {
        warn!("Run cancelled, results are partial");
    }

    println!("\nRecommendations (run {}, seed {}):", report.run_id, report.seed);
    println!(
        "  {:<12} {:>10} {:>10} {:>10}  {}",
        "Symbol", "Now/day", "Opt/day", "Score", "Notes"
    );
    println!("  {}", "-".repeat(70));
    for rec in &report.recommendations {
        print_recommendation(rec);
    }

    let s = &report.summary;
    println!("\nPortfolio:");
    println!(
        "  Daily PnL: {} -> {} ({})",
        s.current_daily_pnl,
        s.optimized_daily_pnl,
        signed(s.daily_improvement)
    );
    println!(
        "  Max open positions: {} | Margin: {} of {} (utilization {}, target {}){}",
        s.recommended_max_open_positions,
        s.allocated_margin,
        s.deployable_capital,
        s.utilization,
        s.target_utilization,
        if s.overallocated { " OVERALLOCATED" } else { "" }
    );
}

fn signed(value: Decimal) -> String {
    if value > Decimal::ZERO {
        format!("+{}", value)
    } else {
        value.to_string()
    }
}

fn print_recommendation(rec: &SymbolRecommendation) {
    if let Some(reason) = &rec.skipped {
        println!("  {:<12} {:>10} {:>10} {:>10}  skipped: {}", rec.symbol, "-", "-", "-", reason);
        return;
    }

    let score = rec
        .optimized_score
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut notes = Vec::new();
    if !rec.changed {
        notes.push("keep live config".to_string());
    }
    if let Some(w) = &rec.tier_warning {
        notes.push(w.clone());
    }
    println!(
        "  {:<12} {:>10} {:>10} {:>10}  {}",
        rec.symbol,
        rec.current_daily_pnl.to_string(),
        rec.optimized_daily_pnl.to_string(),
        score,
        notes.join("; ")
    );

    if rec.changed {
        for side in [&rec.long, &rec.short].into_iter().flatten() {
            let p = &side.optimized;
            println!(
                "      {:<5} threshold {} | {}x {} x{} | TP {}% SL {}% | window {}s cooldown {}s",
                p.side.to_string(),
                p.threshold,
                p.leverage,
                p.trade_size,
                p.max_positions,
                p.tp_percent,
                p.sl_percent,
                p.window_ms / 1000,
                p.cooldown_ms / 1000
            );
        }
    }
}

// ============================================================================
// history
// ============================================================================

async fn cmd_history(symbol: Option<String>, limit: i64) -> anyhow::Result<()> {
    let db = open_db().await?;
    let repo = db.runs();

    if let Some(symbol) = symbol {
        let Some(record) = repo.latest_for_symbol(&symbol).await? else {
            println!("No stored recommendation for {}", symbol);
            return Ok(());
        };
        let rec: SymbolRecommendation = record.recommendation()?;
        println!("Latest recommendation for {} (run {}):", symbol, record.run_id);
        println!("{}", serde_json::to_string_pretty(&rec)?);
        return Ok(());
    }

    let runs = repo.recent_runs(limit).await?;
    if runs.is_empty() {
        println!("No stored runs in {}", db_path());
        return Ok(());
    }

    println!(
        "  {:<34} {:<9} {:>7} {:>7} {:>12}  {}",
        "Run", "Mode", "Symbols", "Skipped", "Daily +/-", "Finished"
    );
    println!("  {}", "-".repeat(90));
    for run in &runs {
        let finished = run
            .finished_at_utc()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "  {:<34} {:<9} {:>7} {:>7} {:>12}  {}{}",
            run.run_id,
            run.mode,
            run.symbols,
            run.skipped_symbols,
            signed(run.daily_improvement()),
            finished,
            if run.cancelled { " (cancelled)" } else { "" }
        );
    }

    Ok(())
}
