//! Portfolio driver: one staged search per symbol, aggregated into a report
//!
//! Symbols run one after another. Each search executes on a blocking
//! thread so a panic in one symbol only skips that symbol.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{CapitalConfig, OptimizerConfig};
use crate::data::{load_symbol_data, HistoricalDataSource, SymbolData};
use crate::error::{TunerError, TunerResult};
use crate::report::{
    money, ratio, Diagnostics, Improvement, OptimizationReport, PortfolioSummary,
    RecommendedParams, ResultSummary, SideReport, SymbolRecommendation,
};
use crate::scoring::ScoringEngine;
use crate::search::{Candidate, ProgressSink, SearchOrchestrator, SearchOutcome, SearchStage};
use crate::types::SymbolConfig;

// ============================================================================
// Progress
// ============================================================================

/// Optimization run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeStatus {
    Idle,
    Running,
    Complete,
    Cancelled,
    Error,
}

/// Shared progress tracker between the caller and the running optimization
pub struct OptimizeProgress {
    pub status: RwLock<OptimizeStatus>,
    pub stage: RwLock<Option<SearchStage>>,
    pub current_symbol: RwLock<Option<String>>,
    pub total_symbols: AtomicU32,
    pub completed_symbols: AtomicU32,
    pub cancelled: AtomicBool,
    pub report: RwLock<Option<OptimizationReport>>,
    pub error_message: RwLock<Option<String>>,
    symbol_index: AtomicU32,
    /// Overall progress in hundredths of a percent, only ever raised
    percent_bp: AtomicU32,
}

impl OptimizeProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(OptimizeStatus::Idle),
            stage: RwLock::new(None),
            current_symbol: RwLock::new(None),
            total_symbols: AtomicU32::new(0),
            completed_symbols: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            report: RwLock::new(None),
            error_message: RwLock::new(None),
            symbol_index: AtomicU32::new(0),
            percent_bp: AtomicU32::new(0),
        }
    }

    /// Clear everything, including a pending cancellation
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
        self.begin(0);
        *self.status.write().unwrap() = OptimizeStatus::Idle;
    }

    /// Mark a run over `total` symbols as started. A cancellation requested
    /// beforehand stays in effect.
    pub fn begin(&self, total: usize) {
        *self.status.write().unwrap() = OptimizeStatus::Running;
        *self.stage.write().unwrap() = None;
        *self.current_symbol.write().unwrap() = None;
        *self.report.write().unwrap() = None;
        *self.error_message.write().unwrap() = None;
        self.total_symbols.store(total as u32, Ordering::Relaxed);
        self.completed_symbols.store(0, Ordering::Relaxed);
        self.symbol_index.store(0, Ordering::Relaxed);
        self.percent_bp.store(0, Ordering::Relaxed);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Get progress as percentage
    pub fn progress_pct(&self) -> f64 {
        self.percent_bp.load(Ordering::Relaxed) as f64 / 100.0
    }

    /// Check if currently running
    pub fn is_running(&self) -> bool {
        matches!(*self.status.read().unwrap(), OptimizeStatus::Running)
    }

    /// Label of the stage the current symbol is in
    pub fn stage_label(&self) -> &'static str {
        self.stage
            .read()
            .unwrap()
            .map(SearchStage::label)
            .unwrap_or(SearchStage::Idle.label())
    }

    fn begin_symbol(&self, index: usize, symbol: &str) {
        self.symbol_index.store(index as u32, Ordering::Relaxed);
        *self.current_symbol.write().unwrap() = Some(symbol.to_string());
        *self.stage.write().unwrap() = Some(SearchStage::Idle);
        self.raise_to(index as f64);
    }

    fn finish_symbol(&self) {
        let done = self.completed_symbols.fetch_add(1, Ordering::Relaxed) + 1;
        self.raise_to(done as f64);
    }

    fn finish(&self, report: OptimizationReport) {
        let status = if report.cancelled {
            OptimizeStatus::Cancelled
        } else {
            OptimizeStatus::Complete
        };
        if !report.cancelled {
            self.percent_bp.fetch_max(10_000, Ordering::Relaxed);
        }
        *self.current_symbol.write().unwrap() = None;
        *self.report.write().unwrap() = Some(report);
        *self.status.write().unwrap() = status;
    }

    fn fail(&self, message: String) {
        *self.error_message.write().unwrap() = Some(message);
        *self.status.write().unwrap() = OptimizeStatus::Error;
    }

    /// Raise overall progress to `symbols_done` symbols' worth of work
    fn raise_to(&self, symbols_done: f64) {
        let total = self.total_symbols.load(Ordering::Relaxed);
        if total == 0 {
            return;
        }
        let pct = (symbols_done / total as f64).clamp(0.0, 1.0);
        let bp = (pct * 10_000.0).round() as u32;
        self.percent_bp.fetch_max(bp, Ordering::Relaxed);
    }
}

impl Default for OptimizeProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for OptimizeProgress {
    fn on_progress(&self, _symbol: &str, stage: SearchStage, fraction: f64) {
        *self.stage.write().unwrap() = Some(stage);
        let index = self.symbol_index.load(Ordering::Relaxed) as f64;
        self.raise_to(index + fraction.clamp(0.0, 1.0));
    }
}

// ============================================================================
// Main Optimization Runner
// ============================================================================

/// Optimize every configured symbol and build the portfolio report.
///
/// Only an invalid configuration fails the run. Symbols without history,
/// with a failing data source or a crashed search are reported as skipped.
pub async fn run_optimization(
    source: &dyn HistoricalDataSource,
    symbols: Vec<SymbolConfig>,
    config: OptimizerConfig,
    progress: Arc<OptimizeProgress>,
) -> TunerResult<OptimizationReport> {
    progress.begin(symbols.len());
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid optimizer configuration");
        progress.fail(e.to_string());
        return Err(e);
    }

    let started_at = Utc::now();
    let seed = config.seed.unwrap_or_else(rand::random);
    let run_id = format!("{}-{:016x}", started_at.format("%Y%m%d%H%M%S"), seed);
    let symbol_count = symbols.len();
    let config = Arc::new(config);

    info!(
        run_id = %run_id,
        mode = %config.mode,
        symbols = symbol_count,
        seed,
        "Starting parameter optimization"
    );

    let mut recommendations = Vec::with_capacity(symbol_count);
    for (i, current) in symbols.into_iter().enumerate() {
        let symbol = current.symbol.clone();
        if progress.is_cancelled() {
            recommendations.push(SymbolRecommendation::skipped(
                &symbol,
                TunerError::Cancelled.to_string(),
            ));
            continue;
        }
        progress.begin_symbol(i, &symbol);

        let recommendation = match load_symbol_data(source, &symbol, &config).await {
            Ok(data) => {
                let config = Arc::clone(&config);
                let progress = Arc::clone(&progress);
                let task = tokio::task::spawn_blocking(move || {
                    optimize_symbol(
                        &data,
                        &current,
                        &config,
                        symbol_count,
                        seed,
                        progress.as_ref(),
                        &progress.cancelled,
                    )
                });
                match task.await {
                    Ok(rec) => rec,
                    Err(e) => {
                        let e = TunerError::Join(e.to_string());
                        error!(symbol = %symbol, error = %e, "Symbol search failed");
                        SymbolRecommendation::skipped(&symbol, e.to_string())
                    }
                }
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Skipping symbol");
                SymbolRecommendation::skipped(&symbol, e.to_string())
            }
        };

        recommendations.push(recommendation);
        progress.finish_symbol();
    }

    let cancelled = progress.is_cancelled();
    let summary = summarize_portfolio(&recommendations, &config.capital);
    let report = OptimizationReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        mode: config.mode,
        seed,
        cancelled,
        recommendations,
        summary,
    };

    info!(
        run_id = %report.run_id,
        optimized = report.summary.optimized_symbols,
        skipped = report.summary.skipped_symbols,
        current_daily_pnl = %report.summary.current_daily_pnl,
        optimized_daily_pnl = %report.summary.optimized_daily_pnl,
        overallocated = report.summary.overallocated,
        cancelled,
        "Optimization complete"
    );

    progress.finish(report.clone());
    Ok(report)
}

/// Run the staged search for one symbol and turn it into a recommendation
pub fn optimize_symbol(
    data: &SymbolData,
    current: &SymbolConfig,
    config: &OptimizerConfig,
    symbol_count: usize,
    run_seed: u64,
    progress: &dyn ProgressSink,
    cancel: &AtomicBool,
) -> SymbolRecommendation {
    let started = Instant::now();
    let outcome =
        SearchOrchestrator::new(data, current, config, symbol_count, run_seed).run(progress, cancel);
    let duration_ms = started.elapsed().as_millis() as u64;

    let recommendation = build_recommendation(data, config, &outcome, duration_ms);
    if outcome.improved() {
        info!(
            symbol = %recommendation.symbol,
            current_daily_pnl = %recommendation.current_daily_pnl,
            optimized_daily_pnl = %recommendation.optimized_daily_pnl,
            "Best configuration found"
        );
    } else {
        info!(symbol = %recommendation.symbol, "Live configuration kept");
    }
    recommendation
}

fn build_recommendation(
    data: &SymbolData,
    config: &OptimizerConfig,
    outcome: &SearchOutcome,
    duration_ms: u64,
) -> SymbolRecommendation {
    let baseline = &outcome.baseline;
    let best = &outcome.best;
    let days = if data.span_days() > 0.0 {
        data.span_days()
    } else {
        1.0
    };

    let current_combined = ScoringEngine::combine(&baseline.long_result, &baseline.short_result);
    let best_combined = ScoringEngine::combine(&best.long_result, &best.short_result);
    let current_daily = current_combined.pnl / days;
    let optimized_daily = best_combined.pnl / days;

    let score_delta = if baseline.score.is_finite() && best.score.is_finite() {
        Some(ratio(best.score.total - baseline.score.total))
    } else {
        None
    };
    let improvement = Improvement {
        pnl: money(best_combined.pnl - current_combined.pnl),
        daily_pnl: money(optimized_daily - current_daily),
        win_rate: money((best_combined.win_rate - current_combined.win_rate) * 100.0),
        sharpe: ratio(best_combined.sharpe - current_combined.sharpe),
        drawdown: money(current_combined.max_drawdown - best_combined.max_drawdown),
        score: score_delta,
    };

    let diagnostics = (config.diagnostics || !data.degradations().is_empty()).then(|| {
        let mut diagnostics = Diagnostics {
            candidate_counts: outcome.stats.candidate_counts,
            rejections: outcome.stats.rejections.clone(),
            combinations_evaluated: outcome.stats.combinations_evaluated,
            combinations_accepted: outcome.stats.combinations_accepted,
            cache_hits: outcome.stats.cache_hits,
            cache_misses: outcome.stats.cache_misses,
            duration_ms,
            stage: Some(outcome.stage),
            degradations: data.degradations().to_vec(),
            data_digest: data.digest().to_string(),
            ..Default::default()
        };
        if let Some(stress) = &outcome.best_stress {
            diagnostics.set_stress(stress);
        }
        diagnostics
    });

    SymbolRecommendation {
        symbol: outcome.symbol.clone(),
        long: Some(side_report(baseline, best, true)),
        short: Some(side_report(baseline, best, false)),
        current_score: SymbolRecommendation::with_score(baseline.score.total),
        optimized_score: SymbolRecommendation::with_score(best.score.total),
        current_daily_pnl: money(current_daily),
        optimized_daily_pnl: money(optimized_daily),
        span_days: money(data.span_days()),
        improvement,
        changed: outcome.improved(),
        tier_warning: tier_warning(data, baseline, best),
        skipped: None,
        diagnostics,
    }
}

fn side_report(baseline: &Candidate, best: &Candidate, long: bool) -> SideReport {
    let pick = |c: &Candidate| {
        if long {
            (RecommendedParams::from(&c.long), ResultSummary::from(c.long_result.as_ref()))
        } else {
            (RecommendedParams::from(&c.short), ResultSummary::from(c.short_result.as_ref()))
        }
    };
    let (current, current_result) = pick(baseline);
    let (optimized, optimized_result) = pick(best);
    SideReport {
        current,
        current_result,
        optimized,
        optimized_result,
    }
}

/// Live leverage above the exchange tiers, or an optimized depth the tiers
/// cut short. Without bracket data the tier maximum is unknown.
fn tier_warning(data: &SymbolData, baseline: &Candidate, best: &Candidate) -> Option<String> {
    let mut notes = Vec::new();
    if !data.brackets().is_empty() {
        let max = data.max_tier_leverage();
        for p in [&baseline.long, &baseline.short] {
            if p.leverage > max {
                notes.push(format!(
                    "live {} leverage {}x exceeds tier maximum {}x",
                    p.side, p.leverage, max
                ));
            }
        }
    }
    if best.tier_clipped {
        notes.push("optimized DCA depth clipped by leverage tier capacity".to_string());
    }
    (!notes.is_empty()).then(|| notes.join("; "))
}

// ============================================================================
// Portfolio
// ============================================================================

/// Aggregate per-symbol recommendations. Skipped symbols count towards the
/// position cap but contribute no PnL or margin.
pub fn summarize_portfolio(
    recommendations: &[SymbolRecommendation],
    capital: &CapitalConfig,
) -> PortfolioSummary {
    let active: Vec<&SymbolRecommendation> =
        recommendations.iter().filter(|r| !r.is_skipped()).collect();

    let current_daily_pnl: Decimal = active.iter().map(|r| r.current_daily_pnl).sum();
    let optimized_daily_pnl: Decimal = active.iter().map(|r| r.optimized_daily_pnl).sum();
    let allocated_margin: Decimal = active
        .iter()
        .flat_map(|r| [r.long.as_ref(), r.short.as_ref()])
        .flatten()
        .map(|side| side.optimized.trade_size * Decimal::from(side.optimized.max_positions))
        .sum();

    let deployable = money(capital.total_capital);
    let target = ratio(capital.target_utilization);
    let utilization = if deployable > Decimal::ZERO {
        (allocated_margin / deployable).round_dp(4)
    } else {
        Decimal::ZERO
    };
    let overallocated = allocated_margin > deployable * target;
    if overallocated {
        warn!(
            allocated = %allocated_margin,
            deployable = %deployable,
            target = %target,
            "Recommended margin exceeds target utilization"
        );
    }

    PortfolioSummary {
        symbols: recommendations.len(),
        optimized_symbols: active.len(),
        skipped_symbols: recommendations.len() - active.len(),
        current_daily_pnl,
        optimized_daily_pnl,
        daily_improvement: optimized_daily_pnl - current_daily_pnl,
        recommended_max_open_positions: recommendations.len() as u32,
        deployable_capital: deployable,
        allocated_margin,
        target_utilization: target,
        utilization,
        overallocated,
    }
}
