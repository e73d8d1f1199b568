//! Staged per-symbol parameter search
//!
//! Idle → GeneratingCandidates → CoarseSearch → Refinement →
//! ScenarioStressTest → Done. The live configuration is simulated first and
//! seeds the running best, so the outcome never scores below it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{SimKey, SimulationCache};
use crate::candidates::{CandidateCounts, CandidateGenerator, CandidateSet};
use crate::config::{FillModel, OptimizerConfig};
use crate::data::{SymbolData, DEFAULT_LEVERAGE_CAP};
use crate::scenario::{self, StressReport};
use crate::scoring::{committed_margin, RejectionReason, ScoreBreakdown, ScoringEngine};
use crate::simulator::TradeSimulator;
use crate::types::{BacktestResult, LeverageBracket, ParameterSet, PositionSide, SymbolConfig};

// ============================================================================
// Stages and progress
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStage {
    Idle,
    GeneratingCandidates,
    CoarseSearch,
    Refinement,
    ScenarioStressTest,
    Done,
}

impl SearchStage {
    pub fn label(self) -> &'static str {
        match self {
            SearchStage::Idle => "Idle",
            SearchStage::GeneratingCandidates => "Generating candidates",
            SearchStage::CoarseSearch => "Coarse search",
            SearchStage::Refinement => "Refining timers",
            SearchStage::ScenarioStressTest => "Scenario stress test",
            SearchStage::Done => "Done",
        }
    }

    /// Share of one symbol's work finished when this stage begins and ends
    fn span(self) -> (f64, f64) {
        match self {
            SearchStage::Idle => (0.0, 0.0),
            SearchStage::GeneratingCandidates => (0.0, 0.05),
            SearchStage::CoarseSearch => (0.05, 0.85),
            SearchStage::Refinement => (0.85, 0.95),
            SearchStage::ScenarioStressTest => (0.95, 1.0),
            SearchStage::Done => (1.0, 1.0),
        }
    }
}

impl std::fmt::Display for SearchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Receives search progress. Must return quickly and never block.
pub trait ProgressSink: Send + Sync {
    /// `fraction` is this symbol's completed share, 0..=1, non-decreasing
    fn on_progress(&self, symbol: &str, stage: SearchStage, fraction: f64);
}

/// Sink that drops every update
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _symbol: &str, _stage: SearchStage, _fraction: f64) {}
}

// ============================================================================
// Search space
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoarsePoint {
    pub leverage: u32,
    pub margin: f64,
    pub tp: f64,
    pub sl: f64,
}

/// Leverage × margin × TP × SL, leverage outermost
#[derive(Debug, Clone)]
pub struct CoarseSpace {
    leverage: Vec<u32>,
    margin: Vec<f64>,
    tp: Vec<f64>,
    sl: Vec<f64>,
    cursor: usize,
}

impl CoarseSpace {
    pub fn new(leverage: Vec<u32>, margin: Vec<f64>, tp: Vec<f64>, sl: Vec<f64>) -> Self {
        Self {
            leverage,
            margin,
            tp,
            sl,
            cursor: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.leverage.len() * self.margin.len() * self.tp.len() * self.sl.len()
    }
}

impl Iterator for CoarseSpace {
    type Item = CoarsePoint;

    fn next(&mut self) -> Option<CoarsePoint> {
        if self.cursor >= self.total() {
            return None;
        }
        let mut i = self.cursor;
        let sl = self.sl[i % self.sl.len()];
        i /= self.sl.len();
        let tp = self.tp[i % self.tp.len()];
        i /= self.tp.len();
        let margin = self.margin[i % self.margin.len()];
        i /= self.margin.len();
        let leverage = self.leverage[i];
        self.cursor += 1;
        Some(CoarsePoint {
            leverage,
            margin,
            tp,
            sl,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total().saturating_sub(self.cursor);
        (left, Some(left))
    }
}

impl ExactSizeIterator for CoarseSpace {}

/// DCA slots per side a (leverage, margin) pair supports, and whether the
/// tier limit was the binding constraint.
///
/// Without brackets leverage is capped at 10 with unlimited notional.
pub fn dca_capacity(
    brackets: &[LeverageBracket],
    leverage: u32,
    margin: f64,
    budget: f64,
    max_dca: u32,
) -> Result<(u32, bool), RejectionReason> {
    if margin <= 0.0 || leverage == 0 {
        return Err(RejectionReason::DcaDepth);
    }

    let tier_cap = if brackets.is_empty() {
        if leverage > DEFAULT_LEVERAGE_CAP {
            return Err(RejectionReason::TierLimit);
        }
        u32::MAX
    } else {
        let max_notional = brackets
            .iter()
            .filter(|b| b.initial_leverage >= leverage)
            .map(|b| b.notional_cap)
            .fold(None, |acc: Option<f64>, cap| Some(acc.map_or(cap, |a| a.max(cap))))
            .ok_or(RejectionReason::TierLimit)?;
        (max_notional / (margin * leverage as f64)).floor() as u32
    };

    let budget_cap = (budget / margin).floor() as u32;
    let other = budget_cap.min(max_dca);
    Ok((tier_cap.min(other), tier_cap < other))
}

// ============================================================================
// Results
// ============================================================================

/// A scored long/short pair
#[derive(Debug, Clone)]
pub struct Candidate {
    pub long: ParameterSet,
    pub short: ParameterSet,
    pub long_result: Arc<BacktestResult>,
    pub short_result: Arc<BacktestResult>,
    pub score: ScoreBreakdown,
    /// DCA depth was limited by the leverage tier rather than the budget
    pub tier_clipped: bool,
}

impl Candidate {
    pub fn combined_pnl(&self) -> f64 {
        self.long_result.total_pnl + self.short_result.total_pnl
    }

    pub fn same_params(&self, other: &Candidate) -> bool {
        self.long == other.long && self.short == other.short
    }
}

/// Higher total wins; ties keep the incumbent
fn pick_better(best: Candidate, challenger: Candidate) -> Candidate {
    if challenger.score.total > best.score.total {
        challenger
    } else {
        best
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub candidate_counts: CandidateCounts,
    pub rejections: BTreeMap<RejectionReason, u64>,
    pub combinations_evaluated: u64,
    pub combinations_accepted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl SearchStats {
    fn reject(&mut self, reason: RejectionReason) {
        *self.rejections.entry(reason).or_insert(0) += 1;
    }

    pub fn rejected(&self, reason: RejectionReason) -> u64 {
        self.rejections.get(&reason).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub symbol: String,
    /// Live configuration, scored with the same penalties as `best`
    pub baseline: Candidate,
    pub best: Candidate,
    pub best_stress: Option<StressReport>,
    pub stats: SearchStats,
    /// Last stage entered
    pub stage: SearchStage,
    pub cancelled: bool,
    pub min_dca_depth: u32,
}

impl SearchOutcome {
    pub fn improved(&self) -> bool {
        !self.best.same_params(&self.baseline)
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SearchOrchestrator<'a> {
    data: &'a SymbolData,
    current: &'a SymbolConfig,
    config: &'a OptimizerConfig,
    symbol_count: usize,
    run_seed: u64,
    simulator: TradeSimulator<'a>,
    scoring: ScoringEngine,
    cache: SimulationCache,
    stats: SearchStats,
    stage: SearchStage,
}

impl<'a> SearchOrchestrator<'a> {
    pub fn new(
        data: &'a SymbolData,
        current: &'a SymbolConfig,
        config: &'a OptimizerConfig,
        symbol_count: usize,
        run_seed: u64,
    ) -> Self {
        Self {
            data,
            current,
            config,
            symbol_count: symbol_count.max(1),
            run_seed,
            simulator: TradeSimulator::new(data, config.simulation_settings()),
            scoring: ScoringEngine::new(config, data.p95_range_pct()),
            cache: SimulationCache::new(),
            stats: SearchStats::default(),
            stage: SearchStage::Idle,
        }
    }

    /// Run every stage. Cancellation is honoured between stages and between
    /// coarse combinations; a cancelled search returns its best so far.
    pub fn run(mut self, progress: &dyn ProgressSink, cancel: &AtomicBool) -> SearchOutcome {
        self.enter(SearchStage::GeneratingCandidates, progress);
        let baseline = self.baseline();
        let candidates = CandidateGenerator::new(
            self.data,
            self.current,
            self.config,
            self.symbol_count,
        )
        .all();
        self.stats.candidate_counts = candidates.counts();
        let min_depth = self.data.min_dca_depth(self.config.max_dca_positions);

        debug!(
            symbol = self.data.symbol(),
            counts = ?self.stats.candidate_counts,
            min_depth,
            "Candidates generated"
        );

        if cancel.load(Ordering::Relaxed) {
            return self.finish(baseline.clone(), baseline, None, min_depth, true);
        }

        self.enter(SearchStage::CoarseSearch, progress);
        let best = self.coarse_search(&candidates, min_depth, baseline.clone(), progress, cancel);
        if cancel.load(Ordering::Relaxed) {
            return self.finish(baseline, best, None, min_depth, true);
        }

        self.enter(SearchStage::Refinement, progress);
        let best = self.refine(&candidates, best, progress);
        if cancel.load(Ordering::Relaxed) {
            return self.finish(baseline, best, None, min_depth, true);
        }

        self.enter(SearchStage::ScenarioStressTest, progress);
        let (baseline, best, report) = self.stress(baseline, best);

        self.enter(SearchStage::Done, progress);
        self.finish(baseline, best, Some(report), min_depth, false)
    }

    fn enter(&mut self, stage: SearchStage, progress: &dyn ProgressSink) {
        self.stage = stage;
        info!(symbol = self.data.symbol(), stage = %stage, "Search stage");
        progress.on_progress(self.data.symbol(), stage, stage.span().0);
    }

    fn report(&self, progress: &dyn ProgressSink, done: usize, total: usize) {
        let (start, end) = self.stage.span();
        let within = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        let fraction = (start + (end - start) * within).min(end);
        progress.on_progress(self.data.symbol(), self.stage, fraction);
    }

    fn simulate(&mut self, params: &ParameterSet, fill: &FillModel) -> Arc<BacktestResult> {
        let key = SimKey::new(params, fill);
        let seed = self.run_seed ^ key.fingerprint();
        let simulator = &self.simulator;
        self.cache.get_or_run(key, || {
            simulator.run(params, fill, &mut StdRng::seed_from_u64(seed))
        })
    }

    /// Both sides of one hunter. Without a hunter cooldown the sides never
    /// interact and come from the per-side cache.
    fn simulate_pair(
        &mut self,
        long: &ParameterSet,
        short: &ParameterSet,
        fill: &FillModel,
    ) -> (Arc<BacktestResult>, Arc<BacktestResult>) {
        if long.hunter_cooldown_ms <= 0 && short.hunter_cooldown_ms <= 0 {
            return (self.simulate(long, fill), self.simulate(short, fill));
        }
        let seed = self.run_seed
            ^ SimKey::new(long, fill).fingerprint()
            ^ SimKey::new(short, fill).fingerprint().rotate_left(32);
        let (long_result, short_result) =
            self.simulator
                .run_pair(long, short, fill, &mut StdRng::seed_from_u64(seed));
        (Arc::new(long_result), Arc::new(short_result))
    }

    /// Live configuration, scored without feasibility filters
    fn baseline(&mut self) -> Candidate {
        let fill = self.config.fill;
        let long = self.current.long.clone();
        let short = self.current.short.clone();
        let (long_result, short_result) = self.simulate_pair(&long, &short, &fill);

        let combined = ScoringEngine::combine(&long_result, &short_result);
        let mut score = self.scoring.score(&combined, committed_margin(&long, &short));
        if !score.is_finite() {
            self.stats.reject(RejectionReason::NonFiniteScore);
            score = ScoreBreakdown::rejected();
        }

        info!(
            symbol = self.data.symbol(),
            pnl = format!("{:.2}", combined.pnl),
            score = format!("{:.4}", score.total),
            "Baseline simulated"
        );

        Candidate {
            long,
            short,
            long_result,
            short_result,
            score,
            tier_clipped: false,
        }
    }

    /// Live parameters of one side with the coarse point applied
    fn template(&self, side: PositionSide, point: &CoarsePoint, depth: u32) -> ParameterSet {
        ParameterSet {
            max_positions: depth,
            trade_size: point.margin,
            leverage: point.leverage,
            tp_percent: point.tp,
            sl_percent: point.sl,
            ..self.current.side(side).clone()
        }
    }

    /// Highest-PnL threshold for one side; ties keep the lower threshold
    fn best_threshold(
        &mut self,
        template: ParameterSet,
        thresholds: &[f64],
    ) -> (ParameterSet, Arc<BacktestResult>) {
        let fill = self.config.fill;
        let swept = thresholds
            .iter()
            .map(|t| {
                let params = ParameterSet {
                    threshold: *t,
                    ..template.clone()
                };
                let result = self.simulate(&params, &fill);
                (params, result)
            })
            .fold(None, |best: Option<(ParameterSet, Arc<BacktestResult>)>, next| match best {
                Some(b) if b.1.total_pnl >= next.1.total_pnl => Some(b),
                _ => Some(next),
            });

        match swept {
            Some(best) => best,
            None => {
                let result = self.simulate(&template, &fill);
                (template, result)
            }
        }
    }

    fn evaluate_point(
        &mut self,
        candidates: &CandidateSet,
        point: &CoarsePoint,
        min_depth: u32,
        budget: f64,
    ) -> Result<Candidate, RejectionReason> {
        let (depth, tier_clipped) = dca_capacity(
            self.data.brackets(),
            point.leverage,
            point.margin,
            budget,
            self.config.max_dca_positions,
        )?;
        if depth < min_depth || depth == 0 {
            return Err(RejectionReason::DcaDepth);
        }

        let long = self.template(PositionSide::Long, point, depth);
        let short = self.template(PositionSide::Short, point, depth);
        if !self.config.mode.is_thorough() {
            ScoringEngine::check_static(&long)?;
        }

        let (long, long_result) = self.best_threshold(long, candidates.thresholds(PositionSide::Long));
        let (short, short_result) =
            self.best_threshold(short, candidates.thresholds(PositionSide::Short));
        // thresholds were swept per side; a shared hunter cooldown couples them
        let (long_result, short_result) =
            if long.hunter_cooldown_ms > 0 || short.hunter_cooldown_ms > 0 {
                let fill = self.config.fill;
                self.simulate_pair(&long, &short, &fill)
            } else {
                (long_result, short_result)
            };

        let score = self
            .scoring
            .evaluate(&long, &short, &long_result, &short_result)?;
        Ok(Candidate {
            long,
            short,
            long_result,
            short_result,
            score,
            tier_clipped,
        })
    }

    fn coarse_search(
        &mut self,
        candidates: &CandidateSet,
        min_depth: u32,
        seed_best: Candidate,
        progress: &dyn ProgressSink,
        cancel: &AtomicBool,
    ) -> Candidate {
        let space = CoarseSpace::new(
            candidates.leverage.clone(),
            candidates.margin.clone(),
            candidates.tp.clone(),
            candidates.sl.clone(),
        );
        let total = space.total();
        let budget = self.config.capital.per_side_budget(self.symbol_count);

        space
            .enumerate()
            .take_while(|_| !cancel.load(Ordering::Relaxed))
            .fold(seed_best, |best, (i, point)| {
                self.stats.combinations_evaluated += 1;
                let best = match self.evaluate_point(candidates, &point, min_depth, budget) {
                    Ok(candidate) => {
                        self.stats.combinations_accepted += 1;
                        if candidate.score.total > best.score.total {
                            debug!(
                                symbol = self.data.symbol(),
                                leverage = point.leverage,
                                margin = point.margin,
                                tp = point.tp,
                                sl = point.sl,
                                score = candidate.score.total,
                                "New best combination"
                            );
                        }
                        pick_better(best, candidate)
                    }
                    Err(reason) => {
                        self.stats.reject(reason);
                        best
                    }
                };
                self.report(progress, i + 1, total);
                best
            })
    }

    /// Window × cooldown sweep around the coarse winner
    fn refine(
        &mut self,
        candidates: &CandidateSet,
        anchor: Candidate,
        progress: &dyn ProgressSink,
    ) -> Candidate {
        let fill = self.config.fill;
        let pairs: Vec<(i64, i64)> = candidates
            .windows
            .iter()
            .flat_map(|w| candidates.cooldowns.iter().map(move |c| (*w, *c)))
            .collect();
        let total = pairs.len();
        let template = anchor.clone();

        pairs
            .into_iter()
            .enumerate()
            .fold(anchor, |best, (i, (window_ms, cooldown_ms))| {
                self.stats.combinations_evaluated += 1;
                let long = ParameterSet {
                    window_ms,
                    cooldown_ms,
                    ..template.long.clone()
                };
                let short = ParameterSet {
                    window_ms,
                    cooldown_ms,
                    ..template.short.clone()
                };
                let (long_result, short_result) = self.simulate_pair(&long, &short, &fill);

                let best = match self
                    .scoring
                    .evaluate(&long, &short, &long_result, &short_result)
                {
                    Ok(score) => {
                        self.stats.combinations_accepted += 1;
                        pick_better(
                            best,
                            Candidate {
                                long,
                                short,
                                long_result,
                                short_result,
                                score,
                                tier_clipped: template.tier_clipped,
                            },
                        )
                    }
                    Err(reason) => {
                        self.stats.reject(reason);
                        best
                    }
                };
                self.report(progress, i + 1, total);
                best
            })
    }

    fn stress_report(&mut self, candidate: &Candidate) -> StressReport {
        let weight = self.config.scenario_weight();
        let long = candidate.long.clone();
        let short = candidate.short.clone();
        scenario::stress_test(candidate.combined_pnl(), weight, |fill| {
            let (long_result, short_result) = self.simulate_pair(&long, &short, fill);
            long_result.total_pnl + short_result.total_pnl
        })
    }

    /// Penalize the winner and the baseline alike; the baseline wins back
    /// if the stress penalty drops the winner below it.
    fn stress(
        &mut self,
        baseline: Candidate,
        best: Candidate,
    ) -> (Candidate, Candidate, StressReport) {
        let best_report = self.stress_report(&best);
        let best = Candidate {
            score: best.score.with_scenario_penalty(best_report.penalty),
            ..best
        };

        if best.same_params(&baseline) {
            let baseline = Candidate {
                score: best.score,
                ..baseline
            };
            return (baseline, best, best_report);
        }

        let baseline_report = self.stress_report(&baseline);
        let baseline = Candidate {
            score: baseline.score.with_scenario_penalty(baseline_report.penalty),
            ..baseline
        };

        if best.score.total >= baseline.score.total {
            (baseline, best, best_report)
        } else {
            info!(
                symbol = self.data.symbol(),
                penalty = format!("{:.2}", best_report.penalty),
                "Stress penalty favours the live configuration"
            );
            (baseline.clone(), baseline, baseline_report)
        }
    }

    fn finish(
        self,
        baseline: Candidate,
        best: Candidate,
        best_stress: Option<StressReport>,
        min_dca_depth: u32,
        cancelled: bool,
    ) -> SearchOutcome {
        let mut stats = self.stats;
        stats.cache_hits = self.cache.hits();
        stats.cache_misses = self.cache.misses();

        if cancelled {
            info!(symbol = self.data.symbol(), stage = %self.stage, "Search cancelled");
        } else {
            info!(
                symbol = self.data.symbol(),
                evaluated = stats.combinations_evaluated,
                accepted = stats.combinations_accepted,
                cache_hits = stats.cache_hits,
                cache_misses = stats.cache_misses,
                score = format!("{:.4}", best.score.total),
                "Search complete"
            );
        }

        SearchOutcome {
            symbol: self.data.symbol().to_string(),
            baseline,
            best,
            best_stress,
            stats,
            stage: self.stage,
            cancelled,
            min_dca_depth,
        }
    }
}
