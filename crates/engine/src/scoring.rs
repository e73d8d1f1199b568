//! Long/short result pairing, feasibility filters and the weighted score

use serde::{Deserialize, Serialize};

use crate::config::OptimizerConfig;
use crate::risk::INFINITE_PROFIT_FACTOR;
use crate::types::{BacktestResult, ParameterSet};

// ============================================================================
// Constants
// ============================================================================

pub const MIN_PROFIT_FACTOR: f64 = 1.05;
pub const MAX_STOP_RATE: f64 = 0.65;
pub const MIN_RISK_REWARD: f64 = 0.33;
/// Observed win rate must beat the break-even rate by this much (fraction)
pub const WIN_RATE_MARGIN: f64 = 0.05;
/// Per-side Sharpe is clamped to ±this before averaging
pub const SHARPE_CLAMP: f64 = 5.0;
/// p95 rolling range (percent) tolerated without penalty
pub const RANGE_BASELINE_PCT: f64 = 4.0;
/// Drawdown / committed margin tolerated without penalty
pub const DRAWDOWN_MARGIN_BASELINE: f64 = 0.75;

// ============================================================================
// Types
// ============================================================================

/// Why a combination was excluded from the search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectionReason {
    LiquidationSafety,
    RiskReward,
    ProfitFactor,
    StopRate,
    WinRateMargin,
    NonFiniteScore,
    TierLimit,
    DcaDepth,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectionReason::LiquidationSafety => "liquidationSafety",
            RejectionReason::RiskReward => "riskReward",
            RejectionReason::ProfitFactor => "profitFactor",
            RejectionReason::StopRate => "stopRate",
            RejectionReason::WinRateMargin => "winRateMargin",
            RejectionReason::NonFiniteScore => "nonFiniteScore",
            RejectionReason::TierLimit => "tierLimit",
            RejectionReason::DcaDepth => "dcaDepth",
        };
        write!(f, "{s}")
    }
}

/// Long and short results folded into portfolio figures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinedMetrics {
    pub pnl: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub profit_factor: f64,
    /// SL exits over all exits, 0..=1
    pub stop_rate: f64,
    /// Wins over trades, 0..=1
    pub win_rate: f64,
    /// Worse of the two sides
    pub cvar: f64,
    pub trades: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub pnl_score: f64,
    pub sharpe_score: f64,
    pub drawdown_score: f64,
    pub base: f64,
    pub volatility_penalty: f64,
    pub cvar_penalty: f64,
    pub scenario_penalty: f64,
    pub total: f64,
}

impl ScoreBreakdown {
    /// Score of a candidate that can never win
    pub fn rejected() -> Self {
        Self {
            pnl_score: 0.0,
            sharpe_score: 0.0,
            drawdown_score: 0.0,
            base: f64::NEG_INFINITY,
            volatility_penalty: 0.0,
            cvar_penalty: 0.0,
            scenario_penalty: 0.0,
            total: f64::NEG_INFINITY,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.total.is_finite()
    }

    pub fn with_scenario_penalty(mut self, penalty: f64) -> Self {
        self.scenario_penalty = penalty;
        self.total = self.base - self.volatility_penalty - self.cvar_penalty - penalty;
        self
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ScoringEngine {
    w_pnl: f64,
    w_sharpe: f64,
    w_drawdown: f64,
    cvar_weight: f64,
    volatility_penalty_factor: f64,
    p95_range_pct: f64,
}

impl ScoringEngine {
    pub fn new(config: &OptimizerConfig, p95_range_pct: f64) -> Self {
        let (w_pnl, w_sharpe, w_drawdown) = config.weights.normalized();
        Self {
            w_pnl,
            w_sharpe,
            w_drawdown,
            cvar_weight: config.cvar_weight(),
            volatility_penalty_factor: config.volatility_penalty_factor.max(0.0),
            p95_range_pct,
        }
    }

    pub fn combine(long: &BacktestResult, short: &BacktestResult) -> CombinedMetrics {
        let clamp = |s: f64| s.clamp(-SHARPE_CLAMP, SHARPE_CLAMP);
        let gross_profit = long.gross_profit + short.gross_profit;
        let gross_loss = long.gross_loss + short.gross_loss;
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            INFINITE_PROFIT_FACTOR
        } else {
            0.0
        };

        let exits = long.total_exits() + short.total_exits();
        let trades = long.total_trades + short.total_trades;

        CombinedMetrics {
            pnl: long.total_pnl + short.total_pnl,
            sharpe: (clamp(long.sharpe_ratio) + clamp(short.sharpe_ratio)) / 2.0,
            max_drawdown: long.max_drawdown.max(short.max_drawdown),
            profit_factor,
            stop_rate: if exits > 0 {
                (long.sl_exits + short.sl_exits) as f64 / exits as f64
            } else {
                0.0
            },
            win_rate: if trades > 0 {
                (long.wins + short.wins) as f64 / trades as f64
            } else {
                0.0
            },
            cvar: long.cvar.min(short.cvar),
            trades,
        }
    }

    /// Checks that need no simulation
    pub fn check_static(params: &ParameterSet) -> Result<(), RejectionReason> {
        if !params.is_liquidation_safe() {
            return Err(RejectionReason::LiquidationSafety);
        }
        if !params.meets_risk_reward(MIN_RISK_REWARD) {
            return Err(RejectionReason::RiskReward);
        }
        Ok(())
    }

    /// First failing filter for a long/short pair, in a fixed order
    pub fn check_feasibility(
        long: &ParameterSet,
        short: &ParameterSet,
        combined: &CombinedMetrics,
    ) -> Result<(), RejectionReason> {
        Self::check_static(long)?;
        Self::check_static(short)?;
        if combined.profit_factor < MIN_PROFIT_FACTOR {
            return Err(RejectionReason::ProfitFactor);
        }
        if combined.stop_rate > MAX_STOP_RATE {
            return Err(RejectionReason::StopRate);
        }
        let required = long.required_win_rate().max(short.required_win_rate());
        if required > combined.win_rate - WIN_RATE_MARGIN {
            return Err(RejectionReason::WinRateMargin);
        }
        Ok(())
    }

    /// Weighted score minus volatility and CVaR penalties.
    /// `committed_margin` is the margin both sides can have deployed at once.
    pub fn score(&self, combined: &CombinedMetrics, committed_margin: f64) -> ScoreBreakdown {
        let pnl_score = combined.pnl;
        let sharpe_score = combined.sharpe;
        let drawdown_score = combined.pnl / (combined.max_drawdown + 1.0);
        let base =
            pnl_score * self.w_pnl + sharpe_score * self.w_sharpe + drawdown_score * self.w_drawdown;

        let volatility_penalty = self.volatility_penalty(combined, committed_margin);
        let cvar_penalty = combined.cvar.abs() * self.cvar_weight;

        ScoreBreakdown {
            pnl_score,
            sharpe_score,
            drawdown_score,
            base,
            volatility_penalty,
            cvar_penalty,
            scenario_penalty: 0.0,
            total: base - volatility_penalty - cvar_penalty,
        }
    }

    fn volatility_penalty(&self, combined: &CombinedMetrics, committed_margin: f64) -> f64 {
        if committed_margin <= 0.0 {
            return 0.0;
        }
        let range_excess = ((self.p95_range_pct - RANGE_BASELINE_PCT) / RANGE_BASELINE_PCT).max(0.0);
        let drawdown_excess =
            (combined.max_drawdown / committed_margin - DRAWDOWN_MARGIN_BASELINE).max(0.0);
        range_excess
            * drawdown_excess
            * combined.pnl.max(committed_margin)
            * 0.1
            * self.volatility_penalty_factor
    }

    /// Filter then score. Non-finite scores are rejections.
    pub fn evaluate(
        &self,
        long: &ParameterSet,
        short: &ParameterSet,
        long_result: &BacktestResult,
        short_result: &BacktestResult,
    ) -> Result<ScoreBreakdown, RejectionReason> {
        let combined = Self::combine(long_result, short_result);
        Self::check_feasibility(long, short, &combined)?;
        let score = self.score(&combined, committed_margin(long, short));
        if !score.is_finite() {
            return Err(RejectionReason::NonFiniteScore);
        }
        Ok(score)
    }
}

pub fn committed_margin(long: &ParameterSet, short: &ParameterSet) -> f64 {
    long.trade_size * long.max_positions as f64 + short.trade_size * short.max_positions as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionSide;

    fn make_params(side: PositionSide, leverage: u32, tp: f64, sl: f64) -> ParameterSet {
        ParameterSet {
            side,
            threshold: 5000.0,
            max_positions: 2,
            trade_size: 50.0,
            leverage,
            tp_percent: tp,
            sl_percent: sl,
            cooldown_ms: 0,
            hunter_cooldown_ms: 0,
            window_ms: 60_000,
        }
    }

    fn make_result(pnl: f64, wins: u32, losses: u32, sl_exits: u32) -> BacktestResult {
        let mut r = BacktestResult::empty();
        r.total_trades = wins + losses;
        r.wins = wins;
        r.losses = losses;
        r.total_pnl = pnl;
        r.gross_profit = wins as f64 * 10.0;
        r.gross_loss = losses as f64 * 4.0;
        r.win_rate = if wins + losses > 0 {
            wins as f64 / (wins + losses) as f64 * 100.0
        } else {
            0.0
        };
        r.sl_exits = sl_exits;
        r.tp_exits = wins + losses - sl_exits;
        r.sharpe_ratio = 8.0;
        r.max_drawdown = 12.0;
        r.cvar = -4.0;
        r
    }

    #[test]
    fn test_liquidation_safety_rejection() {
        let long = make_params(PositionSide::Long, 25, 10.0, 5.0);
        let short = make_params(PositionSide::Short, 10, 1.0, 0.5);
        let good = make_result(50.0, 8, 2, 2);
        let engine = ScoringEngine::new(&OptimizerConfig::default(), 2.0);
        assert_eq!(
            engine.evaluate(&long, &short, &good, &good),
            Err(RejectionReason::LiquidationSafety)
        );
    }

    #[test]
    fn test_filters_in_order() {
        let long = make_params(PositionSide::Long, 10, 1.0, 0.5);
        let short = make_params(PositionSide::Short, 10, 1.0, 0.5);

        let rr = make_params(PositionSide::Short, 10, 0.1, 0.5);
        assert_eq!(
            ScoringEngine::check_static(&rr),
            Err(RejectionReason::RiskReward)
        );

        // 2 wins * 10 vs 8 losses * 4 -> PF 0.625
        let losing = make_result(-12.0, 2, 8, 2);
        let combined = ScoringEngine::combine(&losing, &losing);
        assert_eq!(
            ScoringEngine::check_feasibility(&long, &short, &combined),
            Err(RejectionReason::ProfitFactor)
        );

        // PF 50/12 passes, 7 of 8 exits are stops
        let stoppy = make_result(20.0, 5, 3, 7);
        let combined = ScoringEngine::combine(&stoppy, &stoppy);
        assert_eq!(
            ScoringEngine::check_feasibility(&long, &short, &combined),
            Err(RejectionReason::StopRate)
        );

        // required 1/3 vs observed 0.35 - 0.05
        let thin = make_result(30.0, 7, 13, 5);
        let combined = ScoringEngine::combine(&thin, &thin);
        assert_eq!(
            ScoringEngine::check_feasibility(&long, &short, &combined),
            Err(RejectionReason::WinRateMargin)
        );

        let good = make_result(50.0, 8, 2, 2);
        let combined = ScoringEngine::combine(&good, &good);
        assert_eq!(ScoringEngine::check_feasibility(&long, &short, &combined), Ok(()));
    }

    #[test]
    fn test_combine_pairs_sides() {
        let mut long = make_result(30.0, 3, 1, 1);
        let short = make_result(-10.0, 1, 3, 3);
        long.cvar = -9.0;
        long.max_drawdown = 20.0;
        let c = ScoringEngine::combine(&long, &short);
        assert_eq!(c.pnl, 20.0);
        // both sharpe values clamp to 5
        assert_eq!(c.sharpe, 5.0);
        assert_eq!(c.max_drawdown, 20.0);
        assert_eq!(c.cvar, -9.0);
        assert_eq!(c.win_rate, 0.5);
        assert_eq!(c.stop_rate, 0.5);
        assert!((c.profit_factor - 40.0 / 16.0).abs() < 1e-12);

        let empty = ScoringEngine::combine(&BacktestResult::empty(), &BacktestResult::empty());
        assert_eq!(empty.profit_factor, 0.0);
        assert_eq!(empty.stop_rate, 0.0);
    }

    #[test]
    fn test_weighted_score() {
        let config = OptimizerConfig {
            cvar_weight: 0.0,
            ..Default::default()
        };
        let engine = ScoringEngine::new(&config, 2.0);
        let combined = CombinedMetrics {
            pnl: 100.0,
            sharpe: 2.0,
            max_drawdown: 9.0,
            profit_factor: 2.0,
            stop_rate: 0.2,
            win_rate: 0.6,
            cvar: -5.0,
            trades: 10,
        };
        let score = engine.score(&combined, 200.0);
        // 100*0.5 + 2*0.3 + 10*0.2
        assert!((score.total - 52.6).abs() < 1e-9);
        assert_eq!(score.volatility_penalty, 0.0);

        let with_cvar = ScoringEngine::new(&OptimizerConfig::default(), 2.0).score(&combined, 200.0);
        assert!((with_cvar.cvar_penalty - 0.75).abs() < 1e-12);
        assert!((score.total - with_cvar.total - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_penalty() {
        let engine = ScoringEngine::new(&OptimizerConfig::default(), 8.0);
        let combined = CombinedMetrics {
            pnl: 50.0,
            sharpe: 1.0,
            max_drawdown: 150.0,
            profit_factor: 2.0,
            stop_rate: 0.2,
            win_rate: 0.6,
            cvar: 0.0,
            trades: 10,
        };
        // range excess 1, dd excess 1.5 - 0.75, scale max(50, 100) * 0.1
        let score = engine.score(&combined, 100.0);
        assert!((score.volatility_penalty - 7.5).abs() < 1e-9);

        let calm = ScoringEngine::new(&OptimizerConfig::default(), 3.0).score(&combined, 100.0);
        assert_eq!(calm.volatility_penalty, 0.0);
    }

    #[test]
    fn test_scenario_penalty_recomputes_total() {
        let engine = ScoringEngine::new(&OptimizerConfig::default(), 2.0);
        let combined = ScoringEngine::combine(
            &make_result(50.0, 8, 2, 2),
            &make_result(50.0, 8, 2, 2),
        );
        let score = engine.score(&combined, 200.0);
        let penalized = score.with_scenario_penalty(10.0);
        assert!((score.total - penalized.total - 10.0).abs() < 1e-9);
        assert!(!ScoreBreakdown::rejected().is_finite());
    }

    #[test]
    fn test_rejection_reason_serializes_camel_case() {
        let json = serde_json::to_string(&RejectionReason::LiquidationSafety).unwrap();
        assert_eq!(json, "\"liquidationSafety\"");
        assert_eq!(RejectionReason::DcaDepth.to_string(), "dcaDepth");
    }
}
