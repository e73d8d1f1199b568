//! Report types written at the end of a run
//!
//! Every number leaving the engine is a `Decimal` rounded to a fixed
//! precision, so a serialized report reads back unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::candidates::CandidateCounts;
use crate::config::SearchMode;
use crate::scenario::StressReport;
use crate::scoring::RejectionReason;
use crate::search::SearchStage;
use crate::types::{BacktestResult, ParameterSet, PositionSide};

// ============================================================================
// Rounding
// ============================================================================

/// f64 to Decimal at `dp` places; non-finite values become zero
pub fn to_decimal(value: f64, dp: usize) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_str_exact(&format!("{:.*}", dp, value)).unwrap_or(Decimal::ZERO)
}

pub fn money(value: f64) -> Decimal {
    to_decimal(value, 2)
}

pub fn ratio(value: f64) -> Decimal {
    to_decimal(value, 4)
}

/// Thresholds are reported to the nearest 10
pub fn threshold(value: f64) -> Decimal {
    to_decimal((value / 10.0).round() * 10.0, 0)
}

fn score(value: f64) -> Option<Decimal> {
    value.is_finite().then(|| ratio(value))
}

// ============================================================================
// Per-symbol types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedParams {
    pub side: PositionSide,
    pub threshold: Decimal,
    pub max_positions: u32,
    pub trade_size: Decimal,
    pub leverage: u32,
    pub tp_percent: Decimal,
    pub sl_percent: Decimal,
    pub cooldown_ms: i64,
    pub hunter_cooldown_ms: i64,
    pub window_ms: i64,
}

impl From<&ParameterSet> for RecommendedParams {
    fn from(p: &ParameterSet) -> Self {
        Self {
            side: p.side,
            threshold: threshold(p.threshold),
            max_positions: p.max_positions,
            trade_size: money(p.trade_size),
            leverage: p.leverage,
            tp_percent: to_decimal(p.tp_percent, 2),
            sl_percent: to_decimal(p.sl_percent, 2),
            cooldown_ms: p.cooldown_ms,
            hunter_cooldown_ms: p.hunter_cooldown_ms,
            window_ms: p.window_ms,
        }
    }
}

impl RecommendedParams {
    /// Back to simulator parameters, e.g. to feed the next run
    pub fn to_params(&self) -> ParameterSet {
        ParameterSet {
            side: self.side,
            threshold: self.threshold.to_f64().unwrap_or(0.0),
            max_positions: self.max_positions,
            trade_size: self.trade_size.to_f64().unwrap_or(0.0),
            leverage: self.leverage,
            tp_percent: self.tp_percent.to_f64().unwrap_or(0.0),
            sl_percent: self.sl_percent.to_f64().unwrap_or(0.0),
            cooldown_ms: self.cooldown_ms,
            hunter_cooldown_ms: self.hunter_cooldown_ms,
            window_ms: self.window_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: Decimal,
    pub total_commission: Decimal,
    pub win_rate: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub avg_duration_ms: i64,
    pub sharpe_ratio: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_percent: Decimal,
    pub profit_factor: Decimal,
    pub cvar: Decimal,
    pub payoff_ratio: Decimal,
    pub tp_exits: u32,
    pub sl_exits: u32,
    pub eod_exits: u32,
}

impl From<&BacktestResult> for ResultSummary {
    fn from(r: &BacktestResult) -> Self {
        Self {
            total_trades: r.total_trades,
            wins: r.wins,
            losses: r.losses,
            total_pnl: money(r.total_pnl),
            total_commission: money(r.total_commission),
            win_rate: money(r.win_rate),
            avg_win: money(r.avg_win),
            avg_loss: money(r.avg_loss),
            avg_duration_ms: r.avg_duration_ms.round() as i64,
            sharpe_ratio: ratio(r.sharpe_ratio),
            max_drawdown: money(r.max_drawdown),
            max_drawdown_percent: money(r.max_drawdown_percent),
            profit_factor: ratio(r.profit_factor),
            cvar: money(r.cvar),
            payoff_ratio: ratio(r.payoff_ratio),
            tp_exits: r.tp_exits,
            sl_exits: r.sl_exits,
            eod_exits: r.eod_exits,
        }
    }
}

/// Current and optimized configuration of one side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideReport {
    pub current: RecommendedParams,
    pub current_result: ResultSummary,
    pub optimized: RecommendedParams,
    pub optimized_result: ResultSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Improvement {
    pub pnl: Decimal,
    pub daily_pnl: Decimal,
    /// Percentage points
    pub win_rate: Decimal,
    pub sharpe: Decimal,
    /// Positive when drawdown shrank
    pub drawdown: Decimal,
    pub score: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub name: String,
    pub combined_pnl: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub candidate_counts: CandidateCounts,
    pub rejections: BTreeMap<RejectionReason, u64>,
    pub combinations_evaluated: u64,
    pub combinations_accepted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub duration_ms: u64,
    pub stage: Option<SearchStage>,
    pub scenarios: Vec<ScenarioSummary>,
    pub scenario_penalty: Decimal,
    pub degradations: Vec<String>,
    pub data_digest: String,
}

impl Diagnostics {
    pub fn set_stress(&mut self, report: &StressReport) {
        self.scenarios = report
            .outcomes
            .iter()
            .map(|o| ScenarioSummary {
                name: o.name.clone(),
                combined_pnl: money(o.combined_pnl),
            })
            .collect();
        self.scenario_penalty = money(report.penalty);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRecommendation {
    pub symbol: String,
    pub long: Option<SideReport>,
    pub short: Option<SideReport>,
    pub current_score: Option<Decimal>,
    pub optimized_score: Option<Decimal>,
    pub current_daily_pnl: Decimal,
    pub optimized_daily_pnl: Decimal,
    pub span_days: Decimal,
    pub improvement: Improvement,
    /// True when the optimized set differs from the live one
    pub changed: bool,
    pub tier_warning: Option<String>,
    /// Why the symbol produced no recommendation
    pub skipped: Option<String>,
    pub diagnostics: Option<Diagnostics>,
}

impl SymbolRecommendation {
    /// Zero-effect entry for a symbol that could not be optimized
    pub fn skipped(symbol: &str, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            long: None,
            short: None,
            current_score: None,
            optimized_score: None,
            current_daily_pnl: Decimal::ZERO,
            optimized_daily_pnl: Decimal::ZERO,
            span_days: Decimal::ZERO,
            improvement: Improvement::default(),
            changed: false,
            tier_warning: None,
            skipped: Some(reason.into()),
            diagnostics: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    pub(crate) fn with_score(value: f64) -> Option<Decimal> {
        score(value)
    }
}

// ============================================================================
// Portfolio
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub symbols: usize,
    pub optimized_symbols: usize,
    pub skipped_symbols: usize,
    pub current_daily_pnl: Decimal,
    pub optimized_daily_pnl: Decimal,
    pub daily_improvement: Decimal,
    /// One slot per symbol: a hedged long+short pair counts once
    pub recommended_max_open_positions: u32,
    pub deployable_capital: Decimal,
    pub allocated_margin: Decimal,
    pub target_utilization: Decimal,
    /// Allocated margin over deployable capital
    pub utilization: Decimal,
    pub overallocated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: SearchMode,
    pub seed: u64,
    pub cancelled: bool,
    pub recommendations: Vec<SymbolRecommendation>,
    pub summary: PortfolioSummary,
}

impl OptimizationReport {
    pub fn recommendation(&self, symbol: &str) -> Option<&SymbolRecommendation> {
        self.recommendations.iter().find(|r| r.symbol == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_params() -> ParameterSet {
        ParameterSet {
            side: PositionSide::Short,
            threshold: 12_345.6,
            max_positions: 3,
            trade_size: 21.456,
            leverage: 13,
            tp_percent: 1.23456,
            sl_percent: 0.6789,
            cooldown_ms: 30_000,
            hunter_cooldown_ms: 5_000,
            window_ms: 60_000,
        }
    }

    #[test]
    fn test_rounding_rules() {
        let params = RecommendedParams::from(&make_params());
        assert_eq!(params.threshold, dec!(12350));
        assert_eq!(params.trade_size, dec!(21.46));
        assert_eq!(params.tp_percent, dec!(1.23));
        assert_eq!(params.sl_percent, dec!(0.68));
        assert_eq!(to_decimal(f64::NAN, 2), Decimal::ZERO);
        assert_eq!(ratio(0.123456), dec!(0.1235));
    }

    #[test]
    fn test_params_round_trip_through_simulator_types() {
        let params = RecommendedParams::from(&make_params());
        let back = RecommendedParams::from(&params.to_params());
        assert_eq!(params, back);
    }

    #[test]
    fn test_recommendation_json_round_trip() {
        let params = RecommendedParams::from(&make_params());
        let mut result = BacktestResult::empty();
        result.total_trades = 7;
        result.total_pnl = 12.3456;
        result.sharpe_ratio = 0.87654;
        result.cvar = -3.333;
        let side = SideReport {
            current: params.clone(),
            current_result: ResultSummary::from(&result),
            optimized: params,
            optimized_result: ResultSummary::from(&result),
        };

        let mut diagnostics = Diagnostics::default();
        diagnostics
            .rejections
            .insert(RejectionReason::LiquidationSafety, 4);
        diagnostics.stage = Some(SearchStage::Done);

        let rec = SymbolRecommendation {
            symbol: "ETHUSDT".to_string(),
            long: Some(side.clone()),
            short: Some(side),
            current_score: Some(dec!(1.2345)),
            optimized_score: None,
            current_daily_pnl: dec!(3.21),
            optimized_daily_pnl: dec!(4.56),
            span_days: dec!(7.00),
            improvement: Improvement::default(),
            changed: true,
            tier_warning: Some("tier".to_string()),
            skipped: None,
            diagnostics: Some(diagnostics),
        };

        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"liquidationSafety\":4"));
        let back: SymbolRecommendation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
        assert_eq!(
            back.long.as_ref().map(|s| s.current_result.total_pnl),
            Some(dec!(12.35))
        );
    }

    #[test]
    fn test_skipped_recommendation() {
        let rec = SymbolRecommendation::skipped("XRPUSDT", "no liquidation history");
        assert!(rec.is_skipped());
        assert_eq!(rec.optimized_daily_pnl, Decimal::ZERO);
        assert!(!rec.changed);
    }
}
