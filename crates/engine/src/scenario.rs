//! Fixed fill/slippage stress profiles for the winning candidate

use serde::{Deserialize, Serialize};

use crate::config::FillModel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioProfile {
    pub name: &'static str,
    pub slippage_multiplier: f64,
    pub limit_fill_rate: f64,
    pub market_fallback_rate: f64,
}

impl ScenarioProfile {
    pub fn fill_model(&self) -> FillModel {
        FillModel {
            limit_fill_rate: self.limit_fill_rate,
            market_fallback_rate: self.market_fallback_rate,
            slippage_multiplier: self.slippage_multiplier,
        }
    }
}

/// Wide slippage, poor fills, frequent market fallbacks
pub const STRESS_HIGH: ScenarioProfile = ScenarioProfile {
    name: "stress_high",
    slippage_multiplier: 1.6,
    limit_fill_rate: 0.60,
    market_fallback_rate: 0.22,
};

pub const CALM: ScenarioProfile = ScenarioProfile {
    name: "calm",
    slippage_multiplier: 0.75,
    limit_fill_rate: 0.92,
    market_fallback_rate: 0.05,
};

pub const PROFILES: [ScenarioProfile; 2] = [STRESS_HIGH, CALM];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub combined_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressReport {
    pub baseline_pnl: f64,
    pub outcomes: Vec<ScenarioOutcome>,
    pub worst_pnl: f64,
    pub penalty: f64,
}

/// Re-run a candidate under every profile.
///
/// `simulate` returns the combined long+short PnL under a fill model. The
/// penalty is the shortfall of the worst profile against `baseline_pnl`,
/// times `weight`; it is never negative.
pub fn stress_test<F>(baseline_pnl: f64, weight: f64, mut simulate: F) -> StressReport
where
    F: FnMut(&FillModel) -> f64,
{
    let outcomes: Vec<ScenarioOutcome> = PROFILES
        .iter()
        .map(|profile| ScenarioOutcome {
            name: profile.name.to_string(),
            combined_pnl: simulate(&profile.fill_model()),
        })
        .collect();

    let worst_pnl = outcomes
        .iter()
        .map(|o| o.combined_pnl)
        .fold(f64::INFINITY, f64::min);
    let shortfall = (baseline_pnl - worst_pnl).max(0.0);
    let penalty = if shortfall.is_finite() {
        shortfall * weight
    } else {
        0.0
    };

    StressReport {
        baseline_pnl,
        outcomes,
        worst_pnl,
        penalty,
    }
}
