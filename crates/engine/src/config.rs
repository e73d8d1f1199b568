//! Optimizer configuration
//!
//! Every field has a default so a partial JSON document deserializes into a
//! usable config.

use serde::{Deserialize, Serialize};

use crate::error::{TunerError, TunerResult};

/// How broad the candidate search is
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Quick,
    Thorough,
}

impl SearchMode {
    pub fn is_thorough(self) -> bool {
        matches!(self, SearchMode::Thorough)
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMode::Quick => write!(f, "quick"),
            SearchMode::Thorough => write!(f, "thorough"),
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(SearchMode::Quick),
            "thorough" => Ok(SearchMode::Thorough),
            other => Err(TunerError::InvalidConfig(format!("unknown mode '{other}'"))),
        }
    }
}

/// Relative weights of the three score components, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub pnl: f64,
    pub sharpe: f64,
    pub drawdown: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            pnl: 50.0,
            sharpe: 30.0,
            drawdown: 20.0,
        }
    }
}

impl ScoringWeights {
    /// Weights as fractions summing to 1. Negative entries count as zero;
    /// an all-zero set falls back to the defaults.
    pub fn normalized(&self) -> (f64, f64, f64) {
        let pnl = self.pnl.max(0.0);
        let sharpe = self.sharpe.max(0.0);
        let drawdown = self.drawdown.max(0.0);
        let total = pnl + sharpe + drawdown;
        if !total.is_finite() || total <= 0.0 {
            return Self::default().normalized();
        }
        (pnl / total, sharpe / total, drawdown / total)
    }
}

/// Order fill assumptions. Scenario profiles override these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillModel {
    /// Probability that a limit entry fills at all
    pub limit_fill_rate: f64,
    /// Fraction of fills that fall back to a market order
    pub market_fallback_rate: f64,
    /// Scales every slippage figure
    pub slippage_multiplier: f64,
}

impl Default for FillModel {
    fn default() -> Self {
        Self {
            limit_fill_rate: 0.85,
            market_fallback_rate: 0.10,
            slippage_multiplier: 1.0,
        }
    }
}

impl FillModel {
    /// Every entry fills as a limit order, no slippage scaling
    pub fn perfect() -> Self {
        Self {
            limit_fill_rate: 1.0,
            market_fallback_rate: 0.0,
            slippage_multiplier: 1.0,
        }
    }
}

/// Slippage percentages applied against the position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlippageModel {
    pub tp_pct: f64,
    pub sl_pct: f64,
    pub sl_high_vol_pct: f64,
    /// Volatility factor above which `sl_high_vol_pct` applies
    pub high_vol_factor: f64,
    pub market_entry_pct: f64,
}

impl Default for SlippageModel {
    fn default() -> Self {
        Self {
            tp_pct: 0.10,
            sl_pct: 0.50,
            sl_high_vol_pct: 0.80,
            high_vol_factor: 1.5,
            market_entry_pct: 0.10,
        }
    }
}

/// Maker/taker commission blend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeModel {
    pub maker_rate: f64,
    pub taker_rate: f64,
    /// Share of entry volume filled as maker
    pub entry_maker_share: f64,
    /// Average number of fills per order, approximates chunking
    pub avg_fills_per_trade: f64,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self {
            maker_rate: 0.0002,
            taker_rate: 0.0004,
            entry_maker_share: 0.9,
            avg_fills_per_trade: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapitalConfig {
    /// Deployable capital across all symbols (quote)
    pub total_capital: f64,
    /// Share of deployable capital the portfolio may allocate
    pub target_utilization: f64,
    /// Exchange minimum order notional
    pub min_notional: f64,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            total_capital: 1000.0,
            target_utilization: 0.8,
            min_notional: 5.0,
        }
    }
}

impl CapitalConfig {
    /// Margin budget available to one side of one symbol
    pub fn per_side_budget(&self, symbol_count: usize) -> f64 {
        let symbols = symbol_count.max(1) as f64;
        self.total_capital * self.target_utilization / symbols / 2.0
    }
}

/// Settings the simulator needs for every run
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationSettings {
    pub slippage: SlippageModel,
    pub fees: FeeModel,
    pub time_range: Option<(i64, i64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub mode: SearchMode,
    pub weights: ScoringWeights,
    pub min_threshold_percentile: f64,
    pub cvar_weight: f64,
    pub scenario_weight: f64,
    pub volatility_penalty_factor: f64,
    pub fill: FillModel,
    pub slippage: SlippageModel,
    pub fees: FeeModel,
    pub capital: CapitalConfig,
    pub max_dca_positions: u32,
    pub price_bar_interval: String,
    pub price_bar_count: usize,
    pub time_range: Option<(i64, i64)>,
    pub seed: Option<u64>,
    pub diagnostics: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::Quick,
            weights: ScoringWeights::default(),
            min_threshold_percentile: 35.0,
            cvar_weight: 0.15,
            scenario_weight: 0.5,
            volatility_penalty_factor: 1.0,
            fill: FillModel::default(),
            slippage: SlippageModel::default(),
            fees: FeeModel::default(),
            capital: CapitalConfig::default(),
            max_dca_positions: 5,
            price_bar_interval: "1m".to_string(),
            price_bar_count: 10_080,
            time_range: None,
            seed: None,
            diagnostics: false,
        }
    }
}

impl OptimizerConfig {
    pub fn min_threshold_percentile(&self) -> f64 {
        self.min_threshold_percentile.clamp(15.0, 60.0)
    }

    pub fn cvar_weight(&self) -> f64 {
        self.cvar_weight.clamp(0.0, 1.0)
    }

    pub fn scenario_weight(&self) -> f64 {
        self.scenario_weight.clamp(0.0, 2.0)
    }

    pub fn simulation_settings(&self) -> SimulationSettings {
        SimulationSettings {
            slippage: self.slippage,
            fees: self.fees,
            time_range: self.time_range,
        }
    }

    pub fn validate(&self) -> TunerResult<()> {
        let unit = |name: &str, v: f64| -> TunerResult<()> {
            if !(0.0..=1.0).contains(&v) {
                return Err(TunerError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {v}"
                )));
            }
            Ok(())
        };

        if self.capital.total_capital.is_nan() || self.capital.total_capital <= 0.0 {
            return Err(TunerError::InvalidConfig(
                "capital.total_capital must be positive".to_string(),
            ));
        }
        unit("capital.target_utilization", self.capital.target_utilization)?;
        unit("fill.limit_fill_rate", self.fill.limit_fill_rate)?;
        unit("fill.market_fallback_rate", self.fill.market_fallback_rate)?;
        unit("fees.entry_maker_share", self.fees.entry_maker_share)?;
        if self.fill.slippage_multiplier < 0.0 {
            return Err(TunerError::InvalidConfig(
                "fill.slippage_multiplier must not be negative".to_string(),
            ));
        }
        if self.price_bar_count == 0 {
            return Err(TunerError::InvalidConfig(
                "price_bar_count must be positive".to_string(),
            ));
        }
        if self.max_dca_positions == 0 {
            return Err(TunerError::InvalidConfig(
                "max_dca_positions must be at least 1".to_string(),
            ));
        }
        if let Some((start, end)) = self.time_range {
            if start >= end {
                return Err(TunerError::InvalidConfig(format!(
                    "time_range start {start} must precede end {end}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_normalize() {
        let (p, s, d) = ScoringWeights::default().normalized();
        assert!((p - 0.5).abs() < 1e-12);
        assert!((s - 0.3).abs() < 1e-12);
        assert!((d - 0.2).abs() < 1e-12);

        let zero = ScoringWeights {
            pnl: 0.0,
            sharpe: 0.0,
            drawdown: 0.0,
        };
        assert_eq!(zero.normalized(), ScoringWeights::default().normalized());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: OptimizerConfig =
            serde_json::from_str(r#"{"mode":"thorough","cvar_weight":3.0}"#).unwrap();
        assert_eq!(config.mode, SearchMode::Thorough);
        assert_eq!(config.cvar_weight(), 1.0);
        assert_eq!(config.max_dca_positions, 5);
        assert_eq!(config.fill.limit_fill_rate, 0.85);
    }

    #[test]
    fn test_min_percentile_clamped() {
        let config = OptimizerConfig {
            min_threshold_percentile: 90.0,
            ..Default::default()
        };
        assert_eq!(config.min_threshold_percentile(), 60.0);
    }

    #[test]
    fn test_validate_rejects_bad_rates() {
        let mut config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        config.fill.limit_fill_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("THOROUGH".parse::<SearchMode>().unwrap(), SearchMode::Thorough);
        assert!("fast".parse::<SearchMode>().is_err());
    }
}
