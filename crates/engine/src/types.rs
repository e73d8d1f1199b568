//! Core domain types for the liquidation-hunter tuner

use serde::{Deserialize, Serialize};

/// Side of a liquidation order as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LiquidationSide {
    Buy,
    Sell,
}

/// Direction of a hunter position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Liquidation side that feeds this hunter side.
    ///
    /// SELL liquidations (longs being force-sold) push price down and are
    /// bought by the long hunter; BUY liquidations feed the short hunter.
    pub fn trigger_side(self) -> LiquidationSide {
        match self {
            PositionSide::Long => LiquidationSide::Sell,
            PositionSide::Short => LiquidationSide::Buy,
        }
    }

    pub fn is_long(self) -> bool {
        matches!(self, PositionSide::Long)
    }
}

impl LiquidationSide {
    pub fn hunter_side(self) -> PositionSide {
        match self {
            LiquidationSide::Sell => PositionSide::Long,
            LiquidationSide::Buy => PositionSide::Short,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// A single historical liquidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub symbol: String,
    pub side: LiquidationSide,
    /// Event time in epoch milliseconds
    pub timestamp: i64,
    /// Liquidated notional in quote currency
    pub volume: f64,
    pub price: f64,
}

/// A one-minute OHLCV candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl PriceBar {
    /// Degenerate bar used when only a single price is known
    pub fn flat(timestamp: i64, price: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// High, falling back to close when the feed left it empty
    pub fn high_or_close(&self) -> f64 {
        if self.high.is_finite() && self.high > 0.0 {
            self.high.max(self.close)
        } else {
            self.close
        }
    }

    /// Low, falling back to close when the feed left it empty
    pub fn low_or_close(&self) -> f64 {
        if self.low.is_finite() && self.low > 0.0 {
            self.low.min(self.close)
        } else {
            self.close
        }
    }

    /// Bar range as a percentage of close
    pub fn range_pct(&self) -> f64 {
        if self.close <= 0.0 {
            return 0.0;
        }
        (self.high_or_close() - self.low_or_close()) / self.close * 100.0
    }
}

/// One exchange leverage tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeverageBracket {
    pub notional_floor: f64,
    pub notional_cap: f64,
    pub initial_leverage: u32,
}

/// Every tunable knob of one hunter side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub side: PositionSide,
    /// Rolling liquidation volume (quote) required to enter
    pub threshold: f64,
    pub max_positions: u32,
    /// Margin per entry in quote currency
    pub trade_size: f64,
    pub leverage: u32,
    pub tp_percent: f64,
    pub sl_percent: f64,
    pub cooldown_ms: i64,
    pub hunter_cooldown_ms: i64,
    pub window_ms: i64,
}

impl ParameterSet {
    /// Stop distance must stay below 90% of the move that liquidates the position
    pub fn is_liquidation_safe(&self) -> bool {
        if self.leverage == 0 {
            return false;
        }
        self.sl_percent < (100.0 / self.leverage as f64) * 0.9
    }

    pub fn risk_reward(&self) -> f64 {
        if self.sl_percent <= 0.0 {
            return 0.0;
        }
        self.tp_percent / self.sl_percent
    }

    pub fn meets_risk_reward(&self, minimum: f64) -> bool {
        self.risk_reward() >= minimum
    }

    /// Break-even win rate (fraction) implied by the TP/SL distances
    pub fn required_win_rate(&self) -> f64 {
        let total = self.tp_percent + self.sl_percent;
        if total <= 0.0 {
            return 1.0;
        }
        self.sl_percent / total
    }
}

/// Live configuration of one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub long: ParameterSet,
    pub short: ParameterSet,
}

impl SymbolConfig {
    pub fn side(&self, side: PositionSide) -> &ParameterSet {
        match side {
            PositionSide::Long => &self.long,
            PositionSide::Short => &self.short,
        }
    }
}

/// Why a simulated position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitReason {
    Tp,
    Sl,
    Eod,
}

/// A closed simulated trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub side: PositionSide,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    /// TP/SL level (or final close) the exit was triggered at
    pub trigger_price: f64,
    pub size_units: f64,
    pub gross_pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,
    pub exit_reason: ExitReason,
    pub duration_ms: i64,
    /// Absolute distance between trigger and realised exit price
    pub slippage: f64,
    pub market_entry: bool,
    pub volatility_factor: Option<f64>,
}

/// Outcome of one simulator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    /// Net of commission
    pub total_pnl: f64,
    pub gross_pnl: f64,
    pub total_commission: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub avg_duration_ms: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub profit_factor: f64,
    pub cvar: f64,
    pub payoff_ratio: f64,
    pub tp_exits: u32,
    pub sl_exits: u32,
    pub eod_exits: u32,
    pub unfilled_entries: u32,
    pub market_entries: u32,
    pub span_ms: i64,
    pub recent_trades: Vec<CompletedTrade>,
}

impl BacktestResult {
    /// Zero-valued result for a side with no history
    pub fn empty() -> Self {
        Self {
            total_trades: 0,
            wins: 0,
            losses: 0,
            total_pnl: 0.0,
            gross_pnl: 0.0,
            total_commission: 0.0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            win_rate: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            avg_duration_ms: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            max_drawdown_percent: 0.0,
            profit_factor: 0.0,
            cvar: 0.0,
            payoff_ratio: 0.0,
            tp_exits: 0,
            sl_exits: 0,
            eod_exits: 0,
            unfilled_entries: 0,
            market_entries: 0,
            span_ms: 0,
            recent_trades: Vec::new(),
        }
    }

    pub fn total_exits(&self) -> u32 {
        self.tp_exits + self.sl_exits + self.eod_exits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(leverage: u32, tp: f64, sl: f64) -> ParameterSet {
        ParameterSet {
            side: PositionSide::Long,
            threshold: 5000.0,
            max_positions: 3,
            trade_size: 20.0,
            leverage,
            tp_percent: tp,
            sl_percent: sl,
            cooldown_ms: 0,
            hunter_cooldown_ms: 0,
            window_ms: 60_000,
        }
    }

    #[test]
    fn test_liquidation_safety() {
        // 0.5 < (100/10)*0.9 = 9
        assert!(params(10, 1.0, 0.5).is_liquidation_safe());
        // 5 < (100/25)*0.9 = 3.6 fails
        assert!(!params(25, 10.0, 5.0).is_liquidation_safe());
    }

    #[test]
    fn test_required_win_rate() {
        let p = params(10, 1.0, 0.5);
        assert!((p.required_win_rate() - 1.0 / 3.0).abs() < 1e-12);
        assert!(p.meets_risk_reward(0.33));
        assert!(!params(10, 0.1, 1.0).meets_risk_reward(0.33));
    }

    #[test]
    fn test_trigger_side_mapping() {
        assert_eq!(PositionSide::Long.trigger_side(), LiquidationSide::Sell);
        assert_eq!(LiquidationSide::Buy.hunter_side(), PositionSide::Short);
    }

    #[test]
    fn test_bar_fallbacks() {
        let bar = PriceBar {
            timestamp: 0,
            open: 100.0,
            high: 0.0,
            low: f64::NAN,
            close: 101.0,
            volume: 0.0,
        };
        assert_eq!(bar.high_or_close(), 101.0);
        assert_eq!(bar.low_or_close(), 101.0);
        assert_eq!(bar.range_pct(), 0.0);
    }
}
