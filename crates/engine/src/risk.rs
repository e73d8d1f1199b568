//! Risk metrics over a trade ledger
//!
//! Every function is total: empty or single-trade ledgers produce zeros
//! instead of NaN.

use serde::{Deserialize, Serialize};

use crate::stats;

/// Reported when there are wins but no losses
pub const INFINITE_PROFIT_FACTOR: f64 = 999.99;

/// Share of trades that make up the CVaR tail
pub const CVAR_TAIL: f64 = 0.05;

/// Headline counts of a ledger
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    /// Percentage, 0-100
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
}

impl LedgerSummary {
    pub fn from_pnls(pnls: &[f64]) -> Self {
        let total_trades = pnls.len() as u32;
        let wins = pnls.iter().filter(|p| **p > 0.0).count() as u32;
        let losses = total_trades - wins;
        let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
        let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();

        Self {
            total_trades,
            wins,
            losses,
            total_pnl: pnls.iter().sum(),
            gross_profit,
            gross_loss,
            win_rate: if total_trades > 0 {
                wins as f64 / total_trades as f64 * 100.0
            } else {
                0.0
            },
            avg_win: if wins > 0 { gross_profit / wins as f64 } else { 0.0 },
            avg_loss: if losses > 0 {
                gross_loss / losses as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub profit_factor: f64,
    pub cvar: f64,
    pub payoff_ratio: f64,
}

impl RiskMetrics {
    /// Metrics for trade PnLs in ledger order
    pub fn from_pnls(pnls: &[f64]) -> Self {
        let (max_drawdown, max_drawdown_percent) = max_drawdown(pnls);
        Self {
            sharpe_ratio: sharpe_ratio(pnls),
            max_drawdown,
            max_drawdown_percent,
            profit_factor: profit_factor(pnls),
            cvar: cvar(pnls),
            payoff_ratio: payoff_ratio(pnls),
        }
    }
}

/// Mean over sample standard deviation of per-trade PnL
pub fn sharpe_ratio(pnls: &[f64]) -> f64 {
    let sd = stats::std_dev(pnls);
    if sd < 1e-12 {
        return 0.0;
    }
    stats::mean(pnls) / sd
}

/// Largest peak-to-trough fall of cumulative PnL, absolute and as a
/// percentage of the peak it fell from (0 when that peak is not positive).
pub fn max_drawdown(pnls: &[f64]) -> (f64, f64) {
    let mut cumulative = 0.0;
    let mut peak = 0.0f64;
    let mut max_dd = 0.0;
    let mut max_dd_pct = 0.0;

    for pnl in pnls {
        cumulative += pnl;
        if cumulative > peak {
            peak = cumulative;
        }
        let dd = peak - cumulative;
        if dd > max_dd {
            max_dd = dd;
            max_dd_pct = if peak > 0.0 { dd / peak * 100.0 } else { 0.0 };
        }
    }
    (max_dd, max_dd_pct)
}

/// Gross wins over gross losses
pub fn profit_factor(pnls: &[f64]) -> f64 {
    let wins: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let losses: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
    if losses > 0.0 {
        wins / losses
    } else if wins > 0.0 {
        INFINITE_PROFIT_FACTOR
    } else {
        0.0
    }
}

/// Same formula as [`profit_factor`]; callers frame it per position rather
/// than per trade.
pub fn payoff_ratio(pnls: &[f64]) -> f64 {
    profit_factor(pnls)
}

/// Mean of the worst 5% of trades (at least one), signed
pub fn cvar(pnls: &[f64]) -> f64 {
    if pnls.is_empty() {
        return 0.0;
    }
    let mut sorted = pnls.to_vec();
    sorted.sort_by(f64::total_cmp);
    let tail = ((sorted.len() as f64 * CVAR_TAIL).floor() as usize).max(1);
    stats::mean(&sorted[..tail])
}
