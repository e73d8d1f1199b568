//! Futures commission model
//!
//! Entries are a maker/taker blend (most hunter entries rest as limit
//! orders), TP/SL exits pay taker, end-of-data exits pay maker.
//! Formula: fee = (entry_notional × entry_rate + exit_notional × exit_rate) × avg_fills

use crate::config::FeeModel;
use crate::types::ExitReason;

impl FeeModel {
    /// Blended rate charged on entry notional
    pub fn entry_rate(&self) -> f64 {
        let share = self.entry_maker_share.clamp(0.0, 1.0);
        share * self.maker_rate + (1.0 - share) * self.taker_rate
    }

    /// Rate charged on exit notional
    pub fn exit_rate(&self, reason: ExitReason) -> f64 {
        match reason {
            ExitReason::Tp | ExitReason::Sl => self.taker_rate,
            ExitReason::Eod => self.maker_rate,
        }
    }
}

/// Round-trip commission for one position.
///
/// Returns 0 for non-positive notionals.
pub fn commission(
    entry_notional: f64,
    exit_notional: f64,
    reason: ExitReason,
    fees: &FeeModel,
) -> f64 {
    if entry_notional <= 0.0 || exit_notional <= 0.0 {
        return 0.0;
    }
    let raw = entry_notional * fees.entry_rate() + exit_notional * fees.exit_rate(reason);
    raw * fees.avg_fills_per_trade.max(1.0)
}
