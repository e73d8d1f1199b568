//! Event-driven liquidation hunter simulator
//!
//! Replays one side's trigger events against the symbol's price bars.
//! Fills, market fallbacks and the same-bar TP/SL race are drawn from the
//! RNG passed to [`TradeSimulator::run`], so a seeded RNG reproduces a run
//! exactly.

use rand::Rng;
use tracing::trace;

use crate::config::{FillModel, SimulationSettings};
use crate::data::SymbolData;
use crate::fees;
use crate::risk::{LedgerSummary, RiskMetrics};
use crate::types::{
    BacktestResult, CompletedTrade, ExitReason, LiquidationEvent, ParameterSet, PositionSide,
    PriceBar,
};

/// Chance that, when one bar touches both TP and SL, the level nearer to
/// entry was reached first. A heuristic for intrabar path order, not a
/// measured figure.
pub const NEAR_TARGET_FIRST_PROBABILITY: f64 = 0.7;

/// Trades kept in [`BacktestResult::recent_trades`]
pub const RECENT_TRADES: usize = 10;

/// Position state during simulation
struct OpenPosition {
    entry_time: i64,
    entry_price: f64,
    tp_price: f64,
    sl_price: f64,
    size_units: f64,
    is_long: bool,
    market_entry: bool,
}

impl OpenPosition {
    fn pnl_at(&self, price: f64) -> f64 {
        if self.is_long {
            (price - self.entry_price) * self.size_units
        } else {
            (self.entry_price - price) * self.size_units
        }
    }

    /// Move `price` against the position by `pct` percent
    fn worsen(&self, price: f64, pct: f64) -> f64 {
        if self.is_long {
            price * (1.0 - pct / 100.0)
        } else {
            price * (1.0 + pct / 100.0)
        }
    }

    fn touches(&self, bar: &PriceBar) -> (bool, bool) {
        let high = bar.high_or_close();
        let low = bar.low_or_close();
        if self.is_long {
            (high >= self.tp_price, low <= self.sl_price)
        } else {
            (low <= self.tp_price, high >= self.sl_price)
        }
    }
}

/// Replay state of one side
struct SideReplay<'e> {
    params: &'e ParameterSet,
    events: &'e [LiquidationEvent],
    /// Next event to feed
    next: usize,
    window_start: usize,
    window_volume: f64,
    last_entry: Option<i64>,
    open: Vec<OpenPosition>,
    ledger: Vec<CompletedTrade>,
    unfilled_entries: u32,
    market_entries: u32,
}

impl<'e> SideReplay<'e> {
    fn new(params: &'e ParameterSet, events: &'e [LiquidationEvent]) -> Self {
        Self {
            params,
            events,
            next: 0,
            window_start: 0,
            window_volume: 0.0,
            last_entry: None,
            open: Vec::new(),
            ledger: Vec::new(),
            unfilled_entries: 0,
            market_entries: 0,
        }
    }

    fn peek(&self) -> Option<i64> {
        self.events.get(self.next).map(|e| e.timestamp)
    }
}

/// Replays history for one symbol
pub struct TradeSimulator<'a> {
    data: &'a SymbolData,
    settings: SimulationSettings,
}

impl<'a> TradeSimulator<'a> {
    pub fn new(data: &'a SymbolData, settings: SimulationSettings) -> Self {
        Self { data, settings }
    }

    /// Simulate one side under one parameter set.
    ///
    /// A side without trigger events yields [`BacktestResult::empty`]. The
    /// hunter cooldown only sees this side's entries; use
    /// [`TradeSimulator::run_pair`] when the other side trades too.
    pub fn run<R: Rng + ?Sized>(
        &self,
        params: &ParameterSet,
        fill: &FillModel,
        rng: &mut R,
    ) -> BacktestResult {
        let events = self.events_in_range(params.side);
        if events.is_empty() {
            return BacktestResult::empty();
        }
        self.replay(vec![SideReplay::new(params, events)], fill, rng)
            .pop()
            .unwrap_or_else(BacktestResult::empty)
    }

    /// Simulate both sides of one hunter on a single clock. An entry on
    /// either side restarts the hunter cooldown of both.
    pub fn run_pair<R: Rng + ?Sized>(
        &self,
        long: &ParameterSet,
        short: &ParameterSet,
        fill: &FillModel,
        rng: &mut R,
    ) -> (BacktestResult, BacktestResult) {
        let sides = vec![
            SideReplay::new(long, self.events_in_range(long.side)),
            SideReplay::new(short, self.events_in_range(short.side)),
        ];
        let mut results = self.replay(sides, fill, rng).into_iter();
        let long_result = results.next().unwrap_or_else(BacktestResult::empty);
        let short_result = results.next().unwrap_or_else(BacktestResult::empty);
        (long_result, short_result)
    }

    fn replay<R: Rng + ?Sized>(
        &self,
        mut sides: Vec<SideReplay<'_>>,
        fill: &FillModel,
        rng: &mut R,
    ) -> Vec<BacktestResult> {
        let fallback_bars: Vec<PriceBar>;
        let fallback_factors: Vec<f64>;
        let (bars, factors) = match self.bar_range() {
            Some(range) => (
                &self.data.bars()[range.clone()],
                self.data.vol_factors().get(range).unwrap_or(&[]),
            ),
            None => {
                let mut merged: Vec<&LiquidationEvent> =
                    sides.iter().flat_map(|s| s.events.iter()).collect();
                merged.sort_by_key(|e| e.timestamp);
                fallback_bars = merged
                    .iter()
                    .map(|e| PriceBar::flat(e.timestamp, e.price))
                    .collect();
                fallback_factors = vec![1.0; fallback_bars.len()];
                (&fallback_bars[..], &fallback_factors[..])
            }
        };

        let mult = fill.slippage_multiplier.max(0.0);
        let mut bar_idx = 0usize;
        let mut last_entry_any: Option<i64> = None;

        // Earliest pending event first; ties go to the side listed first
        while let Some((timestamp, s)) = sides
            .iter()
            .enumerate()
            .filter_map(|(s, side)| side.peek().map(|ts| (ts, s)))
            .min()
        {
            // Exits first: every bar that opened at or before this event
            while bar_idx < bars.len() && bars[bar_idx].timestamp <= timestamp {
                let factor = factors.get(bar_idx).copied().unwrap_or(1.0);
                for side in sides.iter_mut() {
                    self.check_exits(side, &bars[bar_idx], factor, mult, rng);
                }
                bar_idx += 1;
            }

            let side = &mut sides[s];
            let i = side.next;
            side.next += 1;
            if self.try_enter(side, i, last_entry_any, fill, mult, rng) {
                last_entry_any = Some(timestamp);
            }
        }

        while bar_idx < bars.len() {
            let factor = factors.get(bar_idx).copied().unwrap_or(1.0);
            for side in sides.iter_mut() {
                self.check_exits(side, &bars[bar_idx], factor, mult, rng);
            }
            bar_idx += 1;
        }

        sides
            .into_iter()
            .map(|side| self.settle(side, bars))
            .collect()
    }

    /// Feed event `i` into the side's rolling window and open a position
    /// when every gate passes. Returns whether a position opened.
    fn try_enter<R: Rng + ?Sized>(
        &self,
        side: &mut SideReplay<'_>,
        i: usize,
        last_entry_any: Option<i64>,
        fill: &FillModel,
        mult: f64,
        rng: &mut R,
    ) -> bool {
        let events = side.events;
        let params = side.params;
        let event = &events[i];

        side.window_volume += event.volume;
        while side.window_start < i
            && events[side.window_start].timestamp < event.timestamp - params.window_ms
        {
            side.window_volume -= events[side.window_start].volume;
            side.window_start += 1;
        }

        if side.window_volume < params.threshold || side.open.len() >= params.max_positions as usize
        {
            return false;
        }
        let cooling =
            |last: Option<i64>, cooldown: i64| last.is_some_and(|t| event.timestamp - t < cooldown);
        if cooling(side.last_entry, params.cooldown_ms)
            || cooling(last_entry_any, params.hunter_cooldown_ms)
        {
            return false;
        }

        if rng.gen::<f64>() >= fill.limit_fill_rate {
            side.unfilled_entries += 1;
            return false;
        }
        let market_entry = rng.gen::<f64>() < fill.market_fallback_rate;
        let is_long = params.side.is_long();

        let entry_price = if market_entry {
            side.market_entries += 1;
            let pct = self.settings.slippage.market_entry_pct * mult / 100.0;
            if is_long {
                event.price * (1.0 + pct)
            } else {
                event.price * (1.0 - pct)
            }
        } else {
            event.price
        };

        let (tp_price, sl_price) = if is_long {
            (
                entry_price * (1.0 + params.tp_percent / 100.0),
                entry_price * (1.0 - params.sl_percent / 100.0),
            )
        } else {
            (
                entry_price * (1.0 - params.tp_percent / 100.0),
                entry_price * (1.0 + params.sl_percent / 100.0),
            )
        };

        side.open.push(OpenPosition {
            entry_time: event.timestamp,
            entry_price,
            tp_price,
            sl_price,
            size_units: params.trade_size * params.leverage as f64 / entry_price,
            is_long,
            market_entry,
        });
        side.last_entry = Some(event.timestamp);
        true
    }

    /// Close what is still open at the last bar and summarize the ledger
    fn settle(&self, mut side: SideReplay<'_>, bars: &[PriceBar]) -> BacktestResult {
        let events = side.events;
        if events.is_empty() {
            return BacktestResult::empty();
        }
        let params = side.params;

        if let Some(last_bar) = bars.last() {
            for pos in side.open.drain(..) {
                side.ledger.push(self.close(
                    &pos,
                    params.side,
                    last_bar.timestamp,
                    last_bar.close,
                    last_bar.close,
                    ExitReason::Eod,
                    None,
                ));
            }
        }

        let first_ts = events[0].timestamp.min(bars.first().map_or(i64::MAX, |b| b.timestamp));
        let last_ts = events[events.len() - 1]
            .timestamp
            .max(bars.last().map_or(i64::MIN, |b| b.timestamp));

        let result = summarize(
            side.ledger,
            side.unfilled_entries,
            side.market_entries,
            last_ts - first_ts,
        );
        trace!(
            symbol = self.data.symbol(),
            side = %params.side,
            threshold = params.threshold,
            trades = result.total_trades,
            pnl = result.total_pnl,
            "Simulation complete"
        );
        result
    }

    fn events_in_range(&self, side: PositionSide) -> &'a [LiquidationEvent] {
        let events = self.data.triggers(side);
        match self.settings.time_range {
            Some((start, end)) => {
                let lo = events.partition_point(|e| e.timestamp < start);
                let hi = events.partition_point(|e| e.timestamp <= end);
                &events[lo..hi.max(lo)]
            }
            None => events,
        }
    }

    /// Index range of bars inside the time range, `None` when empty
    fn bar_range(&self) -> Option<std::ops::Range<usize>> {
        let bars = self.data.bars();
        let range = match self.settings.time_range {
            Some((start, end)) => {
                let lo = bars.partition_point(|b| b.timestamp < start);
                let hi = bars.partition_point(|b| b.timestamp <= end);
                lo..hi.max(lo)
            }
            None => 0..bars.len(),
        };
        (!range.is_empty()).then_some(range)
    }

    fn check_exits<R: Rng + ?Sized>(
        &self,
        side: &mut SideReplay<'_>,
        bar: &PriceBar,
        vol_factor: f64,
        mult: f64,
        rng: &mut R,
    ) {
        if side.open.is_empty() {
            return;
        }
        let params = side.params;
        let slip = self.settings.slippage;
        let sl_slip = if vol_factor > slip.high_vol_factor {
            slip.sl_high_vol_pct
        } else {
            slip.sl_pct
        } * mult;
        let tp_slip = slip.tp_pct * mult;
        let tp_nearer = params.tp_percent <= params.sl_percent;

        let mut still_open = Vec::with_capacity(side.open.len());
        for pos in side.open.drain(..) {
            let reason = match pos.touches(bar) {
                (true, true) => {
                    let nearer_first = rng.gen::<f64>() < NEAR_TARGET_FIRST_PROBABILITY;
                    if nearer_first == tp_nearer {
                        ExitReason::Tp
                    } else {
                        ExitReason::Sl
                    }
                }
                (true, false) => ExitReason::Tp,
                (false, true) => ExitReason::Sl,
                (false, false) => {
                    still_open.push(pos);
                    continue;
                }
            };

            let (trigger, exit) = match reason {
                ExitReason::Tp => (pos.tp_price, pos.worsen(pos.tp_price, tp_slip)),
                _ => (pos.sl_price, pos.worsen(pos.sl_price, sl_slip)),
            };
            side.ledger.push(self.close(
                &pos,
                params.side,
                bar.timestamp,
                trigger,
                exit,
                reason,
                Some(vol_factor),
            ));
        }
        side.open = still_open;
    }

    #[allow(clippy::too_many_arguments)]
    fn close(
        &self,
        pos: &OpenPosition,
        side: PositionSide,
        exit_time: i64,
        trigger_price: f64,
        exit_price: f64,
        reason: ExitReason,
        volatility_factor: Option<f64>,
    ) -> CompletedTrade {
        let gross_pnl = pos.pnl_at(exit_price);
        let commission = fees::commission(
            pos.entry_price * pos.size_units,
            exit_price * pos.size_units,
            reason,
            &self.settings.fees,
        );
        CompletedTrade {
            side,
            entry_time: pos.entry_time,
            exit_time,
            entry_price: pos.entry_price,
            exit_price,
            trigger_price,
            size_units: pos.size_units,
            gross_pnl,
            commission,
            net_pnl: gross_pnl - commission,
            exit_reason: reason,
            duration_ms: (exit_time - pos.entry_time).max(0),
            slippage: (exit_price - trigger_price).abs(),
            market_entry: pos.market_entry,
            volatility_factor,
        }
    }
}

fn summarize(
    ledger: Vec<CompletedTrade>,
    unfilled_entries: u32,
    market_entries: u32,
    span_ms: i64,
) -> BacktestResult {
    let pnls: Vec<f64> = ledger.iter().map(|t| t.net_pnl).collect();
    let summary = LedgerSummary::from_pnls(&pnls);
    let risk = RiskMetrics::from_pnls(&pnls);

    let count = |reason: ExitReason| ledger.iter().filter(|t| t.exit_reason == reason).count() as u32;
    let avg_duration_ms = if ledger.is_empty() {
        0.0
    } else {
        ledger.iter().map(|t| t.duration_ms as f64).sum::<f64>() / ledger.len() as f64
    };

    BacktestResult {
        total_trades: summary.total_trades,
        wins: summary.wins,
        losses: summary.losses,
        total_pnl: summary.total_pnl,
        gross_pnl: ledger.iter().map(|t| t.gross_pnl).sum(),
        total_commission: ledger.iter().map(|t| t.commission).sum(),
        gross_profit: summary.gross_profit,
        gross_loss: summary.gross_loss,
        win_rate: summary.win_rate,
        avg_win: summary.avg_win,
        avg_loss: summary.avg_loss,
        avg_duration_ms,
        sharpe_ratio: risk.sharpe_ratio,
        max_drawdown: risk.max_drawdown,
        max_drawdown_percent: risk.max_drawdown_percent,
        profit_factor: risk.profit_factor,
        cvar: risk.cvar,
        payoff_ratio: risk.payoff_ratio,
        tp_exits: count(ExitReason::Tp),
        sl_exits: count(ExitReason::Sl),
        eod_exits: count(ExitReason::Eod),
        unfilled_entries,
        market_entries,
        span_ms: span_ms.max(0),
        recent_trades: ledger[ledger.len().saturating_sub(RECENT_TRADES)..].to_vec(),
    }
}
