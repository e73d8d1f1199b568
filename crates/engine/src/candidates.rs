//! Candidate values for every tunable parameter
//!
//! Each generator mixes fixed anchors, statistics of the symbol's history
//! and the live configuration, then downsamples deterministically. Every
//! generator returns at least one value.

use serde::{Deserialize, Serialize};

use crate::config::{OptimizerConfig, SearchMode};
use crate::data::SymbolData;
use crate::stats;
use crate::types::{PositionSide, SymbolConfig};

// ============================================================================
// Constants
// ============================================================================

/// Threshold used when a side has neither history nor a live value
pub const FALLBACK_THRESHOLD: f64 = 5000.0;
/// Threshold percentile floor in thorough mode
pub const THOROUGH_MIN_PERCENTILE: f64 = 5.0;

pub const TP_BOUNDS: (f64, f64) = (0.1, 30.0);
pub const SL_BOUNDS: (f64, f64) = (0.1, 40.0);
pub const MAX_LEVERAGE: u32 = 25;

const TP_LADDER: [f64; 8] = [0.3, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0];
const SL_LADDER: [f64; 8] = [0.3, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0];
const CURRENT_MULTIPLES: [f64; 5] = [0.5, 0.75, 1.25, 1.5, 2.0];
const MARGIN_MULTIPLES: [f64; 7] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 3.0];

const DEFAULT_WINDOWS_MS: [i64; 4] = [30_000, 60_000, 120_000, 300_000];
const DEFAULT_COOLDOWNS_MS: [i64; 4] = [0, 30_000, 60_000, 300_000];
const MIN_WINDOW_MS: i64 = 1_000;
const MAX_TIMER_MS: i64 = 3_600_000;

const ATR_PERIOD: usize = 14;

/// Per-dimension caps applied in quick mode
#[derive(Debug, Clone, Copy)]
struct Caps {
    thresholds: usize,
    tp: usize,
    sl: usize,
    leverage: usize,
    margin: usize,
    windows: usize,
    cooldowns: usize,
}

/// Quick mode cuts TP/SL lists longer than this to their extremes before
/// applying the caps
const PRUNE_ABOVE: usize = 10;
const PRUNE_PER_END: usize = 5;

const QUICK_CAPS: Caps = Caps {
    thresholds: 10,
    tp: 8,
    sl: 8,
    leverage: 5,
    margin: 6,
    windows: 5,
    cooldowns: 5,
};

// ============================================================================
// Candidate Set
// ============================================================================

/// All candidate values for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSet {
    pub long_thresholds: Vec<f64>,
    pub short_thresholds: Vec<f64>,
    pub tp: Vec<f64>,
    pub sl: Vec<f64>,
    pub leverage: Vec<u32>,
    pub margin: Vec<f64>,
    pub windows: Vec<i64>,
    pub cooldowns: Vec<i64>,
}

impl CandidateSet {
    pub fn thresholds(&self, side: PositionSide) -> &[f64] {
        match side {
            PositionSide::Long => &self.long_thresholds,
            PositionSide::Short => &self.short_thresholds,
        }
    }

    pub fn counts(&self) -> CandidateCounts {
        CandidateCounts {
            long_thresholds: self.long_thresholds.len(),
            short_thresholds: self.short_thresholds.len(),
            tp: self.tp.len(),
            sl: self.sl.len(),
            leverage: self.leverage.len(),
            margin: self.margin.len(),
            windows: self.windows.len(),
            cooldowns: self.cooldowns.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateCounts {
    pub long_thresholds: usize,
    pub short_thresholds: usize,
    pub tp: usize,
    pub sl: usize,
    pub leverage: usize,
    pub margin: usize,
    pub windows: usize,
    pub cooldowns: usize,
}

// ============================================================================
// Generator
// ============================================================================

pub struct CandidateGenerator<'a> {
    data: &'a SymbolData,
    current: &'a SymbolConfig,
    config: &'a OptimizerConfig,
    symbol_count: usize,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(
        data: &'a SymbolData,
        current: &'a SymbolConfig,
        config: &'a OptimizerConfig,
        symbol_count: usize,
    ) -> Self {
        Self {
            data,
            current,
            config,
            symbol_count: symbol_count.max(1),
        }
    }

    fn caps(&self) -> Option<Caps> {
        match self.config.mode {
            SearchMode::Quick => Some(QUICK_CAPS),
            SearchMode::Thorough => None,
        }
    }

    fn floor_percentile(&self) -> f64 {
        match self.config.mode {
            SearchMode::Quick => self.config.min_threshold_percentile(),
            SearchMode::Thorough => THOROUGH_MIN_PERCENTILE,
        }
    }

    /// Volume thresholds for one side, skewed towards the low tail.
    ///
    /// Quick mode drops candidates below the configured percentile floor.
    pub fn thresholds(&self, side: PositionSide) -> Vec<f64> {
        let current = self.current.side(side).threshold;
        let volumes: Vec<f64> = self
            .data
            .triggers(side)
            .iter()
            .map(|e| e.volume)
            .filter(|v| v.is_finite() && *v > 0.0)
            .collect();

        if volumes.is_empty() {
            return vec![fallback_threshold(current)];
        }

        let mut sorted = volumes;
        sorted.sort_by(f64::total_cmp);

        let lo = self.floor_percentile();
        let min_allowed = stats::percentile_sorted(&sorted, lo);
        let points = threshold_percentiles(sorted.len(), lo);

        let mut values: Vec<f64> = points
            .iter()
            .map(|p| stats::round_to(stats::percentile_sorted(&sorted, *p), 10.0))
            .filter(|v| *v > 0.0)
            .collect();
        if current > 0.0 {
            values.push(stats::round_to(current, 10.0));
        }

        let enforce_floor = !self.config.mode.is_thorough();
        if enforce_floor {
            values.retain(|v| *v >= min_allowed - 5.0);
        }

        let anchors: Vec<f64> = if current > 0.0 && (!enforce_floor || current >= min_allowed) {
            vec![stats::round_to(current, 10.0)]
        } else {
            Vec::new()
        };
        let values = stats::sorted_unique(values, 1e-9);
        let values = downsample(values, self.caps().map(|c| c.thresholds), &anchors);

        if values.is_empty() {
            vec![stats::round_to(min_allowed.max(10.0), 10.0)]
        } else {
            values
        }
    }

    /// Percent moves observed in hourly returns and ATR
    fn data_moves(&self) -> Vec<f64> {
        let hourly = self.data.hourly_bars();
        let returns = stats::abs_returns_pct(&hourly);
        let atr = stats::atr_pct_series(&hourly, ATR_PERIOD);

        let mut moves = Vec::new();
        if !returns.is_empty() {
            moves.push(stats::mean(&returns));
            moves.push(stats::percentile(&returns, 90.0));
            moves.push(stats::percentile(&returns, 95.0));
        }
        if let Some(last) = atr.last() {
            moves.push(*last);
            moves.push(stats::percentile(&atr, 50.0));
            moves.push(stats::percentile(&atr, 90.0));
            moves.push(atr.iter().copied().fold(f64::MIN, f64::max));
        }
        moves.retain(|m| m.is_finite() && *m > 0.0);
        moves
    }

    fn percent_candidates(
        &self,
        currents: [f64; 2],
        ladder: &[f64],
        bounds: (f64, f64),
        cap: Option<usize>,
    ) -> Vec<f64> {
        let mut values: Vec<f64> = ladder.to_vec();
        for current in currents.iter().filter(|c| **c > 0.0) {
            values.push(*current);
            values.extend(CURRENT_MULTIPLES.iter().map(|m| current * m));
        }
        values.extend(self.data_moves());

        let bounded: Vec<f64> = values
            .into_iter()
            .filter(|v| v.is_finite())
            .map(|v| stats::round_dp(v.clamp(bounds.0, bounds.1), 2))
            .collect();
        let anchors: Vec<f64> = currents
            .iter()
            .filter(|c| **c > 0.0)
            .map(|c| stats::round_dp(c.clamp(bounds.0, bounds.1), 2))
            .collect();

        let mut values = stats::sorted_unique(bounded, 1e-9);
        if !self.config.mode.is_thorough() && values.len() > PRUNE_ABOVE {
            values = prune_extremes(&values, PRUNE_PER_END);
            values.extend(anchors.iter().copied());
            values = stats::sorted_unique(values, 1e-9);
        }

        let values = downsample(values, cap, &anchors);
        if values.is_empty() {
            vec![bounds.0]
        } else {
            values
        }
    }

    pub fn tp_candidates(&self) -> Vec<f64> {
        self.percent_candidates(
            [self.current.long.tp_percent, self.current.short.tp_percent],
            &TP_LADDER,
            TP_BOUNDS,
            self.caps().map(|c| c.tp),
        )
    }

    pub fn sl_candidates(&self) -> Vec<f64> {
        self.percent_candidates(
            [self.current.long.sl_percent, self.current.short.sl_percent],
            &SL_LADDER,
            SL_BOUNDS,
            self.caps().map(|c| c.sl),
        )
    }

    /// Live leverage plus the 5..=25 ladder, bounded by the tier maximum
    pub fn leverage_candidates(&self) -> Vec<u32> {
        let ceiling = MAX_LEVERAGE.min(self.data.max_tier_leverage()).max(1);
        let mut values: Vec<f64> = (0..9)
            .map(|i| (5.0 + 2.5 * i as f64).round())
            .collect();
        let currents: Vec<f64> = [self.current.long.leverage, self.current.short.leverage]
            .iter()
            .filter(|l| **l > 0)
            .map(|l| (*l).min(ceiling) as f64)
            .collect();
        values.extend(currents.iter().copied());
        values.retain(|v| *v >= 1.0 && *v <= ceiling as f64);

        let values = downsample(
            stats::sorted_unique(values, 0.5),
            self.caps().map(|c| c.leverage),
            &currents,
        );
        if values.is_empty() {
            vec![ceiling]
        } else {
            values.into_iter().map(|v| v as u32).collect()
        }
    }

    /// Margin per entry, bounded to [minimum order margin, per-side budget]
    pub fn margin_candidates(&self, leverages: &[u32]) -> Vec<f64> {
        let budget = self.config.capital.per_side_budget(self.symbol_count);
        let lowest_leverage = leverages.iter().copied().min().unwrap_or(1).max(1);
        let min_margin = stats::round_dp(
            self.config.capital.min_notional / lowest_leverage as f64,
            2,
        );
        let depth = self.data.min_dca_depth(self.config.max_dca_positions);
        let budget_base = budget / depth as f64;

        let currents: Vec<f64> = [self.current.long.trade_size, self.current.short.trade_size]
            .into_iter()
            .filter(|m| m.is_finite() && *m > 0.0)
            .collect();

        let mut values = vec![min_margin, budget_base * 0.5, budget_base];
        for current in &currents {
            values.extend(MARGIN_MULTIPLES.iter().map(|m| current * m));
        }

        let (lo, hi) = if budget >= min_margin {
            (min_margin, budget)
        } else {
            (min_margin, min_margin)
        };
        let bounded: Vec<f64> = values
            .into_iter()
            .filter(|v| v.is_finite())
            .map(|v| stats::round_dp(v.clamp(lo, hi), 2))
            .collect();
        let anchors: Vec<f64> = currents
            .iter()
            .map(|c| stats::round_dp(c.clamp(lo, hi), 2))
            .collect();

        let values = downsample(
            stats::sorted_unique(bounded, 0.005),
            self.caps().map(|c| c.margin),
            &anchors,
        );
        if values.is_empty() {
            vec![lo]
        } else {
            values
        }
    }

    /// Rolling-window lengths derived from the gaps between liquidations
    pub fn window_candidates(&self) -> Vec<i64> {
        let gaps = stats::inter_event_gaps(self.data.event_times());
        let mut values: Vec<f64> = DEFAULT_WINDOWS_MS.iter().map(|v| *v as f64).collect();
        if !gaps.is_empty() {
            for p in [50.0, 75.0, 90.0] {
                values.push(stats::percentile(&gaps, p));
            }
            let mean_gap = stats::mean(&gaps);
            values.extend([mean_gap, mean_gap * 2.0, mean_gap * 4.0]);
        }
        let currents = [self.current.long.window_ms, self.current.short.window_ms];
        values.extend(currents.iter().filter(|w| **w > 0).map(|w| *w as f64));

        timer_candidates(
            values,
            MIN_WINDOW_MS,
            &currents,
            self.caps().map(|c| c.windows),
        )
    }

    /// Per-side cooldowns; the longest window scales a few of them
    pub fn cooldown_candidates(&self, windows: &[i64]) -> Vec<i64> {
        let gaps = stats::inter_event_gaps(self.data.event_times());
        let mut values: Vec<f64> = DEFAULT_COOLDOWNS_MS.iter().map(|v| *v as f64).collect();
        if !gaps.is_empty() {
            for p in [25.0, 50.0, 75.0] {
                values.push(stats::percentile(&gaps, p));
            }
        }
        if let Some(max_window) = windows.iter().max() {
            let w = *max_window as f64;
            values.extend([w * 0.5, w, w * 2.0]);
        }
        let currents = [self.current.long.cooldown_ms, self.current.short.cooldown_ms];
        values.extend(currents.iter().filter(|c| **c >= 0).map(|c| *c as f64));

        timer_candidates(values, 0, &currents, self.caps().map(|c| c.cooldowns))
    }

    pub fn all(&self) -> CandidateSet {
        let leverage = self.leverage_candidates();
        let margin = self.margin_candidates(&leverage);
        let windows = self.window_candidates();
        let cooldowns = self.cooldown_candidates(&windows);
        CandidateSet {
            long_thresholds: self.thresholds(PositionSide::Long),
            short_thresholds: self.thresholds(PositionSide::Short),
            tp: self.tp_candidates(),
            sl: self.sl_candidates(),
            leverage,
            margin,
            windows,
            cooldowns,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fallback_threshold(current: f64) -> f64 {
    if current.is_finite() && current > 0.0 {
        stats::round_to(current, 10.0)
    } else {
        FALLBACK_THRESHOLD
    }
}

/// Percentile points between `lo` and 99, denser near `lo`.
/// More samples buy more points, from 6 up to 24.
pub fn threshold_percentiles(samples: usize, lo: f64) -> Vec<f64> {
    let n = samples.max(1) as f64;
    let k = (6.0 + 2.0 * n.log2()).clamp(6.0, 24.0) as usize;
    (0..k)
        .map(|i| {
            let t = i as f64 / (k - 1) as f64;
            lo + (99.0 - lo) * (10f64.powf(t) - 1.0) / 9.0
        })
        .collect()
}

/// Clamp, round to whole seconds, dedupe, cap
fn timer_candidates(values: Vec<f64>, min_ms: i64, anchors: &[i64], cap: Option<usize>) -> Vec<i64> {
    let round = |v: f64| stats::round_to(v.clamp(min_ms as f64, MAX_TIMER_MS as f64), 1000.0);
    let bounded: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).map(round).collect();
    let anchors: Vec<f64> = anchors
        .iter()
        .filter(|a| **a >= min_ms)
        .map(|a| round(*a as f64))
        .collect();
    let values = downsample(stats::sorted_unique(bounded, 0.5), cap, &anchors);
    if values.is_empty() {
        vec![min_ms.max(0)]
    } else {
        values.into_iter().map(|v| v as i64).collect()
    }
}

/// Even-stride downsampling that always keeps `anchors` present in
/// `values`. Output stays sorted; `None` keeps everything.
fn downsample(values: Vec<f64>, cap: Option<usize>, anchors: &[f64]) -> Vec<f64> {
    let Some(cap) = cap else {
        return values;
    };
    if values.len() <= cap {
        return values;
    }
    let is_anchor = |v: &f64| anchors.iter().any(|a| (a - v).abs() < 1e-9);
    let kept: Vec<f64> = values.iter().copied().filter(is_anchor).collect();
    let rest: Vec<f64> = values.iter().copied().filter(|v| !is_anchor(v)).collect();

    let slots = cap.saturating_sub(kept.len()).max(1);
    let mut out = kept;
    out.extend(stats::even_stride_sample(&rest, slots));
    stats::sorted_unique(out, 1e-9)
}

/// Keep the `per_end` lowest and highest values of a list
pub fn prune_extremes(values: &[f64], per_end: usize) -> Vec<f64> {
    if values.len() <= per_end * 2 {
        return values.to_vec();
    }
    let mut out = values[..per_end].to_vec();
    out.extend_from_slice(&values[values.len() - per_end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LiquidationEvent, LiquidationSide, ParameterSet, PriceBar};

    fn make_params(side: PositionSide) -> ParameterSet {
        ParameterSet {
            side,
            threshold: 5000.0,
            max_positions: 3,
            trade_size: 20.0,
            leverage: 10,
            tp_percent: 1.0,
            sl_percent: 0.5,
            cooldown_ms: 30_000,
            hunter_cooldown_ms: 0,
            window_ms: 60_000,
        }
    }

    fn make_current() -> SymbolConfig {
        SymbolConfig {
            symbol: "BTCUSDT".to_string(),
            long: make_params(PositionSide::Long),
            short: make_params(PositionSide::Short),
        }
    }

    fn make_data(volumes: &[f64]) -> SymbolData {
        let events: Vec<LiquidationEvent> = volumes
            .iter()
            .enumerate()
            .map(|(i, v)| LiquidationEvent {
                symbol: "BTCUSDT".to_string(),
                side: if i % 2 == 0 {
                    LiquidationSide::Sell
                } else {
                    LiquidationSide::Buy
                },
                timestamp: i as i64 * 45_000,
                volume: *v,
                price: 100.0,
            })
            .collect();
        let bars: Vec<PriceBar> = (0..600)
            .map(|i| {
                let c = 100.0 + (i as f64 * 0.1).sin();
                PriceBar {
                    timestamp: i * 60_000,
                    open: c,
                    high: c * 1.002,
                    low: c * 0.998,
                    close: c,
                    volume: 1.0,
                }
            })
            .collect();
        SymbolData::new("BTCUSDT", events, bars, Vec::new())
    }

    #[test]
    fn test_threshold_percentiles_skew_low() {
        let points = threshold_percentiles(1, 35.0);
        assert_eq!(points.len(), 6);
        assert_eq!(points[0], 35.0);
        assert!((points[5] - 99.0).abs() < 1e-9);
        // spacing widens towards the top
        assert!(points[1] - points[0] < points[5] - points[4]);
        assert_eq!(threshold_percentiles(1 << 20, 5.0).len(), 24);
    }

    #[test]
    fn test_empty_history_falls_back() {
        let data = SymbolData::new("BTCUSDT", Vec::new(), Vec::new(), Vec::new());
        let current = make_current();
        let config = OptimizerConfig::default();
        let generator = CandidateGenerator::new(&data, &current, &config, 1);

        assert_eq!(generator.thresholds(PositionSide::Long), vec![5000.0]);
        let set = generator.all();
        assert!(!set.tp.is_empty());
        assert!(!set.sl.is_empty());
        assert!(!set.leverage.is_empty());
        assert!(!set.margin.is_empty());
        assert!(!set.windows.is_empty());
        assert!(!set.cooldowns.is_empty());
    }

    #[test]
    fn test_empty_history_without_live_threshold() {
        let data = SymbolData::new("BTCUSDT", Vec::new(), Vec::new(), Vec::new());
        let mut current = make_current();
        current.short.threshold = 0.0;
        let config = OptimizerConfig::default();
        let generator = CandidateGenerator::new(&data, &current, &config, 1);
        assert_eq!(generator.thresholds(PositionSide::Short), vec![FALLBACK_THRESHOLD]);
    }

    #[test]
    fn test_quick_thresholds_respect_floor_and_cap() {
        let volumes: Vec<f64> = (1..=400).map(|i| i as f64 * 100.0).collect();
        let data = make_data(&volumes);
        let current = make_current();
        let config = OptimizerConfig::default();
        let generator = CandidateGenerator::new(&data, &current, &config, 1);

        let long = generator.thresholds(PositionSide::Long);
        assert!(long.len() <= 10);
        assert!(long.windows(2).all(|w| w[0] < w[1]));
        assert!(long.iter().all(|t| *t % 10.0 == 0.0));

        let volumes_long: Vec<f64> = data
            .triggers(PositionSide::Long)
            .iter()
            .map(|e| e.volume)
            .collect();
        let floor = stats::percentile(&volumes_long, 35.0);
        assert!(long.iter().all(|t| *t >= floor - 5.0));
    }

    #[test]
    fn test_thorough_keeps_more_candidates() {
        let volumes: Vec<f64> = (1..=400).map(|i| i as f64 * 100.0).collect();
        let data = make_data(&volumes);
        let current = make_current();
        let quick = OptimizerConfig::default();
        let thorough = OptimizerConfig {
            mode: SearchMode::Thorough,
            ..Default::default()
        };
        let q = CandidateGenerator::new(&data, &current, &quick, 1).all();
        let t = CandidateGenerator::new(&data, &current, &thorough, 1).all();
        assert!(t.long_thresholds.len() > q.long_thresholds.len());
        assert!(t.tp.len() >= q.tp.len());
        assert!(t.long_thresholds[0] < q.long_thresholds[0]);
    }

    #[test]
    fn test_tp_sl_bounded_and_capped() {
        let data = make_data(&[6000.0; 20]);
        let mut current = make_current();
        current.long.tp_percent = 50.0;
        let config = OptimizerConfig::default();
        let generator = CandidateGenerator::new(&data, &current, &config, 1);

        let tp = generator.tp_candidates();
        assert!(tp.len() <= 8);
        assert!(tp.iter().all(|v| *v >= 0.1 && *v <= 30.0));
        assert!(tp.contains(&30.0));
        assert!(tp.contains(&1.0));

        let sl = generator.sl_candidates();
        assert!(sl.len() <= 8);
        assert!(sl.contains(&0.5));
    }

    #[test]
    fn test_quick_tp_keeps_extremes_of_long_ladders() {
        let data = make_data(&[6000.0; 20]);
        let mut current = make_current();
        current.short.tp_percent = 8.0;
        let thorough = OptimizerConfig {
            mode: SearchMode::Thorough,
            ..Default::default()
        };
        let full = CandidateGenerator::new(&data, &current, &thorough, 1).tp_candidates();
        assert!(full.len() > PRUNE_ABOVE);

        let quick = CandidateGenerator::new(&data, &current, &OptimizerConfig::default(), 1)
            .tp_candidates();
        assert!(quick.len() <= 8);
        assert!(quick.contains(&full[0]));
        assert!(quick.contains(&full[full.len() - 1]));
        assert!(quick.contains(&1.0));
        assert!(quick.contains(&8.0));

        // nothing from the middle of the ladder survives except live values
        let low_edge = full[PRUNE_PER_END - 1];
        let high_edge = full[full.len() - PRUNE_PER_END];
        assert!(quick
            .iter()
            .all(|v| *v <= low_edge || *v >= high_edge || *v == 1.0 || *v == 8.0));
    }

    #[test]
    fn test_leverage_capped_without_brackets() {
        let data = make_data(&[6000.0; 4]);
        let current = make_current();
        let config = OptimizerConfig::default();
        let leverage = CandidateGenerator::new(&data, &current, &config, 1).leverage_candidates();
        assert!(leverage.iter().all(|l| *l <= 10));
        assert!(leverage.contains(&10));
        assert!(leverage.contains(&5));
    }

    #[test]
    fn test_margin_within_budget() {
        let data = make_data(&[6000.0; 4]);
        let current = make_current();
        let config = OptimizerConfig::default();
        let generator = CandidateGenerator::new(&data, &current, &config, 4);
        let margin = generator.margin_candidates(&[5, 10]);
        // 1000 * 0.8 / 4 / 2
        assert!(margin.iter().all(|m| *m <= 100.0 && *m >= 1.0));
        assert!(margin.contains(&20.0));
        assert!(margin.len() <= 6);
    }

    #[test]
    fn test_timers_rounded_and_clamped() {
        let data = make_data(&[6000.0; 30]);
        let current = make_current();
        let config = OptimizerConfig::default();
        let generator = CandidateGenerator::new(&data, &current, &config, 1);

        let windows = generator.window_candidates();
        assert!(windows.contains(&60_000));
        assert!(windows.iter().all(|w| *w >= 1_000 && *w <= 3_600_000 && w % 1000 == 0));

        let cooldowns = generator.cooldown_candidates(&windows);
        assert!(cooldowns.contains(&30_000));
        assert!(cooldowns.iter().all(|c| *c >= 0 && *c <= 3_600_000));
        assert!(cooldowns.len() <= 5);
    }

    #[test]
    fn test_sampling_is_deterministic() {
        let volumes: Vec<f64> = (1..=200).map(|i| (i * 37 % 101) as f64 * 150.0).collect();
        let data = make_data(&volumes);
        let current = make_current();
        let config = OptimizerConfig::default();
        let a = CandidateGenerator::new(&data, &current, &config, 2).all();
        let b = CandidateGenerator::new(&data, &current, &config, 2).all();
        assert_eq!(a, b);
    }

    #[test]
    fn test_prune_extremes() {
        let values: Vec<f64> = (0..14).map(|i| i as f64).collect();
        let pruned = prune_extremes(&values, 5);
        assert_eq!(pruned, vec![0.0, 1.0, 2.0, 3.0, 4.0, 9.0, 10.0, 11.0, 12.0, 13.0]);
        assert_eq!(prune_extremes(&values[..8], 5).len(), 8);
    }
}
