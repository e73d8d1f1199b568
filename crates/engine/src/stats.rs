//! Numeric helpers over price and event series
//!
//! Pure functions, no state. Empty inputs yield zeros or empty vectors
//! rather than errors.

use std::collections::VecDeque;

use ta::indicators::AverageTrueRange;
use ta::{DataItem, Next};

use crate::types::PriceBar;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation, 0 for fewer than two values
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    variance.sqrt()
}

/// Linearly interpolated percentile (`pct` in 0..=100) of an unsorted slice
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, pct)
}

/// Percentile of an already ascending slice
pub fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Round to the nearest multiple of `step`
pub fn round_to(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).round() * step
}

pub fn round_dp(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}

/// Sort ascending and drop values closer than `epsilon` to their predecessor
pub fn sorted_unique(mut values: Vec<f64>, epsilon: f64) -> Vec<f64> {
    values.retain(|v| v.is_finite());
    values.sort_by(f64::total_cmp);
    values.dedup_by(|a, b| (*a - *b).abs() <= epsilon);
    values
}

/// Deterministic downsampling that always keeps both extremes
pub fn even_stride_sample<T: Clone>(values: &[T], cap: usize) -> Vec<T> {
    if cap == 0 || values.len() <= cap {
        return values.to_vec();
    }
    if cap == 1 {
        return vec![values[0].clone()];
    }
    let last = values.len() - 1;
    let mut picked: Vec<usize> = (0..cap)
        .map(|i| ((i * last) as f64 / (cap - 1) as f64).round() as usize)
        .collect();
    picked.dedup();
    picked.into_iter().map(|i| values[i].clone()).collect()
}

/// Merge consecutive bars into buckets of `factor` bars
pub fn resample(bars: &[PriceBar], factor: usize) -> Vec<PriceBar> {
    if factor <= 1 {
        return bars.to_vec();
    }
    bars.chunks(factor)
        .map(|chunk| {
            let first = &chunk[0];
            let last = &chunk[chunk.len() - 1];
            PriceBar {
                timestamp: first.timestamp,
                open: first.open,
                high: chunk
                    .iter()
                    .map(PriceBar::high_or_close)
                    .fold(f64::MIN, f64::max),
                low: chunk
                    .iter()
                    .map(PriceBar::low_or_close)
                    .fold(f64::MAX, f64::min),
                close: last.close,
                volume: chunk.iter().map(|b| b.volume).sum(),
            }
        })
        .collect()
}

fn to_data_item(bar: &PriceBar) -> Option<DataItem> {
    let close = bar.close;
    let high = bar.high_or_close();
    let low = bar.low_or_close();
    let open = if bar.open >= low && bar.open <= high {
        bar.open
    } else {
        close
    };
    DataItem::builder()
        .open(open)
        .high(high)
        .low(low)
        .close(close)
        .volume(bar.volume.max(0.0))
        .build()
        .ok()
}

/// Average true range after every bar
pub fn atr_series(bars: &[PriceBar], period: usize) -> Vec<f64> {
    let Ok(mut atr) = AverageTrueRange::new(period.max(1)) else {
        return Vec::new();
    };
    bars.iter()
        .filter_map(to_data_item)
        .map(|item| atr.next(&item))
        .collect()
}

/// ATR expressed as a percentage of each bar's close
pub fn atr_pct_series(bars: &[PriceBar], period: usize) -> Vec<f64> {
    let valid: Vec<&PriceBar> = bars.iter().filter(|b| to_data_item(b).is_some()).collect();
    let owned: Vec<PriceBar> = valid.iter().map(|b| **b).collect();
    atr_series(&owned, period)
        .into_iter()
        .zip(owned.iter())
        .filter(|(_, bar)| bar.close > 0.0)
        .map(|(atr, bar)| atr / bar.close * 100.0)
        .collect()
}

/// Absolute close-to-close returns in percent
pub fn abs_returns_pct(bars: &[PriceBar]) -> Vec<f64> {
    bars.windows(2)
        .filter(|w| w[0].close > 0.0)
        .map(|w| ((w[1].close - w[0].close) / w[0].close * 100.0).abs())
        .collect()
}

/// Sliding (highest high − lowest low) / close over `window` bars, in percent.
/// One value per bar once the window is full.
pub fn rolling_range_pcts(bars: &[PriceBar], window: usize) -> Vec<f64> {
    let window = window.max(1);
    if bars.len() < window {
        return Vec::new();
    }
    let mut highs: VecDeque<usize> = VecDeque::new();
    let mut lows: VecDeque<usize> = VecDeque::new();
    let mut out = Vec::with_capacity(bars.len() + 1 - window);

    for (i, bar) in bars.iter().enumerate() {
        while highs
            .back()
            .is_some_and(|&j| bars[j].high_or_close() <= bar.high_or_close())
        {
            highs.pop_back();
        }
        highs.push_back(i);
        while lows
            .back()
            .is_some_and(|&j| bars[j].low_or_close() >= bar.low_or_close())
        {
            lows.pop_back();
        }
        lows.push_back(i);

        if highs.front().is_some_and(|&j| j + window <= i) {
            highs.pop_front();
        }
        if lows.front().is_some_and(|&j| j + window <= i) {
            lows.pop_front();
        }

        if i + 1 >= window && bar.close > 0.0 {
            if let (Some(&h), Some(&l)) = (highs.front(), lows.front()) {
                out.push((bars[h].high_or_close() - bars[l].low_or_close()) / bar.close * 100.0);
            }
        }
    }
    out
}

/// Short-window range over long-window range, per bar.
///
/// Values above 1 mean the last `short` bars moved more than usual.
/// Bars without enough history get 1.0.
pub fn volatility_factors(bars: &[PriceBar], short: usize, long: usize) -> Vec<f64> {
    let short = short.max(1);
    let long = long.max(short);
    let mut prefix = Vec::with_capacity(bars.len() + 1);
    prefix.push(0.0);
    for bar in bars {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + bar.range_pct());
    }

    (0..bars.len())
        .map(|i| {
            let end = i + 1;
            if end < short {
                return 1.0;
            }
            let short_mean = (prefix[end] - prefix[end - short]) / short as f64;
            let long_len = end.min(long);
            let long_mean = (prefix[end] - prefix[end - long_len]) / long_len as f64;
            if long_mean <= 0.0 {
                1.0
            } else {
                short_mean / long_mean
            }
        })
        .collect()
}

/// Positive gaps between consecutive timestamps, in milliseconds
pub fn inter_event_gaps(timestamps: &[i64]) -> Vec<f64> {
    timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64)
        .filter(|gap| *gap > 0.0)
        .collect()
}
