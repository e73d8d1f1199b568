//! Memoized simulator results for one symbol's search
//!
//! Keys hold the exact bit patterns of every input that changes a
//! simulation, so two keys are equal only when the runs would be identical.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::FillModel;
use crate::types::{BacktestResult, ParameterSet, PositionSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimKey {
    side: PositionSide,
    threshold: u64,
    max_positions: u32,
    trade_size: u64,
    leverage: u32,
    tp_percent: u64,
    sl_percent: u64,
    cooldown_ms: i64,
    hunter_cooldown_ms: i64,
    window_ms: i64,
    limit_fill_rate: u64,
    market_fallback_rate: u64,
    slippage_multiplier: u64,
}

impl SimKey {
    pub fn new(params: &ParameterSet, fill: &FillModel) -> Self {
        Self {
            side: params.side,
            threshold: params.threshold.to_bits(),
            max_positions: params.max_positions,
            trade_size: params.trade_size.to_bits(),
            leverage: params.leverage,
            tp_percent: params.tp_percent.to_bits(),
            sl_percent: params.sl_percent.to_bits(),
            cooldown_ms: params.cooldown_ms,
            hunter_cooldown_ms: params.hunter_cooldown_ms,
            window_ms: params.window_ms,
            limit_fill_rate: fill.limit_fill_rate.to_bits(),
            market_fallback_rate: fill.market_fallback_rate.to_bits(),
            slippage_multiplier: fill.slippage_multiplier.to_bits(),
        }
    }

    /// Stable 64-bit digest of the key, independent of the process hasher.
    /// Used to derive per-simulation RNG seeds.
    pub fn fingerprint(&self) -> u64 {
        let words = [
            matches!(self.side, PositionSide::Short) as u64,
            self.threshold,
            self.max_positions as u64,
            self.trade_size,
            self.leverage as u64,
            self.tp_percent,
            self.sl_percent,
            self.cooldown_ms as u64,
            self.hunter_cooldown_ms as u64,
            self.window_ms as u64,
            self.limit_fill_rate,
            self.market_fallback_rate,
            self.slippage_multiplier,
        ];
        words
            .iter()
            .fold(0x9E37_79B9_7F4A_7C15u64, |acc, w| splitmix64(acc ^ w))
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Per-symbol result cache. Dropped with the search that owns it.
#[derive(Debug, Default)]
pub struct SimulationCache {
    entries: HashMap<SimKey, Arc<BacktestResult>>,
    hits: u64,
    misses: u64,
}

impl SimulationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result for `key`, running `simulate` on a miss
    pub fn get_or_run<F>(&mut self, key: SimKey, simulate: F) -> Arc<BacktestResult>
    where
        F: FnOnce() -> BacktestResult,
    {
        if let Some(hit) = self.entries.get(&key) {
            self.hits += 1;
            return Arc::clone(hit);
        }
        self.misses += 1;
        let result = Arc::new(simulate());
        self.entries.insert(key, Arc::clone(&result));
        result
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_params() -> ParameterSet {
        ParameterSet {
            side: PositionSide::Long,
            threshold: 5000.0,
            max_positions: 3,
            trade_size: 20.0,
            leverage: 10,
            tp_percent: 1.0,
            sl_percent: 0.5,
            cooldown_ms: 0,
            hunter_cooldown_ms: 0,
            window_ms: 60_000,
        }
    }

    #[test]
    fn test_hits_and_misses() {
        let mut cache = SimulationCache::new();
        let key = SimKey::new(&make_params(), &FillModel::default());
        let mut runs = 0;

        let first = cache.get_or_run(key, || {
            runs += 1;
            BacktestResult::empty()
        });
        let second = cache.get_or_run(key, || {
            runs += 1;
            BacktestResult::empty()
        });

        assert_eq!(runs, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fill_model_is_part_of_key() {
        let params = make_params();
        let base = SimKey::new(&params, &FillModel::default());
        let perfect = SimKey::new(&params, &FillModel::perfect());
        assert_ne!(base, perfect);
        assert_ne!(base.fingerprint(), perfect.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let params = make_params();
        let a = SimKey::new(&params, &FillModel::default());
        let b = SimKey::new(&params.clone(), &FillModel::default());
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut short = params;
        short.side = PositionSide::Short;
        assert_ne!(a.fingerprint(), SimKey::new(&short, &FillModel::default()).fingerprint());
    }
}
