//! Historical data access and the per-symbol snapshot the search runs on
//!
//! Data is fetched once per symbol before the search starts and is never
//! mutated afterwards. Collaborator failures degrade to conservative
//! defaults; only a symbol without any liquidation history is skipped.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::OptimizerConfig;
use crate::error::{TunerError, TunerResult};
use crate::stats;
use crate::types::{LeverageBracket, LiquidationEvent, LiquidationSide, PositionSide, PriceBar};

/// Bars per volatility-factor short window
pub const VOL_SHORT_BARS: usize = 5;
/// Bars per volatility-factor long window and per rolling range
pub const VOL_LONG_BARS: usize = 60;

/// Supplier of historical market data
#[async_trait]
pub trait HistoricalDataSource: Send + Sync {
    /// Liquidations for one side, ascending by timestamp
    async fn liquidation_events(
        &self,
        symbol: &str,
        side: LiquidationSide,
    ) -> Result<Vec<LiquidationEvent>>;

    /// Most recent `count` candles; may return fewer and may contain gaps
    async fn price_bars(&self, symbol: &str, interval: &str, count: usize)
        -> Result<Vec<PriceBar>>;

    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<LeverageBracket>>;
}

/// In-memory source, used by tests and by callers that already hold data
#[derive(Debug, Default, Clone)]
pub struct InMemoryDataSource {
    events: HashMap<String, Vec<LiquidationEvent>>,
    bars: HashMap<String, Vec<PriceBar>>,
    brackets: HashMap<String, Vec<LeverageBracket>>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, symbol: &str, events: Vec<LiquidationEvent>) -> Self {
        self.events.insert(symbol.to_string(), events);
        self
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_brackets(mut self, symbol: &str, brackets: Vec<LeverageBracket>) -> Self {
        self.brackets.insert(symbol.to_string(), brackets);
        self
    }
}

#[async_trait]
impl HistoricalDataSource for InMemoryDataSource {
    async fn liquidation_events(
        &self,
        symbol: &str,
        side: LiquidationSide,
    ) -> Result<Vec<LiquidationEvent>> {
        Ok(self
            .events
            .get(symbol)
            .map(|events| events.iter().filter(|e| e.side == side).cloned().collect())
            .unwrap_or_default())
    }

    async fn price_bars(
        &self,
        symbol: &str,
        _interval: &str,
        count: usize,
    ) -> Result<Vec<PriceBar>> {
        let bars = self.bars.get(symbol).cloned().unwrap_or_default();
        let skip = bars.len().saturating_sub(count);
        Ok(bars.into_iter().skip(skip).collect())
    }

    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<LeverageBracket>> {
        Ok(self.brackets.get(symbol).cloned().unwrap_or_default())
    }
}

/// Immutable historical snapshot of one symbol
#[derive(Debug, Clone)]
pub struct SymbolData {
    symbol: String,
    long_triggers: Vec<LiquidationEvent>,
    short_triggers: Vec<LiquidationEvent>,
    event_times: Vec<i64>,
    bars: Vec<PriceBar>,
    vol_factors: Vec<f64>,
    brackets: Vec<LeverageBracket>,
    price_fallback: bool,
    p95_range_pct: f64,
    span_ms: i64,
    digest: String,
    degradations: Vec<String>,
}

impl SymbolData {
    /// Build a snapshot. Events may arrive in any order and mixed sides.
    /// Without bars the liquidation prices become a flat-bar price series.
    pub fn new(
        symbol: &str,
        mut events: Vec<LiquidationEvent>,
        mut bars: Vec<PriceBar>,
        mut brackets: Vec<LeverageBracket>,
    ) -> Self {
        events.retain(|e| e.volume.is_finite() && e.price > 0.0);
        events.sort_by_key(|e| e.timestamp);
        bars.retain(|b| b.close.is_finite() && b.close > 0.0);
        bars.sort_by_key(|b| b.timestamp);
        brackets.sort_by(|a, b| a.notional_floor.total_cmp(&b.notional_floor));

        let price_fallback = bars.is_empty();
        if price_fallback {
            bars = events
                .iter()
                .map(|e| PriceBar::flat(e.timestamp, e.price))
                .collect();
        }

        let (long_triggers, short_triggers): (Vec<_>, Vec<_>) = events
            .iter()
            .cloned()
            .partition(|e| e.side.hunter_side() == PositionSide::Long);
        let event_times: Vec<i64> = events.iter().map(|e| e.timestamp).collect();

        let vol_factors = stats::volatility_factors(&bars, VOL_SHORT_BARS, VOL_LONG_BARS);
        let ranges = stats::rolling_range_pcts(&bars, VOL_LONG_BARS.min(bars.len().max(1)));
        let p95_range_pct = stats::percentile(&ranges, 95.0);

        let first = event_times
            .first()
            .copied()
            .into_iter()
            .chain(bars.first().map(|b| b.timestamp))
            .min()
            .unwrap_or(0);
        let last = event_times
            .last()
            .copied()
            .into_iter()
            .chain(bars.last().map(|b| b.timestamp))
            .max()
            .unwrap_or(0);

        let digest = snapshot_digest(symbol, &events, &bars, &brackets);

        let mut degradations = Vec::new();
        if price_fallback && !events.is_empty() {
            degradations.push("price bars unavailable, using liquidation prices".to_string());
        }

        Self {
            symbol: symbol.to_string(),
            long_triggers,
            short_triggers,
            event_times,
            bars,
            vol_factors,
            brackets,
            price_fallback,
            p95_range_pct,
            span_ms: (last - first).max(0),
            digest,
            degradations,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Trigger events feeding one hunter side, ascending
    pub fn triggers(&self, side: PositionSide) -> &[LiquidationEvent] {
        match side {
            PositionSide::Long => &self.long_triggers,
            PositionSide::Short => &self.short_triggers,
        }
    }

    pub fn has_events(&self) -> bool {
        !self.event_times.is_empty()
    }

    /// Timestamps of all liquidations regardless of side, ascending
    pub fn event_times(&self) -> &[i64] {
        &self.event_times
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn vol_factors(&self) -> &[f64] {
        &self.vol_factors
    }

    pub fn brackets(&self) -> &[LeverageBracket] {
        &self.brackets
    }

    pub fn uses_price_fallback(&self) -> bool {
        self.price_fallback
    }

    /// 95th percentile of the rolling 60-bar high/low range, percent
    pub fn p95_range_pct(&self) -> f64 {
        self.p95_range_pct
    }

    pub fn span_ms(&self) -> i64 {
        self.span_ms
    }

    pub fn span_days(&self) -> f64 {
        self.span_ms as f64 / 86_400_000.0
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn degradations(&self) -> &[String] {
        &self.degradations
    }

    pub fn push_degradation(&mut self, note: impl Into<String>) {
        self.degradations.push(note.into());
    }

    /// Bars merged into 60-minute buckets for return and ATR statistics
    pub fn hourly_bars(&self) -> Vec<PriceBar> {
        stats::resample(&self.bars, 60)
    }

    /// DCA slots per side needed to ride out this symbol's typical swings:
    /// one slot per 4% of the p95 range, between 1 and 5, never above `max_dca`
    pub fn min_dca_depth(&self, max_dca: u32) -> u32 {
        let depth = (self.p95_range_pct / 4.0).ceil();
        let depth = if depth.is_finite() { depth as u32 } else { 1 };
        depth.clamp(1, 5).min(max_dca.max(1))
    }

    /// Highest leverage any tier allows; 10 when no brackets are known
    pub fn max_tier_leverage(&self) -> u32 {
        self.brackets
            .iter()
            .map(|b| b.initial_leverage)
            .max()
            .unwrap_or(DEFAULT_LEVERAGE_CAP)
    }
}

/// Leverage cap assumed when the bracket lookup is unavailable
pub const DEFAULT_LEVERAGE_CAP: u32 = 10;

fn snapshot_digest(
    symbol: &str,
    events: &[LiquidationEvent],
    bars: &[PriceBar],
    brackets: &[LeverageBracket],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    for e in events {
        hasher.update(e.timestamp.to_le_bytes());
        hasher.update([matches!(e.side, LiquidationSide::Buy) as u8]);
        hasher.update(e.volume.to_bits().to_le_bytes());
        hasher.update(e.price.to_bits().to_le_bytes());
    }
    for b in bars {
        hasher.update(b.timestamp.to_le_bytes());
        for v in [b.open, b.high, b.low, b.close] {
            hasher.update(v.to_bits().to_le_bytes());
        }
    }
    for b in brackets {
        hasher.update(b.notional_floor.to_bits().to_le_bytes());
        hasher.update(b.notional_cap.to_bits().to_le_bytes());
        hasher.update(b.initial_leverage.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Fetch everything one symbol's search needs.
///
/// Missing liquidations on both sides is `DataUnavailable`. Price and
/// bracket failures are logged, recorded as degradations, and replaced by
/// the liquidation-price series and the default leverage cap.
pub async fn load_symbol_data(
    source: &dyn HistoricalDataSource,
    symbol: &str,
    config: &OptimizerConfig,
) -> TunerResult<SymbolData> {
    let mut events = Vec::new();
    for side in [LiquidationSide::Sell, LiquidationSide::Buy] {
        let fetched = source
            .liquidation_events(symbol, side)
            .await
            .map_err(|e| TunerError::ExternalService {
                symbol: symbol.to_string(),
                source: e,
            })?;
        debug!(symbol, side = ?side, count = fetched.len(), "Fetched liquidations");
        events.extend(fetched);
    }

    if let Some((start, end)) = config.time_range {
        events.retain(|e| e.timestamp >= start && e.timestamp <= end);
    }
    if events.is_empty() {
        return Err(TunerError::DataUnavailable {
            symbol: symbol.to_string(),
        });
    }

    let mut notes = Vec::new();

    let mut bars = match source
        .price_bars(symbol, &config.price_bar_interval, config.price_bar_count)
        .await
    {
        Ok(bars) => bars,
        Err(e) => {
            warn!(symbol, error = %e, "Price history unavailable, falling back to liquidation prices");
            notes.push(format!("price history fetch failed: {e}"));
            Vec::new()
        }
    };
    // span, volatility and range statistics only see the configured window
    if let Some((start, end)) = config.time_range {
        bars.retain(|b| b.timestamp >= start && b.timestamp <= end);
    }

    let brackets = match source.leverage_brackets(symbol).await {
        Ok(brackets) => brackets,
        Err(e) => {
            warn!(symbol, error = %e, "Leverage brackets unavailable, assuming default cap");
            notes.push(format!(
                "leverage brackets fetch failed, capped at {DEFAULT_LEVERAGE_CAP}x: {e}"
            ));
            Vec::new()
        }
    };

    let mut data = SymbolData::new(symbol, events, bars, brackets);
    for note in notes {
        data.push_degradation(note);
    }

    info!(
        symbol,
        long_triggers = data.triggers(PositionSide::Long).len(),
        short_triggers = data.triggers(PositionSide::Short).len(),
        bars = data.bars().len(),
        price_fallback = data.uses_price_fallback(),
        span_days = format!("{:.2}", data.span_days()),
        "Loaded symbol data"
    );

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_events(symbol: &str) -> Vec<LiquidationEvent> {
        vec![
            LiquidationEvent {
                symbol: symbol.to_string(),
                side: LiquidationSide::Buy,
                timestamp: 120_000,
                volume: 900.0,
                price: 101.0,
            },
            LiquidationEvent {
                symbol: symbol.to_string(),
                side: LiquidationSide::Sell,
                timestamp: 60_000,
                volume: 1500.0,
                price: 99.0,
            },
        ]
    }

    struct FailingSource;

    #[async_trait]
    impl HistoricalDataSource for FailingSource {
        async fn liquidation_events(
            &self,
            symbol: &str,
            side: LiquidationSide,
        ) -> Result<Vec<LiquidationEvent>> {
            Ok(make_events(symbol)
                .into_iter()
                .filter(|e| e.side == side)
                .collect())
        }

        async fn price_bars(&self, _: &str, _: &str, _: usize) -> Result<Vec<PriceBar>> {
            anyhow::bail!("candles endpoint down")
        }

        async fn leverage_brackets(&self, _: &str) -> Result<Vec<LeverageBracket>> {
            anyhow::bail!("brackets endpoint down")
        }
    }

    #[test]
    fn test_snapshot_splits_sides_and_sorts() {
        let data = SymbolData::new("BTCUSDT", make_events("BTCUSDT"), Vec::new(), Vec::new());
        assert_eq!(data.triggers(PositionSide::Long).len(), 1);
        assert_eq!(data.triggers(PositionSide::Short).len(), 1);
        assert_eq!(data.event_times(), &[60_000, 120_000]);
        assert!(data.uses_price_fallback());
        assert_eq!(data.bars().len(), 2);
        assert_eq!(data.bars()[0].close, 99.0);
        assert_eq!(data.span_ms(), 60_000);
        assert_eq!(data.max_tier_leverage(), DEFAULT_LEVERAGE_CAP);
    }

    #[test]
    fn test_digest_is_stable() {
        let a = SymbolData::new("BTCUSDT", make_events("BTCUSDT"), Vec::new(), Vec::new());
        let b = SymbolData::new("BTCUSDT", make_events("BTCUSDT"), Vec::new(), Vec::new());
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);

        let mut events = make_events("BTCUSDT");
        events[0].volume = 901.0;
        let c = SymbolData::new("BTCUSDT", events, Vec::new(), Vec::new());
        assert_ne!(a.digest(), c.digest());
    }

    #[tokio::test]
    async fn test_load_missing_symbol_is_data_unavailable() {
        let source = InMemoryDataSource::new();
        let err = load_symbol_data(&source, "ETHUSDT", &OptimizerConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TunerError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_load_degrades_on_collaborator_failure() {
        let data = load_symbol_data(&FailingSource, "BTCUSDT", &OptimizerConfig::default())
            .await
            .unwrap();
        assert!(data.uses_price_fallback());
        assert!(data.brackets().is_empty());
        // fallback note plus the two fetch failures
        assert_eq!(data.degradations().len(), 3);
    }

    #[tokio::test]
    async fn test_time_range_restricts_bars() {
        const DAY_MS: i64 = 86_400_000;
        let events: Vec<LiquidationEvent> = (0..10)
            .map(|i| LiquidationEvent {
                symbol: "BTCUSDT".to_string(),
                side: LiquidationSide::Sell,
                timestamp: i * 60_000,
                volume: 6000.0,
                price: 100.0,
            })
            .collect();
        // a calm first day, then six days swinging 2% per bar
        let bars: Vec<PriceBar> = (0..10_080)
            .map(|i| {
                let timestamp = i * 60_000;
                let half_range = if timestamp <= DAY_MS { 0.1 } else { 1.0 };
                PriceBar {
                    timestamp,
                    open: 100.0,
                    high: 100.0 + half_range,
                    low: 100.0 - half_range,
                    close: 100.0,
                    volume: 1.0,
                }
            })
            .collect();
        let source = InMemoryDataSource::new()
            .with_events("BTCUSDT", events)
            .with_bars("BTCUSDT", bars);

        let full = load_symbol_data(&source, "BTCUSDT", &OptimizerConfig::default())
            .await
            .unwrap();
        assert!(full.span_days() > 6.9);
        assert!(full.p95_range_pct() > 1.9);

        let config = OptimizerConfig {
            time_range: Some((0, DAY_MS)),
            ..Default::default()
        };
        let data = load_symbol_data(&source, "BTCUSDT", &config).await.unwrap();
        assert_eq!(data.bars().len(), 1441);
        assert_eq!(data.span_days(), 1.0);
        assert!((data.p95_range_pct() - 0.2).abs() < 1e-6);
        assert!(data.vol_factors().iter().all(|f| (f - 1.0).abs() < 1e-6));
        assert_eq!(data.min_dca_depth(5), 1);
    }

    #[tokio::test]
    async fn test_in_memory_source_truncates_bars() {
        let bars: Vec<PriceBar> = (0..10).map(|i| PriceBar::flat(i * 60_000, 100.0)).collect();
        let source = InMemoryDataSource::new().with_bars("BTCUSDT", bars);
        let fetched = source.price_bars("BTCUSDT", "1m", 4).await.unwrap();
        assert_eq!(fetched.len(), 4);
        assert_eq!(fetched[0].timestamp, 6 * 60_000);
    }
}
