//! Directory snapshot of historical data
//!
//! Layout: `<root>/<SYMBOL>/liquidations.json`, `bars.json`, `brackets.json`.
//! A symbol without a liquidations file has no history; missing bars or
//! brackets surface as fetch errors and degrade the symbol's data.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use engine::{HistoricalDataSource, LeverageBracket, LiquidationEvent, LiquidationSide, PriceBar};
use serde::de::DeserializeOwned;
use tracing::debug;

pub struct SnapshotDataSource {
    root: PathBuf,
}

impl SnapshotDataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file(&self, symbol: &str, name: &str) -> PathBuf {
        self.root.join(symbol).join(name)
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[async_trait]
impl HistoricalDataSource for SnapshotDataSource {
    async fn liquidation_events(
        &self,
        symbol: &str,
        side: LiquidationSide,
    ) -> Result<Vec<LiquidationEvent>> {
        let path = self.file(symbol, "liquidations.json");
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(symbol, path = %path.display(), "No liquidation snapshot");
            return Ok(Vec::new());
        }
        let events: Vec<LiquidationEvent> = read_json(&path).await?;
        Ok(events.into_iter().filter(|e| e.side == side).collect())
    }

    async fn price_bars(&self, symbol: &str, interval: &str, count: usize) -> Result<Vec<PriceBar>> {
        let bars: Vec<PriceBar> = read_json(&self.file(symbol, "bars.json")).await?;
        debug!(symbol, interval, available = bars.len(), requested = count, "Read price snapshot");
        let skip = bars.len().saturating_sub(count);
        Ok(bars.into_iter().skip(skip).collect())
    }

    async fn leverage_brackets(&self, symbol: &str) -> Result<Vec<LeverageBracket>> {
        read_json(&self.file(symbol, "brackets.json")).await
    }
}
