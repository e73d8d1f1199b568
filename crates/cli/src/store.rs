//! Conversion of engine reports into history records

use anyhow::Result;
use engine::OptimizationReport;
use persistence::repository::{RecommendationRecord, RunRecord};
use persistence::Database;
use tracing::info;

pub fn run_record(report: &OptimizationReport) -> Result<RunRecord> {
    Ok(RunRecord {
        id: None,
        run_id: report.run_id.clone(),
        mode: report.mode.to_string(),
        seed: report.seed.to_string(),
        started_at: report.started_at.timestamp_millis(),
        finished_at: report.finished_at.timestamp_millis(),
        symbols: report.summary.symbols as i64,
        optimized_symbols: report.summary.optimized_symbols as i64,
        skipped_symbols: report.summary.skipped_symbols as i64,
        current_daily_pnl: report.summary.current_daily_pnl.to_string(),
        optimized_daily_pnl: report.summary.optimized_daily_pnl.to_string(),
        overallocated: report.summary.overallocated,
        cancelled: report.cancelled,
        report_json: serde_json::to_string(report)?,
    })
}

pub fn recommendation_records(report: &OptimizationReport) -> Result<Vec<RecommendationRecord>> {
    report
        .recommendations
        .iter()
        .map(|rec| {
            Ok(RecommendationRecord {
                id: None,
                run_id: report.run_id.clone(),
                symbol: rec.symbol.clone(),
                changed: rec.changed,
                skipped_reason: rec.skipped.clone(),
                current_daily_pnl: rec.current_daily_pnl.to_string(),
                optimized_daily_pnl: rec.optimized_daily_pnl.to_string(),
                optimized_score: rec.optimized_score.map(|s| s.to_string()),
                recommendation_json: serde_json::to_string(rec)?,
            })
        })
        .collect()
}

/// Persist a finished report and all of its recommendations
pub async fn save_report(db: &Database, report: &OptimizationReport) -> Result<()> {
    let records = recommendation_records(report)?;
    db.runs().record_run(&run_record(report)?, &records).await?;
    info!(run_id = %report.run_id, recommendations = records.len(), "Report stored");
    Ok(())
}
