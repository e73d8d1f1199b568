//! Liquidation Hunter Tuner Engine - parameter search for liquidation hunting
//!
//! Provides:
//! - Event-driven trade simulator with fill, slippage and commission models
//! - Data-driven candidate generation and a staged, cached parameter search
//! - Risk metrics, composite scoring and scenario stress tests
//! - Portfolio runner producing per-symbol recommendations

pub mod cache;
pub mod candidates;
pub mod config;
pub mod data;
pub mod error;
pub mod fees;
pub mod report;
pub mod risk;
pub mod runner;
pub mod scenario;
pub mod scoring;
pub mod search;
pub mod simulator;
pub mod stats;
pub mod types;

// Re-exports for convenience
pub use cache::{SimKey, SimulationCache};
pub use candidates::{CandidateCounts, CandidateGenerator, CandidateSet};
pub use config::{
    CapitalConfig, FeeModel, FillModel, OptimizerConfig, ScoringWeights, SearchMode,
    SimulationSettings, SlippageModel,
};
pub use data::{load_symbol_data, HistoricalDataSource, InMemoryDataSource, SymbolData};
pub use error::{TunerError, TunerResult};
pub use report::{
    Diagnostics, Improvement, OptimizationReport, PortfolioSummary, RecommendedParams,
    ResultSummary, SideReport, SymbolRecommendation,
};
pub use risk::{LedgerSummary, RiskMetrics};
pub use runner::{
    optimize_symbol, run_optimization, summarize_portfolio, OptimizeProgress, OptimizeStatus,
};
pub use scenario::{stress_test, StressReport, CALM, STRESS_HIGH};
pub use scoring::{RejectionReason, ScoreBreakdown, ScoringEngine};
pub use search::{
    CoarseSpace, NoProgress, ProgressSink, SearchOrchestrator, SearchOutcome, SearchStage,
};
pub use simulator::TradeSimulator;
pub use types::*;
