//! Error taxonomy for the tuner core
//!
//! Infeasible candidates and non-finite scores are not errors: they are
//! counted as [`crate::scoring::RejectionReason`]s and the search moves on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunerError {
    #[error("no liquidation history for {symbol}")]
    DataUnavailable { symbol: String },

    #[error("external service failed for {symbol}: {source}")]
    ExternalService {
        symbol: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("optimization cancelled")]
    Cancelled,

    #[error("symbol task failed: {0}")]
    Join(String),
}

pub type TunerResult<T> = Result<T, TunerError>;
