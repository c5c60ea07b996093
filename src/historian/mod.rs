//! Historian ingestion - read-only change-data-capture over the plant
//! historian.
//!
//! ## Architecture
//!
//! - [`query`]: validated single-SELECT construction (cold start vs
//!   incremental, legacy TOP vs ANSI LIMIT dialects)
//! - [`source`]: the [`HistorianSource`] trait plus the SQL-mirror and
//!   replay implementations
//! - [`window`]: the in-memory rolling window owned by the poller
//! - [`poller`]: the background polling task with runtime-config reload,
//!   backoff, and the published status view
//!
//! The poller never writes to the historian; connection failures back off
//! exponentially and never crash the service.

pub mod poller;
pub mod query;
pub mod source;
pub mod window;

pub use poller::{ExtruderPoller, PollerStatus};
pub use query::{QuerySpec, SqlDialect};
pub use source::{FetchMode, HistorianSource, ReplaySource, SqlHistorian};
pub use window::RollingWindow;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistorianError {
    #[error("invalid historian identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unsafe SQL blocked: {0}")]
    UnsafeSql(String),

    #[error("historian is not configured (missing host or credentials)")]
    NotConfigured,

    #[error("historian connection failed: {0}")]
    Connection(String),

    #[error("historian query failed: {0}")]
    Query(String),
}

impl HistorianError {
    /// Misconfiguration is logged at error and never accelerates retries;
    /// everything else is transient and backs off.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            HistorianError::InvalidIdentifier(_)
                | HistorianError::UnsafeSql(_)
                | HistorianError::NotConfigured
        )
    }
}
