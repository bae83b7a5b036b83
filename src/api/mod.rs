use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::RawRecord;

pub mod extract;
pub mod investsite_client;
pub use investsite_client::InvestSiteClient;

/// Per-ticker fetch failure. Recoverable: recorded in the run result,
/// never raised past the worker that hit it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("page not found (HTTP {0})")]
    NotFound(u16),
    #[error("summary table anchor missing from page")]
    AnchorMissing,
}

impl FetchError {
    /// Timeouts and transient network errors are worth retrying; a missing
    /// page or a page without the expected tables is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout | FetchError::Network(_))
    }
}

/// Source of raw field data for one ticker.
///
/// Implemented by the HTTP client below; tests substitute deterministic
/// in-memory sources.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_record(&self, ticker: &str) -> Result<RawRecord, FetchError>;
}
