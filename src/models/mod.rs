use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw field data for one instrument, as extracted from its indicator page.
///
/// Labels keep the order in which they appear on the page so the exporter
/// can reproduce the column layout. Values are the untouched cell texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub ticker: String,
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            fields: Vec::new(),
        }
    }

    pub fn push(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.fields.push((label.into(), value.into()));
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Declared parse kind for a field label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Currency,
    ScaledCurrency,
    Percentage,
    Ratio,
    Date,
    Count,
    Text,
}

/// A typed field value after normalization.
///
/// `Unparsed` keeps the original text of a value that did not match the
/// grammar of its declared kind; nothing is ever silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum FieldValue {
    Currency(f64),
    ScaledCurrency(f64),
    Percentage(f64),
    Ratio(f64),
    /// Canonical `DD/MM/YYYY`.
    Date(String),
    Count(i64),
    Text(String),
    Unparsed(String),
    Missing,
}

impl FieldValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Currency(v)
            | FieldValue::ScaledCurrency(v)
            | FieldValue::Percentage(v)
            | FieldValue::Ratio(v) => Some(*v),
            FieldValue::Count(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

/// Outcome of normalizing one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Every present field parsed under its declared kind.
    Complete,
    /// At least one field was kept as `Unparsed`.
    Partial,
    /// The page yielded no fields at all.
    Failed,
}

/// Typed field data for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub ticker: String,
    fields: Vec<(String, FieldValue)>,
    pub status: RecordStatus,
    /// (profit per share / last close) * 100, when both inputs are numeric.
    pub earnings_yield: Option<f64>,
}

impl NormalizedRecord {
    pub fn new(
        ticker: impl Into<String>,
        fields: Vec<(String, FieldValue)>,
        status: RecordStatus,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            fields,
            status,
            earnings_yield: None,
        }
    }

    pub fn get(&self, label: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v)
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Ordering of records in the final run result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultOrder {
    /// Records sorted back into ticker input order.
    #[default]
    ByInput,
    /// Records in the order workers finished them.
    ByCompletion,
}

/// Operating mode for the fetch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// 5 workers, batches of 20.
    Optimized,
    /// 8 workers, batches of 30.
    SuperOptimized,
    /// One ticker at a time; same code path as the parallel modes.
    Sequential,
    /// User-supplied worker and batch counts, range-checked.
    Custom { workers: usize, batch_size: usize },
}

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 10;
pub const MIN_BATCH_SIZE: usize = 5;
pub const MAX_BATCH_SIZE: usize = 50;

impl FetchMode {
    /// Resolve to `(worker_count, batch_size)`, validating custom values.
    ///
    /// Validation happens before any network request is made; a bad custom
    /// configuration fails the run up front.
    pub fn validated(&self) -> Result<(usize, usize), ConfigError> {
        match *self {
            FetchMode::Optimized => Ok((5, 20)),
            FetchMode::SuperOptimized => Ok((8, 30)),
            FetchMode::Sequential => Ok((1, 1)),
            FetchMode::Custom {
                workers,
                batch_size,
            } => {
                if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
                    return Err(ConfigError::InvalidWorkerCount(workers));
                }
                if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size) {
                    return Err(ConfigError::InvalidBatchSize(batch_size));
                }
                Ok((workers, batch_size))
            }
        }
    }
}

/// Fatal configuration errors, raised before any work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("worker count {0} outside allowed range {MIN_WORKERS}-{MAX_WORKERS}")]
    InvalidWorkerCount(usize),
    #[error("batch size {0} outside allowed range {MIN_BATCH_SIZE}-{MAX_BATCH_SIZE}")]
    InvalidBatchSize(usize),
}

/// Configuration for the page fetcher.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub pool_max_connections: usize,
    pub request_timeout_secs: u64,
    /// Retries after the first attempt; 1 means up to two requests total.
    pub retry_attempts: u32,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://www.investsite.com.br".to_string(),
            pool_max_connections: 20,
            request_timeout_secs: 8,
            retry_attempts: 1,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
                .to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults above for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let defaults = Config::default();
        Ok(Config {
            base_url: std::env::var("INVESTSITE_BASE_URL").unwrap_or(defaults.base_url),
            pool_max_connections: std::env::var("INVESTSITE_POOL_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pool_max_connections),
            request_timeout_secs: std::env::var("INVESTSITE_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_secs),
            retry_attempts: std::env::var("INVESTSITE_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_attempts),
            user_agent: std::env::var("INVESTSITE_USER_AGENT").unwrap_or(defaults.user_agent),
        })
    }
}
