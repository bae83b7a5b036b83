use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::{extract, FetchError, RecordSource};
use crate::models::{Config, RawRecord};

/// HTTP client for the InvestSite indicator pages.
///
/// One `Client` is shared by all workers; reqwest keeps a bounded pool of
/// idle connections per host so concurrent fetches reuse established
/// TCP/TLS sessions instead of opening one per request.
pub struct InvestSiteClient {
    client: Client,
    base_url: Url,
    retry_attempts: u32,
}

impl InvestSiteClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_connections)
            .user_agent(&config.user_agent)
            .build()?;

        let base_url = Url::parse(&config.base_url)?;

        Ok(Self {
            client,
            base_url,
            retry_attempts: config.retry_attempts,
        })
    }

    fn indicators_url(&self, ticker: &str) -> Result<Url, FetchError> {
        Url::parse_with_params(
            self.base_url
                .join("principais_indicadores.php")
                .map_err(|e| FetchError::Network(e.to_string()))?
                .as_str(),
            &[("cod_negociacao", ticker)],
        )
        .map_err(|e| FetchError::Network(e.to_string()))
    }

    /// One GET attempt. The timeout built into the client is the only
    /// throttle; there is no extra backoff between retries.
    async fn get_page(&self, ticker: &str) -> Result<String, FetchError> {
        let url = self.indicators_url(ticker)?;
        debug!("fetching {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            return Err(FetchError::NotFound(response.status().as_u16()));
        }

        response.text().await.map_err(classify_reqwest_error)
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
impl RecordSource for InvestSiteClient {
    async fn fetch_record(&self, ticker: &str) -> Result<RawRecord, FetchError> {
        let mut last_error = FetchError::Timeout;

        for attempt in 0..=self.retry_attempts {
            match self.get_page(ticker).await {
                Ok(body) => return extract::extract_record(ticker, &body),
                Err(e) if e.is_retryable() => {
                    if attempt < self.retry_attempts {
                        warn!("attempt {} for {} failed: {}, retrying", attempt + 1, ticker, e);
                    }
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}
