//! HTTP request/reply strategy
//!
//! Posts the sample id to the analyzer-side HTTP endpoint and expects a
//! structured JSON reply instead of a wire message.

use crate::error::{AnalyzerError, Result};
use crate::io::config::TransportMode;
use crate::io::strategy::ExchangeStrategy;
use crate::protocol::{QueryMessage, ReplyPayload, StructuredReply, CBC_TEST_CODE};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// JSON-over-HTTP exchange strategy
pub struct HttpPollStrategy {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpPollStrategy {
    /// Create a strategy for `base_url` (e.g. `http://192.168.1.50:5100`)
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Http`] - The HTTP client could not be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    /// URL queries are posted to
    pub fn query_url(&self) -> String {
        format!("{}/query", self.base_url)
    }

    /// URL used for connectivity probes
    pub fn status_url(&self) -> String {
        format!("{}/status", self.base_url)
    }
}

#[async_trait]
impl ExchangeStrategy for HttpPollStrategy {
    fn mode(&self) -> TransportMode {
        TransportMode::HttpPoll
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn exchange(&mut self, query: &QueryMessage, _frame: &[u8]) -> Result<ReplyPayload> {
        let url = self.query_url();
        let body = serde_json::json!({
            "sampleId": query.sample_id,
            "testCode": CBC_TEST_CODE,
        });

        debug!(url = %url, sample_id = %query.sample_id, "Posting analyzer query");
        let resp = self.client.post(&url).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AnalyzerError::Http(format!(
                "{} returned status {}",
                url, status
            )));
        }

        let reply: StructuredReply = resp.json().await?;
        debug!(
            url = %url,
            results = reply.results.len(),
            "Received structured reply"
        );
        Ok(ReplyPayload::Structured(reply))
    }

    async fn probe(&mut self) -> Result<()> {
        let url = self.status_url();
        let status = self.client.get(&url).send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AnalyzerError::Http(format!("{} returned status {}", url, status)))
        }
    }

    async fn release(&mut self) {}
}
