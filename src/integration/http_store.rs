//! Lab-request store backed by the HMIS REST API

use crate::error::{AnalyzerError, Result};
use crate::integration::lab_request::{
    LabRequestId, LabRequestPatch, LabRequestRecord, LabRequestStore,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Default deadline for store calls
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// [`LabRequestStore`] over HTTP
///
/// `GET {base}/lab-requests/{id}` reads, `PATCH {base}/lab-requests/{id}`
/// writes the patch as JSON.
pub struct HttpLabRequestStore {
    base_url: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl HttpLabRequestStore {
    /// Create a store for the API rooted at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_STORE_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: None,
            client,
        })
    }

    /// Send `Authorization: Bearer <token>` with every call
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// URL of one lab request
    pub fn record_url(&self, id: &LabRequestId) -> String {
        format!("{}/lab-requests/{}", self.base_url, id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl LabRequestStore for HttpLabRequestStore {
    async fn get(&self, id: &LabRequestId) -> Result<Option<LabRequestRecord>> {
        let url = self.record_url(id);
        let resp = self.authorize(self.client.get(&url)).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.json().await?)),
            status => Err(AnalyzerError::Http(format!(
                "{} returned status {}",
                url, status
            ))),
        }
    }

    async fn update(&self, id: &LabRequestId, patch: LabRequestPatch) -> Result<()> {
        let url = self.record_url(id);
        debug!(url = %url, "Patching lab request");

        let resp = self
            .authorize(self.client.patch(&url))
            .json(&patch)
            .send()
            .await
            .map_err(|e| AnalyzerError::Persistence(format!("{}: {}", url, e)))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AnalyzerError::Persistence(format!(
                "{} returned status {}",
                url, status
            )))
        }
    }
}
