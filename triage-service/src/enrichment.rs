use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use triage_flow::{Enricher, TransportError};

/// Enricher that posts the formatted conversation to a retrieval API
/// (`POST {"text": ...}`) and uses the response body as the passage.
pub struct HttpEnricher {
    client: Client,
    url: String,
}

impl HttpEnricher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, text: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| TransportError::Backend(format!("enrichment request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, %status, "Enrichment API returned an error status");
            return Err(TransportError::Backend(format!(
                "enrichment API returned {status}"
            )));
        }

        let passage = response
            .text()
            .await
            .map_err(|e| TransportError::Backend(format!("enrichment body unreadable: {e}")))?;
        info!(passage_len = passage.len(), "Enrichment passage received");
        Ok(passage)
    }
}
