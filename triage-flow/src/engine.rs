use async_trait::async_trait;

use crate::error::TransportError;

/// Text-generation backend behind every stage.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, TransportError>;

    fn name(&self) -> &str {
        "reasoning-engine"
    }
}

/// Retrieval service that returns a supporting passage for the conversation.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, text: &str) -> Result<String, TransportError>;
}

/// Enricher used when no retrieval service is configured.
#[derive(Debug, Clone, Default)]
pub struct NoEnrichment;

#[async_trait]
impl Enricher for NoEnrichment {
    async fn enrich(&self, _text: &str) -> Result<String, TransportError> {
        Ok(String::new())
    }
}
