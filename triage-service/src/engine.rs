use async_trait::async_trait;
use rig::{agent::Agent, client::CompletionClient, completion::Prompt, providers::openrouter};
use tracing::debug;

use triage_flow::{ReasoningEngine, TransportError};

/// Reasoning engine backed by an OpenRouter chat model.
pub struct RigEngine {
    agent: Agent<openrouter::CompletionModel>,
    model: String,
}

impl RigEngine {
    pub fn new(api_key: &str, model: &str) -> Self {
        let client = openrouter::Client::new(api_key);
        let agent = client.agent(model).build();
        Self {
            agent,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ReasoningEngine for RigEngine {
    async fn generate(&self, prompt: &str) -> Result<String, TransportError> {
        debug!(model = %self.model, prompt_len = prompt.len(), "Sending prompt");
        self.agent
            .prompt(prompt)
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
