use anyhow::{Context, Result, anyhow};
use std::time::Duration;

use triage_flow::{MAX_RETRIES, PipelineConfig};

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 120;

/// Configuration for the triage service, read from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub openrouter_api_key: String,
    pub model: String,
    /// Postgres log store when set, in-memory otherwise.
    pub database_url: Option<String>,
    /// HTTP enrichment endpoint when set, no enrichment otherwise.
    pub enrichment_url: Option<String>,
    pub port: u16,
    pub max_retries: u32,
    pub stage_timeout: Duration,
    pub stages_file: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let openrouter_api_key = lookup("OPENROUTER_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("OPENROUTER_API_KEY environment variable is required"))?;

        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match optional("PORT") {
            Some(raw) => raw.parse::<u16>().context("PORT must be a port number")?,
            None => DEFAULT_PORT,
        };
        let max_retries = match optional("TRIAGE_MAX_RETRIES") {
            Some(raw) => raw
                .parse::<u32>()
                .context("TRIAGE_MAX_RETRIES must be a positive integer")?,
            None => MAX_RETRIES,
        };
        if max_retries == 0 {
            return Err(anyhow!("TRIAGE_MAX_RETRIES must be at least 1"));
        }
        let timeout_secs = match optional("TRIAGE_STAGE_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .context("TRIAGE_STAGE_TIMEOUT_SECS must be a number of seconds")?,
            None => DEFAULT_STAGE_TIMEOUT_SECS,
        };

        Ok(Self {
            openrouter_api_key,
            model: optional("TRIAGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            database_url: optional("DATABASE_URL"),
            enrichment_url: optional("ENRICHMENT_URL"),
            port,
            max_retries,
            stage_timeout: Duration::from_secs(timeout_secs),
            stages_file: optional("TRIAGE_STAGES_FILE"),
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_retries: self.max_retries,
            stage_timeout: self.stage_timeout,
            ..PipelineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServiceConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = config_from(&[("OPENROUTER_API_KEY", "sk-test")]).unwrap();

        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.stage_timeout, Duration::from_secs(120));
        assert!(config.database_url.is_none());
        assert!(config.enrichment_url.is_none());
    }

    #[test]
    fn missing_api_key_is_an_error() {
        assert!(config_from(&[("PORT", "8080")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("PORT", "8080"),
            ("TRIAGE_MAX_RETRIES", "5"),
            ("TRIAGE_STAGE_TIMEOUT_SECS", "30"),
            ("ENRICHMENT_URL", "http://chunks.local/api"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.max_retries, 5);
        assert_eq!(pipeline.stage_timeout, Duration::from_secs(30));
        assert_eq!(pipeline.history_window, 10);
        assert_eq!(config.enrichment_url.as_deref(), Some("http://chunks.local/api"));
    }

    #[test]
    fn zero_retries_is_rejected() {
        let err = config_from(&[("OPENROUTER_API_KEY", "k"), ("TRIAGE_MAX_RETRIES", "0")]);
        assert!(err.is_err());
    }
}
