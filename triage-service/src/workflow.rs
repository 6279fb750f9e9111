use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use triage_flow::{
    Enricher, InMemoryLogStore, InMemoryQueryStore, LogStore, NoEnrichment, Pipeline,
    PostgresLogStore, PostgresQueryStore, QueryStore, ReasoningEngine, StageCatalog,
};

use crate::{config::ServiceConfig, engine::RigEngine, enrichment::HttpEnricher};

/// Wire the pipeline's collaborators from the service configuration.
pub async fn build_triage_pipeline(config: &ServiceConfig) -> anyhow::Result<Pipeline> {
    let engine: Arc<dyn ReasoningEngine> =
        Arc::new(RigEngine::new(&config.openrouter_api_key, &config.model));

    let enricher: Arc<dyn Enricher> = match &config.enrichment_url {
        Some(url) => {
            info!(%url, "Using HTTP enrichment");
            Arc::new(HttpEnricher::new(url.as_str(), config.stage_timeout)?)
        }
        None => Arc::new(NoEnrichment),
    };

    let (log, queries): (Arc<dyn LogStore>, Arc<dyn QueryStore>) = match &config.database_url {
        Some(url) => {
            let log = PostgresLogStore::connect(url)
                .await
                .context("failed to connect to the communication log database")?;
            let queries = PostgresQueryStore::from_pool(log.pool().clone())
                .await
                .context("failed to prepare the query record tables")?;
            (Arc::new(log), Arc::new(queries))
        }
        None => {
            info!("DATABASE_URL not set, keeping the communication log in memory");
            (
                Arc::new(InMemoryLogStore::new()),
                Arc::new(InMemoryQueryStore::new()),
            )
        }
    };

    let catalog = match &config.stages_file {
        Some(path) => StageCatalog::from_file(path)
            .with_context(|| format!("failed to load stage templates from {path}"))?,
        None => StageCatalog::default(),
    };

    Ok(Pipeline::builder(engine)
        .enricher(enricher)
        .log_store(log)
        .query_store(queries)
        .catalog(catalog)
        .config(config.pipeline_config())
        .build())
}
