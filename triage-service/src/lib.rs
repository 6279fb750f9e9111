pub mod config;
pub mod engine;
pub mod enrichment;
pub mod models;
pub mod service;
pub mod workflow;

pub use config::ServiceConfig;
pub use service::{AppState, build_router, create_app};
pub use workflow::build_triage_pipeline;
