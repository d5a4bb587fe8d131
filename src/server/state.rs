use axum::extract::FromRef;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use crate::pipeline::PipelineOrchestrator;

use super::ServerConfig;

pub type GuardedPipeline = Arc<PipelineOrchestrator>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
    pub pipeline: GuardedPipeline,
}

impl ServerState {
    pub fn new(config: ServerConfig, pipeline: GuardedPipeline) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            started_at: Utc::now(),
            pipeline,
        }
    }
}

impl FromRef<ServerState> for GuardedPipeline {
    fn from_ref(input: &ServerState) -> Self {
        input.pipeline.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
