//! Application state shared by all handlers.
//!
//! One store backs both the code graph and the debug memory. The memory
//! and the retrieval engine are built once per repository scope and
//! shared by every session through `Arc`s.

use std::sync::Arc;
use std::time::Duration;

use graphmend_core::{Embedder, HashingEmbedder};
use graphmend_memory::DebugMemory;
use graphmend_retrieval::AgrEngine;
use graphmend_storage::{GraphStore, InMemoryStore, PatternStore, SqliteStore};

use crate::collaborators::{FixGenerator, Validator};
use crate::config::ServerConfig;
use crate::controller::Controller;
use crate::error::ApiError;
use crate::http_collaborators::{HttpFixGenerator, HttpValidator};
use crate::service::DebugService;

/// The fix generator and validator a session delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn FixGenerator>,
    pub validator: Arc<dyn Validator>,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DebugService>,
    pub graph: Arc<dyn GraphStore>,
    pub patterns: Arc<dyn PatternStore>,
    pub memory: Arc<DebugMemory>,
    pub engine: Arc<AgrEngine>,
    pub embedder: Arc<dyn Embedder>,
}

impl AppState {
    /// State backed by the SQLite database at `config.db_path`, with HTTP
    /// collaborators when both endpoints are configured.
    pub fn new(config: &ServerConfig) -> Result<Self, ApiError> {
        let store = Arc::new(SqliteStore::new(&config.db_path)?);
        let collaborators = match (&config.generator, &config.validator) {
            (Some(generator), Some(validator)) => Some(Collaborators {
                generator: Arc::new(HttpFixGenerator::new(generator.clone())),
                validator: Arc::new(HttpValidator::new(validator.clone())),
            }),
            _ => {
                tracing::warn!("fix generator or validator not configured; sessions are disabled");
                None
            }
        };
        Self::with_store(store, collaborators, config)
    }

    /// State over a fresh in-memory store (for testing).
    pub fn in_memory(
        collaborators: Option<Collaborators>,
        config: &ServerConfig,
    ) -> Result<Self, ApiError> {
        Self::with_store(Arc::new(InMemoryStore::new()), collaborators, config)
    }

    pub fn with_store<S>(
        store: Arc<S>,
        collaborators: Option<Collaborators>,
        config: &ServerConfig,
    ) -> Result<Self, ApiError>
    where
        S: GraphStore + PatternStore + 'static,
    {
        let graph: Arc<dyn GraphStore> = store.clone();
        let patterns: Arc<dyn PatternStore> = store;
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.embedding_dimension));

        let memory = Arc::new(DebugMemory::new(
            graph.clone(),
            patterns.clone(),
            config.memory.clone(),
        )?);
        let engine = Arc::new(
            AgrEngine::new(graph.clone(), embedder.clone(), config.retrieval.clone())?
                .with_pattern_hints(memory.clone()),
        );

        let controller = match collaborators {
            Some(Collaborators {
                generator,
                validator,
            }) => Some(Arc::new(Controller::new(
                engine.clone(),
                memory.clone(),
                generator,
                validator,
                config.controller.clone(),
            )?)),
            None => None,
        };

        Ok(AppState {
            service: Arc::new(DebugService::new(
                controller,
                Duration::from_secs(config.controller.session_retention_secs),
            )),
            graph,
            patterns,
            memory,
            engine,
            embedder,
        })
    }
}
