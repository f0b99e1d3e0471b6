//! Process-wide handles shared by every request
//!
//! The generative provider, both concurrency limits, the conversion
//! toolchain and the artifact store live here so that concurrent requests
//! contend for the same permits.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::brain::{CompletionProvider, OpenAIProvider, ProviderError};
use crate::config::DeckConfig;
use crate::converter::{SubprocessToolchain, Toolchain};
use crate::store::{ArtifactStore, LocalArtifactStore};
use crate::workflow::WorkflowCoordinator;

#[derive(Clone)]
pub struct Runtime {
    provider: Arc<dyn CompletionProvider>,
    toolchain: Arc<dyn Toolchain>,
    store: Arc<dyn ArtifactStore>,
    generation_permits: Arc<Semaphore>,
    conversion_permits: Arc<Semaphore>,
}

impl Runtime {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        toolchain: Arc<dyn Toolchain>,
        store: Arc<dyn ArtifactStore>,
        config: &DeckConfig,
    ) -> Self {
        Self {
            provider,
            toolchain,
            store,
            generation_permits: Arc::new(Semaphore::new(config.generation.global_permits.max(1))),
            conversion_permits: Arc::new(Semaphore::new(config.conversion.global_permits.max(1))),
        }
    }

    /// Production wiring: OpenAI-compatible provider, node toolchain, local store
    pub async fn from_config(config: &DeckConfig) -> Result<Self, ProviderError> {
        let provider = OpenAIProvider::new(config.llm.clone())?;
        let toolchain = SubprocessToolchain::from_config(&config.conversion)
            .with_node_path_detection()
            .await;
        let store = LocalArtifactStore::new(config.workflow.output_root.clone());

        tracing::info!(
            "[WORKFLOW] Runtime ready: {} generation permit(s), {} conversion permit(s), output in {}",
            config.generation.global_permits,
            config.conversion.global_permits,
            config.workflow.output_root.display()
        );

        Ok(Self::new(Arc::new(provider), Arc::new(toolchain), Arc::new(store), config))
    }

    pub fn coordinator(&self, config: &DeckConfig) -> WorkflowCoordinator {
        WorkflowCoordinator::new(self, config)
    }

    pub fn provider(&self) -> Arc<dyn CompletionProvider> {
        Arc::clone(&self.provider)
    }

    pub fn toolchain(&self) -> Arc<dyn Toolchain> {
        Arc::clone(&self.toolchain)
    }

    pub fn store(&self) -> Arc<dyn ArtifactStore> {
        Arc::clone(&self.store)
    }

    pub fn generation_permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.generation_permits)
    }

    pub fn conversion_permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.conversion_permits)
    }
}
