//! Application wiring: configuration, stores, executor and registry

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    adapter::{
        engine::Runner,
        executor::DirectJobExecutor,
        storage::{StorageType, StoreFactory}
    },
    config::{AppConfig, load_config},
    domain::{error::EngineError, registry::ProcessRegistry},
    port::{checkpoint::CheckpointStore, executor::JobExecutor, repository::NodeRepository}
};

#[derive(Clone)]
pub struct AppContext {
    pub config:       AppConfig,
    pub registry:     Arc<ProcessRegistry>,
    pub repository:   Arc<dyn NodeRepository>,
    pub checkpoints:  Arc<dyn CheckpointStore>,
    pub executor:     Arc<dyn JobExecutor>,
    /// Cancelled on Ctrl-C; runners kill their processes when it fires
    pub cancellation: CancellationToken
}

impl AppContext {
    /// Build the context from the configuration file
    pub fn init() -> Result<Self, EngineError> {
        Self::from_config(load_config()?)
    }

    pub fn from_config(config: AppConfig) -> Result<Self, EngineError> {
        let db_path = match config.storage {
            StorageType::RocksDb => Some(config.database_path()?),
            StorageType::InMemory => None
        };
        let stores = StoreFactory::create(config.storage, db_path.as_deref())?;

        Ok(Self {
            config,
            registry: Arc::new(ProcessRegistry::with_builtins()?),
            repository: stores.repository,
            checkpoints: stores.checkpoints,
            executor: Arc::new(DirectJobExecutor::new()),
            cancellation: CancellationToken::new()
        })
    }

    /// Fully in-memory context, nothing survives the process
    pub fn in_memory() -> Result<Self, EngineError> {
        Self::from_config(AppConfig { storage: StorageType::InMemory, ..AppConfig::default() })
    }

    /// A runner over this context's stores
    pub fn runner(&self) -> Runner {
        Runner::new(self.registry.clone(), self.repository.clone(), self.checkpoints.clone(), self.executor.clone())
            .with_cancellation(self.cancellation.clone())
            .with_poll_interval(self.config.poll_interval())
    }
}
