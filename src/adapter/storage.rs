//! Storage backend selection and the shared RocksDB handle

use std::{path::Path, sync::Arc};

use rocksdb::{DB, Options};
use tracing::{Level, event};

use crate::{
    adapter::{
        checkpoint::{InMemoryCheckpointStore, RocksDbCheckpointStore},
        repository::{InMemoryNodeRepository, RocksDbNodeRepository}
    },
    domain::{constant, error::EngineError},
    port::{checkpoint::CheckpointStore, repository::NodeRepository}
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
pub enum StorageType {
    #[serde(rename = "inmemory")]
    #[value(name = "inmemory")]
    InMemory,
    #[serde(rename = "rocksdb")]
    #[value(name = "rocksdb")]
    RocksDb
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::InMemory => "inmemory",
            StorageType::RocksDb => "rocksdb"
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "inmemory" => Ok(StorageType::InMemory),
            "rocksdb" => Ok(StorageType::RocksDb),
            other => Err(format!("Unknown storage backend: {}", other))
        }
    }
}

/// Both stores of one session
#[derive(Clone)]
pub struct Stores {
    pub repository:  Arc<dyn NodeRepository>,
    pub checkpoints: Arc<dyn CheckpointStore>
}

/// Shared RocksDB instance holder
static DB_INSTANCE: once_cell::sync::OnceCell<Arc<DB>> = once_cell::sync::OnceCell::new();

/// Factory for the node repository and checkpoint store
pub struct StoreFactory;

impl StoreFactory {
    /// Creates both stores, opening the shared DB on first use
    pub fn create(store_type: StorageType, db_path: Option<&Path>) -> Result<Stores, EngineError> {
        match store_type {
            StorageType::InMemory => Ok(Stores {
                repository:  Arc::new(InMemoryNodeRepository::new()),
                checkpoints: Arc::new(InMemoryCheckpointStore::new())
            }),
            StorageType::RocksDb => {
                let path = db_path
                    .ok_or_else(|| EngineError::Configuration("a database path is required for rocksdb".to_string()))?;
                let db = Self::open(path)?;
                Ok(Stores {
                    repository:  Arc::new(RocksDbNodeRepository::from_db(db.clone())),
                    checkpoints: Arc::new(RocksDbCheckpointStore::from_db(db))
                })
            }
        }
    }

    fn open(path: &Path) -> Result<Arc<DB>, EngineError> {
        let db = DB_INSTANCE.get_or_try_init(|| {
            let mut opts = Options::default();
            opts.create_if_missing(true);
            opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
            let db = DB::open(&opts, path)
                .map(Arc::new)
                .map_err(|e| EngineError::Storage(format!("Failed to open RocksDB: {}", e)))?;
            event!(Level::DEBUG, event = constant::store::STORE_OPENED, path = %path.display());
            Ok::<_, EngineError>(db)
        })?;
        Ok(db.clone())
    }

    /// Gets the shared DB instance, if it was opened
    pub fn get_db() -> Option<Arc<DB>> {
        DB_INSTANCE.get().cloned()
    }
}

/// All values under `prefix`, in key order
pub(crate) fn scan_prefix(db: &DB, prefix: &str) -> Result<Vec<Vec<u8>>, EngineError> {
    let mut values = Vec::new();
    let iter = db.iterator(rocksdb::IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward));
    for item in iter {
        let (key, value) = item.map_err(|e| EngineError::Storage(format!("Failed to iterate RocksDB: {}", e)))?;
        if !key.starts_with(prefix.as_bytes()) {
            break;
        }
        values.push(value.to_vec());
    }
    Ok(values)
}
