//! Checkpoint stores
//!
//! Checkpoints are the serde_json form of a `ProcessNode`.

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock}
};

use rocksdb::DB;
use tracing::{Level, event};

use crate::{
    adapter::storage::scan_prefix,
    domain::{constant, error::EngineError, process::ProcessNode},
    port::checkpoint::CheckpointStore
};

fn poisoned<T>(_: T) -> EngineError {
    EngineError::Storage("checkpoint store lock poisoned".to_string())
}

fn missing(pk: u64) -> EngineError {
    EngineError::NotExistent(format!("no checkpoint for process {}", pk))
}

/// Checkpoints held in memory, lost on exit
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<BTreeMap<u64, String>>
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw serialized checkpoint, for comparing snapshots
    pub fn raw(&self, pk: u64) -> Option<String> {
        self.checkpoints.read().ok().and_then(|checkpoints| checkpoints.get(&pk).cloned())
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, node: &ProcessNode) -> Result<(), EngineError> {
        let serialized = serde_json::to_string(node)?;
        self.checkpoints.write().map_err(poisoned)?.insert(node.pk, serialized);
        event!(Level::TRACE, event = constant::runner::CHECKPOINT_SAVED, pk = node.pk, state = %node.state);
        Ok(())
    }

    fn load(&self, pk: u64) -> Result<ProcessNode, EngineError> {
        let checkpoints = self.checkpoints.read().map_err(poisoned)?;
        let serialized = checkpoints.get(&pk).ok_or_else(|| missing(pk))?;
        Ok(serde_json::from_str(serialized)?)
    }

    fn delete(&self, pk: u64) -> Result<(), EngineError> {
        self.checkpoints.write().map_err(poisoned)?.remove(&pk);
        Ok(())
    }

    fn list(&self) -> Result<Vec<ProcessNode>, EngineError> {
        let checkpoints = self.checkpoints.read().map_err(poisoned)?;
        checkpoints.values().map(|serialized| serde_json::from_str(serialized).map_err(EngineError::from)).collect()
    }
}

/// Checkpoints persisted in RocksDB
///
/// Storage layout:
/// - `checkpoint:{pk:020}` -> ProcessNode (JSON)
pub struct RocksDbCheckpointStore {
    db: Arc<DB>
}

impl RocksDbCheckpointStore {
    const PREFIX: &'static str = "checkpoint:";

    pub fn from_db(db: Arc<DB>) -> Self {
        Self { db }
    }

    fn key(pk: u64) -> String {
        format!("{}{:020}", Self::PREFIX, pk)
    }
}

impl CheckpointStore for RocksDbCheckpointStore {
    fn save(&self, node: &ProcessNode) -> Result<(), EngineError> {
        let serialized = serde_json::to_vec(node)?;
        self.db.put(Self::key(node.pk).as_bytes(), serialized)?;
        event!(Level::TRACE, event = constant::runner::CHECKPOINT_SAVED, pk = node.pk, state = %node.state);
        Ok(())
    }

    fn load(&self, pk: u64) -> Result<ProcessNode, EngineError> {
        match self.db.get(Self::key(pk).as_bytes())? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Err(missing(pk))
        }
    }

    fn delete(&self, pk: u64) -> Result<(), EngineError> {
        self.db.delete(Self::key(pk).as_bytes())?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<ProcessNode>, EngineError> {
        scan_prefix(&self.db, Self::PREFIX)?
            .iter()
            .map(|data| serde_json::from_slice(data).map_err(EngineError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rocksdb::Options;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::{inputs::ProcessInputs, state::ProcessState};

    fn exercise(store: &dyn CheckpointStore) {
        let mut node = ProcessNode::new(7, "test", ProcessInputs::new(), None);
        store.save(&node).unwrap();
        node.state = ProcessState::Running;
        node.ip = 2;
        store.save(&node).unwrap();
        store.save(&ProcessNode::new(3, "other", ProcessInputs::new(), None)).unwrap();

        let loaded = store.load(7).unwrap();
        assert_eq!(loaded, node);
        assert_eq!(store.list().unwrap().iter().map(|n| n.pk).collect::<Vec<_>>(), vec![3, 7]);

        store.delete(7).unwrap();
        assert!(matches!(store.load(7), Err(EngineError::NotExistent(_))));
    }

    #[test]
    fn test_in_memory_checkpoints() {
        exercise(&InMemoryCheckpointStore::new());
    }

    #[test]
    fn test_rocksdb_checkpoints() {
        let dir = TempDir::new().unwrap();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = Arc::new(DB::open(&opts, dir.path()).unwrap());
        exercise(&RocksDbCheckpointStore::from_db(db));
    }
}
