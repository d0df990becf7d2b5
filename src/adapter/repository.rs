//! Node repositories

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering}
    }
};

use rocksdb::DB;
use tracing::{Level, event};

use crate::{
    adapter::storage::scan_prefix,
    domain::{constant, error::EngineError, node::StoredNode},
    port::repository::NodeRepository
};

fn poisoned<T>(_: T) -> EngineError {
    EngineError::Storage("node repository lock poisoned".to_string())
}

fn missing(pk: u64) -> EngineError {
    EngineError::NotExistent(format!("no node with pk {}", pk))
}

#[derive(Debug)]
pub struct InMemoryNodeRepository {
    nodes:   RwLock<BTreeMap<u64, StoredNode>>,
    next_pk: AtomicU64
}

impl Default for InMemoryNodeRepository {
    fn default() -> Self {
        Self { nodes: RwLock::new(BTreeMap::new()), next_pk: AtomicU64::new(1) }
    }
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeRepository for InMemoryNodeRepository {
    fn next_pk(&self) -> Result<u64, EngineError> {
        Ok(self.next_pk.fetch_add(1, Ordering::SeqCst))
    }

    fn store(&self, node: &StoredNode) -> Result<(), EngineError> {
        let mut nodes = self.nodes.write().map_err(poisoned)?;
        if nodes.contains_key(&node.pk) {
            return Err(EngineError::DbContent(format!("a node with pk {} already exists", node.pk)));
        }
        nodes.insert(node.pk, node.clone());
        event!(Level::DEBUG, event = constant::store::NODE_STORED, pk = node.pk, node_type = %node.data_type());
        Ok(())
    }

    fn get(&self, pk: u64) -> Result<StoredNode, EngineError> {
        self.nodes.read().map_err(poisoned)?.get(&pk).cloned().ok_or_else(|| missing(pk))
    }

    fn update(&self, node: &StoredNode) -> Result<(), EngineError> {
        let mut nodes = self.nodes.write().map_err(poisoned)?;
        let slot = nodes.get_mut(&node.pk).ok_or_else(|| missing(node.pk))?;
        *slot = node.clone();
        Ok(())
    }

    fn delete(&self, pk: u64) -> Result<(), EngineError> {
        self.nodes.write().map_err(poisoned)?.remove(&pk).ok_or_else(|| missing(pk))?;
        event!(Level::DEBUG, event = constant::store::NODE_DELETED, pk = pk);
        Ok(())
    }

    fn all(&self) -> Result<Vec<StoredNode>, EngineError> {
        Ok(self.nodes.read().map_err(poisoned)?.values().cloned().collect())
    }
}

/// Node repository persisted in RocksDB
///
/// Storage layout:
/// - `node:{pk:020}` -> StoredNode (JSON)
/// - `seq:pk` -> u64 (last allocated pk)
pub struct RocksDbNodeRepository {
    db:       Arc<DB>,
    sequence: Mutex<()>
}

impl RocksDbNodeRepository {
    const PREFIX: &'static str = "node:";
    const SEQUENCE: &'static str = "seq:pk";

    pub fn from_db(db: Arc<DB>) -> Self {
        Self { db, sequence: Mutex::new(()) }
    }

    fn key(pk: u64) -> String {
        format!("{}{:020}", Self::PREFIX, pk)
    }

    fn exists(&self, pk: u64) -> Result<bool, EngineError> {
        Ok(self.db.get(Self::key(pk).as_bytes())?.is_some())
    }
}

impl NodeRepository for RocksDbNodeRepository {
    fn next_pk(&self) -> Result<u64, EngineError> {
        let _lock = self.sequence.lock().map_err(poisoned)?;
        let last = match self.db.get(Self::SEQUENCE.as_bytes())? {
            Some(data) => serde_json::from_slice::<u64>(&data)?,
            None => 0
        };
        let next = last + 1;
        self.db.put(Self::SEQUENCE.as_bytes(), serde_json::to_vec(&next)?)?;
        Ok(next)
    }

    fn store(&self, node: &StoredNode) -> Result<(), EngineError> {
        if self.exists(node.pk)? {
            return Err(EngineError::DbContent(format!("a node with pk {} already exists", node.pk)));
        }
        self.db.put(Self::key(node.pk).as_bytes(), serde_json::to_vec(node)?)?;
        event!(Level::DEBUG, event = constant::store::NODE_STORED, pk = node.pk, node_type = %node.data_type());
        Ok(())
    }

    fn get(&self, pk: u64) -> Result<StoredNode, EngineError> {
        match self.db.get(Self::key(pk).as_bytes())? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Err(missing(pk))
        }
    }

    fn update(&self, node: &StoredNode) -> Result<(), EngineError> {
        if !self.exists(node.pk)? {
            return Err(missing(node.pk));
        }
        self.db.put(Self::key(node.pk).as_bytes(), serde_json::to_vec(node)?)?;
        Ok(())
    }

    fn delete(&self, pk: u64) -> Result<(), EngineError> {
        if !self.exists(pk)? {
            return Err(missing(pk));
        }
        self.db.delete(Self::key(pk).as_bytes())?;
        event!(Level::DEBUG, event = constant::store::NODE_DELETED, pk = pk);
        Ok(())
    }

    fn all(&self) -> Result<Vec<StoredNode>, EngineError> {
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
    use crate::domain::{code::Code, computer::Computer, data::Data, node::NodeKind};

    fn seed(repository: &dyn NodeRepository) -> (u64, u64) {
        let pk = repository.next_pk().unwrap();
        let computer = StoredNode::new(pk, "localhost", NodeKind::Computer(Computer::new("localhost", "localhost")));
        repository.store(&computer).unwrap();

        let code_pk = repository.next_pk().unwrap();
        let code = Code::remote("bash", "core.templatereplacer", computer.pk, "/bin/bash");
        repository.store(&StoredNode::new(code_pk, "bash", NodeKind::Code(code))).unwrap();
        (computer.pk, code_pk)
    }

    fn exercise(repository: &dyn NodeRepository) {
        let (computer_pk, code_pk) = seed(repository);
        assert!(code_pk > computer_pk);

        assert_eq!(repository.find_computer("localhost").unwrap().0.pk, computer_pk);
        assert_eq!(repository.find_code("bash").unwrap().0.pk, code_pk);
        assert_eq!(repository.find_code("bash@localhost").unwrap().0.pk, code_pk);
        assert_eq!(repository.find_code(&code_pk.to_string()).unwrap().0.pk, code_pk);
        assert!(matches!(repository.find_code("bash@elsewhere"), Err(EngineError::NotExistent(_))));
        assert!(matches!(repository.find_code("missing"), Err(EngineError::NotExistent(_))));

        let uuid = repository.get(code_pk).unwrap().uuid;
        assert_eq!(repository.resolve_identifier(&uuid).unwrap().pk, code_pk);

        let duplicate_pk = repository.next_pk().unwrap();
        let duplicate = Code::remote("bash", "core.templatereplacer", computer_pk, "/usr/bin/bash");
        repository.store(&StoredNode::new(duplicate_pk, "bash", NodeKind::Code(duplicate))).unwrap();
        assert!(matches!(repository.find_code("bash"), Err(EngineError::DbContent(_))));

        let data_pk = repository.next_pk().unwrap();
        let mut data = StoredNode::new(data_pk, "", NodeKind::Data(Data::Int(1)));
        repository.store(&data).unwrap();
        assert!(matches!(repository.store(&data), Err(EngineError::DbContent(_))));
        data.label = "one".into();
        repository.update(&data).unwrap();
        assert_eq!(repository.get(data_pk).unwrap().label, "one");

        repository.delete(data_pk).unwrap();
        assert!(matches!(repository.get(data_pk), Err(EngineError::NotExistent(_))));
        assert_eq!(repository.all().unwrap().len(), 3);
    }

    #[test]
    fn test_in_memory_repository() {
        exercise(&InMemoryNodeRepository::new());
    }

    #[test]
    fn test_rocksdb_repository() {
        let dir = TempDir::new().unwrap();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = Arc::new(DB::open(&opts, dir.path()).unwrap());
        exercise(&RocksDbNodeRepository::from_db(db));
    }
}
