use crate::domain::{error::EngineError, process::ProcessNode};

/// Port for durable process checkpoints, keyed by process pk
pub trait CheckpointStore: Send + Sync {
    /// Persist the node, replacing any earlier checkpoint of the same process
    fn save(&self, node: &ProcessNode) -> Result<(), EngineError>;

    /// Load a checkpoint; `NotExistent` if the process was never saved
    fn load(&self, pk: u64) -> Result<ProcessNode, EngineError>;

    fn delete(&self, pk: u64) -> Result<(), EngineError>;

    /// Every stored checkpoint, ordered by pk
    fn list(&self) -> Result<Vec<ProcessNode>, EngineError>;
}
