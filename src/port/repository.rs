use crate::domain::{
    code::Code,
    computer::Computer,
    error::EngineError,
    node::{NodeKind, StoredNode}
};

/// Port for the stored nodes of the provenance graph
///
/// Implementations provide storage; the lookups used by the command line
/// are built on top of `all()` as default methods.
pub trait NodeRepository: Send + Sync {
    /// Allocate the next primary key, shared by nodes and processes
    fn next_pk(&self) -> Result<u64, EngineError>;

    fn store(&self, node: &StoredNode) -> Result<(), EngineError>;

    fn get(&self, pk: u64) -> Result<StoredNode, EngineError>;

    fn update(&self, node: &StoredNode) -> Result<(), EngineError>;

    fn delete(&self, pk: u64) -> Result<(), EngineError>;

    /// Every stored node, ordered by pk
    fn all(&self) -> Result<Vec<StoredNode>, EngineError>;

    fn get_by_uuid(&self, uuid: &str) -> Result<StoredNode, EngineError> {
        let matches: Vec<StoredNode> = self.all()?.into_iter().filter(|node| node.uuid.starts_with(uuid)).collect();
        single(matches, &format!("node with uuid '{}'", uuid))
    }

    /// Resolve a pk, a uuid (or unique uuid prefix) to a node
    fn resolve_identifier(&self, identifier: &str) -> Result<StoredNode, EngineError> {
        match identifier.parse::<u64>() {
            Ok(pk) => self.get(pk),
            Err(_) => self.get_by_uuid(identifier)
        }
    }

    fn find_computer(&self, identifier: &str) -> Result<(StoredNode, Computer), EngineError> {
        if let Ok(pk) = identifier.parse::<u64>() {
            let node = self.get(pk)?;
            let computer = node
                .as_computer()
                .cloned()
                .ok_or_else(|| EngineError::NotExistent(format!("node {} is not a computer", pk)))?;
            return Ok((node, computer));
        }

        let matches: Vec<StoredNode> = self
            .all()?
            .into_iter()
            .filter(|node| node.as_computer().is_some_and(|computer| computer.name == identifier))
            .collect();
        let node = single(matches, &format!("computer with name '{}'", identifier))?;
        let computer = node
            .as_computer()
            .cloned()
            .ok_or_else(|| EngineError::NotExistent(format!("node {} is not a computer", node.pk)))?;
        Ok((node, computer))
    }

    /// Find a code by pk, `label` or `label@computer`
    fn find_code(&self, identifier: &str) -> Result<(StoredNode, Code), EngineError> {
        if let Ok(pk) = identifier.parse::<u64>() {
            let node = self.get(pk)?;
            let code =
                node.as_code().cloned().ok_or_else(|| EngineError::NotExistent(format!("node {} is not a code", pk)))?;
            return Ok((node, code));
        }

        let (label, computer) = match identifier.split_once('@') {
            Some((label, computer)) => (label, Some(self.find_computer(computer)?.0.pk)),
            None => (identifier, None)
        };

        let matches: Vec<StoredNode> = self
            .all()?
            .into_iter()
            .filter(|node| match &node.kind {
                NodeKind::Code(code) => code.label == label && (computer.is_none() || code.computer() == computer),
                _ => false
            })
            .collect();
        let node = single(matches, &format!("code with label '{}'", identifier))?;
        let code = node
            .as_code()
            .cloned()
            .ok_or_else(|| EngineError::NotExistent(format!("node {} is not a code", node.pk)))?;
        Ok((node, code))
    }

    /// Name of the computer a code is installed on, if any
    fn computer_name(&self, code: &Code) -> Result<Option<String>, EngineError> {
        match code.computer() {
            Some(pk) => Ok(self.get(pk)?.as_computer().map(|computer| computer.name.clone())),
            None => Ok(None)
        }
    }
}

fn single(mut matches: Vec<StoredNode>, what: &str) -> Result<StoredNode, EngineError> {
    match matches.len() {
        0 => Err(EngineError::NotExistent(format!("no {} found", what))),
        1 => Ok(matches.remove(0)),
        n => Err(EngineError::DbContent(format!("there are {} nodes matching {}", n, what)))
    }
}
