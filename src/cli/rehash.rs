use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{Level, event};

use crate::{
    domain::{constant::store, data::DataType, error::EngineError, node::StoredNode},
    port::repository::NodeRepository
};

#[derive(Args, Debug, Clone, Default)]
pub struct RehashArgs {
    /// Only nodes of this data entry point, e.g. workchain.data:int
    #[arg(short = 'e', long)]
    pub entry_point: Option<String>,
    /// Pks or uuids of the nodes to rehash; every node when omitted
    pub identifiers: Vec<String>
}

fn progress_bar(len: u64) -> Result<ProgressBar, EngineError> {
    let progress = ProgressBar::new(len);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
            .map_err(|e| EngineError::Generic(format!("Failed to create progress style: {}", e)))?
    );
    progress.set_message("Rehashing");
    Ok(progress)
}

/// Recompute the fingerprints of the selected nodes
pub fn rehash(repository: &dyn NodeRepository, args: &RehashArgs) -> Result<String, EngineError> {
    let entry_point = args.entry_point.as_deref().map(DataType::from_entry_point).transpose()?;

    let candidates = if args.identifiers.is_empty() {
        repository.all()?
    } else {
        args.identifiers.iter().map(|identifier| repository.resolve_identifier(identifier)).collect::<Result<_, _>>()?
    };
    let nodes: Vec<StoredNode> =
        candidates.into_iter().filter(|node| entry_point.is_none_or(|ty| node.data_type() == ty)).collect();

    if nodes.is_empty() {
        return Err(EngineError::NotExistent("no matching nodes found".to_string()));
    }

    let total = nodes.len();
    let progress = progress_bar(total as u64)?;
    let mut changed = 0;
    for mut node in nodes {
        if node.rehash()? {
            changed += 1;
        }
        repository.update(&node)?;
        event!(Level::DEBUG, event = store::NODE_REHASHED, pk = node.pk);
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(format!("Rehashing {} nodes\n{} fingerprint(s) updated", total, changed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::repository::InMemoryNodeRepository,
        domain::{data::Data, node::NodeKind}
    };

    fn repository() -> InMemoryNodeRepository {
        let repository = InMemoryNodeRepository::new();
        for (label, data) in [("one", Data::Int(1)), ("half", Data::Float(0.5)), ("two", Data::Int(2))] {
            let pk = repository.next_pk().unwrap();
            repository.store(&StoredNode::new(pk, label, NodeKind::Data(data))).unwrap();
        }
        repository
    }

    #[test]
    fn test_rehash_by_entry_point() {
        let repository = repository();
        let args = RehashArgs { entry_point: Some("workchain.data:int".to_string()), ..RehashArgs::default() };

        let report = rehash(&repository, &args).unwrap();
        assert!(report.starts_with("Rehashing 2 nodes"));
        assert!(repository.get(1).unwrap().fingerprint.is_some());
        assert!(repository.get(2).unwrap().fingerprint.is_none());

        // Second pass finds nothing to update.
        assert!(rehash(&repository, &args).unwrap().ends_with("0 fingerprint(s) updated"));
    }

    #[test]
    fn test_rehash_selection_errors() {
        let repository = repository();

        let args = RehashArgs { identifiers: vec!["2".to_string()], entry_point: Some("workchain.data:int".into()) };
        assert!(matches!(rehash(&repository, &args), Err(EngineError::NotExistent(_))));

        let args = RehashArgs { entry_point: Some("bogus".to_string()), ..RehashArgs::default() };
        assert!(matches!(rehash(&repository, &args), Err(EngineError::Validation(_))));

        let args = RehashArgs { identifiers: vec!["99".to_string()], ..RehashArgs::default() };
        assert!(rehash(&repository, &args).is_err());
    }
}
