//! Stored nodes of the provenance graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use uuid::Uuid;

use crate::domain::{
    code::Code,
    computer::Computer,
    data::{Data, DataType},
    error::EngineError
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", content = "content", rename_all = "snake_case")]
pub enum NodeKind {
    Data(Data),
    Code(Code),
    Computer(Computer)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub pk:          u64,
    pub uuid:        String,
    pub label:       String,
    pub description: String,
    pub user:        String,
    pub created_at:  DateTime<Utc>,
    /// Content fingerprint, recomputed by `rehash`
    pub fingerprint: Option<String>,
    /// Process that produced this node
    pub created_by:  Option<u64>,
    pub kind:        NodeKind
}

impl StoredNode {
    pub fn new(pk: u64, label: &str, kind: NodeKind) -> Self {
        Self {
            pk,
            uuid: Uuid::new_v4().to_string(),
            label: label.to_string(),
            description: String::new(),
            user: whoami::username(),
            created_at: Utc::now(),
            fingerprint: None,
            created_by: None,
            kind
        }
    }

    pub fn data_type(&self) -> DataType {
        match &self.kind {
            NodeKind::Data(data) => data.data_type(),
            NodeKind::Code(_) => DataType::Code,
            NodeKind::Computer(_) => DataType::Computer
        }
    }

    /// Recompute the content fingerprint; returns true when it changed
    pub fn rehash(&mut self) -> Result<bool, EngineError> {
        let canonical = serde_json::to_value(&self.kind)?;
        let fingerprint = match &self.kind {
            NodeKind::Data(data) => data.fingerprint()?,
            _ => Data::Str(canonical.to_string()).fingerprint()?
        };
        let changed = self.fingerprint.as_deref() != Some(fingerprint.as_str());
        self.fingerprint = Some(fingerprint);
        Ok(changed)
    }

    pub fn as_data(&self) -> Option<&Data> {
        match &self.kind {
            NodeKind::Data(data) => Some(data),
            _ => None
        }
    }

    pub fn as_code(&self) -> Option<&Code> {
        match &self.kind {
            NodeKind::Code(code) => Some(code),
            _ => None
        }
    }

    pub fn as_code_mut(&mut self) -> Option<&mut Code> {
        match &mut self.kind {
            NodeKind::Code(code) => Some(code),
            _ => None
        }
    }

    pub fn as_computer(&self) -> Option<&Computer> {
        match &self.kind {
            NodeKind::Computer(computer) => Some(computer),
            _ => None
        }
    }

    pub fn row(&self) -> NodeRow {
        NodeRow {
            pk:          self.pk,
            uuid:        self.uuid.clone(),
            node_type:   self.data_type().to_string(),
            label:       self.label.clone(),
            created_by:  self.created_by.map(|pk| pk.to_string()).unwrap_or_default(),
            fingerprint: self.fingerprint.as_deref().map(|f| f[..f.len().min(12)].to_string()).unwrap_or_default()
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct NodeRow {
    #[tabled(rename = "PK")]
    pub pk:          u64,
    #[tabled(rename = "UUID")]
    pub uuid:        String,
    #[tabled(rename = "Type")]
    pub node_type:   String,
    #[tabled(rename = "Label")]
    pub label:       String,
    #[tabled(rename = "Created by")]
    pub created_by:  String,
    #[tabled(rename = "Fingerprint")]
    pub fingerprint: String
}
