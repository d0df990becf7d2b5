use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    path::PathBuf
};

use serde::{Deserialize, Serialize};

use crate::domain::error::EngineError;

pub const TRANSPORT_LOCAL: &str = "local";
pub const SCHEDULER_DIRECT: &str = "direct";

/// Descriptor of a machine that calculation jobs run on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computer {
    pub name:             String,
    pub hostname:         String,
    pub description:      String,
    pub enabled:          bool,
    pub transport_type:   String,
    pub scheduler_type:   String,
    pub transport_params: BTreeMap<String, serde_json::Value>,
    pub workdir:          Option<PathBuf>,
    pub prepend_text:     String,
    pub append_text:      String
}

impl Computer {
    pub fn new(name: &str, hostname: &str) -> Self {
        Self {
            name:             name.to_string(),
            hostname:         hostname.to_string(),
            description:      String::new(),
            enabled:          true,
            transport_type:   TRANSPORT_LOCAL.to_string(),
            scheduler_type:   SCHEDULER_DIRECT.to_string(),
            transport_params: BTreeMap::new(),
            workdir:          None,
            prepend_text:     String::new(),
            append_text:      String::new()
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_scheduler(mut self, transport_type: &str, scheduler_type: &str) -> Self {
        self.transport_type = transport_type.to_string();
        self.scheduler_type = scheduler_type.to_string();
        self
    }

    /// Base directory for job sandboxes on this computer
    pub fn get_workdir(&self) -> Result<&PathBuf, EngineError> {
        self.workdir
            .as_ref()
            .ok_or_else(|| EngineError::Configuration(format!("No workdir found for computer {}", self.name)))
    }
}

impl Display for Computer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.hostname)?;
        if !self.enabled {
            write!(f, " [DISABLED]")?;
        }
        Ok(())
    }
}
