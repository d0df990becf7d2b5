//! Codes: executables that calculation jobs wrap
//!
//! A code either lives on a computer at an absolute path, or is a folder
//! stored alongside the repository together with the relative path of the
//! executable inside it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeLocation {
    Remote { computer: u64, remote_exec_path: PathBuf },
    Local { folder: PathBuf, rel_path: PathBuf }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub label:        String,
    pub description:  String,
    pub input_plugin: String,
    pub location:     CodeLocation,
    pub prepend_text: String,
    pub append_text:  String,
    pub hidden:       bool
}

impl Code {
    pub fn remote(label: &str, input_plugin: &str, computer: u64, remote_exec_path: impl Into<PathBuf>) -> Self {
        Self::with_location(label, input_plugin, CodeLocation::Remote {
            computer,
            remote_exec_path: remote_exec_path.into()
        })
    }

    pub fn local(label: &str, input_plugin: &str, folder: impl Into<PathBuf>, rel_path: impl Into<PathBuf>) -> Self {
        let location = CodeLocation::Local { folder: folder.into(), rel_path: rel_path.into() };
        Self::with_location(label, input_plugin, location)
    }

    fn with_location(label: &str, input_plugin: &str, location: CodeLocation) -> Self {
        Self {
            label: label.to_string(),
            description: String::new(),
            input_plugin: input_plugin.to_string(),
            location,
            prepend_text: String::new(),
            append_text: String::new(),
            hidden: false
        }
    }

    pub fn computer(&self) -> Option<u64> {
        match &self.location {
            CodeLocation::Remote { computer, .. } => Some(*computer),
            CodeLocation::Local { .. } => None
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.location, CodeLocation::Remote { .. })
    }

    /// `label@computer` for remote codes, the bare label otherwise
    pub fn full_label(&self, computer_name: Option<&str>) -> String {
        match computer_name {
            Some(name) if self.is_remote() => format!("{}@{}", self.label, name),
            _ => self.label.clone()
        }
    }

    /// Path of the executable to launch
    pub fn executable(&self) -> PathBuf {
        match &self.location {
            CodeLocation::Remote { remote_exec_path, .. } => remote_exec_path.clone(),
            CodeLocation::Local { folder, rel_path } => folder.join(rel_path)
        }
    }

    /// Apply a new label; `label@computer` is only accepted for the code's own computer
    pub fn relabel(&mut self, new_label: &str, computer_name: Option<&str>) -> Result<(), EngineError> {
        let label = match new_label.split_once('@') {
            None => new_label,
            Some((label, computer)) => match computer_name {
                Some(own) if own == computer && self.is_remote() => label,
                _ => {
                    return Err(EngineError::Value(format!(
                        "code '{}' is not installed on computer '{}'",
                        self.label, computer
                    )));
                }
            }
        };

        if label.is_empty() {
            return Err(EngineError::Value("code label must not be empty".to_string()));
        }
        self.label = label.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relabel_accepts_own_computer_only() {
        let mut code = Code::remote("code", "core.arithmetic.add", 1, "/remote/abs/path");

        code.relabel("new_code", Some("comp")).unwrap();
        assert_eq!(code.label, "new_code");

        code.relabel("newer_code@comp", Some("comp")).unwrap();
        assert_eq!(code.label, "newer_code");

        assert!(matches!(code.relabel("x@otherstuff", Some("comp")), Err(EngineError::Value(_))));
        assert_eq!(code.label, "newer_code");
    }

    #[test]
    fn test_full_label_and_executable() {
        let remote = Code::remote("code", "core.arithmetic.add", 1, "/remote/abs/path");
        assert_eq!(remote.full_label(Some("comp")), "code@comp");
        assert_eq!(remote.executable(), PathBuf::from("/remote/abs/path"));

        let local = Code::local("upload", "core.arithmetic.add", "/tmp/folder", "run.sh");
        assert_eq!(local.full_label(Some("comp")), "upload");
        assert_eq!(local.executable(), PathBuf::from("/tmp/folder/run.sh"));
    }
}
