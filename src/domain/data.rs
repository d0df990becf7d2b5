//! Data nodes
//!
//! The engine treats data values as opaque typed tokens: the only thing it
//! ever asks of a value is which capability type it carries. Storage format
//! belongs to the repository adapters.

use std::{
    collections::BTreeMap,
    fmt::{self, Display}
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::error::EngineError;

/// Entry point group under which data types are registered
pub const DATA_ENTRY_POINT_GROUP: &str = "workchain.data";

/// Capability tag of a data value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int,
    Float,
    Str,
    Parameters,
    Structure,
    Trajectory,
    Code,
    Computer
}

impl DataType {
    pub const ALL: [DataType; 9] = [
        DataType::Bool,
        DataType::Int,
        DataType::Float,
        DataType::Str,
        DataType::Parameters,
        DataType::Structure,
        DataType::Trajectory,
        DataType::Code,
        DataType::Computer
    ];

    /// Entry point name of this type
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Str => "str",
            DataType::Parameters => "parameters",
            DataType::Structure => "structure",
            DataType::Trajectory => "trajectory",
            DataType::Code => "code",
            DataType::Computer => "computer"
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }

    /// Full entry point string, e.g. `workchain.data:int`
    pub fn entry_point(&self) -> String {
        format!("{}:{}", DATA_ENTRY_POINT_GROUP, self.name())
    }

    /// Parse an entry point string of the form `<group>:<name>`
    pub fn from_entry_point(entry_point: &str) -> Result<Self, EngineError> {
        let (group, name) = entry_point.split_once(':').ok_or_else(|| {
            EngineError::Validation(format!(
                "invalid entry point '{}': expected the form '<group>:<name>'",
                entry_point
            ))
        })?;

        if group != DATA_ENTRY_POINT_GROUP {
            return Err(EngineError::Validation(format!(
                "invalid entry point group '{}': only '{}' is supported",
                group, DATA_ENTRY_POINT_GROUP
            )));
        }

        Self::from_name(name)
            .ok_or_else(|| EngineError::NotExistent(format!("no data entry point named '{}'", entry_point)))
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "Bool",
            DataType::Int => "Int",
            DataType::Float => "Float",
            DataType::Str => "Str",
            DataType::Parameters => "Parameters",
            DataType::Structure => "Structure",
            DataType::Trajectory => "Trajectory",
            DataType::Code => "Code",
            DataType::Computer => "Computer"
        };
        write!(f, "{}", name)
    }
}

/// Reference to a stored node used as a process input (codes and computers)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHandle {
    pub pk:    u64,
    pub label: String
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub symbol:   String,
    pub position: [f64; 3]
}

/// Periodic cell plus atomic sites
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureData {
    pub cell:  [[f64; 3]; 3],
    pub sites: Vec<Site>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub step:      u32,
    pub positions: Vec<[f64; 3]>
}

/// Sequence of atomic positions, one entry per optimisation step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryData {
    pub symbols: Vec<String>,
    pub steps:   Vec<TrajectoryStep>
}

/// A typed data value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Data {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Parameters(BTreeMap<String, serde_json::Value>),
    Structure(StructureData),
    Trajectory(TrajectoryData),
    Code(NodeHandle),
    Computer(NodeHandle)
}

impl Data {
    pub fn data_type(&self) -> DataType {
        match self {
            Data::Bool(_) => DataType::Bool,
            Data::Int(_) => DataType::Int,
            Data::Float(_) => DataType::Float,
            Data::Str(_) => DataType::Str,
            Data::Parameters(_) => DataType::Parameters,
            Data::Structure(_) => DataType::Structure,
            Data::Trajectory(_) => DataType::Trajectory,
            Data::Code(_) => DataType::Code,
            Data::Computer(_) => DataType::Computer
        }
    }

    /// Build a `Parameters` value from a JSON object
    pub fn parameters(value: serde_json::Value) -> Result<Self, EngineError> {
        match value {
            serde_json::Value::Object(map) => Ok(Data::Parameters(map.into_iter().collect())),
            other => Err(EngineError::Value(format!("parameters must be a JSON object, got '{}'", other)))
        }
    }

    /// Parse a command-line string as a value of the given type
    pub fn parse_as(data_type: DataType, raw: &str) -> Result<Self, EngineError> {
        let invalid = || EngineError::Value(format!("'{}' is not a valid {}", raw, data_type));

        match data_type {
            DataType::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Data::Bool(true)),
                "false" | "no" | "0" => Ok(Data::Bool(false)),
                _ => Err(invalid())
            },
            DataType::Int => raw.trim().parse().map(Data::Int).map_err(|_| invalid()),
            DataType::Float => raw.trim().parse().map(Data::Float).map_err(|_| invalid()),
            DataType::Str => Ok(Data::Str(raw.to_string())),
            DataType::Parameters => Self::parameters(serde_json::from_str(raw).map_err(|_| invalid())?),
            DataType::Structure => serde_json::from_str(raw).map(Data::Structure).map_err(|_| invalid()),
            DataType::Trajectory => serde_json::from_str(raw).map(Data::Trajectory).map_err(|_| invalid()),
            DataType::Code | DataType::Computer => Err(EngineError::Value(format!(
                "{} values are stored nodes and must be resolved by identifier",
                data_type
            )))
        }
    }

    /// Plain JSON form of the value, without the type tag
    pub fn to_json(&self) -> Result<serde_json::Value, EngineError> {
        let value = match self {
            Data::Bool(value) => serde_json::Value::from(*value),
            Data::Int(value) => serde_json::Value::from(*value),
            Data::Float(value) => serde_json::Value::from(*value),
            Data::Str(value) => serde_json::Value::from(value.as_str()),
            Data::Parameters(value) => serde_json::to_value(value)?,
            Data::Structure(value) => serde_json::to_value(value)?,
            Data::Trajectory(value) => serde_json::to_value(value)?,
            Data::Code(handle) | Data::Computer(handle) => serde_json::to_value(handle)?
        };
        Ok(value)
    }

    /// Stable content fingerprint: sha256 over the canonical JSON form
    pub fn fingerprint(&self) -> Result<String, EngineError> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Bool(value) => Some(*value),
            _ => None
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Data::Int(value) => Some(*value),
            _ => None
        }
    }

    /// Numeric view; integers widen to floats
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Data::Float(value) => Some(*value),
            Data::Int(value) => Some(*value as f64),
            _ => None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::Str(value) => Some(value),
            _ => None
        }
    }

    pub fn as_parameters(&self) -> Option<&BTreeMap<String, serde_json::Value>> {
        match self {
            Data::Parameters(value) => Some(value),
            _ => None
        }
    }

    pub fn as_code(&self) -> Option<&NodeHandle> {
        match self {
            Data::Code(handle) => Some(handle),
            _ => None
        }
    }

    pub fn as_computer(&self) -> Option<&NodeHandle> {
        match self {
            Data::Computer(handle) => Some(handle),
            _ => None
        }
    }
}

impl Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Bool(value) => write!(f, "{}", value),
            Data::Int(value) => write!(f, "{}", value),
            Data::Float(value) => write!(f, "{}", value),
            Data::Str(value) => write!(f, "{}", value),
            Data::Parameters(value) => {
                write!(f, "{}", serde_json::to_string(value).unwrap_or_else(|_| "{..}".to_string()))
            }
            Data::Structure(value) => write!(f, "Structure({} sites)", value.sites.len()),
            Data::Trajectory(value) => write!(f, "Trajectory({} steps)", value.steps.len()),
            Data::Code(handle) => write!(f, "Code<{}> {}", handle.pk, handle.label),
            Data::Computer(handle) => write!(f, "Computer<{}> {}", handle.pk, handle.label)
        }
    }
}

impl From<bool> for Data {
    fn from(value: bool) -> Self {
        Data::Bool(value)
    }
}

impl From<i64> for Data {
    fn from(value: i64) -> Self {
        Data::Int(value)
    }
}

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Data::Float(value)
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::Str(value.to_string())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::Str(value)
    }
}
