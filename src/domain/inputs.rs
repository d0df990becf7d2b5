use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::domain::{data::Data, error::EngineError};

/// One entry of an input mapping: a leaf value or a nested namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputValue {
    Data(Data),
    Namespace(ProcessInputs)
}

impl InputValue {
    pub fn as_data(&self) -> Option<&Data> {
        match self {
            InputValue::Data(data) => Some(data),
            InputValue::Namespace(_) => None
        }
    }

    pub fn as_namespace(&self) -> Option<&ProcessInputs> {
        match self {
            InputValue::Namespace(namespace) => Some(namespace),
            InputValue::Data(_) => None
        }
    }
}

impl From<Data> for InputValue {
    fn from(data: Data) -> Self {
        InputValue::Data(data)
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        InputValue::Data(Data::from(value))
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        InputValue::Data(Data::from(value))
    }
}

impl From<f64> for InputValue {
    fn from(value: f64) -> Self {
        InputValue::Data(Data::from(value))
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        InputValue::Data(Data::from(value))
    }
}

impl From<ProcessInputs> for InputValue {
    fn from(namespace: ProcessInputs) -> Self {
        InputValue::Namespace(namespace)
    }
}

/// Immutable-once-submitted input mapping of a process
///
/// Equality ignores insertion order; insertion order is kept for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessInputs(IndexMap<String, InputValue>);

impl ProcessInputs {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Chaining insert, convenient for literals in tests and step functions
    pub fn with(mut self, name: &str, value: impl Into<InputValue>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<InputValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<InputValue> {
        self.0.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Resolve a dotted path such as `c.d`
    pub fn get_path(&self, path: &str) -> Option<&InputValue> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_namespace()?.0.get(segment)?;
        }
        Some(current)
    }

    /// Leaf value at a dotted path
    pub fn data(&self, path: &str) -> Option<&Data> {
        self.get_path(path).and_then(InputValue::as_data)
    }

    /// Insert a leaf at a dotted path, creating intermediate namespaces
    pub fn insert_path(&mut self, path: &str, data: Data) -> Result<(), EngineError> {
        match path.split_once('.') {
            None => {
                self.0.insert(path.to_string(), InputValue::Data(data));
                Ok(())
            }
            Some((head, rest)) => {
                let entry = self.0.entry(head.to_string()).or_insert_with(|| InputValue::Namespace(Self::new()));
                match entry {
                    InputValue::Namespace(namespace) => namespace.insert_path(rest, data),
                    InputValue::Data(_) => {
                        Err(EngineError::Value(format!("'{}' holds a value and cannot contain '{}'", head, rest)))
                    }
                }
            }
        }
    }

    /// Flatten to `(dotted path, value)` pairs in insertion order
    pub fn leaves(&self) -> Vec<(String, &Data)> {
        let mut leaves = Vec::new();
        for (name, value) in &self.0 {
            match value {
                InputValue::Data(data) => leaves.push((name.clone(), data)),
                InputValue::Namespace(namespace) => {
                    for (path, data) in namespace.leaves() {
                        leaves.push((format!("{}.{}", name, path), data));
                    }
                }
            }
        }
        leaves
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InputValue)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
