//! Ports and process specifications
//!
//! A `ProcessSpec` owns two port trees, one for inputs and one for outputs.
//! Dotted names build nested namespaces; leaf ports are terminal.

use std::fmt::{self, Display};

use indexmap::IndexMap;

use crate::domain::{
    data::{Data, DataType},
    error::EngineError,
    inputs::{InputValue, ProcessInputs}
};

/// A named, typed declaration of one input or output slot
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub name:       String,
    /// Accepted capability types; empty accepts any value
    pub valid_type: Vec<DataType>,
    pub required:   Option<bool>,
    pub default:    Option<Data>,
    pub help:       Option<String>
}

impl Port {
    /// A port accepting any value
    pub fn new() -> Self {
        Self { name: String::new(), valid_type: Vec::new(), required: None, default: None, help: None }
    }

    /// A port accepting a single type
    pub fn of(data_type: DataType) -> Self {
        Self::new().valid_type(data_type)
    }

    pub fn valid_type(mut self, data_type: DataType) -> Self {
        if !self.valid_type.contains(&data_type) {
            self.valid_type.push(data_type);
        }
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn default(mut self, default: Data) -> Self {
        self.default = Some(default);
        self
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    /// Required unless explicitly declared otherwise or a default exists
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(self.default.is_none())
    }

    pub fn accepts(&self, data: &Data) -> bool {
        self.valid_type.is_empty() || self.valid_type.contains(&data.data_type())
    }

    /// Type check used by both the builder and spec validation
    pub fn check(&self, path: &str, data: &Data) -> Result<(), EngineError> {
        if self.accepts(data) {
            return Ok(());
        }
        Err(EngineError::Value(format!(
            "invalid type for port '{}': expected {}, got {}",
            path,
            self.type_names(),
            data.data_type()
        )))
    }

    pub fn type_names(&self) -> String {
        if self.valid_type.is_empty() {
            return "Any".to_string();
        }
        self.valid_type.iter().map(ToString::to_string).collect::<Vec<_>>().join(" | ")
    }
}

impl Default for Port {
    fn default() -> Self {
        Self::new()
    }
}

/// Documentation form of a port, shown as the builder attribute help
impl Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.type_names())?;
        if self.is_required() {
            write!(f, ", required")?;
        } else {
            write!(f, ", optional")?;
        }
        if let Some(default) = &self.default {
            write!(f, ", default={}", default)?;
        }
        if let Some(help) = &self.help {
            write!(f, " - {}", help)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortEntry {
    Port(Port),
    Namespace(PortNamespace)
}

impl PortEntry {
    pub fn as_port(&self) -> Option<&Port> {
        match self {
            PortEntry::Port(port) => Some(port),
            PortEntry::Namespace(_) => None
        }
    }

    pub fn as_namespace(&self) -> Option<&PortNamespace> {
        match self {
            PortEntry::Namespace(namespace) => Some(namespace),
            PortEntry::Port(_) => None
        }
    }
}

/// An ordered, named group of ports
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortNamespace {
    pub name:    String,
    pub help:    Option<String>,
    /// Accept undeclared keys without validating them
    pub dynamic: bool,
    ports:       IndexMap<String, PortEntry>
}

impl PortNamespace {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), help: None, dynamic: false, ports: IndexMap::new() }
    }

    fn qualified(&self, name: &str) -> String {
        if self.name.is_empty() { name.to_string() } else { format!("{}.{}", self.name, name) }
    }

    /// Register a port, auto-creating namespaces for dotted names
    pub fn add_port(&mut self, path: &str, mut port: Port) -> Result<(), EngineError> {
        match path.split_once('.') {
            None => {
                if self.ports.contains_key(path) {
                    return Err(EngineError::Value(format!("port '{}' is already defined", self.qualified(path))));
                }
                port.name = path.to_string();
                self.ports.insert(path.to_string(), PortEntry::Port(port));
                Ok(())
            }
            Some((head, rest)) => {
                let qualified = self.qualified(head);
                let entry = self
                    .ports
                    .entry(head.to_string())
                    .or_insert_with(|| PortEntry::Namespace(PortNamespace::new(&qualified)));
                match entry {
                    PortEntry::Namespace(namespace) => namespace.add_port(rest, port),
                    PortEntry::Port(_) => Err(EngineError::Value(format!(
                        "port '{}' is a leaf and cannot contain '{}'",
                        qualified, rest
                    )))
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&PortEntry> {
        self.ports.get(name)
    }

    pub fn get_path(&self, path: &str) -> Option<&PortEntry> {
        let mut segments = path.split('.');
        let mut current = self.ports.get(segments.next()?)?;
        for segment in segments {
            current = current.as_namespace()?.ports.get(segment)?;
        }
        Some(current)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &PortEntry)> {
        self.ports.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.ports.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Check an input mapping against this namespace
    ///
    /// Every required leaf must be present and every present value must be
    /// of an accepted type. Errors name the offending port by dotted path.
    pub fn validate(&self, inputs: &ProcessInputs) -> Result<(), EngineError> {
        for (key, value) in inputs.iter() {
            let path = self.qualified(key);
            match (self.ports.get(key), value) {
                (None, _) if self.dynamic => {}
                (None, _) => {
                    return Err(EngineError::Validation(format!("unexpected input '{}' is not a declared port", path)));
                }
                (Some(PortEntry::Port(port)), InputValue::Data(data)) => {
                    port.check(&path, data).map_err(|e| EngineError::Validation(e.to_string()))?;
                }
                (Some(PortEntry::Port(_)), InputValue::Namespace(_)) => {
                    return Err(EngineError::Validation(format!("port '{}' expects a value, not a namespace", path)));
                }
                (Some(PortEntry::Namespace(_)), InputValue::Data(_)) => {
                    return Err(EngineError::Validation(format!("port '{}' is a namespace, not a value", path)));
                }
                (Some(PortEntry::Namespace(namespace)), InputValue::Namespace(nested)) => {
                    namespace.validate(nested)?;
                }
            }
        }

        let empty = ProcessInputs::new();
        for (name, entry) in &self.ports {
            match entry {
                PortEntry::Port(port) if port.is_required() && !inputs.contains(name) => {
                    return Err(EngineError::Validation(format!(
                        "required value was not provided for '{}'",
                        self.qualified(name)
                    )));
                }
                PortEntry::Port(_) => {}
                PortEntry::Namespace(namespace) => {
                    if !inputs.contains(name) {
                        namespace.validate(&empty)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Insert declared defaults for every port missing from `inputs`
    pub fn apply_defaults(&self, inputs: &mut ProcessInputs) {
        for (name, entry) in &self.ports {
            match entry {
                PortEntry::Port(port) => {
                    if let (false, Some(default)) = (inputs.contains(name), &port.default) {
                        inputs.insert(name, default.clone());
                    }
                }
                PortEntry::Namespace(namespace) => {
                    let mut nested = match inputs.remove(name) {
                        Some(InputValue::Namespace(nested)) => nested,
                        Some(other) => {
                            inputs.insert(name, other);
                            continue;
                        }
                        None => ProcessInputs::new()
                    };
                    namespace.apply_defaults(&mut nested);
                    if !nested.is_empty() {
                        inputs.insert(name, nested);
                    }
                }
            }
        }
    }
}

/// Input and output declarations of a process class
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    inputs:  PortNamespace,
    outputs: PortNamespace
}

impl ProcessSpec {
    /// A spec with the base `label` and `description` inputs every process accepts
    pub fn new() -> Self {
        let mut inputs = PortNamespace::new("");
        let base = [("label", "Label of the process node"), ("description", "Description of the process node")];
        for (name, help) in base {
            inputs.ports.insert(
                name.to_string(),
                PortEntry::Port(Port {
                    name:       name.to_string(),
                    valid_type: vec![DataType::Str],
                    required:   Some(false),
                    default:    None,
                    help:       Some(help.to_string())
                })
            );
        }
        Self { inputs, outputs: PortNamespace::new("") }
    }

    pub fn input(&mut self, path: &str, port: Port) -> Result<&mut Self, EngineError> {
        self.inputs.add_port(path, port)?;
        Ok(self)
    }

    pub fn output(&mut self, path: &str, port: Port) -> Result<&mut Self, EngineError> {
        self.outputs.add_port(path, port)?;
        Ok(self)
    }

    /// Mark the top-level input namespace dynamic
    pub fn dynamic_inputs(&mut self) -> &mut Self {
        self.inputs.dynamic = true;
        self
    }

    pub fn inputs(&self) -> &PortNamespace {
        &self.inputs
    }

    pub fn outputs(&self) -> &PortNamespace {
        &self.outputs
    }

    /// Apply defaults and validate; the result is the immutable input mapping
    pub fn prepare_inputs(&self, mut inputs: ProcessInputs) -> Result<ProcessInputs, EngineError> {
        self.inputs.apply_defaults(&mut inputs);
        self.inputs.validate(&inputs)?;
        Ok(inputs)
    }

    pub fn validate_inputs(&self, inputs: &ProcessInputs) -> Result<(), EngineError> {
        self.inputs.validate(inputs)
    }

    /// Check a single emitted output against its declared port
    pub fn validate_output(&self, name: &str, data: &Data) -> Result<(), EngineError> {
        match self.outputs.get_path(name) {
            Some(PortEntry::Port(port)) => port.check(name, data).map_err(|e| EngineError::Validation(e.to_string())),
            Some(PortEntry::Namespace(_)) => {
                Err(EngineError::Validation(format!("output '{}' is a namespace, not a value", name)))
            }
            None if self.outputs.dynamic => Ok(()),
            None => Err(EngineError::Validation(format!("output '{}' is not a declared output port", name)))
        }
    }

    /// Names of required output ports absent from `emitted`
    pub fn missing_outputs(&self, emitted: &IndexMap<String, Data>) -> Vec<String> {
        self.outputs
            .entries()
            .filter_map(|(name, entry)| entry.as_port().map(|port| (name, port)))
            .filter(|(name, port)| port.is_required() && !emitted.contains_key(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_spec() -> ProcessSpec {
        let mut spec = ProcessSpec::new();
        spec.input("a", Port::of(DataType::Int))
            .unwrap()
            .input("b", Port::of(DataType::Float))
            .unwrap()
            .input("c.d", Port::of(DataType::Bool))
            .unwrap()
            .input("e", Port::of(DataType::Int).default(Data::Int(256)))
            .unwrap();
        spec
    }

    #[test]
    fn test_dotted_names_build_a_tree() {
        let spec = scenario_spec();
        assert!(spec.inputs().get("c").and_then(PortEntry::as_namespace).is_some());
        assert!(spec.inputs().get_path("c.d").and_then(PortEntry::as_port).is_some());
        assert!(spec.inputs().get("c.d").is_none());
    }

    #[test]
    fn test_duplicate_and_nested_leaf_are_value_errors() {
        let mut spec = scenario_spec();
        assert!(matches!(spec.input("a", Port::new()), Err(EngineError::Value(_))));
        assert!(matches!(spec.input("c.d", Port::new()), Err(EngineError::Value(_))));
        assert!(matches!(spec.input("a.x", Port::new()), Err(EngineError::Value(_))));
    }

    #[test]
    fn test_prepare_inputs_applies_defaults() {
        let spec = scenario_spec();
        let mut inputs = ProcessInputs::new().with("a", Data::Int(2)).with("b", Data::Float(2.3));
        inputs.insert_path("c.d", Data::Bool(true)).unwrap();

        let prepared = spec.prepare_inputs(inputs).unwrap();
        assert_eq!(prepared.data("e"), Some(&Data::Int(256)));
    }

    #[test]
    fn test_validation_names_the_offending_port() {
        let spec = scenario_spec();

        let missing = ProcessInputs::new().with("a", Data::Int(2)).with("b", Data::Float(2.3));
        let err = spec.prepare_inputs(missing).unwrap_err();
        assert!(matches!(&err, EngineError::Validation(msg) if msg.contains("c.d")));

        let mut wrong = ProcessInputs::new().with("a", Data::Float(2.0)).with("b", Data::Float(2.3));
        wrong.insert_path("c.d", Data::Bool(true)).unwrap();
        let err = spec.prepare_inputs(wrong).unwrap_err();
        assert!(matches!(&err, EngineError::Validation(msg) if msg.contains("'a'")));
    }

    #[test]
    fn test_port_display_documents_the_port() {
        let spec = scenario_spec();
        let port = spec.inputs().get("e").and_then(PortEntry::as_port).unwrap();
        assert_eq!(port.to_string(), "e: Int, optional, default=256");
        assert!(!port.is_required());
    }
}
