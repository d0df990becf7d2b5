//! Process builder
//!
//! A mutable tree mirroring the input ports of a process spec. Every node is
//! either a leaf slot or a nested builder, both generated from the process spec up
//! front; nothing is resolved by name at run time except through the spec.
//!
//! Leaves hold `Unset`, the port `Default`, or an `Assigned` value. Reads see
//! defaults; equality with a plain mapping only sees assigned values.

use indexmap::IndexMap;

use crate::domain::{
    data::Data,
    error::EngineError,
    inputs::{InputValue, ProcessInputs},
    port::{PortEntry, PortNamespace, ProcessSpec}
};

#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    Unset,
    Default(Data),
    Assigned(Data)
}

impl LeafValue {
    fn value(&self) -> Option<&Data> {
        match self {
            LeafValue::Unset => None,
            LeafValue::Default(data) | LeafValue::Assigned(data) => Some(data)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuilderNode {
    Leaf(LeafValue),
    Namespace(ProcessBuilder)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessBuilder {
    process_type: String,
    ports:        PortNamespace,
    nodes:        IndexMap<String, BuilderNode>
}

impl ProcessBuilder {
    pub fn new(process_type: &str, spec: &ProcessSpec) -> Self {
        Self::from_namespace(process_type, spec.inputs())
    }

    fn from_namespace(process_type: &str, ports: &PortNamespace) -> Self {
        let nodes = ports
            .entries()
            .map(|(name, entry)| {
                let node = match entry {
                    PortEntry::Port(port) => match &port.default {
                        Some(default) => BuilderNode::Leaf(LeafValue::Default(default.clone())),
                        None => BuilderNode::Leaf(LeafValue::Unset)
                    },
                    PortEntry::Namespace(namespace) => {
                        BuilderNode::Namespace(ProcessBuilder::from_namespace(process_type, namespace))
                    }
                };
                (name.clone(), node)
            })
            .collect();

        Self { process_type: process_type.to_string(), ports: ports.clone(), nodes }
    }

    /// Registry name of the process class this builder launches
    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    fn qualified(&self, name: &str) -> String {
        if self.ports.name.is_empty() { name.to_string() } else { format!("{}.{}", self.ports.name, name) }
    }

    fn unknown(&self, name: &str) -> EngineError {
        EngineError::Attribute(format!("'{}' has no input port '{}'", self.process_type, self.qualified(name)))
    }

    /// All attribute names at this level, in declaration order
    pub fn names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// The nested builder for a namespace port; the same child on every call
    pub fn namespace(&self, name: &str) -> Result<&ProcessBuilder, EngineError> {
        match self.nodes.get(name) {
            Some(BuilderNode::Namespace(child)) => Ok(child),
            Some(BuilderNode::Leaf(_)) => {
                Err(EngineError::Attribute(format!("'{}' is a value port, not a namespace", self.qualified(name))))
            }
            None => Err(self.unknown(name))
        }
    }

    pub fn namespace_mut(&mut self, name: &str) -> Result<&mut ProcessBuilder, EngineError> {
        let qualified = self.qualified(name);
        let unknown = self.unknown(name);
        match self.nodes.get_mut(name) {
            Some(BuilderNode::Namespace(child)) => Ok(child),
            Some(BuilderNode::Leaf(_)) => {
                Err(EngineError::Attribute(format!("'{}' is a value port, not a namespace", qualified)))
            }
            None => Err(unknown)
        }
    }

    /// Current value of a leaf: the assigned value, else the declared default
    pub fn get(&self, name: &str) -> Result<Option<&Data>, EngineError> {
        match self.nodes.get(name) {
            Some(BuilderNode::Leaf(leaf)) => Ok(leaf.value()),
            Some(BuilderNode::Namespace(_)) => Err(EngineError::Attribute(format!(
                "'{}' is a namespace; read its leaves through namespace()",
                self.qualified(name)
            ))),
            None => Err(self.unknown(name))
        }
    }

    /// Assign a leaf; the value is type checked before anything changes
    pub fn set(&mut self, name: &str, value: impl Into<Data>) -> Result<&mut Self, EngineError> {
        let value = value.into();
        let port = match self.ports.get(name) {
            Some(PortEntry::Port(port)) => port,
            Some(PortEntry::Namespace(_)) => {
                return Err(EngineError::Attribute(format!(
                    "cannot assign to namespace '{}'; assign its leaves individually",
                    self.qualified(name)
                )));
            }
            None => return Err(self.unknown(name))
        };
        port.check(&self.qualified(name), &value)?;

        self.nodes.insert(name.to_string(), BuilderNode::Leaf(LeafValue::Assigned(value)));
        Ok(self)
    }

    /// Reset a leaf to its declared default, or to unset
    pub fn unset(&mut self, name: &str) -> Result<&mut Self, EngineError> {
        let reset = match self.ports.get(name) {
            Some(PortEntry::Port(port)) => match &port.default {
                Some(default) => LeafValue::Default(default.clone()),
                None => LeafValue::Unset
            },
            Some(PortEntry::Namespace(_)) => {
                return Err(EngineError::Attribute(format!("cannot unset namespace '{}'", self.qualified(name))));
            }
            None => return Err(self.unknown(name))
        };
        self.nodes.insert(name.to_string(), BuilderNode::Leaf(reset));
        Ok(self)
    }

    fn split_path<'a>(&self, path: &'a str) -> (Vec<&'a str>, &'a str) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let leaf = segments.pop().unwrap_or(path);
        (segments, leaf)
    }

    pub fn set_path(&mut self, path: &str, value: impl Into<Data>) -> Result<&mut Self, EngineError> {
        let (namespaces, leaf) = self.split_path(path);
        let mut current: &mut ProcessBuilder = self;
        for segment in namespaces {
            current = current.namespace_mut(segment)?;
        }
        current.set(leaf, value)?;
        Ok(self)
    }

    pub fn get_path(&self, path: &str) -> Result<Option<&Data>, EngineError> {
        let (namespaces, leaf) = self.split_path(path);
        let mut current = self;
        for segment in namespaces {
            current = current.namespace(segment)?;
        }
        current.get(leaf)
    }

    /// Documentation of an attribute: the string form of its port
    pub fn port_help(&self, path: &str) -> Result<String, EngineError> {
        match self.ports.get_path(path) {
            Some(PortEntry::Port(port)) => Ok(port.to_string()),
            Some(PortEntry::Namespace(namespace)) => {
                Ok(format!("{}: namespace [{}]", namespace.name, namespace.names().join(", ")))
            }
            None => Err(self.unknown(path))
        }
    }

    /// Assign every leaf of `inputs`; on any failure the builder is left untouched
    pub fn set_inputs(&mut self, inputs: &ProcessInputs) -> Result<&mut Self, EngineError> {
        let mut staged = self.clone();
        for (path, data) in inputs.leaves() {
            staged.set_path(&path, data.clone())?;
        }
        *self = staged;
        Ok(self)
    }

    /// Explicitly assigned values only; namespaces with nothing assigned are omitted
    pub fn assigned(&self) -> ProcessInputs {
        self.collect(false)
    }

    /// Assigned values plus defaults
    pub fn values(&self) -> ProcessInputs {
        self.collect(true)
    }

    fn collect(&self, with_defaults: bool) -> ProcessInputs {
        let mut inputs = ProcessInputs::new();
        for (name, node) in &self.nodes {
            match node {
                BuilderNode::Leaf(LeafValue::Assigned(data)) => inputs.insert(name, data.clone()),
                BuilderNode::Leaf(LeafValue::Default(data)) if with_defaults => inputs.insert(name, data.clone()),
                BuilderNode::Leaf(_) => {}
                BuilderNode::Namespace(child) => {
                    let nested = child.collect(with_defaults);
                    if !nested.is_empty() {
                        inputs.insert(name, InputValue::Namespace(nested));
                    }
                }
            }
        }
        inputs
    }

    /// Produce the validated, immutable input mapping for submission
    pub fn build(&self) -> Result<ProcessInputs, EngineError> {
        let inputs = self.values();
        self.ports.validate(&inputs)?;
        Ok(inputs)
    }
}

impl PartialEq<ProcessInputs> for ProcessBuilder {
    fn eq(&self, other: &ProcessInputs) -> bool {
        self.assigned() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{data::DataType, port::Port};

    fn builder() -> ProcessBuilder {
        let mut spec = ProcessSpec::new();
        spec.input("a", Port::of(DataType::Int).help("first operand")).unwrap();
        spec.input("b", Port::of(DataType::Float)).unwrap();
        spec.input("c.d", Port::of(DataType::Bool)).unwrap();
        spec.input("e", Port::of(DataType::Int).default(Data::Int(256))).unwrap();
        ProcessBuilder::new("test.scenario", &spec)
    }

    #[test]
    fn test_reading_unset_leaf_returns_default() {
        let builder = builder();
        assert_eq!(builder.get("e").unwrap(), Some(&Data::Int(256)));
        assert_eq!(builder.get("a").unwrap(), None);
    }

    #[test]
    fn test_wrong_type_leaves_builder_unchanged() {
        let mut builder = builder();
        builder.set("a", Data::Int(2)).unwrap();
        let before = builder.clone();

        let err = builder.set("a", Data::Str("two".into())).unwrap_err();
        assert!(matches!(err, EngineError::Value(_)));
        assert_eq!(builder, before);

        let err = builder.set_path("c.d", Data::Int(1)).unwrap_err();
        assert!(matches!(err, EngineError::Value(_)));
        assert_eq!(builder, before);
    }

    #[test]
    fn test_namespace_cannot_be_overwritten() {
        let mut builder = builder();
        builder.namespace_mut("c").unwrap().set("d", true).unwrap();

        for value in [Data::Bool(true), Data::Int(1), Data::Parameters(Default::default())] {
            assert!(matches!(builder.set("c", value), Err(EngineError::Attribute(_))));
        }
        assert_eq!(builder.get_path("c.d").unwrap(), Some(&Data::Bool(true)));
    }

    #[test]
    fn test_unknown_attribute() {
        let mut builder = builder();
        assert!(matches!(builder.set("z", 1i64), Err(EngineError::Attribute(_))));
        assert!(matches!(builder.get("z"), Err(EngineError::Attribute(_))));
        assert!(matches!(builder.namespace("a"), Err(EngineError::Attribute(_))));
        assert!(matches!(builder.set_path("c.x", true), Err(EngineError::Attribute(_))));
    }

    #[test]
    fn test_equality_excludes_unmodified_defaults() {
        let mut builder = builder();
        builder.set("a", 2i64).unwrap();
        builder.set_path("c.d", true).unwrap();

        let mut expected = ProcessInputs::new().with("a", Data::Int(2));
        expected.insert_path("c.d", Data::Bool(true)).unwrap();
        assert!(builder == expected);

        builder.set("e", 256i64).unwrap();
        assert!(builder != expected);
    }

    #[test]
    fn test_set_inputs_is_atomic() {
        let mut builder = builder();
        let mut inputs = ProcessInputs::new().with("a", Data::Int(3)).with("b", Data::Str("bad".into()));
        inputs.insert_path("c.d", Data::Bool(false)).unwrap();

        assert!(builder.set_inputs(&inputs).is_err());
        assert_eq!(builder.get("a").unwrap(), None);
    }

    #[test]
    fn test_names_and_help() {
        let builder = builder();
        assert_eq!(builder.names(), vec!["label", "description", "a", "b", "c", "e"]);
        assert_eq!(builder.port_help("a").unwrap(), "a: Int, required - first operand");
        assert_eq!(builder.port_help("c.d").unwrap(), "d: Bool, required");
    }
}
