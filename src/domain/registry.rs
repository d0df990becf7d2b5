//! Process and parser registry
//!
//! Populated explicitly at start-up and queried by exact name.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;

use crate::domain::{
    builtin,
    error::EngineError,
    parser::{CalcInfo, Parser},
    process::ProcessClass
};

pub type ParserFactory = Arc<dyn Fn(&CalcInfo) -> Result<Box<dyn Parser>, EngineError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProcessRegistry {
    classes: IndexMap<String, ProcessClass>,
    parsers: IndexMap<String, ParserFactory>
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in process classes and parsers
    pub fn with_builtins() -> Result<Self, EngineError> {
        let mut registry = Self::new();
        builtin::register(&mut registry)?;
        Ok(registry)
    }

    pub fn register(&mut self, class: ProcessClass) -> Result<(), EngineError> {
        if self.classes.contains_key(&class.name) {
            return Err(EngineError::Value(format!("process class '{}' is already registered", class.name)));
        }
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    pub fn register_parser<F>(&mut self, name: &str, factory: F) -> Result<(), EngineError>
    where
        F: Fn(&CalcInfo) -> Result<Box<dyn Parser>, EngineError> + Send + Sync + 'static
    {
        if self.parsers.contains_key(name) {
            return Err(EngineError::Value(format!("parser '{}' is already registered", name)));
        }
        self.parsers.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<ProcessClass, EngineError> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotExistent(format!("no process class registered as '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Construct the named parser for a calculation
    pub fn parser(&self, name: &str, info: &CalcInfo) -> Result<Box<dyn Parser>, EngineError> {
        let factory = self
            .parsers
            .get(name)
            .ok_or_else(|| EngineError::NotExistent(format!("no parser registered as '{}'", name)))?;
        factory(info)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ProcessClass> {
        self.classes.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }
}

impl fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("parsers", &self.parsers.keys().collect::<Vec<_>>())
            .finish()
    }
}
