//! Process classes, process nodes and the step execution context
//!
//! A `ProcessNode` is both the in-memory instance and its checkpoint: it is
//! serialized as-is whenever the process suspends, and everything needed to
//! resume (state, instruction pointer, context, pending awaitables, partial
//! outputs) lives on it. It deliberately carries no "last updated" stamp, so
//! saving an unchanged node twice produces the same checkpoint.

use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use tracing::{Level, event};
use uuid::Uuid;

use crate::{
    domain::{
        builder::ProcessBuilder,
        constant,
        data::Data,
        error::EngineError,
        inputs::ProcessInputs,
        job::{JobOutcome, JobRequest},
        port::ProcessSpec,
        registry::ProcessRegistry,
        stack::ProcessStack,
        state::ProcessState,
        workchain::{CompiledOutline, Outline}
    },
    port::{engine::Engine, repository::NodeRepository}
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Function,
    WorkChain,
    CalcJob
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::Function => write!(f, "function"),
            ProcessKind::WorkChain => write!(f, "workchain"),
            ProcessKind::CalcJob => write!(f, "calcjob")
        }
    }
}

/// An executable process definition: a spec plus a compiled outline
#[derive(Clone)]
pub struct ProcessClass {
    pub name:        String,
    pub kind:        ProcessKind,
    pub description: String,
    /// Registered parser used by calculation jobs
    pub parser:      Option<String>,
    spec:            Arc<ProcessSpec>,
    outline:         Arc<CompiledOutline>
}

impl ProcessClass {
    /// A process whose whole body is a single step
    pub fn function<F>(name: &str, spec: ProcessSpec, func: F) -> Self
    where
        F: Fn(&mut StepContext<'_>) -> Result<(), EngineError> + Send + Sync + 'static
    {
        Self::new(name, ProcessKind::Function, spec, Outline::new().step("run", func))
    }

    pub fn workchain(name: &str, spec: ProcessSpec, outline: Outline) -> Self {
        Self::new(name, ProcessKind::WorkChain, spec, outline)
    }

    pub fn new(name: &str, kind: ProcessKind, spec: ProcessSpec, outline: Outline) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: String::new(),
            parser: None,
            spec: Arc::new(spec),
            outline: Arc::new(outline.compile())
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_parser(mut self, parser: &str) -> Self {
        self.parser = Some(parser.to_string());
        self
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn outline(&self) -> &CompiledOutline {
        &self.outline
    }

    /// A fresh builder rooted at this class's input spec, defaults pre-filled
    pub fn get_builder(&self) -> ProcessBuilder {
        ProcessBuilder::new(&self.name, &self.spec)
    }
}

impl fmt::Debug for ProcessClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessClass")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("outline", &self.outline)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub kind:    String,
    pub message: String
}

impl From<&EngineError> for ExceptionRecord {
    fn from(err: &EngineError) -> Self {
        Self { kind: err.kind().to_string(), message: err.to_string() }
    }
}

impl fmt::Display for ExceptionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Terminal result of a child process as seen by its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildOutcome {
    pub pk:           u64,
    pub process_type: String,
    pub state:        ProcessState,
    pub outputs:      IndexMap<String, Data>,
    pub exception:    Option<ExceptionRecord>
}

impl ChildOutcome {
    pub fn from_node(node: &ProcessNode) -> Self {
        Self {
            pk:           node.pk,
            process_type: node.process_type.clone(),
            state:        node.state,
            outputs:      node.outputs.clone(),
            exception:    node.exception.clone()
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ProcessState::Finished
    }

    pub fn output(&self, name: &str) -> Option<&Data> {
        self.outputs.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    Data(Data),
    Child(ChildOutcome),
    Children(Vec<ChildOutcome>),
    Job(JobOutcome)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwaitTarget {
    Process(u64),
    Job(String)
}

/// A pending result the process waits for before its next step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Awaitable {
    pub key:    String,
    pub target: AwaitTarget,
    /// Append to a list under `key` instead of replacing it
    pub append: bool
}

/// Handle returned when a child process is submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
    pub pk: u64
}

/// Handle returned when an external job is submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessNode {
    pub pk:           u64,
    pub uuid:         String,
    pub process_type: String,
    pub state:        ProcessState,
    /// Instruction pointer into the compiled outline
    pub ip:           usize,
    pub inputs:       ProcessInputs,
    pub outputs:      IndexMap<String, Data>,
    /// Stored data nodes of the outputs, filled in on finish
    pub output_nodes: IndexMap<String, u64>,
    pub context:      IndexMap<String, ContextValue>,
    pub awaiting:     Vec<Awaitable>,
    pub parent:       Option<u64>,
    pub children:     Vec<u64>,
    pub exception:    Option<ExceptionRecord>,
    pub label:        Option<String>,
    pub description:  Option<String>,
    pub attributes:   BTreeMap<String, serde_json::Value>,
    pub reports:      Vec<String>,
    pub user:         String,
    pub created_at:   DateTime<Utc>
}

impl ProcessNode {
    pub fn new(pk: u64, process_type: &str, inputs: ProcessInputs, parent: Option<u64>) -> Self {
        let label = inputs.data("label").and_then(Data::as_str).map(str::to_string);
        let description = inputs.data("description").and_then(Data::as_str).map(str::to_string);

        Self {
            pk,
            uuid: Uuid::new_v4().to_string(),
            process_type: process_type.to_string(),
            state: ProcessState::Created,
            ip: 0,
            inputs,
            outputs: IndexMap::new(),
            output_nodes: IndexMap::new(),
            context: IndexMap::new(),
            awaiting: Vec::new(),
            parent,
            children: Vec::new(),
            exception: None,
            label,
            description,
            attributes: BTreeMap::new(),
            reports: Vec::new(),
            user: whoami::username(),
            created_at: Utc::now()
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: ProcessState) -> Result<(), EngineError> {
        self.state = self.state.transition(next)?;
        Ok(())
    }

    pub fn awaited_children(&self) -> Vec<u64> {
        self.awaiting
            .iter()
            .filter_map(|awaitable| match awaitable.target {
                AwaitTarget::Process(pk) => Some(pk),
                AwaitTarget::Job(_) => None
            })
            .collect()
    }

    pub fn awaited_jobs(&self) -> Vec<String> {
        self.awaiting
            .iter()
            .filter_map(|awaitable| match &awaitable.target {
                AwaitTarget::Job(job_id) => Some(job_id.clone()),
                AwaitTarget::Process(_) => None
            })
            .collect()
    }

    fn place(&mut self, key: String, append: bool, value: ContextValue) {
        if !append {
            self.context.insert(key, value);
            return;
        }
        let ContextValue::Child(outcome) = value else {
            self.context.insert(key, value);
            return;
        };
        match self.context.get_mut(&key) {
            Some(ContextValue::Children(list)) => list.push(outcome),
            _ => {
                self.context.insert(key, ContextValue::Children(vec![outcome]));
            }
        }
    }

    /// Record a terminal child in the context; returns whether anything was awaiting it
    pub fn resolve_child(&mut self, outcome: &ChildOutcome) -> bool {
        let (matched, pending): (Vec<_>, Vec<_>) =
            self.awaiting.drain(..).partition(|awaitable| awaitable.target == AwaitTarget::Process(outcome.pk));
        self.awaiting = pending;
        for awaitable in &matched {
            self.place(awaitable.key.clone(), awaitable.append, ContextValue::Child(outcome.clone()));
        }
        !matched.is_empty()
    }

    /// Record a finished external job in the context
    pub fn resolve_job(&mut self, outcome: &JobOutcome) -> bool {
        let target = AwaitTarget::Job(outcome.job_id.clone());
        let (matched, pending): (Vec<_>, Vec<_>) =
            self.awaiting.drain(..).partition(|awaitable| awaitable.target == target);
        self.awaiting = pending;
        for awaitable in &matched {
            self.place(awaitable.key.clone(), false, ContextValue::Job(outcome.clone()));
        }
        !matched.is_empty()
    }

    pub fn row(&self) -> ProcessRow {
        ProcessRow {
            pk:           self.pk,
            process_type: self.process_type.clone(),
            state:        self.state.to_string(),
            label:        self.label.clone().unwrap_or_default(),
            parent:       self.parent.map(|pk| pk.to_string()).unwrap_or_default(),
            created:      self.created_at.format("%Y-%m-%d %H:%M:%S").to_string()
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct ProcessRow {
    #[tabled(rename = "PK")]
    pub pk:           u64,
    #[tabled(rename = "Process")]
    pub process_type: String,
    #[tabled(rename = "State")]
    pub state:        String,
    #[tabled(rename = "Label")]
    pub label:        String,
    #[tabled(rename = "Parent")]
    pub parent:       String,
    #[tabled(rename = "Created")]
    pub created:      String
}

/// What a step function sees of its running process and of the engine
pub struct StepContext<'a> {
    node:   &'a mut ProcessNode,
    engine: &'a mut dyn Engine,
    spec:   &'a ProcessSpec,
    step:   String
}

impl<'a> StepContext<'a> {
    pub fn new(node: &'a mut ProcessNode, engine: &'a mut dyn Engine, spec: &'a ProcessSpec) -> Self {
        Self { node, engine, spec, step: String::new() }
    }

    pub(crate) fn ip(&self) -> usize {
        self.node.ip
    }

    pub(crate) fn set_ip(&mut self, ip: usize) {
        self.node.ip = ip;
    }

    pub(crate) fn enter_step(&mut self, name: &str) {
        self.step = name.to_string();
        event!(
            Level::DEBUG,
            event = constant::runner::STEP_STARTED,
            pk = self.node.pk,
            process_type = %self.node.process_type,
            step = %name
        );
    }

    pub fn is_awaiting(&self) -> bool {
        !self.node.awaiting.is_empty()
    }

    pub fn pk(&self) -> u64 {
        self.node.pk
    }

    pub fn node(&self) -> &ProcessNode {
        &*self.node
    }

    pub fn spec(&self) -> &ProcessSpec {
        self.spec
    }

    /// Name of the step currently executing
    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn inputs(&self) -> &ProcessInputs {
        &self.node.inputs
    }

    pub fn input(&self, path: &str) -> Option<&Data> {
        self.node.inputs.data(path)
    }

    pub fn require(&self, path: &str) -> Result<&Data, EngineError> {
        self.input(path)
            .ok_or_else(|| EngineError::Validation(format!("required value was not provided for '{}'", path)))
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.node.context.get(key)
    }

    pub fn data(&self, key: &str) -> Option<&Data> {
        match self.node.context.get(key) {
            Some(ContextValue::Data(data)) => Some(data),
            _ => None
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<Data>) {
        self.node.context.insert(key.to_string(), ContextValue::Data(value.into()));
    }

    pub fn child(&self, key: &str) -> Option<&ChildOutcome> {
        match self.node.context.get(key) {
            Some(ContextValue::Child(outcome)) => Some(outcome),
            _ => None
        }
    }

    pub fn children(&self, key: &str) -> &[ChildOutcome] {
        match self.node.context.get(key) {
            Some(ContextValue::Children(list)) => list,
            _ => &[]
        }
    }

    pub fn job(&self, key: &str) -> Option<&JobOutcome> {
        match self.node.context.get(key) {
            Some(ContextValue::Job(outcome)) => Some(outcome),
            _ => None
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.node.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: &str, value: serde_json::Value) {
        self.node.attributes.insert(key.to_string(), value);
    }

    /// Emit an output; it is checked against the declared output port right away
    pub fn out(&mut self, name: &str, value: impl Into<Data>) -> Result<(), EngineError> {
        let value = value.into();
        self.spec.validate_output(name, &value)?;
        self.node.outputs.insert(name.to_string(), value);
        Ok(())
    }

    pub fn outputs(&self) -> &IndexMap<String, Data> {
        &self.node.outputs
    }

    /// Launch a child asynchronously; pair with `to_context` to wait for it
    pub fn submit(&mut self, process_type: &str, inputs: ProcessInputs) -> Result<ChildHandle, EngineError> {
        let pk = self.engine.submit_child(self.node.pk, process_type, inputs)?;
        self.node.children.push(pk);
        Ok(ChildHandle { pk })
    }

    pub fn submit_builder(&mut self, builder: &ProcessBuilder) -> Result<ChildHandle, EngineError> {
        let inputs = builder.build()?;
        self.submit(builder.process_type(), inputs)
    }

    /// Suspend after this step until the child is terminal, then store it under `key`
    pub fn to_context(&mut self, key: &str, handle: ChildHandle) {
        self.node.awaiting.push(Awaitable {
            key:    key.to_string(),
            target: AwaitTarget::Process(handle.pk),
            append: false
        });
    }

    pub fn append_to_context(&mut self, key: &str, handle: ChildHandle) {
        self.node.awaiting.push(Awaitable {
            key:    key.to_string(),
            target: AwaitTarget::Process(handle.pk),
            append: true
        });
    }

    /// Run a child to completion inside this step
    pub fn run(&mut self, process_type: &str, inputs: ProcessInputs) -> Result<ChildOutcome, EngineError> {
        let child = self.engine.run_child(self.node.pk, process_type, inputs)?;
        self.node.children.push(child.pk);
        Ok(ChildOutcome::from_node(&child))
    }

    pub fn submit_job(&mut self, request: JobRequest) -> Result<JobHandle, EngineError> {
        let job_id = self.engine.submit_job(self.node.pk, request)?;
        Ok(JobHandle { job_id })
    }

    pub fn await_job(&mut self, key: &str, handle: JobHandle) {
        let target = AwaitTarget::Job(handle.job_id);
        self.node.awaiting.push(Awaitable { key: key.to_string(), target, append: false });
    }

    /// Log a message against this process
    pub fn report(&mut self, message: &str) {
        event!(
            Level::INFO,
            event = constant::runner::PROCESS_REPORT,
            pk = self.node.pk,
            step = %self.step,
            message = %message
        );
        self.node.reports.push(format!("[{}|{}] {}", self.node.pk, self.step, message));
    }

    pub fn repository(&self) -> Arc<dyn NodeRepository> {
        self.engine.repository()
    }

    pub fn registry(&self) -> Arc<ProcessRegistry> {
        self.engine.registry()
    }

    /// Processes currently executing, this one innermost
    pub fn stack(&self) -> ProcessStack {
        self.engine.stack()
    }

    pub fn is_cancelled(&self) -> bool {
        self.engine.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiting_node() -> ProcessNode {
        let mut node = ProcessNode::new(1, "test", ProcessInputs::new(), None);
        node.awaiting.push(Awaitable { key: "a".into(), target: AwaitTarget::Process(2), append: false });
        node.awaiting.push(Awaitable { key: "many".into(), target: AwaitTarget::Process(3), append: true });
        node.awaiting.push(Awaitable { key: "many".into(), target: AwaitTarget::Process(4), append: true });
        node
    }

    fn finished(pk: u64) -> ChildOutcome {
        ChildOutcome {
            pk,
            process_type: "child".into(),
            state: ProcessState::Finished,
            outputs: IndexMap::new(),
            exception: None
        }
    }

    #[test]
    fn test_resolve_child_fills_context() {
        let mut node = waiting_node();

        assert!(node.resolve_child(&finished(2)));
        assert!(!node.resolve_child(&finished(2)));
        assert!(matches!(node.context.get("a"), Some(ContextValue::Child(c)) if c.pk == 2));

        node.resolve_child(&finished(4));
        node.resolve_child(&finished(3));
        match node.context.get("many") {
            Some(ContextValue::Children(list)) => {
                assert_eq!(list.iter().map(|c| c.pk).collect::<Vec<_>>(), vec![4, 3]);
            }
            other => panic!("unexpected context value {:?}", other)
        }
        assert!(node.awaiting.is_empty());
    }

    #[test]
    fn test_label_is_taken_from_inputs() {
        let inputs = ProcessInputs::new().with("label", Data::Str("relax".into()));
        let node = ProcessNode::new(9, "test", inputs, None);
        assert_eq!(node.label.as_deref(), Some("relax"));
        assert_eq!(node.state, ProcessState::Created);
    }
}
