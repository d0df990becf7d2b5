//! The process runner
//!
//! `Runner` owns every non-terminal process of one session and drives them
//! cooperatively. A process is removed from the active table while one of its
//! steps executes, so the step can reach back into the runner (to submit or
//! run children) through `&mut dyn Engine`. Completions that happen while a
//! parent is mid-step are picked up afterwards from the children's
//! checkpoints.

use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::Arc,
    thread,
    time::Duration
};

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use crate::{
    domain::{
        constant,
        error::EngineError,
        inputs::ProcessInputs,
        job::{JobOutcome, JobRequest, JobStatus},
        node::{NodeKind, StoredNode},
        process::{ChildOutcome, ExceptionRecord, ProcessClass, ProcessNode, StepContext},
        registry::ProcessRegistry,
        stack::{ProcessStack, StackFrame},
        state::ProcessState,
        workchain::StepOutcome
    },
    port::{
        checkpoint::CheckpointStore,
        engine::{Engine, TickOutcome},
        executor::JobExecutor,
        repository::NodeRepository
    }
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct Runner {
    registry:      Arc<ProcessRegistry>,
    repository:    Arc<dyn NodeRepository>,
    checkpoints:   Arc<dyn CheckpointStore>,
    executor:      Arc<dyn JobExecutor>,
    stack:         ProcessStack,
    /// Non-terminal processes not currently inside a step
    active:        IndexMap<u64, ProcessNode>,
    ready:         VecDeque<u64>,
    /// Targets of nested runs; while set, only their subtrees are stepped
    scope:         Vec<u64>,
    cancellation:  Option<CancellationToken>,
    poll_interval: Duration
}

impl Runner {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        repository: Arc<dyn NodeRepository>,
        checkpoints: Arc<dyn CheckpointStore>,
        executor: Arc<dyn JobExecutor>
    ) -> Self {
        Self {
            registry,
            repository,
            checkpoints,
            executor,
            stack: ProcessStack::new(),
            active: IndexMap::new(),
            ready: VecDeque::new(),
            scope: Vec::new(),
            cancellation: None,
            poll_interval: DEFAULT_POLL_INTERVAL
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Pks of the processes held in memory
    pub fn active(&self) -> Vec<u64> {
        self.active.keys().copied().collect()
    }

    pub fn has_work(&self) -> bool {
        !self.active.is_empty()
    }

    fn on_stack(&self, pk: u64) -> bool {
        self.stack.stack().iter().any(|frame| frame.pk == pk)
    }

    fn enqueue(&mut self, pk: u64) {
        if !self.ready.contains(&pk) {
            self.ready.push_back(pk);
        }
    }

    fn create_node(
        &mut self,
        process_type: &str,
        inputs: ProcessInputs,
        parent: Option<u64>
    ) -> Result<u64, EngineError> {
        let class = self.registry.get(process_type)?;
        let inputs = class.spec().prepare_inputs(inputs)?;

        let pk = self.repository.next_pk()?;
        let node = ProcessNode::new(pk, process_type, inputs, parent);
        self.checkpoints.save(&node)?;

        event!(
            Level::INFO,
            event = constant::runner::PROCESS_CREATED,
            pk = pk,
            process_type = %process_type,
            parent = ?parent
        );

        self.active.insert(pk, node);
        self.enqueue(pk);
        Ok(pk)
    }

    fn parent_of(&self, pk: u64) -> Option<u64> {
        match self.active.get(&pk) {
            Some(node) => node.parent,
            None => self.checkpoints.load(pk).ok().and_then(|node| node.parent)
        }
    }

    /// Whether `pk` descends from the innermost nested run target
    fn in_scope(&self, pk: u64) -> bool {
        let Some(&root) = self.scope.last() else {
            return true;
        };
        let mut current = Some(pk);
        while let Some(candidate) = current {
            if candidate == root {
                return true;
            }
            current = self.parent_of(candidate);
        }
        false
    }

    /// Next queued process that is active, not awaiting anything and in scope
    fn next_ready(&mut self) -> Option<u64> {
        let active = &self.active;
        self.ready.retain(|pk| active.get(pk).is_some_and(|node| node.awaiting.is_empty()));

        let position = self.ready.iter().position(|pk| self.in_scope(*pk))?;
        self.ready.remove(position)
    }

    /// Run one process from its pointer until it completes or suspends
    fn step_process(&mut self, pk: u64) -> Result<(), EngineError> {
        let Some(mut node) = self.active.shift_remove(&pk) else {
            return Ok(());
        };

        let class = match self.registry.get(&node.process_type) {
            Ok(class) => class,
            Err(err) => return self.except(node, &err)
        };
        if node.state != ProcessState::Running {
            if let Err(err) = node.transition(ProcessState::Running) {
                self.active.insert(pk, node);
                return Err(err);
            }
        }

        let result = {
            let _frame = self.stack.enter(StackFrame { pk, process_type: node.process_type.clone() });
            let mut ctx = StepContext::new(&mut node, self, class.spec());
            class.outline().advance(&mut ctx)
        };

        match result {
            Ok(StepOutcome::Suspended) => self.suspend(node),
            Ok(StepOutcome::Completed) => self.finish(node, &class),
            Ok(StepOutcome::Cancelled) => {
                event!(Level::WARN, event = constant::runner::CANCELLATION_REQUESTED, pk = pk, ip = node.ip);
                self.kill_node(node)
            }
            Err(err) if self.is_cancelled() => {
                event!(Level::DEBUG, event = constant::runner::STEP_FAILED, pk = pk, error = %err);
                self.kill_node(node)
            }
            Err(err) => {
                event!(Level::WARN, event = constant::runner::STEP_FAILED, pk = pk, error = %err);
                self.except(node, &err)
            }
        }
    }

    /// Park a process on its awaitables; it stays in the session even if the checkpoint fails
    fn suspend(&mut self, mut node: ProcessNode) -> Result<(), EngineError> {
        let pk = node.pk;
        node.transition(ProcessState::Waiting)?;
        event!(
            Level::DEBUG,
            event = constant::runner::PROCESS_WAITING,
            pk = pk,
            ip = node.ip,
            awaiting = node.awaiting.len()
        );
        let saved = self.checkpoints.save(&node);
        self.active.insert(pk, node);
        saved?;
        self.resolve_awaitables(pk)
    }

    fn store_outputs(&self, node: &mut ProcessNode) -> Result<(), EngineError> {
        for (name, value) in &node.outputs {
            let data_pk = self.repository.next_pk()?;
            let mut stored = StoredNode::new(data_pk, name, NodeKind::Data(value.clone()));
            stored.created_by = Some(node.pk);
            stored.rehash()?;
            self.repository.store(&stored)?;
            node.output_nodes.insert(name.clone(), data_pk);
        }
        Ok(())
    }

    fn finish(&mut self, mut node: ProcessNode, class: &ProcessClass) -> Result<(), EngineError> {
        let missing = class.spec().missing_outputs(&node.outputs);
        if !missing.is_empty() {
            let err = EngineError::Validation(format!("required output '{}' was not emitted", missing.join("', '")));
            return self.except(node, &err);
        }

        if let Err(err) = self.store_outputs(&mut node) {
            return self.except(node, &err);
        }

        node.transition(ProcessState::Finished)?;
        event!(
            Level::INFO,
            event = constant::runner::PROCESS_FINISHED,
            pk = node.pk,
            process_type = %node.process_type,
            outputs = node.outputs.len()
        );
        self.settle(node)
    }

    fn except(&mut self, mut node: ProcessNode, err: &EngineError) -> Result<(), EngineError> {
        node.transition(ProcessState::Excepted)?;
        node.exception = Some(ExceptionRecord::from(err));
        event!(
            Level::ERROR,
            event = constant::runner::PROCESS_EXCEPTED,
            pk = node.pk,
            process_type = %node.process_type,
            error = %err
        );
        self.settle(node)
    }

    fn mark_killed(&mut self, mut node: ProcessNode) -> Result<(), EngineError> {
        node.transition(ProcessState::Killed)?;
        node.awaiting.clear();
        event!(Level::INFO, event = constant::runner::PROCESS_KILLED, pk = node.pk, process_type = %node.process_type);
        self.settle(node)
    }

    /// Persist a terminal process and let its parent pick up the result
    ///
    /// A process whose terminal checkpoint cannot be written stays in the
    /// active table, already terminal, and is settled again by the next run.
    fn settle(&mut self, node: ProcessNode) -> Result<(), EngineError> {
        if let Err(err) = self.checkpoints.save(&node) {
            self.ready.retain(|pk| *pk != node.pk);
            self.active.insert(node.pk, node);
            return Err(err);
        }
        self.active.shift_remove(&node.pk);
        self.ready.retain(|pk| *pk != node.pk);

        match node.parent {
            Some(parent) => self.resolve_awaitables(parent),
            None => Ok(())
        }
    }

    /// Move terminal children into a waiting process's context
    fn resolve_awaitables(&mut self, pk: u64) -> Result<(), EngineError> {
        let awaited = match self.active.get(&pk) {
            Some(node) if node.state == ProcessState::Waiting => node.awaited_children(),
            _ => return Ok(())
        };

        let mut outcomes = Vec::new();
        for child_pk in awaited {
            if self.active.contains_key(&child_pk) {
                continue;
            }
            let child = self.checkpoints.load(child_pk)?;
            if child.state.is_terminal() {
                outcomes.push(ChildOutcome::from_node(&child));
            }
        }

        let Some(node) = self.active.get_mut(&pk) else {
            return Ok(());
        };
        for outcome in &outcomes {
            if node.resolve_child(outcome) {
                event!(
                    Level::DEBUG,
                    event = constant::runner::CHILD_RESOLVED,
                    pk = pk,
                    child = outcome.pk,
                    state = %outcome.state
                );
            }
        }
        if !outcomes.is_empty() {
            self.checkpoints.save(node)?;
        }
        if node.awaiting.is_empty() {
            self.enqueue(pk);
        }
        Ok(())
    }

    /// Poll every awaited job; `None` when no job is awaited at all
    fn poll_jobs(&mut self) -> Result<Option<bool>, EngineError> {
        let awaited: Vec<(u64, String)> = self
            .active
            .values()
            .filter(|node| node.state == ProcessState::Waiting)
            .flat_map(|node| node.awaited_jobs().into_iter().map(move |job_id| (node.pk, job_id)))
            .collect();
        if awaited.is_empty() {
            return Ok(None);
        }

        let mut progressed = false;
        for (pk, job_id) in awaited {
            let JobStatus::Done { exit_code } = self.executor.poll(&job_id)? else {
                continue;
            };
            let workdir = match self.executor.retrieve(&job_id) {
                Ok(workdir) => workdir,
                Err(err) => {
                    event!(Level::WARN, event = constant::job::OUTPUT_FILES_MISSING, pk = pk, error = %err);
                    PathBuf::new()
                }
            };
            let outcome = JobOutcome { job_id, exit_code, workdir };

            if let Some(node) = self.active.get_mut(&pk) {
                if node.resolve_job(&outcome) {
                    event!(
                        Level::DEBUG,
                        event = constant::runner::JOB_RESOLVED,
                        pk = pk,
                        job_id = %outcome.job_id,
                        exit_code = ?exit_code
                    );
                    self.checkpoints.save(node)?;
                    if node.awaiting.is_empty() {
                        self.enqueue(pk);
                    }
                    progressed = true;
                }
            }
        }
        Ok(Some(progressed))
    }

    /// Kill every active process whose parent is not itself active
    fn kill_roots(&mut self) -> Result<(), EngineError> {
        let roots: Vec<u64> = self
            .active
            .values()
            .filter(|node| !node.state.is_terminal())
            .filter(|node| node.parent.is_none_or(|parent| !self.active.contains_key(&parent)))
            .map(|node| node.pk)
            .collect();

        for pk in roots {
            if self.active.contains_key(&pk) {
                self.kill(pk)?;
            }
        }
        Ok(())
    }

    /// Kill the still-active descendants and awaited jobs, then the process itself
    fn kill_node(&mut self, node: ProcessNode) -> Result<(), EngineError> {
        for child in node.children.clone() {
            if self.child_state(child).is_some_and(|state| !state.is_terminal()) && !self.on_stack(child) {
                self.kill(child)?;
            }
        }
        for job_id in node.awaited_jobs() {
            self.executor.kill(&job_id)?;
        }

        self.mark_killed(node)
    }

    /// Retry the checkpoint of processes that reached a terminal state but could not be persisted
    fn settle_pending(&mut self) -> Result<bool, EngineError> {
        let pending: Vec<u64> =
            self.active.values().filter(|node| node.state.is_terminal()).map(|node| node.pk).collect();
        for pk in &pending {
            if let Some(node) = self.active.shift_remove(pk) {
                self.settle(node)?;
            }
        }
        Ok(!pending.is_empty())
    }

    fn drive(&mut self, pk: u64) -> Result<ProcessNode, EngineError> {
        if self.active.get(&pk).is_some_and(|node| node.awaiting.is_empty()) {
            self.ready.retain(|queued| *queued != pk);
            self.ready.push_front(pk);
        }

        loop {
            if !self.active.contains_key(&pk) {
                let node = self.checkpoints.load(pk)?;
                if node.state.is_terminal() {
                    return Ok(node);
                }
                return Err(EngineError::InvalidOperation(format!("process {} is not running in this session", pk)));
            }

            match self.tick()? {
                TickOutcome::Progressed => {}
                TickOutcome::AwaitingJobs => thread::sleep(self.poll_interval),
                TickOutcome::Idle => {
                    return Err(EngineError::Execution(format!("process {} cannot make further progress", pk)));
                }
            }
        }
    }

    fn child_state(&self, pk: u64) -> Option<ProcessState> {
        match self.active.get(&pk) {
            Some(node) => Some(node.state),
            None => self.checkpoints.load(pk).ok().map(|node| node.state)
        }
    }
}

impl Engine for Runner {
    fn submit(&mut self, process_type: &str, inputs: ProcessInputs) -> Result<u64, EngineError> {
        self.create_node(process_type, inputs, None)
    }

    fn submit_child(&mut self, parent: u64, process_type: &str, inputs: ProcessInputs) -> Result<u64, EngineError> {
        self.create_node(process_type, inputs, Some(parent))
    }

    fn run(&mut self, process_type: &str, inputs: ProcessInputs) -> Result<ProcessNode, EngineError> {
        let pk = self.submit(process_type, inputs)?;
        self.run_until_terminal(pk)
    }

    fn run_child(
        &mut self,
        parent: u64,
        process_type: &str,
        inputs: ProcessInputs
    ) -> Result<ProcessNode, EngineError> {
        let pk = self.submit_child(parent, process_type, inputs)?;
        self.run_until_terminal(pk)
    }

    fn run_until_terminal(&mut self, pk: u64) -> Result<ProcessNode, EngineError> {
        // Called from inside a step: unrelated processes must not be stepped on top of the caller's frame.
        let nested = !self.stack.is_empty();
        if nested {
            self.scope.push(pk);
        }
        let result = self.drive(pk);
        if nested {
            self.scope.pop();
        }
        result
    }

    fn tick(&mut self) -> Result<TickOutcome, EngineError> {
        if self.settle_pending()? {
            return Ok(TickOutcome::Progressed);
        }

        if self.is_cancelled() && !self.active.is_empty() {
            event!(Level::WARN, event = constant::runner::CANCELLATION_REQUESTED, active = self.active.len());
            self.kill_roots()?;
            return Ok(TickOutcome::Progressed);
        }

        if let Some(pk) = self.next_ready() {
            self.step_process(pk)?;
            return Ok(TickOutcome::Progressed);
        }

        match self.poll_jobs()? {
            Some(true) => Ok(TickOutcome::Progressed),
            Some(false) => Ok(TickOutcome::AwaitingJobs),
            None => Ok(TickOutcome::Idle)
        }
    }

    fn submit_job(&mut self, pk: u64, request: JobRequest) -> Result<String, EngineError> {
        let job_id = self.executor.submit(&request)?;
        event!(Level::DEBUG, event = constant::job::JOB_SUBMITTED, pk = pk, job_id = %job_id);
        Ok(job_id)
    }

    fn kill(&mut self, pk: u64) -> Result<(), EngineError> {
        if self.on_stack(pk) {
            return Err(EngineError::InvalidOperation(format!("process {} is executing a step", pk)));
        }

        let state = match self.active.get(&pk) {
            Some(node) => node.state,
            None => self.checkpoints.load(pk)?.state
        };
        if state.is_terminal() {
            return Err(EngineError::InvalidOperation(format!("process {} is already {}", pk, state)));
        }

        let node = match self.active.shift_remove(&pk) {
            Some(node) => node,
            None => self.checkpoints.load(pk)?
        };
        self.kill_node(node)
    }

    fn resume(&mut self, pk: u64) -> Result<(), EngineError> {
        if self.active.contains_key(&pk) || self.on_stack(pk) {
            return Ok(());
        }

        let node = self.checkpoints.load(pk)?;
        match node.state {
            ProcessState::Excepted | ProcessState::Killed => {
                return Err(EngineError::PastException(format!(
                    "process {} was {} and cannot be resumed",
                    pk, node.state
                )));
            }
            ProcessState::Finished => {
                return Err(EngineError::InvalidOperation(format!("process {} has already finished", pk)));
            }
            ProcessState::Created | ProcessState::Running => {
                self.active.insert(pk, node);
                self.enqueue(pk);
            }
            ProcessState::Waiting => {
                let awaited = node.awaited_children();
                self.active.insert(pk, node);
                for child in awaited {
                    if self.child_state(child).is_some_and(|state| !state.is_terminal()) {
                        self.resume(child)?;
                    }
                }
                self.resolve_awaitables(pk)?;
            }
        }

        event!(Level::INFO, event = constant::runner::PROCESS_RESUMED, pk = pk);
        Ok(())
    }

    fn resume_all(&mut self) -> Result<Vec<u64>, EngineError> {
        let mut resumed = Vec::new();
        for node in self.checkpoints.list()? {
            if node.state.is_terminal() || self.active.contains_key(&node.pk) {
                continue;
            }
            self.resume(node.pk)?;
            resumed.push(node.pk);
        }
        Ok(resumed)
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(|token| token.is_cancelled())
    }

    fn load(&self, pk: u64) -> Result<ProcessNode, EngineError> {
        match self.active.get(&pk) {
            Some(node) => Ok(node.clone()),
            None => self.checkpoints.load(pk)
        }
    }

    fn repository(&self) -> Arc<dyn NodeRepository> {
        self.repository.clone()
    }

    fn registry(&self) -> Arc<ProcessRegistry> {
        self.registry.clone()
    }

    fn stack(&self) -> ProcessStack {
        self.stack.clone()
    }

    fn engine_name(&self) -> &'static str {
        "Runner"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering}
    };

    use super::*;
    use crate::{
        adapter::{
            checkpoint::InMemoryCheckpointStore, executor::DirectJobExecutor, repository::InMemoryNodeRepository
        },
        domain::{
            builtin,
            data::{Data, DataType},
            port::{Port, ProcessSpec},
            process::ContextValue,
            workchain::Outline
        }
    };

    const FAILING: &str = "test.failing";
    const COUNTED: &str = "test.counted";
    const SILENT: &str = "test.silent";
    const GUARDED: &str = "test.guarded";
    const NESTED: &str = "test.nested";

    static COUNTED_CALLS: AtomicUsize = AtomicUsize::new(0);

    /// Checkpoint store that refuses the next `Waiting` checkpoint
    struct FlakyCheckpoints {
        inner:        InMemoryCheckpointStore,
        fail_waiting: AtomicBool
    }

    impl CheckpointStore for FlakyCheckpoints {
        fn save(&self, node: &ProcessNode) -> Result<(), EngineError> {
            if node.state == ProcessState::Waiting && self.fail_waiting.swap(false, Ordering::SeqCst) {
                return Err(EngineError::Storage("disk full".to_string()));
            }
            self.inner.save(node)
        }

        fn load(&self, pk: u64) -> Result<ProcessNode, EngineError> {
            self.inner.load(pk)
        }

        fn delete(&self, pk: u64) -> Result<(), EngineError> {
            self.inner.delete(pk)
        }

        fn list(&self) -> Result<Vec<ProcessNode>, EngineError> {
            self.inner.list()
        }
    }

    fn test_classes(registry: &mut ProcessRegistry) {
        registry
            .register(ProcessClass::function(FAILING, ProcessSpec::new(), |_| {
                Err(EngineError::Execution("boom".to_string()))
            }))
            .unwrap();
        registry
            .register(ProcessClass::function(COUNTED, ProcessSpec::new(), |_| {
                COUNTED_CALLS.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Value("counted".to_string()))
            }))
            .unwrap();

        let mut spec = ProcessSpec::new();
        spec.output("value", Port::of(DataType::Int)).unwrap();
        registry.register(ProcessClass::function(SILENT, spec, |_| Ok(()))).unwrap();

        let mut spec = ProcessSpec::new();
        spec.output("handled", Port::of(DataType::Bool)).unwrap();
        let outline = Outline::new()
            .step("launch", |ctx| {
                let handle = ctx.submit(FAILING, ProcessInputs::new())?;
                ctx.to_context("child", handle);
                Ok(())
            })
            .step("inspect", |ctx| {
                let failed = ctx.child("child").is_some_and(|child| child.state == ProcessState::Excepted);
                ctx.out("handled", failed)
            });
        registry.register(ProcessClass::workchain(GUARDED, spec, outline)).unwrap();

        let mut spec = ProcessSpec::new();
        spec.output("result", Port::of(DataType::Int)).unwrap();
        let outline = Outline::new()
            .step("launch", |ctx| {
                let inputs = ProcessInputs::new().with("x", 1i64).with("y", 2i64).with("z", 3i64);
                let handle = ctx.submit(builtin::ADD_MULTIPLY, inputs)?;
                ctx.to_context("inner", handle);
                Ok(())
            })
            .step("collect", |ctx| {
                let result = ctx.child("inner").and_then(|child| child.output("result")).cloned();
                match result {
                    Some(result) => ctx.out("result", result),
                    None => Err(EngineError::Execution("inner workchain produced nothing".to_string()))
                }
            });
        registry.register(ProcessClass::workchain(NESTED, spec, outline)).unwrap();
    }

    fn registry() -> Arc<ProcessRegistry> {
        let mut registry = ProcessRegistry::with_builtins().unwrap();
        test_classes(&mut registry);
        Arc::new(registry)
    }

    fn runner_with(
        registry: Arc<ProcessRegistry>,
        repository: Arc<InMemoryNodeRepository>,
        checkpoints: Arc<InMemoryCheckpointStore>
    ) -> Runner {
        Runner::new(registry, repository, checkpoints, Arc::new(DirectJobExecutor::new()))
    }

    fn runner() -> Runner {
        runner_with(registry(), Arc::new(InMemoryNodeRepository::new()), Arc::new(InMemoryCheckpointStore::new()))
    }

    fn add_multiply_inputs() -> ProcessInputs {
        ProcessInputs::new().with("x", 1i64).with("y", 2i64).with("z", 4i64)
    }

    #[test]
    fn test_function_process_finishes_and_stores_outputs() {
        let mut runner = runner();
        let node = runner.run(builtin::ADD, ProcessInputs::new().with("x", 2i64).with("y", 3i64)).unwrap();

        assert_eq!(node.state, ProcessState::Finished);
        assert_eq!(node.outputs.get("sum"), Some(&Data::Int(5)));

        let stored = runner.repository.get(node.output_nodes["sum"]).unwrap();
        assert_eq!(stored.as_data(), Some(&Data::Int(5)));
        assert_eq!(stored.created_by, Some(node.pk));
        assert!(stored.fingerprint.is_some());
    }

    #[test]
    fn test_submit_validates_synchronously() {
        let mut runner = runner();
        let err = runner.submit(builtin::ADD, ProcessInputs::new().with("x", 2i64)).unwrap_err();
        assert!(matches!(&err, EngineError::Validation(msg) if msg.contains("'y'")));
        assert!(!runner.has_work());
    }

    #[test]
    fn test_stack_is_empty_after_nested_runs() {
        let mut runner = runner();
        assert!(runner.stack().is_empty());

        let node = runner.run(NESTED, ProcessInputs::new()).unwrap();
        assert_eq!(node.outputs.get("result"), Some(&Data::Int(9)));

        let inputs = ProcessInputs::new().with("increment", 2i64).with("terms", 3i64);
        let node = runner.run(builtin::ADD_SERIES, inputs).unwrap();
        assert_eq!(node.outputs.get("total"), Some(&Data::Int(6)));
        assert_eq!(node.children.len(), 3);

        let node = runner.run(FAILING, ProcessInputs::new()).unwrap();
        assert_eq!(node.state, ProcessState::Excepted);
        assert!(runner.stack().is_empty());
    }

    #[test]
    fn test_child_exception_does_not_except_parent() {
        let mut runner = runner();
        let node = runner.run(GUARDED, ProcessInputs::new()).unwrap();

        assert_eq!(node.state, ProcessState::Finished);
        assert_eq!(node.outputs.get("handled"), Some(&Data::Bool(true)));
        match node.context.get("child") {
            Some(ContextValue::Child(child)) => {
                assert_eq!(child.exception.as_ref().map(|e| e.message.as_str()), Some("boom"));
            }
            other => panic!("unexpected context value {:?}", other)
        }
    }

    #[test]
    fn test_missing_required_output_excepts() {
        let mut runner = runner();
        let node = runner.run(SILENT, ProcessInputs::new()).unwrap();
        assert_eq!(node.state, ProcessState::Excepted);
        assert!(node.exception.unwrap().message.contains("value"));
    }

    #[test]
    fn test_resume_after_exception_never_reruns() {
        let mut runner = runner();
        let node = runner.run(COUNTED, ProcessInputs::new()).unwrap();
        assert_eq!(node.state, ProcessState::Excepted);
        assert_eq!(node.exception.as_ref().map(|e| e.kind.as_str()), Some("ValueError"));
        assert_eq!(COUNTED_CALLS.load(Ordering::SeqCst), 1);

        let err = runner.resume(node.pk).unwrap_err();
        assert!(matches!(err, EngineError::PastException(_)));
        assert!(runner.resume_all().unwrap().is_empty());
        assert_eq!(COUNTED_CALLS.load(Ordering::SeqCst), 1);
        assert!(!runner.has_work());
    }

    #[test]
    fn test_waiting_checkpoint_resumes_at_same_pointer() {
        let registry = registry();
        let repository = Arc::new(InMemoryNodeRepository::new());
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());

        let mut first = runner_with(registry.clone(), repository.clone(), checkpoints.clone());
        let pk = first.submit(builtin::ADD_MULTIPLY, add_multiply_inputs()).unwrap();
        assert_eq!(first.tick().unwrap(), TickOutcome::Progressed);

        let suspended = checkpoints.load(pk).unwrap();
        assert_eq!(suspended.state, ProcessState::Waiting);
        assert_eq!(suspended.ip, 1);
        let snapshot = checkpoints.raw(pk);
        drop(first);

        // Resuming twice without progress leaves the checkpoint untouched.
        let mut second = runner_with(registry.clone(), repository.clone(), checkpoints.clone());
        second.resume(pk).unwrap();
        assert_eq!(checkpoints.raw(pk), snapshot);
        drop(second);

        let mut third = runner_with(registry, repository, checkpoints.clone());
        let resumed = third.resume_all().unwrap();
        assert!(resumed.contains(&pk));
        assert_eq!(checkpoints.raw(pk), snapshot);

        let node = third.run_until_terminal(pk).unwrap();
        assert_eq!(node.state, ProcessState::Finished);
        assert_eq!(node.outputs.get("result"), Some(&Data::Int(12)));
        assert!(third.stack().is_empty());
    }

    #[test]
    fn test_kill_propagates_to_children() {
        let mut runner = runner();
        let pk = runner.submit(NESTED, ProcessInputs::new()).unwrap();
        runner.tick().unwrap();

        let parent = runner.load(pk).unwrap();
        assert_eq!(parent.state, ProcessState::Waiting);
        let child = parent.children[0];

        runner.kill(pk).unwrap();
        assert_eq!(runner.load(pk).unwrap().state, ProcessState::Killed);
        assert_eq!(runner.load(child).unwrap().state, ProcessState::Killed);
        assert!(!runner.has_work());

        assert!(matches!(runner.kill(pk), Err(EngineError::InvalidOperation(_))));
        assert!(matches!(runner.resume(pk), Err(EngineError::PastException(_))));
    }

    #[test]
    fn test_cancellation_kills_top_level_process() {
        let token = CancellationToken::new();
        let mut runner = runner().with_cancellation(token.clone());
        let pk = runner.submit(NESTED, ProcessInputs::new()).unwrap();
        runner.tick().unwrap();

        token.cancel();
        let node = runner.run_until_terminal(pk).unwrap();
        assert_eq!(node.state, ProcessState::Killed);
        assert!(runner.stack().is_empty());
    }

    #[test]
    fn test_nested_run_leaves_unrelated_processes_queued() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let frames = seen.clone();

        let mut registry = ProcessRegistry::with_builtins().unwrap();
        registry
            .register(ProcessClass::function("test.inline", ProcessSpec::new(), |ctx| {
                let inner = ctx.run(builtin::ADD_MULTIPLY, add_multiply_inputs())?;
                assert_eq!(inner.state, ProcessState::Finished);
                Ok(())
            }))
            .unwrap();
        registry
            .register(ProcessClass::function("test.observer", ProcessSpec::new(), move |ctx| {
                let pks: Vec<u64> = ctx.stack().stack().iter().map(|frame| frame.pk).collect();
                frames.lock().unwrap().push(pks);
                Ok(())
            }))
            .unwrap();

        let mut runner = runner_with(
            Arc::new(registry),
            Arc::new(InMemoryNodeRepository::new()),
            Arc::new(InMemoryCheckpointStore::new())
        );
        let outer = runner.submit("test.inline", ProcessInputs::new()).unwrap();
        let other = runner.submit("test.observer", ProcessInputs::new()).unwrap();

        let node = runner.run_until_terminal(outer).unwrap();
        assert_eq!(node.state, ProcessState::Finished);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(runner.load(other).unwrap().state, ProcessState::Created);

        runner.run_until_terminal(other).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![vec![other]]);
        assert!(runner.stack().is_empty());
    }

    #[test]
    fn test_cancellation_during_a_step_skips_the_rest_of_the_outline() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let second_ran = Arc::new(AtomicBool::new(false));
        let flag = second_ran.clone();

        let mut registry = ProcessRegistry::with_builtins().unwrap();
        let outline = Outline::new()
            .step("first", move |_| {
                cancel.cancel();
                Ok(())
            })
            .step("second", move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
        registry.register(ProcessClass::workchain("test.two_steps", ProcessSpec::new(), outline)).unwrap();

        let mut runner = runner_with(
            Arc::new(registry),
            Arc::new(InMemoryNodeRepository::new()),
            Arc::new(InMemoryCheckpointStore::new())
        )
        .with_cancellation(token);
        let node = runner.run("test.two_steps", ProcessInputs::new()).unwrap();

        assert_eq!(node.state, ProcessState::Killed);
        assert_eq!(node.ip, 1);
        assert!(!second_ran.load(Ordering::SeqCst));
        assert!(runner.stack().is_empty());
        assert!(!runner.has_work());
    }

    #[test]
    fn test_failed_checkpoint_keeps_process_in_session() {
        let checkpoints =
            Arc::new(FlakyCheckpoints { inner: InMemoryCheckpointStore::new(), fail_waiting: AtomicBool::new(true) });
        let mut runner = Runner::new(
            registry(),
            Arc::new(InMemoryNodeRepository::new()),
            checkpoints.clone(),
            Arc::new(DirectJobExecutor::new())
        );
        let pk = runner.submit(builtin::ADD_MULTIPLY, add_multiply_inputs()).unwrap();

        assert!(matches!(runner.tick(), Err(EngineError::Storage(_))));
        assert!(runner.active().contains(&pk));
        assert_eq!(runner.load(pk).unwrap().state, ProcessState::Waiting);
        assert_eq!(checkpoints.load(pk).unwrap().state, ProcessState::Created);

        let node = runner.run_until_terminal(pk).unwrap();
        assert_eq!(node.state, ProcessState::Finished);
        assert_eq!(node.outputs.get("result"), Some(&Data::Int(12)));
        assert!(!runner.has_work());
    }
}
