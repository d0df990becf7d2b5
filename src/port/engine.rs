use std::sync::Arc;

use crate::{
    domain::{
        builder::ProcessBuilder,
        error::EngineError,
        inputs::ProcessInputs,
        job::JobRequest,
        process::ProcessNode,
        registry::ProcessRegistry,
        stack::ProcessStack
    },
    port::repository::NodeRepository
};

/// What a single scheduling round achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A process step ran or a job result was delivered
    Progressed,
    /// Nothing is ready, but external jobs are still running
    AwaitingJobs,
    /// No work is left
    Idle
}

/// Core engine trait for process execution
///
/// The engine owns every non-terminal process of a session and drives them
/// cooperatively: a process runs until it finishes or suspends, never
/// preempted. Step functions reach the engine through this trait.
pub trait Engine: Send {
    /// Validate inputs synchronously and queue a new top-level process
    fn submit(&mut self, process_type: &str, inputs: ProcessInputs) -> Result<u64, EngineError>;

    fn submit_builder(&mut self, builder: &ProcessBuilder) -> Result<u64, EngineError> {
        let inputs = builder.build()?;
        self.submit(builder.process_type(), inputs)
    }

    /// Queue a child of `parent`
    fn submit_child(&mut self, parent: u64, process_type: &str, inputs: ProcessInputs) -> Result<u64, EngineError>;

    /// Submit and drive a process until it is terminal
    fn run(&mut self, process_type: &str, inputs: ProcessInputs) -> Result<ProcessNode, EngineError>;

    /// Drive a child of `parent` to completion from inside the parent's step
    fn run_child(&mut self, parent: u64, process_type: &str, inputs: ProcessInputs)
    -> Result<ProcessNode, EngineError>;

    fn run_until_terminal(&mut self, pk: u64) -> Result<ProcessNode, EngineError>;

    /// One scheduling round: step one ready process, or poll running jobs
    fn tick(&mut self) -> Result<TickOutcome, EngineError>;

    /// Hand an external job to the executor on behalf of process `pk`
    fn submit_job(&mut self, pk: u64, request: JobRequest) -> Result<String, EngineError>;

    /// Kill a process and, first, all of its active descendants
    fn kill(&mut self, pk: u64) -> Result<(), EngineError>;

    /// Reload a process from its checkpoint and continue it
    fn resume(&mut self, pk: u64) -> Result<(), EngineError>;

    /// Resume every non-terminal checkpoint; returns the resumed pks
    fn resume_all(&mut self) -> Result<Vec<u64>, EngineError>;

    /// Whether the session was asked to stop; outlines check it between instructions
    fn is_cancelled(&self) -> bool;

    /// Current view of a process, in memory or from its checkpoint
    fn load(&self, pk: u64) -> Result<ProcessNode, EngineError>;

    fn repository(&self) -> Arc<dyn NodeRepository>;

    fn registry(&self) -> Arc<ProcessRegistry>;

    fn stack(&self) -> ProcessStack;

    /// Get the engine name for identification
    fn engine_name(&self) -> &'static str;
}
