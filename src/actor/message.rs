//! Typed messages for actor communication

use ractor::{Message, RpcReplyPort};

use crate::domain::{error::EngineError, inputs::ProcessInputs, process::ProcessNode};

/// Messages for the Guardian actor (root of actor system)
#[derive(Debug)]
pub enum GuardianMessage {
    /// Initialize the actor system
    Initialize,
    /// Hand a request to the process manager
    Forward(ProcessManagerMessage),
    /// Shutdown the entire system
    Shutdown,
    /// System health check
    HealthCheck { reply: RpcReplyPort<SystemHealth> }
}

/// Messages for the ProcessManager actor
#[derive(Debug)]
pub enum ProcessManagerMessage {
    /// Validate and queue a new top-level process
    Submit { process_type: String, inputs: ProcessInputs, reply: RpcReplyPort<Result<u64, EngineError>> },
    /// Reply once the process is terminal
    AwaitTerminal { pk: u64, reply: RpcReplyPort<Result<ProcessNode, EngineError>> },
    Resume { pk: u64, reply: RpcReplyPort<Result<(), EngineError>> },
    ResumeAll { reply: RpcReplyPort<Result<Vec<u64>, EngineError>> },
    Kill { pk: u64, reply: RpcReplyPort<Result<(), EngineError>> },
    /// Current view of a process
    Status { pk: u64, reply: RpcReplyPort<Result<ProcessNode, EngineError>> },
    /// Advance the runner by one step
    Tick,
    /// Number of processes held in memory
    GetActiveProcesses { reply: RpcReplyPort<usize> }
}

impl ProcessManagerMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessManagerMessage::Submit { .. } => "submit",
            ProcessManagerMessage::AwaitTerminal { .. } => "await_terminal",
            ProcessManagerMessage::Resume { .. } => "resume",
            ProcessManagerMessage::ResumeAll { .. } => "resume_all",
            ProcessManagerMessage::Kill { .. } => "kill",
            ProcessManagerMessage::Status { .. } => "status",
            ProcessManagerMessage::Tick => "tick",
            ProcessManagerMessage::GetActiveProcesses { .. } => "get_active_processes"
        }
    }

    /// Answer the request with `err` without processing it
    pub fn reject(self, err: EngineError) {
        // A caller that stopped waiting is not an error here.
        match self {
            ProcessManagerMessage::Submit { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            ProcessManagerMessage::AwaitTerminal { reply, .. } | ProcessManagerMessage::Status { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            ProcessManagerMessage::Resume { reply, .. } | ProcessManagerMessage::Kill { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            ProcessManagerMessage::ResumeAll { reply } => {
                let _ = reply.send(Err(err));
            }
            ProcessManagerMessage::GetActiveProcesses { reply } => {
                let _ = reply.send(0);
            }
            ProcessManagerMessage::Tick => {}
        }
    }
}

/// System health information
#[derive(Debug)]
pub struct SystemHealth {
    pub active_processes: usize,
    pub uptime_seconds:   u64
}

// Implement Message trait for Ractor
impl Message for GuardianMessage {}
impl Message for ProcessManagerMessage {}
