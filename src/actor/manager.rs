//! ProcessManager Actor - owns the runner and multiplexes processes
//!
//! Every request is answered from the actor's own runner. Execution itself
//! happens in `Tick` messages: one scheduling round per message, re-cast
//! immediately while work is ready and delayed by the poll interval while
//! only external jobs are pending.

use std::{collections::HashMap, sync::Arc};

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tracing::{Level, event};

use crate::{
    AppContext,
    actor::message::ProcessManagerMessage,
    adapter::engine::Runner,
    domain::{constant::process_manager, error::EngineError, process::ProcessNode},
    port::engine::{Engine, TickOutcome}
};

type Waiter = RpcReplyPort<Result<ProcessNode, EngineError>>;

/// ProcessManager Actor State
pub struct ProcessManagerState {
    runner:          Runner,
    /// Callers waiting for a process to become terminal
    waiters:         HashMap<u64, Vec<Waiter>>,
    tick_scheduled:  bool,
    total_submitted: u64
}

pub struct ProcessManager;

#[async_trait::async_trait]
impl Actor for ProcessManager {
    type Arguments = Arc<AppContext>;
    type Msg = ProcessManagerMessage;
    type State = ProcessManagerState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        app_context: Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        event!(Level::DEBUG, event = process_manager::MANAGER_STARTED);

        Ok(ProcessManagerState {
            runner:          app_context.runner(),
            waiters:         HashMap::new(),
            tick_scheduled:  false,
            total_submitted: 0
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ProcessManagerMessage::Submit { process_type, inputs, reply } => {
                let result = state.runner.submit(&process_type, inputs);
                if let Ok(pk) = &result {
                    state.total_submitted += 1;
                    event!(
                        Level::INFO,
                        event = process_manager::PROCESS_SUBMITTED,
                        pk = %pk,
                        process_type = %process_type,
                        total = state.total_submitted
                    );
                }
                Self::respond(reply, result);
            }
            ProcessManagerMessage::AwaitTerminal { pk, reply } => match state.runner.load(pk) {
                Ok(node) if node.state.is_terminal() => Self::respond(reply, Ok(node)),
                Ok(_) => {
                    event!(Level::DEBUG, event = process_manager::WAITER_REGISTERED, pk = %pk);
                    state.waiters.entry(pk).or_default().push(reply);
                }
                Err(err) => Self::respond(reply, Err(err))
            },
            ProcessManagerMessage::Resume { pk, reply } => Self::respond(reply, state.runner.resume(pk)),
            ProcessManagerMessage::ResumeAll { reply } => Self::respond(reply, state.runner.resume_all()),
            ProcessManagerMessage::Kill { pk, reply } => Self::respond(reply, state.runner.kill(pk)),
            ProcessManagerMessage::Status { pk, reply } => Self::respond(reply, state.runner.load(pk)),
            ProcessManagerMessage::GetActiveProcesses { reply } => Self::respond(reply, state.runner.active().len()),
            ProcessManagerMessage::Tick => {
                state.tick_scheduled = false;
                self.handle_tick(&myself, state)?;
            }
        }

        self.release_waiters(state);
        self.schedule_tick(&myself, state)?;
        Ok(())
    }
}

impl ProcessManager {
    fn respond<T>(reply: RpcReplyPort<T>, value: T) {
        if reply.send(value).is_err() {
            event!(Level::DEBUG, event = process_manager::REPLY_FAILED);
        }
    }

    fn handle_tick(
        &self,
        myself: &ActorRef<ProcessManagerMessage>,
        state: &mut ProcessManagerState
    ) -> Result<(), ActorProcessingErr> {
        match state.runner.tick() {
            Ok(TickOutcome::Progressed) | Ok(TickOutcome::Idle) => {}
            Ok(TickOutcome::AwaitingJobs) => {
                state.tick_scheduled = true;
                myself.send_after(state.runner.poll_interval(), || ProcessManagerMessage::Tick);
            }
            Err(err) => {
                event!(Level::ERROR, event = process_manager::TICK_FAILED, error = %err);
            }
        }
        Ok(())
    }

    /// Keep one tick in flight while there is work
    fn schedule_tick(
        &self,
        myself: &ActorRef<ProcessManagerMessage>,
        state: &mut ProcessManagerState
    ) -> Result<(), ActorProcessingErr> {
        if state.tick_scheduled || !state.runner.has_work() {
            return Ok(());
        }
        state.tick_scheduled = true;
        myself.cast(ProcessManagerMessage::Tick).map_err(|e| ActorProcessingErr::from(e.to_string()))?;
        Ok(())
    }

    fn release_waiters(&self, state: &mut ProcessManagerState) {
        let pks: Vec<u64> = state.waiters.keys().copied().collect();
        for pk in pks {
            let node = match state.runner.load(pk) {
                Ok(node) if !node.state.is_terminal() => continue,
                other => other
            };
            for waiter in state.waiters.remove(&pk).unwrap_or_default() {
                event!(Level::DEBUG, event = process_manager::WAITER_RELEASED, pk = %pk);
                Self::respond(waiter, node.clone());
            }
        }
    }
}
