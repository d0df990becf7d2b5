//! Root actor of the process engine
//!
//! Owns the application context for the lifetime of the actor system:
//! - Spawns the ProcessManager with the application context
//! - Forwards process requests to it
//! - Handles system shutdown and health checks

use std::{sync::Arc, time::{Duration, SystemTime}};

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, SpawnErr, rpc::CallResult};
use tracing::{Level, event};

use crate::{
    AppContext,
    actor::{
        manager::ProcessManager,
        message::{GuardianMessage, ProcessManagerMessage, SystemHealth}
    },
    domain::{constant::guardian, error::EngineError}
};

/// Context handed to the manager plus the figures reported by health checks
pub struct GuardianState {
    app_context:     Arc<AppContext>,
    /// ProcessManager actor reference
    process_manager: Option<ActorRef<ProcessManagerMessage>>,
    startup_time:    SystemTime
}

/// Supervisor of the process manager
pub struct Guardian;

#[async_trait::async_trait]
impl Actor for Guardian {
    type Arguments = Arc<AppContext>;
    type Msg = GuardianMessage;
    type State = GuardianState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        app_context: Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        event!(Level::DEBUG, event = guardian::GUARDIAN_STARTED);

        Ok(GuardianState { app_context, process_manager: None, startup_time: SystemTime::now() })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State
    ) -> Result<(), ActorProcessingErr> {
        match message {
            GuardianMessage::Initialize => self.handle_initialize(state).await,
            GuardianMessage::Shutdown => self.handle_shutdown(state).await,
            GuardianMessage::HealthCheck { reply } => self.handle_health_check(reply, state).await,
            GuardianMessage::Forward(request) => self.handle_forward(request, state)
        }
    }
}

impl Guardian {
    /// Spawn the guardian and ask it to start the process manager
    pub async fn spawn_system(app_context: Arc<AppContext>) -> Result<ActorRef<GuardianMessage>, SpawnErr> {
        let (guardian_ref, _handle) = Actor::spawn(None, Guardian, app_context).await?;

        if let Err(e) = guardian_ref.cast(GuardianMessage::Initialize) {
            event!(Level::ERROR, event = guardian::GUARDIAN_STARTED, error = ?e);
        }

        Ok(guardian_ref)
    }

    async fn handle_initialize(&self, state: &mut GuardianState) -> Result<(), ActorProcessingErr> {
        if state.process_manager.is_some() {
            return Ok(());
        }
        event!(Level::DEBUG, event = guardian::CHILDREN_SPAWNING);

        match Actor::spawn(None, ProcessManager, state.app_context.clone()).await {
            Ok((manager_ref, _handle)) => {
                state.process_manager = Some(manager_ref);
                event!(Level::DEBUG, event = guardian::CHILDREN_SPAWNED, actor = "process_manager");
            }
            Err(e) => {
                event!(Level::ERROR, event = guardian::CHILDREN_SPAWN_FAILED, actor = "process_manager", error = %e);
                return Err(ActorProcessingErr::from(format!("Failed to spawn process manager: {}", e)));
            }
        }

        event!(Level::INFO, event = guardian::SYSTEM_INITIALIZED);
        Ok(())
    }

    /// Stop the manager; processes still waiting keep their checkpoints
    async fn handle_shutdown(&self, state: &mut GuardianState) -> Result<(), ActorProcessingErr> {
        event!(Level::DEBUG, event = guardian::SYSTEM_SHUTDOWN_STARTED);

        if let Some(manager) = state.process_manager.take() {
            manager.stop(None);
        }

        event!(Level::INFO, event = guardian::SYSTEM_SHUTDOWN_COMPLETED);
        Ok(())
    }

    async fn handle_health_check(
        &self,
        reply: RpcReplyPort<SystemHealth>,
        state: &GuardianState
    ) -> Result<(), ActorProcessingErr> {
        let uptime_seconds = state.startup_time.elapsed().unwrap_or_default().as_secs();

        let active_processes = match &state.process_manager {
            Some(manager) => {
                match ractor::rpc::call(manager, |reply| ProcessManagerMessage::GetActiveProcesses { reply }, None)
                    .await
                {
                    Ok(CallResult::Success(count)) => count,
                    _ => 0
                }
            }
            None => 0
        };

        if reply.send(SystemHealth { active_processes, uptime_seconds }).is_err() {
            event!(Level::DEBUG, event = guardian::REQUEST_FORWARDED, message = "health_check_reply_dropped");
        }
        Ok(())
    }

    fn handle_forward(&self, request: ProcessManagerMessage, state: &GuardianState) -> Result<(), ActorProcessingErr> {
        let Some(manager) = &state.process_manager else {
            request.reject(EngineError::Generic("actor system is not initialized".to_string()));
            return Ok(());
        };

        event!(Level::DEBUG, event = guardian::REQUEST_FORWARDED, request = request.name());
        if let Err(e) = manager.cast(request) {
            event!(Level::ERROR, event = guardian::REQUEST_FORWARDED, error = %e);
        }
        Ok(())
    }
}

/// Send a request through the guardian and wait for its answer
pub async fn request<T, F>(
    guardian: &ActorRef<GuardianMessage>,
    build: F,
    timeout: Option<Duration>
) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<Result<T, EngineError>>) -> ProcessManagerMessage
{
    match ractor::rpc::call(guardian, |reply| GuardianMessage::Forward(build(reply)), timeout).await {
        Ok(CallResult::Success(result)) => result,
        Ok(CallResult::Timeout) => Err(EngineError::Timeout("the process manager did not answer in time".to_string())),
        Ok(CallResult::SenderError) => Err(EngineError::Generic("the process manager dropped the request".to_string())),
        Err(e) => Err(EngineError::Generic(format!("Failed to reach the actor system: {}", e)))
    }
}
