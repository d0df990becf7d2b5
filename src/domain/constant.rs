//! Domain Events - Structured event names for internal monitoring and debugging

/// Guardian Actor Events
pub mod guardian {
    pub const GUARDIAN_STARTED: &str = "guardian.started";
    pub const CHILDREN_SPAWNING: &str = "children.spawning";
    pub const CHILDREN_SPAWNED: &str = "children.spawned";
    pub const CHILDREN_SPAWN_FAILED: &str = "children.spawn_failed";
    pub const SYSTEM_INITIALIZED: &str = "system.initialized";
    pub const SYSTEM_SHUTDOWN_STARTED: &str = "system.shutdown_started";
    pub const SYSTEM_SHUTDOWN_COMPLETED: &str = "system.shutdown_completed";
    pub const REQUEST_FORWARDED: &str = "request.forwarded";
}

/// ProcessManager Actor Events
pub mod process_manager {
    pub const MANAGER_STARTED: &str = "manager.started";
    pub const PROCESS_SUBMITTED: &str = "process.submitted";
    pub const TICK_FAILED: &str = "tick.failed";
    pub const WAITER_REGISTERED: &str = "waiter.registered";
    pub const WAITER_RELEASED: &str = "waiter.released";
    pub const REPLY_FAILED: &str = "reply.failed";
}

/// Runner Events
pub mod runner {
    pub const PROCESS_CREATED: &str = "process.created";
    pub const PROCESS_RESUMED: &str = "process.resumed";
    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_FAILED: &str = "step.failed";
    pub const PROCESS_WAITING: &str = "process.waiting";
    pub const PROCESS_FINISHED: &str = "process.finished";
    pub const PROCESS_EXCEPTED: &str = "process.excepted";
    pub const PROCESS_KILLED: &str = "process.killed";
    pub const PROCESS_REPORT: &str = "process.report";
    pub const CHILD_RESOLVED: &str = "child.resolved";
    pub const JOB_RESOLVED: &str = "job.resolved";
    pub const CHECKPOINT_SAVED: &str = "checkpoint.saved";
    pub const CANCELLATION_REQUESTED: &str = "cancellation.requested";
}

/// Calculation job and parser Events
pub mod job {
    pub const JOB_SUBMITTED: &str = "job.submitted";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_KILLED: &str = "job.killed";
    pub const PARSING_STARTED: &str = "parsing.started";
    pub const PARSING_FAILED: &str = "parsing.failed";
    pub const OUTPUT_FILES_MISSING: &str = "output_files.missing";
}

/// Store Events
pub mod store {
    pub const STORE_OPENED: &str = "store.opened";
    pub const NODE_STORED: &str = "node.stored";
    pub const NODE_DELETED: &str = "node.deleted";
    pub const NODE_REHASHED: &str = "node.rehashed";
}
