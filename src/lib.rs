//! # Workchain Engine
//!
//! A resumable process engine. Processes declare typed input and output
//! ports, are assembled with type-checked builders, and run as plain
//! functions, multi-step workchains or wrapped external codes.
//!
//! This crate provides functionality to:
//! - Declare process specs and validate inputs against them
//! - Drive processes through a checkpointed lifecycle
//! - Suspend workchains on child processes and external jobs, and resume them after a restart
//! - Record outputs as stored data nodes linked to the process that made them

pub mod actor;
pub mod adapter;
pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod port;
pub mod telemetry;

pub use context::AppContext;
pub use domain::{
    builder::ProcessBuilder,
    data::{Data, DataType},
    error::EngineError,
    inputs::ProcessInputs,
    port::{Port, ProcessSpec},
    process::{ProcessClass, ProcessNode, StepContext},
    registry::ProcessRegistry,
    state::ProcessState,
    workchain::Outline
};
pub use port::engine::Engine;
