//! Collaborator interfaces of the process engine
//!
//! The engine core only talks to persistence and job execution through
//! these traits; concrete implementations live in `adapter`.

pub mod checkpoint;
pub mod engine;
pub mod executor;
pub mod repository;
