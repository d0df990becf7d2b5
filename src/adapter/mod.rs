//! Concrete implementations of the collaborator ports

pub mod checkpoint;
pub mod engine;
pub mod executor;
pub mod repository;
pub mod storage;
