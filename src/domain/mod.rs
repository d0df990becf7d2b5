//! Domain types and rules of the process engine

pub mod builder;
pub mod builtin;
pub mod code;
pub mod computer;
pub mod constant;
pub mod data;
pub mod error;
pub mod inputs;
pub mod job;
pub mod node;
pub mod parser;
pub mod port;
pub mod process;
pub mod registry;
pub mod stack;
pub mod state;
pub mod workchain;
