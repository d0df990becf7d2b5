//! Actor-based process execution
//!
//! The Guardian is the root of the actor hierarchy; the ProcessManager owns
//! the runner and advances it one tick per message, so requests such as
//! kills interleave with execution.

pub mod guardian;
pub mod manager;
pub mod message;

pub use guardian::*;
pub use manager::*;
pub use message::*;
