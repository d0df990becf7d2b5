//! Process stack
//!
//! Shared record of the processes currently executing in one engine session,
//! innermost last. The handle is cloned into every execution context rather
//! than living in a global, so independent runners never observe each other.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub pk:           u64,
    pub process_type: String
}

#[derive(Debug, Clone, Default)]
pub struct ProcessStack {
    frames: Arc<Mutex<Vec<StackFrame>>>
}

impl ProcessStack {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves the frames intact, so poisoning is ignored.
    fn frames(&self) -> MutexGuard<'_, Vec<StackFrame>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, frame: StackFrame) {
        self.frames().push(frame);
    }

    pub fn pop(&self) -> Option<StackFrame> {
        self.frames().pop()
    }

    pub fn current(&self) -> Option<StackFrame> {
        self.frames().last().cloned()
    }

    /// Snapshot of the whole stack, outermost first
    pub fn stack(&self) -> Vec<StackFrame> {
        self.frames().clone()
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames().is_empty()
    }

    /// Push a frame and return a guard that pops it when dropped
    ///
    /// The pop happens on every exit path of the scope holding the guard,
    /// including early returns through `?` and unwinding.
    pub fn enter(&self, frame: StackFrame) -> StackGuard {
        let pk = frame.pk;
        self.push(frame);
        StackGuard { stack: self.clone(), pk }
    }
}

#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct StackGuard {
    stack: ProcessStack,
    pk:    u64
}

impl StackGuard {
    pub fn pk(&self) -> u64 {
        self.pk
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        let mut frames = self.stack.frames();
        if let Some(index) = frames.iter().rposition(|frame| frame.pk == self.pk) {
            frames.remove(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pk: u64) -> StackFrame {
        StackFrame { pk, process_type: "test".to_string() }
    }

    #[test]
    fn test_push_pop_current() {
        let stack = ProcessStack::new();
        assert!(stack.current().is_none());

        stack.push(frame(1));
        stack.push(frame(2));
        assert_eq!(stack.current().map(|f| f.pk), Some(2));
        assert_eq!(stack.stack().len(), 2);

        assert_eq!(stack.pop().map(|f| f.pk), Some(2));
        assert_eq!(stack.pop().map(|f| f.pk), Some(1));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_guard_pops_on_error_path() {
        fn failing(stack: &ProcessStack) -> Result<(), String> {
            let _outer = stack.enter(frame(1));
            let _inner = stack.enter(frame(2));
            assert_eq!(stack.len(), 2);
            Err("boom".to_string())
        }

        let stack = ProcessStack::new();
        assert!(failing(&stack).is_err());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_clones_share_frames() {
        let stack = ProcessStack::new();
        let shared = stack.clone();
        let _guard = stack.enter(frame(7));
        assert_eq!(shared.current().map(|f| f.pk), Some(7));
    }
}
