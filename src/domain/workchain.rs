//! WorkChain outlines
//!
//! An outline is declared once per class and compiled into a flat instruction
//! list. At run time the instruction pointer stored on the process node walks
//! that list; since the pointer is persisted with the checkpoint, a resumed
//! process continues at exactly the instruction it was suspended on.

use std::{fmt, sync::Arc};

use crate::domain::{error::EngineError, process::StepContext};

pub type StepFn = Arc<dyn Fn(&mut StepContext<'_>) -> Result<(), EngineError> + Send + Sync>;

/// Branch and loop conditions; must only read the context
pub type Predicate = Arc<dyn Fn(&StepContext<'_>) -> bool + Send + Sync>;

enum OutlineNode {
    Step { name: String, func: StepFn },
    If { name: String, cond: Predicate, then: Outline, otherwise: Option<Outline> },
    While { name: String, cond: Predicate, body: Outline },
    Return
}

/// Declarative sequence of steps and control constructs
#[derive(Default)]
pub struct Outline {
    nodes: Vec<OutlineNode>
}

impl Outline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&mut StepContext<'_>) -> Result<(), EngineError> + Send + Sync + 'static
    {
        self.nodes.push(OutlineNode::Step { name: name.to_string(), func: Arc::new(func) });
        self
    }

    pub fn if_<P>(mut self, name: &str, cond: P, then: Outline) -> Self
    where
        P: Fn(&StepContext<'_>) -> bool + Send + Sync + 'static
    {
        self.nodes.push(OutlineNode::If { name: name.to_string(), cond: Arc::new(cond), then, otherwise: None });
        self
    }

    pub fn if_else<P>(mut self, name: &str, cond: P, then: Outline, otherwise: Outline) -> Self
    where
        P: Fn(&StepContext<'_>) -> bool + Send + Sync + 'static
    {
        self.nodes.push(OutlineNode::If {
            name: name.to_string(),
            cond: Arc::new(cond),
            then,
            otherwise: Some(otherwise)
        });
        self
    }

    pub fn while_<P>(mut self, name: &str, cond: P, body: Outline) -> Self
    where
        P: Fn(&StepContext<'_>) -> bool + Send + Sync + 'static
    {
        self.nodes.push(OutlineNode::While { name: name.to_string(), cond: Arc::new(cond), body });
        self
    }

    pub fn ret(mut self) -> Self {
        self.nodes.push(OutlineNode::Return);
        self
    }

    pub fn compile(&self) -> CompiledOutline {
        let mut instructions = Vec::new();
        self.emit(&mut instructions);
        CompiledOutline { instructions }
    }

    fn emit(&self, out: &mut Vec<Instruction>) {
        for node in &self.nodes {
            match node {
                OutlineNode::Step { name, func } => {
                    out.push(Instruction::Call { name: name.clone(), func: func.clone() });
                }
                OutlineNode::If { name, cond, then, otherwise } => {
                    let branch = out.len();
                    out.push(Instruction::Jump { target: 0 });
                    then.emit(out);
                    match otherwise {
                        Some(otherwise) => {
                            let skip_else = out.len();
                            out.push(Instruction::Jump { target: 0 });
                            let else_start = out.len();
                            otherwise.emit(out);
                            let end = out.len();
                            out[skip_else] = Instruction::Jump { target: end };
                            out[branch] =
                                Instruction::JumpUnless { name: name.clone(), cond: cond.clone(), target: else_start };
                        }
                        None => {
                            let end = out.len();
                            out[branch] =
                                Instruction::JumpUnless { name: name.clone(), cond: cond.clone(), target: end };
                        }
                    }
                }
                OutlineNode::While { name, cond, body } => {
                    let head = out.len();
                    out.push(Instruction::Jump { target: 0 });
                    body.emit(out);
                    out.push(Instruction::Jump { target: head });
                    let end = out.len();
                    out[head] = Instruction::JumpUnless { name: name.clone(), cond: cond.clone(), target: end };
                }
                OutlineNode::Return => out.push(Instruction::Return)
            }
        }
    }
}

#[derive(Clone)]
pub enum Instruction {
    Call { name: String, func: StepFn },
    JumpUnless { name: String, cond: Predicate, target: usize },
    Jump { target: usize },
    Return
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Call { name, .. } => write!(f, "call {}", name),
            Instruction::JumpUnless { name, target, .. } => write!(f, "unless {} goto {}", name, target),
            Instruction::Jump { target } => write!(f, "goto {}", target),
            Instruction::Return => write!(f, "return")
        }
    }
}

/// Result of driving an outline until it yields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A step registered awaitables that are still pending
    Suspended,
    /// The pointer ran off the end or hit a return
    Completed,
    /// The session was cancelled before the next instruction
    Cancelled
}

#[derive(Debug, Clone, Default)]
pub struct CompiledOutline {
    instructions: Vec<Instruction>
}

impl CompiledOutline {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Names of the callable steps, in instruction order
    pub fn step_names(&self) -> Vec<String> {
        self.instructions
            .iter()
            .filter_map(|instruction| match instruction {
                Instruction::Call { name, .. } => Some(name.clone()),
                _ => None
            })
            .collect()
    }

    /// Run instructions from the node's pointer until completion or suspension
    ///
    /// The pointer is advanced before a step is invoked, so a step that
    /// suspends resumes at the following instruction.
    pub fn advance(&self, ctx: &mut StepContext<'_>) -> Result<StepOutcome, EngineError> {
        loop {
            let ip = ctx.ip();
            let Some(instruction) = self.instructions.get(ip) else {
                return Ok(StepOutcome::Completed);
            };
            if ctx.is_cancelled() {
                return Ok(StepOutcome::Cancelled);
            }

            match instruction {
                Instruction::Call { name, func } => {
                    ctx.set_ip(ip + 1);
                    ctx.enter_step(name);
                    func(ctx)?;
                    if ctx.is_awaiting() {
                        return Ok(StepOutcome::Suspended);
                    }
                }
                Instruction::JumpUnless { cond, target, .. } => {
                    let next = if cond(&*ctx) { ip + 1 } else { *target };
                    ctx.set_ip(next);
                }
                Instruction::Jump { target } => ctx.set_ip(*target),
                Instruction::Return => {
                    ctx.set_ip(self.instructions.len());
                    return Ok(StepOutcome::Completed);
                }
            }
        }
    }
}
