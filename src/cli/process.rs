//! `process` subcommands
//!
//! Runs go through the actor system so that Ctrl-C and kill requests
//! interleave with execution; inspection reads the checkpoint store.

use std::sync::Arc;

use clap::Subcommand;
use ractor::ActorRef;
use tabled::Tabled;
use tracing::{Level, event};

use crate::{
    AppContext,
    actor::{
        guardian::{Guardian, request},
        message::{GuardianMessage, ProcessManagerMessage}
    },
    cli::render_table,
    domain::{
        constant,
        data::{Data, DataType, NodeHandle},
        error::EngineError,
        inputs::ProcessInputs,
        port::{Port, PortEntry, PortNamespace},
        process::{ContextValue, ProcessClass, ProcessNode},
        registry::ProcessRegistry
    },
    port::{engine::Engine, repository::NodeRepository}
};

#[derive(Subcommand)]
pub enum ProcessCommands {
    /// List the registered process classes
    Classes,
    /// Show the input and output ports of a process class
    Ports { class: String },
    /// Run a process until it is terminal
    Run {
        class:  String,
        /// Inputs as key=value; dotted keys address namespaces, codes and computers are given by identifier
        #[arg(value_name = "KEY=VALUE")]
        inputs: Vec<String>
    },
    /// Validate and store a process without running it
    Submit {
        class:  String,
        #[arg(value_name = "KEY=VALUE")]
        inputs: Vec<String>
    },
    /// List processes
    List {
        /// Include terminal processes
        #[arg(short = 'a', long)]
        all: bool
    },
    /// Show the details of a process
    Show { pk: u64 },
    /// Continue processes from their checkpoints
    Resume {
        pks: Vec<u64>,
        /// Resume every process that is not terminal
        #[arg(short = 'a', long, conflicts_with = "pks")]
        all: bool
    },
    /// Kill processes and their children
    Kill {
        #[arg(required = true)]
        pks: Vec<u64>
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct ClassRow {
    #[tabled(rename = "Name")]
    pub name:        String,
    #[tabled(rename = "Kind")]
    pub kind:        String,
    #[tabled(rename = "Description")]
    pub description: String
}

pub async fn handle(context: AppContext, command: ProcessCommands) -> Result<String, EngineError> {
    match command {
        ProcessCommands::Classes => Ok(classes(&context.registry)),
        ProcessCommands::Ports { class } => ports(&context.registry, &class),
        ProcessCommands::Submit { class, inputs } => submit(&context, &class, &inputs),
        ProcessCommands::List { all } => list(&context, all),
        ProcessCommands::Show { pk } => show(&context, pk),
        ProcessCommands::Run { class, inputs } => {
            let context = Arc::new(context);
            let guardian = Guardian::spawn_system(context.clone()).await?;
            let result = run(&guardian, &context, &class, &inputs).await;
            shutdown(&guardian);
            result
        }
        ProcessCommands::Resume { pks, all } => {
            let guardian = Guardian::spawn_system(Arc::new(context)).await?;
            let result = resume(&guardian, pks, all).await;
            shutdown(&guardian);
            result
        }
        ProcessCommands::Kill { pks } => {
            let guardian = Guardian::spawn_system(Arc::new(context)).await?;
            let result = kill(&guardian, &pks).await;
            shutdown(&guardian);
            result
        }
    }
}

fn shutdown(guardian: &ActorRef<GuardianMessage>) {
    if let Err(e) = guardian.cast(GuardianMessage::Shutdown) {
        event!(Level::WARN, event = constant::guardian::SYSTEM_SHUTDOWN_STARTED, error = %e);
    }
}

pub fn classes(registry: &ProcessRegistry) -> String {
    let rows = registry.classes().map(|class| ClassRow {
        name:        class.name.clone(),
        kind:        class.kind.to_string(),
        description: class.description.clone()
    });
    render_table(rows)
}

fn describe_namespace(namespace: &PortNamespace, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth + 1);
    for (name, entry) in namespace.entries() {
        match entry {
            PortEntry::Port(port) => lines.push(format!("{}{}", indent, port)),
            PortEntry::Namespace(inner) => {
                lines.push(format!("{}{}: namespace", indent, name));
                describe_namespace(inner, depth + 1, lines);
            }
        }
    }
}

pub fn ports(registry: &ProcessRegistry, class: &str) -> Result<String, EngineError> {
    let class = registry.get(class)?;
    let mut lines = vec![format!("{} ({})", class.name, class.kind), "Inputs:".to_string()];
    describe_namespace(class.spec().inputs(), 0, &mut lines);
    lines.push("Outputs:".to_string());
    describe_namespace(class.spec().outputs(), 0, &mut lines);
    Ok(lines.join("\n"))
}

/// Convert a command-line value to the first accepted type it parses as
fn parse_value(port: &Port, raw: &str, repository: &dyn NodeRepository) -> Result<Data, EngineError> {
    let accepted = if port.valid_type.is_empty() { vec![DataType::Str] } else { port.valid_type.clone() };

    let mut last_error = None;
    for data_type in accepted {
        let parsed = match data_type {
            DataType::Code => repository
                .find_code(raw)
                .map(|(node, code)| Data::Code(NodeHandle { pk: node.pk, label: code.label })),
            DataType::Computer => repository
                .find_computer(raw)
                .map(|(node, computer)| Data::Computer(NodeHandle { pk: node.pk, label: computer.name })),
            other => Data::parse_as(other, raw)
        };
        match parsed {
            Ok(data) => return Ok(data),
            Err(err) => last_error = Some(err)
        }
    }
    Err(last_error.unwrap_or_else(|| EngineError::Value(format!("no type accepts '{}'", raw))))
}

/// Build validated inputs for `class` from `key=value` assignments
pub fn parse_inputs(
    class: &ProcessClass,
    assignments: &[String],
    repository: &dyn NodeRepository
) -> Result<ProcessInputs, EngineError> {
    let mut builder = class.get_builder();
    for assignment in assignments {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| EngineError::Validation(format!("expected KEY=VALUE, got '{}'", assignment)))?;
        let port = class
            .spec()
            .inputs()
            .get_path(key)
            .and_then(PortEntry::as_port)
            .ok_or_else(|| EngineError::Attribute(format!("'{}' is not an input port of {}", key, class.name)))?;
        let value = parse_value(port, raw, repository)?;
        builder.set_path(key, value)?;
    }
    builder.build()
}

pub fn submit(context: &AppContext, class: &str, assignments: &[String]) -> Result<String, EngineError> {
    let class = context.registry.get(class)?;
    let inputs = parse_inputs(&class, assignments, context.repository.as_ref())?;

    let mut runner = context.runner();
    let pk = runner.submit(&class.name, inputs)?;
    Ok(format!("Submitted {}<{}>; continue it with `process resume {}`", class.name, pk, pk))
}

pub async fn run(
    guardian: &ActorRef<GuardianMessage>,
    context: &AppContext,
    class: &str,
    assignments: &[String]
) -> Result<String, EngineError> {
    let class = context.registry.get(class)?;
    let inputs = parse_inputs(&class, assignments, context.repository.as_ref())?;

    let process_type = class.name.clone();
    let pk =
        request(guardian, |reply| ProcessManagerMessage::Submit { process_type, inputs, reply }, None).await?;
    let node = request(guardian, |reply| ProcessManagerMessage::AwaitTerminal { pk, reply }, None).await?;
    Ok(summary(&node))
}

pub async fn resume(guardian: &ActorRef<GuardianMessage>, pks: Vec<u64>, all: bool) -> Result<String, EngineError> {
    let pks = if all {
        request(guardian, |reply| ProcessManagerMessage::ResumeAll { reply }, None).await?
    } else {
        for &pk in &pks {
            request(guardian, |reply| ProcessManagerMessage::Resume { pk, reply }, None).await?;
        }
        pks
    };
    if pks.is_empty() {
        return Ok("Nothing to resume".to_string());
    }

    let mut report = Vec::new();
    for pk in pks {
        let node = request(guardian, |reply| ProcessManagerMessage::AwaitTerminal { pk, reply }, None).await?;
        report.push(summary(&node));
    }
    Ok(report.join("\n\n"))
}

pub async fn kill(guardian: &ActorRef<GuardianMessage>, pks: &[u64]) -> Result<String, EngineError> {
    let mut report = Vec::new();
    for &pk in pks {
        request(guardian, |reply| ProcessManagerMessage::Kill { pk, reply }, None).await?;
        report.push(format!("Process<{}> killed", pk));
    }
    Ok(report.join("\n"))
}

pub fn list(context: &AppContext, all: bool) -> Result<String, EngineError> {
    let rows: Vec<_> = context
        .checkpoints
        .list()?
        .iter()
        .filter(|node| all || !node.state.is_terminal())
        .map(ProcessNode::row)
        .collect();

    if rows.is_empty() {
        let hint = if all { "" } else { " Use -a to include terminal processes." };
        return Ok(format!("No processes found.{}", hint));
    }
    let count = rows.len();
    Ok(format!("{}\nTotal results: {}", render_table(rows), count))
}

/// Terminal summary printed after a run
fn summary(node: &ProcessNode) -> String {
    let mut lines = vec![format!("{}<{}> {}", node.process_type, node.pk, node.state)];
    if !node.outputs.is_empty() {
        lines.push("Outputs:".to_string());
        for (name, value) in &node.outputs {
            match node.output_nodes.get(name) {
                Some(stored) => lines.push(format!("  {} = {} (node {})", name, value, stored)),
                None => lines.push(format!("  {} = {}", name, value))
            }
        }
    }
    if let Some(exception) = &node.exception {
        lines.push(format!("Exception: {}", exception));
    }
    lines.join("\n")
}

pub fn show(context: &AppContext, pk: u64) -> Result<String, EngineError> {
    let node = context.checkpoints.load(pk)?;

    let mut lines = vec![
        format!("PK: {}", node.pk),
        format!("UUID: {}", node.uuid),
        format!("Type: {}", node.process_type),
        format!("State: {}", node.state),
        format!("Label: {}", node.label.clone().unwrap_or_default()),
        format!("Description: {}", node.description.clone().unwrap_or_default()),
        format!("Owner: {}", node.user),
        format!("Created: {}", node.created_at.format("%Y-%m-%d %H:%M:%S")),
        format!("Step pointer: {}", node.ip)
    ];
    if let Some(parent) = node.parent {
        lines.push(format!("Called by: {}", parent));
    }

    lines.push("Inputs:".to_string());
    for (path, value) in node.inputs.leaves() {
        lines.push(format!("  {} = {}", path, value));
    }
    if !node.children.is_empty() {
        let children: Vec<String> = node.children.iter().map(ToString::to_string).collect();
        lines.push(format!("Called: {}", children.join(", ")));
    }
    if !node.awaiting.is_empty() {
        let keys: Vec<&str> = node.awaiting.iter().map(|awaitable| awaitable.key.as_str()).collect();
        lines.push(format!("Waiting on: {}", keys.join(", ")));
    }
    for (key, value) in &node.context {
        if let ContextValue::Data(data) = value {
            lines.push(format!("Context {} = {}", key, data));
        }
    }
    if !node.outputs.is_empty() {
        lines.push(summary(&node).lines().skip(1).collect::<Vec<_>>().join("\n"));
    }
    if !node.reports.is_empty() {
        lines.push("Reports:".to_string());
        lines.extend(node.reports.iter().map(|report| format!("  {}", report)));
    }
    Ok(lines.join("\n"))
}
