//! `computer` subcommands

use std::path::PathBuf;

use clap::{Args, Subcommand};
use tabled::Tabled;

use crate::{
    AppContext,
    cli::{prompt_failed, render_table},
    domain::{
        computer::{Computer, SCHEDULER_DIRECT, TRANSPORT_LOCAL},
        error::EngineError,
        node::{NodeKind, StoredNode}
    }
};

#[derive(Subcommand)]
pub enum ComputerCommands {
    /// Register a new computer
    Setup(ComputerSetupArgs),
    /// List the registered computers
    List,
    /// Display detailed information for a computer
    Show {
        /// Computer name or pk
        identifier: String
    }
}

#[derive(Args, Debug, Clone)]
pub struct ComputerSetupArgs {
    #[arg(short = 'L', long)]
    pub label:           Option<String>,
    #[arg(short = 'H', long)]
    pub hostname:        Option<String>,
    #[arg(short = 'D', long, default_value = "")]
    pub description:     String,
    #[arg(short = 'T', long, default_value = TRANSPORT_LOCAL)]
    pub transport:       String,
    #[arg(short = 'S', long, default_value = SCHEDULER_DIRECT)]
    pub scheduler:       String,
    /// Base directory of the job sandboxes
    #[arg(short = 'w', long)]
    pub work_dir:        Option<PathBuf>,
    #[arg(long, default_value = "")]
    pub prepend_text:    String,
    #[arg(long, default_value = "")]
    pub append_text:     String,
    #[arg(short = 'n', long)]
    pub non_interactive: bool
}

impl Default for ComputerSetupArgs {
    fn default() -> Self {
        Self {
            label:           None,
            hostname:        None,
            description:     String::new(),
            transport:       TRANSPORT_LOCAL.to_string(),
            scheduler:       SCHEDULER_DIRECT.to_string(),
            work_dir:        None,
            prepend_text:    String::new(),
            append_text:     String::new(),
            non_interactive: false
        }
    }
}

#[derive(Debug, Clone, Tabled)]
pub struct ComputerRow {
    #[tabled(rename = "PK")]
    pub pk:        u64,
    #[tabled(rename = "Name")]
    pub name:      String,
    #[tabled(rename = "Hostname")]
    pub hostname:  String,
    #[tabled(rename = "Transport")]
    pub transport: String,
    #[tabled(rename = "Scheduler")]
    pub scheduler: String,
    #[tabled(rename = "Work directory")]
    pub workdir:   String
}

pub fn handle(context: &AppContext, command: ComputerCommands) -> Result<String, EngineError> {
    match command {
        ComputerCommands::Setup(args) => setup(context, args),
        ComputerCommands::List => list(context),
        ComputerCommands::Show { identifier } => show(context, &identifier)
    }
}

fn prompt_missing(mut args: ComputerSetupArgs) -> Result<ComputerSetupArgs, EngineError> {
    if args.label.is_none() {
        args.label = Some(cliclack::input("Computer label").interact::<String>().map_err(prompt_failed)?);
    }
    if args.hostname.is_none() {
        args.hostname =
            Some(cliclack::input("Hostname").default_input("localhost").interact::<String>().map_err(prompt_failed)?);
    }
    if args.work_dir.is_none() {
        let work_dir: String = cliclack::input("Work directory").interact().map_err(prompt_failed)?;
        args.work_dir = Some(PathBuf::from(work_dir));
    }
    Ok(args)
}

pub fn setup(context: &AppContext, args: ComputerSetupArgs) -> Result<String, EngineError> {
    let args = if args.non_interactive { args } else { prompt_missing(args)? };

    let name = args.label.ok_or_else(|| EngineError::Validation("missing option '--label'".to_string()))?;
    if name.is_empty() || name.contains('@') || name.parse::<u64>().is_ok() {
        return Err(EngineError::Validation(format!("invalid computer label '{}'", name)));
    }
    match context.repository.find_computer(&name) {
        Ok(_) => return Err(EngineError::Value(format!("a computer named '{}' already exists", name))),
        Err(EngineError::NotExistent(_)) => {}
        Err(err) => return Err(err)
    }

    let hostname = args.hostname.unwrap_or_else(|| "localhost".to_string());
    let mut computer = Computer::new(&name, &hostname).with_scheduler(&args.transport, &args.scheduler);
    computer.description = args.description;
    computer.workdir = args.work_dir;
    computer.prepend_text = args.prepend_text;
    computer.append_text = args.append_text;

    let pk = context.repository.next_pk()?;
    let mut node = StoredNode::new(pk, &name, NodeKind::Computer(computer));
    node.rehash()?;
    context.repository.store(&node)?;

    Ok(format!("Computer '{}' created with pk {}", name, pk))
}

pub fn list(context: &AppContext) -> Result<String, EngineError> {
    let rows: Vec<ComputerRow> = context
        .repository
        .all()?
        .into_iter()
        .filter_map(|node| {
            node.as_computer().map(|computer| ComputerRow {
                pk:        node.pk,
                name:      computer.name.clone(),
                hostname:  computer.hostname.clone(),
                transport: computer.transport_type.clone(),
                scheduler: computer.scheduler_type.clone(),
                workdir:   computer.workdir.as_ref().map(|dir| dir.display().to_string()).unwrap_or_default()
            })
        })
        .collect();

    if rows.is_empty() {
        return Ok("No computers configured. Use `computer setup` to add one.".to_string());
    }
    Ok(render_table(rows))
}

pub fn show(context: &AppContext, identifier: &str) -> Result<String, EngineError> {
    let (node, computer) = context.repository.find_computer(identifier)?;

    let lines = [
        format!("PK: {}", node.pk),
        format!("UUID: {}", node.uuid),
        format!("Name: {}", computer),
        format!("Description: {}", computer.description),
        format!("Transport type: {}", computer.transport_type),
        format!("Scheduler type: {}", computer.scheduler_type),
        format!(
            "Work directory: {}",
            computer.workdir.as_ref().map(|dir| dir.display().to_string()).unwrap_or_else(|| "-".to_string())
        ),
        format!("Prepend text: {}", computer.prepend_text),
        format!("Append text: {}", computer.append_text)
    ];
    Ok(lines.join("\n"))
}
