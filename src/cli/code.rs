//! `code` subcommands

use std::path::PathBuf;

use clap::{Args, Subcommand};
use tabled::{builder::Builder, settings::Style};

use crate::{
    AppContext,
    cli::prompt_failed,
    domain::{
        code::{Code, CodeLocation},
        data::Data,
        error::EngineError,
        node::{NodeKind, StoredNode}
    }
};

#[derive(Subcommand)]
pub enum CodeCommands {
    /// Set up a new code
    Setup(SetupArgs),
    /// List the available codes
    List(ListArgs),
    /// Display detailed information for a code
    Show {
        /// Code pk, label or label@computer
        identifier: String
    },
    /// Hide codes from `code list`
    Hide {
        #[arg(required = true)]
        identifiers: Vec<String>
    },
    /// Reveal previously hidden codes
    Reveal {
        #[arg(required = true)]
        identifiers: Vec<String>
    },
    /// Change the label of a code
    Relabel {
        identifier: String,
        /// New label, optionally as label@computer for the code's own computer
        label:      String
    },
    /// Delete codes that no process has used
    Delete {
        #[arg(required = true)]
        identifiers: Vec<String>
    },
    /// Store a copy of a code under a new label
    Duplicate {
        identifier: String,
        /// Label of the copy; `<label>_copy` when omitted
        #[arg(short = 'L', long)]
        label:      Option<String>
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct SetupArgs {
    #[arg(short = 'L', long)]
    pub label:           Option<String>,
    #[arg(short = 'D', long)]
    pub description:     Option<String>,
    /// Process class the code is run with, e.g. core.arithmetic.add
    #[arg(short = 'P', long)]
    pub input_plugin:    Option<String>,
    /// The executable is installed on a computer
    #[arg(long, conflicts_with = "store_in_db")]
    pub on_computer:     bool,
    /// Computer name or pk, with --on-computer
    #[arg(short = 'Y', long)]
    pub computer:        Option<String>,
    /// Absolute path of the executable on the computer
    #[arg(long)]
    pub remote_abs_path: Option<PathBuf>,
    /// The executable is a folder stored alongside the repository
    #[arg(long)]
    pub store_in_db:     bool,
    #[arg(long)]
    pub code_folder:     Option<PathBuf>,
    /// Path of the executable relative to --code-folder
    #[arg(long)]
    pub code_rel_path:   Option<PathBuf>,
    #[arg(long, default_value = "")]
    pub prepend_text:    String,
    #[arg(long, default_value = "")]
    pub append_text:     String,
    /// Fail instead of prompting for missing values
    #[arg(short = 'n', long)]
    pub non_interactive: bool
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Show codes of all users
    #[arg(short = 'A', long)]
    pub all_users:    bool,
    /// Include hidden codes
    #[arg(short = 'a', long)]
    pub all:          bool,
    /// Show the owner of each code
    #[arg(short = 'o', long)]
    pub show_owner:   bool,
    /// Only codes for this process class
    #[arg(short = 'P', long)]
    pub input_plugin: Option<String>,
    /// Only codes installed on this computer
    #[arg(short = 'Y', long)]
    pub computer:     Option<String>
}

pub fn handle(context: &AppContext, command: CodeCommands) -> Result<String, EngineError> {
    match command {
        CodeCommands::Setup(args) => setup(context, args),
        CodeCommands::List(args) => list(context, &args),
        CodeCommands::Show { identifier } => show(context, &identifier),
        CodeCommands::Hide { identifiers } => set_hidden(context, &identifiers, true),
        CodeCommands::Reveal { identifiers } => set_hidden(context, &identifiers, false),
        CodeCommands::Relabel { identifier, label } => relabel(context, &identifier, &label),
        CodeCommands::Delete { identifiers } => delete(context, &identifiers),
        CodeCommands::Duplicate { identifier, label } => duplicate(context, &identifier, label)
    }
}

fn required<T>(value: Option<T>, option: &str) -> Result<T, EngineError> {
    value.ok_or_else(|| EngineError::Validation(format!("missing option '--{}'", option)))
}

fn ask(prompt: &str) -> Result<String, EngineError> {
    cliclack::input(prompt).interact::<String>().map_err(prompt_failed)
}

/// Fill in every value the command line left out
fn prompt_missing(mut args: SetupArgs) -> Result<SetupArgs, EngineError> {
    cliclack::intro("Set up a new code").map_err(prompt_failed)?;

    if args.label.is_none() {
        args.label = Some(ask("Label")?);
    }
    if args.description.is_none() {
        args.description =
            Some(cliclack::input("Description").required(false).interact::<String>().map_err(prompt_failed)?);
    }
    if args.input_plugin.is_none() {
        args.input_plugin = Some(ask("Default calculation input plugin")?);
    }
    if !args.on_computer && !args.store_in_db {
        args.store_in_db = cliclack::select("Where is the executable?")
            .item(false, "Installed on a computer", "")
            .item(true, "Stored in the repository", "")
            .interact()
            .map_err(prompt_failed)?;
    }

    if args.store_in_db {
        if args.code_folder.is_none() {
            args.code_folder = Some(PathBuf::from(ask("Folder containing the code")?));
        }
        if args.code_rel_path.is_none() {
            args.code_rel_path = Some(PathBuf::from(ask("Relative path of the executable")?));
        }
    } else {
        if args.computer.is_none() {
            args.computer = Some(ask("Computer")?);
        }
        if args.remote_abs_path.is_none() {
            args.remote_abs_path = Some(PathBuf::from(ask("Remote absolute path")?));
        }
    }

    cliclack::outro("Storing code").map_err(prompt_failed)?;
    Ok(args)
}

fn store_code(context: &AppContext, code: Code, description: String) -> Result<StoredNode, EngineError> {
    let pk = context.repository.next_pk()?;
    let label = code.label.clone();
    let mut node = StoredNode::new(pk, &label, NodeKind::Code(code));
    node.description = description;
    node.rehash()?;
    context.repository.store(&node)?;

    Ok(node)
}

pub fn setup(context: &AppContext, args: SetupArgs) -> Result<String, EngineError> {
    let args = if args.non_interactive { args } else { prompt_missing(args)? };

    let label = required(args.label, "label")?;
    if label.is_empty() || label.contains('@') {
        return Err(EngineError::Validation(format!("invalid code label '{}': must be non-empty without '@'", label)));
    }
    let input_plugin = required(args.input_plugin, "input-plugin")?;
    context.registry.get(&input_plugin)?;

    let mut code = if args.store_in_db {
        let folder = required(args.code_folder, "code-folder")?;
        let rel_path = required(args.code_rel_path, "code-rel-path")?;
        if !folder.join(&rel_path).is_file() {
            return Err(EngineError::Validation(format!(
                "executable '{}' not found in code folder '{}'",
                rel_path.display(),
                folder.display()
            )));
        }
        Code::local(&label, &input_plugin, folder, rel_path)
    } else {
        let computer = required(args.computer, "computer")?;
        let remote_abs_path = required(args.remote_abs_path, "remote-abs-path")?;
        if !remote_abs_path.is_absolute() {
            return Err(EngineError::Validation(format!(
                "remote path '{}' must be absolute",
                remote_abs_path.display()
            )));
        }
        let (computer_node, _) = context.repository.find_computer(&computer)?;
        Code::remote(&label, &input_plugin, computer_node.pk, remote_abs_path)
    };

    let description = args.description.unwrap_or_default();
    code.description = description.clone();
    code.prepend_text = args.prepend_text;
    code.append_text = args.append_text;

    let computer_name = context.repository.computer_name(&code)?;
    let full_label = code.full_label(computer_name.as_deref());
    let node = store_code(context, code, description)?;
    Ok(format!("Code '{}' created with pk {}", full_label, node.pk))
}

pub fn list(context: &AppContext, args: &ListArgs) -> Result<String, EngineError> {
    let computer = match &args.computer {
        Some(identifier) => Some(context.repository.find_computer(identifier)?.0.pk),
        None => None
    };
    let user = whoami::username();

    let mut builder = Builder::default();
    let mut header = vec!["PK".to_string(), "Full label".to_string(), "Input plugin".to_string()];
    if args.show_owner {
        header.push("Owner".to_string());
    }
    builder.push_record(header);

    let mut count = 0;
    for node in context.repository.all()? {
        let Some(code) = node.as_code() else { continue };
        if code.hidden && !args.all {
            continue;
        }
        if !args.all_users && node.user != user {
            continue;
        }
        if args.input_plugin.as_ref().is_some_and(|plugin| &code.input_plugin != plugin) {
            continue;
        }
        if computer.is_some() && code.computer() != computer {
            continue;
        }

        let computer_name = context.repository.computer_name(code)?;
        let full_label = code.full_label(computer_name.as_deref());
        let mut record = vec![node.pk.to_string(), full_label, code.input_plugin.clone()];
        if args.show_owner {
            record.push(node.user.clone());
        }
        builder.push_record(record);
        count += 1;
    }

    if count == 0 {
        let hint = if args.all { "" } else { " Use -a to include hidden codes." };
        return Ok(format!("No codes found.{}", hint));
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    Ok(format!("{}\n{} code(s)", table, count))
}

pub fn show(context: &AppContext, identifier: &str) -> Result<String, EngineError> {
    let (node, code) = context.repository.find_code(identifier)?;
    let computer_name = context.repository.computer_name(&code)?;

    let mut lines = vec![
        format!("PK: {}", node.pk),
        format!("UUID: {}", node.uuid),
        format!("Label: {}", code.label),
        format!("Description: {}", code.description),
        format!("Default plugin: {}", code.input_plugin)
    ];
    match &code.location {
        CodeLocation::Remote { remote_exec_path, .. } => {
            lines.push("Type: remote".to_string());
            lines.push(format!("Remote machine: {}", computer_name.unwrap_or_default()));
            lines.push(format!("Remote absolute path: {}", remote_exec_path.display()));
        }
        CodeLocation::Local { folder, rel_path } => {
            lines.push("Type: local".to_string());
            lines.push(format!("Code folder: {}", folder.display()));
            lines.push(format!("Relative executable path: {}", rel_path.display()));
        }
    }
    lines.push(format!("Prepend text: {}", code.prepend_text));
    lines.push(format!("Append text: {}", code.append_text));
    lines.push(format!("Hidden: {}", code.hidden));
    lines.push(format!("Owner: {}", node.user));
    Ok(lines.join("\n"))
}

fn set_hidden(context: &AppContext, identifiers: &[String], hidden: bool) -> Result<String, EngineError> {
    let mut report = Vec::new();
    for identifier in identifiers {
        let (mut node, _) = context.repository.find_code(identifier)?;
        if let Some(code) = node.as_code_mut() {
            code.hidden = hidden;
        }
        context.repository.update(&node)?;
        report.push(format!("Code<{}> {}", node.pk, if hidden { "hidden" } else { "revealed" }));
    }
    Ok(report.join("\n"))
}

pub fn relabel(context: &AppContext, identifier: &str, label: &str) -> Result<String, EngineError> {
    let (mut node, mut code) = context.repository.find_code(identifier)?;
    let computer_name = context.repository.computer_name(&code)?;
    let old_label = code.full_label(computer_name.as_deref());

    code.relabel(label, computer_name.as_deref())?;
    let new_label = code.full_label(computer_name.as_deref());
    node.label = code.label.clone();
    node.kind = NodeKind::Code(code);
    node.rehash()?;
    context.repository.update(&node)?;

    Ok(format!("Relabeled code with ID={} from '{}' to '{}'", node.pk, old_label, new_label))
}

/// Processes whose inputs reference the code `pk`
fn users_of(context: &AppContext, pk: u64) -> Result<Vec<u64>, EngineError> {
    Ok(context
        .checkpoints
        .list()?
        .into_iter()
        .filter(|process| {
            process.inputs.leaves().iter().any(|(_, data)| matches!(data, Data::Code(handle) if handle.pk == pk))
        })
        .map(|process| process.pk)
        .collect())
}

pub fn delete(context: &AppContext, identifiers: &[String]) -> Result<String, EngineError> {
    let mut nodes = Vec::new();
    for identifier in identifiers {
        let (node, _) = context.repository.find_code(identifier)?;
        let users = users_of(context, node.pk)?;
        if let Some(process) = users.first() {
            return Err(EngineError::InvalidOperation(format!(
                "code {} is used by process {} and cannot be deleted",
                node.pk, process
            )));
        }
        nodes.push(node);
    }

    let mut report = Vec::new();
    for node in nodes {
        context.repository.delete(node.pk)?;
        report.push(format!("Code<{}> deleted", node.pk));
    }
    Ok(report.join("\n"))
}

pub fn duplicate(context: &AppContext, identifier: &str, label: Option<String>) -> Result<String, EngineError> {
    let (node, mut code) = context.repository.find_code(identifier)?;
    code.label = label.unwrap_or_else(|| format!("{}_copy", code.label));
    code.hidden = false;

    let computer_name = context.repository.computer_name(&code)?;
    let full_label = code.full_label(computer_name.as_deref());
    if context.repository.find_code(&full_label).is_ok() {
        return Err(EngineError::Value(format!("a code labelled '{}' already exists", full_label)));
    }

    let copy = store_code(context, code, node.description)?;
    Ok(format!("Code '{}' created with pk {}", full_label, copy.pk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{builtin, computer::Computer};

    fn context_with_computer() -> AppContext {
        let context = AppContext::in_memory().unwrap();
        let pk = context.repository.next_pk().unwrap();
        let computer = Computer::new("comp", "localhost").with_workdir("/tmp/workchain");
        context.repository.store(&StoredNode::new(pk, "comp", NodeKind::Computer(computer))).unwrap();
        context
    }

    fn remote_args(label: &str) -> SetupArgs {
        SetupArgs {
            label: Some(label.to_string()),
            input_plugin: Some(builtin::ADD.to_string()),
            on_computer: true,
            computer: Some("comp".to_string()),
            remote_abs_path: Some(PathBuf::from("/remote/abs/path")),
            non_interactive: true,
            ..SetupArgs::default()
        }
    }

    #[test]
    fn test_setup_validates_plugin_and_path() {
        let context = context_with_computer();

        let mut args = remote_args("code");
        args.input_plugin = Some("not.a.plugin".to_string());
        assert!(matches!(setup(&context, args), Err(EngineError::NotExistent(_))));

        let mut args = remote_args("code");
        args.remote_abs_path = Some(PathBuf::from("relative/path"));
        assert!(matches!(setup(&context, args), Err(EngineError::Validation(_))));

        let mut args = remote_args("code");
        args.computer = None;
        assert!(matches!(setup(&context, args), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_hidden_codes_are_listed_only_with_all() {
        let context = context_with_computer();
        setup(&context, remote_args("code")).unwrap();

        set_hidden(&context, &["code".to_string()], true).unwrap();
        assert!(list(&context, &ListArgs::default()).unwrap().starts_with("No codes found"));
        assert!(list(&context, &ListArgs { all: true, ..ListArgs::default() }).unwrap().contains("code@comp"));

        set_hidden(&context, &["code@comp".to_string()], false).unwrap();
        assert!(list(&context, &ListArgs::default()).unwrap().contains("code@comp"));
    }

    #[test]
    fn test_list_filters_by_plugin() {
        let context = context_with_computer();
        setup(&context, remote_args("code")).unwrap();

        let args = ListArgs { input_plugin: Some(builtin::NWCHEM_BASIC.to_string()), ..ListArgs::default() };
        assert!(list(&context, &args).unwrap().starts_with("No codes found"));

        let args = ListArgs { show_owner: true, computer: Some("comp".to_string()), ..ListArgs::default() };
        let report = list(&context, &args).unwrap();
        assert!(report.contains("Owner"));
        assert!(report.contains(&whoami::username()));
    }

    #[test]
    fn test_duplicate_rejects_existing_label() {
        let context = context_with_computer();
        setup(&context, remote_args("code")).unwrap();
        setup(&context, remote_args("other")).unwrap();

        assert!(matches!(duplicate(&context, "code", Some("other".to_string())), Err(EngineError::Value(_))));
        let report = duplicate(&context, "code", None).unwrap();
        assert!(report.starts_with("Code 'code_copy@comp' created"));
    }
}
