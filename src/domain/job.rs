//! Calculation jobs: processes that wrap an external executable
//!
//! Every calculation job shares the same two-step outline. `submit` resolves
//! the code and computer, renders the input files and hands a `JobRequest`
//! to the job executor, then suspends on the job. `parse` runs the registered
//! parser over the retrieved files and emits its outputs.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Arc
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{Level, event};

use crate::{
    domain::{
        builder::ProcessBuilder,
        constant,
        data::{Data, DataType, NodeHandle},
        error::EngineError,
        parser::{CalcInfo, RETRIEVED_LINK, RetrievedFolder},
        port::{Port, ProcessSpec},
        process::{ProcessClass, ProcessKind, ProcessNode, StepContext},
        registry::ProcessRegistry,
        state::CalcJobState,
        workchain::Outline
    },
    port::repository::NodeRepository
};

pub const DEFAULT_INPUT_FILE: &str = "aiida.in";
pub const DEFAULT_OUTPUT_FILE: &str = "aiida.out";
pub const DEFAULT_ERROR_FILE: &str = "aiida.err";

const OUTPUT_FILENAME_ATTRIBUTE: &str = "output_filename";
const ERROR_FILENAME_ATTRIBUTE: &str = "error_filename";
const JOB_ID_ATTRIBUTE: &str = "job_id";

/// Everything a job executor needs to launch one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Sandbox name, unique per job
    pub uuid:           String,
    pub executable:     PathBuf,
    pub cmdline_params: Vec<String>,
    /// Computer work directory; the sandbox is created below it
    pub workdir:        PathBuf,
    pub transport_type: String,
    pub scheduler_type: String,
    /// Input files to write into the sandbox, name to content
    pub files:          BTreeMap<String, String>,
    pub stdin_name:     Option<String>,
    pub stdout_name:    String,
    pub stderr_name:    String,
    pub prepend_text:   String,
    pub append_text:    String
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done { exit_code: Option<i32> }
}

/// Result of a finished job, stored in the waiting process's context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id:    String,
    pub exit_code: Option<i32>,
    /// Sandbox holding the files to retrieve
    pub workdir:   PathBuf
}

/// File layout of one job, derived from its inputs at submission time
#[derive(Debug, Clone, PartialEq)]
pub struct JobLayout {
    /// Tera template rendered into the input file, if the code takes one
    pub input_template:  Option<String>,
    pub input_filename:  String,
    pub cmdline_params:  Vec<String>,
    /// Feed the input file on standard input
    pub stdin:           bool,
    pub output_filename: String,
    pub error_filename:  String
}

impl Default for JobLayout {
    fn default() -> Self {
        Self {
            input_template:  None,
            input_filename:  DEFAULT_INPUT_FILE.to_string(),
            cmdline_params:  Vec::new(),
            stdin:           false,
            output_filename: DEFAULT_OUTPUT_FILE.to_string(),
            error_filename:  DEFAULT_ERROR_FILE.to_string()
        }
    }
}

pub type LayoutFn = Arc<dyn Fn(&StepContext<'_>) -> Result<JobLayout, EngineError> + Send + Sync>;

/// Spec shared by every calculation job
pub fn calc_job_spec() -> Result<ProcessSpec, EngineError> {
    let mut spec = ProcessSpec::new();
    spec.input("code", Port::of(DataType::Code).help("Code to run"))?
        .input("parameters", Port::of(DataType::Parameters).help("Parameters rendered into the input file"))?
        .input(
            "options",
            Port::of(DataType::Parameters)
                .default(Data::Parameters(BTreeMap::new()))
                .help("Scheduler and execution options")
        )?
        .input(
            "computer",
            Port::of(DataType::Computer).required(false).help("Computer to run on, for codes stored in the repository")
        )?;
    Ok(spec)
}

/// Assemble a calculation job class from its spec, file layout and parser
pub fn calc_job<L>(name: &str, spec: ProcessSpec, layout: L, parser: &str) -> ProcessClass
where
    L: Fn(&StepContext<'_>) -> Result<JobLayout, EngineError> + Send + Sync + 'static
{
    let layout: LayoutFn = Arc::new(layout);
    let parser_name = parser.to_string();

    let outline = Outline::new()
        .step("submit", move |ctx| submit(ctx, &layout))
        .step("parse", move |ctx| parse(ctx, &parser_name));

    ProcessClass::new(name, ProcessKind::CalcJob, spec, outline).with_parser(parser)
}

fn set_state(ctx: &mut StepContext<'_>, state: CalcJobState) {
    ctx.set_attribute(CalcJobState::ATTRIBUTE, json!(state.as_str()));
}

/// Current calculation sub-state of a process node
pub fn calc_state(node: &ProcessNode) -> Option<CalcJobState> {
    node.attributes.get(CalcJobState::ATTRIBUTE).and_then(|value| value.as_str()).and_then(CalcJobState::from_str)
}

fn render(template: &str, context: &tera::Context) -> Result<String, EngineError> {
    tera::Tera::one_off(template, context, false)
        .map_err(|e| EngineError::Execution(format!("failed to render job template: {}", e)))
}

fn submit(ctx: &mut StepContext<'_>, layout: &LayoutFn) -> Result<(), EngineError> {
    set_state(ctx, CalcJobState::Submitting);

    let code_handle = ctx
        .require("code")?
        .as_code()
        .cloned()
        .ok_or_else(|| EngineError::Validation("input 'code' must be a Code".to_string()))?;
    let repository = ctx.repository();
    let code = repository
        .get(code_handle.pk)?
        .as_code()
        .cloned()
        .ok_or_else(|| EngineError::NotExistent(format!("node {} is not a code", code_handle.pk)))?;

    let computer_pk = match (code.computer(), ctx.input("computer").and_then(Data::as_computer)) {
        (Some(pk), _) => pk,
        (None, Some(handle)) => handle.pk,
        (None, None) => {
            return Err(EngineError::Configuration(format!(
                "code '{}' is stored in the repository; a 'computer' input is required",
                code.label
            )));
        }
    };
    let computer = repository
        .get(computer_pk)?
        .as_computer()
        .cloned()
        .ok_or_else(|| EngineError::NotExistent(format!("node {} is not a computer", computer_pk)))?;
    if !computer.enabled {
        return Err(EngineError::Configuration(format!("computer {} is disabled", computer)));
    }
    let workdir = computer.get_workdir()?.clone();

    let layout = layout(&*ctx)?;

    let mut context = tera::Context::new();
    for (name, value) in ctx.inputs().leaves() {
        context.insert(name.as_str(), &value.to_json()?);
    }
    context.insert("code_label", &code.label);
    context.insert("computer_name", &computer.name);

    let mut files = BTreeMap::new();
    if let Some(template) = &layout.input_template {
        files.insert(layout.input_filename.clone(), render(template, &context)?);
    }
    let cmdline_params =
        layout.cmdline_params.iter().map(|param| render(param, &context)).collect::<Result<Vec<_>, _>>()?;

    let request = JobRequest {
        uuid: ctx.node().uuid.clone(),
        executable: code.executable(),
        cmdline_params,
        workdir,
        transport_type: computer.transport_type.clone(),
        scheduler_type: computer.scheduler_type.clone(),
        files,
        stdin_name: layout.stdin.then(|| layout.input_filename.clone()),
        stdout_name: layout.output_filename.clone(),
        stderr_name: layout.error_filename.clone(),
        prepend_text: [computer.prepend_text.as_str(), code.prepend_text.as_str()].join("\n"),
        append_text: [code.append_text.as_str(), computer.append_text.as_str()].join("\n")
    };

    let handle = ctx.submit_job(request)?;
    event!(Level::INFO, event = constant::job::JOB_SUBMITTED, pk = ctx.pk(), job_id = %handle.job_id);

    ctx.set_attribute(JOB_ID_ATTRIBUTE, json!(handle.job_id));
    ctx.set_attribute(OUTPUT_FILENAME_ATTRIBUTE, json!(layout.output_filename));
    ctx.set_attribute(ERROR_FILENAME_ATTRIBUTE, json!(layout.error_filename));
    ctx.await_job("job", handle);
    set_state(ctx, CalcJobState::WithScheduler);
    Ok(())
}

fn parse(ctx: &mut StepContext<'_>, parser_name: &str) -> Result<(), EngineError> {
    let outcome = ctx
        .job("job")
        .cloned()
        .ok_or_else(|| EngineError::InvalidOperation(format!("process {} has no job result to parse", ctx.pk())))?;

    set_state(ctx, CalcJobState::Retrieving);
    if outcome.exit_code.is_some_and(|code| code != 0) {
        ctx.report(&format!("job {} exited with status {:?}", outcome.job_id, outcome.exit_code));
    }

    let mut retrieved = BTreeMap::new();
    if outcome.workdir.is_dir() {
        retrieved.insert(RETRIEVED_LINK.to_string(), RetrievedFolder::from_dir(&outcome.workdir)?);
    }

    set_state(ctx, CalcJobState::Parsing);
    let attribute = |key: &str, fallback: &str| {
        ctx.attribute(key).and_then(|value| value.as_str()).unwrap_or(fallback).to_string()
    };
    let info = CalcInfo {
        process_type:    ctx.node().process_type.clone(),
        state:           CalcJobState::Parsing,
        output_filename: attribute(OUTPUT_FILENAME_ATTRIBUTE, DEFAULT_OUTPUT_FILE),
        error_filename:  attribute(ERROR_FILENAME_ATTRIBUTE, DEFAULT_ERROR_FILE)
    };

    event!(Level::DEBUG, event = constant::job::PARSING_STARTED, pk = ctx.pk(), parser = %parser_name);
    let parser = ctx.registry().parser(parser_name, &info)?;
    let (success, outputs) = parser.parse_with_retrieved(&retrieved)?;

    if !success {
        set_state(ctx, CalcJobState::Failed);
        event!(Level::WARN, event = constant::job::PARSING_FAILED, pk = ctx.pk(), parser = %parser_name);
        return Err(EngineError::Parsing(format!("parser '{}' failed for process {}", parser_name, ctx.pk())));
    }

    for (name, value) in outputs {
        ctx.out(&name, value)?;
    }
    set_state(ctx, CalcJobState::Finished);
    Ok(())
}

/// Builder for the calculation class of a stored code, with `code` pre-set
pub fn builder_for_code(
    repository: &dyn NodeRepository,
    registry: &ProcessRegistry,
    code_pk: u64
) -> Result<ProcessBuilder, EngineError> {
    let node = repository.get(code_pk)?;
    let code = node.as_code().ok_or_else(|| EngineError::NotExistent(format!("node {} is not a code", code_pk)))?;
    let class = registry.get(&code.input_plugin)?;

    let mut builder = class.get_builder();
    builder.set("code", Data::Code(NodeHandle { pk: node.pk, label: code.label.clone() }))?;
    Ok(builder)
}

/// Builder pre-filled with the inputs of an existing process, for a re-run
pub fn builder_restart(registry: &ProcessRegistry, node: &ProcessNode) -> Result<ProcessBuilder, EngineError> {
    let class = registry.get(&node.process_type)?;
    let mut builder = class.get_builder();
    builder.set_inputs(&node.inputs)?;
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_job_spec_requires_parameters() {
        let class = calc_job("test.job", calc_job_spec().unwrap(), |_| Ok(JobLayout::default()), "test.parser");
        let mut builder = class.get_builder();
        builder.set("code", Data::Code(NodeHandle { pk: 1, label: "code".into() })).unwrap();

        let err = builder.build().unwrap_err();
        assert!(matches!(&err, EngineError::Validation(msg) if msg.contains("parameters")));
    }

    #[test]
    fn test_calc_job_outline_is_submit_then_parse() {
        let class = calc_job("test.job", calc_job_spec().unwrap(), |_| Ok(JobLayout::default()), "test.parser");
        assert_eq!(class.outline().step_names(), vec!["submit", "parse"]);
        assert_eq!(class.parser.as_deref(), Some("test.parser"));
        assert_eq!(class.kind, ProcessKind::CalcJob);
    }
}
