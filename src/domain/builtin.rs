//! Built-in process classes

use std::collections::BTreeMap;

use crate::domain::{
    data::{Data, DataType},
    error::EngineError,
    inputs::ProcessInputs,
    job::{self, DEFAULT_INPUT_FILE, DEFAULT_OUTPUT_FILE, JobLayout},
    parser::{NwchemBasicParser, Parser, TemplateReplacerParser},
    port::{Port, ProcessSpec},
    process::{ProcessClass, StepContext},
    registry::ProcessRegistry,
    workchain::Outline
};

pub const ADD: &str = "core.arithmetic.add";
pub const ADD_MULTIPLY: &str = "core.arithmetic.add_multiply";
pub const ADD_SERIES: &str = "core.arithmetic.add_series";
pub const TEMPLATE_REPLACER: &str = "core.templatereplacer";
pub const NWCHEM_BASIC: &str = "nwchem.basic";

const NWCHEM_TEMPLATE: &str = r#"start {{ parameters.title | default(value="workchain") }}
title "{{ parameters.title | default(value="workchain") }}"
geometry units {{ parameters.units | default(value="angstroms") }}
{% for site in structure.sites %}  {{ site.symbol }} {{ site.position.0 }} {{ site.position.1 }} {{ site.position.2 }}
{% endfor %}end
basis
  * library {{ parameters.basis | default(value="sto-3g") }}
end
task {{ parameters.theory | default(value="scf") }} {{ parameters.task | default(value="energy") }}
"#;

pub fn register(registry: &mut ProcessRegistry) -> Result<(), EngineError> {
    registry.register(add()?)?;
    registry.register(add_multiply()?)?;
    registry.register(add_series()?)?;
    registry.register(template_replacer()?)?;
    registry.register(nwchem_basic()?)?;

    registry.register_parser(TEMPLATE_REPLACER, |info| {
        Ok(Box::new(TemplateReplacerParser::new(info)?) as Box<dyn Parser>)
    })?;
    registry.register_parser(NWCHEM_BASIC, |info| Ok(Box::new(NwchemBasicParser::new(info)?) as Box<dyn Parser>))?;
    Ok(())
}

fn number() -> Port {
    Port::of(DataType::Int).valid_type(DataType::Float)
}

fn sum(left: &Data, right: &Data) -> Result<Data, EngineError> {
    match (left, right) {
        (Data::Int(a), Data::Int(b)) => Ok(Data::Int(a + b)),
        _ => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => Ok(Data::Float(a + b)),
            _ => Err(EngineError::Value(format!("cannot add {} and {}", left.data_type(), right.data_type())))
        }
    }
}

fn product(left: &Data, right: &Data) -> Result<Data, EngineError> {
    match (left, right) {
        (Data::Int(a), Data::Int(b)) => Ok(Data::Int(a * b)),
        _ => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => Ok(Data::Float(a * b)),
            _ => Err(EngineError::Value(format!("cannot multiply {} and {}", left.data_type(), right.data_type())))
        }
    }
}

fn add() -> Result<ProcessClass, EngineError> {
    let mut spec = ProcessSpec::new();
    spec.input("x", number().help("Left operand"))?
        .input("y", number().help("Right operand"))?
        .output("sum", number())?;

    Ok(ProcessClass::function(ADD, spec, |ctx| {
        let total = sum(ctx.require("x")?, ctx.require("y")?)?;
        ctx.out("sum", total)
    })
    .with_description("Add two numbers"))
}

/// `(x + y) * z`, with the addition run as a child process
fn add_multiply() -> Result<ProcessClass, EngineError> {
    let mut spec = ProcessSpec::new();
    spec.input("x", number())?.input("y", number())?.input("z", number())?.output("result", number())?;

    let outline = Outline::new()
        .step("add", |ctx| {
            let inputs = ProcessInputs::new()
                .with("x", ctx.require("x")?.clone())
                .with("y", ctx.require("y")?.clone());
            let handle = ctx.submit(ADD, inputs)?;
            ctx.to_context("addition", handle);
            Ok(())
        })
        .step("multiply", |ctx| {
            let addition = ctx
                .child("addition")
                .cloned()
                .ok_or_else(|| EngineError::InvalidOperation("addition was not awaited".to_string()))?;
            if !addition.is_finished() {
                return Err(EngineError::Execution(format!("sub process {} did not finish", addition.pk)));
            }
            let total = addition
                .output("sum")
                .ok_or_else(|| EngineError::Execution(format!("sub process {} has no 'sum'", addition.pk)))?;
            let result = product(total, ctx.require("z")?)?;
            ctx.out("result", result)
        });

    Ok(ProcessClass::workchain(ADD_MULTIPLY, spec, outline).with_description("Add two numbers, then multiply"))
}

fn series_pending(ctx: &StepContext<'_>) -> bool {
    let done = ctx.data("done").and_then(Data::as_int).unwrap_or(0);
    let terms = ctx.input("terms").and_then(Data::as_int).unwrap_or(0);
    done < terms
}

/// Repeated addition of `increment`, one nested run per term
fn add_series() -> Result<ProcessClass, EngineError> {
    let mut spec = ProcessSpec::new();
    spec.input("start", number().default(Data::Int(0)))?
        .input("increment", number())?
        .input("terms", Port::of(DataType::Int))?
        .output("total", number())?;

    let outline = Outline::new()
        .step("setup", |ctx| {
            let start = ctx.require("start")?.clone();
            ctx.set("total", start);
            ctx.set("done", 0i64);
            Ok(())
        })
        .while_(
            "terms_pending",
            series_pending,
            Outline::new().step("accumulate", |ctx| {
                let total = ctx.data("total").cloned().unwrap_or(Data::Int(0));
                let inputs = ProcessInputs::new().with("x", total).with("y", ctx.require("increment")?.clone());
                let outcome = ctx.run(ADD, inputs)?;
                let next = outcome
                    .output("sum")
                    .cloned()
                    .ok_or_else(|| EngineError::Execution(format!("sub process {} did not finish", outcome.pk)))?;
                let done = ctx.data("done").and_then(Data::as_int).unwrap_or(0);
                ctx.set("total", next);
                ctx.set("done", done + 1);
                Ok(())
            })
        )
        .step("result", |ctx| {
            let total = ctx.data("total").cloned().unwrap_or(Data::Int(0));
            ctx.out("total", total)
        });

    Ok(ProcessClass::workchain(ADD_SERIES, spec, outline).with_description("Sum a series by repeated addition"))
}

fn template_value<'a>(template: &'a BTreeMap<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    template.get(key).and_then(|value| value.as_str())
}

fn template_layout(ctx: &StepContext<'_>) -> Result<JobLayout, EngineError> {
    let template = ctx
        .require("template")?
        .as_parameters()
        .ok_or_else(|| EngineError::Validation("input 'template' must be Parameters".to_string()))?;

    let cmdline_params = match template.get("cmdline_params") {
        Some(serde_json::Value::Array(params)) => {
            params.iter().map(|param| param.as_str().map(str::to_string).unwrap_or_else(|| param.to_string())).collect()
        }
        _ => Vec::new()
    };
    let input_template = template_value(template, "input_file_template").map(str::to_string);
    let input_filename = template_value(template, "input_file_name").unwrap_or(DEFAULT_INPUT_FILE).to_string();

    // Without an explicit input file name the rendered input is piped to the code.
    Ok(JobLayout {
        stdin: input_template.is_some() && template_value(template, "input_file_name").is_none(),
        input_template,
        input_filename,
        cmdline_params,
        output_filename: template_value(template, "output_file_name").unwrap_or(DEFAULT_OUTPUT_FILE).to_string(),
        ..JobLayout::default()
    })
}

/// Renders `template.input_file_template` and runs the code on it
fn template_replacer() -> Result<ProcessClass, EngineError> {
    let mut spec = job::calc_job_spec()?;
    spec.input(
        "template",
        Port::of(DataType::Parameters)
            .help("input_file_template, input_file_name, cmdline_params, output_file_name")
    )?
    .output("output_data", Port::of(DataType::Parameters))?;

    Ok(job::calc_job(TEMPLATE_REPLACER, spec, template_layout, TEMPLATE_REPLACER)
        .with_description("Render a template into an input file and run a code on it"))
}

fn nwchem_layout(_: &StepContext<'_>) -> Result<JobLayout, EngineError> {
    Ok(JobLayout {
        input_template: Some(NWCHEM_TEMPLATE.to_string()),
        cmdline_params: vec![DEFAULT_INPUT_FILE.to_string()],
        ..JobLayout::default()
    })
}

fn nwchem_basic() -> Result<ProcessClass, EngineError> {
    let mut spec = job::calc_job_spec()?;
    spec.input("structure", Port::of(DataType::Structure).help("Molecule to compute"))?
        .output("parameters", Port::of(DataType::Parameters))?
        .output("trajectory", Port::of(DataType::Trajectory).required(false))?;

    Ok(job::calc_job(NWCHEM_BASIC, spec, nwchem_layout, NWCHEM_BASIC).with_description("NWChem SCF and geometry runs"))
}
