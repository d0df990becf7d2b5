use std::{sync::Arc, time::Duration};

use rocksdb::{DB, Options};
use serde_json::json;
use tempfile::TempDir;
use workchain::{
    Data, DataType, Engine, EngineError, Outline, Port, ProcessClass, ProcessInputs, ProcessRegistry, ProcessSpec,
    ProcessState,
    adapter::{
        checkpoint::{InMemoryCheckpointStore, RocksDbCheckpointStore},
        engine::Runner,
        executor::DirectJobExecutor,
        repository::{InMemoryNodeRepository, RocksDbNodeRepository}
    },
    domain::{
        builtin, code::Code, computer::Computer, job, node::{NodeKind, StoredNode}, state::CalcJobState
    },
    port::{checkpoint::CheckpointStore, repository::NodeRepository}
};

const SCENARIO: &str = "test.scenario";
const OUTER: &str = "test.outer";
const BROKEN: &str = "test.broken";
const RESTARTABLE: &str = "test.restartable";

fn registry() -> Arc<ProcessRegistry> {
    let mut registry = ProcessRegistry::with_builtins().unwrap();

    let mut spec = ProcessSpec::new();
    spec.input("a", Port::of(DataType::Int))
        .unwrap()
        .input("b", Port::of(DataType::Float))
        .unwrap()
        .input("c.d", Port::of(DataType::Bool))
        .unwrap()
        .input("e", Port::of(DataType::Int).default(Data::Int(256)))
        .unwrap();
    let outline = Outline::new().step("noop", |_| Ok(()));
    registry.register(ProcessClass::workchain(SCENARIO, spec, outline)).unwrap();

    registry
        .register(ProcessClass::function(BROKEN, ProcessSpec::new(), |_| {
            Err(EngineError::Execution("broken on purpose".to_string()))
        }))
        .unwrap();

    // Runs a nested workchain and a failing function, then fails itself.
    let outline = Outline::new()
        .step("nested", |ctx| {
            let inputs = ProcessInputs::new().with("increment", 1i64).with("terms", 2i64);
            let outcome = ctx.run(builtin::ADD_SERIES, inputs)?;
            assert_eq!(outcome.output("total"), Some(&Data::Int(2)));
            assert_eq!(ctx.stack().current().map(|frame| frame.pk), Some(ctx.pk()));
            assert_eq!(ctx.stack().len(), 1);
            Ok(())
        })
        .step("failing", |ctx| {
            let outcome = ctx.run(BROKEN, ProcessInputs::new())?;
            Err(EngineError::Execution(format!("child ended {}", outcome.state)))
        });
    registry.register(ProcessClass::workchain(OUTER, ProcessSpec::new(), outline)).unwrap();

    let mut spec = job::calc_job_spec().unwrap();
    spec.input("settings.retries", Port::of(DataType::Int).default(Data::Int(0)))
        .unwrap()
        .input("settings.verbose", Port::of(DataType::Bool).required(false))
        .unwrap();
    let class = job::calc_job(RESTARTABLE, spec, |_| Ok(job::JobLayout::default()), builtin::TEMPLATE_REPLACER);
    registry.register(class).unwrap();

    Arc::new(registry)
}

fn in_memory_runner(registry: Arc<ProcessRegistry>) -> Runner {
    Runner::new(
        registry,
        Arc::new(InMemoryNodeRepository::new()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(DirectJobExecutor::new())
    )
}

#[test]
fn builder_fills_defaults_and_nested_namespaces() {
    let registry = registry();
    let mut builder = registry.get(SCENARIO).unwrap().get_builder();

    builder.set("a", 2i64).unwrap().set("b", 2.3).unwrap().set_path("c.d", true).unwrap();
    assert!(matches!(builder.set("c", true), Err(EngineError::Attribute(_))));
    assert!(matches!(builder.set("b", "text"), Err(EngineError::Value(_))));

    let expected = ProcessInputs::new()
        .with("a", 2i64)
        .with("b", 2.3)
        .with("c", ProcessInputs::new().with("d", true))
        .with("e", 256i64);
    assert_eq!(builder.build().unwrap(), expected);

    let mut runner = in_memory_runner(registry);
    let pk = runner.submit_builder(&builder).unwrap();
    assert_eq!(runner.load(pk).unwrap().inputs.data("e"), Some(&Data::Int(256)));
}

#[test]
fn stack_is_empty_after_nested_success_and_failure() {
    let mut runner = in_memory_runner(registry());

    let node = runner.run(OUTER, ProcessInputs::new()).unwrap();
    assert_eq!(node.state, ProcessState::Excepted);
    assert!(node.exception.unwrap().message.contains("child ended excepted"));
    assert!(runner.stack().is_empty());
    assert_eq!(node.children.len(), 2);
}

#[test]
fn calc_job_without_parameters_fails_validation() {
    let registry = registry();
    let repository = Arc::new(InMemoryNodeRepository::new());

    let computer_pk = repository.next_pk().unwrap();
    let computer = Computer::new("comp", "localhost").with_workdir("/tmp/workchain");
    repository.store(&StoredNode::new(computer_pk, "comp", NodeKind::Computer(computer))).unwrap();
    let code_pk = repository.next_pk().unwrap();
    let code = Code::remote("cat", builtin::TEMPLATE_REPLACER, computer_pk, "/bin/cat");
    repository.store(&StoredNode::new(code_pk, "cat", NodeKind::Code(code))).unwrap();

    let builder = job::builder_for_code(repository.as_ref(), &registry, code_pk).unwrap();
    let mut runner =
        Runner::new(registry, repository, Arc::new(InMemoryCheckpointStore::new()), Arc::new(DirectJobExecutor::new()));

    match runner.submit_builder(&builder) {
        Err(EngineError::Validation(message)) => assert!(message.contains("parameters")),
        other => panic!("expected a validation error, got {:?}", other)
    }
}

#[test]
fn waiting_workchain_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let mut opts = Options::default();
    opts.create_if_missing(true);
    let db = Arc::new(DB::open(&opts, dir.path()).unwrap());
    let repository = Arc::new(RocksDbNodeRepository::from_db(db.clone()));
    let checkpoints = Arc::new(RocksDbCheckpointStore::from_db(db));
    let registry = registry();

    let pk = {
        let mut first =
            Runner::new(registry.clone(), repository.clone(), checkpoints.clone(), Arc::new(DirectJobExecutor::new()));
        let inputs = ProcessInputs::new().with("x", 2i64).with("y", 3i64).with("z", 4i64);
        let pk = first.submit(builtin::ADD_MULTIPLY, inputs).unwrap();
        first.tick().unwrap();
        assert_eq!(checkpoints.load(pk).unwrap().state, ProcessState::Waiting);
        pk
    };

    let mut second = Runner::new(registry, repository, checkpoints.clone(), Arc::new(DirectJobExecutor::new()));
    assert_eq!(second.resume_all().unwrap(), vec![pk]);
    let node = second.run_until_terminal(pk).unwrap();

    assert_eq!(node.state, ProcessState::Finished);
    assert_eq!(node.outputs.get("result"), Some(&Data::Int(20)));
    assert!(matches!(second.resume(pk), Err(EngineError::InvalidOperation(_))));
}

#[test]
fn template_replacer_runs_cat_end_to_end() {
    let workdir = TempDir::new().unwrap();
    let registry = registry();
    let repository = Arc::new(InMemoryNodeRepository::new());

    let computer_pk = repository.next_pk().unwrap();
    let computer = Computer::new("local", "localhost").with_workdir(workdir.path());
    repository.store(&StoredNode::new(computer_pk, "local", NodeKind::Computer(computer))).unwrap();
    let code_pk = repository.next_pk().unwrap();
    let code = Code::remote("cat", builtin::TEMPLATE_REPLACER, computer_pk, "/bin/cat");
    repository.store(&StoredNode::new(code_pk, "cat", NodeKind::Code(code))).unwrap();

    let mut builder = job::builder_for_code(repository.as_ref(), &registry, code_pk).unwrap();
    builder.set("parameters", Data::parameters(json!({ "x": 42 })).unwrap()).unwrap();
    builder
        .set("template", Data::parameters(json!({ "input_file_template": "{{ parameters.x }}" })).unwrap())
        .unwrap();

    let mut runner =
        Runner::new(registry, repository, Arc::new(InMemoryCheckpointStore::new()), Arc::new(DirectJobExecutor::new()))
            .with_poll_interval(Duration::from_millis(20));
    let pk = runner.submit_builder(&builder).unwrap();
    let node = runner.run_until_terminal(pk).unwrap();

    assert_eq!(node.state, ProcessState::Finished, "{:?}", node.exception);
    assert_eq!(job::calc_state(&node), Some(CalcJobState::Finished));
    let output = node.outputs.get("output_data").and_then(Data::as_parameters).unwrap();
    assert_eq!(output.get("value"), Some(&json!(42)));
}

#[test]
fn restart_builder_copies_inputs_of_a_submitted_job() {
    let registry = registry();
    let repository = Arc::new(InMemoryNodeRepository::new());

    let computer_pk = repository.next_pk().unwrap();
    let computer = Computer::new("comp", "localhost").with_workdir("/tmp/workchain");
    repository.store(&StoredNode::new(computer_pk, "comp", NodeKind::Computer(computer))).unwrap();
    let code_pk = repository.next_pk().unwrap();
    let code = Code::remote("cat", RESTARTABLE, computer_pk, "/bin/cat");
    repository.store(&StoredNode::new(code_pk, "cat", NodeKind::Code(code))).unwrap();

    let options = json!({ "resources": { "num_machines": 2 }, "max_wallclock_seconds": 600 });
    let options = Data::parameters(options).unwrap();
    let mut builder = job::builder_for_code(repository.as_ref(), &registry, code_pk).unwrap();
    builder
        .set("parameters", Data::parameters(json!({ "x": 1 })).unwrap())
        .unwrap()
        .set("options", options.clone())
        .unwrap()
        .set_path("settings.verbose", true)
        .unwrap();

    let mut runner = Runner::new(
        registry.clone(),
        repository,
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(DirectJobExecutor::new())
    );
    let pk = runner.submit_builder(&builder).unwrap();
    let node = runner.load(pk).unwrap();

    let mut restart = job::builder_restart(&registry, &node).unwrap();
    assert_eq!(restart.process_type(), RESTARTABLE);
    assert_eq!(restart.get("options").unwrap(), Some(&options));
    assert_eq!(restart.get("code").unwrap(), builder.get("code").unwrap());
    assert_eq!(restart.get_path("settings.verbose").unwrap(), Some(&Data::Bool(true)));
    assert_eq!(restart.get_path("settings.retries").unwrap(), Some(&Data::Int(0)));

    // A bad nested leaf rejects the whole batch.
    let update = ProcessInputs::new()
        .with("settings", ProcessInputs::new().with("retries", 3i64).with("verbose", "loud"));
    assert!(restart.set_inputs(&update).is_err());
    assert_eq!(restart.get_path("settings.retries").unwrap(), Some(&Data::Int(0)));

    let update = ProcessInputs::new().with("settings", ProcessInputs::new().with("retries", 3i64));
    restart.set_inputs(&update).unwrap();
    assert_eq!(restart.get_path("settings.retries").unwrap(), Some(&Data::Int(3)));
    assert_eq!(restart.get_path("settings.verbose").unwrap(), Some(&Data::Bool(true)));
}
