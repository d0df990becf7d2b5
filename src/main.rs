//! # Workchain CLI
//!
//! Command-line front end of the workchain engine.
//!
//! ## Usage
//!
//! ```bash
//! # Register a computer and a code installed on it
//! workchain computer setup -n -L localhost -w /tmp/workchain
//! workchain code setup -n -L cat -P core.templatereplacer --on-computer -Y localhost --remote-abs-path /bin/cat
//!
//! # Run a workchain and inspect it
//! workchain process run core.arithmetic.add_multiply x=2 y=3 z=4
//! workchain process list -a
//!
//! # Continue everything that was interrupted
//! workchain process resume --all
//! ```
//!
//! Exit codes are zero on success and non-zero on validation (2), lookup (3),
//! lifecycle (4) and configuration (5) failures.

use std::process::ExitCode;

use clap::Parser;
use workchain::{
    AppContext, EngineError,
    cli::{Cli, Commands, code, computer, process, rehash},
    config, telemetry
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(report) => {
            if !report.is_empty() {
                println!("{}", report);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn execute(cli: Cli) -> Result<String, EngineError> {
    let mut app_config = config::load_config()?;
    if let Some(storage) = cli.storage {
        app_config.storage = storage;
    }
    telemetry::init_tracing(&app_config.log_level);

    let context = AppContext::from_config(app_config)?;

    let token = context.cancellation.clone();
    ctrlc::set_handler(move || token.cancel())
        .map_err(|e| EngineError::Generic(format!("Failed to install the Ctrl-C handler: {}", e)))?;

    match cli.command {
        Commands::Code { command } => code::handle(&context, command),
        Commands::Computer { command } => computer::handle(&context, command),
        Commands::Process { command } => process::handle(context, command).await,
        Commands::Rehash(args) => rehash::rehash(context.repository.as_ref(), &args)
    }
}
