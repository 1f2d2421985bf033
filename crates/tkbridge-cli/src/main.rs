//! tkb - drive the tkbridge runtime from the command line.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tkbridge_runtime::{Bridge, BridgeError, FatalSignal};
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;
mod interrupt;

#[derive(Parser)]
#[command(
    name = "tkb",
    version,
    about = "Run scripts on an embedded single-threaded interpreter",
    long_about = "tkb embeds a single-threaded interpreter and serves it to other threads.\n\n\
                  Run a script:  tkb run script.tcl\n\
                  Eval code:     tkb eval 'expr {6 * 7}'\n\
                  Stress it:     tkb stress --threads 8 --count 500"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a script file, then serve its pending events
    Run(commands::run::RunCommand),

    /// Evaluate a script and print the result
    Eval(commands::eval::EvalCommand),

    /// Send commands from many threads and report dispatch statistics
    Stress(commands::stress::StressCommand),

    /// Show runtime information
    Info(commands::info::InfoCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    let config = config::load_config(cli.config.as_deref())?;
    let bridge = Bridge::install_global(config.bridge.clone())?;
    interrupt::install(bridge)?;

    let result = match &cli.command {
        Commands::Run(cmd) => cmd.run(&config),
        Commands::Eval(cmd) => cmd.run(&config),
        Commands::Stress(cmd) => cmd.run(&config),
        Commands::Info(cmd) => cmd.run(&config),
    };

    // `exit` in a script arrives as a fatal signal.
    if let Err(e) = &result {
        match e.downcast_ref::<BridgeError>() {
            Some(BridgeError::Fatal(FatalSignal::Exit(code))) => std::process::exit(*code),
            Some(BridgeError::Fatal(FatalSignal::Interrupt)) => {
                std::process::exit(interrupt::INTERRUPTED_EXIT_CODE)
            }
            _ => {}
        }
    }
    result
}
