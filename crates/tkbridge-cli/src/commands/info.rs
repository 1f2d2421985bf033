//! Info command - show runtime information.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tkbridge_runtime::{BridgeConfig, Interpreter, InterpreterConfig, ReleaseLevel, runtime_version};

use crate::config::Config;

#[derive(Args)]
pub struct InfoCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct RuntimeInfo<'a> {
    cli_version: &'static str,
    runtime_version: String,
    patchlevel: String,
    release_level: &'static str,
    available_threads: usize,
    config_file: Option<String>,
    bridge: &'a BridgeConfig,
    interpreter: &'a InterpreterConfig,
}

fn release_name(level: ReleaseLevel) -> &'static str {
    match level {
        ReleaseLevel::Alpha => "alpha",
        ReleaseLevel::Beta => "beta",
        ReleaseLevel::Final => "final",
    }
}

impl InfoCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let version = runtime_version();
        let interp = Interpreter::create(config.interpreter.clone())?;
        let patchlevel = interp.runtime_patchlevel()?;
        interp.delete();

        let info = RuntimeInfo {
            cli_version: env!("CARGO_PKG_VERSION"),
            runtime_version: format!("{}.{}", version.major, version.minor),
            patchlevel,
            release_level: release_name(version.release_level),
            available_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            config_file: config.source.as_ref().map(|p| p.display().to_string()),
            bridge: &config.bridge,
            interpreter: &config.interpreter,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            println!("tkbridge Runtime Information");
            println!("============================");
            println!();
            println!("CLI Version:       {}", info.cli_version);
            println!("Runtime Version:   {}", info.runtime_version);
            println!("Patchlevel:        {}", info.patchlevel);
            println!("Release Level:     {}", info.release_level);
            println!("Threads:           {}", info.available_threads);
            println!();
            println!("Configuration:");
            println!(
                "  File:            {}",
                info.config_file.as_deref().unwrap_or("(defaults)")
            );
            println!("  Global timer:    {} ms", info.bridge.global_timer_interval_ms);
            println!("  Timer interval:  {} ms", info.interpreter.timer_interval_ms);
            match info.interpreter.wait_timeout_ms {
                Some(ms) => println!("  Wait timeout:    {} ms", ms),
                None => println!("  Wait timeout:    none"),
            }
            println!("  Safe:            {}", info.interpreter.safe);
        }
        Ok(())
    }
}
