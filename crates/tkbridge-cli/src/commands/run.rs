//! Run command - evaluate a script file on the main thread.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tkbridge_runtime::{Interpreter, run_global_loop};
use tracing::debug;

use crate::config::Config;

#[derive(Args)]
pub struct RunCommand {
    /// Script file to evaluate
    pub file: PathBuf,

    /// Arguments exposed to the script as `argv`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Return right after the script instead of serving pending events
    #[arg(long = "no-loop")]
    pub no_loop: bool,

    /// Evaluate in a safe interpreter
    #[arg(long)]
    pub safe: bool,
}

impl RunCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let source = std::fs::read_to_string(&self.file)
            .with_context(|| format!("Failed to read {}", self.file.display()))?;

        let interp_config = config.interpreter.clone().safe(config.interpreter.safe || self.safe);
        let interp = Interpreter::create(interp_config)?;
        super::install_exit(&interp)?;
        interp.set_variable("argv0", &self.file.display().to_string())?;
        interp.set_variable("argv", &Interpreter::merge_list(&self.args))?;
        interp.set_variable("argc", &self.args.len().to_string())?;

        debug!(file = %self.file.display(), "evaluating script");
        interp
            .evaluate(&source)
            .with_context(|| format!("Error in {}", self.file.display()))?;

        if !self.no_loop {
            // Timers and idle callbacks the script scheduled.
            run_global_loop(true)?;
        }
        interp.delete();
        Ok(())
    }
}
