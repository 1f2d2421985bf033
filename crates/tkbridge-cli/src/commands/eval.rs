//! Eval command - evaluate a script given on the command line.

use anyhow::Result;
use clap::Args;
use tkbridge_runtime::Interpreter;

use crate::config::Config;

#[derive(Args)]
pub struct EvalCommand {
    /// Script to evaluate
    pub script: String,

    /// Evaluate in a safe interpreter
    #[arg(long)]
    pub safe: bool,
}

impl EvalCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let interp_config = config.interpreter.clone().safe(config.interpreter.safe || self.safe);
        let interp = Interpreter::create(interp_config)?;
        super::install_exit(&interp)?;

        let result = interp.evaluate(&self.script);
        interp.delete();
        let value = result?;
        if !value.is_empty() {
            println!("{}", value);
        }
        Ok(())
    }
}
