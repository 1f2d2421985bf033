//! CLI command implementations.

pub mod eval;
pub mod info;
pub mod run;
pub mod stress;

use anyhow::Result;
use tkbridge_runtime::{FatalSignal, Interpreter, Outcome};

/// Define an `exit ?code?` proc that ends the process through a fatal
/// signal, so `catch` cannot stop it.
pub(crate) fn install_exit(interp: &Interpreter) -> Result<()> {
    let id = interp.register_callback(|args: &[String]| -> Outcome {
        let code = args.first().map(String::as_str).unwrap_or("0");
        match code.parse::<i32>() {
            Ok(code) => Outcome::Fatal(FatalSignal::Exit(code)),
            Err(_) => Outcome::error(format!("expected integer but got \"{}\"", code)),
        }
    })?;
    interp.evaluate(&format!(
        "proc exit {{{{code 0}}}} {{ host_callback {} $code }}",
        id
    ))?;
    Ok(())
}
