//! Stress command - hammer one interpreter from many threads.

use anyhow::{Result, anyhow, bail};
use clap::Args;
use serde::Serialize;
use std::thread;
use std::time::Instant;
use tkbridge_runtime::{BridgeResult, DispatchStatsSnapshot, InterpreterThread};
use tracing::debug;

use crate::config::Config;

#[derive(Args)]
pub struct StressCommand {
    /// Number of calling threads
    #[arg(long, short = 't', default_value_t = 4)]
    pub threads: usize,

    /// Commands sent by each thread
    #[arg(long, short = 'n', default_value_t = 1000)]
    pub count: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StressReport {
    threads: usize,
    count: usize,
    elapsed_ms: u128,
    commands_per_sec: f64,
    counter: String,
    mismatched: usize,
    dispatch: DispatchStatsSnapshot,
}

impl StressCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        if self.threads == 0 {
            bail!("--threads must be at least 1");
        }

        let worker = InterpreterThread::spawn(config.interpreter.clone())?;
        let interp = worker.handle().clone();
        interp.evaluate("set counter 0")?;
        let id = interp.register_callback(|args: &[String]| -> anyhow::Result<i64> {
            let n: i64 = args.first().map(String::as_str).unwrap_or("").parse()?;
            Ok(n * 2)
        })?;

        debug!(threads = self.threads, count = self.count, "starting stress run");
        let started = Instant::now();
        let callers = (0..self.threads)
            .map(|t| {
                let interp = interp.clone();
                let id = id.clone();
                let count = self.count;
                thread::Builder::new()
                    .name(format!("tkb-stress-{}", t))
                    .spawn(move || -> BridgeResult<usize> {
                        let mut mismatched = 0;
                        for j in 0..count {
                            let value = interp
                                .evaluate(&format!("incr counter; host_callback {} {}", id, j))?;
                            if value != (j * 2).to_string() {
                                mismatched += 1;
                            }
                        }
                        Ok(mismatched)
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut mismatched = 0;
        for caller in callers {
            mismatched += caller
                .join()
                .map_err(|_| anyhow!("stress thread panicked"))??;
        }
        let elapsed = started.elapsed();

        let counter = interp.get_variable("counter")?.unwrap_or_default();
        let dispatch = interp.stats();
        worker.shutdown()?;

        let total = self.threads * self.count;
        let report = StressReport {
            threads: self.threads,
            count: self.count,
            elapsed_ms: elapsed.as_millis(),
            commands_per_sec: total as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
            counter,
            mismatched,
            dispatch,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("Stress Run");
            println!("==========");
            println!();
            println!("Threads:      {}", report.threads);
            println!("Per thread:   {}", report.count);
            println!("Elapsed:      {} ms", report.elapsed_ms);
            println!("Throughput:   {:.0} commands/s", report.commands_per_sec);
            println!("Counter:      {}", report.counter);
            println!("Mismatched:   {}", report.mismatched);
            println!();
            println!("Dispatch:");
            println!("  Submitted:  {}", report.dispatch.submitted);
            println!("  Completed:  {}", report.dispatch.completed);
            println!("  Failed:     {}", report.dispatch.failed);
        }

        if report.mismatched > 0 || report.counter != total.to_string() {
            bail!("stress run lost or mixed up results");
        }
        Ok(())
    }
}
