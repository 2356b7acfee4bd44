//! Snapshot command implementation.
//!
//! Runs one pass of each provider through the full pipeline and prints the
//! reconciled lists.

use std::thread;
use std::time::{Duration, Instant};

use procmon_sync::entity::format_bytes;

use crate::cli::ProcessSourceKind;
use crate::config::Config;
use crate::runtime::Pipeline;

/// Gap between the warm-up pass and the measured pass when CPU is shown.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(500);

/// Prints one reconciled snapshot of the process and service lists.
pub fn command_snapshot(
    config: &Config,
    source: Option<ProcessSourceKind>,
    top: Option<usize>,
) -> anyhow::Result<()> {
    let mut config = config.clone();
    if let Some(kind) = source {
        config.process_source = Some(kind.as_str().to_string());
    }

    println!("📸 procmon-sync snapshot ({})", config.process_source().as_str());
    println!("==============================");

    let start = Instant::now();
    let mut pipeline = Pipeline::build(&config)?;

    // CPU percent needs two samples.
    if top.is_some() {
        pipeline.run_once()?;
        pipeline.drain();
        thread::sleep(CPU_SAMPLE_WINDOW);
    }
    pipeline.run_once()?;
    let applied = pipeline.drain();

    match top {
        Some(n) => {
            println!("\nTop {} processes by CPU:", n);
            for entity in pipeline.ui.processes().top_by_cpu(n) {
                let a = entity.attributes();
                println!(
                    "   ├─ {:>7}  {:<24} {:>6.2}%  {}",
                    entity.key(),
                    a.name,
                    a.cpu_percent,
                    format_bytes(a.working_set_bytes)
                );
            }
        }
        None => println!("\n{}", pipeline.render()),
    }

    println!("{}", pipeline.summary_line(1));
    println!(
        "\n✅ Applied {} messages in {:.2}ms",
        applied,
        start.elapsed().as_secs_f64() * 1000.0
    );

    pipeline.shutdown();
    Ok(())
}
