//! procmon-sync - version 0.1.0
//!
//! Runs the process/service notification pipeline with tracing logging.
//! This is the main entry point that wires providers to the UI loop and
//! handles subcommands.

mod cli;
mod commands;
mod config;
mod runtime;

use anyhow::Context;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{error, info, level_filters::LevelFilter};

use cli::{Args, Commands, LogLevel};
use commands::{command_config, command_snapshot};
use config::{resolve_config, show_config, validate_effective_config, Config};
use runtime::{tick_timeout, Pipeline};

/// Longest single wait inside a tick, so shutdown requests are seen promptly.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging initialized with level: {:?}", args.log_level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> anyhow::Result<Config> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Listens for Ctrl+C and SIGTERM on a helper thread and raises `flag`.
fn spawn_signal_listener(flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            runtime.block_on(async {
                let ctrl_c = async {
                    if let Err(e) = signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl+C: {}", e);
                        std::future::pending::<()>().await;
                    }
                };

                #[cfg(unix)]
                let terminate = async {
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(mut s) => {
                            s.recv().await;
                        }
                        Err(e) => {
                            error!("Failed to install SIGTERM handler: {}", e);
                            std::future::pending::<()>().await;
                        }
                    }
                };

                #[cfg(not(unix))]
                let terminate = std::future::pending::<()>();

                tokio::select! {
                    _ = ctrl_c => {
                        info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
                    }
                    _ = terminate => {
                        info!("Received SIGTERM, shutting down gracefully...");
                    }
                }
            });
            flag.store(true, Ordering::Release);
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

/// Runs the pipeline until a signal arrives or the tick limit is reached.
fn run(args: &Args, config: &Config) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(Arc::clone(&shutdown))?;

    let mut pipeline = Pipeline::build(config)?;
    pipeline.start(config)?;
    info!(
        source = config.process_source().as_str(),
        queue_capacity = ?config.queue_capacity,
        "🚀 Pipeline started"
    );

    let tick_period = tick_timeout(args.tick_ms);
    let mut tick: u64 = 0;
    'ui: while !shutdown.load(Ordering::Acquire) {
        let deadline = Instant::now() + tick_period;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if shutdown.load(Ordering::Acquire) {
                break 'ui;
            }
            pipeline
                .ui
                .wait_and_pump((deadline - now).min(MAX_WAIT_SLICE));
        }

        tick += 1;
        println!("{}", pipeline.summary_line(tick));
        if args.render {
            println!("{}", pipeline.render());
        }
        if args.ticks.is_some_and(|limit| tick >= limit) {
            break;
        }
    }

    let stats = pipeline.shutdown();
    let (_, avg, max, min, samples) = stats.pump_duration_ms.snapshot();
    info!(
        ticks = tick,
        enqueued = stats.enqueued_total(),
        processed = stats.processed_total(),
        lost = stats.lost_total(),
        resync_repairs = stats.resync_repairs_total(),
        "Pipeline stopped (pump {:.3}/{:.3}/{:.3} ms min/avg/max over {} pumps)",
        min,
        avg,
        max,
        samples
    );
    if args.dump_metrics {
        print!("{}", stats.encode_text()?);
    }
    Ok(())
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(&args);

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, &args.config_format);
    }

    if let Some(command) = &args.command {
        return match command {
            Commands::Config {
                output,
                format,
                commented,
            } => command_config(output.clone(), format, *commented),

            Commands::Snapshot { source, top } => {
                let config = load_validated_config(&args)?;
                command_snapshot(&config, *source, *top)
            }
        };
    }

    let config = load_validated_config(&args)?;
    run(&args, &config)
}
