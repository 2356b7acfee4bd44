//! CLI arguments and subcommands for procmon-sync.
//!
//! This module defines the command-line interface using clap derive: the
//! pipeline run options, configuration flags and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Where the process provider gets its entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProcessSourceKind {
    Procfs,
    Synthetic,
}

impl ProcessSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessSourceKind::Procfs => "procfs",
            ProcessSourceKind::Synthetic => "synthetic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "procfs" => Some(ProcessSourceKind::Procfs),
            "synthetic" => Some(ProcessSourceKind::Synthetic),
            _ => None,
        }
    }
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "procmon-sync",
    about = "Keeps a process list and a service list in sync with background providers",
    long_about = "Keeps a process list and a service list in sync with background providers.\n\n\
                  Provider threads rescan processes (/proc or a synthetic generator) and services \
                  (an inventory file) and hand every change to a single UI thread, which applies it \
                  to its lists and prints them.",
    version = "0.1.0",
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Stop after N UI ticks (default: run until Ctrl+C/SIGTERM)
    #[arg(long)]
    pub ticks: Option<u64>,

    /// UI tick period in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub tick_ms: u64,

    /// Print the full process and service lists every tick
    #[arg(long)]
    pub render: bool,

    /// Print pipeline metrics (Prometheus text format) on exit
    #[arg(long)]
    pub dump_metrics: bool,

    /// Bounded UI queue size (default: unbounded)
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Process source
    #[arg(long, value_enum)]
    pub process_source: Option<ProcessSourceKind>,

    /// Root of the proc filesystem
    #[arg(long)]
    pub proc_root: Option<PathBuf>,

    /// Service inventory file (YAML/JSON)
    #[arg(short = 's', long)]
    pub services_file: Option<PathBuf>,

    /// Include only processes matching these names (comma-separated)
    #[arg(long)]
    pub include_names: Option<String>,

    /// Exclude processes matching these names (comma-separated)
    #[arg(long)]
    pub exclude_names: Option<String>,

    /// Maximum number of processes to scan
    #[arg(long)]
    pub max_processes: Option<usize>,

    /// Ticks a newly added row stays highlighted
    #[arg(long)]
    pub highlight_ticks: Option<u32>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Run one provider pass, reconcile it and print the lists
    Snapshot {
        /// Process source for this snapshot (overrides config)
        #[arg(long, value_enum)]
        source: Option<ProcessSourceKind>,

        /// Print only the N busiest processes
        #[arg(long)]
        top: Option<usize>,
    },
}

/// Splits a comma-separated CLI list.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let args = Args::parse_from([
            "procmon-sync",
            "--ticks",
            "3",
            "--process-source",
            "synthetic",
            "--queue-capacity",
            "64",
            "--exclude-names",
            "kworker, migration",
        ]);
        assert_eq!(args.ticks, Some(3));
        assert_eq!(args.process_source, Some(ProcessSourceKind::Synthetic));
        assert_eq!(args.queue_capacity, Some(64));
        assert_eq!(
            split_list(args.exclude_names.as_deref().unwrap()),
            vec!["kworker", "migration"]
        );
    }

    #[test]
    fn test_parse_snapshot_subcommand() {
        let args = Args::parse_from(["procmon-sync", "snapshot", "--source", "procfs", "--top", "5"]);
        match args.command {
            Some(Commands::Snapshot { source, top }) => {
                assert_eq!(source, Some(ProcessSourceKind::Procfs));
                assert_eq!(top, Some(5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_source_kind_names() {
        for kind in [ProcessSourceKind::Procfs, ProcessSourceKind::Synthetic] {
            assert_eq!(ProcessSourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProcessSourceKind::parse("wmi"), None);
    }
}
