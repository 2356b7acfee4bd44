//! Configuration management for procmon-sync.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use anyhow::{bail, Context};
use procmon_sync::sources::NameFilter;
use procmon_sync::ui::DEFAULT_MAX_MESSAGES_PER_PUMP;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::cli::{split_list, Args, ConfigFormat, ProcessSourceKind};

// Default configuration constants
pub const DEFAULT_HIGHLIGHT_TICKS: u32 = 3;
pub const DEFAULT_PROC_ROOT: &str = "/proc";
pub const DEFAULT_PROCESS_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_SERVICE_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_SYNTHETIC_SEED: u64 = 42;

const DEFAULT_LOCATIONS: &[&str] = &[
    "/etc/procmon-sync/procmon-sync.yaml",
    "/etc/procmon-sync/procmon-sync.yml",
    "/etc/procmon-sync/procmon-sync.json",
    "/etc/procmon-sync/procmon-sync.toml",
    "./procmon-sync.yaml",
    "./procmon-sync.yml",
    "./procmon-sync.json",
    "./procmon-sync.toml",
];

/// Effective configuration. Unset keys fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // UI queue and reconciliation
    pub queue_capacity: Option<usize>,
    pub max_messages_per_pump: Option<usize>,
    pub highlight_ticks: Option<u32>,

    // Process provider
    pub process_source: Option<String>,
    pub proc_root: Option<String>,
    pub process_interval_ms: Option<u64>,
    pub include_names: Option<Vec<String>>,
    pub exclude_names: Option<Vec<String>>,
    pub max_processes: Option<usize>,
    pub synthetic_seed: Option<u64>,

    // Service provider
    pub services_file: Option<String>,
    pub service_interval_ms: Option<u64>,

    // Logging
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            max_messages_per_pump: Some(DEFAULT_MAX_MESSAGES_PER_PUMP),
            highlight_ticks: Some(DEFAULT_HIGHLIGHT_TICKS),
            process_source: Some(ProcessSourceKind::Procfs.as_str().to_string()),
            proc_root: Some(DEFAULT_PROC_ROOT.to_string()),
            process_interval_ms: Some(DEFAULT_PROCESS_INTERVAL_MS),
            include_names: None,
            exclude_names: None,
            max_processes: None,
            synthetic_seed: Some(DEFAULT_SYNTHETIC_SEED),
            services_file: None,
            service_interval_ms: Some(DEFAULT_SERVICE_INTERVAL_MS),
            log_level: Some("info".to_string()),
        }
    }
}

impl Config {
    pub fn max_messages_per_pump(&self) -> usize {
        self.max_messages_per_pump
            .unwrap_or(DEFAULT_MAX_MESSAGES_PER_PUMP)
    }

    pub fn highlight_ticks(&self) -> u32 {
        self.highlight_ticks.unwrap_or(DEFAULT_HIGHLIGHT_TICKS)
    }

    /// Process source kind; validation rejects unknown names.
    pub fn process_source(&self) -> ProcessSourceKind {
        self.process_source
            .as_deref()
            .and_then(ProcessSourceKind::parse)
            .unwrap_or(ProcessSourceKind::Procfs)
    }

    pub fn proc_root(&self) -> PathBuf {
        PathBuf::from(self.proc_root.as_deref().unwrap_or(DEFAULT_PROC_ROOT))
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(
            self.process_interval_ms
                .unwrap_or(DEFAULT_PROCESS_INTERVAL_MS),
        )
    }

    pub fn service_interval(&self) -> Duration {
        Duration::from_millis(
            self.service_interval_ms
                .unwrap_or(DEFAULT_SERVICE_INTERVAL_MS),
        )
    }

    pub fn synthetic_seed(&self) -> u64 {
        self.synthetic_seed.unwrap_or(DEFAULT_SYNTHETIC_SEED)
    }

    pub fn name_filter(&self) -> NameFilter {
        NameFilter::new(self.include_names.clone(), self.exclude_names.clone())
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.queue_capacity == Some(0) {
        bail!("queue_capacity must be at least 1 (omit it for an unbounded queue)");
    }
    if cfg.max_messages_per_pump == Some(0) {
        bail!("max_messages_per_pump must be at least 1");
    }
    if cfg.process_interval_ms == Some(0) {
        bail!("process_interval_ms must be greater than 0");
    }
    if cfg.service_interval_ms == Some(0) {
        bail!("service_interval_ms must be greater than 0");
    }

    if let Some(source) = cfg.process_source.as_deref() {
        if ProcessSourceKind::parse(source).is_none() {
            bail!(
                "Invalid process_source '{}', expected 'procfs' or 'synthetic'",
                source
            );
        }
    }

    if let Some(file) = cfg.services_file.as_deref() {
        if !Path::new(file).is_file() {
            bail!("services_file not found: {}", file);
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if args.queue_capacity.is_some() {
        config.queue_capacity = args.queue_capacity;
    }
    if let Some(kind) = args.process_source {
        config.process_source = Some(kind.as_str().to_string());
    }
    if let Some(root) = &args.proc_root {
        config.proc_root = Some(root.to_string_lossy().to_string());
    }
    if let Some(file) = &args.services_file {
        config.services_file = Some(file.to_string_lossy().to_string());
    }
    if let Some(include) = &args.include_names {
        config.include_names = Some(split_list(include));
    }
    if let Some(exclude) = &args.exclude_names {
        config.exclude_names = Some(split_list(exclude));
    }
    if args.max_processes.is_some() {
        config.max_processes = args.max_processes;
    }
    if args.highlight_ticks.is_some() {
        config.highlight_ticks = args.highlight_ticks;
    }

    Ok(config)
}

/// Loads a config file, or the first default location that exists.
/// Missing files yield the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_LOCATIONS.iter().find(|p| Path::new(p).exists()) {
            Some(p) => PathBuf::from(p),
            None => return Ok(Config::default()),
        },
    };

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?,
        Some("toml") => toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in {}", path.display()))?,
        _ => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?,
    };
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Serializes a config in the requested format.
pub fn render_config(config: &Config, format: &ConfigFormat) -> anyhow::Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: &ConfigFormat) -> anyhow::Result<()> {
    println!("{}", render_config(config, format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(validate_effective_config(&cfg).is_ok());
        assert_eq!(cfg.process_source(), ProcessSourceKind::Procfs);
        assert_eq!(cfg.process_interval(), Duration::from_millis(1000));
        assert_eq!(cfg.max_messages_per_pump(), 256);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.queue_capacity = Some(0);
        assert!(validate_effective_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.process_source = Some("wmi".into());
        let err = validate_effective_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("wmi"));

        let mut cfg = Config::default();
        cfg.services_file = Some("/nonexistent/services.yaml".into());
        assert!(validate_effective_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.service_interval_ms = Some(0);
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempdir().unwrap();

        let yaml = dir.path().join("cfg.yaml");
        fs::write(&yaml, "queue_capacity: 128\nprocess_source: synthetic\n").unwrap();
        let cfg = load_config(Some(&yaml)).unwrap();
        assert_eq!(cfg.queue_capacity, Some(128));
        assert_eq!(cfg.process_source(), ProcessSourceKind::Synthetic);
        // Keys absent from the file are unset, and accessors fall back.
        assert_eq!(cfg.highlight_ticks, None);
        assert_eq!(cfg.highlight_ticks(), DEFAULT_HIGHLIGHT_TICKS);

        let json = dir.path().join("cfg.json");
        fs::write(&json, r#"{"highlight_ticks": 7}"#).unwrap();
        assert_eq!(load_config(Some(&json)).unwrap().highlight_ticks(), 7);

        let toml_path = dir.path().join("cfg.toml");
        fs::write(&toml_path, "process_interval_ms = 250\n").unwrap();
        assert_eq!(
            load_config(Some(&toml_path)).unwrap().process_interval(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        fs::write(&path, "queue_capacity: 10\nexclude_names: [a]\n").unwrap();

        let args = Args::parse_from([
            "procmon-sync",
            "--config",
            path.to_str().unwrap(),
            "--queue-capacity",
            "20",
            "--exclude-names",
            "b,c",
        ]);
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.queue_capacity, Some(20));
        assert_eq!(cfg.exclude_names, Some(vec!["b".to_string(), "c".to_string()]));
    }

    #[test]
    fn test_render_all_formats() {
        let cfg = Config::default();
        for format in [ConfigFormat::Yaml, ConfigFormat::Json, ConfigFormat::Toml] {
            let text = render_config(&cfg, &format).unwrap();
            assert!(text.contains("highlight_ticks"));
        }
    }
}
