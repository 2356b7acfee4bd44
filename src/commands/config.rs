//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: &ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let content = generate_config(format, commented)?;
    let output = output.unwrap_or_else(|| PathBuf::from("procmon-sync.yaml"));

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Renders the default configuration, with a comment header for YAML.
pub fn generate_config(format: &ConfigFormat, commented: bool) -> anyhow::Result<String> {
    let content = render_config(&Config::default(), format)?;
    Ok(match format {
        ConfigFormat::Yaml if commented => add_config_comments(content),
        _ => content,
    })
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# procmon-sync Configuration
# ==========================
#
# UI Queue
# --------
# queue_capacity: null         # Bounded UI queue size (null = unbounded); full queue drops notifications
# max_messages_per_pump: 256   # Messages the UI thread applies per pump
# highlight_ticks: 3           # Ticks a newly added row stays highlighted
#
# Process Provider
# ----------------
# process_source: "procfs"     # "procfs" or "synthetic"
# proc_root: "/proc"           # Root of the proc filesystem
# process_interval_ms: 1000    # Rescan period
# include_names: null          # Include only processes matching these names
# exclude_names: null          # Exclude processes matching these names (wins over include)
# max_processes: null          # Maximum processes to scan
# synthetic_seed: 42           # Seed for the synthetic source
#
# Service Provider
# ----------------
# services_file: null          # YAML/JSON service inventory (null = service provider disabled)
# service_interval_ms: 2000    # Rescan period
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_commented_yaml_still_parses() {
        let text = generate_config(&ConfigFormat::Yaml, true).unwrap();
        assert!(text.starts_with("# procmon-sync Configuration"));
        let parsed: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_comments_only_for_yaml() {
        let text = generate_config(&ConfigFormat::Json, true).unwrap();
        assert!(text.trim_start().starts_with('{'));
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.toml");
        command_config(Some(path.clone()), &ConfigFormat::Toml, false).unwrap();
        let parsed: Config = toml::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
