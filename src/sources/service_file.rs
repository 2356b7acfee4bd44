//! Service source backed by an inventory file.
//!
//! The file is re-read on every scan, so editing it drives add, modify and
//! remove notifications. YAML by default, JSON for `.json` files:
//!
//! ```yaml
//! services:
//!   - name: spooler
//!     display_name: Print Spooler
//!     state: running
//!     start_type: auto
//!     process_id: 1200
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::entity::{ServiceAttributes, ServiceState};
use crate::error::SourceError;
use crate::provider::EntitySource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    #[serde(flatten)]
    pub attributes: ServiceAttributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceInventory {
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
}

/// Loads an inventory, choosing the parser by extension.
pub fn load_inventory(path: &Path) -> Result<ServiceInventory, SourceError> {
    let content = fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_err = |message: String| SourceError::Parse {
        path: path.to_path_buf(),
        message,
    };
    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string())),
        _ => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string())),
    }
}

pub struct ServiceFileSource {
    path: PathBuf,
}

impl ServiceFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EntitySource<ServiceAttributes> for ServiceFileSource {
    fn name(&self) -> &str {
        "service_file"
    }

    fn scan(&mut self) -> Result<Vec<(String, ServiceAttributes)>, SourceError> {
        let inventory = load_inventory(&self.path)?;
        let services: Vec<(String, ServiceAttributes)> = inventory
            .services
            .into_iter()
            .map(|record| {
                let mut attributes = record.attributes;
                // A stopped service has no host process.
                if attributes.state == ServiceState::Stopped {
                    attributes.process_id = None;
                }
                (record.name, attributes)
            })
            .collect();
        debug!(path = %self.path.display(), count = services.len(), "Loaded service inventory");
        Ok(services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::StartType;
    use tempfile::tempdir;

    #[test]
    fn test_yaml_inventory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("services.yaml");
        fs::write(
            &path,
            r#"
services:
  - name: spooler
    display_name: Print Spooler
    state: running
    start_type: auto
    process_id: 1200
  - name: bits
    display_name: Background Intelligent Transfer Service
    state: stopped
    process_id: 999
"#,
        )
        .unwrap();

        let mut source = ServiceFileSource::new(&path);
        let scan = source.scan().unwrap();
        assert_eq!(scan.len(), 2);
        assert_eq!(scan[0].0, "spooler");
        assert_eq!(scan[0].1.state, ServiceState::Running);
        assert_eq!(scan[0].1.start_type, StartType::Auto);
        assert_eq!(scan[0].1.process_id, Some(1200));
        assert_eq!(scan[1].1.process_id, None);
        assert_eq!(scan[1].1.start_type, StartType::Demand);
    }

    #[test]
    fn test_json_inventory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("services.json");
        fs::write(
            &path,
            r#"{"services":[{"name":"dnscache","display_name":"DNS Client","state":"running","process_id":812}]}"#,
        )
        .unwrap();

        let inventory = load_inventory(&path).unwrap();
        assert_eq!(inventory.services.len(), 1);
        assert_eq!(inventory.services[0].attributes.display_name, "DNS Client");
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(load_inventory(&missing), Err(SourceError::Io { .. })));

        let bad = dir.path().join("bad.yaml");
        fs::write(&bad, "services: [ {name: ").unwrap();
        assert!(matches!(load_inventory(&bad), Err(SourceError::Parse { .. })));
    }
}
