//! Entity sources feeding the providers.
//!
//! - `procfs`: processes read from a `/proc` tree
//! - `service_file`: a service inventory file (YAML or JSON), re-read on every scan
//! - `synthetic`: seeded random process churn for demos and soak runs

pub mod procfs;
pub mod service_file;
pub mod synthetic;

pub use procfs::ProcfsSource;
pub use service_file::ServiceFileSource;
pub use synthetic::SyntheticSource;

/// Substring filters on process names. Exclude wins over include.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl NameFilter {
    pub fn new(include: Option<Vec<String>>, exclude: Option<Vec<String>>) -> Self {
        Self {
            include: include.unwrap_or_default(),
            exclude: exclude.unwrap_or_default(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.exclude.iter().any(|s| name.contains(s.as_str())) {
            return false;
        }
        if !self.include.is_empty() {
            return self.include.iter().any(|s| name.contains(s.as_str()));
        }
        true
    }
}
