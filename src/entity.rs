//! Tracked entities: processes and services.
//!
//! An entity is shared between the provider table that discovered it and any
//! consumer holding a handle to it. The shared handle is an `Arc<EntityItem<A>>`;
//! its strong count is the entity's reference count, adjusted atomically by
//! whichever thread clones or drops a handle.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::sync::Arc;

/// Key types usable as a stable entity identifier.
pub trait EntityKey: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> EntityKey for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Display attributes of one kind of entity.
///
/// The attribute type names the key type and knows how to render itself as
/// list columns, so every pipeline component can stay generic over it.
pub trait EntityAttributes: Clone + PartialEq + Debug + Send + Sync + 'static {
    type Key: EntityKey;

    /// Short name used in log lines and metric labels ("process", "service").
    const KIND: &'static str;

    /// Column headers, in the order `columns` renders them.
    fn headers() -> &'static [&'static str];

    /// Renders the visible cells of a list row.
    fn columns(&self, key: &Self::Key) -> Vec<String>;

    /// False when `next` describes a different object that reuses the same
    /// key (a recycled pid). The provider then removes and re-adds the entity.
    fn same_incarnation(&self, _next: &Self) -> bool {
        true
    }
}

/// Shared, reference-counted entity handle.
pub type EntityRef<A> = Arc<EntityItem<A>>;

/// One tracked entity. The key never changes after creation.
pub struct EntityItem<A: EntityAttributes> {
    key: A::Key,
    attributes: RwLock<A>,
    first_seen: DateTime<Utc>,
}

impl<A: EntityAttributes> EntityItem<A> {
    pub fn new(key: A::Key, attributes: A) -> EntityRef<A> {
        Arc::new(Self {
            key,
            attributes: RwLock::new(attributes),
            first_seen: Utc::now(),
        })
    }

    pub fn key(&self) -> &A::Key {
        &self.key
    }

    /// Returns a copy of the current attributes.
    pub fn attributes(&self) -> A {
        self.attributes.read().clone()
    }

    /// Replaces the attributes, returning the previous snapshot when they differ.
    ///
    /// Only the owning provider calls this.
    pub(crate) fn replace_attributes(&self, next: A) -> Option<A> {
        let mut guard = self.attributes.write();
        if *guard == next {
            return None;
        }
        Some(std::mem::replace(&mut *guard, next))
    }

    pub fn columns(&self) -> Vec<String> {
        self.attributes.read().columns(&self.key)
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    /// Time since the provider first observed the entity.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.first_seen)
    }
}

impl<A: EntityAttributes> Debug for EntityItem<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityItem")
            .field("kind", &A::KIND)
            .field("key", &self.key)
            .field("attributes", &*self.attributes.read())
            .finish()
    }
}

/// Attributes shown for a process row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessAttributes {
    pub name: String,
    pub parent_pid: Option<u32>,
    pub threads: u32,
    pub working_set_bytes: u64,
    /// CPU usage since the previous scan, in percent of one core.
    pub cpu_percent: f32,
    /// Start time in clock ticks since boot; tells recycled pids apart.
    #[serde(default)]
    pub start_time_ticks: u64,
}

impl EntityAttributes for ProcessAttributes {
    type Key = u32;
    const KIND: &'static str = "process";

    fn headers() -> &'static [&'static str] {
        &["PID", "Name", "Parent PID", "Threads", "Working Set", "CPU %"]
    }

    fn columns(&self, pid: &u32) -> Vec<String> {
        vec![
            pid.to_string(),
            self.name.clone(),
            self.parent_pid.map(|p| p.to_string()).unwrap_or_default(),
            self.threads.to_string(),
            format_bytes(self.working_set_bytes),
            format!("{:.2}", self.cpu_percent),
        ]
    }

    fn same_incarnation(&self, next: &Self) -> bool {
        self.start_time_ticks == next.start_time_ticks
    }
}

/// Current state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Stopped,
    StartPending,
    StopPending,
    Running,
    Paused,
}

impl Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "Stopped",
            ServiceState::StartPending => "Start Pending",
            ServiceState::StopPending => "Stop Pending",
            ServiceState::Running => "Running",
            ServiceState::Paused => "Paused",
        };
        f.write_str(s)
    }
}

/// How a service is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartType {
    Boot,
    System,
    Auto,
    #[default]
    Demand,
    Disabled,
}

/// Attributes shown for a service row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceAttributes {
    pub display_name: String,
    #[serde(default)]
    pub state: ServiceState,
    #[serde(default)]
    pub start_type: StartType,
    #[serde(default)]
    pub process_id: Option<u32>,
}

impl EntityAttributes for ServiceAttributes {
    type Key = String;
    const KIND: &'static str = "service";

    fn headers() -> &'static [&'static str] {
        &["Name", "Display Name", "PID"]
    }

    fn columns(&self, name: &String) -> Vec<String> {
        vec![
            name.clone(),
            self.display_name.clone(),
            self.process_id.map(|p| p.to_string()).unwrap_or_default(),
        ]
    }
}

pub type ProcessItem = EntityItem<ProcessAttributes>;
pub type ServiceItem = EntityItem<ServiceAttributes>;

/// Formats a byte count the way the list columns display it.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    match bytes {
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{} kB", b / KB),
        b => format!("{} B", b),
    }
}
