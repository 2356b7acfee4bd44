//! procmon-sync library
//!
//! Keeps a UI-side process list and service list in step with background
//! providers that rescan the system on their own threads.
//!
//! # Pipeline
//!
//! - A [`Provider`] diffs each scan of its [`EntitySource`] against its table
//!   and raises Added / Modified / Removed / Updated on its [`EventBus`],
//!   synchronously on the provider thread.
//! - A [`Marshaller`] subscribed to that bus turns every event into a
//!   [`UiMessage`] on the UI queue, transferring entity references the way
//!   each event kind requires.
//! - The UI thread's [`UiContext`] drains the queue in order and applies each
//!   message to the [`Reconciler`] for its side, which creates, updates and
//!   destroys elements of a [`ListControl`].
//!
//! Entities are `Arc<EntityItem<_>>`; the strong count is the reference
//! count, so a lost or discarded message can never leak or double-free.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use procmon_sync::{ui_queue, Marshaller, PipelineStats, Provider, SyntheticSource, UiContext};
//!
//! let stats = Arc::new(PipelineStats::new().unwrap());
//! let (sender, receiver) = ui_queue(None, Arc::clone(&stats));
//! let mut ui = UiContext::new(receiver, Arc::clone(&stats), 3, 256);
//!
//! let provider = Provider::new(SyntheticSource::new(1, 10));
//! let subscription = Marshaller::attach(provider.events(), sender);
//!
//! provider.run_once().unwrap();
//! ui.pump();
//! assert_eq!(ui.processes().len(), provider.len());
//!
//! subscription.detach();
//! ui.shutdown();
//! ```

pub mod entity;
pub mod error;
pub mod event_bus;
pub mod list_control;
pub mod marshaller;
pub mod message;
pub mod process_view;
pub mod provider;
pub mod reconciler;
pub mod service_view;
pub mod sources;
pub mod stats;
pub mod ui;

pub use entity::{
    EntityAttributes, EntityItem, EntityRef, ProcessAttributes, ProcessItem, ServiceAttributes,
    ServiceItem, ServiceState, StartType,
};
pub use error::{EnqueueError, ReconcileError, SourceError};
pub use event_bus::{
    EventBus, EventKind, LiveEntities, ProviderEvent, ProviderSubscriber, RegistrationToken,
};
pub use list_control::{ElementHandle, ListControl, VirtualList};
pub use marshaller::{Marshaller, Subscription};
pub use message::{ui_queue, EntityMessage, UiMessage, UiReceiver, UiSender};
pub use provider::{EntitySource, Provider, ProviderThread, ScanSummary};
pub use reconciler::{IgnoreReason, ReconcileOutcome, Reconciler};
pub use sources::{NameFilter, ProcfsSource, ServiceFileSource, SyntheticSource};
pub use stats::PipelineStats;
pub use ui::{PumpReport, UiContext};
