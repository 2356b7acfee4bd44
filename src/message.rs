//! Messages delivered to the UI thread and the queue that carries them.
//!
//! The queue is a crossbeam channel with any number of producers (one
//! marshaller per provider) and exactly one consumer, the UI thread. Channel
//! order is FIFO per producer. Messages own their payload handles, so any
//! message dropped without being processed (queue full, consumer gone,
//! discarded at shutdown) releases its entity reference on the spot.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

use crate::entity::{EntityAttributes, EntityItem, EntityRef, ProcessAttributes, ServiceAttributes};
use crate::error::EnqueueError;
use crate::stats::PipelineStats;

/// Notification for one entity side, as seen by a reconciler.
#[derive(Debug)]
pub enum EntityMessage<A: EntityAttributes> {
    /// Owns one reference, handed to the UI binding on processing.
    Added { entity: EntityRef<A>, run_id: u64 },
    /// Borrows: the handle is non-owning and the provider keeps the entity
    /// alive. `previous` is a copy of the attributes before the change.
    Modified {
        key: A::Key,
        entity: Weak<EntityItem<A>>,
        previous: A,
    },
    /// Owns one reference, released once the binding is torn down.
    Removed { entity: EntityRef<A> },
    /// End of a provider pass. `resync` is set after notifications were
    /// lost and holds every entity live at the end of that pass.
    BatchCompleted {
        run_id: u64,
        resync: Option<Vec<EntityRef<A>>>,
    },
}

impl<A: EntityAttributes> EntityMessage<A> {
    pub fn label(&self) -> &'static str {
        match self {
            EntityMessage::Added { .. } => "added",
            EntityMessage::Modified { .. } => "modified",
            EntityMessage::Removed { .. } => "removed",
            EntityMessage::BatchCompleted { .. } => "batch_completed",
        }
    }

    /// The entity key, for messages that concern a single entity.
    pub fn key(&self) -> Option<&A::Key> {
        match self {
            EntityMessage::Added { entity, .. } | EntityMessage::Removed { entity } => {
                Some(entity.key())
            }
            EntityMessage::Modified { key, .. } => Some(key),
            EntityMessage::BatchCompleted { .. } => None,
        }
    }
}

/// Everything the UI thread can receive.
#[derive(Debug)]
pub enum UiMessage {
    Process(EntityMessage<ProcessAttributes>),
    Service(EntityMessage<ServiceAttributes>),
}

impl UiMessage {
    /// Metric label, e.g. `process_added`.
    pub fn label(&self) -> &'static str {
        match self {
            UiMessage::Process(m) => match m {
                EntityMessage::Added { .. } => "process_added",
                EntityMessage::Modified { .. } => "process_modified",
                EntityMessage::Removed { .. } => "process_removed",
                EntityMessage::BatchCompleted { .. } => "processes_updated",
            },
            UiMessage::Service(m) => match m {
                EntityMessage::Added { .. } => "service_added",
                EntityMessage::Modified { .. } => "service_modified",
                EntityMessage::Removed { .. } => "service_removed",
                EntityMessage::BatchCompleted { .. } => "services_updated",
            },
        }
    }
}

impl UiMessage {
    /// The entity key as text, for log lines.
    pub fn key_text(&self) -> Option<String> {
        match self {
            UiMessage::Process(m) => m.key().map(|k| k.to_string()),
            UiMessage::Service(m) => m.key().map(|k| k.to_string()),
        }
    }
}

impl From<EntityMessage<ProcessAttributes>> for UiMessage {
    fn from(m: EntityMessage<ProcessAttributes>) -> Self {
        UiMessage::Process(m)
    }
}

impl From<EntityMessage<ServiceAttributes>> for UiMessage {
    fn from(m: EntityMessage<ServiceAttributes>) -> Self {
        UiMessage::Service(m)
    }
}

/// Creates the UI queue. `None` capacity means unbounded.
pub fn ui_queue(capacity: Option<usize>, stats: Arc<PipelineStats>) -> (UiSender, UiReceiver) {
    let (tx, rx) = match capacity {
        Some(cap) => crossbeam_channel::bounded(cap),
        None => crossbeam_channel::unbounded(),
    };
    debug!(?capacity, "UI queue created");
    (
        UiSender {
            tx,
            stats: Arc::clone(&stats),
        },
        UiReceiver { rx, stats },
    )
}

/// Producer side. Cloned into each marshaller.
#[derive(Clone)]
pub struct UiSender {
    tx: Sender<UiMessage>,
    stats: Arc<PipelineStats>,
}

impl UiSender {
    /// Enqueues without blocking. On failure the message, and with it any
    /// reference it owns, is dropped before this returns.
    pub fn post(&self, message: UiMessage) -> Result<(), EnqueueError> {
        self.send(message).map_err(|(e, _)| e)
    }

    /// Like `post`, but a message that could not be enqueued is handed back.
    pub(crate) fn send(&self, message: UiMessage) -> Result<(), (EnqueueError, UiMessage)> {
        let label = message.label();
        match self.tx.try_send(message) {
            Ok(()) => {
                self.stats.record_enqueued(label);
                Ok(())
            }
            Err(TrySendError::Full(m)) => {
                self.stats.record_lost(label);
                Err((EnqueueError::Full, m))
            }
            Err(TrySendError::Disconnected(m)) => {
                self.stats.record_lost(label);
                Err((EnqueueError::Disconnected, m))
            }
        }
    }
}

/// Consumer side, owned by the UI thread.
pub struct UiReceiver {
    rx: Receiver<UiMessage>,
    stats: Arc<PipelineStats>,
}

impl UiReceiver {
    pub fn try_recv(&self) -> Result<Option<UiMessage>, EnqueueError> {
        match self.rx.try_recv() {
            Ok(m) => Ok(Some(m)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(EnqueueError::Disconnected),
        }
    }

    /// Waits up to `timeout` for one message. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<UiMessage>, EnqueueError> {
        match self.rx.recv_timeout(timeout) {
            Ok(m) => Ok(Some(m)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(EnqueueError::Disconnected),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Takes every queued message and drops it, releasing payload references.
    pub fn discard_pending(&self) -> usize {
        let mut discarded = 0;
        for message in self.rx.try_iter() {
            debug!(message = message.label(), "Discarding undelivered message");
            drop(message);
            discarded += 1;
        }
        if discarded > 0 {
            self.stats.record_discarded(discarded as u64);
        }
        discarded
    }
}

impl Drop for UiReceiver {
    fn drop(&mut self) {
        let discarded = self.discard_pending();
        if discarded > 0 {
            info!(discarded, "UI queue closed with undelivered messages");
        }
    }
}
