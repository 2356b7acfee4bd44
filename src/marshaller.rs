//! Forwards provider events to the UI thread.
//!
//! The marshaller is a typed subscriber on a provider's event bus. It runs on
//! the provider thread, never blocks, and for each event does one of:
//!
//! - **Added**: clones the entity handle (one extra reference) into the message.
//! - **Modified**: sends a non-owning handle plus the key and previous attributes;
//!   the provider's own reference keeps the entity alive.
//! - **Removed**: clones the handle before the provider drops its table reference,
//!   so the entity outlives the in-flight removal.
//! - **Updated**: sends a batch marker with the run id.
//!
//! A failed enqueue is a lost notification: logged, counted, not retried.
//! Instead the next batch marker carries a snapshot of the provider's live
//! table, and the reconciler resynchronizes from it.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::entity::{EntityAttributes, EntityRef};
use crate::event_bus::{EventBus, LiveEntities, ProviderSubscriber, RegistrationToken};
use crate::message::{EntityMessage, UiMessage, UiSender};

pub struct Marshaller<A: EntityAttributes> {
    sender: UiSender,
    /// Set when a post failed and cleared once a resync marker is enqueued.
    resync_pending: AtomicBool,
    _side: PhantomData<fn(A)>,
}

impl<A> Marshaller<A>
where
    A: EntityAttributes,
    UiMessage: From<EntityMessage<A>>,
{
    pub fn new(sender: UiSender) -> Self {
        Self {
            sender,
            resync_pending: AtomicBool::new(false),
            _side: PhantomData,
        }
    }

    /// Subscribes a new marshaller to `bus`. Dropping the returned
    /// subscription stops delivery.
    pub fn attach(bus: &Arc<EventBus<A>>, sender: UiSender) -> Subscription<A> {
        let tokens = bus.subscribe(Arc::new(Self::new(sender)));
        debug!(entity = A::KIND, "Marshaller attached");
        Subscription {
            bus: Arc::clone(bus),
            tokens,
        }
    }

    fn forward(&self, message: EntityMessage<A>) {
        let label = message.label();
        if let Err((e, lost)) = self.sender.send(message.into()) {
            self.resync_pending.store(true, Ordering::Release);
            warn!(
                entity = A::KIND,
                message = label,
                key = lost.key_text().as_deref().unwrap_or("-"),
                "Notification lost: {}",
                e
            );
        }
    }
}

impl<A> ProviderSubscriber<A> for Marshaller<A>
where
    A: EntityAttributes,
    UiMessage: From<EntityMessage<A>>,
{
    fn on_added(&self, entity: &EntityRef<A>, run_id: u64) {
        self.forward(EntityMessage::Added {
            entity: Arc::clone(entity),
            run_id,
        });
    }

    fn on_modified(&self, entity: &EntityRef<A>, previous: &A) {
        self.forward(EntityMessage::Modified {
            key: entity.key().clone(),
            entity: Arc::downgrade(entity),
            previous: previous.clone(),
        });
    }

    fn on_removed(&self, entity: &EntityRef<A>) {
        self.forward(EntityMessage::Removed {
            entity: Arc::clone(entity),
        });
    }

    fn on_updated(&self, run_id: u64, live: &LiveEntities<A>) {
        let resync = self
            .resync_pending
            .swap(false, Ordering::AcqRel)
            .then(|| live.snapshot());
        if let Some(entities) = &resync {
            info!(
                entity = A::KIND,
                run_id,
                live = entities.len(),
                "Sending resync snapshot after lost notifications"
            );
        }
        self.forward(EntityMessage::BatchCompleted { run_id, resync });
    }
}

/// A marshaller's registrations on one bus.
pub struct Subscription<A: EntityAttributes> {
    bus: Arc<EventBus<A>>,
    tokens: Vec<RegistrationToken>,
}

impl<A: EntityAttributes> Subscription<A> {
    /// Unregisters every handler. Once this returns no further message from
    /// this bus is enqueued; messages already queued are still delivered.
    pub fn detach(mut self) {
        self.unregister_all();
    }

    fn unregister_all(&mut self) {
        for token in self.tokens.drain(..) {
            self.bus.unregister(token);
        }
    }
}

impl<A: EntityAttributes> Drop for Subscription<A> {
    fn drop(&mut self) {
        if !self.tokens.is_empty() {
            self.unregister_all();
            debug!(entity = A::KIND, "Marshaller detached");
        }
    }
}
