//! Per-provider callback registry for entity lifecycle events.
//!
//! Handlers run synchronously on the raising (provider) thread, in
//! registration order. Each event kind has its own handler list guarded by a
//! read/write lock: `raise` holds the read side for the duration of the
//! invocation, `unregister` takes the write side. Once `unregister` returns,
//! any invocation that was in progress has finished and no later `raise`
//! can reach the removed handler.
//!
//! Handlers must not block and must not register or unregister on the bus
//! that is invoking them.

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::entity::{EntityAttributes, EntityRef};

/// Lifecycle event kinds a provider raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Modified,
    Removed,
    Updated,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Added,
        EventKind::Modified,
        EventKind::Removed,
        EventKind::Updated,
    ];

    fn slot(self) -> usize {
        match self {
            EventKind::Added => 0,
            EventKind::Modified => 1,
            EventKind::Removed => 2,
            EventKind::Updated => 3,
        }
    }
}

/// A provider's table of live entities.
pub(crate) type EntityTable<A> = DashMap<<A as EntityAttributes>::Key, EntityRef<A>, RandomState>;

/// Read-only view of a provider's live table, raised with `Updated`.
///
/// `Updated` is raised while the pass that produced it still holds the
/// provider, so a snapshot taken inside the handler is exactly the table
/// that pass left behind.
pub struct LiveEntities<A: EntityAttributes> {
    table: Arc<EntityTable<A>>,
}

impl<A: EntityAttributes> LiveEntities<A> {
    pub(crate) fn new(table: Arc<EntityTable<A>>) -> Self {
        Self { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Clones a handle to every live entity.
    pub fn snapshot(&self) -> Vec<EntityRef<A>> {
        self.table.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

impl<A: EntityAttributes> Default for LiveEntities<A> {
    fn default() -> Self {
        Self::new(Arc::new(DashMap::with_hasher(RandomState::new())))
    }
}

impl<A: EntityAttributes> Clone for LiveEntities<A> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<A: EntityAttributes> fmt::Debug for LiveEntities<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveEntities").field("len", &self.len()).finish()
    }
}

/// Event payload passed to handlers.
///
/// Handlers receive a borrow; a handler that needs the entity beyond the
/// call clones the handle, which is the point where it takes its own reference.
#[derive(Debug)]
pub enum ProviderEvent<A: EntityAttributes> {
    Added { entity: EntityRef<A>, run_id: u64 },
    Modified { entity: EntityRef<A>, previous: A },
    /// The provider has already taken the entity out of its table; the handle
    /// here is the provider's last reference and is released after the raise.
    Removed { entity: EntityRef<A> },
    /// A provider pass completed; `live` is the table it left.
    Updated { run_id: u64, live: LiveEntities<A> },
}

impl<A: EntityAttributes> ProviderEvent<A> {
    pub fn kind(&self) -> EventKind {
        match self {
            ProviderEvent::Added { .. } => EventKind::Added,
            ProviderEvent::Modified { .. } => EventKind::Modified,
            ProviderEvent::Removed { .. } => EventKind::Removed,
            ProviderEvent::Updated { .. } => EventKind::Updated,
        }
    }
}

/// Identifies one registration; pass it back to `EventBus::unregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken {
    kind: EventKind,
    id: u64,
}

impl RegistrationToken {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

pub type Handler<A> = Box<dyn Fn(&ProviderEvent<A>) + Send + Sync>;

struct Registration<A: EntityAttributes> {
    id: u64,
    handler: Handler<A>,
}

/// Typed subscriber: one capability per event kind.
pub trait ProviderSubscriber<A: EntityAttributes>: Send + Sync + 'static {
    fn on_added(&self, entity: &EntityRef<A>, run_id: u64);
    fn on_modified(&self, entity: &EntityRef<A>, previous: &A);
    fn on_removed(&self, entity: &EntityRef<A>);
    fn on_updated(&self, run_id: u64, live: &LiveEntities<A>);
}

/// Multi-subscriber callback registry, one handler list per event kind.
pub struct EventBus<A: EntityAttributes> {
    next_id: AtomicU64,
    slots: [RwLock<Vec<Registration<A>>>; 4],
}

impl<A: EntityAttributes> Default for EventBus<A> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            slots: std::array::from_fn(|_| RwLock::new(Vec::new())),
        }
    }
}

impl<A: EntityAttributes> EventBus<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for `kind`.
    pub fn register<F>(&self, kind: EventKind, handler: F) -> RegistrationToken
    where
        F: Fn(&ProviderEvent<A>) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots[kind.slot()].write().push(Registration {
            id,
            handler: Box::new(handler),
        });
        trace!(kind = ?kind, id, entity = A::KIND, "Handler registered");
        RegistrationToken { kind, id }
    }

    /// Removes a handler. Returns false if the token was already unregistered.
    ///
    /// Blocks until invocations of this kind that are in progress on other
    /// threads have returned.
    pub fn unregister(&self, token: RegistrationToken) -> bool {
        let mut list = self.slots[token.kind.slot()].write();
        let before = list.len();
        list.retain(|r| r.id != token.id);
        let removed = list.len() != before;
        trace!(kind = ?token.kind, id = token.id, removed, "Handler unregistered");
        removed
    }

    /// Invokes every handler registered for the event's kind, in
    /// registration order, on the calling thread. Returns how many ran.
    pub fn raise(&self, event: &ProviderEvent<A>) -> usize {
        let list = self.slots[event.kind().slot()].read_recursive();
        for registration in list.iter() {
            (registration.handler)(event);
        }
        list.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.slots[kind.slot()].read().len()
    }

    /// Registers all four capabilities of a typed subscriber.
    pub fn subscribe<S>(&self, subscriber: Arc<S>) -> Vec<RegistrationToken>
    where
        S: ProviderSubscriber<A>,
    {
        EventKind::ALL
            .iter()
            .map(|&kind| {
                let s = Arc::clone(&subscriber);
                self.register(kind, move |event| match event {
                    ProviderEvent::Added { entity, run_id } => s.on_added(entity, *run_id),
                    ProviderEvent::Modified { entity, previous } => s.on_modified(entity, previous),
                    ProviderEvent::Removed { entity } => s.on_removed(entity),
                    ProviderEvent::Updated { run_id, live } => s.on_updated(*run_id, live),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ProcessAttributes, ProcessItem};
    use parking_lot::Mutex;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = EventBus::<ProcessAttributes>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let seen = Arc::clone(&seen);
            bus.register(EventKind::Updated, move |_| seen.lock().push(n));
        }

        let ran = bus.raise(&ProviderEvent::Updated {
            run_id: 1,
            live: LiveEntities::default(),
        });

        assert_eq!(ran, 3);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_raise_only_reaches_matching_kind() {
        let bus = EventBus::<ProcessAttributes>::new();
        let hits = Arc::new(Mutex::new(0));
        let h = Arc::clone(&hits);
        bus.register(EventKind::Removed, move |_| *h.lock() += 1);

        let entity = ProcessItem::new(1, ProcessAttributes::default());
        assert_eq!(bus.raise(&ProviderEvent::Added { entity, run_id: 1 }), 0);
        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn test_unregister_is_idempotent_and_skips_handler() {
        let bus = EventBus::<ProcessAttributes>::new();
        let hits = Arc::new(Mutex::new(0));
        let h = Arc::clone(&hits);
        let token = bus.register(EventKind::Updated, move |_| *h.lock() += 1);

        bus.raise(&ProviderEvent::Updated {
            run_id: 1,
            live: LiveEntities::default(),
        });
        assert!(bus.unregister(token));
        assert!(!bus.unregister(token));
        bus.raise(&ProviderEvent::Updated {
            run_id: 2,
            live: LiveEntities::default(),
        });

        assert_eq!(*hits.lock(), 1);
        assert_eq!(bus.handler_count(EventKind::Updated), 0);
    }

    #[test]
    fn test_handler_does_not_keep_reference_unless_it_clones() {
        let bus = EventBus::<ProcessAttributes>::new();
        bus.register(EventKind::Added, |_| {});
        let entity = ProcessItem::new(7, ProcessAttributes::default());
        let event = ProviderEvent::Added {
            entity: Arc::clone(&entity),
            run_id: 1,
        };
        bus.raise(&event);
        drop(event);
        assert_eq!(Arc::strong_count(&entity), 1);
    }

    struct Counting {
        calls: Mutex<Vec<EventKind>>,
    }

    impl ProviderSubscriber<ProcessAttributes> for Counting {
        fn on_added(&self, _: &EntityRef<ProcessAttributes>, _: u64) {
            self.calls.lock().push(EventKind::Added);
        }
        fn on_modified(&self, _: &EntityRef<ProcessAttributes>, _: &ProcessAttributes) {
            self.calls.lock().push(EventKind::Modified);
        }
        fn on_removed(&self, _: &EntityRef<ProcessAttributes>) {
            self.calls.lock().push(EventKind::Removed);
        }
        fn on_updated(&self, _: u64, _: &LiveEntities<ProcessAttributes>) {
            self.calls.lock().push(EventKind::Updated);
        }
    }

    #[test]
    fn test_live_view_snapshots_current_table() {
        let table: Arc<EntityTable<ProcessAttributes>> = Arc::default();
        let live = LiveEntities::new(Arc::clone(&table));
        assert!(live.is_empty());

        let entity = ProcessItem::new(5, ProcessAttributes::default());
        table.insert(5, Arc::clone(&entity));
        let snapshot = live.clone().snapshot();

        assert_eq!(live.len(), 1);
        assert!(Arc::ptr_eq(&snapshot[0], &entity));
        assert_eq!(Arc::strong_count(&entity), 3);
        drop(snapshot);
        assert_eq!(Arc::strong_count(&entity), 2);
    }

    #[test]
    fn test_subscribe_registers_every_kind() {
        let bus = EventBus::<ProcessAttributes>::new();
        let sub = Arc::new(Counting {
            calls: Mutex::new(Vec::new()),
        });
        let tokens = bus.subscribe(Arc::clone(&sub));
        assert_eq!(tokens.len(), 4);

        let entity = ProcessItem::new(3, ProcessAttributes::default());
        bus.raise(&ProviderEvent::Added {
            entity: Arc::clone(&entity),
            run_id: 1,
        });
        bus.raise(&ProviderEvent::Modified {
            entity: Arc::clone(&entity),
            previous: ProcessAttributes::default(),
        });
        bus.raise(&ProviderEvent::Removed { entity });
        bus.raise(&ProviderEvent::Updated {
            run_id: 1,
            live: LiveEntities::default(),
        });

        assert_eq!(*sub.calls.lock(), EventKind::ALL.to_vec());
    }
}
