//! Applies queued entity messages to a UI list.
//!
//! Runs on the UI thread only. The reconciler owns the binding table (key to
//! element handle plus the entity reference the element displays) and keeps
//! it in step with the list control. Per key the state machine is
//! `Absent -> Added -> Present -> Modified* -> Removed -> Absent`.
//!
//! A batch marker that carries a resync snapshot realigns the bindings with
//! the provider's table: rows the provider no longer has are dropped, missing
//! rows are created and the rest are refreshed. This repairs whatever lost
//! notifications left behind.

use ahash::AHashMap as HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace};

use crate::entity::{EntityAttributes, EntityItem, EntityRef};
use crate::error::ReconcileError;
use crate::list_control::{ElementHandle, ListControl};
use crate::message::EntityMessage;

/// Why a message changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No element is bound for the key.
    NotBound,
    /// An element is bound for the key, but for a different entity object.
    StaleIdentity,
}

/// What applying one message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created(ElementHandle),
    Updated(ElementHandle),
    Destroyed(ElementHandle),
    Ignored(IgnoreReason),
    /// A batch marker was applied; `initial` is true for run 1. `repaired`
    /// counts elements a resync created or dropped.
    Refreshed { initial: bool, repaired: usize },
}

struct Binding<A: EntityAttributes> {
    handle: ElementHandle,
    entity: EntityRef<A>,
}

pub struct Reconciler<A, L>
where
    A: EntityAttributes,
    L: ListControl<A::Key>,
{
    list: L,
    bindings: HashMap<A::Key, Binding<A>>,
}

impl<A, L> Reconciler<A, L>
where
    A: EntityAttributes,
    L: ListControl<A::Key>,
{
    pub fn new(list: L) -> Self {
        Self {
            list,
            bindings: HashMap::new(),
        }
    }

    pub fn apply(&mut self, message: EntityMessage<A>) -> Result<ReconcileOutcome, ReconcileError> {
        match message {
            EntityMessage::Added { entity, run_id } => self.on_added(entity, run_id),
            EntityMessage::Modified {
                key,
                entity,
                previous,
            } => Ok(self.on_modified(&key, &entity, &previous)),
            EntityMessage::Removed { entity } => Ok(self.on_removed(entity)),
            EntityMessage::BatchCompleted { run_id, resync } => {
                let repaired = match resync {
                    Some(live) => self.resync(live),
                    None => 0,
                };
                Ok(self.on_batch_completed(run_id, repaired))
            }
        }
    }

    fn on_added(
        &mut self,
        entity: EntityRef<A>,
        run_id: u64,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let key = entity.key().clone();
        if self.bindings.contains_key(&key) {
            error!(entity = A::KIND, %key, run_id, "Added for a key that is already bound");
            return Err(ReconcileError::DuplicateKey {
                kind: A::KIND,
                key: key.to_string(),
            });
        }
        debug_assert!(
            self.list.find_element_by_key(&key).is_none(),
            "list element exists without a binding"
        );

        // The first pass populates the list in bulk; don't flash it as new.
        let initial = run_id == 1;
        if initial {
            self.list.set_state_highlighting(false);
        }
        let handle = self.list.create_element(key.clone(), entity.columns());
        if initial {
            self.list.set_state_highlighting(true);
        }

        trace!(entity = A::KIND, %key, handle = handle.id(), "Element bound");
        self.bindings.insert(key, Binding { handle, entity });
        Ok(ReconcileOutcome::Created(handle))
    }

    fn on_modified(
        &mut self,
        key: &A::Key,
        entity: &Weak<EntityItem<A>>,
        previous: &A,
    ) -> ReconcileOutcome {
        let Some(binding) = self.bindings.get(key) else {
            debug!(entity = A::KIND, %key, "Modified for unbound key ignored");
            return ReconcileOutcome::Ignored(IgnoreReason::NotBound);
        };
        if !std::ptr::eq(entity.as_ptr(), Arc::as_ptr(&binding.entity)) {
            debug!(entity = A::KIND, %key, "Modified for a previous incarnation ignored");
            return ReconcileOutcome::Ignored(IgnoreReason::StaleIdentity);
        }

        let cells = binding.entity.columns();
        if tracing::enabled!(tracing::Level::TRACE) {
            let before = previous.columns(key);
            let changed: Vec<&str> = A::headers()
                .iter()
                .zip(before.iter().zip(&cells))
                .filter(|(_, (a, b))| a != b)
                .map(|(h, _)| *h)
                .collect();
            trace!(entity = A::KIND, %key, ?changed, "Element updated");
        }
        let handle = binding.handle;
        self.list.update_element(handle, cells);
        ReconcileOutcome::Updated(handle)
    }

    fn on_removed(&mut self, entity: EntityRef<A>) -> ReconcileOutcome {
        let key = entity.key();
        match self.bindings.get(key) {
            None => {
                debug!(entity = A::KIND, %key, "Removed for unbound key ignored");
                return ReconcileOutcome::Ignored(IgnoreReason::NotBound);
            }
            Some(b) if !Arc::ptr_eq(&b.entity, &entity) => {
                debug!(entity = A::KIND, %key, "Removed for a previous incarnation ignored");
                return ReconcileOutcome::Ignored(IgnoreReason::StaleIdentity);
            }
            Some(_) => {}
        }

        let Some(binding) = self.bindings.remove(key) else {
            return ReconcileOutcome::Ignored(IgnoreReason::NotBound);
        };
        self.list.destroy_element(binding.handle);
        debug_assert!(self.list.find_element_by_key(key).is_none());
        trace!(
            entity = A::KIND,
            %key,
            handle = binding.handle.id(),
            age_ms = binding.entity.age().num_milliseconds(),
            "Element unbound"
        );
        // Both the binding's reference and the message's reference drop here.
        ReconcileOutcome::Destroyed(binding.handle)
    }

    fn on_batch_completed(&mut self, run_id: u64, repaired: usize) -> ReconcileOutcome {
        let initial = run_id == 1;
        if initial {
            self.list.set_state_highlighting(false);
            self.list.set_state_highlighting(true);
            debug!(entity = A::KIND, bound = self.bindings.len(), "Initial population applied");
        } else {
            self.list.tick();
        }
        ReconcileOutcome::Refreshed { initial, repaired }
    }

    /// Aligns the bindings with `live`, the provider's table at the end of
    /// the pass this marker closes. Returns how many elements were created
    /// or dropped.
    fn resync(&mut self, live: Vec<EntityRef<A>>) -> usize {
        let live: HashMap<A::Key, EntityRef<A>> = live
            .into_iter()
            .map(|e| (e.key().clone(), e))
            .collect();

        // Gone from the provider, or bound to an older incarnation.
        let stale: Vec<A::Key> = self
            .bindings
            .iter()
            .filter(|(key, b)| !live.get(*key).is_some_and(|e| Arc::ptr_eq(e, &b.entity)))
            .map(|(key, _)| key.clone())
            .collect();
        let mut repaired = 0;
        for key in stale {
            if let Some(binding) = self.bindings.remove(&key) {
                self.list.destroy_element(binding.handle);
                debug!(entity = A::KIND, %key, "Resync dropped element");
                repaired += 1;
            }
        }

        for (key, entity) in live {
            let cells = entity.columns();
            match self.bindings.get(&key) {
                Some(binding) => self.list.update_element(binding.handle, cells),
                None => {
                    let handle = self.list.create_element(key.clone(), cells);
                    debug!(entity = A::KIND, %key, "Resync created element");
                    self.bindings.insert(key, Binding { handle, entity });
                    repaired += 1;
                }
            }
        }
        debug_assert_eq!(self.bindings.len(), self.list.len());

        if repaired > 0 {
            info!(entity = A::KIND, repaired, bound = self.bindings.len(), "UI list resynchronized");
        }
        repaired
    }

    /// Handle of the element bound for `key`.
    pub fn find(&self, key: &A::Key) -> Option<ElementHandle> {
        self.bindings.get(key).map(|b| b.handle)
    }

    /// The entity displayed for `key`.
    pub fn entity(&self, key: &A::Key) -> Option<&EntityRef<A>> {
        self.bindings.get(key).map(|b| &b.entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRef<A>> {
        self.bindings.values().map(|b| &b.entity)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn list(&self) -> &L {
        &self.list
    }

    /// Destroys every element and releases every binding reference.
    pub fn clear(&mut self) -> usize {
        let count = self.bindings.len();
        for (_, binding) in self.bindings.drain() {
            self.list.destroy_element(binding.handle);
        }
        count
    }
}
