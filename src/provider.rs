//! Background providers: periodic rescan, diff, and event raising.
//!
//! A provider owns the table of live entities for one source. Each pass
//! scans the source, diffs the result against the table and raises one event
//! per changed entity on its bus, followed by `Updated(run_id)`. Passes are
//! serialized, so the per-key event stream is always
//! `Added, Modified*, Removed` before any later `Added` for the same key.

use ahash::{AHashSet as HashSet, RandomState};
use crossbeam_channel::{RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::entity::{EntityAttributes, EntityItem, EntityRef};
use crate::error::SourceError;
use crate::event_bus::{EntityTable, EventBus, LiveEntities, ProviderEvent};

/// Enumerates the current set of entities. Called only from provider passes.
pub trait EntitySource<A: EntityAttributes>: Send {
    fn name(&self) -> &str;
    fn scan(&mut self) -> Result<Vec<(A::Key, A)>, SourceError>;
}

/// Counts for one completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    pub run_id: u64,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub total: usize,
}

pub struct Provider<A: EntityAttributes> {
    name: String,
    table: Arc<EntityTable<A>>,
    events: Arc<EventBus<A>>,
    run_id: AtomicU64,
    source: Mutex<Box<dyn EntitySource<A>>>,
}

impl<A: EntityAttributes> Provider<A> {
    pub fn new<S>(source: S) -> Self
    where
        S: EntitySource<A> + 'static,
    {
        Self {
            name: format!("{}:{}", A::KIND, source.name()),
            table: Arc::new(DashMap::with_hasher(RandomState::new())),
            events: Arc::new(EventBus::new()),
            run_id: AtomicU64::new(0),
            source: Mutex::new(Box::new(source)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &Arc<EventBus<A>> {
        &self.events
    }

    /// Id of the last completed pass; 0 before the first one.
    pub fn run_id(&self) -> u64 {
        self.run_id.load(Ordering::Acquire)
    }

    /// Looks up a live entity; the returned handle is a new reference.
    pub fn get(&self, key: &A::Key) -> Option<EntityRef<A>> {
        self.table.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Runs one scan-and-diff pass and raises its events.
    ///
    /// On a scan failure nothing is raised and the run id is unchanged.
    #[instrument(skip(self), fields(provider = %self.name))]
    pub fn run_once(&self) -> Result<ScanSummary, SourceError> {
        let mut source = self.source.lock();
        let start = Instant::now();
        let snapshot = source.scan()?;

        let run_id = self.run_id.load(Ordering::Acquire) + 1;
        let mut summary = ScanSummary {
            run_id,
            ..Default::default()
        };
        let mut seen: HashSet<A::Key> = HashSet::with_capacity(snapshot.len());

        for (key, attributes) in snapshot {
            if !seen.insert(key.clone()) {
                warn!(%key, "Source reported the same key twice in one scan, keeping the first");
                continue;
            }

            let existing = self.table.get(&key).map(|e| Arc::clone(e.value()));
            match existing {
                Some(entity) if entity.attributes().same_incarnation(&attributes) => {
                    if let Some(previous) = entity.replace_attributes(attributes) {
                        summary.modified += 1;
                        self.events
                            .raise(&ProviderEvent::Modified { entity, previous });
                    }
                }
                Some(stale) => {
                    debug!(%key, "Key reused by a new object");
                    drop(stale);
                    self.remove_entry(&key);
                    summary.removed += 1;
                    self.insert_entry(key, attributes, run_id);
                    summary.added += 1;
                }
                None => {
                    self.insert_entry(key, attributes, run_id);
                    summary.added += 1;
                }
            }
        }

        let gone: Vec<A::Key> = self
            .table
            .iter()
            .filter(|e| !seen.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for key in gone {
            if self.remove_entry(&key) {
                summary.removed += 1;
            }
        }

        summary.total = self.table.len();
        self.run_id.store(run_id, Ordering::Release);
        self.events.raise(&ProviderEvent::Updated {
            run_id,
            live: LiveEntities::new(Arc::clone(&self.table)),
        });

        debug!(
            run_id,
            added = summary.added,
            modified = summary.modified,
            removed = summary.removed,
            total = summary.total,
            "Provider pass completed in {:.2}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(summary)
    }

    fn insert_entry(&self, key: A::Key, attributes: A, run_id: u64) {
        let entity = EntityItem::new(key.clone(), attributes);
        self.table.insert(key, Arc::clone(&entity));
        self.events.raise(&ProviderEvent::Added { entity, run_id });
    }

    /// Takes the entity out of the table and raises Removed with the
    /// table's reference, which is released once handlers have run.
    fn remove_entry(&self, key: &A::Key) -> bool {
        match self.table.remove(key) {
            Some((_, entity)) => {
                self.events.raise(&ProviderEvent::Removed { entity });
                true
            }
            None => false,
        }
    }
}

/// A provider running its passes on a dedicated thread.
pub struct ProviderThread {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProviderThread {
    /// Starts a thread that runs a pass every `interval` until stopped.
    pub fn spawn<A: EntityAttributes>(
        provider: Arc<Provider<A>>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let name = provider.name().to_string();

        let handle = thread::Builder::new()
            .name(format!("{}-provider", A::KIND))
            .spawn(move || {
                info!(provider = provider.name(), ?interval, "Provider thread started");
                loop {
                    if let Err(e) = provider.run_once() {
                        error!(provider = provider.name(), "Provider pass failed: {}", e);
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!(provider = provider.name(), "Provider thread stopped");
            })?;

        Ok(Self {
            name,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals the thread and waits for the pass in progress to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(provider = %self.name, "Provider thread panicked");
            }
        }
    }
}

impl Drop for ProviderThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ProcessAttributes;
    use crate::event_bus::EventKind;
    use std::collections::VecDeque;

    struct Scripted {
        scans: VecDeque<Result<Vec<(u32, ProcessAttributes)>, SourceError>>,
    }

    impl EntitySource<ProcessAttributes> for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn scan(&mut self) -> Result<Vec<(u32, ProcessAttributes)>, SourceError> {
            self.scans.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn proc(name: &str, threads: u32) -> ProcessAttributes {
        ProcessAttributes {
            name: name.into(),
            threads,
            ..Default::default()
        }
    }

    fn record(bus: &EventBus<ProcessAttributes>) -> Arc<Mutex<Vec<(EventKind, Option<u32>)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let log = Arc::clone(&log);
            bus.register(kind, move |event| {
                let key = match event {
                    ProviderEvent::Added { entity, .. }
                    | ProviderEvent::Modified { entity, .. }
                    | ProviderEvent::Removed { entity } => Some(*entity.key()),
                    ProviderEvent::Updated { .. } => None,
                };
                log.lock().push((event.kind(), key));
            });
        }
        log
    }

    #[test]
    fn test_diff_raises_add_modify_remove_then_updated() {
        let provider = Provider::new(Scripted {
            scans: VecDeque::from(vec![
                Ok(vec![(1, proc("a", 1)), (2, proc("b", 1))]),
                Ok(vec![(1, proc("a", 2))]),
            ]),
        });
        let log = record(provider.events());

        let first = provider.run_once().unwrap();
        assert_eq!((first.run_id, first.added, first.total), (1, 2, 2));

        let second = provider.run_once().unwrap();
        assert_eq!(
            second,
            ScanSummary {
                run_id: 2,
                added: 0,
                modified: 1,
                removed: 1,
                total: 1
            }
        );

        let log = log.lock();
        assert_eq!(log[2], (EventKind::Updated, None));
        assert_eq!(
            log[3..].to_vec(),
            vec![
                (EventKind::Modified, Some(1)),
                (EventKind::Removed, Some(2)),
                (EventKind::Updated, None),
            ]
        );
    }

    #[test]
    fn test_removed_entity_stays_alive_while_handler_runs() {
        let provider = Provider::new(Scripted {
            scans: VecDeque::from(vec![Ok(vec![(7, proc("x", 1))]), Ok(vec![])]),
        });
        let counts = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&counts);
        provider.events().register(EventKind::Removed, move |event| {
            if let ProviderEvent::Removed { entity } = event {
                c.lock().push(Arc::strong_count(entity));
            }
        });

        provider.run_once().unwrap();
        let weak = Arc::downgrade(&provider.get(&7).unwrap());
        provider.run_once().unwrap();

        assert_eq!(*counts.lock(), vec![1]);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_scan_failure_raises_nothing() {
        let provider = Provider::new(Scripted {
            scans: VecDeque::from(vec![Err(SourceError::Parse {
                path: "/nowhere".into(),
                message: "bad".into(),
            })]),
        });
        let log = record(provider.events());

        assert!(provider.run_once().is_err());
        assert_eq!(provider.run_id(), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_recycled_key_is_removed_then_added() {
        let mut old = proc("old", 1);
        old.start_time_ticks = 100;
        let mut new = proc("new", 1);
        new.start_time_ticks = 200;
        let provider = Provider::new(Scripted {
            scans: VecDeque::from(vec![Ok(vec![(9, old)]), Ok(vec![(9, new)])]),
        });
        provider.run_once().unwrap();
        let first = provider.get(&9).unwrap();
        let log = record(provider.events());

        provider.run_once().unwrap();

        let second = provider.get(&9).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(
            *log.lock(),
            vec![
                (EventKind::Removed, Some(9)),
                (EventKind::Added, Some(9)),
                (EventKind::Updated, None),
            ]
        );
    }

    #[test]
    fn test_updated_carries_table_left_by_the_pass() {
        let provider = Provider::new(Scripted {
            scans: VecDeque::from(vec![Ok(vec![(1, proc("a", 1)), (2, proc("b", 1))])]),
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        provider.events().register(EventKind::Updated, move |event| {
            if let ProviderEvent::Updated { live, .. } = event {
                let mut keys: Vec<u32> = live.snapshot().iter().map(|e| *e.key()).collect();
                keys.sort_unstable();
                s.lock().push(keys);
            }
        });

        provider.run_once().unwrap();

        assert_eq!(*seen.lock(), vec![vec![1, 2]]);
        assert_eq!(Arc::strong_count(&provider.get(&1).unwrap()), 2);
    }

    #[test]
    fn test_provider_thread_runs_and_stops() {
        let provider = Arc::new(Provider::new(Scripted {
            scans: VecDeque::from(vec![Ok(vec![(1, proc("a", 1))])]),
        }));
        let thread = ProviderThread::spawn(Arc::clone(&provider), Duration::from_secs(60)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while provider.run_id() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        thread.stop();
        assert_eq!(provider.run_id(), 1);
        assert_eq!(provider.len(), 1);
    }
}
