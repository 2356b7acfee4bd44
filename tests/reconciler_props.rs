//! Property tests: whatever the provider emits, the UI converges on it.
//!
//! Random edit sequences are applied to a scripted process table, with
//! provider passes and UI pumps interleaved at random. After a final pump the
//! UI list must match the provider table exactly and every entity the
//! provider dropped must be freed.

use parking_lot::Mutex;
use proptest::prelude::*;
use procmon_sync::{
    ui_queue, EntityAttributes, EntityItem, EntitySource, ListControl, Marshaller, PipelineStats,
    ProcessAttributes, Provider, SourceError, UiContext,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone)]
enum Edit {
    /// Insert or update `pid` with this thread count.
    Set(u32, u32),
    /// Remove `pid` if present.
    Remove(u32),
    /// Same pid, new process incarnation.
    Recycle(u32),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => (0u32..6, 1u32..5).prop_map(|(pid, threads)| Edit::Set(pid, threads)),
        2 => (0u32..6).prop_map(Edit::Remove),
        1 => (0u32..6).prop_map(Edit::Recycle),
    ]
}

type Table = Arc<Mutex<BTreeMap<u32, ProcessAttributes>>>;

struct TableSource(Table);

impl EntitySource<ProcessAttributes> for TableSource {
    fn name(&self) -> &str {
        "props"
    }

    fn scan(&mut self) -> Result<Vec<(u32, ProcessAttributes)>, SourceError> {
        Ok(self.0.lock().iter().map(|(k, v)| (*k, v.clone())).collect())
    }
}

fn apply_edit(table: &Table, edit: &Edit, clock: &mut u64) {
    let mut t = table.lock();
    match *edit {
        Edit::Set(pid, threads) => {
            let entry = t.entry(pid).or_insert_with(|| ProcessAttributes {
                name: format!("p{pid}"),
                ..Default::default()
            });
            entry.threads = threads;
        }
        Edit::Remove(pid) => {
            t.remove(&pid);
        }
        Edit::Recycle(pid) => {
            *clock += 1;
            t.insert(
                pid,
                ProcessAttributes {
                    name: format!("p{pid}-{clock}"),
                    start_time_ticks: *clock,
                    ..Default::default()
                },
            );
        }
    }
}

proptest! {
    #[test]
    fn test_ui_converges_to_provider_table(
        steps in prop::collection::vec((edit(), any::<bool>(), any::<bool>()), 1..40)
    ) {
        let stats = Arc::new(PipelineStats::new().unwrap());
        let (sender, receiver) = ui_queue(None, Arc::clone(&stats));
        let mut ui = UiContext::new(receiver, stats, 1, 7);
        let table: Table = Arc::default();
        let provider = Provider::new(TableSource(Arc::clone(&table)));
        let _subscription = Marshaller::attach(provider.events(), sender);

        let mut clock = 0;
        let mut seen: Vec<Weak<EntityItem<ProcessAttributes>>> = Vec::new();
        for (edit, run, pump) in &steps {
            apply_edit(&table, edit, &mut clock);
            if *run {
                provider.run_once().unwrap();
                for pid in table.lock().keys() {
                    if let Some(e) = provider.get(pid) {
                        seen.push(Arc::downgrade(&e));
                    }
                }
            }
            if *pump {
                ui.pump();
            }
        }
        provider.run_once().unwrap();
        while ui.pump().more_pending {}

        let expected: BTreeMap<u32, ProcessAttributes> = table.lock().clone();
        prop_assert_eq!(ui.processes().len(), expected.len());
        prop_assert_eq!(ui.processes().list().len(), expected.len());
        for (pid, attributes) in &expected {
            let handle = ui.processes().find(pid);
            prop_assert!(handle.is_some());
            let cells = ui.processes().list().cells(handle.unwrap()).unwrap().to_vec();
            prop_assert_eq!(cells, attributes.columns(pid));
            let bound = ui.processes().entity(pid).unwrap();
            let live = provider.get(pid).unwrap();
            prop_assert!(Arc::ptr_eq(bound, &live));
        }
        prop_assert_eq!(ui.stats().duplicate_keys_total(), 0);

        // Anything not in the final table is unreachable and freed.
        for weak in &seen {
            if let Some(e) = weak.upgrade() {
                let live = provider.get(e.key());
                prop_assert!(live.is_some_and(|l| Arc::ptr_eq(&l, &e)));
            }
        }
    }
}
