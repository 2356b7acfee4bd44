//! Process side of the UI: reconciler over the process list.
//!
//! Processes are keyed by pid. Besides the generic reconciliation, the
//! process view answers tree and status-bar queries from what it has bound.

use crate::entity::{EntityRef, ProcessAttributes};
use crate::list_control::{ListControl, VirtualList};
use crate::reconciler::Reconciler;

pub type ProcessReconciler<L> = Reconciler<ProcessAttributes, L>;

/// Creates a process reconciler over an in-memory list.
pub fn process_reconciler(highlight_ticks: u32) -> ProcessReconciler<VirtualList<u32>> {
    Reconciler::new(VirtualList::new(highlight_ticks))
}

/// Totals shown in the process status bar.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessSummary {
    pub count: usize,
    pub threads: u64,
    pub working_set_bytes: u64,
    pub cpu_percent: f64,
}

impl<L: ListControl<u32>> Reconciler<ProcessAttributes, L> {
    pub fn summary(&self) -> ProcessSummary {
        self.entities()
            .map(|e| e.attributes())
            .fold(ProcessSummary::default(), |mut s, a| {
                s.count += 1;
                s.threads += a.threads as u64;
                s.working_set_bytes += a.working_set_bytes;
                s.cpu_percent += a.cpu_percent as f64;
                s
            })
    }

    /// Bound processes whose parent is `pid`, sorted by pid.
    pub fn children_of(&self, pid: u32) -> Vec<u32> {
        let mut children: Vec<u32> = self
            .entities()
            .filter(|e| e.attributes().parent_pid == Some(pid))
            .map(|e| *e.key())
            .collect();
        children.sort_unstable();
        children
    }

    /// Bound processes whose parent is not bound (tree roots), sorted by pid.
    pub fn roots(&self) -> Vec<u32> {
        let mut roots: Vec<u32> = self
            .entities()
            .filter(|e| match e.attributes().parent_pid {
                Some(ppid) => ppid == *e.key() || self.find(&ppid).is_none(),
                None => true,
            })
            .map(|e| *e.key())
            .collect();
        roots.sort_unstable();
        roots
    }

    /// The `n` busiest bound processes, highest CPU first.
    pub fn top_by_cpu(&self, n: usize) -> Vec<EntityRef<ProcessAttributes>> {
        let mut all: Vec<(f32, &EntityRef<ProcessAttributes>)> = self
            .entities()
            .map(|e| (e.attributes().cpu_percent, e))
            .collect();
        all.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.key().cmp(b.1.key()))
        });
        all.into_iter().take(n).map(|(_, e)| e.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ProcessItem;
    use crate::message::EntityMessage;

    fn add(r: &mut ProcessReconciler<VirtualList<u32>>, pid: u32, ppid: Option<u32>, cpu: f32) {
        let entity = ProcessItem::new(
            pid,
            ProcessAttributes {
                name: format!("p{pid}"),
                parent_pid: ppid,
                threads: 2,
                working_set_bytes: 1024,
                cpu_percent: cpu,
                start_time_ticks: 0,
            },
        );
        r.apply(EntityMessage::Added { entity, run_id: 2 }).unwrap();
    }

    #[test]
    fn test_summary_totals() {
        let mut r = process_reconciler(0);
        add(&mut r, 1, None, 1.5);
        add(&mut r, 2, Some(1), 0.5);

        let s = r.summary();
        assert_eq!(s.count, 2);
        assert_eq!(s.threads, 4);
        assert_eq!(s.working_set_bytes, 2048);
        assert!((s.cpu_percent - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_tree_queries() {
        let mut r = process_reconciler(0);
        add(&mut r, 1, Some(0), 0.0);
        add(&mut r, 20, Some(1), 0.0);
        add(&mut r, 10, Some(1), 0.0);
        add(&mut r, 30, Some(99), 0.0);

        assert_eq!(r.children_of(1), vec![10, 20]);
        assert_eq!(r.roots(), vec![1, 30]);
    }

    #[test]
    fn test_top_by_cpu() {
        let mut r = process_reconciler(0);
        add(&mut r, 1, None, 5.0);
        add(&mut r, 2, None, 50.0);
        add(&mut r, 3, None, 20.0);

        let top: Vec<u32> = r.top_by_cpu(2).iter().map(|e| *e.key()).collect();
        assert_eq!(top, vec![2, 3]);
    }
}
