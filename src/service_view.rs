//! Service side of the UI: reconciler over the service list.
//!
//! Services are keyed by name. Rows show Name, Display Name and the hosting
//! PID, which is blank while the service is not running.

use crate::entity::{ServiceAttributes, ServiceState};
use crate::list_control::{ListControl, VirtualList};
use crate::reconciler::Reconciler;

pub type ServiceReconciler<L> = Reconciler<ServiceAttributes, L>;

/// Creates a service reconciler over an in-memory list.
pub fn service_reconciler(highlight_ticks: u32) -> ServiceReconciler<VirtualList<String>> {
    Reconciler::new(VirtualList::new(highlight_ticks))
}

/// Totals shown in the service status bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceSummary {
    pub count: usize,
    pub running: usize,
    pub stopped: usize,
    pub pending: usize,
}

impl<L: ListControl<String>> Reconciler<ServiceAttributes, L> {
    pub fn summary(&self) -> ServiceSummary {
        let mut s = ServiceSummary::default();
        for entity in self.entities() {
            s.count += 1;
            match entity.attributes().state {
                ServiceState::Running | ServiceState::Paused => s.running += 1,
                ServiceState::Stopped => s.stopped += 1,
                ServiceState::StartPending | ServiceState::StopPending => s.pending += 1,
            }
        }
        s
    }

    /// Names of bound services hosted by `pid`, sorted.
    pub fn services_for_pid(&self, pid: u32) -> Vec<String> {
        let mut names: Vec<String> = self
            .entities()
            .filter(|e| e.attributes().process_id == Some(pid))
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ServiceItem;
    use crate::message::EntityMessage;

    fn add(r: &mut ServiceReconciler<VirtualList<String>>, name: &str, state: ServiceState, pid: Option<u32>) {
        let entity = ServiceItem::new(
            name.to_string(),
            ServiceAttributes {
                display_name: name.to_uppercase(),
                state,
                process_id: pid,
                ..Default::default()
            },
        );
        r.apply(EntityMessage::Added { entity, run_id: 1 }).unwrap();
    }

    #[test]
    fn test_summary_counts_states() {
        let mut r = service_reconciler(0);
        add(&mut r, "dnscache", ServiceState::Running, Some(812));
        add(&mut r, "spooler", ServiceState::Stopped, None);
        add(&mut r, "bits", ServiceState::StartPending, None);

        assert_eq!(
            r.summary(),
            ServiceSummary {
                count: 3,
                running: 1,
                stopped: 1,
                pending: 1
            }
        );
    }

    #[test]
    fn test_shared_host_process() {
        let mut r = service_reconciler(0);
        add(&mut r, "lanmanserver", ServiceState::Running, Some(900));
        add(&mut r, "dnscache", ServiceState::Running, Some(900));
        add(&mut r, "spooler", ServiceState::Running, Some(1200));

        assert_eq!(r.services_for_pid(900), vec!["dnscache", "lanmanserver"]);
    }

    #[test]
    fn test_row_columns() {
        let mut r = service_reconciler(0);
        add(&mut r, "spooler", ServiceState::Running, Some(1200));
        let handle = r.find(&"spooler".to_string()).unwrap();
        assert_eq!(r.list().cells(handle).unwrap(), &["spooler", "SPOOLER", "1200"]);
    }
}
