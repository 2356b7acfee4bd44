//! The UI thread's application context.
//!
//! `UiContext` owns everything the UI thread touches: the queue consumer and
//! one reconciler per side. It is built explicitly and passed around, so
//! several independent pipelines can coexist (tests do this).

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::entity::EntityAttributes;
use crate::error::ReconcileError;
use crate::list_control::{ListControl, VirtualList};
use crate::message::{EntityMessage, UiMessage, UiReceiver};
use crate::process_view::{process_reconciler, ProcessReconciler};
use crate::reconciler::{IgnoreReason, ReconcileOutcome, Reconciler};
use crate::service_view::{service_reconciler, ServiceReconciler};
use crate::stats::PipelineStats;

/// Messages drained per pump when no budget is configured.
pub const DEFAULT_MAX_MESSAGES_PER_PUMP: usize = 256;

/// Result of one pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpReport {
    pub processed: usize,
    /// True when the budget ran out with messages still queued.
    pub more_pending: bool,
    /// True once every producer is gone and the queue is empty.
    pub disconnected: bool,
}

pub struct UiContext {
    receiver: UiReceiver,
    processes: ProcessReconciler<VirtualList<u32>>,
    services: ServiceReconciler<VirtualList<String>>,
    stats: Arc<PipelineStats>,
    max_messages_per_pump: usize,
}

impl UiContext {
    pub fn new(
        receiver: UiReceiver,
        stats: Arc<PipelineStats>,
        highlight_ticks: u32,
        max_messages_per_pump: usize,
    ) -> Self {
        Self {
            receiver,
            processes: process_reconciler(highlight_ticks),
            services: service_reconciler(highlight_ticks),
            stats,
            max_messages_per_pump: max_messages_per_pump.max(1),
        }
    }

    pub fn processes(&self) -> &ProcessReconciler<VirtualList<u32>> {
        &self.processes
    }

    pub fn services(&self) -> &ServiceReconciler<VirtualList<String>> {
        &self.services
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Applies one message to the reconciler for its side.
    pub fn dispatch(&mut self, message: UiMessage) -> Result<ReconcileOutcome, ReconcileError> {
        let label = message.label();
        let result = match message {
            UiMessage::Process(m) => apply_and_track(&mut self.processes, m, &self.stats),
            UiMessage::Service(m) => apply_and_track(&mut self.services, m, &self.stats),
        };
        self.stats.record_processed(label);
        result
    }

    /// Drains up to the per-pump budget without blocking.
    pub fn pump(&mut self) -> PumpReport {
        let start = Instant::now();
        let report = self.drain(0);
        self.record_pump(start, &report);
        report
    }

    /// Waits up to `timeout` for the first message, then pumps. The message
    /// waited for counts against the budget.
    pub fn wait_and_pump(&mut self, timeout: Duration) -> PumpReport {
        match self.receiver.recv_timeout(timeout) {
            Ok(Some(message)) => {
                let start = Instant::now();
                self.handle(message);
                let report = self.drain(1);
                self.record_pump(start, &report);
                report
            }
            Ok(None) => PumpReport::default(),
            Err(_) => PumpReport {
                disconnected: true,
                ..Default::default()
            },
        }
    }

    /// Handles queued messages until `max_messages_per_pump` have been
    /// processed in this pump, `already` included.
    fn drain(&mut self, already: usize) -> PumpReport {
        let mut report = PumpReport {
            processed: already,
            ..Default::default()
        };
        while report.processed < self.max_messages_per_pump {
            match self.receiver.try_recv() {
                Ok(Some(message)) => {
                    self.handle(message);
                    report.processed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    report.disconnected = true;
                    break;
                }
            }
        }
        report.more_pending = !self.receiver.is_empty();
        report
    }

    fn record_pump(&self, start: Instant, report: &PumpReport) {
        if report.processed > 0 {
            self.stats
                .pump_duration_ms
                .add_sample(start.elapsed().as_secs_f64() * 1000.0);
        }
    }

    fn handle(&mut self, message: UiMessage) {
        // A duplicate key is already counted and logged; the pump keeps going.
        let _ = self.dispatch(message);
    }

    /// Tears the UI side down: discards queued messages and unbinds every
    /// element, releasing all references the UI side holds.
    pub fn shutdown(&mut self) -> usize {
        let discarded = self.receiver.discard_pending();
        let processes = self.processes.clear();
        let services = self.services.clear();
        self.stats.set_bound_elements("process", 0);
        self.stats.set_bound_elements("service", 0);
        info!(discarded, processes, services, "UI context shut down");
        discarded
    }
}

fn apply_and_track<A, L>(
    reconciler: &mut Reconciler<A, L>,
    message: EntityMessage<A>,
    stats: &PipelineStats,
) -> Result<ReconcileOutcome, ReconcileError>
where
    A: EntityAttributes,
    L: ListControl<A::Key>,
{
    let result = reconciler.apply(message);
    match &result {
        Ok(ReconcileOutcome::Ignored(IgnoreReason::StaleIdentity)) => stats.record_stale(),
        Ok(ReconcileOutcome::Ignored(IgnoreReason::NotBound)) => {
            debug!(entity = A::KIND, "Message for unbound key")
        }
        Ok(ReconcileOutcome::Created(_)) | Ok(ReconcileOutcome::Destroyed(_)) => {
            stats.set_bound_elements(A::KIND, reconciler.len())
        }
        Ok(ReconcileOutcome::Refreshed { repaired, .. }) if *repaired > 0 => {
            stats.record_resync_repairs(*repaired as u64);
            stats.set_bound_elements(A::KIND, reconciler.len())
        }
        Ok(_) => {}
        // Logged by the reconciler.
        Err(_) => stats.record_duplicate_key(),
    }
    result
}
