//! Wiring of providers, marshallers and the UI context for the binary.

use anyhow::Context;
use procmon_sync::entity::{format_bytes, ProcessAttributes, ServiceAttributes};
use procmon_sync::{
    ui_queue, EntityAttributes, Marshaller, PipelineStats, ProcfsSource, Provider, ProviderThread,
    ServiceFileSource, Subscription, SyntheticSource, UiContext,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cli::ProcessSourceKind;
use crate::config::Config;

/// Processes in a fresh synthetic table.
const SYNTHETIC_POPULATION: usize = 40;

pub fn process_provider(config: &Config) -> Provider<ProcessAttributes> {
    match config.process_source() {
        ProcessSourceKind::Procfs => Provider::new(ProcfsSource::new(
            config.proc_root(),
            config.name_filter(),
            config.max_processes,
        )),
        ProcessSourceKind::Synthetic => Provider::new(SyntheticSource::new(
            config.synthetic_seed(),
            SYNTHETIC_POPULATION,
        )),
    }
}

pub fn service_provider(config: &Config) -> Option<Provider<ServiceAttributes>> {
    config
        .services_file
        .as_deref()
        .map(|path| Provider::new(ServiceFileSource::new(path)))
}

/// One complete pipeline: both providers, their marshallers and the UI side.
pub struct Pipeline {
    pub ui: UiContext,
    processes: Arc<Provider<ProcessAttributes>>,
    services: Option<Arc<Provider<ServiceAttributes>>>,
    process_subscription: Option<Subscription<ProcessAttributes>>,
    service_subscription: Option<Subscription<ServiceAttributes>>,
    threads: Vec<ProviderThread>,
}

impl Pipeline {
    /// Builds and wires the pipeline; no provider runs yet.
    pub fn build(config: &Config) -> anyhow::Result<Self> {
        let stats = Arc::new(PipelineStats::new().context("Failed to register pipeline metrics")?);
        let (sender, receiver) = ui_queue(config.queue_capacity, Arc::clone(&stats));
        let ui = UiContext::new(
            receiver,
            stats,
            config.highlight_ticks(),
            config.max_messages_per_pump(),
        );

        let processes = Arc::new(process_provider(config));
        let process_subscription = Marshaller::attach(processes.events(), sender.clone());

        let services = service_provider(config).map(Arc::new);
        let service_subscription = services
            .as_ref()
            .map(|p| Marshaller::attach(p.events(), sender.clone()));
        if services.is_none() {
            info!("No services_file configured, service provider disabled");
        }

        Ok(Self {
            ui,
            processes,
            services,
            process_subscription: Some(process_subscription),
            service_subscription,
            threads: Vec::new(),
        })
    }

    /// Starts one background thread per provider.
    pub fn start(&mut self, config: &Config) -> anyhow::Result<()> {
        let thread = ProviderThread::spawn(Arc::clone(&self.processes), config.process_interval())
            .context("Failed to start process provider thread")?;
        self.threads.push(thread);

        if let Some(services) = &self.services {
            let thread = ProviderThread::spawn(Arc::clone(services), config.service_interval())
                .context("Failed to start service provider thread")?;
            self.threads.push(thread);
        }
        Ok(())
    }

    /// Runs one pass of each provider on the calling thread.
    pub fn run_once(&self) -> anyhow::Result<()> {
        let summary = self
            .processes
            .run_once()
            .with_context(|| format!("Provider {} failed", self.processes.name()))?;
        debug!(?summary, "Process pass");
        if let Some(services) = &self.services {
            let summary = services
                .run_once()
                .with_context(|| format!("Provider {} failed", services.name()))?;
            debug!(?summary, "Service pass");
        }
        Ok(())
    }

    /// Pumps until the queue is empty.
    pub fn drain(&mut self) -> usize {
        let mut total = 0;
        loop {
            let report = self.ui.pump();
            total += report.processed;
            if !report.more_pending || report.processed == 0 {
                return total;
            }
        }
    }

    pub fn summary_line(&self, tick: u64) -> String {
        let p = self.ui.processes().summary();
        let mut line = format!(
            "tick {tick}: processes {} (threads {}, working set {}, cpu {:.1}%)",
            p.count,
            p.threads,
            format_bytes(p.working_set_bytes),
            p.cpu_percent
        );
        if self.services.is_some() {
            let s = self.ui.services().summary();
            line.push_str(&format!(
                " | services {} (running {}, stopped {}, pending {})",
                s.count, s.running, s.stopped, s.pending
            ));
        }
        line.push_str(&format!(" | queued {}", self.ui.pending()));
        line
    }

    pub fn render(&self) -> String {
        let mut out = self
            .ui
            .processes()
            .list()
            .render(ProcessAttributes::headers());
        if self.services.is_some() {
            out.push('\n');
            out.push_str(
                &self
                    .ui
                    .services()
                    .list()
                    .render(ServiceAttributes::headers()),
            );
        }
        out
    }

    /// Stops providers, cancels delivery, then tears the UI side down.
    pub fn shutdown(mut self) -> Arc<PipelineStats> {
        for thread in self.threads.drain(..) {
            let name = thread.name().to_string();
            thread.stop();
            debug!(provider = %name, "Provider stopped");
        }
        if let Some(s) = self.process_subscription.take() {
            s.detach();
        }
        if let Some(s) = self.service_subscription.take() {
            s.detach();
        }
        let discarded = self.ui.shutdown();
        if discarded > 0 {
            warn!(discarded, "Undelivered notifications discarded at shutdown");
        }
        Arc::clone(self.ui.stats())
    }
}

/// How long the UI loop waits for a message before treating the tick as idle.
pub fn tick_timeout(tick_ms: u64) -> Duration {
    Duration::from_millis(tick_ms.max(1))
}
