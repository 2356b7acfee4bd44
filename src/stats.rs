//! Pipeline statistics.
//!
//! Counters for every message that crosses the UI queue, exported through a
//! Prometheus registry, plus running timing statistics for UI pumps.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Running statistics for a single metric.
#[derive(Clone, Copy, Default, Debug)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// Returns (last, avg, max, min, count).
    pub fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// Counters shared by the marshallers (producers) and the UI thread.
pub struct PipelineStats {
    registry: Registry,
    enqueued: IntCounterVec,
    lost: IntCounterVec,
    processed: IntCounterVec,
    discarded: IntCounter,
    duplicate_keys: IntCounter,
    stale_messages: IntCounter,
    resync_repairs: IntCounter,
    bound_elements: IntGaugeVec,

    enqueued_total: AtomicU64,
    lost_total: AtomicU64,
    processed_total: AtomicU64,
    discarded_total: AtomicU64,

    pub pump_duration_ms: Stat,
}

impl PipelineStats {
    /// Creates the counters and registers them with a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let enqueued = IntCounterVec::new(
            Opts::new(
                "procmon_messages_enqueued_total",
                "Notifications successfully handed to the UI queue",
            ),
            &["message"],
        )?;
        let lost = IntCounterVec::new(
            Opts::new(
                "procmon_messages_lost_total",
                "Notifications dropped because the UI queue was full or closed",
            ),
            &["message"],
        )?;
        let processed = IntCounterVec::new(
            Opts::new(
                "procmon_messages_processed_total",
                "Notifications applied by the UI thread",
            ),
            &["message"],
        )?;
        let discarded = IntCounter::new(
            "procmon_messages_discarded_total",
            "Notifications discarded undelivered at shutdown",
        )?;
        let duplicate_keys = IntCounter::new(
            "procmon_duplicate_keys_total",
            "Added notifications for a key that was already bound",
        )?;
        let stale_messages = IntCounter::new(
            "procmon_stale_messages_total",
            "Modified/Removed notifications for an older incarnation of a bound key",
        )?;
        let resync_repairs = IntCounter::new(
            "procmon_resync_repairs_total",
            "UI elements created or dropped by a resync after lost notifications",
        )?;
        let bound_elements = IntGaugeVec::new(
            Opts::new("procmon_bound_elements", "UI elements currently bound"),
            &["side"],
        )?;

        registry.register(Box::new(enqueued.clone()))?;
        registry.register(Box::new(lost.clone()))?;
        registry.register(Box::new(processed.clone()))?;
        registry.register(Box::new(discarded.clone()))?;
        registry.register(Box::new(duplicate_keys.clone()))?;
        registry.register(Box::new(stale_messages.clone()))?;
        registry.register(Box::new(resync_repairs.clone()))?;
        registry.register(Box::new(bound_elements.clone()))?;

        Ok(Self {
            registry,
            enqueued,
            lost,
            processed,
            discarded,
            duplicate_keys,
            stale_messages,
            resync_repairs,
            bound_elements,
            enqueued_total: AtomicU64::new(0),
            lost_total: AtomicU64::new(0),
            processed_total: AtomicU64::new(0),
            discarded_total: AtomicU64::new(0),
            pump_duration_ms: Stat::default(),
        })
    }

    pub fn record_enqueued(&self, message: &str) {
        self.enqueued.with_label_values(&[message]).inc();
        self.enqueued_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self, message: &str) {
        self.lost.with_label_values(&[message]).inc();
        self.lost_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, message: &str) {
        self.processed.with_label_values(&[message]).inc();
        self.processed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: u64) {
        self.discarded.inc_by(count);
        self.discarded_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_duplicate_key(&self) {
        self.duplicate_keys.inc();
    }

    pub fn record_stale(&self) {
        self.stale_messages.inc();
    }

    pub fn record_resync_repairs(&self, count: u64) {
        self.resync_repairs.inc_by(count);
    }

    pub fn set_bound_elements(&self, side: &str, count: usize) {
        self.bound_elements
            .with_label_values(&[side])
            .set(count as i64);
    }

    pub fn enqueued_total(&self) -> u64 {
        self.enqueued_total.load(Ordering::Relaxed)
    }

    pub fn lost_total(&self) -> u64 {
        self.lost_total.load(Ordering::Relaxed)
    }

    pub fn processed_total(&self) -> u64 {
        self.processed_total.load(Ordering::Relaxed)
    }

    pub fn discarded_total(&self) -> u64 {
        self.discarded_total.load(Ordering::Relaxed)
    }

    pub fn duplicate_keys_total(&self) -> u64 {
        self.duplicate_keys.get()
    }

    pub fn stale_total(&self) -> u64 {
        self.stale_messages.get()
    }

    pub fn resync_repairs_total(&self) -> u64 {
        self.resync_repairs.get()
    }

    /// Renders all counters in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
