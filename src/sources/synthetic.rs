//! Seeded random process churn.
//!
//! Produces a plausible process table that changes on every scan: processes
//! exit, new ones start (occasionally on a recycled pid), and the survivors'
//! CPU and memory drift. The same seed always yields the same sequence.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use crate::entity::ProcessAttributes;
use crate::error::SourceError;
use crate::provider::EntitySource;

const NAMES: &[&str] = &[
    "svchost", "nginx", "postgres", "sshd", "chrome", "code", "python3", "bash", "redis-server",
    "java", "containerd", "systemd-journald",
];

pub struct SyntheticSource {
    rng: StdRng,
    population: BTreeMap<u32, ProcessAttributes>,
    next_pid: u32,
    clock: u64,
    churn: f64,
}

impl SyntheticSource {
    pub fn new(seed: u64, initial: usize) -> Self {
        let mut source = Self {
            rng: StdRng::seed_from_u64(seed),
            population: BTreeMap::new(),
            next_pid: 2,
            clock: 1,
            churn: 0.05,
        };
        source.population.insert(
            1,
            ProcessAttributes {
                name: "init".into(),
                parent_pid: None,
                threads: 1,
                working_set_bytes: 8 * 1024 * 1024,
                cpu_percent: 0.0,
                start_time_ticks: 1,
            },
        );
        for _ in 1..initial.max(1) {
            let pid = source.allocate_pid();
            source.spawn(pid);
        }
        source
    }

    /// Per-scan probability that a process exits. Clamped to `0.0..=1.0`.
    pub fn with_churn(mut self, churn: f64) -> Self {
        self.churn = churn.clamp(0.0, 1.0);
        self
    }

    pub fn len(&self) -> usize {
        self.population.len()
    }

    pub fn is_empty(&self) -> bool {
        self.population.is_empty()
    }

    fn allocate_pid(&mut self) -> u32 {
        let pid = self.next_pid;
        self.next_pid += self.rng.gen_range(1..=4);
        pid
    }

    fn spawn(&mut self, pid: u32) {
        let parents: Vec<u32> = self.population.keys().copied().collect();
        let parent_pid = parents.choose(&mut self.rng).copied();
        let name = NAMES.choose(&mut self.rng).copied().unwrap_or("proc");
        let attributes = ProcessAttributes {
            name: name.to_string(),
            parent_pid,
            threads: self.rng.gen_range(1..=64),
            working_set_bytes: self.rng.gen_range(1..=512) * 1024 * 1024,
            cpu_percent: 0.0,
            start_time_ticks: self.clock * 100 + pid as u64 % 100,
        };
        self.population.insert(pid, attributes);
    }

    fn step(&mut self) {
        self.clock += 1;

        let exiting: Vec<u32> = self
            .population
            .keys()
            .copied()
            .filter(|&pid| pid != 1)
            .filter(|_| self.rng.gen_bool(self.churn))
            .collect();
        for pid in &exiting {
            self.population.remove(pid);
        }

        let births = exiting.len() + self.rng.gen_range(0..=1);
        for _ in 0..births {
            let pid = match exiting.choose(&mut self.rng) {
                Some(&recycled) if self.rng.gen_bool(0.2) && !self.population.contains_key(&recycled) => {
                    recycled
                }
                _ => self.allocate_pid(),
            };
            self.spawn(pid);
        }

        let rng = &mut self.rng;
        for attributes in self.population.values_mut() {
            if rng.gen_bool(0.3) {
                attributes.cpu_percent = rng.gen_range(0.0..25.0);
                let delta = rng.gen_range(-4i64..=4) * 1024 * 1024;
                attributes.working_set_bytes =
                    (attributes.working_set_bytes as i64 + delta).max(1024 * 1024) as u64;
            }
        }
    }
}

impl EntitySource<ProcessAttributes> for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn scan(&mut self) -> Result<Vec<(u32, ProcessAttributes)>, SourceError> {
        self.step();
        Ok(self
            .population
            .iter()
            .map(|(pid, attributes)| (*pid, attributes.clone()))
            .collect())
    }
}
