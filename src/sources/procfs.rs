//! Process source backed by a `/proc` tree.
//!
//! Reads `/proc/<pid>/stat` (parent, threads, CPU time, start time), `statm`
//! (resident pages) and `comm`/`cmdline` (name). Per-pid reads run in
//! parallel on the rayon pool. CPU percent is the delta of user+system time
//! since the previous scan of the same process incarnation.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, trace};

use super::NameFilter;
use crate::entity::ProcessAttributes;
use crate::error::SourceError;
use crate::provider::EntitySource;

fn sysconf_or(name: libc::c_int, fallback: i64) -> i64 {
    // SAFETY: sysconf has no memory-safety preconditions; -1/0 are handled below.
    let value = unsafe { libc::sysconf(name) };
    if value > 0 {
        value as i64
    } else {
        fallback
    }
}

/// System clock ticks per second.
pub static CLK_TCK: Lazy<f64> = Lazy::new(|| sysconf_or(libc::_SC_CLK_TCK, 100) as f64);

static PAGE_SIZE: Lazy<u64> = Lazy::new(|| sysconf_or(libc::_SC_PAGESIZE, 4096) as u64);

#[derive(Debug, Clone)]
pub struct ProcEntry {
    pub pid: u32,
    pub proc_path: PathBuf,
}

/// Numeric directories under `root` that have a `stat` file, sorted by pid.
pub fn collect_proc_entries(root: &Path, max: Option<usize>) -> io::Result<Vec<ProcEntry>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(root)?.flatten() {
        let p = entry.path();
        let Some(name) = p.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Ok(pid) = name.parse::<u32>() else {
            continue;
        };
        if !p.join("stat").exists() {
            continue;
        }
        out.push(ProcEntry { pid, proc_path: p });
    }
    out.sort_unstable_by_key(|e| e.pid);
    if let Some(max) = max {
        out.truncate(max);
    }
    Ok(out)
}

/// Fields of `/proc/<pid>/stat` used by the process list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFields {
    pub comm: String,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub threads: u32,
    pub start_time: u64,
    pub rss_pages: u64,
}

/// Parses a stat line. The command name may contain spaces and parentheses,
/// so fields are counted from the last `)`.
pub fn parse_stat(content: &str) -> Option<StatFields> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let comm = content[open + 1..close].to_string();
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() <= 21 {
        return None;
    }
    Some(StatFields {
        comm,
        ppid: rest[1].parse().ok()?,
        utime: rest[11].parse().ok()?,
        stime: rest[12].parse().ok()?,
        threads: rest[17].parse().ok()?,
        start_time: rest[19].parse().ok()?,
        rss_pages: rest[21].parse().unwrap_or(0),
    })
}

/// Reads the process name from `comm`, falling back to `cmdline`'s argv[0].
pub fn read_process_name(proc_path: &Path) -> Option<String> {
    if let Ok(s) = fs::read_to_string(proc_path.join("comm")) {
        let t = s.trim();
        if !t.is_empty() {
            return Some(t.into());
        }
    }

    let content = fs::read(proc_path.join("cmdline")).ok()?;
    let first = content.split(|&b| b == 0u8).next()?;
    let first = std::str::from_utf8(first).ok()?;
    Path::new(first)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

fn read_resident_pages(proc_path: &Path) -> Option<u64> {
    let s = fs::read_to_string(proc_path.join("statm")).ok()?;
    s.split_whitespace().nth(1)?.parse().ok()
}

struct RawProcess {
    pid: u32,
    name: String,
    stat: StatFields,
    resident_pages: u64,
}

fn read_process(entry: &ProcEntry) -> Option<RawProcess> {
    let content = match fs::read_to_string(entry.proc_path.join("stat")) {
        Ok(c) => c,
        Err(e) => {
            // Usually the process exited between listing and reading.
            trace!(pid = entry.pid, "Skipping process: {}", e);
            return None;
        }
    };
    let Some(stat) = parse_stat(&content) else {
        debug!(pid = entry.pid, "Unparseable stat line");
        return None;
    };
    let name = read_process_name(&entry.proc_path).unwrap_or_else(|| stat.comm.clone());
    let resident_pages = read_resident_pages(&entry.proc_path).unwrap_or(stat.rss_pages);
    Some(RawProcess {
        pid: entry.pid,
        name,
        stat,
        resident_pages,
    })
}

struct CpuSample {
    ticks: u64,
    start_time: u64,
    at: Instant,
}

pub struct ProcfsSource {
    root: PathBuf,
    filter: NameFilter,
    max_processes: Option<usize>,
    cpu_cache: HashMap<u32, CpuSample>,
}

impl ProcfsSource {
    pub fn new(root: impl Into<PathBuf>, filter: NameFilter, max_processes: Option<usize>) -> Self {
        Self {
            root: root.into(),
            filter,
            max_processes,
            cpu_cache: HashMap::new(),
        }
    }

    fn cpu_percent(&mut self, pid: u32, stat: &StatFields, now: Instant) -> f32 {
        let ticks = stat.utime + stat.stime;
        let previous = self.cpu_cache.insert(
            pid,
            CpuSample {
                ticks,
                start_time: stat.start_time,
                at: now,
            },
        );
        match previous {
            Some(prev) if prev.start_time == stat.start_time && ticks >= prev.ticks => {
                let dt = now.duration_since(prev.at).as_secs_f64();
                if dt <= 0.0 {
                    return 0.0;
                }
                let cpu_seconds = (ticks - prev.ticks) as f64 / *CLK_TCK;
                (cpu_seconds / dt * 100.0) as f32
            }
            _ => 0.0,
        }
    }
}

impl EntitySource<ProcessAttributes> for ProcfsSource {
    fn name(&self) -> &str {
        "procfs"
    }

    fn scan(&mut self) -> Result<Vec<(u32, ProcessAttributes)>, SourceError> {
        let entries =
            collect_proc_entries(&self.root, self.max_processes).map_err(|source| SourceError::Io {
                path: self.root.clone(),
                source,
            })?;

        let raw: Vec<RawProcess> = entries.par_iter().filter_map(read_process).collect();
        let now = Instant::now();

        let mut out = Vec::with_capacity(raw.len());
        for p in raw {
            if !self.filter.matches(&p.name) {
                continue;
            }
            let cpu_percent = self.cpu_percent(p.pid, &p.stat, now);
            out.push((
                p.pid,
                ProcessAttributes {
                    name: p.name,
                    parent_pid: (p.stat.ppid != 0).then_some(p.stat.ppid),
                    threads: p.stat.threads,
                    working_set_bytes: p.resident_pages * *PAGE_SIZE,
                    cpu_percent,
                    start_time_ticks: p.stat.start_time,
                },
            ));
        }

        let live: HashSet<u32> = out.iter().map(|(pid, _)| *pid).collect();
        self.cpu_cache.retain(|pid, _| live.contains(pid));
        debug!(root = %self.root.display(), count = out.len(), "Scanned processes");
        Ok(out)
    }
}
