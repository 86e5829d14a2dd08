//! Process table sampling and CPU ranking.
//!
//! The sampler keeps two generations of process records. Each tick the
//! generations swap, the process table is read into the current one and every
//! pid found in both is ranked by the CPU ticks it used in between.

use crate::collector::procfs::parser::{
    ProcIo, ProcStat, ProcStatm, UserResolver, parse_proc_io, parse_proc_stat, parse_proc_statm,
    parse_status_uid,
};
use crate::collector::traits::FileSystem;
use crate::platform::Platform;
use crate::writer::{SnapshotWriter, WriterError};
use std::path::Path;
use tracing::{debug, trace};

/// Slots reserved beyond the current process count.
pub const SLOT_HEADROOM: usize = 128;

/// Default upper bound on processes read per tick (default `pid_max`).
pub const DEFAULT_MAX_SLOTS: usize = 32768;

/// Error type for collection failures.
#[derive(Debug)]
pub enum CollectError {
    /// Process disappeared during collection.
    ProcessGone(u32),
    /// I/O error reading process files.
    Io(std::io::Error),
    /// Parse error in process files.
    Parse(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::ProcessGone(pid) => write!(f, "process {} disappeared", pid),
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}

/// Everything read for one process in one tick.
#[derive(Debug, Clone, Default)]
pub struct ProcessRecord {
    pub stat: ProcStat,
    pub statm: ProcStatm,
    pub uid: u32,
    /// Absent when `/proc/[pid]/io` is not readable (other users' processes).
    pub io: Option<ProcIo>,
}

impl ProcessRecord {
    pub fn pid(&self) -> u32 {
        self.stat.pid
    }

    /// Same process in two generations: same pid and same start time, so a
    /// recycled pid is not mistaken for its predecessor.
    fn same_process(&self, other: &ProcessRecord) -> bool {
        self.stat.pid == other.stat.pid && self.stat.starttime == other.stat.starttime
    }
}

/// One process table snapshot. Slots past `count` are stale records kept
/// allocated for reuse.
#[derive(Debug, Default)]
struct Generation {
    slots: Vec<ProcessRecord>,
    count: usize,
}

impl Generation {
    fn records(&self) -> &[ProcessRecord] {
        &self.slots[..self.count]
    }

    fn reset(&mut self, max_slots: usize) {
        self.count = 0;
        if self.slots.capacity() < max_slots {
            self.slots.reserve(max_slots - self.slots.len());
        }
    }

    fn store(&mut self, record: ProcessRecord) {
        if self.count < self.slots.len() {
            self.slots[self.count] = record;
        } else {
            self.slots.push(record);
        }
        self.count += 1;
    }
}

#[derive(Debug, Default)]
struct Generations {
    gens: [Generation; 2],
    current: usize,
}

impl Generations {
    /// Makes the other generation current and returns its index.
    fn swap(&mut self) -> usize {
        self.current ^= 1;
        self.current
    }

    fn current(&self) -> &Generation {
        &self.gens[self.current]
    }

    fn previous(&self) -> &Generation {
        &self.gens[self.current ^ 1]
    }

    fn current_mut(&mut self) -> &mut Generation {
        &mut self.gens[self.current]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// No capture yet, nothing to compare against.
    NoBaseline,
    HasBaseline,
}

/// A process that passed the threshold in the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankEntry {
    /// Slot in the current generation.
    pub current: usize,
    /// Slot in the previous generation.
    pub previous: usize,
    /// User plus system ticks used since the previous generation.
    pub cpu_delta: u64,
}

/// Samples `/proc/[pid]/` and ranks processes by CPU use.
pub struct ProcessSampler<F: FileSystem> {
    fs: F,
    proc_path: String,
    platform: Platform,
    users: UserResolver,
    generations: Generations,
    ranked: Vec<RankEntry>,
    state: SamplerState,
    elapsed: f64,
    max_slots: usize,
}

impl<F: FileSystem> ProcessSampler<F> {
    /// Creates a sampler reading `proc_path` and resolving user names from
    /// `passwd_path`.
    pub fn new(fs: F, proc_path: impl Into<String>, passwd_path: &str, platform: Platform) -> Self {
        let mut users = UserResolver::new();
        match fs.read_to_string(Path::new(passwd_path)) {
            Ok(content) => users.load_from_content(&content),
            Err(e) => debug!("user names unavailable, {}: {}", passwd_path, e),
        }

        Self {
            fs,
            proc_path: proc_path.into(),
            platform,
            users,
            generations: Generations::default(),
            ranked: Vec::new(),
            state: SamplerState::NoBaseline,
            elapsed: 0.0,
            max_slots: DEFAULT_MAX_SLOTS,
        }
    }

    /// Caps the number of processes read per tick.
    pub fn with_max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Number of processes read in the current generation.
    pub fn total(&self) -> usize {
        self.generations.current().count
    }

    pub fn ranked(&self) -> &[RankEntry] {
        &self.ranked
    }

    /// Record of a ranked entry in the current generation.
    pub fn record(&self, entry: &RankEntry) -> &ProcessRecord {
        &self.generations.current().slots[entry.current]
    }

    /// Captures the first generation without ranking.
    pub fn seed(&mut self) -> Result<usize, CollectError> {
        let count = self.capture(self.max_slots)?;
        self.state = SamplerState::HasBaseline;
        self.ranked.clear();
        Ok(count)
    }

    /// Runs one tick: swap, capture, rank. Without a baseline the tick only
    /// captures and leaves the ranking empty.
    pub fn sample(&mut self, elapsed: f64, threshold: f64) -> Result<(), CollectError> {
        match self.state {
            SamplerState::NoBaseline => {
                self.seed()?;
            }
            SamplerState::HasBaseline => {
                self.generations.swap();
                self.capture(self.max_slots)?;
                self.rank(elapsed, threshold);
            }
        }
        Ok(())
    }

    /// Reads numeric `/proc` entries into the current generation, at most
    /// `max_slots` of them, and returns how many were read. Processes that
    /// exit mid-read are skipped.
    pub fn capture(&mut self, max_slots: usize) -> Result<usize, CollectError> {
        let entries = self.fs.read_dir(Path::new(&self.proc_path))?;
        let pids: Vec<u32> = entries
            .iter()
            .filter_map(|entry| entry.file_name()?.to_str()?.parse().ok())
            .collect();

        if pids.len() > max_slots {
            debug!("{} processes, reading the first {}", pids.len(), max_slots);
        }
        let generation = self.generations.current_mut();
        generation.reset(pids.len().min(max_slots) + SLOT_HEADROOM);

        for pid in pids {
            if generation.count >= max_slots {
                break;
            }
            match read_process(&self.fs, &self.proc_path, pid) {
                Ok(record) => generation.store(record),
                Err(CollectError::ProcessGone(pid)) => {
                    trace!("process {} exited during capture", pid);
                }
                Err(e) => debug!("skipping process {}: {}", pid, e),
            }
        }

        Ok(generation.count)
    }

    /// Matches the generations by pid and keeps processes that used more than
    /// `threshold` of one core over `elapsed` seconds, busiest first.
    pub fn rank(&mut self, elapsed: f64, threshold: f64) -> &[RankEntry] {
        self.ranked.clear();
        self.elapsed = elapsed;
        if elapsed <= 0.0 {
            return &self.ranked;
        }

        let ticks = self.platform.clock_ticks as f64;
        let current = self.generations.current().records();
        let previous = self.generations.previous().records();

        for (ci, cur) in current.iter().enumerate() {
            let Some(pi) = previous.iter().position(|prev| prev.same_process(cur)) else {
                continue;
            };
            let prev = &previous[pi];
            let cpu_delta = cur.stat.utime.saturating_sub(prev.stat.utime)
                + cur.stat.stime.saturating_sub(prev.stat.stime);
            let fraction = cpu_delta as f64 / ticks / elapsed;
            if fraction > threshold {
                self.ranked.push(RankEntry {
                    current: ci,
                    previous: pi,
                    cpu_delta,
                });
            }
        }

        self.ranked.sort_by(|a, b| {
            b.cpu_delta
                .cmp(&a.cpu_delta)
                .then_with(|| current[a.current].pid().cmp(&current[b.current].pid()))
        });
        &self.ranked
    }

    /// Writes `process_summary` and one `processes` subsection per ranked
    /// process.
    pub fn emit(&self, w: &mut SnapshotWriter) -> Result<(), WriterError> {
        w.open_section("process_summary");
        w.unsigned("total", self.total() as u64);
        w.unsigned("ranked", self.ranked.len() as u64);
        w.close_section()?;

        w.open_section("processes");
        let current = self.generations.current().records();
        let previous = self.generations.previous().records();
        for entry in &self.ranked {
            self.write_process(w, &current[entry.current], &previous[entry.previous], entry)?;
        }
        w.close_section()
    }

    fn write_process(
        &self,
        w: &mut SnapshotWriter,
        cur: &ProcessRecord,
        prev: &ProcessRecord,
        entry: &RankEntry,
    ) -> Result<(), WriterError> {
        let ticks = self.platform.clock_ticks as f64;
        let elapsed = self.elapsed;
        let page_kb = self.platform.page_size / 1024;
        let percent = |delta: u64| delta as f64 / ticks / elapsed * 100.0;
        let rate = |now: u64, before: u64| now.saturating_sub(before) as f64 / elapsed;
        let stat = &cur.stat;

        w.open_subsection(&format!("process_{}", stat.pid));
        w.long("pid", i64::from(stat.pid));
        w.string("cmd", &stat.comm);
        w.long("ppid", i64::from(stat.ppid));
        w.long("pgrp", i64::from(stat.pgrp));
        w.long("priority", stat.priority);
        w.long("nice", stat.nice);
        w.long("session", i64::from(stat.session));
        w.long("tty_nr", i64::from(stat.tty_nr));
        w.hex("flags", u64::from(stat.flags));
        w.string("state", &state_name(stat.state));
        w.long("threads", stat.num_threads);

        w.double("cpu_percent", percent(entry.cpu_delta));
        w.double("cpu_usr", percent(stat.utime.saturating_sub(prev.stat.utime)));
        w.double("cpu_sys", percent(stat.stime.saturating_sub(prev.stat.stime)));
        w.double("cpu_usr_total_secs", stat.utime as f64 / ticks);
        w.double("cpu_sys_total_secs", stat.stime as f64 / ticks);

        w.unsigned("statm_size_kb", cur.statm.size * page_kb);
        w.unsigned("statm_resident_kb", cur.statm.resident * page_kb);
        w.unsigned("statm_restext_kb", cur.statm.text * page_kb);
        w.unsigned("statm_resdata_kb", cur.statm.data * page_kb);
        w.unsigned("statm_share_kb", cur.statm.shared * page_kb);

        w.double("minorfault", rate(stat.minflt, prev.stat.minflt));
        w.double("majorfault", rate(stat.majflt, prev.stat.majflt));
        if let (Some(now), Some(before)) = (cur.io, prev.io) {
            w.double("io_read_bytes", rate(now.read_bytes, before.read_bytes));
            w.double("io_write_bytes", rate(now.write_bytes, before.write_bytes));
        }

        w.long("it_real_value", stat.itrealvalue);
        w.double("starttime_secs", stat.starttime as f64 / ticks);
        w.unsigned("virtual_size_kb", stat.vsize / 1024);
        w.long("rss_pages", stat.rss);
        w.unsigned("rss_limit", stat.rsslim);
        w.unsigned("swap_pages", stat.nswap);
        w.unsigned("child_swap_pages", stat.cnswap);
        w.long("last_cpu", i64::from(stat.processor));
        w.unsigned("realtime_priority", u64::from(stat.rt_priority));
        w.unsigned("sched_policy", u64::from(stat.policy));
        w.double("delayacct_blkio_secs", stat.delayacct_blkio_ticks as f64 / ticks);
        w.unsigned("uid", u64::from(cur.uid));
        w.string("username", &self.users.resolve(cur.uid));
        w.close_subsection()
    }
}

fn read_process<F: FileSystem>(
    fs: &F,
    proc_path: &str,
    pid: u32,
) -> Result<ProcessRecord, CollectError> {
    let read = |file: &str| {
        fs.read_to_string(Path::new(&format!("{}/{}/{}", proc_path, pid, file)))
            .map_err(|_| CollectError::ProcessGone(pid))
    };

    let stat = parse_proc_stat(&read("stat")?).map_err(|e| CollectError::Parse(e.message))?;
    let statm = parse_proc_statm(&read("statm")?).map_err(|e| CollectError::Parse(e.message))?;
    let uid = parse_status_uid(&read("status")?).map_err(|e| CollectError::Parse(e.message))?;
    let io = read("io").ok().map(|content| parse_proc_io(&content));

    Ok(ProcessRecord {
        stat,
        statm,
        uid,
        io,
    })
}

/// Human readable name of a `/proc/[pid]/stat` state letter.
pub fn state_name(state: char) -> String {
    let name = match state {
        'R' => "Running",
        'S' => "Sleeping-interruptible",
        'D' => "Waiting-uninterruptible",
        'Z' => "Zombie",
        'T' => "Stopped",
        't' => "Tracing",
        'W' => "Paging-or-Waking",
        'X' => "Dead",
        'x' => "dead",
        'K' => "Wakekill",
        'P' => "Parked",
        'I' => "Idle",
        other => return format!("State={}({})", other as u32, other),
    };
    name.to_string()
}
