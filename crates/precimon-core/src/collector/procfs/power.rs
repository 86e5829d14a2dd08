//! POWER (ppc64) partition counters: `lparcfg` and per-cpu purr/spurr.
//!
//! Both sources only exist on POWER hosts. Rates are in processor units:
//! timebase ticks per second divided by the timebase frequency.

use crate::collector::SourcePaths;
use crate::collector::procfs::OptionalSource;
use crate::collector::procfs::parser::{LparValue, parse_cpuinfo, parse_hex_counter, parse_lparcfg};
use crate::collector::traits::FileSystem;
use crate::delta::DeltaCounterStore;
use crate::error::AgentError;
use crate::writer::SnapshotWriter;
use std::path::Path;
use tracing::{debug, info};

pub struct PowerCollector<F: FileSystem> {
    fs: F,
    cpu_dir: String,
    /// Timebase frequency from `/proc/cpuinfo`; `None` on non-POWER hosts.
    timebase: Option<u64>,
    nominal_mhz: f64,
    lparcfg: OptionalSource,
    purr_disabled: bool,
    counters: DeltaCounterStore<&'static str>,
}

impl<F: FileSystem> PowerCollector<F> {
    pub fn new(fs: F, paths: &SourcePaths) -> Self {
        let cpuinfo_path = format!("{}/cpuinfo", paths.proc);
        let cpuinfo = fs
            .read_to_string(Path::new(&cpuinfo_path))
            .map(|content| parse_cpuinfo(&content))
            .unwrap_or_default();
        let timebase = cpuinfo
            .power
            .as_ref()
            .map(|p| p.timebase)
            .filter(|&t| t > 0);
        if let Some(timebase) = timebase {
            info!("POWER host, timebase {}", timebase);
        }

        let mut lparcfg = OptionalSource::new(format!("{}/ppc64/lparcfg", paths.proc));
        if timebase.is_none() {
            lparcfg.disable();
        }

        Self {
            fs,
            cpu_dir: format!("{}/devices/system/cpu", paths.sys),
            timebase,
            nominal_mhz: cpuinfo.nominal_mhz().unwrap_or(0.0),
            lparcfg,
            purr_disabled: timebase.is_none(),
            counters: DeltaCounterStore::new(),
        }
    }

    pub fn is_power(&self) -> bool {
        self.timebase.is_some()
    }

    pub fn seed(&mut self) -> Result<(), AgentError> {
        let mut scratch = SnapshotWriter::with_capacity(16 * 1024);
        scratch.open_document();
        self.write_tick(&mut scratch, 0.0)
    }

    pub fn write_tick(&mut self, w: &mut SnapshotWriter, elapsed: f64) -> Result<(), AgentError> {
        self.write_lparcfg(w, elapsed)?;
        self.write_purr(w, elapsed)
    }

    /// `ppc64_lparcfg`: every line of the file plus consumed and idle pool
    /// processor units derived from the purr and pool idle counters.
    pub fn write_lparcfg(&mut self, w: &mut SnapshotWriter, elapsed: f64) -> Result<(), AgentError> {
        let Some(timebase) = self.timebase else {
            return Ok(());
        };
        let Some(content) = self.lparcfg.read(&self.fs) else {
            return Ok(());
        };
        let cfg = parse_lparcfg(&content);
        let timebase = timebase as f64;

        w.open_section("ppc64_lparcfg");
        if let Some(version) = &cfg.version {
            w.string("lparcfg_version", version);
        }
        for (key, value) in &cfg.entries {
            match value {
                LparValue::Text(text) => w.string(key, text),
                LparValue::Number(n) => {
                    w.long(key, *n);
                    let derived = match key.as_str() {
                        "purr" => Some(("purr", "physical_consumed")),
                        "pool_idle_time" => Some(("pool_idle_time", "pool_idle_cpu")),
                        _ => None,
                    };
                    if let Some((counter, name)) = derived
                        && let Some(rate) = self.counters.update(counter, (*n).max(0) as u64, elapsed)
                    {
                        w.double(name, rate / timebase);
                    }
                }
            }
        }
        w.close_section()?;
        Ok(())
    }

    fn read_cpu_counter(&self, cpu: usize, name: &str) -> Option<u64> {
        let path = format!("{}/cpu{}/{}", self.cpu_dir, cpu, name);
        let content = self.fs.read_to_string(Path::new(&path)).ok()?;
        match parse_hex_counter(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("{}: {}", path, e);
                None
            }
        }
    }

    /// Sums purr and spurr over all cpus. `None` when cpu0 has no counters.
    fn purr_totals(&self) -> Option<(u64, u64)> {
        let mut purr_total = 0u64;
        let mut spurr_total = 0u64;
        for cpu in 0.. {
            let (Some(purr), Some(spurr)) = (
                self.read_cpu_counter(cpu, "purr"),
                self.read_cpu_counter(cpu, "spurr"),
            ) else {
                if cpu == 0 {
                    return None;
                }
                break;
            };
            purr_total = purr_total.wrapping_add(purr);
            spurr_total = spurr_total.wrapping_add(spurr);
        }
        Some((purr_total, spurr_total))
    }

    /// `sys_dev_sys_cpu`: purr/spurr processor units and the effective clock.
    pub fn write_purr(&mut self, w: &mut SnapshotWriter, elapsed: f64) -> Result<(), AgentError> {
        if self.purr_disabled {
            return Ok(());
        }
        let Some(timebase) = self.timebase else {
            return Ok(());
        };
        let totals = match self.purr_totals() {
            Some((purr, spurr)) if purr > 0 && spurr > 0 => (purr, spurr),
            _ => {
                info!("purr/spurr counters unavailable, not collected");
                self.purr_disabled = true;
                return Ok(());
            }
        };

        let purr = self.counters.update("cpu_purr", totals.0, elapsed);
        let spurr = self.counters.update("cpu_spurr", totals.1, elapsed);
        let (Some(purr), Some(spurr)) = (purr, spurr) else {
            return Ok(());
        };

        let timebase = timebase as f64;
        let purr = purr / timebase;
        let spurr = spurr / timebase;
        let overclock = if purr > 0.0 { spurr / purr } else { 0.0 };

        w.open_section("sys_dev_sys_cpu");
        w.double("purr", purr);
        w.double("spurr", spurr);
        w.double("nsp", overclock * 100.0);
        w.double("nominal_mhz", self.nominal_mhz);
        w.double("current_mhz", self.nominal_mhz * overclock);
        w.close_section()?;
        Ok(())
    }
}
