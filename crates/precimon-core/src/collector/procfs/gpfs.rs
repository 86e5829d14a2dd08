//! GPFS (Spectrum Scale) I/O counters from `mmpmon`.
//!
//! Only root may query `mmpmon`. Each tick runs it once with the `io_s` and
//! `fs_io_s` requests on stdin and reports per-second rates of the
//! cumulative counters.

use crate::collector::procfs::OptionalSource;
use crate::collector::procfs::parser::{MmpmonRecord, parse_mmpmon};
use crate::collector::traits::FileSystem;
use crate::delta::{CounterKey, DeltaCounterStore};
use crate::error::AgentError;
use crate::writer::SnapshotWriter;
use std::path::Path;
use tracing::{debug, info};

pub const MMKSH_PATH: &str = "/usr/lpp/mmfs/bin/mmksh";
const MMPMON_COMMAND: &str = "/usr/lpp/mmfs/bin/mmpmon -s -p";
const REQUESTS: &str = "io_s\nfs_io_s\n";

/// Filesystems reported per tick.
const MAX_FILESYSTEMS: usize = 64;

/// mmpmon tag and output name of every rate field.
const RATE_FIELDS: [(&str, &str); 9] = [
    ("tu", "tu"),
    ("br", "readbytes"),
    ("bw", "writebytes"),
    ("oc", "open"),
    ("cc", "close"),
    ("rdc", "reads"),
    ("wc", "writes"),
    ("dir", "directorylookup"),
    ("iu", "inodeupdate"),
];

pub struct GpfsCollector<F: FileSystem> {
    fs: F,
    mmpmon: OptionalSource,
    counters: DeltaCounterStore<CounterKey>,
}

impl<F: FileSystem> GpfsCollector<F> {
    /// `uid` is the agent's user; anyone but root leaves the collector off.
    pub fn new(fs: F, uid: u32) -> Self {
        let mut mmpmon = OptionalSource::new(MMKSH_PATH);
        if uid != 0 {
            debug!("not root, GPFS not collected");
            mmpmon.disable();
        } else if !fs.exists(Path::new(MMKSH_PATH)) {
            debug!("{} not found, GPFS not collected", MMKSH_PATH);
            mmpmon.disable();
        }

        Self {
            fs,
            mmpmon,
            counters: DeltaCounterStore::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.mmpmon.is_disabled()
    }

    pub fn seed(&mut self) -> Result<(), AgentError> {
        let mut scratch = SnapshotWriter::with_capacity(16 * 1024);
        scratch.open_document();
        self.write_tick(&mut scratch, 0.0)
    }

    fn query(&mut self) -> Option<Vec<MmpmonRecord>> {
        let output = self
            .mmpmon
            .run_with_input(&self.fs, &["-c", MMPMON_COMMAND], REQUESTS)?;

        let records = parse_mmpmon(&output);
        if !records.iter().any(|r| r.kind == "io_s") {
            info!("mmpmon returned no io_s record, GPFS not collected");
            self.mmpmon.disable();
            return None;
        }
        Some(records)
    }

    fn rates(
        &mut self,
        key: &str,
        record: &MmpmonRecord,
        elapsed: f64,
    ) -> Option<Vec<(&'static str, f64)>> {
        let fields: Vec<(&'static str, u64)> = RATE_FIELDS
            .iter()
            .map(|&(tag, name)| (name, record.number(tag).unwrap_or(0).max(0) as u64))
            .collect();
        self.counters.update_group(key, &fields, elapsed)
    }

    /// Writes `gpfs_io_total` and `gpfs_filesystems`.
    pub fn write_tick(&mut self, w: &mut SnapshotWriter, elapsed: f64) -> Result<(), AgentError> {
        let Some(records) = self.query() else {
            return Ok(());
        };

        if let Some(total) = records.iter().find(|r| r.kind == "io_s")
            && let Some(rates) = self.rates("gpfs", total, elapsed)
        {
            w.open_section("gpfs_io_total");
            write_identity(w, total);
            for (name, rate) in rates {
                w.double(name, rate);
            }
            w.close_section()?;
        }

        let filesystems: Vec<&MmpmonRecord> = records
            .iter()
            .filter(|r| r.kind == "fs_io_s")
            .take(MAX_FILESYSTEMS)
            .collect();
        if filesystems.is_empty() {
            return Ok(());
        }

        w.open_section("gpfs_filesystems");
        for record in filesystems {
            let name = record.get("fs").unwrap_or("unknown");
            let Some(rates) = self.rates(&format!("gpfs:{}", name), record, elapsed) else {
                continue;
            };
            w.open_subsection(name);
            write_identity(w, record);
            w.string("cl", record.get("cl").unwrap_or(""));
            w.long("disks", record.number("d").unwrap_or(0));
            for (field, rate) in rates {
                w.double(field, rate);
            }
            w.close_subsection()?;
        }
        w.close_section()?;
        Ok(())
    }
}

fn write_identity(w: &mut SnapshotWriter, record: &MmpmonRecord) {
    w.string("node", record.get("n").unwrap_or(""));
    w.string("name", record.get("nn").unwrap_or(""));
    w.long("rc", record.number("rc").unwrap_or(0));
    w.long("time", record.number("t").unwrap_or(0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    fn tick_json(c: &mut GpfsCollector<MockFs>, elapsed: f64) -> serde_json::Value {
        let mut w = SnapshotWriter::new();
        w.open_document();
        c.write_tick(&mut w, elapsed).unwrap();
        w.close_document().unwrap();
        serde_json::from_slice(w.as_bytes()).unwrap()
    }

    #[test]
    fn test_rates_over_elapsed() {
        let mut fs = MockFs::gpfs_system();
        let mut c = GpfsCollector::new(fs.clone(), 0);
        assert!(c.is_enabled());
        c.seed().unwrap();

        fs.set_gpfs_counters(3000, 1500);
        let v = tick_json(&mut c, 2.0);

        let total = &v["gpfs_io_total"];
        assert_eq!(total["node"], "192.168.50.20");
        assert_eq!(total["name"], "ems1-hs");
        assert_eq!(total["rc"], 0);
        assert_eq!(total["readbytes"].as_f64(), Some(1000.0));
        assert_eq!(total["writebytes"].as_f64(), Some(500.0));
        assert_eq!(total["open"].as_f64(), Some(0.0));

        let cesroot = &v["gpfs_filesystems"]["cesroot"];
        assert_eq!(cesroot["cl"], "SBANK_ESS.gpfs.net");
        assert_eq!(cesroot["disks"], 4);
        assert_eq!(cesroot["readbytes"].as_f64(), Some(1000.0));
        assert_eq!(cesroot["inodeupdate"].as_f64(), Some(0.0));
    }

    #[test]
    fn test_non_root_writes_nothing() {
        let fs = MockFs::gpfs_system();
        let mut c = GpfsCollector::new(fs, 1000);
        assert!(!c.is_enabled());
        c.seed().unwrap();
        assert!(tick_json(&mut c, 1.0).as_object().unwrap().is_empty());
    }

    #[test]
    fn test_host_without_gpfs() {
        let mut c = GpfsCollector::new(MockFs::typical_system(), 0);
        assert!(!c.is_enabled());
        assert!(tick_json(&mut c, 1.0).as_object().unwrap().is_empty());
    }

    #[test]
    fn test_failed_mmpmon_disables_collector() {
        let mut fs = MockFs::typical_system();
        fs.add_file(MMKSH_PATH, "");
        let mut c = GpfsCollector::new(fs.clone(), 0);
        c.seed().unwrap();
        assert!(!c.is_enabled());

        fs.set_gpfs_counters(3000, 1500);
        assert!(tick_json(&mut c, 1.0).as_object().unwrap().is_empty());
    }
}
