//! Per-tick system sections: CPU, memory, disks, networks, filesystems.

use crate::collector::SourcePaths;
use crate::collector::procfs::OptionalSource;
use crate::collector::procfs::parser::{
    GlobalStat, parse_diskstats, parse_global_stat, parse_mtab, parse_name_values, parse_net_dev,
    parse_uptime,
};
use crate::collector::traits::FileSystem;
use crate::delta::{CounterKey, DeltaCounterStore};
use crate::error::AgentError;
use crate::platform::Platform;
use crate::writer::SnapshotWriter;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Collects system-wide metrics and turns counters into rates.
pub struct SystemCollector<F: FileSystem> {
    fs: F,
    paths: SourcePaths,
    platform: Platform,
    counters: DeltaCounterStore<CounterKey>,
    uptime: OptionalSource,
    mtab: OptionalSource,
}

impl<F: FileSystem> SystemCollector<F> {
    pub fn new(fs: F, paths: SourcePaths, platform: Platform) -> Self {
        let uptime = OptionalSource::new(format!("{}/uptime", paths.proc));
        let mtab = OptionalSource::new(format!("{}/mtab", paths.etc));
        Self {
            fs,
            paths,
            platform,
            counters: DeltaCounterStore::new(),
            uptime,
            mtab,
        }
    }

    /// Records counter baselines. Output goes to a scratch buffer: with no
    /// elapsed time no rate is produced.
    pub fn seed(&mut self) -> Result<(), AgentError> {
        let mut scratch = SnapshotWriter::with_capacity(64 * 1024);
        scratch.open_document();
        self.write_stat(&mut scratch, 0.0)?;
        self.write_disks(&mut scratch, 0.0)?;
        self.write_networks(&mut scratch, 0.0)?;
        Ok(())
    }

    /// Writes every system section of one tick, in document order.
    pub fn write_tick(&mut self, w: &mut SnapshotWriter, elapsed: f64) -> Result<(), AgentError> {
        self.write_stat(w, elapsed)?;
        self.write_name_values(w, "meminfo", "proc_meminfo")?;
        self.write_name_values(w, "vmstat", "proc_vmstat")?;
        self.write_disks(w, elapsed)?;
        self.write_networks(w, elapsed)?;
        self.write_uptime(w)?;
        self.write_filesystems(w)?;
        self.counters.sweep();
        Ok(())
    }

    fn read_required(&self, name: &str) -> Result<String, AgentError> {
        let path = format!("{}/{}", self.paths.proc, name);
        self.fs
            .read_to_string(Path::new(&path))
            .map_err(|e| AgentError::unreadable(path, e))
    }

    fn read_stat(&self) -> Result<GlobalStat, AgentError> {
        let content = self.read_required("stat")?;
        parse_global_stat(&content).map_err(|e| {
            AgentError::unreadable(
                format!("{}/stat", self.paths.proc),
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })
    }

    /// `cpu_total`, `cpus` and `stat_counters` from one read of `/proc/stat`.
    pub fn write_stat(&mut self, w: &mut SnapshotWriter, elapsed: f64) -> Result<(), AgentError> {
        let stat = self.read_stat()?;
        let ncpus = stat.cpus.len().max(1) as f64;
        // ticks per second -> percent of one cpu
        let to_percent = 100.0 / self.platform.clock_ticks as f64;

        w.open_section("cpu_total");
        if let Some(rates) = self
            .counters
            .update_group("cpu", &stat.total.fields(), elapsed)
        {
            for (name, rate) in rates {
                w.double(name, rate * to_percent / ncpus);
            }
        }
        w.close_section()?;

        w.open_section("cpus");
        for cpu in &stat.cpus {
            let Some(id) = cpu.cpu_id else { continue };
            let name = format!("cpu{}", id);
            if let Some(rates) = self.counters.update_group(&name, &cpu.fields(), elapsed) {
                w.open_subsection(&name);
                for (field, rate) in rates {
                    w.double(field, rate * to_percent);
                }
                w.close_subsection()?;
            }
        }
        w.close_section()?;

        w.open_section("stat_counters");
        if let Some(rate) = self
            .counters
            .update(("stat".to_string(), "ctxt"), stat.ctxt, elapsed)
        {
            w.double("ctxt", rate);
        }
        w.unsigned("btime", stat.btime);
        if let Some(rate) = self
            .counters
            .update(("stat".to_string(), "processes"), stat.processes, elapsed)
        {
            w.double("processes_forks", rate);
        }
        w.unsigned("procs_running", stat.procs_running);
        w.unsigned("procs_blocked", stat.procs_blocked);
        w.close_section()?;
        Ok(())
    }

    /// Copies a `name value` file such as `/proc/meminfo` into a section.
    pub fn write_name_values(
        &self,
        w: &mut SnapshotWriter,
        file: &str,
        section: &str,
    ) -> Result<(), AgentError> {
        let content = self.read_required(file)?;
        w.open_section(section);
        for (name, value) in parse_name_values(&content) {
            w.long(&name, value);
        }
        w.close_section()?;
        Ok(())
    }

    fn is_whole_disk(&self, device: &str) -> bool {
        if device.starts_with("ram") {
            return false;
        }
        let sys_path = format!("{}/block/{}", self.paths.sys, device);
        self.fs.exists(Path::new(&sys_path))
    }

    /// Whole block devices from `/proc/diskstats`.
    pub fn write_disks(&mut self, w: &mut SnapshotWriter, elapsed: f64) -> Result<(), AgentError> {
        let content = self.read_required("diskstats")?;

        w.open_section("disks");
        for disk in parse_diskstats(&content) {
            if !self.is_whole_disk(&disk.device) {
                continue;
            }
            let fields = [
                ("reads", disk.reads),
                ("rmerge", disk.r_merged),
                ("rkb", disk.read_sectors),
                ("rmsec", disk.read_time),
                ("writes", disk.writes),
                ("wmerge", disk.w_merged),
                ("wkb", disk.write_sectors),
                ("wmsec", disk.write_time),
                ("busy", disk.io_time),
                ("backlog", disk.io_weighted_time),
                ("xfers", disk.reads + disk.writes),
            ];
            let Some(rates) = self.counters.update_group(&disk.device, &fields, elapsed) else {
                continue;
            };

            w.open_subsection(&disk.device);
            let mut kb = 0.0;
            let mut xfers = 0.0;
            for (name, rate) in rates {
                let value = match name {
                    // 512 byte sectors
                    "rkb" | "wkb" => rate / 2.0,
                    // ms of io per second -> percent
                    "busy" => rate / 10.0,
                    _ => rate,
                };
                match name {
                    "rkb" | "wkb" => kb += value,
                    "xfers" => xfers = value,
                    _ => {}
                }
                w.double(name, value);
            }
            w.unsigned("inflight", disk.in_flight);
            w.double("bsize", if xfers > 0.0 { kb / xfers } else { 0.0 });
            w.close_subsection()?;
        }
        w.close_section()?;
        Ok(())
    }

    /// Interfaces from `/proc/net/dev`.
    pub fn write_networks(
        &mut self,
        w: &mut SnapshotWriter,
        elapsed: f64,
    ) -> Result<(), AgentError> {
        let content = self.read_required("net/dev")?;

        w.open_section("networks");
        for dev in parse_net_dev(&content) {
            let fields = [
                ("ibytes", dev.rx_bytes),
                ("ipackets", dev.rx_packets),
                ("ierrs", dev.rx_errs),
                ("idrop", dev.rx_drop),
                ("ififo", dev.rx_fifo),
                ("iframe", dev.rx_frame),
                ("obytes", dev.tx_bytes),
                ("opackets", dev.tx_packets),
                ("oerrs", dev.tx_errs),
                ("odrop", dev.tx_drop),
                ("ofifo", dev.tx_fifo),
                ("ocolls", dev.tx_colls),
                ("ocarrier", dev.tx_carrier),
            ];
            // Key interfaces apart from disks of the same name.
            let key = format!("net:{}", dev.interface);
            let Some(rates) = self.counters.update_group(&key, &fields, elapsed) else {
                continue;
            };
            w.open_subsection(&dev.interface);
            for (name, rate) in rates {
                w.double(name, rate);
            }
            w.close_subsection()?;
        }
        w.close_section()?;
        Ok(())
    }

    pub fn write_uptime(&mut self, w: &mut SnapshotWriter) -> Result<(), AgentError> {
        let Some(content) = self.uptime.read(&self.fs) else {
            return Ok(());
        };
        let seconds = match parse_uptime(&content) {
            Ok(seconds) => seconds,
            Err(e) => {
                debug!("{}: {}", self.uptime.path(), e);
                return Ok(());
            }
        };
        let days = seconds / 86_400;
        let hours = (seconds - days * 86_400) / 3_600;

        w.open_section("proc_uptime");
        w.unsigned("total_seconds", seconds);
        w.unsigned("days", days);
        w.unsigned("hours", hours);
        w.close_section()?;
        Ok(())
    }

    /// Mounted block-device filesystems with `statvfs` usage.
    pub fn write_filesystems(&mut self, w: &mut SnapshotWriter) -> Result<(), AgentError> {
        let Some(content) = self.mtab.read(&self.fs) else {
            return Ok(());
        };

        const MB: u64 = 1024 * 1024;
        let mut seen = HashSet::new();

        w.open_section("filesystems");
        for mount in parse_mtab(&content) {
            if !mount.device.starts_with('/') || mount.fs_type.starts_with("autofs") {
                continue;
            }
            if !seen.insert(mount.device.clone()) {
                continue;
            }
            let usage = match self.fs.fs_usage(Path::new(&mount.dir)) {
                Ok(usage) => usage,
                Err(e) => {
                    warn!("statvfs {} failed: {}", mount.dir, e);
                    continue;
                }
            };

            let size_mb = usage.blocks * usage.block_size / MB;
            let free_mb = usage.blocks_free * usage.block_size / MB;

            w.open_subsection(&mount.device);
            w.string("fs_dir", &mount.dir);
            w.string("fs_type", &mount.fs_type);
            w.string("fs_opts", &mount.options);
            w.long("fs_freqs", mount.freq);
            w.long("fs_passno", mount.passno);
            w.unsigned("fs_bsize", usage.block_size);
            w.unsigned("fs_size_mb", size_mb);
            w.unsigned("fs_free_mb", free_mb);
            w.unsigned("fs_used_mb", size_mb.saturating_sub(free_mb));
            if usage.blocks > 0 {
                let used = usage.blocks.saturating_sub(usage.blocks_free) as f64;
                w.double("fs_full_percent", used / usage.blocks as f64 * 100.0);
            }
            w.unsigned("fs_avail", usage.blocks_avail * usage.block_size / MB);
            w.unsigned("fs_files", usage.files);
            w.unsigned("fs_files_free", usage.files_free);
            w.unsigned("fs_namelength", usage.name_max);
            w.close_subsection()?;
        }
        w.close_section()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    fn collector(fs: MockFs) -> SystemCollector<MockFs> {
        SystemCollector::new(fs, SourcePaths::default(), Platform::new(100, 4096))
    }

    fn tick_json(c: &mut SystemCollector<MockFs>, elapsed: f64) -> serde_json::Value {
        let mut w = SnapshotWriter::new();
        w.open_document();
        c.write_tick(&mut w, elapsed).unwrap();
        w.close_document().unwrap();
        serde_json::from_slice(w.as_bytes()).unwrap()
    }

    const DISKSTATS_LATER: &str = "\
   1       0 ram0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
   8       0 sda 12445 100 988654 5000 6789 50 456789 3000 0 6000 8000 0 0 0 0
   8       1 sda1 10000 80 800000 4000 5000 40 400000 2500 0 3500 6500 0 0 0 0
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000 0 0 0 0
";

    #[test]
    fn test_disk_read_rate_over_ten_seconds() {
        let mut fs = MockFs::typical_system();
        let mut c = collector(fs.clone());
        c.seed().unwrap();

        fs.add_file("/proc/diskstats", DISKSTATS_LATER);
        let v = tick_json(&mut c, 10.0);

        let sda = &v["disks"]["sda"];
        assert_eq!(sda["reads"].as_f64(), Some(10.0));
        assert_eq!(sda["rkb"].as_f64(), Some(50.0));
        assert_eq!(sda["busy"].as_f64(), Some(20.0));
        assert_eq!(sda["xfers"].as_f64(), Some(10.0));
        assert_eq!(sda["bsize"].as_f64(), Some(5.0));
        assert_eq!(sda["inflight"], 0);
        assert_eq!(v["disks"]["nvme0n1"]["inflight"], 5);
    }

    #[test]
    fn test_disks_exclude_partitions_and_ram() {
        let fs = MockFs::typical_system();
        let mut c = collector(fs);
        c.seed().unwrap();
        let v = tick_json(&mut c, 1.0);

        let disks = v["disks"].as_object().unwrap();
        assert!(disks.contains_key("sda"));
        assert!(disks.contains_key("nvme0n1"));
        assert!(!disks.contains_key("sda1"));
        assert!(!disks.contains_key("ram0"));
    }

    #[test]
    fn test_first_tick_without_seed_has_no_rates() {
        let fs = MockFs::typical_system();
        let mut c = collector(fs);
        let v = tick_json(&mut c, 1.0);

        assert!(v["cpu_total"].as_object().unwrap().is_empty());
        assert!(v["disks"].as_object().unwrap().is_empty());
        assert!(v["stat_counters"].get("ctxt").is_none());
        assert_eq!(v["stat_counters"]["btime"], 1700000000);
    }

    #[test]
    fn test_cpu_percentages() {
        let mut fs = MockFs::typical_system();
        let mut c = collector(fs.clone());
        c.seed().unwrap();

        // Each cpu spends 50 user ticks and 50 idle ticks in one second.
        fs.add_file(
            "/proc/stat",
            "\
cpu  10200 500 3000 80200 1000 200 100 0 0 0
cpu0 2550 125 750 20050 250 50 25 0 0 0
cpu1 2550 125 750 20050 250 50 25 0 0 0
cpu2 2550 125 750 20050 250 50 25 0 0 0
cpu3 2550 125 750 20050 250 50 25 0 0 0
ctxt 501000
btime 1700000000
processes 10010
procs_running 3
procs_blocked 1
",
        );
        let v = tick_json(&mut c, 1.0);

        assert_eq!(v["cpu_total"]["user"].as_f64(), Some(50.0));
        assert_eq!(v["cpu_total"]["idle"].as_f64(), Some(50.0));
        assert_eq!(v["cpus"]["cpu2"]["user"].as_f64(), Some(50.0));
        assert_eq!(v["stat_counters"]["ctxt"].as_f64(), Some(1000.0));
        assert_eq!(v["stat_counters"]["processes_forks"].as_f64(), Some(10.0));
        assert_eq!(v["stat_counters"]["procs_running"], 3);
    }

    #[test]
    fn test_meminfo_and_vmstat_copied() {
        let fs = MockFs::typical_system();
        let mut c = collector(fs);
        let v = tick_json(&mut c, 1.0);

        assert_eq!(v["proc_meminfo"]["MemTotal"], 16384000);
        assert_eq!(v["proc_meminfo"]["Active_anon"], 1024000);
        assert_eq!(v["proc_vmstat"]["pgmajfault"], 1234);
    }

    #[test]
    fn test_network_rates() {
        let mut fs = MockFs::typical_system();
        let mut c = collector(fs.clone());
        c.seed().unwrap();

        fs.add_file(
            "/proc/net/dev",
            "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
  eth0: 987664321   654421    5   10    0     0          0       100 123456789   456789    2    5    0     0       0          0
",
        );
        let v = tick_json(&mut c, 2.0);

        assert_eq!(v["networks"]["eth0"]["ibytes"].as_f64(), Some(5000.0));
        assert_eq!(v["networks"]["eth0"]["ipackets"].as_f64(), Some(50.0));
        assert_eq!(v["networks"]["eth0"]["obytes"].as_f64(), Some(0.0));
        assert!(v["networks"].get("lo").is_none());
    }

    #[test]
    fn test_uptime_and_filesystems() {
        let fs = MockFs::typical_system();
        let mut c = collector(fs);
        let v = tick_json(&mut c, 1.0);

        assert_eq!(v["proc_uptime"]["total_seconds"], 93784);
        assert_eq!(v["proc_uptime"]["days"], 1);
        assert_eq!(v["proc_uptime"]["hours"], 2);

        let filesystems = v["filesystems"].as_object().unwrap();
        assert_eq!(filesystems.len(), 1);
        let root = &v["filesystems"]["/dev/sda1"];
        assert_eq!(root["fs_dir"], "/");
        assert_eq!(root["fs_size_mb"], 10240);
        assert_eq!(root["fs_free_mb"], 5120);
        assert_eq!(root["fs_used_mb"], 5120);
        assert_eq!(root["fs_full_percent"].as_f64(), Some(50.0));
        assert_eq!(root["fs_avail"], 4608);
    }

    #[test]
    fn test_missing_required_source_is_fatal() {
        let mut fs = MockFs::typical_system();
        fs.remove("/proc/diskstats");
        let mut c = collector(fs);

        let mut w = SnapshotWriter::new();
        w.open_document();
        let err = c.write_tick(&mut w, 1.0).unwrap_err();
        assert!(matches!(err, AgentError::Source { ref path, .. } if path == "/proc/diskstats"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_missing_uptime_is_skipped() {
        let mut fs = MockFs::typical_system();
        fs.remove("/proc/uptime");
        let mut c = collector(fs);
        let v = tick_json(&mut c, 1.0);
        assert!(v.get("proc_uptime").is_none());
    }
}
