//! Per-run context: configuration, collectors and the document writer.
//!
//! The [`Scheduler`](crate::Scheduler) owns one `Agent` and decides when
//! each piece of the document is produced; the agent decides what goes in
//! it.

use crate::collector::procfs::identity::Identity;
use crate::collector::{
    FileSystem, GpfsCollector, PowerCollector, ProcessSampler, RealFs, SourcePaths,
    StaticCollector, SystemCollector,
};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::platform::Platform;
use crate::writer::SnapshotWriter;
use chrono::{DateTime, Local, Utc};
use tracing::debug;

/// Timing of one tick, supplied by the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct TickInfo {
    /// Zero-based tick number.
    pub snapshot_loop: u64,
    /// Seconds since the previous tick (or since seeding).
    pub elapsed: f64,
    /// Monotonic clock at tick start, nanoseconds.
    pub taken_at: u64,
    pub now: DateTime<Local>,
}

pub struct Agent<F: FileSystem + Clone> {
    config: AgentConfig,
    identity: Identity,
    writer: SnapshotWriter,
    statics: StaticCollector<F>,
    system: SystemCollector<F>,
    power: PowerCollector<F>,
    gpfs: GpfsCollector<F>,
    processes: Option<ProcessSampler<F>>,
}

impl Agent<RealFs> {
    /// Agent reading the running host.
    pub fn for_host(config: AgentConfig, identity: Identity) -> Self {
        Self::new(RealFs, SourcePaths::default(), Platform::detect(), config, identity)
    }
}

impl<F: FileSystem + Clone> Agent<F> {
    pub fn new(
        fs: F,
        paths: SourcePaths,
        platform: Platform,
        config: AgentConfig,
        identity: Identity,
    ) -> Self {
        let processes = config.process_mode.then(|| {
            ProcessSampler::new(
                fs.clone(),
                paths.proc.clone(),
                &format!("{}/passwd", paths.etc),
                platform,
            )
        });

        Self {
            statics: StaticCollector::new(fs.clone(), paths.clone()),
            power: PowerCollector::new(fs.clone(), &paths),
            gpfs: GpfsCollector::new(fs.clone(), identity.uid),
            system: SystemCollector::new(fs, paths, platform),
            processes,
            writer: SnapshotWriter::new(),
            config,
            identity,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Takes the first reading of every counter so the first tick has rates.
    pub fn seed(&mut self) -> Result<(), AgentError> {
        self.system.seed()?;
        self.power.seed()?;
        self.gpfs.seed()?;
        if let Some(processes) = self.processes.as_mut() {
            let count = processes.seed()?;
            debug!("process baseline: {} processes", count);
        }
        Ok(())
    }

    /// Opens the document, writes the static sections and opens the
    /// `snapshots` array.
    pub fn write_preamble(
        &mut self,
        monotonic_nanos: u64,
        now: DateTime<Local>,
    ) -> Result<(), AgentError> {
        let w = &mut self.writer;
        w.open_document();
        self.statics.write_identity(w, &self.identity, monotonic_nanos, now)?;
        if self.config.emit_config {
            self.config.write_section(w)?;
        }
        self.statics.write_host_sections(w)?;
        w.open_array("snapshots");
        Ok(())
    }

    /// Writes one element of the `snapshots` array.
    pub fn write_tick(&mut self, tick: &TickInfo) -> Result<(), AgentError> {
        let w = &mut self.writer;
        w.open_element()?;

        w.open_section("snapshot_info");
        w.string("datetime", &tick.now.format("%Y-%m-%dT%H:%M:%S").to_string());
        w.string(
            "UTC",
            &tick
                .now
                .with_timezone(&Utc)
                .format("%Y-%m-%dT%H:%M:%S")
                .to_string(),
        );
        w.unsigned("snapshot_loop", tick.snapshot_loop);
        w.unsigned("taken_at", tick.taken_at);
        w.double("elapsed_seconds", tick.elapsed);
        w.close_section()?;

        self.system.write_tick(w, tick.elapsed)?;
        self.power.write_tick(w, tick.elapsed)?;
        self.gpfs.write_tick(w, tick.elapsed)?;
        if let Some(processes) = self.processes.as_mut() {
            processes.sample(tick.elapsed, self.config.threshold)?;
            processes.emit(w)?;
        }

        w.close_element()?;
        Ok(())
    }

    /// Closes the array, optionally writes writer statistics, and closes the
    /// document.
    pub fn write_epilogue(&mut self) -> Result<(), AgentError> {
        self.writer.close_array()?;
        if self.config.emit_stats {
            self.writer.write_stats()?;
        }
        self.writer.close_document()?;
        Ok(())
    }

    /// Bytes produced since the last [`clear`](Self::clear).
    pub fn buffer(&self) -> &[u8] {
        self.writer.as_bytes()
    }

    pub fn clear(&mut self) {
        self.writer.clear();
    }

    pub fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use chrono::TimeZone;

    fn identity() -> Identity {
        Identity {
            hostname: "db01.example.com".to_string(),
            command: "precimon -P".to_string(),
            uid: 0,
        }
    }

    fn agent(fs: MockFs, config: AgentConfig) -> Agent<MockFs> {
        Agent::new(fs, SourcePaths::default(), Platform::default(), config, identity())
    }

    fn tick(n: u64, elapsed: f64) -> TickInfo {
        TickInfo {
            snapshot_loop: n,
            elapsed,
            taken_at: 1_000_000 * (n + 1),
            now: Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap(),
        }
    }

    /// Runs the agent for the given ticks, flushing after every piece.
    fn run(
        agent: &mut Agent<MockFs>,
        ticks: &[TickInfo],
        mut between: impl FnMut(u64),
    ) -> serde_json::Value {
        let mut out = Vec::new();
        agent.seed().unwrap();
        agent.write_preamble(42, ticks[0].now).unwrap();
        out.extend_from_slice(agent.buffer());
        agent.clear();
        for t in ticks {
            between(t.snapshot_loop);
            agent.write_tick(t).unwrap();
            out.extend_from_slice(agent.buffer());
            agent.clear();
        }
        agent.write_epilogue().unwrap();
        out.extend_from_slice(agent.buffer());
        serde_json::from_slice(&out).unwrap()
    }

    #[test]
    fn test_document_layout() {
        let fs = MockFs::typical_system();
        let mut agent = agent(fs, AgentConfig::default());
        let v = run(&mut agent, &[tick(0, 1.0), tick(1, 1.0)], |_| {});

        let keys: Vec<&str> = v.as_object().unwrap().keys().map(String::as_str).collect();
        assert!(keys.contains(&"identity"));
        assert!(keys.contains(&"os_release"));
        assert!(!keys.contains(&"config"));
        assert!(!keys.contains(&"precimon_stats"));

        let snapshots = v["snapshots"].as_array().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1]["snapshot_info"]["snapshot_loop"], 1);
        assert_eq!(snapshots[1]["snapshot_info"]["taken_at"], 2_000_000);
        assert_eq!(snapshots[0]["snapshot_info"]["elapsed_seconds"].as_f64(), Some(1.0));
        assert!(snapshots[0].get("cpu_total").is_some());
        assert!(snapshots[0].get("processes").is_none());
    }

    #[test]
    fn test_config_and_stats_sections() {
        let config = AgentConfig {
            emit_config: true,
            emit_stats: true,
            max_loops: Some(1),
            ..AgentConfig::default()
        };
        let mut agent = agent(MockFs::typical_system(), config);
        let v = run(&mut agent, &[tick(0, 1.0)], |_| {});

        assert_eq!(v["config"]["maxloops"], 1);
        assert!(v["precimon_stats"]["section"].as_i64().unwrap() > 10);
    }

    #[test]
    fn test_process_mode_ranks_busy_process() {
        let mut fs = MockFs::typical_system();
        let config = AgentConfig {
            process_mode: true,
            ..AgentConfig::default()
        };
        let mut agent = agent(fs.clone(), config);
        let v = run(&mut agent, &[tick(0, 2.0)], |_| {
            fs.set_process_times(1001, "postgres", 20150, 5050);
        });

        let snapshot = &v["snapshots"][0];
        assert_eq!(snapshot["process_summary"]["total"], 3);
        assert_eq!(snapshot["process_summary"]["ranked"], 1);
        let postgres = &snapshot["processes"]["process_1001"];
        assert_eq!(postgres["cmd"], "postgres");
        assert_eq!(postgres["cpu_percent"].as_f64(), Some(100.0));
        assert_eq!(postgres["username"], "user");
    }

    #[test]
    fn test_gpfs_sections_on_gpfs_node() {
        let mut fs = MockFs::gpfs_system();
        let mut agent = agent(fs.clone(), AgentConfig::default());
        let v = run(&mut agent, &[tick(0, 2.0)], |_| {
            fs.set_gpfs_counters(5000, 500);
        });

        let snapshot = &v["snapshots"][0];
        assert_eq!(snapshot["gpfs_io_total"]["readbytes"].as_f64(), Some(2000.0));
        assert_eq!(snapshot["gpfs_io_total"]["writebytes"].as_f64(), Some(0.0));
        assert!(snapshot["gpfs_filesystems"].get("cesroot").is_some());
    }

    #[test]
    fn test_missing_required_source_is_fatal() {
        let mut fs = MockFs::typical_system();
        let mut agent = agent(fs.clone(), AgentConfig::default());
        agent.seed().unwrap();
        agent.write_preamble(0, tick(0, 1.0).now).unwrap();
        agent.clear();

        fs.remove("/proc/net/dev");
        let err = agent.write_tick(&tick(0, 1.0)).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_SOURCE);
    }
}
