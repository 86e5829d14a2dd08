//! Sections written once, before the first snapshot.

use crate::AGENT_VERSION;
use crate::collector::SourcePaths;
use crate::collector::procfs::OptionalSource;
use crate::collector::procfs::parser::{
    UserResolver, parse_cpuinfo, parse_lscpu, parse_os_release, parse_redhat_release,
};
use crate::collector::traits::FileSystem;
use crate::error::AgentError;
use crate::platform::short_hostname;
use crate::writer::SnapshotWriter;
use chrono::{DateTime, Local, Utc};
use std::path::Path;
use tracing::{debug, info};

pub const LSCPU_PATH: &str = "/usr/bin/lscpu";

const DEVICE_TREE_FILES: &[&str] = &[
    "compatible",
    "model",
    "part-number",
    "serial-number",
    "system-id",
    "vendor",
];

/// DMI file and the identity field it fills.
const DMI_FILES: &[(&str, &str)] = &[
    ("product_serial", "serial-number"),
    ("product_name", "model"),
    ("sys_vendor", "vendor"),
];

/// Who is running the agent and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub hostname: String,
    /// Command line the agent was started with.
    pub command: String,
    pub uid: u32,
}

pub struct StaticCollector<F: FileSystem> {
    fs: F,
    paths: SourcePaths,
    lscpu: OptionalSource,
}

impl<F: FileSystem> StaticCollector<F> {
    pub fn new(fs: F, paths: SourcePaths) -> Self {
        Self {
            fs,
            paths,
            lscpu: OptionalSource::new(LSCPU_PATH),
        }
    }

    /// Writes the sections describing the machine, in document order.
    pub fn write_host_sections(&mut self, w: &mut SnapshotWriter) -> Result<(), AgentError> {
        self.write_os_release(w)?;
        self.write_proc_version(w)?;
        self.write_lscpu(w)?;
        self.write_cpuinfo(w)
    }

    fn read_trimmed(&self, path: &str) -> Option<String> {
        let content = self.fs.read_to_string(Path::new(path)).ok()?;
        let value = content.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        (!value.is_empty()).then(|| value.replace('\0', ","))
    }

    pub fn write_identity(
        &mut self,
        w: &mut SnapshotWriter,
        identity: &Identity,
        monotonic_nanos: u64,
        now: DateTime<Local>,
    ) -> Result<(), AgentError> {
        w.open_section("identity");
        w.unsigned("system_monotime_nsec", monotonic_nanos);
        w.string("datetime", &now.format("%Y-%m-%dT%H:%M:%S").to_string());
        w.string(
            "UTC",
            &now.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%S").to_string(),
        );
        w.string("hostname", &identity.hostname);
        w.string("shorthostname", short_hostname(&identity.hostname));

        let device_tree = format!("{}/device-tree", self.paths.proc);
        if self.fs.exists(Path::new(&device_tree)) {
            for name in DEVICE_TREE_FILES {
                if let Some(value) = self.read_trimmed(&format!("{}/{}", device_tree, name)) {
                    w.string(name, &value);
                }
            }
        } else {
            for (file, name) in DMI_FILES {
                let path = format!("{}/devices/virtual/dmi/id/{}", self.paths.sys, file);
                match self.read_trimmed(&path) {
                    Some(value) => w.string(name, &value),
                    None => debug!("{} not readable", path),
                }
            }
        }

        w.string("precimon_command", &identity.command);
        w.string("precimon_version", AGENT_VERSION);

        let mut users = UserResolver::new();
        let passwd = format!("{}/passwd", self.paths.etc);
        match self.fs.read_to_string(Path::new(&passwd)) {
            Ok(content) => users.load_from_content(&content),
            Err(e) => debug!("{}: {}", passwd, e),
        }
        w.string("username", &users.resolve(identity.uid));
        w.unsigned("userid", u64::from(identity.uid));
        w.close_section()?;
        Ok(())
    }

    /// `os_release`, falling back to `/etc/redhat-release`, then to
    /// `unknown` values.
    pub fn write_os_release(&mut self, w: &mut SnapshotWriter) -> Result<(), AgentError> {
        let os_release = format!("{}/os-release", self.paths.etc);
        let redhat = format!("{}/redhat-release", self.paths.etc);
        let release = match self.fs.read_to_string(Path::new(&os_release)) {
            Ok(content) => parse_os_release(&content),
            Err(_) => match self.fs.read_to_string(Path::new(&redhat)) {
                Ok(content) => parse_redhat_release(&content),
                Err(e) => {
                    info!("no release file readable: {}", e);
                    Default::default()
                }
            },
        };

        w.open_section("os_release");
        w.string("name", &release.name);
        w.string("version", &release.version);
        w.string("pretty_name", &release.pretty_name);
        w.string("version_id", &release.version_id);
        w.close_section()?;
        Ok(())
    }

    pub fn write_proc_version(&mut self, w: &mut SnapshotWriter) -> Result<(), AgentError> {
        let path = format!("{}/version", self.paths.proc);
        let content = match self.fs.read_to_string(Path::new(&path)) {
            Ok(content) => content,
            Err(e) => {
                info!("{} unavailable, not collected: {}", path, e);
                return Ok(());
            }
        };
        w.open_section("proc_version");
        w.string("version", &content.trim().replace('"', "|"));
        w.close_section()?;
        Ok(())
    }

    pub fn write_lscpu(&mut self, w: &mut SnapshotWriter) -> Result<(), AgentError> {
        let Some(output) = self.lscpu.run(&self.fs) else {
            return Ok(());
        };
        w.open_section("lscpu");
        for (name, value) in parse_lscpu(&output) {
            w.string(name, &value);
        }
        w.close_section()?;
        Ok(())
    }

    /// `cpuinfo` with one `proc<N>` subsection per processor, and
    /// `cpuinfo_power` when the machine block carries a timebase.
    pub fn write_cpuinfo(&mut self, w: &mut SnapshotWriter) -> Result<(), AgentError> {
        let path = format!("{}/cpuinfo", self.paths.proc);
        let info = match self.fs.read_to_string(Path::new(&path)) {
            Ok(content) => parse_cpuinfo(&content),
            Err(e) => {
                info!("{} unavailable, not collected: {}", path, e);
                return Ok(());
            }
        };

        w.open_section("cpuinfo");
        for (index, cpu) in info.processors.iter().enumerate() {
            w.open_subsection(&format!("proc{}", index));
            if let Some(v) = &cpu.vendor_id {
                w.string("vendor_id", v);
            }
            if let Some(v) = cpu.cpu_mhz {
                w.double("cpu_mhz", v);
            }
            if let Some(v) = cpu.cache_size {
                w.double("cache_size", v);
            }
            if let Some(v) = cpu.physical_id {
                w.long("physical_id", v);
            }
            if let Some(v) = cpu.siblings {
                w.long("siblings", v);
            }
            if let Some(v) = cpu.core_id {
                w.long("core_id", v);
            }
            if let Some(v) = cpu.cpu_cores {
                w.long("cpu_cores", v);
            }
            if let Some(v) = &cpu.model_name {
                w.string("model_name", v);
            }
            if let Some(v) = cpu.clock_mhz {
                w.double("mhz_clock", v);
            }
            w.close_subsection()?;
        }
        w.close_section()?;

        if let Some(power) = &info.power {
            w.open_section("cpuinfo_power");
            w.unsigned("timebase", power.timebase);
            for (name, value) in [
                ("platform", &power.platform),
                ("model", &power.model),
                ("machine", &power.machine),
                ("firmware", &power.firmware),
            ] {
                if let Some(value) = value {
                    w.string(name, value);
                }
            }
            w.close_section()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;
    use chrono::TimeZone;

    fn identity() -> Identity {
        Identity {
            hostname: "db01.example.com".to_string(),
            command: "precimon -s 10 -c 6".to_string(),
            uid: 1000,
        }
    }

    fn preamble_json(fs: MockFs) -> serde_json::Value {
        let mut c = StaticCollector::new(fs, SourcePaths::default());
        let now = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let mut w = SnapshotWriter::new();
        w.open_document();
        c.write_identity(&mut w, &identity(), 123_456_789, now).unwrap();
        c.write_host_sections(&mut w).unwrap();
        w.close_document().unwrap();
        serde_json::from_slice(w.as_bytes()).unwrap()
    }

    #[test]
    fn test_identity_section() {
        let v = preamble_json(MockFs::typical_system());
        let id = &v["identity"];
        assert_eq!(id["system_monotime_nsec"], 123_456_789);
        assert_eq!(id["datetime"], "2024-03-05T14:07:09");
        assert_eq!(id["hostname"], "db01.example.com");
        assert_eq!(id["shorthostname"], "db01");
        assert_eq!(id["model"], "PowerEdge R730");
        assert_eq!(id["serial-number"], "ABC1234");
        assert_eq!(id["vendor"], "Dell Inc.");
        assert_eq!(id["precimon_command"], "precimon -s 10 -c 6");
        assert_eq!(id["precimon_version"], AGENT_VERSION);
        assert_eq!(id["username"], "user");
        assert_eq!(id["userid"], 1000);
    }

    #[test]
    fn test_device_tree_preferred_over_dmi() {
        let mut fs = MockFs::typical_system();
        fs.add_dir("/proc/device-tree");
        fs.add_file("/proc/device-tree/model", "IBM,9009-42A\0");
        fs.add_file("/proc/device-tree/compatible", "IBM,9009\0IBM,POWER9\0");

        let v = preamble_json(fs);
        let id = &v["identity"];
        assert_eq!(id["model"], "IBM,9009-42A");
        assert_eq!(id["compatible"], "IBM,9009,IBM,POWER9");
        assert!(id.get("vendor").is_none());
    }

    #[test]
    fn test_release_and_version() {
        let v = preamble_json(MockFs::typical_system());
        assert_eq!(v["os_release"]["name"], "Ubuntu");
        assert_eq!(v["os_release"]["version_id"], "22.04");
        assert!(
            v["proc_version"]["version"]
                .as_str()
                .unwrap()
                .starts_with("Linux version 6.5.0")
        );
    }

    #[test]
    fn test_redhat_release_fallback() {
        let mut fs = MockFs::typical_system();
        fs.remove("/etc/os-release");
        fs.add_file(
            "/etc/redhat-release",
            "Red Hat Enterprise Linux Server release 7.5 (Maipo)\n",
        );

        let v = preamble_json(fs);
        assert_eq!(v["os_release"]["name"], "Red Hat Enterprise Linux Server");
        assert_eq!(v["os_release"]["version_id"], "7.5");
    }

    #[test]
    fn test_missing_release_files_write_unknown() {
        let mut fs = MockFs::typical_system();
        fs.remove("/etc/os-release");
        let v = preamble_json(fs);
        assert_eq!(v["os_release"]["name"], "unknown");
    }

    #[test]
    fn test_lscpu_and_cpuinfo() {
        let v = preamble_json(MockFs::typical_system());
        assert_eq!(v["lscpu"]["architecture"], "x86_64");
        assert_eq!(v["lscpu"]["cpus"], "4");
        assert_eq!(v["lscpu"]["sockets"], "1");

        let cpuinfo = v["cpuinfo"].as_object().unwrap();
        assert_eq!(cpuinfo.len(), 2);
        assert_eq!(v["cpuinfo"]["proc1"]["core_id"], 1);
        assert_eq!(v["cpuinfo"]["proc0"]["cpu_mhz"].as_f64(), Some(2400.0));
        assert_eq!(v["cpuinfo"]["proc0"]["cache_size"].as_f64(), Some(35840.0));
        assert!(v.get("cpuinfo_power").is_none());
    }

    #[test]
    fn test_missing_lscpu_skips_section() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/cpuinfo", "processor\t: 0\nvendor_id\t: GenuineIntel\n");
        let v = preamble_json(fs);
        assert!(v.get("lscpu").is_none());
        assert!(v.get("proc_version").is_none());
        assert_eq!(v["identity"]["username"], "1000");
    }

    #[test]
    fn test_power_cpuinfo() {
        let v = preamble_json(MockFs::power_system());
        assert_eq!(v["cpuinfo"]["proc0"]["mhz_clock"].as_f64(), Some(2750.0));
        assert_eq!(v["cpuinfo_power"]["timebase"], 512000000);
        assert_eq!(v["cpuinfo_power"]["platform"], "pSeries");
        assert_eq!(v["cpuinfo_power"]["model"], "IBM,9009-42A");
        assert!(v["cpuinfo_power"].get("firmware").is_none());
    }
}
