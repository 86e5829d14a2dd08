//! Parsers for `/proc`, `/sys` and `/etc` files.
//!
//! These are pure functions over file content, testable with string inputs.

use std::collections::HashMap;

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

// ============ Per-process files ============

/// Parsed data from `/proc/[pid]/stat`.
#[derive(Debug, Clone, Default)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub pgrp: i32,
    pub session: i32,
    pub tty_nr: i32,
    pub flags: u32,
    pub minflt: u64,
    pub majflt: u64,
    pub utime: u64,
    pub stime: u64,
    pub priority: i64,
    pub nice: i64,
    pub num_threads: i64,
    pub itrealvalue: i64,
    pub starttime: u64,
    pub vsize: u64,
    pub rss: i64,
    pub rsslim: u64,
    pub nswap: u64,
    pub cnswap: u64,
    pub processor: i32,
    pub rt_priority: u32,
    pub policy: u32,
    pub delayacct_blkio_ticks: u64,
}

/// Parses `/proc/[pid]/stat` content.
///
/// The comm field can contain spaces and parentheses, so it spans from the
/// first `(` to the last `)`.
/// Format: pid (comm) state ppid pgrp session tty_nr ...
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;

    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;

    let comm = content[open_paren + 1..close_paren].to_string();

    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    if fields.len() < 42 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 42+, got {}",
            fields.len()
        )));
    }

    let signed = |idx: usize, name: &str| -> Result<i64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };
    let unsigned = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };
    let optional = |idx: usize| -> u64 { fields[idx].parse().unwrap_or(0) };

    Ok(ProcStat {
        pid,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: signed(1, "ppid")? as u32,
        pgrp: signed(2, "pgrp")? as i32,
        session: signed(3, "session")? as i32,
        tty_nr: signed(4, "tty_nr")? as i32,
        flags: unsigned(6, "flags")? as u32,
        minflt: unsigned(7, "minflt")?,
        majflt: unsigned(9, "majflt")?,
        utime: unsigned(11, "utime")?,
        stime: unsigned(12, "stime")?,
        priority: signed(15, "priority")?,
        nice: signed(16, "nice")?,
        num_threads: signed(17, "num_threads")?,
        itrealvalue: signed(18, "itrealvalue")?,
        starttime: unsigned(19, "starttime")?,
        vsize: unsigned(20, "vsize")?,
        rss: signed(21, "rss")?,
        rsslim: unsigned(22, "rsslim")?,
        nswap: optional(33),
        cnswap: optional(34),
        processor: fields[36].parse().unwrap_or(0),
        rt_priority: optional(37) as u32,
        policy: optional(38) as u32,
        delayacct_blkio_ticks: optional(39),
    })
}

/// Page counts from `/proc/[pid]/statm`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcStatm {
    pub size: u64,
    pub resident: u64,
    pub shared: u64,
    pub text: u64,
    pub data: u64,
}

/// Parses `/proc/[pid]/statm`: size resident shared text lib data dt.
pub fn parse_proc_statm(content: &str) -> Result<ProcStatm, ParseError> {
    let values: Vec<u64> = content
        .split_whitespace()
        .map(|s| s.parse().map_err(|_| ParseError::new("invalid statm value")))
        .collect::<Result<_, _>>()?;
    if values.len() < 6 {
        return Err(ParseError::new(format!(
            "not enough fields in statm: expected 6+, got {}",
            values.len()
        )));
    }
    Ok(ProcStatm {
        size: values[0],
        resident: values[1],
        shared: values[2],
        text: values[3],
        data: values[5],
    })
}

/// Real uid from `/proc/[pid]/status`.
pub fn parse_status_uid(content: &str) -> Result<u32, ParseError> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or_else(|| ParseError::new("missing Uid in status"))?
        .parse()
        .map_err(|_| ParseError::new("invalid Uid in status"))
}

/// Parsed data from `/proc/[pid]/io`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcIo {
    pub rchar: u64,
    pub wchar: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Parses `/proc/[pid]/io` content: `key: value` pairs, one per line.
pub fn parse_proc_io(content: &str) -> ProcIo {
    let mut io = ProcIo::default();

    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let value: u64 = value.trim().parse().unwrap_or(0);
            match key.trim() {
                "rchar" => io.rchar = value,
                "wchar" => io.wchar = value,
                "read_bytes" => io.read_bytes = value,
                "write_bytes" => io.write_bytes = value,
                _ => {}
            }
        }
    }

    io
}

// ============ /proc/stat ============

/// One cpu line of `/proc/stat`, in ticks.
#[derive(Debug, Clone, Default)]
pub struct CpuStat {
    /// `None` for the aggregate "cpu" line.
    pub cpu_id: Option<u32>,
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

impl CpuStat {
    /// Field names as written to the document, paired with their values.
    pub fn fields(&self) -> [(&'static str, u64); 10] {
        [
            ("user", self.user),
            ("nice", self.nice),
            ("sys", self.system),
            ("idle", self.idle),
            ("iowait", self.iowait),
            ("hardirq", self.irq),
            ("softirq", self.softirq),
            ("steal", self.steal),
            ("guest", self.guest),
            ("guestnice", self.guest_nice),
        ]
    }
}

/// Global stats from `/proc/stat`.
#[derive(Debug, Clone, Default)]
pub struct GlobalStat {
    pub total: CpuStat,
    pub cpus: Vec<CpuStat>,
    pub ctxt: u64,
    pub btime: u64,
    pub processes: u64,
    pub procs_running: u64,
    pub procs_blocked: u64,
}

/// Parses `/proc/stat` content.
pub fn parse_global_stat(content: &str) -> Result<GlobalStat, ParseError> {
    let mut stat = GlobalStat::default();
    let mut saw_total = false;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        let value = |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        if let Some(id) = parts[0].strip_prefix("cpu") {
            let cpu_id = if id.is_empty() {
                None
            } else {
                match id.parse() {
                    Ok(n) => Some(n),
                    Err(_) => continue,
                }
            };
            let cpu = CpuStat {
                cpu_id,
                user: value(1),
                nice: value(2),
                system: value(3),
                idle: value(4),
                iowait: value(5),
                irq: value(6),
                softirq: value(7),
                steal: value(8),
                guest: value(9),
                guest_nice: value(10),
            };
            if cpu_id.is_none() {
                stat.total = cpu;
                saw_total = true;
            } else {
                stat.cpus.push(cpu);
            }
        } else {
            match parts[0] {
                "ctxt" => stat.ctxt = value(1),
                "btime" => stat.btime = value(1),
                "processes" => stat.processes = value(1),
                "procs_running" => stat.procs_running = value(1),
                "procs_blocked" => stat.procs_blocked = value(1),
                _ => {}
            }
        }
    }

    if !saw_total {
        return Err(ParseError::new("missing aggregate cpu line in stat"));
    }
    Ok(stat)
}

// ============ name/value files ============

/// Parses files with one `name value [unit]` or `name: value [unit]` pair
/// per line (`/proc/meminfo`, `/proc/vmstat`).
///
/// Names are made JSON friendly: `(` becomes `_` and `)` is dropped, so
/// `Active(anon)` becomes `Active_anon`. Lines without a numeric value are
/// skipped.
pub fn parse_name_values(content: &str) -> Vec<(String, i64)> {
    let mut values = Vec::new();
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(number)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(number) = number.parse::<i64>() else {
            continue;
        };
        let name: String = name
            .trim_end_matches(':')
            .chars()
            .filter(|&c| c != ')')
            .map(|c| if c == '(' { '_' } else { c })
            .collect();
        values.push((name, number));
    }
    values
}

/// Parses `/proc/uptime` and returns the whole seconds since boot.
pub fn parse_uptime(content: &str) -> Result<u64, ParseError> {
    let first = content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new("empty uptime"))?;
    let seconds: f64 = first
        .parse()
        .map_err(|_| ParseError::new("invalid uptime"))?;
    Ok(seconds as u64)
}

// ============ /etc/passwd ============

/// Parses `/etc/passwd` content and returns a map of UID -> username.
///
/// Format: username:password:uid:gid:gecos:home:shell
pub fn parse_passwd(content: &str) -> HashMap<u32, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() >= 3
            && let Ok(uid) = parts[2].parse::<u32>()
        {
            map.insert(uid, parts[0].to_string());
        }
    }
    map
}

/// UID -> username lookup loaded once from `/etc/passwd`.
#[derive(Debug, Clone, Default)]
pub struct UserResolver {
    uid_to_name: HashMap<u32, String>,
}

impl UserResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from_content(&mut self, content: &str) {
        self.uid_to_name = parse_passwd(content);
    }

    /// Resolves UID to username, returns the UID as a string if unknown.
    pub fn resolve(&self, uid: u32) -> String {
        self.uid_to_name
            .get(&uid)
            .cloned()
            .unwrap_or_else(|| uid.to_string())
    }

    pub fn is_loaded(&self) -> bool {
        !self.uid_to_name.is_empty()
    }
}

// ============ /proc/diskstats ============

/// One line of `/proc/diskstats`.
#[derive(Debug, Clone, Default)]
pub struct DiskStats {
    pub device: String,
    pub reads: u64,
    pub r_merged: u64,
    pub read_sectors: u64,
    pub read_time: u64,
    pub writes: u64,
    pub w_merged: u64,
    pub write_sectors: u64,
    pub write_time: u64,
    pub in_flight: u64,
    pub io_time: u64,
    pub io_weighted_time: u64,
}

/// Parses `/proc/diskstats` content.
///
/// Full lines: major minor name reads r_merged r_sectors r_time writes
/// w_merged w_sectors w_time in_flight io_time w_io_time [discards ...].
/// Old kernels print partitions with only 7 columns:
/// major minor name reads r_sectors writes w_sectors.
pub fn parse_diskstats(content: &str) -> Vec<DiskStats> {
    let mut disks = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let value = |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        if parts.len() >= 14 {
            disks.push(DiskStats {
                device: parts[2].to_string(),
                reads: value(3),
                r_merged: value(4),
                read_sectors: value(5),
                read_time: value(6),
                writes: value(7),
                w_merged: value(8),
                write_sectors: value(9),
                write_time: value(10),
                in_flight: value(11),
                io_time: value(12),
                io_weighted_time: value(13),
            });
        } else if parts.len() == 7 {
            disks.push(DiskStats {
                device: parts[2].to_string(),
                reads: value(3),
                read_sectors: value(4),
                writes: value(5),
                write_sectors: value(6),
                ..DiskStats::default()
            });
        }
    }

    disks
}

// ============ /proc/net/dev ============

/// One interface line of `/proc/net/dev`.
#[derive(Debug, Clone, Default)]
pub struct NetDevStats {
    pub interface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errs: u64,
    pub rx_drop: u64,
    pub rx_fifo: u64,
    pub rx_frame: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errs: u64,
    pub tx_drop: u64,
    pub tx_fifo: u64,
    pub tx_colls: u64,
    pub tx_carrier: u64,
}

/// Parses `/proc/net/dev` content.
///
/// Format:
/// Inter-|   Receive                                                |  Transmit
///  face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
///    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
pub fn parse_net_dev(content: &str) -> Vec<NetDevStats> {
    let mut devices = Vec::new();

    for line in content.lines() {
        if line.contains('|') || line.trim().is_empty() {
            continue;
        }

        let Some((interface, counters)) = line.split_once(':') else {
            continue;
        };
        let values: Vec<&str> = counters.split_whitespace().collect();
        if values.len() < 16 {
            continue;
        }

        let value = |idx: usize| -> u64 { values[idx].parse().unwrap_or(0) };

        devices.push(NetDevStats {
            interface: interface.trim().to_string(),
            rx_bytes: value(0),
            rx_packets: value(1),
            rx_errs: value(2),
            rx_drop: value(3),
            rx_fifo: value(4),
            rx_frame: value(5),
            tx_bytes: value(8),
            tx_packets: value(9),
            tx_errs: value(10),
            tx_drop: value(11),
            tx_fifo: value(12),
            tx_colls: value(13),
            tx_carrier: value(14),
        });
    }

    devices
}

// ============ /etc/mtab ============

/// One line of `/etc/mtab`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub dir: String,
    pub fs_type: String,
    pub options: String,
    pub freq: i64,
    pub passno: i64,
}

/// Decodes the octal escapes `getmntent` uses for blanks (`\040`, `\011`).
fn unescape_mount_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos + 1..pos + 4);
        match escape.and_then(|digits| u8::from_str_radix(digits, 8).ok()) {
            Some(byte) => {
                out.push(byte as char);
                rest = &rest[pos + 4..];
            }
            None => {
                out.push('\\');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parses `/etc/mtab` (same format as `/proc/mounts`).
pub fn parse_mtab(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            Some(MountEntry {
                device: unescape_mount_field(parts[0]),
                dir: unescape_mount_field(parts[1]),
                fs_type: parts[2].to_string(),
                options: parts[3].to_string(),
                freq: parts.get(4).and_then(|s| s.parse().ok()).unwrap_or(0),
                passno: parts.get(5).and_then(|s| s.parse().ok()).unwrap_or(0),
            })
        })
        .collect()
}

// ============ Release and version files ============

/// Distribution identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub name: String,
    pub version: String,
    pub pretty_name: String,
    pub version_id: String,
}

impl Default for OsRelease {
    fn default() -> Self {
        let unknown = || "unknown".to_string();
        Self {
            name: unknown(),
            version: unknown(),
            pretty_name: unknown(),
            version_id: unknown(),
        }
    }
}

fn strip_quotes(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Parses `/etc/os-release` `KEY=value` lines.
pub fn parse_os_release(content: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = strip_quotes(value);
        match key.trim() {
            "NAME" => release.name = value,
            "VERSION" => release.version = value,
            "PRETTY_NAME" => release.pretty_name = value,
            "VERSION_ID" => release.version_id = value,
            _ => {}
        }
    }
    release
}

/// Parses the single line of `/etc/redhat-release`, e.g.
/// `Red Hat Enterprise Linux Server release 7.5 (Maipo)`.
pub fn parse_redhat_release(content: &str) -> OsRelease {
    let line = content.lines().next().unwrap_or("").trim();
    let mut release = OsRelease {
        pretty_name: strip_quotes(line),
        ..OsRelease::default()
    };

    for known in ["Fedora", "CentOS", "Red Hat Enterprise Linux Server", "Red Hat"] {
        if line.starts_with(known) {
            release.name = known.to_string();
            break;
        }
    }

    if let Some((_, rest)) = line.split_once(" release ") {
        let mut parts = rest.splitn(2, ' ');
        if let Some(version_id) = parts.next() {
            release.version_id = version_id.to_string();
            release.version = rest.to_string();
        }
    }
    release
}

// ============ /proc/cpuinfo ============

/// Selected fields of one `processor` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuInfoProcessor {
    pub vendor_id: Option<String>,
    pub model_name: Option<String>,
    pub cpu_mhz: Option<f64>,
    pub cache_size: Option<f64>,
    pub physical_id: Option<i64>,
    pub siblings: Option<i64>,
    pub core_id: Option<i64>,
    pub cpu_cores: Option<i64>,
    /// POWER `clock` line in MHz.
    pub clock_mhz: Option<f64>,
}

/// Machine block that POWER kernels append after the processors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerCpuInfo {
    pub timebase: u64,
    pub platform: Option<String>,
    pub model: Option<String>,
    pub machine: Option<String>,
    pub firmware: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuInfo {
    pub processors: Vec<CpuInfoProcessor>,
    pub power: Option<PowerCpuInfo>,
}

impl CpuInfo {
    /// Nominal clock of a POWER machine, taken from the first processor.
    pub fn nominal_mhz(&self) -> Option<f64> {
        self.processors.iter().find_map(|p| p.clock_mhz)
    }
}

/// Leading number of a value such as `2750.000000MHz` or `35840 KB`.
fn leading_number(value: &str) -> Option<f64> {
    let end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// Parses `/proc/cpuinfo`. Keys are separated from values by tabs and a colon.
pub fn parse_cpuinfo(content: &str) -> CpuInfo {
    let mut info = CpuInfo::default();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key == "processor" {
            info.processors.push(CpuInfoProcessor::default());
            continue;
        }

        if key == "timebase" {
            info.power = Some(PowerCpuInfo {
                timebase: value.parse().unwrap_or(0),
                ..PowerCpuInfo::default()
            });
            continue;
        }

        if let Some(power) = info.power.as_mut() {
            match key {
                "platform" => power.platform = Some(value.to_string()),
                "model" => power.model = Some(value.to_string()),
                "machine" => power.machine = Some(value.to_string()),
                "firmware" => power.firmware = Some(value.to_string()),
                _ => {}
            }
            continue;
        }

        let Some(current) = info.processors.last_mut() else {
            continue;
        };
        match key {
            "vendor_id" => current.vendor_id = Some(value.to_string()),
            "model name" => current.model_name = Some(value.to_string()),
            "cpu MHz" => current.cpu_mhz = leading_number(value),
            "cache size" => current.cache_size = leading_number(value),
            "physical id" => current.physical_id = value.parse().ok(),
            "siblings" => current.siblings = value.parse().ok(),
            "core id" => current.core_id = value.parse().ok(),
            "cpu cores" => current.cpu_cores = value.parse().ok(),
            "clock" => current.clock_mhz = leading_number(value),
            _ => {}
        }
    }

    info
}

// ============ lscpu ============

const LSCPU_FIELDS: &[(&str, &str)] = &[
    ("Architecture", "architecture"),
    ("Byte Order", "byte_order"),
    ("CPU(s)", "cpus"),
    ("On-line CPU(s) list", "online_cpu_list"),
    ("Off-line CPU(s) list", "offline_cpu_list"),
    ("Model", "model"),
    ("Model name", "model_name"),
    ("Thread(s) per core", "threads_per_core"),
    ("Core(s) per socket", "cores_per_socket"),
    ("Socket(s)", "sockets"),
    ("NUMA node(s)", "numa_nodes"),
    ("CPU MHz", "cpu_mhz"),
    ("CPU max MHz", "cpu_max_mhz"),
    ("CPU min MHz", "cpu_min_mhz"),
    ("BogoMIPS", "bogomips"),
    ("Vendor ID", "vendor_id"),
    ("CPU family", "cpu_family"),
    ("Stepping", "stepping"),
];

/// Picks the known fields out of `lscpu` output, in output order.
pub fn parse_lscpu(content: &str) -> Vec<(&'static str, String)> {
    let mut fields = Vec::new();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if let Some((_, name)) = LSCPU_FIELDS.iter().find(|(label, _)| *label == key) {
            fields.push((*name, value.trim().to_string()));
        }
    }
    fields
}

// ============ POWER ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LparValue {
    Number(i64),
    Text(String),
}

/// Parsed `/proc/ppc64/lparcfg`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LparCfg {
    pub version: Option<String>,
    pub entries: Vec<(String, LparValue)>,
}

impl LparCfg {
    pub fn number(&self, key: &str) -> Option<i64> {
        self.entries.iter().find_map(|(k, v)| match v {
            LparValue::Number(n) if k == key => Some(*n),
            _ => None,
        })
    }
}

/// Parses `/proc/ppc64/lparcfg`: a `lparcfg <version>` header followed by
/// `key=value` lines, some with a trailing ` bytes` unit.
pub fn parse_lparcfg(content: &str) -> LparCfg {
    let mut cfg = LparCfg::default();
    for line in content.lines() {
        if let Some(version) = line.strip_prefix("lparcfg ") {
            cfg.version = Some(version.trim().to_string());
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = value.strip_suffix(" bytes").unwrap_or(value);
        let parsed = match value.parse::<i64>() {
            Ok(n) => LparValue::Number(n),
            Err(_) => LparValue::Text(value.to_string()),
        };
        cfg.entries.push((key.trim().to_string(), parsed));
    }
    cfg
}

/// Parses a hexadecimal counter such as `/sys/devices/system/cpu/cpu0/purr`.
pub fn parse_hex_counter(content: &str) -> Result<u64, ParseError> {
    let value = content.trim();
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|_| ParseError::new(format!("invalid hex counter {:?}", value)))
}

// ============ GPFS ============

/// One `mmpmon -p` response line, e.g.
/// `_io_s_ _n_ 192.168.50.20 _nn_ ems1-hs _rc_ 0 _t_ 1548346611 ...`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MmpmonRecord {
    /// Request the line answers, without underscores (`io_s`, `fs_io_s`).
    pub kind: String,
    pub fields: Vec<(String, String)>,
}

impl MmpmonRecord {
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn number(&self, tag: &str) -> Option<i64> {
        self.get(tag)?.parse().ok()
    }
}

/// Parses `mmpmon -p` output: one record per line, a `_kind_` token then
/// `_tag_ value` pairs.
pub fn parse_mmpmon(content: &str) -> Vec<MmpmonRecord> {
    let mut records = Vec::new();
    for line in content.lines() {
        let mut tokens = line.split_whitespace();
        let Some(kind) = tokens.next() else {
            continue;
        };
        let mut record = MmpmonRecord {
            kind: kind.trim_matches('_').to_string(),
            fields: Vec::new(),
        };
        while let (Some(tag), Some(value)) = (tokens.next(), tokens.next()) {
            record
                .fields
                .push((tag.trim_matches('_').to_string(), value.to_string()));
        }
        records.push(record);
    }
    records
}
