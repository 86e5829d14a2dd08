//! Pre-built mock hosts for testing.

use super::filesystem::MockFs;
use crate::collector::procfs::gpfs::MMKSH_PATH;
use crate::collector::traits::FsUsage;

/// Builds a `/proc/[pid]/stat` line with the given name, state and CPU
/// times. Every other field carries a fixed plausible value.
pub fn proc_stat_line(pid: u32, comm: &str, state: char, utime: u64, stime: u64) -> String {
    format!(
        "{pid} ({comm}) {state} 1 {pid} {pid} 0 -1 4194560 1500 0 12 0 {utime} {stime} 0 0 20 0 1 0 100 12345678 250 18446744073709551615 {tail}",
        tail = "0 0 0 0 0 0 0 0 0 0 0 0 17 1 0 0 3 0 0",
    )
}

fn status_for(comm: &str, uid: u32) -> String {
    format!(
        "Name:\t{comm}\nState:\tS (sleeping)\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\nGid:\t{uid}\t{uid}\t{uid}\t{uid}\n"
    )
}

const STATM: &str = "3000 250 100 50 0 400 0\n";

const IO: &str = "\
rchar: 100000
wchar: 50000
syscr: 100
syscw: 50
read_bytes: 4096
write_bytes: 2048
cancelled_write_bytes: 0
";

impl MockFs {
    /// Adds a sampled process owned by `uid` with the given CPU times.
    pub fn add_simple_process(&mut self, pid: u32, comm: &str, uid: u32, utime: u64, stime: u64) {
        self.add_process(
            pid,
            &proc_stat_line(pid, comm, 'S', utime, stime),
            STATM,
            &status_for(comm, uid),
            IO,
        );
    }

    /// Rewrites the CPU times of an existing process.
    pub fn set_process_times(&mut self, pid: u32, comm: &str, utime: u64, stime: u64) {
        self.add_file(
            format!("/proc/{}/stat", pid),
            proc_stat_line(pid, comm, 'S', utime, stime),
        );
    }

    /// A four-cpu x86 host with two disks, two interfaces, one mounted
    /// filesystem and three processes.
    pub fn typical_system() -> Self {
        let mut fs = Self::new();

        fs.add_file(
            "/etc/passwd",
            "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin
user:x:1000:1000:User:/home/user:/bin/bash
",
        );

        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
cpu2 2500 125 750 20000 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
softirq 1000 0 100 0 0 0 0 0 0 0 900
",
        );

        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
Active:          4096000 kB
Inactive:        2048000 kB
Active(anon):    1024000 kB
Inactive(anon):   512000 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
HugePages_Total:       0
",
        );

        fs.add_file(
            "/proc/vmstat",
            "\
nr_free_pages 2048000
pgpgin 123456
pgpgout 654321
pswpin 100
pswpout 200
pgfault 999999
pgmajfault 1234
",
        );

        fs.add_file(
            "/proc/diskstats",
            "\
   1       0 ram0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000 0 0 0 0
   8       1 sda1 10000 80 800000 4000 5000 40 400000 2500 0 3500 6500 0 0 0 0
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000 0 0 0 0
",
        );
        fs.add_dir("/sys/block/ram0");
        fs.add_dir("/sys/block/sda");
        fs.add_dir("/sys/block/nvme0n1");

        fs.add_file(
            "/proc/net/dev",
            "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 12345678     9876    0    0    0     0          0         0 12345678     9876    0    0    0     0       0          0
  eth0: 987654321   654321    5   10    0     0          0       100 123456789   456789    2    5    0     0       0          0
",
        );

        fs.add_file("/proc/uptime", "93784.67 98765.43\n");

        fs.add_file(
            "/etc/mtab",
            "\
/dev/sda1 / ext4 rw,relatime 0 1
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
tmpfs /run tmpfs rw,nosuid,nodev 0 0
/dev/sdb1 /mnt/archive autofs rw 0 0
",
        );
        fs.set_fs_usage(
            "/",
            FsUsage {
                block_size: 4096,
                blocks: 2_621_440,
                blocks_free: 1_310_720,
                blocks_avail: 1_179_648,
                files: 655_360,
                files_free: 600_000,
                name_max: 255,
            },
        );

        fs.add_file(
            "/etc/os-release",
            "\
NAME=\"Ubuntu\"
VERSION=\"22.04.3 LTS (Jammy Jellyfish)\"
ID=ubuntu
PRETTY_NAME=\"Ubuntu 22.04.3 LTS\"
VERSION_ID=\"22.04\"
",
        );
        fs.add_file(
            "/proc/version",
            "Linux version 6.5.0-21-generic (buildd@lcy02) (gcc (Ubuntu 12.3.0) 12.3.0) #21-Ubuntu SMP\n",
        );
        fs.add_file(
            "/proc/cpuinfo",
            "\
processor\t: 0
vendor_id\t: GenuineIntel
cpu family\t: 6
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
cpu MHz\t\t: 2400.000
cache size\t: 35840 KB
physical id\t: 0
siblings\t: 4
core id\t\t: 0
cpu cores\t: 4

processor\t: 1
vendor_id\t: GenuineIntel
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
cpu MHz\t\t: 2400.000
cache size\t: 35840 KB
physical id\t: 0
siblings\t: 4
core id\t\t: 1
cpu cores\t: 4
",
        );
        fs.set_command_output(
            "/usr/bin/lscpu",
            "\
Architecture:                    x86_64
Byte Order:                      Little Endian
CPU(s):                          4
On-line CPU(s) list:             0-3
Model name:                      Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
Thread(s) per core:              1
Core(s) per socket:              4
Socket(s):                       1
NUMA node(s):                    1
",
        );
        fs.add_file("/sys/devices/virtual/dmi/id/product_name", "PowerEdge R730\n");
        fs.add_file("/sys/devices/virtual/dmi/id/product_serial", "ABC1234\n");
        fs.add_file("/sys/devices/virtual/dmi/id/sys_vendor", "Dell Inc.\n");

        fs.add_simple_process(1, "systemd", 0, 500, 300);
        fs.add_simple_process(1000, "bash", 1000, 100, 50);
        fs.add_simple_process(1001, "postgres", 1000, 20000, 5000);

        fs
    }

    /// A POWER LPAR: `typical_system` plus lparcfg, a timebase in cpuinfo
    /// and purr/spurr counters.
    pub fn power_system() -> Self {
        let mut fs = Self::typical_system();

        fs.add_file(
            "/proc/cpuinfo",
            "\
processor\t: 0
cpu\t\t: POWER9 (architected), altivec supported
clock\t\t: 2750.000000MHz
revision\t: 2.2 (pvr 004e 0202)

processor\t: 1
cpu\t\t: POWER9 (architected), altivec supported
clock\t\t: 2750.000000MHz
revision\t: 2.2 (pvr 004e 0202)

timebase\t: 512000000
platform\t: pSeries
model\t\t: IBM,9009-42A
machine\t\t: CHRP IBM,9009-42A
MMU\t\t: Radix
",
        );
        fs.add_file(
            "/proc/ppc64/lparcfg",
            "\
lparcfg 1.9

serial_number=IBM,0278A12BX
system_type=IBM,9009-42A
partition_id=4
partition_entitled_capacity=200
shared_processor_mode=1
pool_idle_time=1024000000
purr=2048000000
backing_memory=8589934592 bytes
",
        );
        fs.add_file("/sys/devices/system/cpu/cpu0/purr", "0x3d090000\n");
        fs.add_file("/sys/devices/system/cpu/cpu0/spurr", "0x3d090000\n");
        fs.add_file("/sys/devices/system/cpu/cpu1/purr", "0x3d090000\n");
        fs.add_file("/sys/devices/system/cpu/cpu1/spurr", "0x3d090000\n");

        fs
    }

    /// Replaces the `mmpmon` reply with one `io_s` and one `fs_io_s` record
    /// carrying the given byte counters.
    pub fn set_gpfs_counters(&mut self, read_bytes: u64, write_bytes: u64) {
        self.set_command_output(
            MMKSH_PATH,
            format!(
                "_io_s_ _n_ 192.168.50.20 _nn_ ems1-hs _rc_ 0 _t_ 1548346611 _tu_ 65624 \
                 _br_ {read_bytes} _bw_ {write_bytes} _oc_ 1 _cc_ 1 _rdc_ 0 _wc_ 0 _dir_ 1 _iu_ 0\n\
                 _fs_io_s_ _n_ 192.168.50.20 _nn_ ems1-hs _rc_ 0 _t_ 1548519197 _tu_ 560916 \
                 _cl_ SBANK_ESS.gpfs.net _fs_ cesroot _d_ 4 _br_ {read_bytes} _bw_ {write_bytes} \
                 _oc_ 63 _cc_ 58 _rdc_ 35 _wc_ 34 _dir_ 2 _iu_ 14\n"
            ),
        );
    }

    /// A GPFS node: `typical_system` plus mmksh and an `mmpmon` reply.
    pub fn gpfs_system() -> Self {
        let mut fs = Self::typical_system();
        fs.add_file(MMKSH_PATH, "");
        fs.set_gpfs_counters(1000, 500);
        fs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::FileSystem;
    use crate::collector::procfs::parser::parse_proc_stat;
    use std::path::Path;

    #[test]
    fn test_stat_line_parses() {
        let stat = parse_proc_stat(&proc_stat_line(1001, "post gres", 'R', 1200, 300)).unwrap();
        assert_eq!(stat.pid, 1001);
        assert_eq!(stat.comm, "post gres");
        assert_eq!(stat.state, 'R');
        assert_eq!(stat.utime, 1200);
        assert_eq!(stat.stime, 300);
        assert_eq!(stat.delayacct_blkio_ticks, 3);
        assert_eq!(stat.processor, 1);
    }

    #[test]
    fn test_typical_system_has_processes() {
        let fs = MockFs::typical_system();
        assert!(fs.exists(Path::new("/proc/1/statm")));
        assert!(fs.exists(Path::new("/proc/1001/io")));
        assert!(fs.exists(Path::new("/sys/block/sda")));
    }
}
