//! Host constants and identity queries backed by libc.

use std::io;

/// Fallback USER_HZ when sysconf fails.
const DEFAULT_CLOCK_TICKS: u64 = 100;
/// Fallback page size when sysconf fails.
const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Kernel constants needed to turn raw counters into seconds and bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// Clock ticks per second used by `/proc/[pid]/stat` and `/proc/stat`.
    pub clock_ticks: u64,
    pub page_size: u64,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            clock_ticks: DEFAULT_CLOCK_TICKS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Platform {
    pub fn new(clock_ticks: u64, page_size: u64) -> Self {
        Self {
            clock_ticks,
            page_size,
        }
    }

    /// Queries the running kernel.
    pub fn detect() -> Self {
        Self {
            clock_ticks: sysconf(libc::_SC_CLK_TCK).unwrap_or(DEFAULT_CLOCK_TICKS),
            page_size: sysconf(libc::_SC_PAGESIZE).unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }
}

fn sysconf(name: libc::c_int) -> Option<u64> {
    // SAFETY: sysconf has no memory side effects.
    let value = unsafe { libc::sysconf(name) };
    (value > 0).then_some(value as u64)
}

/// `CLOCK_MONOTONIC` in nanoseconds.
pub fn monotonic_nanos() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out pointer.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64)
}

/// Host name as returned by `gethostname`.
pub fn hostname() -> io::Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is writable for its full length.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Host name up to the first dot.
pub fn short_hostname(hostname: &str) -> &str {
    hostname.split('.').next().unwrap_or(hostname)
}

pub fn current_uid() -> u32 {
    // SAFETY: getuid cannot fail.
    unsafe { libc::getuid() }
}

/// Returns true when a process with `pid` exists (signal 0 check).
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_returns_positive_values() {
        let platform = Platform::detect();
        assert!(platform.clock_ticks > 0);
        assert!(platform.page_size >= 1024);
    }

    #[test]
    fn test_monotonic_nanos_advances() {
        let a = monotonic_nanos();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = monotonic_nanos();
        assert!(b > a);
    }

    #[test]
    fn test_short_hostname() {
        assert_eq!(short_hostname("db01.example.com"), "db01");
        assert_eq!(short_hostname("db01"), "db01");
    }

    #[test]
    fn test_hostname_not_empty() {
        assert!(!hostname().unwrap().is_empty());
    }

    #[test]
    fn test_process_alive() {
        assert!(process_alive(std::process::id() as i32));
        assert!(!process_alive(0));
        assert!(!process_alive(-1));
    }
}
