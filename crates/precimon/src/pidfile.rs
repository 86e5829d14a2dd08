//! Single-instance guard through a pid file.

use std::fs;
use std::io;
use std::path::Path;

pub const PID_FILE: &str = "/tmp/precimon.pid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidCheck {
    /// Another agent with this pid is alive.
    Running(i32),
    /// The file now holds our pid.
    Claimed,
}

/// Refuses to start while the pid in `path` is alive, otherwise writes
/// `own_pid` into it. A missing, stale or unparsable file is overwritten.
pub fn check_and_claim(
    path: &Path,
    own_pid: u32,
    alive: impl Fn(i32) -> bool,
) -> io::Result<PidCheck> {
    match fs::read_to_string(path) {
        Ok(content) => {
            if let Ok(pid) = content.trim().parse::<i32>()
                && pid != own_pid as i32
                && alive(pid)
            {
                return Ok(PidCheck::Running(pid));
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    fs::write(path, format!("{}\n", own_pid))?;
    Ok(PidCheck::Claimed)
}
