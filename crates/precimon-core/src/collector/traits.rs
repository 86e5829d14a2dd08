//! Abstractions over the host so collectors can run against synthetic data.
//!
//! The `FileSystem` trait lets every collector read either the real `/proc`,
//! `/sys` and `/etc` trees or an in-memory [`MockFs`](super::MockFs).

use std::io;
use std::path::{Path, PathBuf};

/// Space and inode usage of a mounted filesystem, as reported by `statvfs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsUsage {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_avail: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_max: u64,
}

/// Host access used by the collectors.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory as full paths.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Queries usage of the filesystem mounted at `path`.
    fn fs_usage(&self, path: &Path) -> io::Result<FsUsage>;

    /// Runs `program` without arguments and returns its standard output.
    fn run_command(&self, program: &Path) -> io::Result<String>;

    /// Runs `program` with `args`, writes `input` to its standard input and
    /// returns its standard output.
    fn run_with_input(&self, program: &Path, args: &[&str], input: &str) -> io::Result<String>;
}

/// Real host implementation backed by `std::fs` and libc.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    #[allow(clippy::unnecessary_cast)]
    fn fs_usage(&self, path: &Path) -> io::Result<FsUsage> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: statvfs is plain old data; the zeroed value is overwritten.
        let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: c_path is NUL-terminated and vfs is a valid out pointer.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut vfs) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(FsUsage {
            block_size: vfs.f_bsize as u64,
            blocks: vfs.f_blocks as u64,
            blocks_free: vfs.f_bfree as u64,
            blocks_avail: vfs.f_bavail as u64,
            files: vfs.f_files as u64,
            files_free: vfs.f_ffree as u64,
            name_max: vfs.f_namemax as u64,
        })
    }

    fn run_command(&self, program: &Path) -> io::Result<String> {
        let output = std::process::Command::new(program).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{} exited with {}",
                program.display(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_with_input(&self, program: &Path, args: &[&str], input: &str) -> io::Result<String> {
        use std::io::Write;
        use std::process::{Command, Stdio};

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{} exited with {}",
                program.display(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
