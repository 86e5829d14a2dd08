//! Collectors for the Linux `/proc`, `/sys` and `/etc` files.

pub mod gpfs;
pub mod identity;
pub mod parser;
pub mod power;
pub mod process;
pub mod system;

pub use gpfs::GpfsCollector;
pub use identity::StaticCollector;
pub use parser::UserResolver;
pub use power::PowerCollector;
pub use process::{CollectError, ProcessSampler};
pub use system::SystemCollector;

use crate::collector::traits::FileSystem;
use std::path::Path;
use tracing::info;

/// A source that does not exist on every host (POWER files, `lscpu`, mmpmon).
///
/// The first failed read disables it for the rest of the run.
#[derive(Debug, Clone)]
pub struct OptionalSource {
    path: String,
    disabled: bool,
}

impl OptionalSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            disabled: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn disable(&mut self) {
        self.disabled = true;
    }

    pub fn read<F: FileSystem>(&mut self, fs: &F) -> Option<String> {
        if self.disabled {
            return None;
        }
        match fs.read_to_string(Path::new(&self.path)) {
            Ok(content) => Some(content),
            Err(e) => {
                info!("{} unavailable, not collected: {}", self.path, e);
                self.disabled = true;
                None
            }
        }
    }

    /// Like [`read`](Self::read) but runs the source as a program.
    pub fn run<F: FileSystem>(&mut self, fs: &F) -> Option<String> {
        if self.disabled {
            return None;
        }
        match fs.run_command(Path::new(&self.path)) {
            Ok(output) => Some(output),
            Err(e) => {
                info!("{} unavailable, not collected: {}", self.path, e);
                self.disabled = true;
                None
            }
        }
    }

    /// Runs the source as a program with `args`, writing `input` to its stdin.
    pub fn run_with_input<F: FileSystem>(
        &mut self,
        fs: &F,
        args: &[&str],
        input: &str,
    ) -> Option<String> {
        if self.disabled {
            return None;
        }
        match fs.run_with_input(Path::new(&self.path), args, input) {
            Ok(output) => Some(output),
            Err(e) => {
                info!("{} unavailable, not collected: {}", self.path, e);
                self.disabled = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    #[test]
    fn test_optional_source_disables_after_failure() {
        let mut fs = MockFs::new();
        let mut source = OptionalSource::new("/proc/uptime");
        assert!(source.read(&fs).is_none());
        assert!(source.is_disabled());

        fs.add_file("/proc/uptime", "10.0 20.0\n");
        assert!(source.read(&fs).is_none());
    }

    #[test]
    fn test_optional_source_reads_when_present() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/uptime", "10.0 20.0\n");
        let mut source = OptionalSource::new("/proc/uptime");
        assert_eq!(source.read(&fs).as_deref(), Some("10.0 20.0\n"));
        assert!(!source.is_disabled());
    }
}
