//! In-memory host for testing collectors without a real `/proc`.

use crate::collector::traits::{FileSystem, FsUsage};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// In-memory filesystem for testing.
///
/// Clones share the same tree, so a test can keep a handle and rewrite
/// counter files between ticks while an agent owns another clone.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    inner: Arc<RwLock<Tree>>,
}

#[derive(Debug, Default)]
struct Tree {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
    usage: HashMap<PathBuf, FsUsage>,
    commands: HashMap<PathBuf, String>,
}

impl Tree {
    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn tree(&self) -> std::sync::RwLockReadGuard<'_, Tree> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn tree_mut(&self) -> std::sync::RwLockWriteGuard<'_, Tree> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or replaces a file. Parent directories are created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.tree_mut();
        tree.add_parents(&path);
        tree.files.insert(path, content.into());
    }

    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut tree = self.tree_mut();
        tree.add_parents(&path);
        tree.directories.insert(path);
    }

    /// Removes a file or a whole directory subtree.
    pub fn remove(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.tree_mut();
        tree.files.retain(|p, _| !p.starts_with(path));
        tree.directories.retain(|p| !p.starts_with(path));
    }

    /// Adds a process with its `/proc/[pid]/` files. An empty `io` leaves
    /// the io file out, as for processes of other users.
    pub fn add_process(&mut self, pid: u32, stat: &str, statm: &str, status: &str, io: &str) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("statm"), statm);
        self.add_file(base.join("status"), status);
        if !io.is_empty() {
            self.add_file(base.join("io"), io);
        }
    }

    /// Sets the `statvfs` answer for a mount point.
    pub fn set_fs_usage(&mut self, mount: impl AsRef<Path>, usage: FsUsage) {
        self.tree_mut()
            .usage
            .insert(mount.as_ref().to_path_buf(), usage);
    }

    /// Sets the output of an external program.
    pub fn set_command_output(&mut self, program: impl AsRef<Path>, output: impl Into<String>) {
        self.tree_mut()
            .commands
            .insert(program.as_ref().to_path_buf(), output.into());
    }
}

fn not_found(what: &str, path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found: {:?}", what, path),
    )
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.tree()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found("file", path))
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = self.tree();
        tree.files.contains_key(path) || tree.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let tree = self.tree();
        if !tree.directories.contains(path) {
            return Err(not_found("directory", path));
        }

        let mut entries = HashSet::new();
        for file_path in tree.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }
        for dir_path in &tree.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        Ok(entries.into_iter().collect())
    }

    fn fs_usage(&self, path: &Path) -> io::Result<FsUsage> {
        self.tree()
            .usage
            .get(path)
            .copied()
            .ok_or_else(|| not_found("mount", path))
    }

    fn run_command(&self, program: &Path) -> io::Result<String> {
        self.tree()
            .commands
            .get(program)
            .cloned()
            .ok_or_else(|| not_found("program", program))
    }

    fn run_with_input(&self, program: &Path, _args: &[&str], _input: &str) -> io::Result<String> {
        self.run_command(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fs_add_file() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/meminfo", "MemTotal: 16384 kB\n");

        assert!(fs.exists(Path::new("/proc/meminfo")));
        assert!(fs.exists(Path::new("/proc")));

        let content = fs.read_to_string(Path::new("/proc/meminfo")).unwrap();
        assert_eq!(content, "MemTotal: 16384 kB\n");
    }

    #[test]
    fn test_mock_fs_read_dir() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/1/stat", "stat content");
        fs.add_file("/proc/1/statm", "statm content");
        fs.add_file("/proc/2/stat", "stat content 2");

        let proc_entries = fs.read_dir(Path::new("/proc")).unwrap();
        assert_eq!(proc_entries.len(), 2);

        let proc1_entries = fs.read_dir(Path::new("/proc/1")).unwrap();
        assert_eq!(proc1_entries.len(), 2);
    }

    #[test]
    fn test_mock_fs_clones_share_tree() {
        let mut fs = MockFs::new();
        let observer = fs.clone();
        fs.add_file("/proc/stat", "ctxt 1\n");
        assert!(observer.exists(Path::new("/proc/stat")));

        fs.remove("/proc/stat");
        assert!(!observer.exists(Path::new("/proc/stat")));
    }

    #[test]
    fn test_mock_fs_remove_subtree() {
        let mut fs = MockFs::new();
        fs.add_process(42, "stat", "statm", "status", "");
        fs.remove("/proc/42");

        assert!(!fs.exists(Path::new("/proc/42")));
        assert!(!fs.exists(Path::new("/proc/42/stat")));
        assert!(fs.exists(Path::new("/proc")));
    }

    #[test]
    fn test_mock_fs_usage_and_commands() {
        let mut fs = MockFs::new();
        fs.set_fs_usage(
            "/",
            FsUsage {
                block_size: 4096,
                ..FsUsage::default()
            },
        );
        fs.set_command_output("/usr/bin/lscpu", "Architecture: x86_64\n");

        assert_eq!(fs.fs_usage(Path::new("/")).unwrap().block_size, 4096);
        assert!(fs.fs_usage(Path::new("/home")).is_err());
        assert!(fs.run_command(Path::new("/usr/bin/lscpu")).is_ok());
    }

    #[test]
    fn test_mock_fs_not_found() {
        let fs = MockFs::new();
        let result = fs.read_to_string(Path::new("/nonexistent"));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
