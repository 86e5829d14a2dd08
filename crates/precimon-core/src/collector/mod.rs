//! Host metric collectors.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                            Agent                             │
//! │  ┌─────────────────┐ ┌────────────────┐ ┌─────────────────┐  │
//! │  │ ProcessSampler  │ │ SystemCollector│ │ StaticCollector │  │
//! │  │ /proc/[pid]/*   │ │ /proc/stat ... │ │ identity, lscpu │  │
//! │  └────────┬────────┘ └───────┬────────┘ └────────┬────────┘  │
//! │           │     ┌────────────┴──┐                │           │
//! │           │     │ PowerCollector│                │           │
//! │           │     │ GpfsCollector │                │           │
//! │           │     └───────┬───────┘                │           │
//! │           └─────────────┼────────────────────────┘           │
//! │                  ┌──────▼──────┐                             │
//! │                  │  FileSystem │ (trait)                     │
//! │                  └──────┬──────┘                             │
//! └─────────────────────────┼────────────────────────────────────┘
//!                  ┌────────┴────────┐
//!           ┌──────▼──────┐   ┌──────▼──────┐
//!           │   RealFs    │   │   MockFs    │
//!           └─────────────┘   └─────────────┘
//! ```

pub mod mock;
pub mod procfs;
pub mod traits;

pub use mock::MockFs;
pub use procfs::{
    CollectError, GpfsCollector, PowerCollector, ProcessSampler, StaticCollector, SystemCollector,
    UserResolver,
};
pub use traits::{FileSystem, FsUsage, RealFs};

/// Roots of the pseudo filesystems the collectors read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePaths {
    pub proc: String,
    pub sys: String,
    pub etc: String,
}

impl Default for SourcePaths {
    fn default() -> Self {
        Self {
            proc: "/proc".to_string(),
            sys: "/sys".to_string(),
            etc: "/etc".to_string(),
        }
    }
}
