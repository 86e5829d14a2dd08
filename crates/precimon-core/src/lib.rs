//! precimon-core - sampling engine of the precimon agent.
//!
//! Provides:
//! - `writer` - incremental JSON document writer with nesting checks
//! - `delta` - previous/current counter cache producing wrap-safe rates
//! - `collector` - `/proc`, `/sys` and `/etc` readers, process sampler
//! - `agent` - per-run context tying collectors to the writer
//! - `scheduler` - fixed-cadence tick loop with drift compensation
//! - `sink` - destinations for completed buffers (stdout, file, TCP)
//! - `handshake`, `mask` - remote hello line shared with the collector daemon
//! - `platform` - clock tick, page size and host identity queries

pub mod agent;
pub mod collector;
pub mod config;
pub mod delta;
pub mod error;
pub mod handshake;
pub mod mask;
pub mod platform;
pub mod scheduler;
pub mod sink;
pub mod writer;

pub use agent::{Agent, TickInfo};
pub use collector::procfs::identity::Identity;
pub use config::{AgentConfig, RemoteTarget};
pub use error::AgentError;
pub use scheduler::{Pacer, RunSummary, Scheduler, SystemPacer};
pub use sink::Sink;
pub use writer::SnapshotWriter;

/// Version string written into the identity section.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
