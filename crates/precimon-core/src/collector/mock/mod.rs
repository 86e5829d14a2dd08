//! Mock host for tests.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
pub use scenarios::proc_stat_line;
