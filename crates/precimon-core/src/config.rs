//! Agent run settings.

use crate::error::AgentError;
use crate::writer::SnapshotWriter;
use std::time::Duration;

/// Default sampling period in seconds.
pub const DEFAULT_SECONDS: u64 = 60;

/// Default process threshold: fraction of one core.
pub const DEFAULT_THRESHOLD: f64 = 0.01;

/// Remote collector endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub secret: String,
}

/// Settings of one agent run, built by the CLI.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Nominal period between ticks.
    pub seconds: u64,
    /// Stop after this many ticks; `None` runs until interrupted.
    pub max_loops: Option<u64>,
    /// Sample and rank the process table.
    pub process_mode: bool,
    /// Minimum fraction of one core a process must use to be reported.
    pub threshold: f64,
    /// Emit the `config` section in the preamble.
    pub emit_config: bool,
    /// Emit `precimon_stats` after the snapshots array.
    pub emit_stats: bool,
    /// Debug output requested on the command line.
    pub debugging: bool,
    pub remote: Option<RemoteTarget>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            seconds: DEFAULT_SECONDS,
            max_loops: None,
            process_mode: false,
            threshold: DEFAULT_THRESHOLD,
            emit_config: false,
            emit_stats: false,
            debugging: false,
            remote: None,
        }
    }
}

impl AgentConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.seconds)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.seconds == 0 {
            return Err(AgentError::Config("seconds must be at least 1".into()));
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(AgentError::Config(format!(
                "threshold must be a non-negative number, got {}",
                self.threshold
            )));
        }
        if let Some(remote) = &self.remote {
            if remote.host.is_empty() {
                return Err(AgentError::Config("remote host is empty".into()));
            }
            if remote.secret.is_empty() || remote.secret.contains(char::is_whitespace) {
                return Err(AgentError::Config(
                    "remote secret must be a single non-empty word".into(),
                ));
            }
        }
        Ok(())
    }

    /// Writes the `config` section. The remote secret is never written.
    pub fn write_section(&self, w: &mut SnapshotWriter) -> Result<(), AgentError> {
        w.open_section("config");
        w.string("debugging", yes_no(self.debugging));
        match self.max_loops {
            Some(n) => w.unsigned("maxloops", n),
            None => w.string("maxloops", "infinite"),
        }
        w.unsigned("seconds", self.seconds);
        w.string("process_mode", yes_no(self.process_mode));
        w.double("threshold", self.threshold);
        match &self.remote {
            Some(remote) => {
                w.open_subsection("remote_mode");
                w.string("host", &remote.host);
                w.unsigned("port", u64::from(remote.port));
                w.string("secret_set", yes_no(!remote.secret.is_empty()));
                w.close_subsection()?;
            }
            None => w.string("remote_mode", "no"),
        }
        w.close_section()?;
        Ok(())
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.seconds, 60);
        assert_eq!(config.threshold, 0.01);
        assert!(config.max_loops.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        let config = AgentConfig {
            seconds: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_negative_threshold() {
        let config = AgentConfig {
            threshold: -0.5,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_secret() {
        let config = AgentConfig {
            remote: Some(RemoteTarget {
                host: "collector.example".into(),
                port: 8181,
                secret: "two words".into(),
            }),
            ..AgentConfig::default()
        };
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_config_section_omits_secret() {
        let config = AgentConfig {
            max_loops: Some(5),
            remote: Some(RemoteTarget {
                host: "collector.example".into(),
                port: 8181,
                secret: "hunter2".into(),
            }),
            ..AgentConfig::default()
        };
        let mut w = SnapshotWriter::new();
        w.open_document();
        config.write_section(&mut w).unwrap();
        w.close_document().unwrap();

        assert!(!w.as_str().contains("hunter2"));
        let v: serde_json::Value = serde_json::from_slice(w.as_bytes()).unwrap();
        assert_eq!(v["config"]["maxloops"], 5);
        assert_eq!(v["config"]["remote_mode"]["port"], 8181);
        assert_eq!(v["config"]["remote_mode"]["secret_set"], "yes");
    }

    #[test]
    fn test_config_section_infinite_loops() {
        let mut w = SnapshotWriter::new();
        w.open_document();
        AgentConfig::default().write_section(&mut w).unwrap();
        w.close_document().unwrap();

        let v: serde_json::Value = serde_json::from_slice(w.as_bytes()).unwrap();
        assert_eq!(v["config"]["maxloops"], "infinite");
        assert_eq!(v["config"]["remote_mode"], "no");
    }
}
