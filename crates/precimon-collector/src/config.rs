//! Collector settings from the command line or a `key=value` file.

use std::path::{Path, PathBuf};

pub const DEFAULT_SECRET: &str = "Oxdeadbeef";
pub const DEFAULT_INJECTOR: &str = "/usr/local/bin/injector.py";

/// Directories the collector refuses to write into.
const FORBIDDEN_DIRECTORIES: &[&str] = &["/", "/etc", "/bin", "/lib", "/tmp", "/usr", "/dev", "/sbin"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingPort,
    Port(i64),
    MissingDirectory,
    ForbiddenDirectory(PathBuf),
    NothingToDo,
    /// Malformed line in the config file.
    Line { line: usize, text: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingPort => write!(f, "mandatory port missing"),
            ConfigError::Port(p) => write!(f, "invalid port number {} (try 1-60000)", p),
            ConfigError::MissingDirectory => write!(f, "mandatory directory missing"),
            ConfigError::ForbiddenDirectory(d) => {
                write!(f, "refusing to write into system directory {}", d.display())
            }
            ConfigError::NothingToDo => {
                write!(f, "not saving JSON and no injector: nothing to do")
            }
            ConfigError::Line { line, text } => {
                write!(f, "config line {}: cannot parse {:?}", line, text)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings as given, before validation. Later sources override earlier
/// ones field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub port: Option<i64>,
    pub directory: Option<PathBuf>,
    pub secret: Option<String>,
    pub inject: Option<bool>,
    pub injector: Option<String>,
    pub save_json: Option<bool>,
}

impl Settings {
    /// Parses `port=`, `directory=`, `secret=`, `inject=`, `injector=` and
    /// `json=` lines. Blank lines, `#` comments and unknown keys are skipped.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        for (index, raw) in content.lines().enumerate() {
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let bad = || ConfigError::Line {
                line: index + 1,
                text: text.to_string(),
            };
            let Some((key, value)) = text.split_once('=') else {
                return Err(bad());
            };
            let value = value.trim();
            match key.trim() {
                "port" => settings.port = Some(value.parse().map_err(|_| bad())?),
                "directory" => settings.directory = Some(PathBuf::from(value)),
                "secret" => settings.secret = Some(first_word(value).ok_or_else(bad)?),
                "inject" => settings.inject = Some(parse_switch(value).ok_or_else(bad)?),
                "injector" => settings.injector = Some(first_word(value).ok_or_else(bad)?),
                "json" => settings.save_json = Some(parse_switch(value).ok_or_else(bad)?),
                _ => {}
            }
        }
        Ok(settings)
    }

    /// Fields set in `other` replace ours.
    pub fn merge(self, other: Settings) -> Settings {
        Settings {
            port: other.port.or(self.port),
            directory: other.directory.or(self.directory),
            secret: other.secret.or(self.secret),
            inject: other.inject.or(self.inject),
            injector: other.injector.or(self.injector),
            save_json: other.save_json.or(self.save_json),
        }
    }

    pub fn validate(self) -> Result<CollectorConfig, ConfigError> {
        let port = self.port.ok_or(ConfigError::MissingPort)?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| (1..=60000).contains(p))
            .ok_or(ConfigError::Port(port))?;

        let directory = self.directory.ok_or(ConfigError::MissingDirectory)?;
        if is_forbidden(&directory) {
            return Err(ConfigError::ForbiddenDirectory(directory));
        }

        let inject = self.inject.unwrap_or(false);
        let save_json = self.save_json.unwrap_or(true);
        if !inject && !save_json {
            return Err(ConfigError::NothingToDo);
        }

        Ok(CollectorConfig {
            port,
            directory,
            secret: self.secret.unwrap_or_else(|| DEFAULT_SECRET.to_string()),
            injector: inject.then(|| {
                self.injector
                    .unwrap_or_else(|| DEFAULT_INJECTOR.to_string())
            }),
            save_json,
        })
    }
}

fn first_word(value: &str) -> Option<String> {
    value.split_whitespace().next().map(str::to_string)
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "1" | "yes" | "on" | "true" => Some(true),
        "0" | "no" | "off" | "false" => Some(false),
        _ => None,
    }
}

fn is_forbidden(directory: &Path) -> bool {
    let text = directory.to_string_lossy();
    let trimmed = match text.trim_end_matches('/') {
        "" => "/",
        t => t,
    };
    FORBIDDEN_DIRECTORIES.contains(&trimmed)
}

/// Validated collector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    pub port: u16,
    pub directory: PathBuf,
    pub secret: String,
    /// Shell command receiving the stream on stdin; `None` disables it.
    pub injector: Option<String>,
    pub save_json: bool,
}
