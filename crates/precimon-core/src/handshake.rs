//! First line of a remote connection: the agent announces itself and the
//! collector decides where the stream goes.
//!
//! ```text
//! preamble-here precimon <hostname> <utc> <secret> <protocol> postamble-here\n
//! ```
//!
//! The line is sent through [`mask`](crate::mask::mask); the document
//! stream that follows is raw.

use crate::mask::{mask, unmask};
use chrono::{DateTime, Utc};

/// Protocol revision both ends must agree on.
pub const PROTOCOL_VERSION: &str = "12";

const PREAMBLE: &str = "preamble-here";
const POSTAMBLE: &str = "postamble-here";
const PROGRAM: &str = "precimon";
const TOKENS: usize = 7;

/// Rejected hello line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloError {
    /// Wrong number of space separated tokens.
    TokenCount(usize),
    /// `..` or `\` in the line.
    PathTraversal,
    /// Preamble, program or postamble token differs.
    Framing,
    /// Host name does not start with a letter or digit.
    Hostname(String),
    /// The timestamp does not start with a four digit year.
    Timestamp(String),
    SecretMismatch,
    Version { expected: String, found: String },
}

impl std::fmt::Display for HelloError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HelloError::TokenCount(n) => write!(f, "expected {} tokens, got {}", TOKENS, n),
            HelloError::PathTraversal => write!(f, "path characters in hello"),
            HelloError::Framing => write!(f, "bad preamble or postamble"),
            HelloError::Hostname(h) => write!(f, "invalid hostname {:?}", h),
            HelloError::Timestamp(t) => write!(f, "invalid timestamp {:?}", t),
            HelloError::SecretMismatch => write!(f, "secret does not match"),
            HelloError::Version { expected, found } => {
                write!(f, "protocol {} expected, agent sent {}", expected, found)
            }
        }
    }
}

impl std::error::Error for HelloError {}

/// Hello as sent by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub hostname: String,
    pub utc: String,
    pub secret: String,
    pub version: String,
}

impl Hello {
    pub fn new(hostname: impl Into<String>, now: DateTime<Utc>, secret: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            utc: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
            secret: secret.into(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// The masked line, newline terminated.
    pub fn encode(&self) -> String {
        let line = format!(
            "{} {} {} {} {} {} {}",
            PREAMBLE, PROGRAM, self.hostname, self.utc, self.secret, self.version, POSTAMBLE
        );
        let mut masked = mask(&line);
        masked.push('\n');
        masked
    }

    /// Unmasks and splits a received line without checking the secret.
    pub fn decode(line: &str) -> Result<Self, HelloError> {
        let line = unmask(line.trim_end_matches(['\r', '\n']));
        if line.contains("..") || line.contains('\\') {
            return Err(HelloError::PathTraversal);
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [preamble, program, hostname, utc, secret, version, postamble] = tokens[..] else {
            return Err(HelloError::TokenCount(tokens.len()));
        };
        if preamble != PREAMBLE || program != PROGRAM || postamble != POSTAMBLE {
            return Err(HelloError::Framing);
        }
        Ok(Self {
            hostname: hostname.to_string(),
            utc: utc.to_string(),
            secret: secret.to_string(),
            version: version.to_string(),
        })
    }

    /// Checks the secret and protocol and returns the sanitized host and
    /// timestamp the collector names its output after.
    pub fn accept(&self, secret: &str) -> Result<Accepted, HelloError> {
        if self.secret != secret {
            return Err(HelloError::SecretMismatch);
        }
        if self.version != PROTOCOL_VERSION {
            return Err(HelloError::Version {
                expected: PROTOCOL_VERSION.to_string(),
                found: self.version.clone(),
            });
        }

        let host = short_host(&self.hostname)?;
        let utc: String = self
            .utc
            .chars()
            .map(|c| {
                if c.is_ascii_digit() || matches!(c, '-' | ':' | 'T') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if utc.len() < 4 || !utc[..4].bytes().all(|b| b.is_ascii_digit()) {
            return Err(HelloError::Timestamp(self.utc.clone()));
        }

        Ok(Accepted { host, utc })
    }
}

fn short_host(hostname: &str) -> Result<String, HelloError> {
    let short = hostname.split('.').next().unwrap_or(hostname);
    if !short.starts_with(|c: char| c.is_ascii_alphanumeric())
        || short.contains(['/', '\0'])
    {
        return Err(HelloError::Hostname(hostname.to_string()));
    }
    Ok(short.to_string())
}

/// Validated origin of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub host: String,
    pub utc: String,
}

impl Accepted {
    /// `<host>-<utc>.json`
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.host, self.utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hello() -> Hello {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        Hello::new("db01.example.com", now, "hunter2")
    }

    #[test]
    fn test_encode_is_masked_line() {
        let line = hello().encode();
        assert!(line.ends_with('\n'));
        assert!(!line.contains("hunter2"));
        assert_eq!(
            unmask(&line),
            "preamble-here precimon db01.example.com 2024-03-05T14:07:09 hunter2 12 postamble-here\n"
        );
    }

    #[test]
    fn test_decode_and_accept() {
        let decoded = Hello::decode(&hello().encode()).unwrap();
        assert_eq!(decoded, hello());

        let accepted = decoded.accept("hunter2").unwrap();
        assert_eq!(accepted.host, "db01");
        assert_eq!(accepted.utc, "2024-03-05T14:07:09");
        assert_eq!(accepted.file_name(), "db01-2024-03-05T14:07:09.json");
    }

    #[test]
    fn test_wrong_secret() {
        let decoded = Hello::decode(&hello().encode()).unwrap();
        assert_eq!(decoded.accept("other"), Err(HelloError::SecretMismatch));
    }

    #[test]
    fn test_wrong_version() {
        let line = mask("preamble-here precimon db01 2024-03-05T14:07:09 hunter2 11 postamble-here\n");
        let decoded = Hello::decode(&line).unwrap();
        assert!(matches!(
            decoded.accept("hunter2"),
            Err(HelloError::Version { found, .. }) if found == "11"
        ));
    }

    #[test]
    fn test_token_count() {
        let line = mask("preamble-here precimon db01 hunter2 12 postamble-here\n");
        assert_eq!(Hello::decode(&line), Err(HelloError::TokenCount(6)));
    }

    #[test]
    fn test_path_traversal() {
        let line = mask("preamble-here precimon ../etc 2024 hunter2 12 postamble-here\n");
        assert_eq!(Hello::decode(&line), Err(HelloError::PathTraversal));
        let line = mask("preamble-here precimon a\\b 2024 hunter2 12 postamble-here\n");
        assert_eq!(Hello::decode(&line), Err(HelloError::PathTraversal));
    }

    #[test]
    fn test_unmasked_line_rejected() {
        let line = "preamble-here precimon db01 2024 hunter2 12 postamble-here\n";
        assert_eq!(Hello::decode(line), Err(HelloError::Framing));
    }

    #[test]
    fn test_hostname_must_start_alphanumeric() {
        let line = mask("preamble-here precimon -db01 2024 hunter2 12 postamble-here\n");
        let decoded = Hello::decode(&line).unwrap();
        assert!(matches!(decoded.accept("hunter2"), Err(HelloError::Hostname(_))));
    }

    #[test]
    fn test_timestamp_sanitized() {
        let line = mask("preamble-here precimon db01 2024-03-05T14:07:09Z/x hunter2 12 postamble-here\n");
        let accepted = Hello::decode(&line).unwrap().accept("hunter2").unwrap();
        assert_eq!(accepted.utc, "2024-03-05T14:07:09___");
    }

    #[test]
    fn test_timestamp_requires_year() {
        let line = mask("preamble-here precimon db01 24-03 hunter2 12 postamble-here\n");
        let decoded = Hello::decode(&line).unwrap();
        assert!(matches!(decoded.accept("hunter2"), Err(HelloError::Timestamp(_))));
    }
}
