//! One agent connection: hello, then the document stream.

use crate::config::CollectorConfig;
use precimon_core::handshake::{Hello, HelloError};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use tracing::{debug, info, warn};

/// Longest accepted hello line.
const MAX_HELLO: u64 = 4096;
const COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug)]
pub enum SessionError {
    /// The connection closed before a complete hello line.
    NoHello,
    Hello(HelloError),
    Read(io::Error),
    Output { path: PathBuf, source: io::Error },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NoHello => write!(f, "connection closed before hello"),
            SessionError::Hello(e) => write!(f, "rejected hello: {}", e),
            SessionError::Read(e) => write!(f, "read failed: {}", e),
            SessionError::Output { path, source } => {
                write!(f, "cannot write {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::NoHello => None,
            SessionError::Hello(e) => Some(e),
            SessionError::Read(e) => Some(e),
            SessionError::Output { source, .. } => Some(source),
        }
    }
}

impl From<HelloError> for SessionError {
    fn from(e: HelloError) -> Self {
        SessionError::Hello(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub host: String,
    /// Stream bytes after the hello line.
    pub bytes: u64,
    pub saved: Option<PathBuf>,
    /// The injector received the whole stream.
    pub injected: bool,
}

/// Injector process fed through its stdin.
struct Injector {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl Injector {
    fn spawn(command: &str) -> io::Result<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        Ok(Self { child, stdin })
    }

    /// Writes a chunk; after the first failure the injector is skipped.
    fn feed(&mut self, host: &str, chunk: &[u8]) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        if let Err(e) = stdin.write_all(chunk) {
            warn!("{}: injector write failed, injection stopped: {}", host, e);
            self.stdin = None;
        }
    }

    fn is_fed(&self) -> bool {
        self.stdin.is_some()
    }

    fn finish(mut self, host: &str) {
        drop(self.stdin.take());
        match self.child.wait() {
            Ok(status) => debug!("{}: injector exited with {}", host, status),
            Err(e) => warn!("{}: injector wait failed: {}", host, e),
        }
    }
}

/// Serves one connection until the agent closes it. `on_hello` runs once
/// the hello line has arrived, before it is checked.
pub fn handle<R: Read>(
    stream: R,
    peer: &str,
    config: &CollectorConfig,
    on_hello: impl FnOnce() -> io::Result<()>,
) -> Result<SessionSummary, SessionError> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    (&mut reader)
        .take(MAX_HELLO)
        .read_line(&mut line)
        .map_err(SessionError::Read)?;
    if !line.ends_with('\n') {
        return Err(SessionError::NoHello);
    }
    on_hello().map_err(SessionError::Read)?;

    let hello = Hello::decode(&line)?;
    info!(
        "new request from {}: hostname={}, utc={}, protocol={}",
        peer, hello.hostname, hello.utc, hello.version
    );
    let accepted = hello.accept(&config.secret)?;
    let host = accepted.host.clone();

    let mut output = None;
    if config.save_json {
        let path = config.directory.join(accepted.file_name());
        let file = File::create(&path).map_err(|source| SessionError::Output {
            path: path.clone(),
            source,
        })?;
        info!("{}: saving to {}", host, path.display());
        output = Some((file, path));
    }

    let mut injector = match &config.injector {
        Some(command) => match Injector::spawn(command) {
            Ok(injector) => {
                info!("{}: injector started: {}", host, command);
                Some(injector)
            }
            Err(e) => {
                warn!("{}: cannot start injector {}, continuing without: {}", host, command, e);
                None
            }
        },
        None => None,
    };

    let mut buf = vec![0u8; COPY_BUFFER];
    let mut bytes = 0u64;
    let mut reads = 0u64;
    let copied = loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(SessionError::Read(e)),
        };
        reads += 1;
        bytes += n as u64;
        let chunk = &buf[..n];

        if let Some((file, path)) = output.as_mut()
            && let Err(source) = file.write_all(chunk)
        {
            break Err(SessionError::Output {
                path: path.clone(),
                source,
            });
        }
        if let Some(injector) = injector.as_mut() {
            injector.feed(&host, chunk);
        }
    };

    let injected = injector.as_ref().is_some_and(Injector::is_fed);
    if let Some(injector) = injector {
        injector.finish(&host);
    }
    copied?;
    info!("{}: finished, {} bytes in {} reads", host, bytes, reads);

    Ok(SessionSummary {
        host,
        bytes,
        saved: output.map(|(_, path)| path),
        injected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use precimon_core::mask::mask;
    use std::io::Cursor;

    const DOC: &str = "{\n\t\"snapshots\": [\n\t]\n}\n";

    fn config(dir: &std::path::Path) -> CollectorConfig {
        CollectorConfig {
            port: 8181,
            directory: dir.to_path_buf(),
            secret: "hunter2".to_string(),
            injector: None,
            save_json: true,
        }
    }

    fn stream(secret: &str, body: &str) -> Cursor<Vec<u8>> {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let mut data = Hello::new("db01.example.com", now, secret).encode();
        data.push_str(body);
        Cursor::new(data.into_bytes())
    }

    #[test]
    fn test_saves_stream_after_hello() {
        let dir = tempfile::tempdir().unwrap();
        let summary = handle(stream("hunter2", DOC), "test", &config(dir.path()), || Ok(())).unwrap();

        let path = dir.path().join("db01-2024-03-05T14:07:09.json");
        assert_eq!(summary.host, "db01");
        assert_eq!(summary.bytes, DOC.len() as u64);
        assert_eq!(summary.saved.as_deref(), Some(path.as_path()));
        assert_eq!(std::fs::read_to_string(path).unwrap(), DOC);
    }

    #[test]
    fn test_wrong_secret_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let err = handle(stream("guess", DOC), "test", &config(dir.path()), || Ok(())).unwrap_err();
        assert!(matches!(err, SessionError::Hello(HelloError::SecretMismatch)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_hello() {
        let dir = tempfile::tempdir().unwrap();
        let err = handle(Cursor::new(Vec::new()), "test", &config(dir.path()), || Ok(())).unwrap_err();
        assert!(matches!(err, SessionError::NoHello));

        let partial = Cursor::new(mask("preamble-here precimon").into_bytes());
        let err = handle(partial, "test", &config(dir.path()), || Ok(())).unwrap_err();
        assert!(matches!(err, SessionError::NoHello));
    }

    #[test]
    fn test_injector_receives_stream() {
        let dir = tempfile::tempdir().unwrap();
        let injected = dir.path().join("injected.json");
        let config = CollectorConfig {
            injector: Some(format!("cat > '{}'", injected.display())),
            save_json: false,
            ..config(dir.path())
        };

        let summary = handle(stream("hunter2", DOC), "test", &config, || Ok(())).unwrap();
        assert!(summary.injected);
        assert!(summary.saved.is_none());
        assert_eq!(std::fs::read_to_string(injected).unwrap(), DOC);
    }

    #[test]
    fn test_failed_injector_keeps_saving() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            injector: Some("exit 0".to_string()),
            ..config(dir.path())
        };
        let body = DOC.repeat(20_000);

        let summary = handle(stream("hunter2", &body), "test", &config, || Ok(())).unwrap();
        assert!(!summary.injected);
        let saved = std::fs::read_to_string(summary.saved.unwrap()).unwrap();
        assert_eq!(saved.len(), body.len());
    }
}
