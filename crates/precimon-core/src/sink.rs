//! Destinations for completed document pieces.
//!
//! The scheduler hands every piece (preamble, each tick, epilogue) to a
//! [`Sink`] exactly once. A failed write is fatal for the run.

use crate::config::RemoteTarget;
use crate::handshake::Hello;
use chrono::{DateTime, Local, Utc};
use std::fs::File;
use std::io::{self, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::info;

pub trait Sink {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        (**self).write_chunk(chunk)
    }
}

impl Sink for Vec<u8> {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// Any byte stream; every chunk is written whole and flushed.
pub struct StreamSink<W: Write> {
    inner: W,
    bytes: u64,
}

impl<W: Write> StreamSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Sink for StreamSink<W> {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.inner.write_all(chunk)?;
        self.inner.flush()?;
        self.bytes += chunk.len() as u64;
        Ok(())
    }
}

pub fn stdout() -> StreamSink<io::Stdout> {
    StreamSink::new(io::stdout())
}

/// `<shorthost>_<YYYYMMDD>_<HHMM>`, shared by the data and log files.
pub fn output_stem(short_hostname: &str, now: DateTime<Local>) -> String {
    format!("{}_{}", short_hostname, now.format("%Y%m%d_%H%M"))
}

/// Creates `<dir>/<stem>.json`.
pub fn create_file(dir: &Path, stem: &str) -> io::Result<(StreamSink<File>, PathBuf)> {
    let path = dir.join(format!("{}.json", stem));
    let file = File::create(&path)?;
    info!("writing snapshots to {}", path.display());
    Ok((StreamSink::new(file), path))
}

/// Connects to a collector and sends the hello line.
pub fn connect(
    target: &RemoteTarget,
    hostname: &str,
    now: DateTime<Utc>,
) -> io::Result<StreamSink<TcpStream>> {
    let stream = TcpStream::connect((target.host.as_str(), target.port))?;
    stream.set_nodelay(true)?;
    info!("connected to collector {}:{}", target.host, target.port);

    let mut sink = StreamSink::new(stream);
    sink.write_chunk(Hello::new(hostname, now, target.secret.as_str()).encode().as_bytes())?;
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::PROTOCOL_VERSION;
    use chrono::TimeZone;
    use std::io::{BufRead, BufReader, Read};
    use std::net::TcpListener;

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stream_sink_counts_bytes() {
        let mut sink = StreamSink::new(Vec::new());
        sink.write_chunk(b"{\n").unwrap();
        sink.write_chunk(b"}\n").unwrap();
        assert_eq!(sink.bytes_written(), 4);
        assert_eq!(sink.into_inner(), b"{\n}\n");
    }

    #[test]
    fn test_stream_sink_propagates_failure() {
        let mut sink = StreamSink::new(FailingWriter);
        let err = sink.write_chunk(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_output_stem() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(output_stem("db01", now), "db01_20240305_1407");
    }

    #[test]
    fn test_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sink, path) = create_file(dir.path(), "db01_20240305_1407").unwrap();
        sink.write_chunk(b"{}\n").unwrap();
        assert_eq!(path, dir.path().join("db01_20240305_1407.json"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "{}\n");
    }

    #[test]
    fn test_connect_sends_hello_first() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = RemoteTarget {
            host: "127.0.0.1".into(),
            port,
            secret: "hunter2".into(),
        };

        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        let mut sink = connect(&target, "db01.example.com", now).unwrap();
        sink.write_chunk(b"{\n}\n").unwrap();
        drop(sink);

        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let hello = Hello::decode(&line).unwrap();
        assert_eq!(hello.hostname, "db01.example.com");
        assert_eq!(hello.version, PROTOCOL_VERSION);

        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "{\n}\n");
    }
}
