//! precimon-collector - receives agent streams over TCP.
//!
//! Each connection starts with a masked hello line naming the host. The
//! stream that follows is saved as `<host>-<utc>.json` in the data
//! directory and/or piped into an injector command.

mod config;
mod session;

use std::fs::OpenOptions;
use std::io;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{CollectorConfig, Settings};
use precimon_core::handshake::PROTOCOL_VERSION;

const LOG_FILE: &str = "precimon_collector.log";
const EXIT_CONFIG_FILE: u8 = 99;
const ACCEPT_POLL: Duration = Duration::from_millis(100);
/// How long a new connection may take to send its hello line.
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives precimon snapshot streams.
#[derive(Parser)]
#[command(name = "precimon-collector", about = "Receives precimon snapshot streams", version)]
struct Args {
    /// Port to listen on (1-60000).
    #[arg(short = 'p', long)]
    port: Option<i64>,

    /// Directory for the JSON files and the log.
    #[arg(short = 'd', long)]
    directory: Option<PathBuf>,

    /// Pipe every stream into the injector command.
    #[arg(short = 'i', long)]
    inject: bool,

    /// Injector command, run through `sh -c`.
    #[arg(short = 'c', long)]
    injector: Option<String>,

    /// Do not save JSON files (requires -i).
    #[arg(short = 'n', long)]
    no_json: bool,

    /// Shared secret agents must present.
    #[arg(short = 'X', long)]
    secret: Option<String>,

    /// Read settings from a key=value file. Other options override it.
    #[arg(short = 'a', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            port: self.port,
            directory: self.directory.clone(),
            secret: self.secret.clone(),
            inject: self.inject.then_some(true),
            injector: self.injector.clone(),
            save_json: self.no_json.then_some(false),
        }
    }
}

fn init_logging(verbose: u8, quiet: bool, log: std::fs::File) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["precimon_collector", "precimon_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(log))
        .init();
}

/// A running session thread and a handle on its socket.
struct Session {
    thread: JoinHandle<()>,
    socket: TcpStream,
}

fn join(session: Session) {
    if session.thread.join().is_err() {
        error!("session thread panicked");
    }
}

/// Joins the sessions whose threads have ended.
fn reap(sessions: &mut Vec<Session>) {
    let mut i = 0;
    while i < sessions.len() {
        if sessions[i].thread.is_finished() {
            join(sessions.swap_remove(i));
        } else {
            i += 1;
        }
    }
}

fn start_session(
    stream: TcpStream,
    peer: String,
    config: Arc<CollectorConfig>,
    hello_timeout: Duration,
) -> io::Result<Session> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(hello_timeout))?;
    let socket = stream.try_clone()?;

    let thread = thread::Builder::new()
        .name(format!("session-{}", peer))
        .spawn(move || {
            let result = session::handle(&stream, &peer, &config, || {
                stream.set_read_timeout(None)
            });
            match result {
                Ok(summary) => info!(
                    "{} ({}) closed: {} bytes",
                    summary.host, peer, summary.bytes
                ),
                Err(e) => error!("{}: {}", peer, e),
            }
        })?;
    Ok(Session { thread, socket })
}

/// Accepts connections until `running` is cleared, one thread each, then
/// stops reading from the open sessions and waits for them to finish.
/// Returns the number of connections accepted.
fn serve(
    listener: &TcpListener,
    config: Arc<CollectorConfig>,
    running: &AtomicBool,
    hello_timeout: Duration,
) -> io::Result<u64> {
    listener.set_nonblocking(true)?;
    let mut accepted = 0u64;
    let mut sessions: Vec<Session> = Vec::new();

    while running.load(Ordering::SeqCst) {
        reap(&mut sessions);
        let (stream, peer) = match listener.accept() {
            Ok(connection) => connection,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                warn!("accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
                continue;
            }
        };
        accepted += 1;

        match start_session(stream, peer.to_string(), Arc::clone(&config), hello_timeout) {
            Ok(session) => sessions.push(session),
            Err(e) => error!("{}: cannot start session: {}", peer, e),
        }
    }

    if !sessions.is_empty() {
        info!("closing {} open sessions", sessions.len());
    }
    for session in &sessions {
        if let Err(e) = session.socket.shutdown(Shutdown::Read) {
            debug!("shutdown: {}", e);
        }
    }
    for session in sessions {
        join(session);
    }

    Ok(accepted)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut settings = Settings::default();
    if let Some(path) = &args.config {
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| Settings::parse(&content).map_err(|e| e.to_string()));
        match parsed {
            Ok(from_file) => settings = from_file,
            Err(e) => {
                eprintln!("precimon-collector: {}: {}", path.display(), e);
                return ExitCode::from(EXIT_CONFIG_FILE);
            }
        }
    }
    let config = match settings.merge(args.settings()).validate() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("precimon-collector: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let log_path = config.directory.join(LOG_FILE);
    let log = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("precimon-collector: cannot open {}: {}", log_path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(args.verbose, args.quiet, log);

    info!(
        "starting: port={} directory={} inject={} json={} protocol={} version={}",
        config.port,
        config.directory.display(),
        config.injector.as_deref().unwrap_or("no"),
        config.save_json,
        PROTOCOL_VERSION,
        env!("CARGO_PKG_VERSION")
    );

    let listener = match TcpListener::bind(("0.0.0.0", config.port)) {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot listen on port {}: {}", config.port, e);
            return ExitCode::FAILURE;
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    match serve(&listener, Arc::new(config), &running, HELLO_TIMEOUT) {
        Ok(count) => {
            info!("shutting down after {} connections", count);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("listener failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
