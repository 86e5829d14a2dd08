//! precimon - performance snapshot agent.
//!
//! Samples OS and process counters at a fixed interval and streams them as
//! one JSON document to stdout, a file, or a remote precimon-collector.

mod pidfile;

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Local, Utc};
use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use pidfile::{PID_FILE, PidCheck, check_and_claim};
use precimon_core::config::{DEFAULT_SECONDS, DEFAULT_THRESHOLD};
use precimon_core::error::EXIT_SINK;
use precimon_core::platform::{current_uid, hostname, process_alive, short_hostname};
use precimon_core::sink::{self, Sink};
use precimon_core::{Agent, AgentConfig, Identity, RemoteTarget, Scheduler, SystemPacer};

const EXIT_ALREADY_RUNNING: u8 = 13;
const EXIT_HOST_WITHOUT_PORT: u8 = 52;
const EXIT_PORT_WITHOUT_HOST: u8 = 53;
const EXIT_NO_HOSTNAME: u8 = 98;

/// Performance snapshot agent.
#[derive(Parser)]
#[command(name = "precimon", about = "Performance snapshot agent", version)]
struct Args {
    /// Seconds between snapshots.
    #[arg(short = 's', long, default_value_t = DEFAULT_SECONDS,
          value_parser = clap::value_parser!(u64).range(1..))]
    seconds: u64,

    /// Number of snapshots to take. Runs until interrupted when omitted.
    #[arg(short = 'c', long)]
    count: Option<u64>,

    /// Write to <shorthost>_<YYYYMMDD>_<HHMM>.json instead of stdout.
    #[arg(short = 'f', long)]
    file: bool,

    /// Directory for -f output and log files.
    #[arg(short = 'm', long, value_name = "DIR", default_value = ".")]
    directory: PathBuf,

    /// Refuse to start while another agent holds /tmp/precimon.pid.
    #[arg(short = 'k', long)]
    pid_check: bool,

    /// Collect and rank processes.
    #[arg(short = 'P', long)]
    processes: bool,

    /// Minimum fraction of one core a process must use to be reported.
    #[arg(short = 'I', long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f64,

    /// Include the config section in the output.
    #[arg(short = 'C', long)]
    config: bool,

    /// Collector host; requires -p.
    #[arg(short = 'i', long, value_name = "HOST")]
    host: Option<String>,

    /// Collector port; requires -i.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Shared secret sent to the collector.
    #[arg(short = 'X', long, env = "PRECIMON_SECRET", hide_env_values = true,
          default_value = "")]
    secret: String,

    /// Append writer statistics after the snapshots.
    #[arg(long, env = "PRECIMON_STATS")]
    stats: bool,

    /// Increase logging verbosity (-d for debug, -dd for trace).
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short = 'q', long)]
    quiet: bool,
}

/// Initializes the tracing subscriber. With `log_file` the output goes
/// there, without colours.
fn init_logging(verbose: u8, quiet: bool, log_file: Option<File>) {
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
    for target in ["precimon", "precimon_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match log_file {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => builder.with_writer(std::io::stderr).init(),
    }
}

fn remote_target(args: &Args) -> Result<Option<RemoteTarget>, u8> {
    match (&args.host, args.port) {
        (Some(host), Some(port)) => Ok(Some(RemoteTarget {
            host: host.clone(),
            port,
            secret: args.secret.clone(),
        })),
        (Some(_), None) => Err(EXIT_HOST_WITHOUT_PORT),
        (None, Some(_)) => Err(EXIT_PORT_WITHOUT_HOST),
        (None, None) => Ok(None),
    }
}

fn open_sink(
    args: &Args,
    remote: Option<&RemoteTarget>,
    host: &str,
    stem: &str,
) -> std::io::Result<Box<dyn Sink>> {
    if let Some(target) = remote {
        return Ok(Box::new(sink::connect(target, host, Utc::now())?));
    }
    if args.file {
        let (file, _) = sink::create_file(&args.directory, stem)?;
        return Ok(Box::new(file));
    }
    Ok(Box::new(sink::stdout()))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let remote = match remote_target(&args) {
        Ok(remote) => remote,
        Err(code) => {
            eprintln!("precimon: -i host and -p port must be given together");
            return ExitCode::from(code);
        }
    };

    let host = match hostname() {
        Ok(host) => host,
        Err(e) => {
            eprintln!("precimon: cannot get hostname: {}", e);
            return ExitCode::from(EXIT_NO_HOSTNAME);
        }
    };
    let stem = sink::output_stem(short_hostname(&host), Local::now());

    let log_file = if args.file {
        let path = args.directory.join(format!("{}.err", stem));
        match File::create(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("precimon: cannot create {}: {}", path.display(), e);
                return ExitCode::from(EXIT_SINK as u8);
            }
        }
    } else {
        None
    };
    init_logging(args.verbose, args.quiet, log_file);

    info!("precimon {} starting on {}", env!("CARGO_PKG_VERSION"), host);

    if args.pid_check {
        match check_and_claim(Path::new(PID_FILE), std::process::id(), process_alive) {
            Ok(PidCheck::Running(pid)) => {
                error!("precimon already running as pid {} ({})", pid, PID_FILE);
                return ExitCode::from(EXIT_ALREADY_RUNNING);
            }
            Ok(PidCheck::Claimed) => {}
            Err(e) => warn!("pid file {}: {}", PID_FILE, e),
        }
    }

    let config = AgentConfig {
        seconds: args.seconds,
        max_loops: args.count,
        process_mode: args.processes,
        threshold: args.threshold,
        emit_config: args.config,
        emit_stats: args.stats,
        debugging: args.verbose > 0,
        remote,
    };
    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::from(e.exit_code() as u8);
    }

    let sink = match open_sink(&args, config.remote.as_ref(), &host, &stem) {
        Ok(sink) => sink,
        Err(e) => {
            error!("cannot open output: {}", e);
            return ExitCode::from(EXIT_SINK as u8);
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

    let identity = Identity {
        hostname: host,
        command: std::env::args().collect::<Vec<_>>().join(" "),
        uid: current_uid(),
    };
    let agent = Agent::for_host(config, identity);
    let mut scheduler = Scheduler::new(agent, sink, SystemPacer, running);

    match scheduler.run() {
        Ok(summary) => {
            info!(
                "done: {} snapshots{}",
                summary.ticks,
                if summary.interrupted { " (interrupted)" } else { "" }
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
