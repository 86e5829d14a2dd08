//! Fixed-cadence tick loop.
//!
//! ```text
//! seed ─► preamble ─► sleep(T - seed time) ─► tick ─► flush ─► sleep(T - exec) ─► tick ...
//!                                                                 │
//!                                 max loops or interrupt ─► epilogue ─► flush
//! ```
//!
//! Every tick reports rates over the time actually elapsed since the
//! previous tick started, so a late wake-up skews nothing.

use crate::agent::{Agent, TickInfo};
use crate::collector::FileSystem;
use crate::error::AgentError;
use crate::platform::monotonic_nanos;
use crate::sink::Sink;
use chrono::Local;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Shortest pause between ticks, even when a tick overran the period.
pub const MIN_SLEEP: Duration = Duration::from_millis(10);

/// Granularity at which a sleep notices an interrupt.
pub const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Clock and sleep used by the scheduler.
pub trait Pacer {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;
    fn sleep(&mut self, duration: Duration);
}

/// `CLOCK_MONOTONIC` and `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPacer;

impl Pacer for SystemPacer {
    fn now(&self) -> Duration {
        Duration::from_nanos(monotonic_nanos())
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Pause before the next tick given how long the last one took.
pub fn next_sleep(period: Duration, exec: Duration) -> Duration {
    period.saturating_sub(exec).max(MIN_SLEEP)
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    /// Stopped by an interrupt rather than the loop limit.
    pub interrupted: bool,
}

pub struct Scheduler<F: FileSystem + Clone, S: Sink, P: Pacer> {
    agent: Agent<F>,
    sink: S,
    pacer: P,
    running: Arc<AtomicBool>,
}

impl<F: FileSystem + Clone, S: Sink, P: Pacer> Scheduler<F, S, P> {
    /// `running` is cleared by the interrupt handler.
    pub fn new(agent: Agent<F>, sink: S, pacer: P, running: Arc<AtomicBool>) -> Self {
        Self {
            agent,
            sink,
            pacer,
            running,
        }
    }

    pub fn agent(&self) -> &Agent<F> {
        &self.agent
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn flush(&mut self) -> Result<(), AgentError> {
        self.sink
            .write_chunk(self.agent.buffer())
            .map_err(AgentError::Sink)?;
        self.agent.clear();
        Ok(())
    }

    /// Sleeps in slices, returning early once interrupted.
    fn sleep(&mut self, duration: Duration) {
        let mut remaining = duration;
        while remaining > Duration::ZERO && self.is_running() {
            let slice = remaining.min(SLEEP_SLICE);
            self.pacer.sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }

    /// Runs until the loop limit or an interrupt. The tick in progress when
    /// the interrupt arrives is completed and flushed, then the epilogue.
    pub fn run(&mut self) -> Result<RunSummary, AgentError> {
        let config = self.agent.config();
        let period = config.period();
        let max_loops = config.max_loops;
        info!(
            "sampling every {}s, {}",
            period.as_secs(),
            match max_loops {
                Some(n) => format!("{} snapshots", n),
                None => "until interrupted".to_string(),
            }
        );

        let seeded_at = self.pacer.now();
        self.agent.seed()?;
        self.agent.write_preamble(seeded_at.as_nanos() as u64, Local::now())?;
        self.flush()?;
        let seed_time = self.pacer.now().saturating_sub(seeded_at);
        debug!("baselines seeded in {:?}", seed_time);
        self.sleep(period.saturating_sub(seed_time));

        let mut previous = seeded_at;
        let mut ticks = 0u64;
        while self.is_running() && max_loops.is_none_or(|max| ticks < max) {
            let start = self.pacer.now();
            let tick = TickInfo {
                snapshot_loop: ticks,
                elapsed: start.saturating_sub(previous).as_secs_f64(),
                taken_at: start.as_nanos() as u64,
                now: Local::now(),
            };
            previous = start;

            self.agent.write_tick(&tick)?;
            let bytes = self.agent.buffer().len();
            self.flush()?;
            ticks += 1;

            let exec = self.pacer.now().saturating_sub(start);
            debug!(
                "snapshot {} written: {} bytes, elapsed {:.3}s, took {:?}",
                tick.snapshot_loop, bytes, tick.elapsed, exec
            );

            if max_loops.is_some_and(|max| ticks >= max) {
                break;
            }
            self.sleep(next_sleep(period, exec));
        }

        let interrupted = !self.is_running();
        if interrupted {
            info!("interrupted after {} snapshots", ticks);
        }
        self.agent.write_epilogue()?;
        self.flush()?;
        info!("finished, {} snapshots written", ticks);

        Ok(RunSummary { ticks, interrupted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::procfs::identity::Identity;
    use crate::collector::{MockFs, SourcePaths};
    use crate::config::AgentConfig;
    use crate::error::EXIT_SINK;
    use crate::platform::Platform;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    /// Virtual clock that only advances when slept on.
    #[derive(Default)]
    struct FakePacer {
        clock: Rc<RefCell<Duration>>,
        sleeps: Rc<RefCell<Vec<Duration>>>,
        /// Clears the running flag once this much virtual time has passed.
        stop_after: Option<(Duration, Arc<AtomicBool>)>,
    }

    impl Pacer for FakePacer {
        fn now(&self) -> Duration {
            *self.clock.borrow()
        }

        fn sleep(&mut self, duration: Duration) {
            *self.clock.borrow_mut() += duration;
            self.sleeps.borrow_mut().push(duration);
            if let Some((limit, running)) = &self.stop_after
                && *self.clock.borrow() >= *limit
            {
                running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Keeps every chunk separately.
    #[derive(Default)]
    struct Chunks(Vec<Vec<u8>>);

    impl Sink for Chunks {
        fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
            self.0.push(chunk.to_vec());
            Ok(())
        }
    }

    impl Chunks {
        fn document(&self) -> serde_json::Value {
            serde_json::from_slice(&self.0.concat()).unwrap()
        }
    }

    struct BrokenSink;

    impl Sink for BrokenSink {
        fn write_chunk(&mut self, _: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "collector went away"))
        }
    }

    fn agent(config: AgentConfig) -> Agent<MockFs> {
        let identity = Identity {
            hostname: "db01".to_string(),
            command: "precimon".to_string(),
            uid: 0,
        };
        Agent::new(
            MockFs::typical_system(),
            SourcePaths::default(),
            Platform::default(),
            config,
            identity,
        )
    }

    fn config(seconds: u64, max_loops: Option<u64>) -> AgentConfig {
        AgentConfig {
            seconds,
            max_loops,
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_next_sleep() {
        let period = Duration::from_secs(10);
        assert_eq!(next_sleep(period, Duration::from_secs(3)), Duration::from_secs(7));
        assert_eq!(next_sleep(period, Duration::from_secs(10)), MIN_SLEEP);
        assert_eq!(next_sleep(period, Duration::from_secs(12)), MIN_SLEEP);
    }

    #[test]
    fn test_runs_max_loops() {
        let running = Arc::new(AtomicBool::new(true));
        let pacer = FakePacer::default();
        let mut scheduler = Scheduler::new(
            agent(config(2, Some(3))),
            Chunks::default(),
            pacer,
            running,
        );

        let summary = scheduler.run().unwrap();
        assert_eq!(
            summary,
            RunSummary {
                ticks: 3,
                interrupted: false
            }
        );

        let chunks = scheduler.into_sink();
        // preamble, three ticks, epilogue
        assert_eq!(chunks.0.len(), 5);
        let v = chunks.document();
        let snapshots = v["snapshots"].as_array().unwrap();
        assert_eq!(snapshots.len(), 3);
        for (i, snapshot) in snapshots.iter().enumerate() {
            assert_eq!(snapshot["snapshot_info"]["snapshot_loop"], i);
            assert_eq!(snapshot["snapshot_info"]["elapsed_seconds"].as_f64(), Some(2.0));
        }
    }

    #[test]
    fn test_sleeps_are_sliced() {
        let running = Arc::new(AtomicBool::new(true));
        let pacer = FakePacer::default();
        let sleeps = pacer.sleeps.clone();
        let mut scheduler = Scheduler::new(
            agent(config(1, Some(2))),
            Chunks::default(),
            pacer,
            running,
        );
        scheduler.run().unwrap();

        // One full period before each of the two ticks, none after the last.
        let sleeps = sleeps.borrow();
        assert_eq!(sleeps.len(), 20);
        assert!(sleeps.iter().all(|&s| s == SLEEP_SLICE));
    }

    #[test]
    fn test_interrupt_stops_with_complete_document() {
        let running = Arc::new(AtomicBool::new(true));
        let pacer = FakePacer {
            stop_after: Some((Duration::from_millis(2500), running.clone())),
            ..FakePacer::default()
        };
        let mut scheduler = Scheduler::new(
            agent(config(1, None)),
            Chunks::default(),
            pacer,
            running,
        );

        let summary = scheduler.run().unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.ticks, 2);

        let v = scheduler.into_sink().document();
        assert_eq!(v["snapshots"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_interrupt_before_first_tick() {
        let running = Arc::new(AtomicBool::new(false));
        let mut scheduler = Scheduler::new(
            agent(config(60, None)),
            Chunks::default(),
            FakePacer::default(),
            running,
        );

        let summary = scheduler.run().unwrap();
        assert_eq!(summary.ticks, 0);
        let v = scheduler.into_sink().document();
        assert!(v["snapshots"].as_array().unwrap().is_empty());
        assert!(v.get("identity").is_some());
    }

    #[test]
    fn test_sink_failure_is_fatal() {
        let running = Arc::new(AtomicBool::new(true));
        let mut scheduler = Scheduler::new(
            agent(config(1, Some(1))),
            BrokenSink,
            FakePacer::default(),
            running,
        );

        let err = scheduler.run().unwrap_err();
        assert_eq!(err.exit_code(), EXIT_SINK);
    }
}
