//! Extraction from an already running trace session
//!
//! The trace was started by someone else, so nothing is (re)configured.
//! The poller keeps nudging the recorders to flush until the kernel's trace
//! log has nothing left beyond its header, or until the operator interrupts.

use crate::control::TraceControl;
use crate::error::Result;
use crate::manager::{RecorderManager, WorkerSpawner};
use std::time::Duration;

/// Idle time between drained checks
pub const DEFAULT_EXTRACT_INTERVAL: Duration = Duration::from_secs(1);

/// Why the poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The trace log was observed empty after `cycles` flush rounds
    Drained { cycles: u64 },
    /// The finished flag was raised after `cycles` flush rounds
    Interrupted { cycles: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractionPoller {
    interval: Duration,
}

impl Default for ExtractionPoller {
    fn default() -> Self {
        Self::new(DEFAULT_EXTRACT_INTERVAL)
    }
}

impl ExtractionPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Flush the recorders until the live source drains or the session is finished
    pub fn run<C, S>(&self, control: &C, manager: &mut RecorderManager<S>) -> Result<PollOutcome>
    where
        C: TraceControl + ?Sized,
        S: WorkerSpawner,
    {
        let mut cycles = 0u64;
        loop {
            if manager.is_finished() {
                tracing::info!(cycles, "extraction interrupted");
                return Ok(PollOutcome::Interrupted { cycles });
            }
            if !control.is_live()? {
                tracing::info!(cycles, "trace drained");
                return Ok(PollOutcome::Drained { cycles });
            }
            let flushed = manager.flush_all()?;
            cycles += 1;
            tracing::debug!(cycles, flushed, "flushed recorders");
            std::thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Listing;
    use nix::unistd::Pid;
    use std::cell::Cell;
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Live for `live_for` checks, optionally raising `finished` on a given check
    struct ScriptedSource {
        live_for: Option<u64>,
        checks: Cell<u64>,
        interrupt_at: Option<(u64, Arc<AtomicBool>)>,
    }

    impl ScriptedSource {
        fn new(live_for: Option<u64>) -> Self {
            Self {
                live_for,
                checks: Cell::new(0),
                interrupt_at: None,
            }
        }
    }

    impl TraceControl for ScriptedSource {
        fn enable_event(&self, _: &str) -> Result<()> {
            unreachable!("extraction never configures events")
        }
        fn disable_event(&self, _: &str) -> Result<()> {
            unreachable!("extraction never configures events")
        }
        fn select_plugin(&self, _: &str) -> Result<()> {
            unreachable!("extraction never selects a plugin")
        }
        fn set_option(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn tracing_on(&self) -> Result<()> {
            unreachable!("extraction never toggles tracing")
        }
        fn tracing_off(&self) -> Result<()> {
            unreachable!("extraction never toggles tracing")
        }
        fn is_live(&self) -> Result<bool> {
            let n = self.checks.get() + 1;
            self.checks.set(n);
            if let Some((at, flag)) = &self.interrupt_at {
                if n >= *at {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            Ok(self.live_for.map_or(true, |live| n <= live))
        }
        fn reset_max_latency(&self) -> Result<()> {
            Ok(())
        }
        fn clear_trace(&self) -> Result<()> {
            Ok(())
        }
        fn read_listing(&self, _: Listing) -> Result<String> {
            Ok(String::new())
        }
        fn cpu_stats(&self, _: usize) -> Result<Option<String>> {
            Ok(None)
        }
    }

    struct NoSpawn;

    impl WorkerSpawner for NoSpawn {
        fn spawn(&mut self, _: usize, _: &Path) -> io::Result<Pid> {
            unreachable!()
        }
    }

    fn manager() -> RecorderManager<NoSpawn> {
        RecorderManager::new(NoSpawn, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_already_drained_source_exits_immediately() {
        let source = ScriptedSource::new(Some(0));
        let outcome = ExtractionPoller::new(Duration::ZERO)
            .run(&source, &mut manager())
            .unwrap();
        assert_eq!(outcome, PollOutcome::Drained { cycles: 0 });
    }

    #[test]
    fn test_drains_after_n_cycles() {
        let source = ScriptedSource::new(Some(5));
        let outcome = ExtractionPoller::new(Duration::from_millis(1))
            .run(&source, &mut manager())
            .unwrap();
        assert_eq!(outcome, PollOutcome::Drained { cycles: 5 });
        assert_eq!(source.checks.get(), 6);
    }

    #[test]
    fn test_never_drained_source_runs_until_interrupted() {
        let mut m = manager();
        let mut source = ScriptedSource::new(None);
        source.interrupt_at = Some((40, m.finished_flag()));

        let outcome = ExtractionPoller::new(Duration::ZERO)
            .run(&source, &mut m)
            .unwrap();
        assert_eq!(outcome, PollOutcome::Interrupted { cycles: 40 });
    }

    #[test]
    fn test_finished_before_start_skips_checks() {
        let mut m = manager();
        m.finish();
        let source = ScriptedSource::new(None);
        let outcome = ExtractionPoller::default().run(&source, &mut m).unwrap();
        assert_eq!(outcome, PollOutcome::Interrupted { cycles: 0 });
        assert_eq!(source.checks.get(), 0);
    }
}
