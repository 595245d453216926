//! Recorder process lifecycle
//!
//! Each CPU is captured by its own forked process. The child opens its
//! buffer channel and artifact, reports readiness over a pipe, then loops:
//! drain, idle for the poll interval, repeat. A flush request cuts the idle
//! short and forces another pass; a stop request triggers one last pass and
//! a clean exit. An empty drain never ends the loop.

use crate::manager::WorkerSpawner;
use crate::recorder::{BufferSource, RecorderFactory};
use crate::signals::{self, WorkerFlags};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, pipe, ForkResult, Pid};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

/// Exit status of a recorder that could not start
pub const FATAL_EXIT: i32 = 255;

/// Longest uninterrupted sleep while idling, so requests are seen promptly
const IDLE_SLICE: Duration = Duration::from_millis(10);

/// What a recorder did before it was stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Drain passes performed, including the final one
    pub passes: u64,
    /// Flush requests honored
    pub flushes: u64,
    /// Bytes moved into the artifact
    pub bytes: u64,
}

/// Run the capture loop until a stop is requested
pub fn run_loop<S: BufferSource + ?Sized>(
    source: &mut S,
    flags: &WorkerFlags<'_>,
    interval: Duration,
) -> io::Result<WorkerReport> {
    let mut report = WorkerReport::default();

    while !flags.stop_requested() {
        report.bytes += source.drain()?;
        report.passes += 1;

        if flags.take_flush() {
            report.flushes += 1;
            continue;
        }
        idle(interval, flags);
    }

    report.bytes += source.drain()?;
    report.passes += 1;
    Ok(report)
}

/// Sleep for `interval`, returning early once a request is pending
fn idle(interval: Duration, flags: &WorkerFlags<'_>) {
    let deadline = Instant::now() + interval;
    loop {
        if flags.pending() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(IDLE_SLICE));
    }
}

fn report_ready(ready: &mut File, code: i32) {
    // The parent treats a short read as a failed start, so nothing else to do
    let _ = ready.write_all(&code.to_le_bytes());
}

/// Body of a forked recorder process; never returns
pub fn worker_main<F: RecorderFactory>(
    factory: &F,
    cpu: usize,
    artifact: &Path,
    interval: Duration,
    mut ready: File,
) -> ! {
    let flags = match signals::install_worker_handlers() {
        Ok(flags) => flags,
        Err(errno) => {
            report_ready(&mut ready, errno as i32);
            std::process::exit(FATAL_EXIT);
        }
    };

    let mut source = match factory.open(cpu, artifact) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("[tracerec: CPU {} can't create recorder: {}]", cpu, e);
            report_ready(&mut ready, e.raw_os_error().unwrap_or(libc::EIO));
            std::process::exit(FATAL_EXIT);
        }
    };
    report_ready(&mut ready, 0);
    drop(ready);

    let code = match run_loop(&mut source, &flags, interval) {
        Ok(report) => {
            tracing::debug!(cpu, ?report, "recorder stopped");
            0
        }
        Err(e) => {
            eprintln!("[tracerec: CPU {} recorder failed: {}]", cpu, e);
            1
        }
    };
    drop(source);
    std::process::exit(code);
}

/// Spawns recorders by forking the current process
pub struct ForkSpawner<F: RecorderFactory> {
    factory: F,
    interval: Duration,
}

impl<F: RecorderFactory> ForkSpawner<F> {
    pub fn new(factory: F, interval: Duration) -> Self {
        Self { factory, interval }
    }
}

impl<F: RecorderFactory> WorkerSpawner for ForkSpawner<F> {
    fn spawn(&mut self, cpu: usize, artifact: &Path) -> io::Result<Pid> {
        let (read_end, write_end) = pipe()?;

        // SAFETY: the child only opens files, copies bytes and exits
        match unsafe { fork() }? {
            ForkResult::Parent { child } => {
                drop(write_end);
                let mut ready = File::from(read_end);
                let mut status = [0u8; 4];
                let outcome = ready.read_exact(&mut status);
                match outcome.map(|()| i32::from_le_bytes(status)) {
                    Ok(0) => {
                        tracing::debug!(cpu, pid = %child, "recorder ready");
                        Ok(child)
                    }
                    Ok(code) => {
                        let _ = waitpid(child, None);
                        Err(io::Error::from_raw_os_error(code))
                    }
                    Err(_) => {
                        let _ = waitpid(child, None);
                        Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "recorder exited before it was ready",
                        ))
                    }
                }
            }
            ForkResult::Child => {
                drop(read_end);
                worker_main(&self.factory, cpu, artifact, self.interval, File::from(write_end))
            }
        }
    }
}
