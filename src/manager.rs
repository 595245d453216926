//! Recorder process manager
//!
//! Owns one [`Worker`] per CPU and drives them through start, flush, stop
//! and kill using process signals. A per-CPU artifact is only handed to
//! archive assembly once its recorder has been reaped.
//!
//! If the manager is dropped while any recorder is still running or any
//! artifact is still on disk, it takes the fatal path: running recorders are
//! killed and every artifact is removed. An error propagating out of a
//! capture session therefore never leaves recorders behind.

use crate::artifact::{artifact_path, destroy_artifact};
use crate::error::{RecordError, Result};
use crate::signals::{FLUSH_SIGNAL, KILL_SIGNAL, STOP_SIGNAL};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{getpid, Pid};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Creates recorder processes
pub trait WorkerSpawner {
    /// Start a recorder for `cpu` appending to `artifact`
    ///
    /// Returns once the recorder is capturing, or fails if it could not be
    /// started at all.
    fn spawn(&mut self, cpu: usize, artifact: &Path) -> io::Result<Pid>;
}

/// Where a recorder is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running(Pid),
    /// Reaped; its artifact is complete and still on disk
    Stopped,
}

/// One per-CPU recorder
#[derive(Debug, Clone)]
pub struct Worker {
    cpu: usize,
    artifact: PathBuf,
    state: WorkerState,
}

impl Worker {
    fn new(cpu: usize, artifact: PathBuf) -> Self {
        Self {
            cpu,
            artifact,
            state: WorkerState::NotStarted,
        }
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn pid(&self) -> Option<Pid> {
        match self.state {
            WorkerState::Running(pid) => Some(pid),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, WorkerState::Running(_))
    }
}

/// Send `signal` to `pid`, treating a vanished process as already stopped
///
/// Returns whether the signal was delivered.
fn deliver(pid: Pid, signal: Signal) -> Result<bool> {
    match kill(pid, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => {
            tracing::debug!(%pid, ?signal, "recorder already gone");
            Ok(false)
        }
        Err(source) => Err(RecordError::Signal { pid, source }),
    }
}

/// Block until `pid` has exited and been reaped
///
/// Returns the exit code of a recorder that reported failure; its artifact
/// may be truncated.
fn reap(pid: Pid) -> Result<Option<i32>> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, 0)) => return Ok(None),
            Ok(WaitStatus::Exited(_, code)) => {
                tracing::warn!(%pid, code, "recorder exited with failure status");
                return Ok(Some(code));
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                tracing::debug!(%pid, ?signal, "recorder terminated by signal");
                return Ok(None);
            }
            // Stopped/continued notifications are not exits
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return Ok(None),
            Err(source) => return Err(RecordError::Reap { pid, source }),
        }
    }
}

/// Coordinates the per-CPU recorders of one capture
pub struct RecorderManager<S: WorkerSpawner> {
    spawner: S,
    workers: Vec<Worker>,
    finished: Arc<AtomicBool>,
    owner: Pid,
    incomplete: Vec<usize>,
}

impl<S: WorkerSpawner> RecorderManager<S> {
    pub fn new(spawner: S, finished: Arc<AtomicBool>) -> Self {
        Self {
            spawner,
            workers: Vec::new(),
            finished,
            owner: getpid(),
            incomplete: Vec::new(),
        }
    }

    /// Workers ordered by CPU
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn running_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }

    /// CPUs whose recorder exited with a failure status at the last stop
    pub fn incomplete_cpus(&self) -> &[usize] {
        &self.incomplete
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Mark the session finished, as Ctrl-C does
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    /// Start one recorder per CPU in `[0, cpu_count)`
    ///
    /// On failure every recorder already started is killed and all
    /// artifacts are removed before the error is returned.
    pub fn start_all(&mut self, cpu_count: usize, output: &Path) -> Result<&[Worker]> {
        if !self.workers.is_empty() {
            self.kill_all();
        }
        self.incomplete.clear();
        self.workers = (0..cpu_count)
            .map(|cpu| Worker::new(cpu, artifact_path(output, cpu)))
            .collect();

        for index in 0..self.workers.len() {
            let cpu = self.workers[index].cpu;
            let spawned = self.spawner.spawn(cpu, &self.workers[index].artifact);
            match spawned {
                Ok(pid) => {
                    tracing::info!(cpu, %pid, "recorder started");
                    self.workers[index].state = WorkerState::Running(pid);
                }
                Err(source) => {
                    tracing::warn!(cpu, error = %source, "recorder failed to start");
                    self.kill_all();
                    return Err(RecordError::Spawn { cpu, source });
                }
            }
        }
        Ok(&self.workers)
    }

    /// Ask every running recorder to drain now; does not wait
    ///
    /// Returns how many recorders were signaled.
    pub fn flush_all(&mut self) -> Result<usize> {
        let mut signaled = 0;
        for worker in &self.workers {
            if let Some(pid) = worker.pid() {
                if deliver(pid, FLUSH_SIGNAL)? {
                    signaled += 1;
                }
            }
        }
        Ok(signaled)
    }

    /// Stop every running recorder and wait for each to exit
    pub fn stop_all(&mut self) -> Result<()> {
        for worker in &mut self.workers {
            let Some(pid) = worker.pid() else { continue };
            deliver(pid, STOP_SIGNAL)?;
            if reap(pid)?.is_some() {
                self.incomplete.push(worker.cpu);
            }
            tracing::info!(cpu = worker.cpu, %pid, "recorder stopped");
            worker.state = WorkerState::Stopped;
        }
        Ok(())
    }

    /// Forcefully kill running recorders and remove every artifact
    ///
    /// Best effort: failures are logged, never returned. Unflushed data is
    /// lost.
    pub fn kill_all(&mut self) {
        for worker in &mut self.workers {
            if let Some(pid) = worker.pid() {
                match kill(pid, KILL_SIGNAL) {
                    Ok(()) | Err(Errno::ESRCH) => {
                        if let Err(e) = reap(pid) {
                            tracing::warn!(%pid, error = %e, "failed to reap killed recorder");
                        }
                        tracing::info!(cpu = worker.cpu, %pid, "recorder killed");
                    }
                    Err(e) => tracing::warn!(%pid, error = %e, "failed to kill recorder"),
                }
            }
            if let Err(e) = destroy_artifact(&worker.artifact) {
                tracing::warn!(path = %worker.artifact.display(), error = %e, "failed to remove artifact");
            }
            worker.state = WorkerState::NotStarted;
        }
    }

    /// Remove the artifacts of stopped recorders
    ///
    /// Running recorders still own their artifact and are left alone.
    /// Returns how many artifacts were removed.
    pub fn cleanup_artifacts(&mut self) -> Result<usize> {
        let mut removed = 0;
        for worker in &mut self.workers {
            match worker.state {
                WorkerState::Stopped => {
                    destroy_artifact(&worker.artifact).map_err(|source| {
                        RecordError::Cleanup {
                            path: worker.artifact.clone(),
                            source,
                        }
                    })?;
                    worker.state = WorkerState::NotStarted;
                    removed += 1;
                }
                WorkerState::Running(pid) => {
                    tracing::warn!(cpu = worker.cpu, %pid, "not removing artifact of a running recorder");
                }
                WorkerState::NotStarted => {}
            }
        }
        Ok(removed)
    }

    fn needs_teardown(&self) -> bool {
        self.workers
            .iter()
            .any(|w| w.state != WorkerState::NotStarted)
    }
}

impl<S: WorkerSpawner> Drop for RecorderManager<S> {
    fn drop(&mut self) {
        // A forked recorder carries a copy of the manager; only the owner tears down
        if getpid() != self.owner || !self.needs_teardown() {
            return;
        }
        tracing::warn!("tearing down recorders");
        self.kill_all();
    }
}
