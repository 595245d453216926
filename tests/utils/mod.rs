// Integration Test Utilities
//
// Stand-in recorders and a fake tracefs tree for exercising the manager
// and sessions without a kernel trace facility.

#![allow(dead_code)]

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::io;
use std::path::{Path, PathBuf};
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::{Arc, Mutex};
use tracerec::control::Tracefs;
use tracerec::manager::WorkerSpawner;

/// Spawns `sleep` processes as recorders
///
/// Each recorder creates its (empty) artifact, ignores the flush signal and
/// dies on the stop signal, like a recorder with nothing to drain.
#[derive(Debug, Default)]
pub struct SleepSpawner {
    /// CPU whose spawn fails with `EACCES`
    pub fail_at: Option<usize>,
    /// Every pid handed out, shared so tests can inspect it after a move
    pub spawned: Arc<Mutex<Vec<Pid>>>,
}

impl SleepSpawner {
    pub fn failing_at(cpu: usize) -> Self {
        Self {
            fail_at: Some(cpu),
            spawned: Arc::default(),
        }
    }
}

impl WorkerSpawner for SleepSpawner {
    fn spawn(&mut self, cpu: usize, artifact: &Path) -> io::Result<Pid> {
        if self.fail_at == Some(cpu) {
            return Err(io::Error::from_raw_os_error(libc::EACCES));
        }
        std::fs::File::create(artifact)?;
        let mut command = Command::new("sleep");
        command.arg("30");
        // SAFETY: only calls async-signal-safe signal(2) before exec
        unsafe {
            command.pre_exec(|| {
                libc::signal(libc::SIGUSR1, libc::SIG_IGN);
                Ok(())
            });
        }
        let child = command.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        self.spawned.lock().unwrap().push(pid);
        Ok(pid)
    }
}

/// Spawns recorders that exit with status 3 right away, like one whose
/// drain failed
#[derive(Debug, Default)]
pub struct FailingRecorderSpawner;

impl WorkerSpawner for FailingRecorderSpawner {
    fn spawn(&mut self, _cpu: usize, artifact: &Path) -> io::Result<Pid> {
        std::fs::write(artifact, b"partial")?;
        let mut command = Command::new("sh");
        command.args(["-c", "exit 3"]);
        // Ignore the stop signal so the exit status is always 3
        // SAFETY: only calls async-signal-safe signal(2) before exec
        unsafe {
            command.pre_exec(|| {
                libc::signal(libc::SIGINT, libc::SIG_IGN);
                Ok(())
            });
        }
        let child = command.spawn()?;
        Ok(Pid::from_raw(child.id() as i32))
    }
}

/// Spawns no processes; panics if asked to
#[derive(Debug, Default)]
pub struct ForbiddenSpawner;

impl WorkerSpawner for ForbiddenSpawner {
    fn spawn(&mut self, cpu: usize, _artifact: &Path) -> io::Result<Pid> {
        panic!("recorder for CPU {} must not be spawned", cpu);
    }
}

/// True while `pid` exists, including as an unreaped zombie
pub fn process_exists(pid: Pid) -> bool {
    !matches!(kill(pid, None), Err(Errno::ESRCH))
}

/// A tracefs tree with the control files a session touches
pub fn fake_tracefs(root: &Path, cpus: usize) -> Tracefs {
    std::fs::create_dir_all(root.join("events")).unwrap();
    for name in [
        "tracing_on",
        "current_tracer",
        "trace_options",
        "set_event",
        "tracing_max_latency",
        "events/enable",
    ] {
        std::fs::write(root.join(name), "").unwrap();
    }
    std::fs::write(root.join("trace"), "# tracer: nop\n#\n").unwrap();
    std::fs::write(root.join("available_events"), "sched:sched_switch\nirq:irq_handler_entry\n")
        .unwrap();
    std::fs::write(root.join("available_tracers"), "function nop irqsoff\n").unwrap();
    for cpu in 0..cpus {
        let dir = root.join(format!("per_cpu/cpu{}", cpu));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stats"), format!("entries: {}\n", cpu)).unwrap();
    }
    Tracefs::at(root)
}

/// Names of files in `dir`, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Paths in `dir` that look like per-CPU artifacts
pub fn artifacts_in(dir: &Path) -> Vec<PathBuf> {
    file_names(dir)
        .into_iter()
        .filter(|name| name.contains(".cpu"))
        .map(|name| dir.join(name))
        .collect()
}
