//! Signal plumbing between the manager and its recorders
//!
//! Handlers only store into atomics. The manager's interrupt handler marks
//! the session finished; a recorder's handlers raise its stop and flush
//! requests. Everything else observes those flags from ordinary code.

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Asks a recorder to do a final drain and exit
pub const STOP_SIGNAL: Signal = Signal::SIGINT;

/// Asks a recorder to drain its buffer now
pub const FLUSH_SIGNAL: Signal = Signal::SIGUSR1;

/// Forced teardown on the fatal path
pub const KILL_SIGNAL: Signal = Signal::SIGKILL;

static FINISHED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

static WORKER_STOP: AtomicBool = AtomicBool::new(false);
static WORKER_FLUSH: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_: libc::c_int) {
    if let Some(flag) = FINISHED.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

extern "C" fn on_stop(_: libc::c_int) {
    WORKER_STOP.store(true, Ordering::SeqCst);
}

extern "C" fn on_flush(_: libc::c_int) {
    WORKER_FLUSH.store(true, Ordering::SeqCst);
}

fn install(signal: Signal, handler: extern "C" fn(libc::c_int)) -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handlers only perform atomic stores
    unsafe { sigaction(signal, &action) }?;
    Ok(())
}

/// Route Ctrl-C in the manager process to `finished`
///
/// Only the first registered flag is ever set; later calls keep the
/// first flag and return `Ok(false)`.
pub fn install_interrupt_handler(finished: Arc<AtomicBool>) -> nix::Result<bool> {
    let registered = FINISHED.set(finished).is_ok();
    install(Signal::SIGINT, on_interrupt)?;
    Ok(registered)
}

/// Stop and flush requests delivered to a recorder
#[derive(Debug, Clone, Copy)]
pub struct WorkerFlags<'a> {
    stop: &'a AtomicBool,
    flush: &'a AtomicBool,
}

impl<'a> WorkerFlags<'a> {
    pub fn new(stop: &'a AtomicBool, flush: &'a AtomicBool) -> Self {
        Self { stop, flush }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Consume a pending flush request
    pub fn take_flush(&self) -> bool {
        self.flush.swap(false, Ordering::SeqCst)
    }

    /// True when either request is pending, without consuming it
    pub fn pending(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.flush.load(Ordering::SeqCst)
    }
}

impl WorkerFlags<'static> {
    /// Flags set by this process's stop and flush handlers
    pub fn process() -> Self {
        Self::new(&WORKER_STOP, &WORKER_FLUSH)
    }
}

/// Install the recorder-side handlers, clearing any stale requests
pub fn install_worker_handlers() -> nix::Result<WorkerFlags<'static>> {
    WORKER_STOP.store(false, Ordering::SeqCst);
    WORKER_FLUSH.store(false, Ordering::SeqCst);
    install(STOP_SIGNAL, on_stop)?;
    install(FLUSH_SIGNAL, on_flush)?;
    Ok(WorkerFlags::process())
}
