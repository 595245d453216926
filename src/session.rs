//! Capture session orchestration
//!
//! Sequences one `record`, `start` or `extract` run: configure the control
//! plane, start the recorders, wait for the capture to end, stop the
//! recorders, assemble the archive and remove the per-CPU artifacts.
//!
//! Any error returned from [`run_session`] has already torn the recorders
//! down, because the [`RecorderManager`] kills them when it is dropped.

use crate::archive::ArchiveWriter;
use crate::assembly::{assemble, is_latency_plugin, ArchiveRequest};
use crate::control::{set_ftrace, TraceControl, FTRACE_SYSCTL};
use crate::error::{RecordError, Result};
use crate::extract::{ExtractionPoller, PollOutcome, DEFAULT_EXTRACT_INTERVAL};
use crate::manager::{RecorderManager, WorkerSpawner};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Default archive name
pub const DEFAULT_OUTPUT: &str = "trace.dat";

/// Default idle time between a recorder's drain passes, in microseconds
pub const DEFAULT_POLL_USECS: u64 = 1000;

/// Plugins that need the function tracer sysctl
const FUNCTION_PLUGINS: &[&str] = &["function", "function_graph"];

/// How often the record loop checks for Ctrl-C
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// One `-e` selection, possibly negated by an earlier `-v`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSelection {
    pub name: String,
    pub negated: bool,
}

impl EventSelection {
    pub fn enable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            negated: false,
        }
    }

    pub fn disable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            negated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Capture until `command` exits, or until Ctrl-C when it is empty
    Record { command: Vec<String> },
    /// Configure and enable tracing, then leave it running
    Start,
    /// Capture what an already running session has buffered
    Extract,
}

/// Everything a session needs, resolved from the command line
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: Mode,
    pub events: Vec<EventSelection>,
    pub plugin: Option<String>,
    pub options: Vec<String>,
    pub disable_function_tracer: bool,
    pub output: PathBuf,
    pub poll_interval: Duration,
    pub extract_interval: Duration,
    pub cpu_count: usize,
    pub ftrace_sysctl: PathBuf,
}

impl SessionConfig {
    pub fn new(mode: Mode, cpu_count: usize) -> Self {
        Self {
            mode,
            events: Vec::new(),
            plugin: None,
            options: Vec::new(),
            disable_function_tracer: false,
            output: PathBuf::from(DEFAULT_OUTPUT),
            poll_interval: Duration::from_micros(DEFAULT_POLL_USECS),
            extract_interval: DEFAULT_EXTRACT_INTERVAL,
            cpu_count,
            ftrace_sysctl: PathBuf::from(FTRACE_SYSCTL),
        }
    }

    /// Latency tracers are captured without per-CPU recorders
    pub fn is_latency(&self) -> bool {
        self.plugin.as_deref().is_some_and(is_latency_plugin)
    }
}

/// Ring buffer statistics reported for one CPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuStats {
    pub cpu: usize,
    pub text: Option<String>,
}

/// Result of a capture that produced (or tried to produce) an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub output: PathBuf,
    pub latency: bool,
    /// False when there were no per-CPU captures to archive
    pub archived: bool,
    pub extract: Option<PollOutcome>,
    /// CPUs whose recorder failed, so their section may be truncated
    pub incomplete: Vec<usize>,
    pub stats: Vec<CpuStats>,
}

/// Enable the positive selections, then apply the negated ones
pub fn apply_events<C: TraceControl + ?Sized>(control: &C, events: &[EventSelection]) -> Result<()> {
    for event in events.iter().filter(|e| !e.negated) {
        control.enable_event(&event.name)?;
    }
    for event in events.iter().filter(|e| e.negated) {
        control.disable_event(&event.name)?;
    }
    Ok(())
}

fn run_command(command: &[String]) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };
    tracing::info!(program, ?args, "running command");
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|source| RecordError::Command {
            program: program.clone(),
            source,
        })?;
    if !status.success() {
        tracing::warn!(program, %status, "command exited unsuccessfully");
    }
    Ok(())
}

fn wait_for_finish<S: WorkerSpawner>(manager: &RecorderManager<S>) {
    while !manager.is_finished() {
        std::thread::sleep(INTERRUPT_POLL);
    }
}

/// Run one session to completion
///
/// Returns `None` for [`Mode::Start`], which leaves tracing running and
/// captures nothing.
pub fn run_session<C, S, W>(
    config: &SessionConfig,
    control: &C,
    spawner: S,
    writer: &W,
    finished: Arc<AtomicBool>,
) -> Result<Option<CaptureSummary>>
where
    C: TraceControl + ?Sized,
    S: WorkerSpawner,
    W: ArchiveWriter + ?Sized,
{
    for option in &config.options {
        control.set_option(option)?;
    }

    let extract = config.mode == Mode::Extract;
    let mut function_tracer = true;
    if !extract {
        function_tracer = set_ftrace(&config.ftrace_sysctl, !config.disable_function_tracer)?;
        control.disable_all()?;
        apply_events(control, &config.events)?;
    }

    let latency = config.is_latency();
    if let Some(plugin) = &config.plugin {
        if !function_tracer && FUNCTION_PLUGINS.contains(&plugin.as_str()) {
            return Err(RecordError::FunctionTracerUnavailable {
                plugin: plugin.clone(),
            });
        }
        if !extract {
            control.select_plugin(plugin)?;
        }
    }

    let mut manager = RecorderManager::new(spawner, finished);
    if config.mode != Mode::Start && !latency {
        manager.start_all(config.cpu_count, &config.output)?;
    }

    let mut extract_outcome = None;
    match &config.mode {
        Mode::Extract => {
            let poller = ExtractionPoller::new(config.extract_interval);
            extract_outcome = Some(poller.run(control, &mut manager)?);
        }
        Mode::Start => {
            control.tracing_on()?;
            if latency {
                control.reset_max_latency()?;
            }
            return Ok(None);
        }
        Mode::Record { command } => {
            control.tracing_on()?;
            if latency {
                control.reset_max_latency()?;
            }
            if command.is_empty() {
                println!("Hit Ctrl^C to stop recording");
                wait_for_finish(&manager);
            } else {
                run_command(command)?;
            }
            control.tracing_off()?;
        }
    }

    manager.stop_all()?;
    let incomplete = manager.incomplete_cpus().to_vec();

    let request = if latency {
        ArchiveRequest::latency(&config.output, config.cpu_count)
    } else {
        ArchiveRequest::from_workers(&config.output, manager.workers())
    };
    let archived = match &request {
        ArchiveRequest::PerCpu { artifacts, .. } if artifacts.is_empty() => {
            tracing::warn!("no per-CPU captures, not writing an archive");
            false
        }
        _ => {
            assemble(writer, &request)?;
            true
        }
    };
    manager.cleanup_artifacts()?;

    let stats = (0..config.cpu_count)
        .map(|cpu| {
            Ok(CpuStats {
                cpu,
                text: control.cpu_stats(cpu)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(CaptureSummary {
        output: config.output.clone(),
        latency,
        archived,
        extract: extract_outcome,
        incomplete,
        stats,
    }))
}
