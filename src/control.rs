//! Trace control plane over tracefs
//!
//! The kernel exposes ftrace configuration as a directory of text files.
//! [`TraceControl`] is the narrow surface the recorder needs from it and
//! [`Tracefs`] implements it over a real (or fake) directory tree.

use crate::error::{RecordError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const TRACING_ON: &str = "tracing_on";
const CURRENT_TRACER: &str = "current_tracer";
const TRACE_OPTIONS: &str = "trace_options";
const SET_EVENT: &str = "set_event";
const EVENTS_ENABLE: &str = "events/enable";
const TRACE: &str = "trace";
const MAX_LATENCY: &str = "tracing_max_latency";
const AVAILABLE_EVENTS: &str = "available_events";
const AVAILABLE_TRACERS: &str = "available_tracers";

/// Well-known tracefs mount points, checked before `/proc/mounts`
const DEFAULT_TRACING_DIRS: &[&str] = &["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

/// Sysctl controlling the function tracer on older kernels
pub const FTRACE_SYSCTL: &str = "/proc/sys/kernel/ftrace_enabled";

/// Name that selects every event at once
pub const ALL_EVENTS: &str = "all";

/// Catalogues the control plane can list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Events,
    Plugins,
    Options,
}

impl Listing {
    fn file(self) -> &'static str {
        match self {
            Listing::Events => AVAILABLE_EVENTS,
            Listing::Plugins => AVAILABLE_TRACERS,
            Listing::Options => TRACE_OPTIONS,
        }
    }
}

/// Operations the recorder performs against the kernel trace facility
pub trait TraceControl {
    /// Enable one event (`subsystem:name`, `name`) or [`ALL_EVENTS`]
    fn enable_event(&self, name: &str) -> Result<()>;

    /// Disable one event or [`ALL_EVENTS`]
    fn disable_event(&self, name: &str) -> Result<()>;

    /// Select the active tracer plugin
    fn select_plugin(&self, name: &str) -> Result<()>;

    /// Write a raw trace option token (`opt` or `noopt`)
    fn set_option(&self, option: &str) -> Result<()>;

    fn tracing_on(&self) -> Result<()>;

    fn tracing_off(&self) -> Result<()>;

    /// True while the trace log still holds undelivered (non-comment) lines
    fn is_live(&self) -> Result<bool>;

    /// Zero the recorded maximum latency
    fn reset_max_latency(&self) -> Result<()>;

    /// Truncate the trace log
    fn clear_trace(&self) -> Result<()>;

    /// Raw contents of one of the `available_*` catalogues
    fn read_listing(&self, listing: Listing) -> Result<String>;

    /// Ring buffer statistics for one CPU, if the kernel exposes them
    fn cpu_stats(&self, cpu: usize) -> Result<Option<String>>;

    /// Turn tracing off and return the facility to a blank state
    fn disable_all(&self) -> Result<()> {
        self.tracing_off()?;
        self.select_plugin("nop")?;
        self.disable_event(ALL_EVENTS)?;
        self.clear_trace()
    }
}

/// A tracefs directory
#[derive(Debug, Clone)]
pub struct Tracefs {
    root: PathBuf,
}

impl Tracefs {
    /// Use an explicit tracing directory
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Locate the tracing directory on this system
    pub fn discover() -> Result<Self> {
        for dir in DEFAULT_TRACING_DIRS {
            let dir = Path::new(dir);
            if dir.join(TRACE).exists() {
                tracing::debug!(dir = %dir.display(), "found tracing dir");
                return Ok(Self::at(dir));
            }
        }

        let mounts = std::fs::read_to_string("/proc/mounts")
            .map_err(|e| RecordError::control("reading", "/proc/mounts", e))?;
        find_in_mounts(&mounts)
            .map(Self::at)
            .ok_or(RecordError::TracingDirNotFound)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a control file below the tracing directory
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Raw per-CPU buffer channel
    pub fn cpu_pipe(&self, cpu: usize) -> PathBuf {
        self.root.join(format!("per_cpu/cpu{}/trace_pipe_raw", cpu))
    }

    fn write(&self, name: &str, value: &str) -> Result<()> {
        let path = self.path(name);
        tracing::trace!(path = %path.display(), value, "write");
        let mut file =
            File::create(&path).map_err(|e| RecordError::control("writing to", &path, e))?;
        file.write_all(value.as_bytes())
            .map_err(|e| RecordError::control("writing to", &path, e))
    }

    fn append(&self, name: &str, value: &str) -> Result<()> {
        let path = self.path(name);
        tracing::trace!(path = %path.display(), value, "append");
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| RecordError::control("writing to", &path, e))?;
        file.write_all(value.as_bytes())
            .map_err(|e| RecordError::control("bad event in", &path, e))
    }

    fn read(&self, name: &str) -> Result<String> {
        let path = self.path(name);
        std::fs::read_to_string(&path).map_err(|e| RecordError::control("reading", &path, e))
    }

    /// The bulk `events/enable` knob is absent on older kernels
    fn has_bulk_enable(&self) -> bool {
        self.path(EVENTS_ENABLE).exists()
    }
}

impl TraceControl for Tracefs {
    fn enable_event(&self, name: &str) -> Result<()> {
        tracing::info!(event = name, "enable");
        if name == ALL_EVENTS {
            if self.has_bulk_enable() {
                return self.write(EVENTS_ENABLE, "1");
            }
            return self.write(SET_EVENT, "*:*\n");
        }
        self.append(SET_EVENT, &format!("{}\n", name))
    }

    fn disable_event(&self, name: &str) -> Result<()> {
        tracing::info!(event = name, "disable");
        if name == ALL_EVENTS {
            if self.has_bulk_enable() {
                return self.write(EVENTS_ENABLE, "0");
            }
            return self.write(SET_EVENT, "\n");
        }
        self.append(SET_EVENT, &format!("!{}\n", name))
    }

    fn select_plugin(&self, name: &str) -> Result<()> {
        self.write(CURRENT_TRACER, name)
    }

    fn set_option(&self, option: &str) -> Result<()> {
        self.write(TRACE_OPTIONS, option)
    }

    fn tracing_on(&self) -> Result<()> {
        self.write(TRACING_ON, "1")
    }

    fn tracing_off(&self) -> Result<()> {
        self.write(TRACING_ON, "0")
    }

    fn is_live(&self) -> Result<bool> {
        let path = self.path(TRACE);
        let file = File::open(&path).map_err(|e| RecordError::control("reading", &path, e))?;
        // Task names and marker payloads are arbitrary bytes, so stay off str
        for line in BufReader::new(file).split(b'\n') {
            let line = line.map_err(|e| RecordError::control("reading", &path, e))?;
            if line.first() != Some(&b'#') {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn reset_max_latency(&self) -> Result<()> {
        self.write(MAX_LATENCY, "0")
    }

    fn clear_trace(&self) -> Result<()> {
        self.write(TRACE, "0")
    }

    fn read_listing(&self, listing: Listing) -> Result<String> {
        self.read(listing.file())
    }

    fn cpu_stats(&self, cpu: usize) -> Result<Option<String>> {
        let path = self.root.join(format!("per_cpu/cpu{}/stats", cpu));
        match std::fs::read_to_string(&path) {
            Ok(stats) => Ok(Some(stats)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RecordError::control("reading", &path, e)),
        }
    }
}

/// Find a tracefs (or debugfs) mount in `/proc/mounts` contents
fn find_in_mounts(mounts: &str) -> Option<PathBuf> {
    let mut debugfs = None;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_dev), Some(mount_point), Some(fs_type)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        match fs_type {
            "tracefs" => return Some(PathBuf::from(mount_point)),
            "debugfs" if debugfs.is_none() => {
                debugfs = Some(Path::new(mount_point).join("tracing"));
            }
            _ => {}
        }
    }
    debugfs
}

/// Toggle the function tracer sysctl at `path`
///
/// Returns `Ok(false)` when the knob does not exist, which only means the
/// kernel has no function tracer to toggle.
pub fn set_ftrace(path: &Path, enable: bool) -> Result<bool> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "ftrace sysctl absent");
        return Ok(false);
    }
    let action = if enable { "Can't enable ftrace" } else { "Can't disable ftrace" };
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| RecordError::control(action, path, e))?;
    file.write_all(if enable { b"1" } else { b"0" })
        .map_err(|e| RecordError::control(action, path, e))?;
    Ok(true)
}
