//! Error types for trace capture
//!
//! Every failure the recorder can hit maps onto one of these variants. All of
//! them are fatal to a capture session except signal delivery to a process
//! that has already exited, which the manager absorbs before it gets here.

use nix::errno::Errno;
use nix::unistd::Pid;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while configuring, recording or assembling a trace
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("failed to spawn recorder for CPU {cpu}: {source}")]
    Spawn {
        cpu: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} '{}': {source}", path.display())]
    ControlPlane {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run '{program}': {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("can't find tracing dir")]
    TracingDirNotFound,

    #[error("function tracing not configured on this kernel (plugin '{plugin}')")]
    FunctionTracerUnavailable { plugin: String },

    #[error("could not write to file '{}': {source}", path.display())]
    ArchiveWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can't remove '{}': {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("per-CPU artifact at position {position} belongs to CPU {cpu}")]
    ArchiveOrder { position: usize, cpu: usize },

    #[error("failed to signal recorder {pid}: {source}")]
    Signal {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("failed to reap recorder {pid}: {source}")]
    Reap {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("can not read cpuinfo: {0}")]
    CpuDiscovery(#[source] std::io::Error),
}

impl RecordError {
    /// Build a control plane error for a failed read or write of `path`
    pub fn control(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RecordError::ControlPlane {
            op,
            path: path.into(),
            source,
        }
    }

    /// The OS error number behind this failure, if there is one
    pub fn errno(&self) -> Option<i32> {
        match self {
            RecordError::Spawn { source, .. }
            | RecordError::ControlPlane { source, .. }
            | RecordError::ArchiveWrite { source, .. }
            | RecordError::Cleanup { source, .. }
            | RecordError::Command { source, .. }
            | RecordError::CpuDiscovery(source) => source.raw_os_error(),
            RecordError::Signal { source, .. } | RecordError::Reap { source, .. } => {
                Some(*source as i32)
            }
            RecordError::TracingDirNotFound
            | RecordError::FunctionTracerUnavailable { .. }
            | RecordError::ArchiveOrder { .. } => None,
        }
    }
}

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, RecordError>;
