//! Archive assembly
//!
//! Turns the artifacts of a finished capture into one archive. The request
//! is built only after every recorder has been reaped, so no artifact is
//! still being appended to when it is read.

use crate::archive::{ArchiveHandle, ArchiveWriter};
use crate::error::{RecordError, Result};
use crate::manager::{Worker, WorkerState};
use std::path::{Path, PathBuf};

/// Plugins whose output is one consolidated buffer instead of per-CPU data
pub const LATENCY_PLUGINS: &[&str] = &["irqsoff", "preemptoff", "preemptirqsoff", "wakeup", "wakeup_rt"];

pub fn is_latency_plugin(plugin: &str) -> bool {
    LATENCY_PLUGINS.contains(&plugin)
}

/// One per-CPU capture file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuArtifact {
    pub cpu: usize,
    pub path: PathBuf,
}

/// What to write and from where
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveRequest {
    Latency {
        output: PathBuf,
        cpu_count: usize,
    },
    PerCpu {
        output: PathBuf,
        artifacts: Vec<CpuArtifact>,
    },
}

impl ArchiveRequest {
    pub fn latency(output: impl Into<PathBuf>, cpu_count: usize) -> Self {
        ArchiveRequest::Latency {
            output: output.into(),
            cpu_count,
        }
    }

    /// Collect the artifacts of stopped recorders in CPU order
    ///
    /// Workers that never ran contribute nothing.
    pub fn from_workers(output: impl Into<PathBuf>, workers: &[Worker]) -> Self {
        let mut artifacts: Vec<CpuArtifact> = workers
            .iter()
            .filter(|w| w.state() == WorkerState::Stopped)
            .map(|w| CpuArtifact {
                cpu: w.cpu(),
                path: w.artifact().to_path_buf(),
            })
            .collect();
        artifacts.sort_by_key(|a| a.cpu);
        ArchiveRequest::PerCpu {
            output: output.into(),
            artifacts,
        }
    }

    pub fn output(&self) -> &Path {
        match self {
            ArchiveRequest::Latency { output, .. } | ArchiveRequest::PerCpu { output, .. } => {
                output
            }
        }
    }
}

/// The writer maps array position to CPU number, so positions must match
fn check_order(artifacts: &[CpuArtifact]) -> Result<()> {
    for (position, artifact) in artifacts.iter().enumerate() {
        if artifact.cpu != position {
            return Err(RecordError::ArchiveOrder {
                position,
                cpu: artifact.cpu,
            });
        }
    }
    Ok(())
}

/// Write and finalize the archive described by `request`
pub fn assemble<W: ArchiveWriter + ?Sized>(writer: &W, request: &ArchiveRequest) -> Result<()> {
    let handle = match request {
        ArchiveRequest::Latency { output, cpu_count } => {
            tracing::info!(output = %output.display(), cpu_count, "writing latency archive");
            writer.write_latency_archive(output, *cpu_count)?
        }
        ArchiveRequest::PerCpu { output, artifacts } => {
            check_order(artifacts)?;
            tracing::info!(output = %output.display(), cpus = artifacts.len(), "writing archive");
            let files: Vec<PathBuf> = artifacts.iter().map(|a| a.path.clone()).collect();
            writer.write_archive(output, &files)?
        }
    };
    handle.close()
}
