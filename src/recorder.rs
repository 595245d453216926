//! Raw per-CPU buffer copying
//!
//! A [`BufferSource`] lives inside a worker process and moves whatever the
//! kernel has buffered for one CPU into that worker's artifact.

use crate::control::Tracefs;
use nix::fcntl::OFlag;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

const COPY_CHUNK: usize = 64 * 1024;

/// One drain-able stream of raw trace data
pub trait BufferSource {
    /// Copy everything currently available, returning the bytes moved
    ///
    /// Zero means nothing new; it is not end of stream.
    fn drain(&mut self) -> io::Result<u64>;
}

/// Opens the [`BufferSource`] for a CPU inside a freshly spawned worker
pub trait RecorderFactory {
    type Source: BufferSource;

    fn open(&self, cpu: usize, artifact: &Path) -> io::Result<Self::Source>;
}

/// Copies a readable channel into an artifact file
///
/// The channel is opened non-blocking so a drain pass stops at `EAGAIN`
/// instead of parking the worker inside `read`.
#[derive(Debug)]
pub struct ChannelCopier {
    input: File,
    output: File,
    buf: Vec<u8>,
}

impl ChannelCopier {
    /// Open `channel` for reading and create (truncate) `artifact`
    pub fn open(channel: &Path, artifact: &Path) -> io::Result<Self> {
        let input = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(channel)?;
        let output = File::create(artifact)?;
        Ok(Self {
            input,
            output,
            buf: vec![0; COPY_CHUNK],
        })
    }
}

impl BufferSource for ChannelCopier {
    fn drain(&mut self) -> io::Result<u64> {
        let mut total = 0u64;
        loop {
            match self.input.read(&mut self.buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.output.write_all(&self.buf[..n])?;
                    total += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if total > 0 {
            self.output.flush()?;
        }
        Ok(total)
    }
}

/// Reads `per_cpu/cpu<N>/trace_pipe_raw` under a tracefs root
#[derive(Debug, Clone)]
pub struct PerCpuPipes {
    tracefs: Tracefs,
}

impl PerCpuPipes {
    pub fn new(tracefs: Tracefs) -> Self {
        Self { tracefs }
    }

    pub fn channel(&self, cpu: usize) -> PathBuf {
        self.tracefs.cpu_pipe(cpu)
    }
}

impl RecorderFactory for PerCpuPipes {
    type Source = ChannelCopier;

    fn open(&self, cpu: usize, artifact: &Path) -> io::Result<ChannelCopier> {
        ChannelCopier::open(&self.channel(cpu), artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copier_moves_channel_bytes() {
        let dir = TempDir::new().unwrap();
        let channel = dir.path().join("trace_pipe_raw");
        let artifact = dir.path().join("trace.dat.cpu0");
        std::fs::write(&channel, b"page-of-raw-events").unwrap();

        let mut copier = ChannelCopier::open(&channel, &artifact).unwrap();
        assert_eq!(copier.drain().unwrap(), 18);
        // Regular files report EOF, which is "nothing new", not an error
        assert_eq!(copier.drain().unwrap(), 0);
        assert_eq!(std::fs::read(&artifact).unwrap(), b"page-of-raw-events");
    }

    #[test]
    fn test_copier_missing_channel_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let err = ChannelCopier::open(
            &dir.path().join("missing"),
            &dir.path().join("trace.dat.cpu0"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_per_cpu_pipes_channel_layout() {
        let pipes = PerCpuPipes::new(Tracefs::at("/sys/kernel/tracing"));
        assert_eq!(
            pipes.channel(2),
            PathBuf::from("/sys/kernel/tracing/per_cpu/cpu2/trace_pipe_raw")
        );
    }

    #[test]
    fn test_per_cpu_pipes_open_creates_artifact() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("per_cpu/cpu0")).unwrap();
        std::fs::write(dir.path().join("per_cpu/cpu0/trace_pipe_raw"), b"xy").unwrap();
        let artifact = dir.path().join("out.dat.cpu0");

        let pipes = PerCpuPipes::new(Tracefs::at(dir.path()));
        let mut source = pipes.open(0, &artifact).unwrap();
        assert!(artifact.exists());
        assert_eq!(source.drain().unwrap(), 2);
    }
}
