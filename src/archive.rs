//! Archive writer interface
//!
//! Assembly only needs two entry points: one that combines per-CPU captures
//! and one for latency tracers, which keep a single consolidated buffer.
//! [`ContainerWriter`] is the writer the command line tool ships with.
//!
//! # Container layout
//!
//! ```text
//! magic      8 bytes  "TRCREC\0\x01"
//! mode       u8       0 = per-CPU, 1 = latency
//! cpus       u32 LE
//! sections   per-CPU: one per CPU in CPU order; latency: one
//!   length   u64 LE
//!   payload  length bytes
//! ```

use crate::control::Tracefs;
use crate::error::{RecordError, Result};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const MAGIC: &[u8; 8] = b"TRCREC\0\x01";

const MODE_PER_CPU: u8 = 0;
const MODE_LATENCY: u8 = 1;

/// An archive that has been written but not yet finalized
pub trait ArchiveHandle {
    /// Flush and finalize the archive
    fn close(self) -> Result<()>;
}

/// Encodes captures into an archive file
pub trait ArchiveWriter {
    type Handle: ArchiveHandle;

    /// Combine per-CPU captures; position in `cpu_files` is the CPU number
    fn write_archive(&self, output: &Path, cpu_files: &[PathBuf]) -> Result<Self::Handle>;

    /// Save the consolidated buffer of a latency tracer
    fn write_latency_archive(&self, output: &Path, cpu_count: usize) -> Result<Self::Handle>;
}

/// Writes the container layout described in the module docs
#[derive(Debug, Clone)]
pub struct ContainerWriter {
    tracefs: Tracefs,
}

impl ContainerWriter {
    /// Latency archives read the consolidated `trace` file below `tracefs`
    pub fn new(tracefs: Tracefs) -> Self {
        Self { tracefs }
    }

    fn create(output: &Path, mode: u8, cpus: usize) -> io::Result<BufWriter<File>> {
        let mut out = BufWriter::new(File::create(output)?);
        out.write_all(MAGIC)?;
        out.write_all(&[mode])?;
        let cpus = u32::try_from(cpus)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many CPUs"))?;
        out.write_all(&cpus.to_le_bytes())?;
        Ok(out)
    }

    fn section(out: &mut BufWriter<File>, input: &Path) -> io::Result<()> {
        let mut file = File::open(input)?;
        let len = file.metadata()?.len();
        out.write_all(&len.to_le_bytes())?;
        let copied = io::copy(&mut (&mut file).take(len), out)?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} shrank while archiving", input.display()),
            ));
        }
        Ok(())
    }
}

/// A container file awaiting [`ArchiveHandle::close`]
#[derive(Debug)]
pub struct ContainerHandle {
    path: PathBuf,
    out: BufWriter<File>,
}

impl ContainerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArchiveHandle for ContainerHandle {
    fn close(self) -> Result<()> {
        let path = self.path;
        let wrap = |source| RecordError::ArchiveWrite {
            path: path.clone(),
            source,
        };
        let file = self.out.into_inner().map_err(|e| wrap(e.into_error()))?;
        file.sync_all().map_err(wrap)?;
        tracing::debug!(path = %path.display(), "archive closed");
        Ok(())
    }
}

impl ArchiveWriter for ContainerWriter {
    type Handle = ContainerHandle;

    fn write_archive(&self, output: &Path, cpu_files: &[PathBuf]) -> Result<ContainerHandle> {
        let write = || -> io::Result<BufWriter<File>> {
            let mut out = Self::create(output, MODE_PER_CPU, cpu_files.len())?;
            for file in cpu_files {
                Self::section(&mut out, file)?;
            }
            Ok(out)
        };
        let out = write().map_err(|source| RecordError::ArchiveWrite {
            path: output.to_path_buf(),
            source,
        })?;
        Ok(ContainerHandle {
            path: output.to_path_buf(),
            out,
        })
    }

    fn write_latency_archive(&self, output: &Path, cpu_count: usize) -> Result<ContainerHandle> {
        let trace = self.tracefs.path("trace");
        let write = || -> io::Result<BufWriter<File>> {
            // tracefs files report a size of zero, so read it whole
            let data = std::fs::read(&trace)?;
            let mut out = Self::create(output, MODE_LATENCY, cpu_count)?;
            out.write_all(&(data.len() as u64).to_le_bytes())?;
            out.write_all(&data)?;
            Ok(out)
        };
        let out = write().map_err(|source| RecordError::ArchiveWrite {
            path: output.to_path_buf(),
            source,
        })?;
        Ok(ContainerHandle {
            path: output.to_path_buf(),
            out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn header(bytes: &[u8]) -> (u8, u32) {
        assert_eq!(&bytes[..8], MAGIC);
        let cpus = u32::from_le_bytes(bytes[9..13].try_into().unwrap());
        (bytes[8], cpus)
    }

    #[test]
    fn test_per_cpu_sections_follow_input_order() {
        let dir = TempDir::new().unwrap();
        let cpu0 = dir.path().join("t.dat.cpu0");
        let cpu1 = dir.path().join("t.dat.cpu1");
        std::fs::write(&cpu0, b"aa").unwrap();
        std::fs::write(&cpu1, b"bbb").unwrap();
        let output = dir.path().join("t.dat");

        let writer = ContainerWriter::new(Tracefs::at(dir.path()));
        writer
            .write_archive(&output, &[cpu0, cpu1])
            .unwrap()
            .close()
            .unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(header(&bytes), (MODE_PER_CPU, 2));
        let body = &bytes[13..];
        assert_eq!(&body[..8], &2u64.to_le_bytes());
        assert_eq!(&body[8..10], b"aa");
        assert_eq!(&body[10..18], &3u64.to_le_bytes());
        assert_eq!(&body[18..], b"bbb");
    }

    #[test]
    fn test_empty_capture_still_yields_sections() {
        let dir = TempDir::new().unwrap();
        let cpu0 = dir.path().join("t.dat.cpu0");
        std::fs::write(&cpu0, b"").unwrap();
        let output = dir.path().join("t.dat");

        let writer = ContainerWriter::new(Tracefs::at(dir.path()));
        writer.write_archive(&output, &[cpu0]).unwrap().close().unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(bytes.len(), 13 + 8);
    }

    #[test]
    fn test_latency_archive_copies_trace_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("trace"), "# tracer: irqsoff\nlatency\n").unwrap();
        let output = dir.path().join("lat.dat");

        let writer = ContainerWriter::new(Tracefs::at(dir.path()));
        writer
            .write_latency_archive(&output, 4)
            .unwrap()
            .close()
            .unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(header(&bytes), (MODE_LATENCY, 4));
        assert!(bytes.ends_with(b"latency\n"));
    }

    #[test]
    fn test_missing_cpu_file_is_archive_write_error() {
        let dir = TempDir::new().unwrap();
        let writer = ContainerWriter::new(Tracefs::at(dir.path()));
        let err = writer
            .write_archive(&dir.path().join("t.dat"), &[dir.path().join("t.dat.cpu0")])
            .unwrap_err();
        assert!(matches!(err, RecordError::ArchiveWrite { .. }));
    }
}
