//! Per-CPU temporary artifact naming
//!
//! Each recorder appends its CPU's raw buffer to `<output>.cpu<N>` next to
//! the final archive. The name depends only on the output name and CPU, so
//! two captures writing the same output share a namespace.

use std::io;
use std::path::{Path, PathBuf};

/// Path of the temporary artifact for `cpu` when capturing into `output`
///
/// # Example
/// ```
/// use tracerec::artifact::artifact_path;
/// use std::path::Path;
///
/// let path = artifact_path(Path::new("trace.dat"), 3);
/// assert_eq!(path, Path::new("trace.dat.cpu3"));
/// ```
pub fn artifact_path(output: &Path, cpu: usize) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(format!(".cpu{}", cpu));
    PathBuf::from(name)
}

/// Remove an artifact, ignoring a file that is already gone
pub fn destroy_artifact(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed artifact");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
