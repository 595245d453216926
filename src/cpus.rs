//! CPU count discovery

use crate::error::{RecordError, Result};

/// Count `processor : N` entries in `/proc/cpuinfo` contents
pub fn count_in_cpuinfo(cpuinfo: &str) -> usize {
    cpuinfo
        .lines()
        .filter_map(|line| line.strip_prefix("processor"))
        .filter(|rest| rest.trim_start().starts_with(':'))
        .count()
}

/// Number of CPUs to record on
///
/// Falls back to the configured processor count when cpuinfo has no
/// `processor` lines (some architectures format it differently).
pub fn count_cpus() -> Result<usize> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").map_err(RecordError::CpuDiscovery)?;
    let counted = count_in_cpuinfo(&cpuinfo);
    if counted > 0 {
        return Ok(counted);
    }

    // SAFETY: sysconf has no preconditions
    let configured = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if configured > 0 {
        return Ok(configured as usize);
    }
    Err(RecordError::CpuDiscovery(std::io::Error::last_os_error()))
}
