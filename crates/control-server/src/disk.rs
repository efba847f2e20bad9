//! Free space on the clip storage filesystem

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::debug;

/// Reported when the filesystem cannot be queried
pub const FALLBACK_FREE_MB: u64 = 1024;

/// Free megabytes available to unprivileged writers at `path`
pub fn storage_free_mb(path: &Path) -> u64 {
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return FALLBACK_FREE_MB;
    };

    // SAFETY: c_path is NUL-terminated and stat is a plain out-parameter
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        debug!("statvfs({}) failed, reporting fallback", path.display());
        return FALLBACK_FREE_MB;
    }

    let bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
    bytes / (1024 * 1024)
}
