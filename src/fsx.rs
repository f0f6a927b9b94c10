// Cross-platform filesystem shim used throughout basewarden.
//
// Thin wrapper around `std::fs` for the bits that differ between Unix and
// Windows: POSIX permission bits have no Windows equivalent, so on non-Unix
// targets these become no-ops rather than compile errors.

use std::io;
use std::path::Path;

/// Return POSIX mode bits if available (Unix), otherwise 0.
#[inline]
pub fn unix_mode(meta: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        0
    }
}

/// Return Some(mode) on Unix, None on non-Unix.
#[inline]
pub fn maybe_unix_mode(meta: &std::fs::Metadata) -> Option<u32> {
    #[cfg(unix)]
    {
        Some(unix_mode(meta))
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        None
    }
}

#[cfg(unix)]
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
#[inline]
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
