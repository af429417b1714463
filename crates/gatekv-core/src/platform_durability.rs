//! Durable sync primitives
//!
//! `SyncMode::Data` flushes file contents only; `SyncMode::Full` asks the
//! device to drain its own write cache as well, where the platform can.

use std::fs::File;
use std::io;
use std::path::Path;

/// How far a sync call pushes data toward stable media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// File data reaches the device (fdatasync on Linux)
    Data,
    /// File data survives power loss even with a volatile drive cache
    Full,
}

/// Sync `file` according to `mode`. Blocks until the OS reports completion.
///
/// Must not be called while holding a lock readers need.
pub fn durable_sync(file: &File, mode: SyncMode) -> io::Result<()> {
    match mode {
        SyncMode::Data => sync_data(file),
        SyncMode::Full => sync_full(file),
    }
}

#[cfg(target_os = "linux")]
fn sync_data(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the fd comes from a live `File` borrow and stays open for the call.
    let rc = unsafe { libc::fdatasync(file.as_raw_fd()) };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(target_os = "linux"))]
fn sync_data(file: &File) -> io::Result<()> {
    file.sync_data()
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn sync_full(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // plain fsync on Apple platforms stops at the drive cache
    // SAFETY: the fd comes from a live `File` borrow and stays open for the call.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(target_os = "windows")]
fn sync_full(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::FlushFileBuffers;
    // SAFETY: the handle comes from a live `File` borrow.
    let ok = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
    if ok != 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "windows")))]
fn sync_full(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Persist directory entries (new or renamed files) in `dir`.
///
/// No-op on Windows, where directories cannot be opened as files.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}
