//! Filesystem boundary
//!
//! The file-storage primitives come from the surrounding kernel. Every call
//! into them, and every console transfer made on behalf of a process, goes
//! through one `FsGate`: a single system-wide lock held for exactly one
//! primitive call, plus the global descriptor counter.
//!
//! # Locking
//! - The gate is never held across a blocking wait on another process
//! - There are no per-file locks

mod fd_table;

use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::Mutex;

pub use fd_table::FdTable;

/// File descriptor number.
pub type Fd = i32;

/// Console input.
pub const STDIN_FILENO: Fd = 0;
/// Console output.
pub const STDOUT_FILENO: Fd = 1;
/// First descriptor handed to an opened file.
pub const FIRST_FILE_FD: Fd = 2;

/// An open file. Dropping the handle closes it.
pub trait File: Send {
    /// Read from the current position. Returns the bytes read.
    fn read(&mut self, buf: &mut [u8]) -> usize;
    /// Write at the current position. Returns the bytes written.
    fn write(&mut self, buf: &[u8]) -> usize;
    /// Move the current position.
    fn seek(&mut self, pos: u32);
    /// Current position.
    fn tell(&self) -> u32;
    /// File length in bytes.
    fn length(&self) -> u32;
    /// Refuse writes to the underlying file until this handle is closed.
    fn deny_write(&mut self);
}

/// File-storage primitives.
pub trait FileSystem: Send + Sync {
    fn open(&self, path: &str) -> Option<Box<dyn File>>;
    fn create(&self, path: &str, initial_size: u32) -> bool;
    fn remove(&self, path: &str) -> bool;
}

/// The global filesystem serialization point.
pub struct FsGate {
    fs: Arc<dyn FileSystem>,
    lock: Mutex<()>,
    next_fd: Mutex<Fd>,
}

impl FsGate {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            lock: Mutex::new(()),
            next_fd: Mutex::new(FIRST_FILE_FD),
        }
    }

    /// Run one filesystem primitive under the global lock.
    pub fn with_fs<R>(&self, op: impl FnOnce(&dyn FileSystem) -> R) -> R {
        let _guard = self.lock.lock();
        op(self.fs.as_ref())
    }

    /// Run one operation on an open file (or the console) under the global lock.
    pub fn locked<R>(&self, op: impl FnOnce() -> R) -> R {
        let _guard = self.lock.lock();
        op()
    }

    /// Close `file` under the global lock.
    pub fn close(&self, file: Box<dyn File>) {
        let _guard = self.lock.lock();
        drop(file);
    }

    /// Take the next descriptor number, or `None` once the numbers run
    /// out. Numbers are never reused.
    pub fn allocate_fd(&self) -> Option<Fd> {
        let mut next = self.next_fd.lock();
        let fd = *next;
        *next = fd.checked_add(1)?;
        Some(fd)
    }

    #[cfg(test)]
    pub(crate) fn skip_fds_to(&self, fd: Fd) {
        *self.next_fd.lock() = fd;
    }
}

impl core::fmt::Debug for FsGate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FsGate(next_fd={})", *self.next_fd.lock())
    }
}
