//! Per-process file descriptor table.
//!
//! Maps descriptor numbers to the open files a process owns. Numbers come
//! from the global counter in `FsGate`, so the table never picks them.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::{Fd, File, FIRST_FILE_FD};

#[derive(Default)]
pub struct FdTable {
    entries: BTreeMap<Fd, Box<dyn File>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `file` under `fd`.
    ///
    /// # Panics
    /// Panics if `fd` is reserved or already present; both mean the global
    /// counter was bypassed.
    pub fn insert(&mut self, fd: Fd, file: Box<dyn File>) {
        assert!(fd >= FIRST_FILE_FD, "descriptor {} is reserved", fd);
        let previous = self.entries.insert(fd, file);
        assert!(previous.is_none(), "descriptor {} reused", fd);
    }

    pub fn get_mut(&mut self, fd: Fd) -> Option<&mut (dyn File + 'static)> {
        self.entries.get_mut(&fd).map(|file| file.as_mut())
    }

    /// Detach the entry for `fd`; the caller closes it.
    pub fn remove(&mut self, fd: Fd) -> Option<Box<dyn File>> {
        self.entries.remove(&fd)
    }

    /// Detach every entry, in descriptor order.
    pub fn drain(&mut self) -> Vec<Box<dyn File>> {
        core::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl core::fmt::Debug for FdTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
