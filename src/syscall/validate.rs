//! System Call Input Validation
//!
//! Every access the kernel makes to user memory on a process's behalf goes
//! through `UserMemory`.
//!
//! # Security Principles
//! - Validate ALL inputs before use
//! - Fail-secure: any bad pointer is fatal to the caller
//! - Prevent common vulnerabilities:
//!   - Kernel memory disclosure (user-address checks)
//!   - Null pointer dereference (explicit checks)
//!   - TOCTOU races (copy into kernel buffers before use)

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::mm::{UserSpace, VirtAddr, PAGE_SIZE};

/// A bad user pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Null pointer.
    Null,
    /// Address at or above `PHYS_BASE`, or a range that wraps.
    NotUser(VirtAddr),
    /// Address not mapped in the process.
    Unmapped(VirtAddr),
    /// Destination page is read-only.
    ReadOnly(VirtAddr),
    /// No NUL within one page.
    Unterminated(VirtAddr),
    /// String is not valid UTF-8.
    NotUtf8(VirtAddr),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null pointer"),
            Self::NotUser(addr) => write!(f, "kernel address {}", addr),
            Self::Unmapped(addr) => write!(f, "unmapped address {}", addr),
            Self::ReadOnly(addr) => write!(f, "read-only address {}", addr),
            Self::Unterminated(addr) => write!(f, "unterminated string at {}", addr),
            Self::NotUtf8(addr) => write!(f, "invalid UTF-8 string at {}", addr),
        }
    }
}

/// A validated user-space buffer
///
/// Only constructed after every page it touches was checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserBuffer {
    addr: VirtAddr,
    len: u32,
}

impl UserBuffer {
    pub fn addr(&self) -> VirtAddr {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Checked view of a process's user memory.
pub struct UserMemory<'a> {
    space: &'a UserSpace,
}

impl<'a> UserMemory<'a> {
    pub fn new(space: &'a UserSpace) -> Self {
        Self { space }
    }

    /// Check `len` bytes at `addr`.
    ///
    /// # Security Checks
    /// 1. Pointer is not null
    /// 2. Start and end lie below `PHYS_BASE` without wrapping
    /// 3. Every touched page is mapped (writable if `writable`)
    ///
    /// The first byte is checked even when `len` is zero.
    pub fn check(&self, addr: VirtAddr, len: u32, writable: bool) -> Result<UserBuffer, Fault> {
        if addr.is_null() {
            return Err(Fault::Null);
        }
        let last = addr
            .checked_add(len.saturating_sub(1))
            .ok_or(Fault::NotUser(addr))?;
        if !addr.is_user() {
            return Err(Fault::NotUser(addr));
        }
        if !last.is_user() {
            return Err(Fault::NotUser(last));
        }

        let mut page = addr.align_down();
        loop {
            let probe = if page < addr { addr } else { page };
            if !self.space.is_mapped(probe) {
                return Err(Fault::Unmapped(probe));
            }
            if writable && !self.space.is_writable(probe) {
                return Err(Fault::ReadOnly(probe));
            }
            match page.checked_add(PAGE_SIZE as u32) {
                Some(next) if next <= last => page = next,
                _ => break,
            }
        }
        Ok(UserBuffer { addr, len })
    }

    /// Read the 32-bit little-endian word at `addr`.
    pub fn read_u32(&self, addr: VirtAddr) -> Result<u32, Fault> {
        let buf = self.check(addr, 4, false)?;
        let mut word = [0u8; 4];
        self.copy_in(&buf, &mut word);
        Ok(u32::from_le_bytes(word))
    }

    /// Copy a validated buffer into a kernel vector.
    pub fn read_bytes(&self, buf: &UserBuffer) -> Vec<u8> {
        let mut data = vec![0u8; buf.len()];
        self.copy_in(buf, &mut data);
        data
    }

    /// Copy a NUL-terminated string of at most one page.
    pub fn read_str(&self, addr: VirtAddr) -> Result<String, Fault> {
        if addr.is_null() {
            return Err(Fault::Null);
        }
        let mut bytes = Vec::new();
        let mut cursor = addr;
        for _ in 0..PAGE_SIZE {
            let mut byte = [0u8; 1];
            self.check(cursor, 1, false)?;
            self.copy_in(&UserBuffer { addr: cursor, len: 1 }, &mut byte);
            if byte[0] == 0 {
                return String::from_utf8(bytes).map_err(|_| Fault::NotUtf8(addr));
            }
            bytes.push(byte[0]);
            cursor = cursor.checked_add(1).ok_or(Fault::NotUser(cursor))?;
        }
        Err(Fault::Unterminated(addr))
    }

    fn copy_in(&self, buf: &UserBuffer, out: &mut [u8]) {
        // Validated above; a failure here means the space changed under us.
        if self.space.read(buf.addr, out).is_err() {
            out.fill(0);
        }
    }
}

/// Copy `data` into a buffer validated as writable.
pub fn copy_out(space: &mut UserSpace, buf: &UserBuffer, data: &[u8]) -> Result<(), Fault> {
    debug_assert!(data.len() <= buf.len());
    space
        .write(buf.addr, data)
        .map_err(|_| Fault::Unmapped(buf.addr))
}
