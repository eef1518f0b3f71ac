//! User Address Space
//!
//! A portable page directory: each mapped user page owns the frame that
//! backs it. Dropping a `UserSpace` destroys it and returns every frame
//! to the pool.
//!
//! # Security Properties
//! - Only user, page-aligned addresses can be installed
//! - A page can never be mapped twice
//! - Writes honour the page's writable bit

use alloc::collections::BTreeMap;

use super::address::{VirtAddr, PAGE_SIZE};
use super::frame::UserFrame;

/// Error type for page mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    /// The virtual address is already mapped.
    AlreadyMapped,
    /// The virtual address is not mapped.
    NotMapped,
    /// No user frames available.
    OutOfMemory,
    /// The address is not properly aligned.
    MisalignedAddress,
    /// The address lies outside user space.
    NotUser,
    /// The page is mapped read-only.
    ReadOnly,
}

impl core::fmt::Display for MappingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyMapped => write!(f, "virtual address already mapped"),
            Self::NotMapped => write!(f, "virtual address not mapped"),
            Self::OutOfMemory => write!(f, "out of user frames"),
            Self::MisalignedAddress => write!(f, "address not properly aligned"),
            Self::NotUser => write!(f, "address outside user space"),
            Self::ReadOnly => write!(f, "page is read-only"),
        }
    }
}

struct Mapping {
    frame: UserFrame,
    writable: bool,
}

/// A process's user address space.
#[derive(Default)]
pub struct UserSpace {
    /// Virtual page number -> backing frame.
    pages: BTreeMap<u32, Mapping>,
}

impl UserSpace {
    /// Create an empty address space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `frame` at user page `upage`.
    pub fn install(
        &mut self,
        upage: VirtAddr,
        frame: UserFrame,
        writable: bool,
    ) -> Result<(), MappingError> {
        if !upage.is_user() {
            return Err(MappingError::NotUser);
        }
        if !upage.is_aligned() {
            return Err(MappingError::MisalignedAddress);
        }
        if self.pages.contains_key(&upage.page_number()) {
            return Err(MappingError::AlreadyMapped);
        }

        self.pages
            .insert(upage.page_number(), Mapping { frame, writable });
        Ok(())
    }

    /// Whether the page containing `addr` is mapped.
    #[inline]
    pub fn is_mapped(&self, addr: VirtAddr) -> bool {
        addr.is_user() && self.pages.contains_key(&addr.page_number())
    }

    /// Whether the page containing `addr` is mapped writable.
    #[inline]
    pub fn is_writable(&self, addr: VirtAddr) -> bool {
        addr.is_user()
            && self
                .pages
                .get(&addr.page_number())
                .is_some_and(|m| m.writable)
    }

    /// Number of mapped pages.
    pub fn mapped_pages(&self) -> usize {
        self.pages.len()
    }

    /// Copy `buf.len()` bytes starting at `addr` out of the space.
    pub fn read(&self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), MappingError> {
        let mut done = 0;
        while done < buf.len() {
            let va = offset(addr, done)?;
            let mapping = self
                .pages
                .get(&va.page_number())
                .filter(|_| va.is_user())
                .ok_or(MappingError::NotMapped)?;
            let start = va.page_offset() as usize;
            let n = (PAGE_SIZE - start).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&mapping.frame.bytes()[start..start + n]);
            done += n;
        }
        Ok(())
    }

    /// Copy `data` into the space starting at `addr`.
    ///
    /// Every touched page must be mapped writable.
    pub fn write(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), MappingError> {
        // Check the whole range first so a failed write leaves no partial copy.
        let mut done = 0;
        while done < data.len() {
            let va = offset(addr, done)?;
            if !self.is_mapped(va) {
                return Err(MappingError::NotMapped);
            }
            if !self.is_writable(va) {
                return Err(MappingError::ReadOnly);
            }
            done += PAGE_SIZE - va.page_offset() as usize;
        }

        let mut done = 0;
        while done < data.len() {
            let va = offset(addr, done)?;
            let mapping = self
                .pages
                .get_mut(&va.page_number())
                .ok_or(MappingError::NotMapped)?;
            let start = va.page_offset() as usize;
            let n = (PAGE_SIZE - start).min(data.len() - done);
            mapping.frame.bytes_mut()[start..start + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }
}

fn offset(addr: VirtAddr, by: usize) -> Result<VirtAddr, MappingError> {
    u32::try_from(by)
        .ok()
        .and_then(|by| addr.checked_add(by))
        .ok_or(MappingError::NotUser)
}

impl core::fmt::Debug for UserSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "UserSpace({} pages)", self.pages.len())
    }
}
