//! Memory management for user processes
//!
//! Provides:
//! - User virtual address type and layout constants
//! - A bounded pool of zeroed user frames
//! - Per-process user address spaces
//!
//! # Security Principles
//! - All user memory access is bounds-checked and page-checked
//! - Frames are zeroed before they are handed to a process
//! - Address spaces release their frames exactly once, on drop

pub mod address;
mod frame;
mod space;

pub use address::{VirtAddr, PAGE_SIZE, PHYS_BASE};
pub use frame::{FramePool, UserFrame};
pub use space::{MappingError, UserSpace};

/// Hardware side of address-space switching.
pub trait Mmu: Send + Sync {
    /// Make `space` the active user address space, or switch to the
    /// kernel-only address space when `None`.
    fn activate(&self, space: Option<&UserSpace>);
}
