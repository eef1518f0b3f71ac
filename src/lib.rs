//! userprog - Process Lifecycle and System-Call Boundary
//!
//! The part of a monolithic teaching kernel that turns executables into
//! running user processes and mediates everything they ask of the kernel.
//!
//! # Components
//! - Executable loader (ELF32 i386, initial argument stack)
//! - Process creation, parent/child synchronization and teardown
//! - Per-process file descriptor tables
//! - System call validation, decoding and dispatch
//!
//! # Security Features
//! - Every user pointer is checked against the process's own mappings
//! - User data is copied into kernel buffers before use
//! - Running executables are write-protected
//! - All process resources are released exactly once on exit
//!
//! # Platform
//! The scheduler, MMU, console, filesystem and user-mode entry are
//! supplied by the surrounding kernel through the traits in `sched`,
//! `mm`, `console`, `fs` and `trap`.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod fs;
pub mod kernel;
pub mod loader;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod syscall;
pub mod trap;

#[cfg(test)]
mod testing;

pub use config::KernelConfig;
pub use kernel::{Kernel, Platform};
pub use process::{Pid, Process};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
