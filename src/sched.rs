//! Scheduler Interface and One-Shot Handshakes
//!
//! The thread scheduler is provided by the surrounding kernel. This module
//! names the few primitives the process layer needs from it and builds
//! the one-shot `Handshake` on top of its semaphore.
//!
//! # Design
//! - `Scheduler::spawn` starts a new kernel thread
//! - `Semaphore` is a counting semaphore whose `down` blocks the caller
//! - `Handshake<T>` resolves exactly once and then behaves as an open latch

use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Once;

/// Counting semaphore supplied by the scheduler.
pub trait Semaphore: Send + Sync {
    /// Increment, waking one blocked `down` if any.
    fn up(&self);
    /// Block until the count is positive, then decrement it.
    fn down(&self);
}

/// Error returned when a kernel thread cannot be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// No memory for the thread's stack or control block.
    OutOfMemory,
    /// The scheduler refuses new threads.
    Unavailable,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory for thread"),
            Self::Unavailable => write!(f, "scheduler unavailable"),
        }
    }
}

/// Thread entry point handed to the scheduler.
pub type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

/// Thread scheduler primitives.
pub trait Scheduler: Send + Sync {
    /// Start a new kernel thread named `name` running `body`.
    fn spawn(&self, name: &str, body: ThreadBody) -> Result<(), SpawnError>;

    /// Create a semaphore with an initial count of zero.
    fn semaphore(&self) -> Box<dyn Semaphore>;

    /// Stop the machine.
    fn power_off(&self) -> !;
}

/// A one-shot signal carrying a value.
///
/// `resolve` succeeds at most once. Every `wait`, before or after the
/// resolution, returns the resolved value.
pub struct Handshake<T> {
    fired: AtomicBool,
    value: Once<T>,
    sema: Box<dyn Semaphore>,
}

impl<T: Copy> Handshake<T> {
    pub fn new(sema: Box<dyn Semaphore>) -> Self {
        Self {
            fired: AtomicBool::new(false),
            value: Once::new(),
            sema,
        }
    }

    /// Resolve with `value`. Returns `false` if already resolved.
    pub fn resolve(&self, value: T) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.value.call_once(|| value);
        self.sema.up();
        true
    }

    /// Block until resolved and return the value.
    pub fn wait(&self) -> T {
        self.sema.down();
        // Re-arm so later waiters pass straight through.
        self.sema.up();
        *self.value.wait()
    }

    /// The value, if already resolved.
    pub fn peek(&self) -> Option<T> {
        self.value.get().copied()
    }

    pub fn is_resolved(&self) -> bool {
        self.value.is_completed()
    }
}

impl<T: fmt::Debug> fmt::Debug for Handshake<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.get() {
            Some(v) => write!(f, "Handshake({:?})", v),
            None => write!(f, "Handshake(pending)"),
        }
    }
}
