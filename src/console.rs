//! Console device interface
//!
//! Byte-level output and input supplied by the console driver. All output
//! goes through one `SerialConsole`, which holds its line lock for exactly
//! one `put_bytes` call, so kernel messages, log records and user writes
//! never interleave. The driver itself only guarantees per-call ordering.
//!
//! # Lock Order
//! - The filesystem gate, when taken, comes before the line lock
//! - Nothing blocks or logs while the line lock is held

use alloc::sync::Arc;

use spin::Mutex;

/// Console driver primitives.
pub trait Console: Send + Sync {
    /// Write `bytes` to the console.
    fn put_bytes(&self, bytes: &[u8]);

    /// Read one byte, blocking until one is available.
    fn get_byte(&self) -> u8;
}

/// The console shared by the kernel and the logger.
pub struct SerialConsole {
    driver: Arc<dyn Console>,
    line: Mutex<()>,
}

impl SerialConsole {
    pub fn new(driver: Arc<dyn Console>) -> Self {
        Self {
            driver,
            line: Mutex::new(()),
        }
    }

    /// Write `bytes` as one unbroken run.
    pub fn write(&self, bytes: &[u8]) {
        let _line = self.line.lock();
        self.driver.put_bytes(bytes);
    }

    /// Read one byte of input. Does not take the line lock.
    pub fn read_byte(&self) -> u8 {
        self.driver.get_byte()
    }
}
