//! User Frame Pool
//!
//! Hands out the zeroed pages that back user address spaces, using a
//! bitmap to account for a fixed number of frames.
//!
//! # Design
//! - Each bit in the bitmap represents one 4KB frame
//! - Bit = 0: frame is free
//! - Bit = 1: frame is allocated
//!
//! # Security Properties
//! - All allocated frames are zeroed before returning
//! - Double-free is detected and causes a panic
//! - The pool is protected by a spinlock

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::address::PAGE_SIZE;

/// Pool bookkeeping.
struct FramePoolInner {
    /// Bitmap tracking allocated frames (1 = allocated, 0 = free).
    bitmap: Vec<u8>,
    /// Number of free frames remaining.
    free_count: usize,
    /// Total frames under management.
    total_frames: usize,
}

impl FramePoolInner {
    fn new(total_frames: usize) -> Self {
        Self {
            bitmap: vec![0; total_frames.div_ceil(8)],
            free_count: total_frames,
            total_frames,
        }
    }

    #[inline]
    fn set_bit(&mut self, frame: usize, allocated: bool) {
        let byte_idx = frame / 8;
        let bit_idx = frame % 8;

        if allocated {
            self.bitmap[byte_idx] |= 1 << bit_idx;
        } else {
            self.bitmap[byte_idx] &= !(1 << bit_idx);
        }
    }

    #[inline]
    fn is_allocated(&self, frame: usize) -> bool {
        if frame >= self.total_frames {
            return true; // Out of range = allocated
        }
        (self.bitmap[frame / 8] >> (frame % 8)) & 1 == 1
    }

    /// Claim the first free frame index.
    fn alloc(&mut self) -> Option<usize> {
        if self.free_count == 0 {
            return None;
        }

        for byte_idx in 0..self.bitmap.len() {
            if self.bitmap[byte_idx] == 0xFF {
                continue;
            }
            for bit_idx in 0..8 {
                let frame = byte_idx * 8 + bit_idx;
                if frame >= self.total_frames {
                    return None;
                }
                if !self.is_allocated(frame) {
                    self.set_bit(frame, true);
                    self.free_count -= 1;
                    return Some(frame);
                }
            }
        }

        None
    }

    fn free(&mut self, frame: usize) {
        if frame >= self.total_frames {
            panic!("Attempted to free frame outside managed range: {}", frame);
        }
        if !self.is_allocated(frame) {
            panic!("Double free detected for frame: {}", frame);
        }

        self.set_bit(frame, false);
        self.free_count += 1;
    }
}

/// Fixed-capacity pool of user frames.
pub struct FramePool {
    inner: Mutex<FramePoolInner>,
}

impl FramePool {
    /// Create a pool managing `total_frames` frames.
    pub fn new(total_frames: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(FramePoolInner::new(total_frames)),
        })
    }

    /// Allocate a single zeroed frame.
    ///
    /// Returns `None` if the pool is exhausted.
    pub fn alloc(self: &Arc<Self>) -> Option<UserFrame> {
        let index = self.inner.lock().alloc()?;
        Some(UserFrame {
            index,
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            pool: Arc::clone(self),
        })
    }

    /// Get the number of free frames remaining.
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free_count
    }

    /// Get the pool capacity.
    pub fn total_frames(&self) -> usize {
        self.inner.lock().total_frames
    }
}

/// A RAII guard for a user frame that returns it to its pool on drop.
///
/// This provides automatic cleanup even in error paths.
pub struct UserFrame {
    index: usize,
    data: Box<[u8]>,
    pool: Arc<FramePool>,
}

impl UserFrame {
    /// Frame contents.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable frame contents.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl core::fmt::Debug for UserFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "UserFrame({})", self.index)
    }
}

impl Drop for UserFrame {
    fn drop(&mut self) {
        self.pool.inner.lock().free(self.index);
    }
}
