//! User-mode entry and trap frames
//!
//! The architecture layer runs user code and comes back to the kernel on the
//! next trap. The process main loop only sees the saved frame and the
//! trap class.
//!
//! # Security Considerations
//! - Every trap from user mode is either a system call or fatal to the
//!   trapping process
//! - The frame is the only user-controlled state the kernel reads directly

use crate::mm::VirtAddr;
use crate::process::Process;

/// User register state saved on a trap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// Instruction pointer to resume at.
    pub eip: VirtAddr,
    /// User stack pointer.
    pub esp: VirtAddr,
    /// Return value register.
    pub eax: u32,
}

impl TrapFrame {
    /// Frame for a process's first entry into user mode.
    pub const fn new(entry: VirtAddr, esp: VirtAddr) -> Self {
        Self {
            eip: entry,
            esp,
            eax: 0,
        }
    }

    /// Store a system call's return value.
    #[inline]
    pub fn set_return(&mut self, value: i32) {
        self.eax = value as u32;
    }

    #[inline]
    pub fn return_value(&self) -> i32 {
        self.eax as i32
    }
}

/// Why user mode handed control back to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// The program executed the system call instruction.
    Syscall,
    /// Page fault, illegal instruction or any other exception.
    Fault { addr: VirtAddr },
}

/// Architecture hook that runs user code.
pub trait UserMode: Send + Sync {
    /// Resume `process` in user mode from `frame` until the next trap,
    /// updating `frame` with the state at the trap.
    fn resume(&self, process: &Process, frame: &mut TrapFrame) -> Trap;
}
