//! System Call Interface
//!
//! The boundary between user programs and the kernel.
//!
//! # Security Model
//! - Whitelist approach: only the calls in `numbers` exist
//! - All parameters are validated before use
//! - A bad pointer, unknown call or forbidden descriptor kills the caller
//!   with status -1; every other failure is a -1 return
//!
//! # Calling Convention
//! The call number is the word at the user `esp`, followed by up to three
//! argument words. The result is returned in `eax`.

mod handler;
mod request;
mod validate;

use alloc::sync::Arc;
use core::fmt;

use log::{debug, trace};

use crate::fs::Fd;
use crate::kernel::Kernel;
use crate::process::{Process, KILLED};
use crate::trap::TrapFrame;

pub use request::Request;
pub use validate::{copy_out, Fault, UserBuffer, UserMemory};

/// System call numbers
pub mod numbers {
    pub const SYS_HALT: u32 = 0;
    pub const SYS_EXIT: u32 = 1;
    pub const SYS_EXEC: u32 = 2;
    pub const SYS_WAIT: u32 = 3;
    pub const SYS_CREATE: u32 = 4;
    pub const SYS_REMOVE: u32 = 5;
    pub const SYS_OPEN: u32 = 6;
    pub const SYS_FILESIZE: u32 = 7;
    pub const SYS_READ: u32 = 8;
    pub const SYS_WRITE: u32 = 9;
    pub const SYS_SEEK: u32 = 10;
    pub const SYS_TELL: u32 = 11;
    pub const SYS_CLOSE: u32 = 12;
}

/// A system call that kills its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// No such call number.
    UnknownCall(u32),
    /// Bad user pointer.
    Fault(Fault),
    /// The call is never allowed on this descriptor.
    ForbiddenDescriptor(Fd),
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCall(n) => write!(f, "unknown system call {}", n),
            Self::Fault(fault) => write!(f, "bad pointer: {}", fault),
            Self::ForbiddenDescriptor(fd) => write!(f, "forbidden descriptor {}", fd),
        }
    }
}

impl From<Fault> for SyscallError {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

/// What the process loop does after a system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Return to user mode.
    Return,
    /// Terminate the caller with this status.
    Exit(i32),
    /// Power off the machine.
    Halt,
}

/// Service the system call `process` trapped with.
pub fn dispatch(kernel: &Arc<Kernel>, process: &Arc<Process>, frame: &mut TrapFrame) -> Flow {
    let request = {
        let space = process.space();
        match space.as_ref() {
            Some(space) => Request::decode(&UserMemory::new(space), frame.esp),
            None => Err(SyscallError::Fault(Fault::Unmapped(frame.esp))),
        }
    };

    let request = match request {
        Ok(request) => request,
        Err(err) => return kill(process, err),
    };
    trace!("pid {}: {}", process.pid(), request.name());

    match handler::handle(kernel, process, request) {
        Ok(handler::Reply::Value(value)) => {
            frame.set_return(value);
            Flow::Return
        }
        Ok(handler::Reply::Exit(status)) => Flow::Exit(status),
        Ok(handler::Reply::Halt) => Flow::Halt,
        Err(err) => kill(process, err),
    }
}

fn kill(process: &Process, err: SyscallError) -> Flow {
    debug!("pid {} ({}) killed: {}", process.pid(), process.name(), err);
    Flow::Exit(KILLED)
}
