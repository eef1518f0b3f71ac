//! System call decoding
//!
//! Turns the raw call frame on the user stack into a typed `Request`. All
//! user memory is read here; handlers only see kernel copies and
//! validated buffers.

use alloc::string::String;
use alloc::vec::Vec;

use super::numbers::*;
use super::validate::{Fault, UserBuffer, UserMemory};
use super::SyscallError;
use crate::fs::{Fd, FIRST_FILE_FD, STDIN_FILENO, STDOUT_FILENO};
use crate::mm::VirtAddr;
use crate::process::Pid;

/// A decoded system call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Halt,
    Exit { status: i32 },
    Exec { cmdline: String },
    Wait { pid: Pid },
    Create { path: String, initial_size: u32 },
    Remove { path: String },
    Open { path: String },
    Filesize { fd: Fd },
    /// `buf` is validated writable for its whole length.
    Read { fd: Fd, buf: UserBuffer },
    /// The bytes to write, already copied out of user memory.
    Write { fd: Fd, data: Vec<u8> },
    Seek { fd: Fd, pos: u32 },
    Tell { fd: Fd },
    Close { fd: Fd },
}

/// The call frame at a user stack pointer.
struct Args<'m, 'a> {
    mem: &'m UserMemory<'a>,
    esp: VirtAddr,
}

impl Args<'_, '_> {
    /// Argument word `i`, counting from zero.
    fn word(&self, i: u32) -> Result<u32, Fault> {
        let addr = self
            .esp
            .checked_add(4 * (i + 1))
            .ok_or(Fault::NotUser(self.esp))?;
        self.mem.read_u32(addr)
    }

    fn int(&self, i: u32) -> Result<i32, Fault> {
        self.word(i).map(|w| w as i32)
    }

    fn string(&self, i: u32) -> Result<String, Fault> {
        self.mem.read_str(VirtAddr::new(self.word(i)?))
    }

    fn buffer(&self, i: u32, len: u32, writable: bool) -> Result<UserBuffer, Fault> {
        self.mem.check(VirtAddr::new(self.word(i)?), len, writable)
    }
}

impl Request {
    /// Decode the call whose number is at `esp`.
    pub fn decode(mem: &UserMemory<'_>, esp: VirtAddr) -> Result<Self, SyscallError> {
        let number = mem.read_u32(esp)?;
        let args = Args { mem, esp };

        let request = match number {
            SYS_HALT => Self::Halt,
            SYS_EXIT => Self::Exit { status: args.int(0)? },
            SYS_EXEC => Self::Exec {
                cmdline: args.string(0)?,
            },
            SYS_WAIT => Self::Wait { pid: args.int(0)? },
            SYS_CREATE => Self::Create {
                path: args.string(0)?,
                initial_size: args.word(1)?,
            },
            SYS_REMOVE => Self::Remove {
                path: args.string(0)?,
            },
            SYS_OPEN => Self::Open {
                path: args.string(0)?,
            },
            SYS_FILESIZE => Self::Filesize { fd: args.int(0)? },
            SYS_READ => {
                let fd = args.int(0)?;
                if fd == STDOUT_FILENO {
                    return Err(SyscallError::ForbiddenDescriptor(fd));
                }
                let len = args.word(2)?;
                Self::Read {
                    fd,
                    buf: args.buffer(1, len, true)?,
                }
            }
            SYS_WRITE => {
                let fd = args.int(0)?;
                if fd == STDIN_FILENO {
                    return Err(SyscallError::ForbiddenDescriptor(fd));
                }
                let len = args.word(2)?;
                let buf = args.buffer(1, len, false)?;
                Self::Write {
                    fd,
                    data: mem.read_bytes(&buf),
                }
            }
            SYS_SEEK => Self::Seek {
                fd: args.int(0)?,
                pos: args.word(1)?,
            },
            SYS_TELL => Self::Tell { fd: args.int(0)? },
            SYS_CLOSE => {
                let fd = args.int(0)?;
                if fd < FIRST_FILE_FD {
                    return Err(SyscallError::ForbiddenDescriptor(fd));
                }
                Self::Close { fd }
            }
            other => return Err(SyscallError::UnknownCall(other)),
        };
        Ok(request)
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Halt => "halt",
            Self::Exit { .. } => "exit",
            Self::Exec { .. } => "exec",
            Self::Wait { .. } => "wait",
            Self::Create { .. } => "create",
            Self::Remove { .. } => "remove",
            Self::Open { .. } => "open",
            Self::Filesize { .. } => "filesize",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Seek { .. } => "seek",
            Self::Tell { .. } => "tell",
            Self::Close { .. } => "close",
        }
    }
}
