//! System Call Handler
//!
//! Implements the individual system calls on decoded requests.
//!
//! # Security Considerations
//! - Requests arrive fully validated; handlers never read user memory
//! - Each filesystem or console primitive runs under the global gate, which
//!   is never held across `exec` or `wait`

use alloc::sync::Arc;
use alloc::vec;

use log::{debug, warn};

use super::request::Request;
use super::validate::{copy_out, Fault, UserBuffer};
use super::SyscallError;
use crate::fs::{Fd, File, STDIN_FILENO, STDOUT_FILENO};
use crate::kernel::Kernel;
use crate::process::Process;

/// Error return value.
const ERROR: i32 = -1;

/// Result of a serviced call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Store in `eax` and resume.
    Value(i32),
    Exit(i32),
    Halt,
}

/// Run one decoded request for `process`.
pub fn handle(
    kernel: &Arc<Kernel>,
    process: &Arc<Process>,
    request: Request,
) -> Result<Reply, SyscallError> {
    let reply = match request {
        Request::Halt => Reply::Halt,
        Request::Exit { status } => Reply::Exit(status),
        Request::Exec { cmdline } => Reply::Value(sys_exec(kernel, process, &cmdline)),
        Request::Wait { pid } => Reply::Value(kernel.wait(process, pid).unwrap_or(ERROR)),
        Request::Create { path, initial_size } => {
            let created = kernel.fs().with_fs(|fs| fs.create(&path, initial_size));
            debug!("pid {}: create {} ({} bytes) -> {}", process.pid(), path, initial_size, created);
            Reply::Value(i32::from(created))
        }
        Request::Remove { path } => {
            let removed = kernel.fs().with_fs(|fs| fs.remove(&path));
            debug!("pid {}: remove {} -> {}", process.pid(), path, removed);
            Reply::Value(i32::from(removed))
        }
        Request::Open { path } => Reply::Value(sys_open(kernel, process, &path)),
        Request::Filesize { fd } => Reply::Value(
            with_file(kernel, process, fd, |file| file.length() as i32).unwrap_or(ERROR),
        ),
        Request::Read { fd, buf } => Reply::Value(sys_read(kernel, process, fd, &buf)?),
        Request::Write { fd, data } => Reply::Value(sys_write(kernel, process, fd, &data)),
        Request::Seek { fd, pos } => Reply::Value(
            with_file(kernel, process, fd, |file| {
                file.seek(pos);
                pos as i32
            })
            .unwrap_or(ERROR),
        ),
        Request::Tell { fd } => Reply::Value(
            with_file(kernel, process, fd, |file| file.tell() as i32).unwrap_or(ERROR),
        ),
        Request::Close { fd } => Reply::Value(sys_close(kernel, process, fd)),
    };
    Ok(reply)
}

/// Run `op` on open file `fd` under the gate, or `None` if `fd` is not open.
fn with_file<R>(
    kernel: &Kernel,
    process: &Process,
    fd: Fd,
    op: impl FnOnce(&mut (dyn File + 'static)) -> R,
) -> Option<R> {
    let mut fds = process.fds();
    let file = fds.get_mut(fd)?;
    Some(kernel.fs().locked(|| op(file)))
}

fn sys_exec(kernel: &Arc<Kernel>, process: &Arc<Process>, cmdline: &str) -> i32 {
    match kernel.create_process(process, cmdline) {
        Ok(pid) => pid,
        Err(err) => {
            debug!("pid {}: exec {:?} failed: {}", process.pid(), cmdline, err);
            ERROR
        }
    }
}

fn sys_open(kernel: &Kernel, process: &Process, path: &str) -> i32 {
    let gate = kernel.fs();
    let Some(file) = gate.with_fs(|fs| fs.open(path)) else {
        return ERROR;
    };
    match gate.allocate_fd() {
        Some(fd) => {
            process.fds().insert(fd, file);
            debug!("pid {}: open {} -> fd {}", process.pid(), path, fd);
            fd
        }
        None => {
            warn!("pid {}: open {}: descriptor numbers exhausted", process.pid(), path);
            gate.close(file);
            ERROR
        }
    }
}

fn sys_read(
    kernel: &Kernel,
    process: &Process,
    fd: Fd,
    buf: &UserBuffer,
) -> Result<i32, SyscallError> {
    let mut data = vec![0u8; buf.len()];
    let count = if fd == STDIN_FILENO {
        // One byte per lock hold so console input never starves the gate.
        for byte in data.iter_mut() {
            *byte = kernel.fs().locked(|| kernel.console().read_byte());
        }
        data.len()
    } else {
        match with_file(kernel, process, fd, |file| file.read(&mut data)) {
            Some(count) => count,
            None => return Ok(ERROR),
        }
    };

    let mut space = process.space();
    let space = space.as_mut().ok_or(Fault::Unmapped(buf.addr()))?;
    copy_out(space, buf, &data[..count])?;
    Ok(count as i32)
}

fn sys_write(kernel: &Kernel, process: &Process, fd: Fd, data: &[u8]) -> i32 {
    if fd == STDOUT_FILENO {
        kernel.fs().locked(|| kernel.console().write(data));
        return data.len() as i32;
    }
    with_file(kernel, process, fd, |file| file.write(data) as i32).unwrap_or(ERROR)
}

fn sys_close(kernel: &Kernel, process: &Process, fd: Fd) -> i32 {
    let file = process.fds().remove(fd);
    match file {
        Some(file) => {
            kernel.fs().close(file);
            1
        }
        None => ERROR,
    }
}
