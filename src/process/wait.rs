//! Waiting for children.

use core::fmt;

use log::debug;

use super::{Pid, Process, ProcessState};
use crate::kernel::Kernel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Not a child of the caller, or already waited for.
    NotChild(Pid),
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotChild(pid) => write!(f, "pid {} is not a waitable child", pid),
        }
    }
}

impl Kernel {
    /// Release child `pid` of `parent` and block until it exits.
    ///
    /// Each child can be waited for once.
    pub fn wait(&self, parent: &Process, pid: Pid) -> Result<i32, WaitError> {
        *parent.wait_target.lock() = Some(pid);

        let child = parent.children.lock().remove(&pid);
        let Some(child) = child else {
            *parent.wait_target.lock() = None;
            return Err(WaitError::NotChild(pid));
        };

        debug!("pid {} waiting for pid {}", parent.pid(), pid);
        child.release.resolve(());
        parent.delivery.down();

        let delivered = parent.child_status.lock().take();
        // Teardown is finished once the exit handshake resolves.
        let published = child.exited.wait();
        child.transition(ProcessState::Reaped);

        Ok(delivered.unwrap_or(published))
    }
}
