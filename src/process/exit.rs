//! Process termination and teardown.

use core::mem;
use core::sync::atomic::Ordering;

use alloc::sync::Weak;

use log::{debug, warn};

use super::{Process, ProcessState};
use crate::kernel::Kernel;

impl Kernel {
    /// End `process` with `status`.
    ///
    /// Prints the exit message and releases everything the process owns.
    /// Only the process's own thread calls this, once.
    pub fn terminate(&self, process: &Process, status: i32) {
        if process.exiting.swap(true, Ordering::AcqRel) {
            warn!("pid {}: terminated twice", process.pid());
            return;
        }
        process.exit_status.store(status, Ordering::Release);
        self.print(format_args!("{}: exit({})\n", process.name(), status));
        self.teardown(process, status);
    }

    fn teardown(&self, process: &Process, status: i32) {
        // Hand the status to a parent blocked in wait on us.
        let parent = process.parent.lock().upgrade();
        if let Some(parent) = parent {
            if parent.deliver(process.pid(), status) {
                debug!("pid {}: status {} delivered to pid {}", process.pid(), status, parent.pid());
            }
        }

        let executable = process.executable.lock().take();
        if let Some(executable) = executable {
            self.fs().close(executable);
        }

        let files = process.fds.lock().drain();
        for file in files {
            self.fs().close(file);
        }

        // Orphans run on their own; nobody will wait for them.
        let orphans = mem::take(&mut *process.children.lock());
        for (pid, child) in orphans {
            *child.parent.lock() = Weak::new();
            child.release.resolve(());
            debug!("pid {}: orphaned pid {}", process.pid(), pid);
        }

        // Never leave a freed space active.
        self.mmu().activate(None);
        let space = process.space.lock().take();
        drop(space);

        process.transition(ProcessState::Exited);
        process.exited.resolve(status);
    }
}
