//! Process records and lifecycle
//!
//! A process is one kernel thread running one user program. Its record is
//! shared between the process's own thread, its parent and any thread
//! blocked in `exec` on it.
//!
//! # Ownership
//! - A parent holds strong references to its unreaped children
//! - A child holds a weak reference to its parent, cleared when orphaned
//! - The executable, descriptor table and address space belong to the
//!   process and are released only by its own teardown
//!
//! # Lock Order
//! - `parent` before the parent's `wait_target` and `child_status`
//! - `children` before a child's `parent`
//! - `wait_target` before `child_status`

mod exit;
mod launch;
mod run;
mod state;
mod wait;


use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use log::{error, trace};
use spin::{Mutex, MutexGuard};

use crate::fs::FdTable;
use crate::fs::File;
use crate::loader::LoadedImage;
use crate::mm::UserSpace;
use crate::sched::{Handshake, Scheduler, Semaphore};

pub use launch::LaunchError;
pub use state::{LoadOutcome, ProcessState};
pub use wait::WaitError;

/// Process identifier.
pub type Pid = i32;

/// Exit status used when the kernel kills a process.
pub const KILLED: i32 = -1;

pub struct Process {
    pid: Pid,
    name: String,

    parent: Mutex<Weak<Process>>,
    children: Mutex<BTreeMap<Pid, Arc<Process>>>,
    wait_target: Mutex<Option<Pid>>,
    child_status: Mutex<Option<i32>>,
    /// Signalled by the child being waited for when it exits.
    delivery: Box<dyn Semaphore>,

    state: Mutex<ProcessState>,
    outcome: Mutex<LoadOutcome>,
    created: Handshake<bool>,
    release: Handshake<()>,
    exited: Handshake<i32>,
    exit_status: AtomicI32,
    exiting: AtomicBool,

    executable: Mutex<Option<Box<dyn File>>>,
    fds: Mutex<FdTable>,
    space: Mutex<Option<UserSpace>>,
}

impl Process {
    fn with_state(
        pid: Pid,
        name: String,
        parent: Weak<Process>,
        state: ProcessState,
        scheduler: &dyn Scheduler,
    ) -> Self {
        Self {
            pid,
            name,
            parent: Mutex::new(parent),
            children: Mutex::new(BTreeMap::new()),
            wait_target: Mutex::new(None),
            child_status: Mutex::new(None),
            delivery: scheduler.semaphore(),
            state: Mutex::new(state),
            outcome: Mutex::new(LoadOutcome::Pending),
            created: Handshake::new(scheduler.semaphore()),
            release: Handshake::new(scheduler.semaphore()),
            exited: Handshake::new(scheduler.semaphore()),
            exit_status: AtomicI32::new(KILLED),
            exiting: AtomicBool::new(false),
            executable: Mutex::new(None),
            fds: Mutex::new(FdTable::new()),
            space: Mutex::new(None),
        }
    }

    /// A record for a process about to be loaded.
    pub(crate) fn spawned(
        pid: Pid,
        name: String,
        parent: Weak<Process>,
        scheduler: &dyn Scheduler,
    ) -> Self {
        Self::with_state(pid, name, parent, ProcessState::Spawned, scheduler)
    }

    /// A record for the already-running boot thread.
    pub(crate) fn boot(pid: Pid, name: String, scheduler: &dyn Scheduler) -> Self {
        Self::with_state(pid, name, Weak::new(), ProcessState::Released, scheduler)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Program name, printed in the exit message.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub fn load_outcome(&self) -> LoadOutcome {
        *self.outcome.lock()
    }

    /// The status recorded by `exit`, or −1.
    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::Acquire)
    }

    /// The published exit status, once teardown has finished.
    pub fn exit_code(&self) -> Option<i32> {
        self.exited.peek()
    }

    /// The user address space, if the process has one.
    pub fn space(&self) -> MutexGuard<'_, Option<UserSpace>> {
        self.space.lock()
    }

    pub fn fds(&self) -> MutexGuard<'_, FdTable> {
        self.fds.lock()
    }

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock().upgrade()
    }

    /// Pids of children not yet waited for.
    pub fn children(&self) -> alloc::vec::Vec<Pid> {
        self.children.lock().keys().copied().collect()
    }

    pub fn child(&self, pid: Pid) -> Option<Arc<Process>> {
        self.children.lock().get(&pid).cloned()
    }

    /// Whether the executable is still held open.
    pub fn holds_executable(&self) -> bool {
        self.executable.lock().is_some()
    }

    /// Move to `next`, refusing illegal transitions.
    fn transition(&self, next: ProcessState) -> bool {
        let mut state = self.state.lock();
        if !state.can_become(next) {
            error!(
                "pid {}: illegal state transition {} -> {}",
                self.pid, *state, next
            );
            debug_assert!(false, "illegal state transition {} -> {}", *state, next);
            return false;
        }
        trace!("pid {}: {} -> {}", self.pid, *state, next);
        *state = next;
        true
    }

    fn set_outcome(&self, outcome: LoadOutcome) {
        let mut current = self.outcome.lock();
        debug_assert_eq!(*current, LoadOutcome::Pending, "load outcome set twice");
        *current = outcome;
    }

    /// Take ownership of a loaded program.
    fn install(&self, image: LoadedImage) {
        *self.space.lock() = Some(image.space);
        *self.executable.lock() = Some(image.executable);
    }

    /// Hand `status` to this process if it is waiting for `child`.
    fn deliver(&self, child: Pid, status: i32) -> bool {
        let mut target = self.wait_target.lock();
        if *target != Some(child) {
            return false;
        }
        *target = None;
        *self.child_status.lock() = Some(status);
        drop(target);
        self.delivery.up();
        true
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("children", &self.children())
            .finish()
    }
}
