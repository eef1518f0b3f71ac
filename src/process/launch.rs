//! Process creation.

use alloc::borrow::ToOwned;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use log::{debug, info, warn};

use super::{LoadOutcome, Pid, Process, ProcessState};
use crate::kernel::Kernel;
use crate::loader;
use crate::sched::SpawnError;

/// Why `create_process` produced no process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchError {
    /// The scheduler could not start the thread.
    Spawn(SpawnError),
    /// The executable failed to load.
    LoadFailed,
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "spawn failed: {}", err),
            Self::LoadFailed => write!(f, "load failed"),
        }
    }
}

impl From<SpawnError> for LaunchError {
    fn from(err: SpawnError) -> Self {
        Self::Spawn(err)
    }
}

/// The longest prefix of `s` within `limit` bytes that ends on a
/// character boundary.
fn truncate(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl Kernel {
    /// Start a child of `parent` running `cmdline`.
    ///
    /// Blocks until the child's executable has loaded or failed to. A
    /// loaded child does not run until the parent waits for it or exits.
    pub fn create_process(
        self: &Arc<Self>,
        parent: &Arc<Process>,
        cmdline: &str,
    ) -> Result<Pid, LaunchError> {
        let cmdline = truncate(cmdline, self.config().cmdline_limit).to_owned();
        let name = cmdline
            .split_ascii_whitespace()
            .next()
            .unwrap_or_default()
            .to_owned();

        let pid = self.allocate_pid();
        let child = Arc::new(Process::spawned(
            pid,
            name,
            Arc::downgrade(parent),
            self.scheduler(),
        ));

        let body = {
            let kernel = Arc::clone(self);
            let child = Arc::clone(&child);
            Box::new(move || kernel.start_process(child, cmdline))
        };
        if let Err(err) = self.scheduler().spawn(child.name(), body) {
            warn!("pid {}: cannot start thread for {}: {}", pid, child.name(), err);
            return Err(err.into());
        }

        if child.created.wait() {
            debug!("pid {} created pid {} ({})", parent.pid(), pid, child.name());
            Ok(pid)
        } else {
            Err(LaunchError::LoadFailed)
        }
    }

    /// Body of a new process's thread.
    fn start_process(self: Arc<Self>, process: Arc<Process>, cmdline: String) {
        let image = match loader::load(&self, &cmdline) {
            Ok(image) => image,
            Err(err) => {
                info!("pid {}: cannot load {}: {}", process.pid(), process.name(), err);
                process.set_outcome(LoadOutcome::Failed);
                process.transition(ProcessState::Failed);
                process.created.resolve(false);
                return;
            }
        };

        let (entry, esp) = (image.entry, image.esp);
        process.install(image);
        process.set_outcome(LoadOutcome::Succeeded);
        process.transition(ProcessState::PendingRelease);

        match process.parent() {
            Some(parent) => {
                parent
                    .children
                    .lock()
                    .insert(process.pid(), Arc::clone(&process));
            }
            // Nobody can wait for us, so nothing will release us.
            None => {
                process.release.resolve(());
            }
        }
        process.created.resolve(true);

        process.release.wait();
        process.transition(ProcessState::Released);
        self.run(&process, entry, esp);
    }
}
