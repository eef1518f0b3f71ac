//! Kernel context
//!
//! Owns the collaborators supplied by the platform together with the state
//! shared by every process: the filesystem gate, the user frame pool and
//! the pid counter. Process operations are methods on `Kernel`.

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicI32, Ordering};

use log::info;

use crate::config::KernelConfig;
use crate::console::{Console, SerialConsole};
use crate::fs::{FileSystem, FsGate};
use crate::logger;
use crate::mm::{FramePool, Mmu};
use crate::process::{Pid, Process};
use crate::sched::Scheduler;
use crate::trap::UserMode;

/// The services the surrounding kernel provides.
pub struct Platform {
    pub scheduler: Arc<dyn Scheduler>,
    pub mmu: Arc<dyn Mmu>,
    pub user: Arc<dyn UserMode>,
    pub console: Arc<dyn Console>,
    pub fs: Arc<dyn FileSystem>,
}

pub struct Kernel {
    config: KernelConfig,
    scheduler: Arc<dyn Scheduler>,
    mmu: Arc<dyn Mmu>,
    user: Arc<dyn UserMode>,
    console: Arc<SerialConsole>,
    fs: FsGate,
    frames: Arc<FramePool>,
    next_pid: AtomicI32,
}

impl Kernel {
    pub fn new(platform: Platform, config: KernelConfig) -> Arc<Self> {
        Arc::new(Self {
            frames: FramePool::new(config.user_pages),
            fs: FsGate::new(platform.fs),
            scheduler: platform.scheduler,
            mmu: platform.mmu,
            user: platform.user,
            console: Arc::new(SerialConsole::new(platform.console)),
            next_pid: AtomicI32::new(1),
            config,
        })
    }

    /// Route the `log` facade to the console at the configured level.
    pub fn init_logging(&self) {
        logger::init(Arc::clone(&self.console), self.config.log_level);
        info!(
            "process layer up: {} user frames, log level {}",
            self.frames.total_frames(),
            self.config.log_level
        );
    }

    /// Create the record for the thread that boots the system.
    ///
    /// It has no parent and is already running.
    pub fn boot_process(&self, name: &str) -> Arc<Process> {
        let pid = self.allocate_pid();
        info!("boot process {} is pid {}", name, pid);
        Arc::new(Process::boot(pid, String::from(name), self.scheduler.as_ref()))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn fs(&self) -> &FsGate {
        &self.fs
    }

    pub fn frames(&self) -> &Arc<FramePool> {
        &self.frames
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub fn mmu(&self) -> &dyn Mmu {
        self.mmu.as_ref()
    }

    pub fn user(&self) -> &dyn UserMode {
        self.user.as_ref()
    }

    pub fn console(&self) -> &SerialConsole {
        &self.console
    }

    pub(crate) fn allocate_pid(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::Relaxed)
    }

    /// Write a formatted message to the console as one unit.
    pub(crate) fn print(&self, args: fmt::Arguments<'_>) {
        let text = alloc::fmt::format(args);
        self.fs.locked(|| self.console.write(text.as_bytes()));
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("fs", &self.fs)
            .field("free_frames", &self.frames.free_frames())
            .finish()
    }
}
