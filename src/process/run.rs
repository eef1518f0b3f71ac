//! Process main loop.

use alloc::sync::Arc;

use log::{debug, info};

use super::{Process, KILLED};
use crate::kernel::Kernel;
use crate::mm::VirtAddr;
use crate::syscall::{self, Flow};
use crate::trap::{Trap, TrapFrame};

impl Kernel {
    /// Run `process` in user mode from `entry` until it exits.
    pub(super) fn run(self: &Arc<Self>, process: &Arc<Process>, entry: VirtAddr, esp: VirtAddr) {
        self.mmu().activate(process.space().as_ref());

        let mut frame = TrapFrame::new(entry, esp);
        let status = loop {
            match self.user().resume(process, &mut frame) {
                Trap::Syscall => match syscall::dispatch(self, process, &mut frame) {
                    Flow::Return => {}
                    Flow::Exit(status) => break status,
                    Flow::Halt => {
                        info!("pid {} ({}) halted the machine", process.pid(), process.name());
                        self.scheduler().power_off();
                    }
                },
                Trap::Fault { addr } => {
                    debug!(
                        "pid {} ({}): fault at {}, eip {}",
                        process.pid(),
                        process.name(),
                        addr,
                        frame.eip
                    );
                    break KILLED;
                }
            }
        };

        self.terminate(process, status);
    }
}
