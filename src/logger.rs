//! Kernel logger
//!
//! Routes the `log` facade to the kernel console as `[LEVEL] target: msg`
//! lines. Each record is formatted first and written as one unit.

use alloc::sync::Arc;

use log::{LevelFilter, Metadata, Record};
use spin::Once;

use crate::console::SerialConsole;

struct ConsoleLogger {
    console: Once<Arc<SerialConsole>>,
}

static LOGGER: ConsoleLogger = ConsoleLogger {
    console: Once::new(),
};

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(console) = self.console.get() {
            let line = alloc::format!(
                "[{:<5}] {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            );
            console.write(line.as_bytes());
        }
    }

    fn flush(&self) {}
}

/// Install the console logger.
///
/// The first call wins; later calls only adjust the level.
pub fn init(console: Arc<SerialConsole>, level: LevelFilter) {
    LOGGER.console.call_once(|| console);
    // Fails only if another logger is already installed.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
