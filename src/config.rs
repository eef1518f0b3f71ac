//! Kernel configuration
//!
//! Run-time tunables for the process layer. The default log level is
//! selected at compile time through the `log-*` cargo features.

use log::LevelFilter;

use crate::mm::PAGE_SIZE;

/// Maximum number of program headers accepted in an executable.
pub const MAX_PROGRAM_HEADERS: u16 = 1024;

/// Default log level selected by cargo features (most verbose wins).
pub const fn default_log_level() -> LevelFilter {
    if cfg!(feature = "log-trace") {
        LevelFilter::Trace
    } else if cfg!(feature = "log-debug") {
        LevelFilter::Debug
    } else if cfg!(feature = "log-info") {
        LevelFilter::Info
    } else if cfg!(feature = "log-warn") {
        LevelFilter::Warn
    } else if cfg!(feature = "log-error") {
        LevelFilter::Error
    } else {
        LevelFilter::Off
    }
}

/// Process layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of frames in the user pool.
    pub user_pages: usize,
    /// Longest command line handed to a new process, in bytes.
    pub cmdline_limit: usize,
    /// Program header cap for the loader.
    pub max_program_headers: u16,
    /// Maximum log level installed by `Kernel::init_logging`.
    pub log_level: LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            user_pages: 256,
            cmdline_limit: PAGE_SIZE - 1,
            max_program_headers: MAX_PROGRAM_HEADERS,
            log_level: default_log_level(),
        }
    }
}
