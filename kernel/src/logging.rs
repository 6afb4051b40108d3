//! Kernel logging facility
//!
//! Backs the `log` facade used throughout the VM system. Records are
//! formatted as "[LEVEL] message" and handed to a sink function, which is the
//! COM1 serial port on x86_64.

use core::fmt;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Where formatted log lines end up.
pub type Sink = fn(fmt::Arguments);

/// Global logger instance available throughout the kernel
pub static LOGGER: Logger = Logger::new(default_sink);

#[cfg(target_arch = "x86_64")]
fn default_sink(args: fmt::Arguments) {
    crate::serial::_print(args);
}

#[cfg(not(target_arch = "x86_64"))]
fn default_sink(_args: fmt::Arguments) {}

/// Thread-safe logger implementation
pub struct Logger {
    sink: Mutex<Sink>,
}

impl Logger {
    pub const fn new(sink: Sink) -> Logger {
        Logger {
            sink: Mutex::new(sink),
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    /// Formats messages as "[LEVEL] message"
    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // held across the write so lines from different cores don't interleave
            let sink = self.sink.lock();
            (*sink)(format_args!("[{}] {}\n", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Initializes the logging system
///
/// # Arguments
/// * `cpu_id` - CPU core identifier. Only core 0 installs the logger
///
/// # Notes
/// * Debug builds log at `LevelFilter::Debug`, release builds at
///   `LevelFilter::Info`
pub fn init(cpu_id: u32) -> Result<(), SetLoggerError> {
    if cpu_id != 0 {
        return Ok(());
    }
    log::set_logger(&LOGGER)?;
    log::set_max_level(
        #[cfg(debug_assertions)]
        LevelFilter::Debug,
        #[cfg(not(debug_assertions))]
        LevelFilter::Info,
    );
    Ok(())
}
