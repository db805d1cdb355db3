//! Bridges the `log` facade to the kernel's output sinks.
//!
//! Every record goes to the serial port; warnings and errors are mirrored
//! to the console so they are visible without a serial capture. Install
//! with [`init`] before bringing up any subsystem that logs.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        #[cfg(target_os = "none")]
        {
            crate::drivers::serial::_print(format_args!(
                "[{:5} {}] {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
            if record.level() <= Level::Warn {
                crate::println!("[{:5}] {}", record.level(), record.args());
            }
        }
        #[cfg(not(target_os = "none"))]
        {
            std::eprintln!(
                "[{:5} {}] {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the logger. Idempotent; later calls are ignored.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}
