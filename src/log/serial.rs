//! Serial-backed `Logger` implementation.
//!
//! Grounded on `arch/x86_64/serial.rs`: writes formatted lines to COM1 with a
//! `[LEVEL][target]` prefix. Under `cfg(test)` it falls back to stdout so
//! unit tests can see kernel log lines without a real UART.

use core::fmt;

use super::{LogLevel, Logger};

pub struct SerialLogger;

impl Logger for SerialLogger {
    fn log(&self, level: LogLevel, target: &str, args: fmt::Arguments<'_>) {
        let tag = match level {
            LogLevel::Error => "ERR ",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DBG ",
        };

        #[cfg(not(test))]
        {
            use crate::arch::x86_64::serial::_print;
            _print(format_args!("[{tag}][{target}] {args}\n"));
        }
        #[cfg(test)]
        {
            std::println!("[{tag}][{target}] {args}");
        }
    }
}
