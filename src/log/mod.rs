//! Kernel logging subsystem.
//!
//! `Logger`/`LogLevel`/`try_get_logger` backed by `arch/x86_64/serial.rs`
//! (16550 UART). Logging never panics if the backend isn't installed yet —
//! early boot code may log before `init` runs.

pub mod serial;

use core::fmt;
use spin::Once;

/// Severity of a log line, ordered so `Error < Warn < Info < Debug` by
/// variant discriminant (lower means "always shown").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

/// Backend a `Logger` writes formatted lines to.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, target: &str, args: fmt::Arguments<'_>);
}

static LOGGER: Once<&'static dyn Logger> = Once::new();

/// Install the global logger. Only the first call takes effect, matching
/// the boot-once posture used for arch init.
pub fn init(logger: impl Logger + 'static) {
    // SAFETY-equivalent: leak once into a 'static. Boot-time allocation is
    // expected to never be freed for kernel singletons.
    let boxed: &'static dyn Logger = alloc::boxed::Box::leak(alloc::boxed::Box::new(logger));
    LOGGER.call_once(|| boxed);
}

pub fn try_get_logger() -> Option<&'static dyn Logger> {
    LOGGER.get().copied()
}

#[doc(hidden)]
pub fn __log(level: LogLevel, target: &str, args: fmt::Arguments<'_>) {
    if let Some(l) = try_get_logger() {
        l.log(level, target, args);
    }
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $target:expr, $($arg:tt)*) => {
        $crate::log::__log($level, $target, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($target:expr, $($arg:tt)*) => {
        $crate::klog!($crate::log::LogLevel::Error, $target, $($arg)*)
    };
}
#[macro_export]
macro_rules! log_warn {
    ($target:expr, $($arg:tt)*) => {
        $crate::klog!($crate::log::LogLevel::Warn, $target, $($arg)*)
    };
}
#[macro_export]
macro_rules! log_info {
    ($target:expr, $($arg:tt)*) => {
        $crate::klog!($crate::log::LogLevel::Info, $target, $($arg)*)
    };
}
#[macro_export]
macro_rules! log_debug {
    ($target:expr, $($arg:tt)*) => {
        $crate::klog!($crate::log::LogLevel::Debug, $target, $($arg)*)
    };
}

pub use crate::{klog, log_debug, log_err, log_info, log_warn};
