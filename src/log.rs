//! Minimal logging facade used throughout the device I/O core.
//!
//! The kernel's own logging subsystem (formatting, ring buffer, the `/device/kconsole`
//! sink) lives outside this crate — see §6 of the device core's external interfaces.
//! This module only defines the contract drivers log through ([`LogSink`]) and the
//! `info!`/`warn!`/`error!` macros that forward to whichever sink was installed with
//! [`set_sink`]. Until a sink is installed, log lines are dropped rather than panicking,
//! so unit tests that exercise driver logic never need to wire one up.

use core::fmt::Arguments;
use spin::Once;

/// A log sink, implemented by the kernel's console/`kconsole` driver in production and
/// by a line-collecting mock in tests.
pub trait LogSink: Sync {
    fn log(&self, level: Level, ctx: &str, args: Arguments<'_>);
}

/// Severity of a logged line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[allow(dead_code)]
pub enum Level {
    Info,
    Warn,
    Error,
}

static SINK: Once<&'static dyn LogSink> = Once::new();

/// Installs the kernel-provided sink. Idempotent: later calls are ignored, matching the
/// "first writer wins" contract of `spin::Once`.
pub fn set_sink(sink: &'static dyn LogSink) {
    SINK.call_once(|| sink);
}

#[doc(hidden)]
pub fn dispatch(level: Level, ctx: &str, args: Arguments<'_>) {
    if let Some(sink) = SINK.get() {
        sink.log(level, ctx, args);
    }
}

#[macro_export]
macro_rules! info {
    ($ctx: literal, $($arg: tt)*) => {
        $crate::log::dispatch($crate::log::Level::Info, $ctx, format_args!($($arg)*))
    };
    ($($arg: tt)*) => {
        $crate::log::dispatch($crate::log::Level::Info, "", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($ctx: literal, $($arg: tt)*) => {
        $crate::log::dispatch($crate::log::Level::Warn, $ctx, format_args!($($arg)*))
    };
    ($($arg: tt)*) => {
        $crate::log::dispatch($crate::log::Level::Warn, "", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($ctx: literal, $($arg: tt)*) => {
        $crate::log::dispatch($crate::log::Level::Error, $ctx, format_args!($($arg)*))
    };
    ($($arg: tt)*) => {
        $crate::log::dispatch($crate::log::Level::Error, "", format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use spin::Mutex;

    struct RecordingSink {
        lines: Mutex<alloc::vec::Vec<String>>,
    }

    impl LogSink for RecordingSink {
        fn log(&self, level: Level, ctx: &str, args: Arguments<'_>) {
            self.lines
                .lock()
                .push(alloc::format!("[{level:?}] {ctx}: {args}"));
        }
    }

    #[test]
    fn dispatch_without_sink_does_not_panic() {
        dispatch(Level::Info, "test", format_args!("hello"));
    }
}
