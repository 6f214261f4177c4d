//! Process-wide notification level and the stderr logging macros.
//!
//! All diagnostics go to stderr so the binary protocol stream on stdout-less
//! sockets is never polluted. The level is set once at startup from the CLI:
//! 0 = silent, 1 = errors, 2 = connection lifecycle, 3+ = traffic traces.

use std::sync::atomic::{AtomicU32, Ordering};

/// Global notification level.
pub static NOTICE_LEVEL: AtomicU32 = AtomicU32::new(2);

/// Returns the current notification level.
#[inline]
pub fn notice_level() -> u32 {
    NOTICE_LEVEL.load(Ordering::Relaxed)
}

/// Sets the notification level.
#[inline]
pub fn set_notice_level(level: u32) {
    NOTICE_LEVEL.store(level, Ordering::Relaxed);
}

/// Print a line to stderr unconditionally.
#[macro_export]
macro_rules! display {
    ($($arg:tt)*) => { eprintln!($($arg)*) };
}

/// Print a line to stderr when the notification level is at or above `level`.
#[macro_export]
macro_rules! verbose {
    ($level:expr, $($arg:tt)*) => {
        if $crate::verbose::notice_level() >= $level {
            eprintln!($($arg)*);
        }
    };
}
