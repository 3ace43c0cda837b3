//! System module: external process invocation, polling primitives, logging macros

pub mod poll;
pub mod process;

pub use poll::{poll_for, poll_until};
pub use process::{
    check_environment, drain_lines, invoke, resolve_program, spawn_piped, stderr_diagnostic,
    CommandOutput, LineTail,
};

/// Success line, rendered as `[+] ...`
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {{
        $crate::log::info!(target: "success", $($arg)*);
    }}
}

/// Phase banner, rendered as `=== ... ===`
#[macro_export]
macro_rules! log_phase {
    ($($arg:tt)*) => {{
        $crate::log::info!(target: "phase", $($arg)*);
    }}
}

/// Indented detail line, rendered as `    -> ...`
#[macro_export]
macro_rules! log_detail {
    ($($arg:tt)*) => {{
        $crate::log::info!(target: "detail", $($arg)*);
    }}
}
