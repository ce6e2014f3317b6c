/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// Usage:
/// ```ignore
/// log_status!("matrix", "Fetched {} platforms", count);
/// log_status!("deploy", "OS: {}. Build: {}. Running...", os, build);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `shipcheck::config` instead of `shipcheck::core::config`.
// Utilities stay behind their `utils::` prefix so `core::shell` and
// `utils::shell` never collide at the crate root.
pub use core::*;
