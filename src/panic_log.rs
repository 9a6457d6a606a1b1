//! Panic logging: a hook that appends a timestamped stack trace to a file
//! and terminates the process. Business logic never recovers from panics;
//! the log exists so a crash in a raw-mode TUI leaves evidence behind.

use std::fs::OpenOptions;
use std::io::Write;
use std::panic;
use std::path::PathBuf;

/// Install the panic hook. The previous hook still runs (it restores the
/// terminal and prints to stderr) before the process exits.
pub fn install(path: PathBuf) {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let backtrace = std::backtrace::Backtrace::force_capture();
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
            let _ = writeln!(file, "[{timestamp}] {info}\n{backtrace}\n");
        }
        previous(info);
        std::process::exit(101);
    }));
}
