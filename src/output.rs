//! Console output for step execution.
//!
//! The per-step start/finish lines and captured output blocks are the tool's
//! user-facing product, so they go straight to stdout rather than through
//! tracing. A single process-wide lock serializes whole log records so lines
//! from concurrently running steps never interleave.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Local;

const LEVEL_INDENT: &str = "  ";

/// Column width of the timestamp prefix; detail lines align under it.
const DETAIL_OFFSET: &str = "                          ";

static CONSOLE: Mutex<()> = Mutex::new(());

fn console() -> MutexGuard<'static, ()> {
    CONSOLE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Print a timestamped line, indented by nesting level.
pub fn stamped(level: usize, message: &str) {
    let indent = LEVEL_INDENT.repeat(level);
    let now = Local::now().format("%a %b %e %H:%M:%S %Y");
    let _guard = console();
    println!("{now}: {indent}{message}");
}

/// Print detail lines without a timestamp, aligned under the stamped line
/// above. Multi-line messages keep the same indent on every line.
pub fn detail(level: usize, message: &str) {
    let indent = format!("{DETAIL_OFFSET}{}", LEVEL_INDENT.repeat(level));
    let _guard = console();
    if message.is_empty() {
        println!();
        return;
    }
    for line in message.lines() {
        println!("{indent}{line}");
    }
}

/// Print a blank separator line.
pub fn blank() {
    let _guard = console();
    println!();
}

/// Format an elapsed duration the way the completion lines expect:
/// `Xh Ym` above an hour, `Xm Ys` above a minute, `X.XXs` otherwise.
pub fn pretty_time(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    if total > 3600 {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    } else if total > 60 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{:.2}s", elapsed.as_secs_f64())
    }
}
