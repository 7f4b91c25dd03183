//! Merged, tagged log view over the subprocess output streams.
//!
//! Regular lines print immediately with a per-source tag. `\r`-terminated
//! progress lines (FPS counters and the like) are rate-limited per source
//! so two chatty children cannot flood the merged view.

use crate::process::LogLine;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const PROGRESS_PRINT_INTERVAL: Duration = Duration::from_secs(1);

/// Orders and prints tagged child output.
pub struct LogMux {
    last_progress: HashMap<&'static str, Instant>,
    /// Latest suppressed progress line per source, flushed on demand.
    pending_progress: HashMap<&'static str, String>,
}

impl LogMux {
    pub fn new() -> Self {
        Self {
            last_progress: HashMap::new(),
            pending_progress: HashMap::new(),
        }
    }

    /// Handles one captured line from the named source.
    pub fn emit(&mut self, tag: &'static str, line: LogLine) {
        if !line.progress {
            println!("[{tag}] {}", line.text);
            return;
        }

        let due = self
            .last_progress
            .get(tag)
            .map(|t| t.elapsed() >= PROGRESS_PRINT_INTERVAL)
            .unwrap_or(true);
        if due {
            println!("[{tag}] {}", line.text);
            self.last_progress.insert(tag, Instant::now());
            self.pending_progress.remove(tag);
        } else {
            self.pending_progress.insert(tag, line.text);
        }
    }

    /// Prints the newest suppressed progress line of every source; used
    /// when a child exits so its final status is not lost.
    pub fn flush(&mut self) {
        for (tag, text) in self.pending_progress.drain() {
            println!("[{tag}] {text}");
        }
    }
}

impl Default for LogMux {
    fn default() -> Self {
        Self::new()
    }
}
