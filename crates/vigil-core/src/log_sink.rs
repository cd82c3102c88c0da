//! Destinations for tunnel progress lines

use std::sync::{Arc, Mutex};

use tracing::info;

/// Receives human-readable progress and error lines from a tunnel worker
pub trait LogSink: Send + Sync {
    /// Record one line (no trailing newline)
    fn write_line(&self, line: &str);
}

/// Forwards lines to `tracing` at info level
#[derive(Clone, Debug)]
pub struct TracingLogSink {
    label: String,
}

impl TracingLogSink {
    /// Tag every line with `label` (typically the endpoint)
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl LogSink for TracingLogSink {
    fn write_line(&self, line: &str) {
        info!(tunnel = %self.label, "{}", line);
    }
}

/// Keeps lines in memory so tests can assert on them
#[derive(Clone, Debug, Default)]
pub struct MemoryLogSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLogSink {
    /// An empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every line written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether any line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn write_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}
