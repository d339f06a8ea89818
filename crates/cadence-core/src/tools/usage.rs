//! Fire-and-forget tool usage telemetry hook.

use std::collections::HashMap;
use std::sync::Mutex;

/// Receives one call per executed invocation. Must not block.
pub trait UsageRecorder: Send + Sync {
    fn record(&self, tool_name: &str);
}

/// In-memory counter, handy for tests and CLI summaries.
#[derive(Debug, Default)]
pub struct UsageCounter {
    counts: Mutex<HashMap<String, usize>>,
}

impl UsageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, tool_name: &str) -> usize {
        self.counts
            .lock()
            .map(|counts| counts.get(tool_name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts
            .lock()
            .map(|counts| counts.values().sum())
            .unwrap_or(0)
    }

    /// Counts sorted by tool name.
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        let mut entries: Vec<_> = self
            .counts
            .lock()
            .map(|counts| counts.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        entries.sort();
        entries
    }
}

impl UsageRecorder for UsageCounter {
    fn record(&self, tool_name: &str) {
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(tool_name.to_string()).or_default() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_tracks_per_tool_totals() {
        let counter = UsageCounter::new();
        counter.record("read_file");
        counter.record("read_file");
        counter.record("list_files");

        assert_eq!(counter.count("read_file"), 2);
        assert_eq!(counter.count("write_to_file"), 0);
        assert_eq!(counter.total(), 3);
        assert_eq!(
            counter.snapshot(),
            vec![("list_files".to_string(), 1), ("read_file".to_string(), 2)]
        );
    }
}
