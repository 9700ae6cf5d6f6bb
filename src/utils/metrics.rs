//! Controller counters and their export.
//!
//! Counters are owned by the control loop (single thread, no locking). At
//! shutdown they are logged as a summary and, when a trace directory is
//! given, written as a `metric,value,description` CSV next to the event trace.

use std::path::Path;

use csv::Writer;
use log::info;
use serde::Serialize;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    /// Control loop iterations
    pub cycles: u64,
    /// Complete lines received
    pub lines: u64,
    /// Lines that overflowed the assembly buffer
    pub truncated_lines: u64,
    /// Tokens dispatched
    pub commands: u64,
    /// Channel moves applied (each `DP` target counts once)
    pub applied: u64,
    /// Tokens rejected with E100
    pub unsupported: u64,
    /// Tokens without digits, applied as relative 0
    pub fallback_values: u64,
    pub default_position_resets: u64,
    /// Channels that went idle and were switched off
    pub idle_transitions: u64,
}

#[derive(Debug, Serialize)]
struct MetricRow {
    metric: &'static str,
    value: u64,
    description: &'static str,
}

impl Metrics {
    fn rows(&self) -> [MetricRow; 9] {
        [
            MetricRow { metric: "cycles", value: self.cycles, description: "Control loop iterations" },
            MetricRow { metric: "lines", value: self.lines, description: "Command lines received" },
            MetricRow { metric: "truncated_lines", value: self.truncated_lines, description: "Lines longer than the buffer" },
            MetricRow { metric: "commands", value: self.commands, description: "Tokens dispatched" },
            MetricRow { metric: "applied", value: self.applied, description: "Channel moves applied" },
            MetricRow { metric: "unsupported", value: self.unsupported, description: "E100 responses" },
            MetricRow { metric: "fallback_values", value: self.fallback_values, description: "Tokens without a numeric value" },
            MetricRow { metric: "default_position_resets", value: self.default_position_resets, description: "DP commands" },
            MetricRow { metric: "idle_transitions", value: self.idle_transitions, description: "Channels switched off by the watchdog" },
        ]
    }

    pub fn log_summary(&self) {
        info!(
            "[Metrics] cycles={} lines={} (truncated {}) commands={} applied={} unsupported={} fallback={} dp={} idle={}",
            self.cycles,
            self.lines,
            self.truncated_lines,
            self.commands,
            self.applied,
            self.unsupported,
            self.fallback_values,
            self.default_position_resets,
            self.idle_transitions,
        );
    }

    /// Writes the summary as CSV, replacing any previous file.
    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<(), csv::Error> {
        let mut writer = Writer::from_path(path)?;
        for row in self.rows() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        let metrics = Metrics { lines: 3, unsupported: 1, ..Metrics::default() };
        metrics.export_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("metric,value,description"));
        assert!(text.contains("lines,3,Command lines received"));
        assert!(text.contains("unsupported,1,E100 responses"));
        assert_eq!(text.lines().count(), 10);
    }
}
