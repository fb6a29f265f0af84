//! Run event log (`events.tsv`).
//!
//! One row per pipeline event, appended as the run progresses.
//!
//! Columns: `timestamp_ms`, kind, mode, iteration, `duration_ms`, `output_path`,
//!          checksum, message

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A single row in the event log.
#[derive(Debug, Clone)]
pub struct ReportRow {
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// Event kind: `ARTIFACT`, `FIX_ITERATION` or `RUN_END`.
    pub kind: String,
    /// Pipeline mode the event belongs to.
    pub mode: String,
    /// Fix iteration (empty outside the fix loop).
    pub iteration: Option<u32>,
    pub duration_ms: Option<u64>,
    pub output_path: Option<String>,
    pub checksum: Option<String>,
    pub message: String,
}

impl ReportRow {
    /// Create a new report row with required fields.
    pub fn new(timestamp_ms: i64, kind: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            kind: kind.into(),
            mode: String::new(),
            iteration: None,
            duration_ms: None,
            output_path: None,
            checksum: None,
            message: String::new(),
        }
    }

    /// Create a row stamped with the current time.
    pub fn now(kind: impl Into<String>) -> Self {
        Self::new(chrono::Utc::now().timestamp_millis(), kind)
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Format as a TSV line.
    fn to_tsv_line(&self) -> String {
        let iteration = self.iteration.map(|i| i.to_string()).unwrap_or_default();
        let duration = self.duration_ms.map(|d| d.to_string()).unwrap_or_default();
        let output_path = self.output_path.as_deref().unwrap_or("");
        let checksum = self.checksum.as_deref().unwrap_or("");

        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.timestamp_ms,
            sanitize_field(&self.kind),
            sanitize_field(&self.mode),
            iteration,
            duration,
            sanitize_field(output_path),
            checksum,
            sanitize_field(&self.message),
        )
    }
}

/// Sanitize a field value to prevent TSV breakage.
fn sanitize_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

/// TSV header row.
const HEADER: &str = "timestamp_ms\tkind\tmode\titeration\tduration_ms\toutput_path\tchecksum\tmessage";

/// Append-only writer for the event log. Every row is flushed immediately.
pub struct EventLog {
    writer: BufWriter<File>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("writer", &"BufWriter<File>")
            .finish()
    }
}

impl EventLog {
    /// Open the log, writing the header if the file is new.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        let exists = path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);

        if !exists {
            writeln!(writer, "{HEADER}")?;
        }

        Ok(Self { writer })
    }

    /// Append a row and flush it to disk.
    pub fn record(&mut self, row: ReportRow) -> std::io::Result<()> {
        writeln!(self.writer, "{}", row.to_tsv_line())?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn report_row_to_tsv_line_with_all_fields() {
        let row = ReportRow::new(1769687293854, "TESTS")
            .with_mode("fix")
            .with_iteration(2)
            .with_duration_ms(5120)
            .with_output_path("/out/fix-02-test-results.json")
            .with_checksum("abc123")
            .with_message("1/2 commands passed");

        assert_eq!(
            row.to_tsv_line(),
            "1769687293854\tTESTS\tfix\t2\t5120\t/out/fix-02-test-results.json\tabc123\t1/2 commands passed"
        );
    }

    #[test]
    fn report_row_to_tsv_line_with_minimal_fields() {
        let row = ReportRow::new(1000, "RUN_START");
        assert_eq!(row.to_tsv_line(), "1000\tRUN_START\t\t\t\t\t\t");
    }

    #[test]
    fn sanitize_field_removes_control_chars() {
        let sanitized = sanitize_field("line1\nline2\twith\ttabs\rcarriage");
        assert!(!sanitized.contains('\t'));
        assert!(!sanitized.contains('\n'));
        assert!(!sanitized.contains('\r'));
    }

    #[test]
    fn event_log_appends_without_duplicate_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.tsv");

        EventLog::new(&path)
            .unwrap()
            .record(ReportRow::new(1000, "EVENT1"))
            .unwrap();
        EventLog::new(&path)
            .unwrap()
            .record(ReportRow::new(2000, "EVENT2"))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].starts_with("1000\tEVENT1"));
        assert!(lines[2].starts_with("2000\tEVENT2"));
    }
}
