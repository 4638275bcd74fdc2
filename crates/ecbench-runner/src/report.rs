//! Parsers for the storage client's textual reports and for the worker log.
//!
//! The client's human-readable reports embed one duration at a fixed line
//! position (2nd line for write, 3rd for read). That line-position scan is a
//! de facto protocol the client must not silently break; clients that emit
//! the structured `duration=<seconds>` field are preferred and parsed first.

use thiserror::Error;

pub const DURATION_MARKER: &str = "duration:";
pub const DURATION_FIELD: &str = "duration=";

pub const WRITE_REPORT_LINES: usize = 2;
pub const READ_REPORT_LINES: usize = 3;

/// Worker-log markers for the three repair sub-durations.
pub const LOAD_MARKER: &str = "repair load =";
pub const COMPUTE_MARKER: &str = "repair compute =";
pub const WRITEBACK_MARKER: &str = "repair writeback =";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("report has {got} lines, expected {expected}")]
    UnexpectedShape { expected: usize, got: usize },
    #[error("duration marker missing from report line {line}")]
    MissingMarker { line: usize },
    #[error("unparseable duration value '{0}'")]
    BadValue(String),
}

/// Duration of a write operation. Legacy reports carry it on the 2nd line.
pub fn parse_write_report(report: &str) -> Result<f64, ReportError> {
    parse_duration_at(report, WRITE_REPORT_LINES)
}

/// Duration of a read/repair operation. Legacy reports carry it on the 3rd line.
pub fn parse_read_report(report: &str) -> Result<f64, ReportError> {
    parse_duration_at(report, READ_REPORT_LINES)
}

fn parse_duration_at(report: &str, expected_lines: usize) -> Result<f64, ReportError> {
    if let Some(value) = structured_duration(report) {
        return Ok(value);
    }
    let lines: Vec<&str> = report.lines().collect();
    if lines.len() != expected_lines {
        return Err(ReportError::UnexpectedShape {
            expected: expected_lines,
            got: lines.len(),
        });
    }
    let line = lines[expected_lines - 1];
    let at = line.find(DURATION_MARKER).ok_or(ReportError::MissingMarker {
        line: expected_lines,
    })?;
    let raw = line[at + DURATION_MARKER.len()..].trim();
    raw.parse()
        .map_err(|_| ReportError::BadValue(raw.to_string()))
}

fn structured_duration(report: &str) -> Option<f64> {
    report
        .lines()
        .find_map(|line| line.trim().strip_prefix(DURATION_FIELD))
        .and_then(|value| value.trim().parse().ok())
}

/// Flat, time-ordered sub-duration lists scanned out of the worker log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakdownLists {
    pub load: Vec<f64>,
    pub compute: Vec<f64>,
    pub writeback: Vec<f64>,
}

impl BreakdownLists {
    /// Whether the record counts match the strict round-robin node order the
    /// decode loop emits. Slicing by position is only sound when this holds;
    /// callers must treat a mismatch as a misattribution risk.
    pub fn matches_round_robin(&self, nodes: usize, repeat: usize) -> bool {
        let want = nodes * repeat;
        self.load.len() == want && self.compute.len() == want && self.writeback.len() == want
    }
}

pub fn scan_worker_log(text: &str) -> BreakdownLists {
    let mut lists = BreakdownLists::default();
    for line in text.lines() {
        scan_marker(line, LOAD_MARKER, &mut lists.load);
        scan_marker(line, COMPUTE_MARKER, &mut lists.compute);
        scan_marker(line, WRITEBACK_MARKER, &mut lists.writeback);
    }
    lists
}

fn scan_marker(line: &str, marker: &str, out: &mut Vec<f64>) {
    if let Some(at) = line.find(marker) {
        if let Ok(value) = line[at + marker.len()..].trim().parse() {
            out.push(value);
        }
    }
}

/// Chunk `node` of a flat list: elements `[repeat * node, repeat * (node + 1))`.
/// Missing entries come back as the 0.0 sentinel so a short log never shifts
/// later nodes' chunks.
pub fn node_slice(list: &[f64], node: usize, repeat: usize) -> Vec<f64> {
    (node * repeat..(node + 1) * repeat)
        .map(|i| list.get(i).copied().unwrap_or(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_report_duration_on_second_line() {
        let report = "writing /bench_0\nwrite duration: 1.25\n";
        assert_eq!(parse_write_report(report), Ok(1.25));
    }

    #[test]
    fn read_report_duration_on_third_line() {
        let report = "reading /bench_0_0\nstripe assembled\nread duration: 0.5\n";
        assert_eq!(parse_read_report(report), Ok(0.5));
    }

    #[test]
    fn structured_field_wins_regardless_of_shape() {
        let report = "object=/bench_0\nduration=2.75\nstatus=ok\nextra\n";
        assert_eq!(parse_write_report(report), Ok(2.75));
        assert_eq!(parse_read_report(report), Ok(2.75));
    }

    #[test]
    fn wrong_line_count_is_rejected() {
        assert_eq!(
            parse_write_report("connection refused\n"),
            Err(ReportError::UnexpectedShape {
                expected: 2,
                got: 1
            })
        );
        assert_eq!(
            parse_read_report("a\nb\nc\nd\n"),
            Err(ReportError::UnexpectedShape {
                expected: 3,
                got: 4
            })
        );
    }

    #[test]
    fn missing_marker_and_bad_value_are_distinguished() {
        assert_eq!(
            parse_write_report("writing\nall done\n"),
            Err(ReportError::MissingMarker { line: 2 })
        );
        assert_eq!(
            parse_write_report("writing\nwrite duration: fast\n"),
            Err(ReportError::BadValue("fast".to_string()))
        );
    }

    #[test]
    fn worker_log_scan_collects_all_three_kinds() {
        let log = "\
worker[2] repair load = 0.11
worker[2] repair compute = 0.02
worker[2] repair writeback = 0.03
unrelated chatter
worker[5] repair load = 0.12
worker[5] repair compute = garbage
worker[5] repair writeback = 0.04
";
        let lists = scan_worker_log(log);
        assert_eq!(lists.load, vec![0.11, 0.12]);
        assert_eq!(lists.compute, vec![0.02]);
        assert_eq!(lists.writeback, vec![0.03, 0.04]);
        assert!(!lists.matches_round_robin(2, 1));
    }

    #[test]
    fn node_slice_picks_contiguous_chunks() {
        let flat: Vec<f64> = (0..60).map(|i| i as f64).collect();
        for node in 0..6 {
            let chunk = node_slice(&flat, node, 10);
            let want: Vec<f64> = (node * 10..node * 10 + 10).map(|i| i as f64).collect();
            assert_eq!(chunk, want);
        }
    }

    #[test]
    fn node_slice_pads_short_lists_with_sentinels() {
        let flat = vec![1.0, 2.0, 3.0];
        assert_eq!(node_slice(&flat, 0, 2), vec![1.0, 2.0]);
        assert_eq!(node_slice(&flat, 1, 2), vec![3.0, 0.0]);
        assert_eq!(node_slice(&flat, 2, 2), vec![0.0, 0.0]);
    }
}
