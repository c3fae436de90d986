//! Bounded capture of stage output.
//!
//! Output is consumed line by line while the stage runs: suite summaries and
//! `::export` lines are picked up as they stream past, and only the last
//! `limit` bytes are kept for the diagnostic.

use super::EXPORT_PREFIX;
use crate::core::SuiteCounts;
use crate::stages::suite;
use regex::Regex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write;

/// What a finished stage leaves behind from its output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CapturedOutput {
    pub(crate) tail: String,
    pub(crate) suite: Option<SuiteCounts>,
    pub(crate) exports: BTreeMap<String, String>,
}

/// Accumulates output lines from stdout and stderr.
#[derive(Debug, Clone)]
pub(crate) struct OutputCollector {
    limit: usize,
    summary: Option<Regex>,
    declared: Vec<String>,
    lines: VecDeque<String>,
    bytes: usize,
    omitted: usize,
    suite: Option<SuiteCounts>,
    exports: BTreeMap<String, String>,
}

impl OutputCollector {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            summary: None,
            declared: Vec::new(),
            lines: VecDeque::new(),
            bytes: 0,
            omitted: 0,
            suite: None,
            exports: BTreeMap::new(),
        }
    }

    pub(crate) fn with_summary(mut self, summary: Option<&Regex>) -> Self {
        self.summary = summary.cloned();
        self
    }

    pub(crate) fn with_exports(mut self, declared: &[String]) -> Self {
        self.declared = declared.to_vec();
        self
    }

    /// Upper bound on a pending, unterminated line.
    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    /// Consumes one line, without its terminator.
    pub(crate) fn push_line(&mut self, line: &str) {
        let line = line.trim_end_matches('\r');
        if let Some(summary) = &self.summary {
            if let Some(counts) = suite::count(summary, line) {
                *self.suite.get_or_insert_with(SuiteCounts::default) += counts;
            }
        }
        if let Some((key, value)) = export(line, &self.declared) {
            self.exports.insert(key.to_string(), value.to_string());
        }

        let kept = last_bytes(line, self.limit).to_string();
        self.bytes += kept.len() + 1;
        self.lines.push_back(kept);
        while self.bytes > self.limit + 1 && self.lines.len() > 1 {
            if let Some(dropped) = self.lines.pop_front() {
                self.bytes -= dropped.len() + 1;
                self.omitted += 1;
            }
        }
    }

    /// Takes everything collected so far, leaving the collector empty.
    pub(crate) fn finish(&mut self) -> CapturedOutput {
        let mut tail = String::with_capacity(self.bytes + 32);
        if self.omitted > 0 {
            let _ = writeln!(tail, "[{} earlier lines omitted]", self.omitted);
        }
        for line in self.lines.drain(..) {
            tail.push_str(&line);
            tail.push('\n');
        }
        self.bytes = 0;
        self.omitted = 0;
        CapturedOutput {
            tail,
            suite: self.suite.take(),
            exports: std::mem::take(&mut self.exports),
        }
    }
}

/// Returns the last `limit` bytes of `line`, on a char boundary.
fn last_bytes(line: &str, limit: usize) -> &str {
    if line.len() <= limit {
        return line;
    }
    let mut start = line.len() - limit;
    while !line.is_char_boundary(start) {
        start += 1;
    }
    &line[start..]
}

/// Parses `::export KEY=VALUE` for a declared key.
fn export<'a>(line: &'a str, declared: &[String]) -> Option<(&'a str, &'a str)> {
    let (key, value) = line.strip_prefix(EXPORT_PREFIX)?.split_once('=')?;
    let key = key.trim();
    declared.iter().any(|d| d == key).then_some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::suite::compile_summary;
    use pretty_assertions::assert_eq;

    fn collect(collector: OutputCollector, output: &str) -> CapturedOutput {
        let mut collector = collector;
        for line in output.lines() {
            collector.push_line(line);
        }
        collector.finish()
    }

    #[test]
    fn test_tail_keeps_whole_lines() {
        let output = "line one\nline two\nline three\n";
        assert_eq!(collect(OutputCollector::new(100), output).tail, output);
        assert_eq!(
            collect(OutputCollector::new(15), output).tail,
            "[2 earlier lines omitted]\nline three\n"
        );
    }

    #[test]
    fn test_long_line_keeps_its_end() {
        let line = format!("{}END", "x".repeat(100));
        assert_eq!(collect(OutputCollector::new(8), &line).tail, "xxxxxEND\n");
    }

    #[test]
    fn test_exports_only_declared() {
        let output = "::export TOKEN=abc\n::export OTHER=1\nnoise\n::export TOKEN=def=ghi\r\n";
        let captured = collect(OutputCollector::new(1024).with_exports(&["TOKEN".to_string()]), output);
        assert_eq!(captured.exports.len(), 1);
        assert_eq!(captured.exports["TOKEN"], "def=ghi");
    }

    #[test]
    fn test_suite_counted_beyond_kept_tail() {
        let summary = compile_summary("unit", r"(?P<passed>\d+) passed(?:, (?P<failed>\d+) failed)?").unwrap();
        let output: String = (0..1000).map(|i| format!("suite {i}: 2 passed, 1 failed\n")).collect();

        let captured = collect(OutputCollector::new(256).with_summary(Some(&summary)), &output);

        assert_eq!(captured.suite, Some(SuiteCounts::new(2000, 1000)));
        assert!(captured.tail.len() < 256 + 64, "tail grew to {} bytes", captured.tail.len());
        assert!(captured.tail.ends_with("suite 999: 2 passed, 1 failed\n"));
    }

    #[test]
    fn test_finish_drains() {
        let mut collector = OutputCollector::new(64);
        collector.push_line("hello");
        assert_eq!(collector.finish().tail, "hello\n");
        assert_eq!(collector.finish(), CapturedOutput::default());
    }
}
