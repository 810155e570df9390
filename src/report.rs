//! Turns a finished [`ScanReport`] into terminal output.
use crate::results::ScanRecord;
use crate::scanner::ScanReport;
use crate::warning;
use colored::Colorize;
use itertools::Itertools;

pub const RESULT_HEADER: &str = "----Scan Result----";
pub const NOTHING_FOUND: &str = "No open port";
pub const EXHAUSTION_WARNING: &str = "too many open sockets, please slow down";

/// Output settings for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    pub greppable: bool,
    pub accessible: bool,
    pub show_cost: bool,
}

impl Reporter {
    pub const fn new(greppable: bool, accessible: bool, show_cost: bool) -> Self {
        Self {
            greppable,
            accessible,
            show_cost,
        }
    }

    /// `<addr>:<port> is <outcome>`, with the attempt time when costs are shown.
    pub fn record_line(&self, record: &ScanRecord) -> String {
        let line = format!("{}:{} is {}", record.address, record.port, record.outcome);
        match record.elapsed {
            Some(elapsed) if self.show_cost => format!("{line} ({} ms)", elapsed.as_millis()),
            _ => line,
        }
    }

    /// One `<addr> -> [p1,p2]` line per address with at least one open port.
    ///
    /// Records are expected in address order, as the scanner returns them.
    pub fn greppable_lines(records: &[ScanRecord]) -> Vec<String> {
        let by_address = records
            .iter()
            .filter(|record| record.outcome.is_open())
            .chunk_by(|record| record.address);
        let lines = by_address
            .into_iter()
            .map(|(address, group)| {
                format!("{address} -> [{}]", group.map(|r| r.port).join(","))
            })
            .collect();
        lines
    }

    /// Every stdout line for `report`, uncoloured.
    pub fn lines(&self, report: &ScanReport) -> Vec<String> {
        self.entries(report).into_iter().map(|(line, _)| line).collect()
    }

    /// Output lines paired with whether they name an open port.
    fn entries(&self, report: &ScanReport) -> Vec<(String, bool)> {
        if self.greppable {
            return Self::greppable_lines(&report.records)
                .into_iter()
                .map(|line| (line, false))
                .collect();
        }

        let mut entries = vec![(RESULT_HEADER.to_owned(), false)];
        if report.records.is_empty() {
            entries.push((NOTHING_FOUND.to_owned(), false));
        }
        entries.extend(
            report
                .records
                .iter()
                .map(|record| (self.record_line(record), record.outcome.is_open())),
        );
        entries
    }

    #[cfg(not(tarpaulin_include))]
    pub fn print(&self, report: &ScanReport) {
        for (line, open) in self.entries(report) {
            if open && !self.accessible {
                println!("{}", line.purple());
            } else {
                println!("{line}");
            }
        }

        if report.exhausted {
            warning!(EXHAUSTION_WARNING, false, self.accessible);
        }
    }
}
