//! Running statistics for an import.
//!
//! Statement and row counters are kept per pass: the schema pass counts rows
//! seen and statement kinds (including skips and errors), the data pass counts
//! rows written and rows rejected. Starting a pass clears only that pass's
//! counters, so replaying a dump never double-counts within one pass.

use serde::Serialize;
use std::collections::BTreeMap;

/// Per statement-kind counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatementCounts {
    /// Processed during the schema pass
    pub schema: u64,
    /// Processed during the data pass
    pub data: u64,
    /// Skipped (unsupported kind, unknown table)
    pub skipped: u64,
    /// Failed to parse or convert
    pub errors: u64,
}

/// A rejected row kept for the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadRow {
    pub table: String,
    pub values: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Stats {
    /// Rows seen per table during the schema pass
    pub rows: BTreeMap<String, u64>,
    /// Rows converted and handed to the writer
    pub good_rows: BTreeMap<String, u64>,
    /// Rows rejected during the data pass
    pub bad_rows: BTreeMap<String, u64>,
    pub statements: BTreeMap<String, StatementCounts>,
    /// Parse retries after reading another line
    pub reparsed: u64,
    /// Unexpected conditions, keyed by message
    pub unexpected: BTreeMap<String, u64>,
    bad_row_samples: Vec<BadRow>,
    sample_limit: usize,
    unexpected_limit: usize,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new(100, 100)
    }
}

impl Stats {
    pub fn new(sample_limit: usize, unexpected_limit: usize) -> Self {
        Self {
            rows: BTreeMap::new(),
            good_rows: BTreeMap::new(),
            bad_rows: BTreeMap::new(),
            statements: BTreeMap::new(),
            reparsed: 0,
            unexpected: BTreeMap::new(),
            bad_row_samples: Vec::new(),
            sample_limit,
            unexpected_limit,
        }
    }

    /// Clear the schema-pass counters
    pub fn reset_schema_pass(&mut self) {
        self.rows.clear();
        self.reparsed = 0;
        self.unexpected.clear();
        for counts in self.statements.values_mut() {
            counts.schema = 0;
            counts.skipped = 0;
            counts.errors = 0;
        }
    }

    /// Clear the data-pass counters
    pub fn reset_data_pass(&mut self) {
        self.good_rows.clear();
        self.bad_rows.clear();
        self.bad_row_samples.clear();
        for counts in self.statements.values_mut() {
            counts.data = 0;
        }
    }

    fn counts(&mut self, kind: &str) -> &mut StatementCounts {
        self.statements.entry(kind.to_string()).or_default()
    }

    pub fn schema_statement(&mut self, kind: &str) {
        self.counts(kind).schema += 1;
    }

    pub fn data_statement(&mut self, kind: &str) {
        self.counts(kind).data += 1;
    }

    pub fn skip_statement(&mut self, kind: &str) {
        self.counts(kind).skipped += 1;
    }

    pub fn error_statement(&mut self, kind: &str) {
        self.counts(kind).errors += 1;
    }

    pub fn add_rows(&mut self, table: &str, n: u64) {
        *self.rows.entry(table.to_string()).or_default() += n;
    }

    pub fn good_row(&mut self, table: &str) {
        *self.good_rows.entry(table.to_string()).or_default() += 1;
    }

    /// Count a rejected row and keep a sample while under the limit
    pub fn bad_row(&mut self, table: &str, values: String, reason: String) {
        *self.bad_rows.entry(table.to_string()).or_default() += 1;
        if self.bad_row_samples.len() < self.sample_limit {
            self.bad_row_samples.push(BadRow {
                table: table.to_string(),
                values,
                reason,
            });
        }
    }

    /// Record an unexpected condition. Distinct messages beyond the limit
    /// are folded into a single overflow entry.
    pub fn unexpected(&mut self, message: impl Into<String>) {
        let message = message.into();
        if let Some(count) = self.unexpected.get_mut(&message) {
            *count += 1;
            return;
        }
        if self.unexpected.len() < self.unexpected_limit {
            self.unexpected.insert(message, 1);
        } else {
            *self
                .unexpected
                .entry("(further unexpected conditions omitted)".to_string())
                .or_default() += 1;
        }
    }

    pub fn bad_row_samples(&self) -> &[BadRow] {
        &self.bad_row_samples
    }

    pub fn total_rows(&self) -> u64 {
        self.rows.values().sum()
    }

    pub fn total_good_rows(&self) -> u64 {
        self.good_rows.values().sum()
    }

    pub fn total_bad_rows(&self) -> u64 {
        self.bad_rows.values().sum()
    }

    /// Fold a data-pass worker's counters into this one
    pub fn merge_data_pass(&mut self, other: &Stats) {
        for (table, n) in &other.good_rows {
            *self.good_rows.entry(table.clone()).or_default() += n;
        }
        for (table, n) in &other.bad_rows {
            *self.bad_rows.entry(table.clone()).or_default() += n;
        }
        for (kind, counts) in &other.statements {
            self.counts(kind).data += counts.data;
        }
        for (message, n) in &other.unexpected {
            *self.unexpected.entry(message.clone()).or_default() += n;
        }
        for sample in &other.bad_row_samples {
            if self.bad_row_samples.len() >= self.sample_limit {
                break;
            }
            self.bad_row_samples.push(sample.clone());
        }
    }
}
