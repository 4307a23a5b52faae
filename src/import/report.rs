use crate::context::{BadRow, ConversionContext, IssueKind, StatementCounts};
use crate::schema::{ColumnId, TableId};
use crate::writer::WriterStats;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Row counters for one source table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub name: String,
    /// Target table name, if the table was converted
    pub target: Option<String>,
    pub rows: u64,
    pub good_rows: u64,
    pub bad_rows: u64,
}

/// One issue with ids resolved to names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueReport {
    pub table_id: TableId,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_id: Option<ColumnId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub kind: IssueKind,
    pub description: &'static str,
}

/// Outcome of an import run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub source: String,
    pub tables: Vec<TableReport>,
    pub bad_row_samples: Vec<BadRow>,
    pub statements: BTreeMap<String, StatementCounts>,
    pub reparsed: u64,
    pub unexpected: BTreeMap<String, u64>,
    pub issues: Vec<IssueReport>,
    pub writer: WriterStats,
    pub cancelled: bool,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl ImportReport {
    /// Snapshot the context's statistics and issues
    pub fn from_context(ctx: &ConversionContext, source: impl Into<String>) -> Self {
        let stats = &ctx.stats;
        let target = ctx.target();

        let mut names: Vec<&String> = stats
            .rows
            .keys()
            .chain(stats.good_rows.keys())
            .chain(stats.bad_rows.keys())
            .collect();
        for table in ctx.source().tables() {
            names.push(&table.name);
        }
        names.sort();
        names.dedup();

        let count = |map: &BTreeMap<String, u64>, name: &str| map.get(name).copied().unwrap_or(0);
        let tables = names
            .into_iter()
            .map(|name| TableReport {
                name: name.clone(),
                target: target.by_source_name(name).map(|t| t.name.clone()),
                rows: count(&stats.rows, name),
                good_rows: count(&stats.good_rows, name),
                bad_rows: count(&stats.bad_rows, name),
            })
            .collect();

        let issues = ctx
            .issues
            .iter()
            .map(|issue| {
                let target_table = target.get(issue.table);
                let table = target_table
                    .map(|t| t.name.clone())
                    .or_else(|| ctx.source().get(issue.table).map(|t| t.name.clone()))
                    .unwrap_or_default();
                let column = issue.column.and_then(|c| {
                    target_table
                        .and_then(|t| t.column(c))
                        .map(|col| col.name.clone())
                        .or_else(|| {
                            ctx.source()
                                .get(issue.table)
                                .and_then(|t| t.column(c))
                                .map(|col| col.name.clone())
                        })
                });
                IssueReport {
                    table_id: issue.table,
                    table,
                    column_id: issue.column,
                    column,
                    kind: issue.kind,
                    description: issue.kind.description(),
                }
            })
            .collect();

        Self {
            source: source.into(),
            tables,
            bad_row_samples: stats.bad_row_samples().to_vec(),
            statements: stats.statements.clone(),
            reparsed: stats.reparsed,
            unexpected: stats.unexpected.clone(),
            issues,
            ..Default::default()
        }
    }

    pub fn total_good_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.good_rows).sum()
    }

    pub fn total_bad_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.bad_rows).sum()
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.name == name)
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Import summary: {}", self.source)?;
        if self.cancelled {
            writeln!(f, "  Status: CANCELLED (partial statistics)")?;
        }
        writeln!(f, "  Tables: {}", self.tables.len())?;
        writeln!(
            f,
            "  Rows: {} written, {} rejected",
            self.total_good_rows(),
            self.total_bad_rows()
        )?;
        writeln!(
            f,
            "  Batches: {} ({} retries, {} rows abandoned)",
            self.writer.batches, self.writer.retries, self.writer.abandoned_rows
        )?;
        writeln!(f, "  Reparsed chunks: {}", self.reparsed)?;
        writeln!(f, "  Time: {:.3?}", self.elapsed)?;

        if !self.tables.is_empty() {
            writeln!(f)?;
            writeln!(f, "  {:<32} {:>10} {:>10} {:>10}", "TABLE", "ROWS", "GOOD", "BAD")?;
            for t in &self.tables {
                writeln!(
                    f,
                    "  {:<32} {:>10} {:>10} {:>10}",
                    t.name, t.rows, t.good_rows, t.bad_rows
                )?;
            }
        }

        if !self.statements.is_empty() {
            writeln!(f)?;
            writeln!(f, "  Statements:")?;
            for (kind, c) in &self.statements {
                writeln!(
                    f,
                    "    - {:<24} schema={} data={} skipped={} errors={}",
                    kind, c.schema, c.data, c.skipped, c.errors
                )?;
            }
        }

        if !self.issues.is_empty() {
            writeln!(f)?;
            writeln!(f, "  Issues:")?;
            for issue in &self.issues {
                match &issue.column {
                    Some(col) => writeln!(f, "    - {}.{}: {}", issue.table, col, issue.description)?,
                    None => writeln!(f, "    - {}: {}", issue.table, issue.description)?,
                }
            }
        }

        if !self.bad_row_samples.is_empty() {
            writeln!(f)?;
            writeln!(f, "  Bad rows (sample):")?;
            for row in &self.bad_row_samples {
                writeln!(f, "    - {} {}: {}", row.table, row.values, row.reason)?;
            }
        }

        if !self.unexpected.is_empty() {
            writeln!(f)?;
            writeln!(f, "  Unexpected conditions:")?;
            for (message, n) in &self.unexpected {
                writeln!(f, "    - {} (x{})", message, n)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_json() {
        let mut report = ImportReport {
            source: "dump.sql".into(),
            tables: vec![TableReport {
                name: "t".into(),
                target: Some("t".into()),
                rows: 2,
                good_rows: 1,
                bad_rows: 1,
            }],
            cancelled: true,
            elapsed: Duration::from_millis(1500),
            ..Default::default()
        };
        report.bad_row_samples.push(BadRow {
            table: "t".into(),
            values: "(bad_token, 'b')".into(),
            reason: "unsupported value".into(),
        });

        let text = report.to_string();
        assert!(text.contains("CANCELLED"));
        assert!(text.contains("1 written, 1 rejected"));
        assert!(text.contains("(bad_token, 'b')"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cancelled"], serde_json::json!(true));
        assert_eq!(json["elapsed_secs"], serde_json::json!(1.5));
        assert_eq!(json["tables"][0]["bad_rows"], serde_json::json!(1));
    }
}
