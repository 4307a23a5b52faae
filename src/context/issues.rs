//! Issue registry for schema and data decisions.
//!
//! Records lossy conversions, unsupported features and other noteworthy
//! outcomes against a table (and optionally a column) so they can be
//! surfaced in the import report.

use crate::schema::{ColumnId, TableId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Issue types recorded during conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Several source widths collapsed onto one wider target type
    Widened,
    /// Precision or scale beyond what the target NUMERIC holds
    Decimal,
    /// DATETIME has no time zone; values are interpreted in the dump's offset
    Datetime,
    /// TIMESTAMP WITHOUT TIME ZONE mapped to a zoned timestamp
    Timestamp,
    /// TIME/YEAR/INTERVAL have no target equivalent and are stored as strings
    Time,
    /// Unsigned 64-bit values may not fit a signed INT64
    Unsigned,
    /// No good target type; stored as STRING(MAX)
    NoGoodType,
    /// Spatial type stored as text
    Spatial,
    /// Multi-dimensional or non-scalar array
    ArrayTypeNotSupported,
    /// Column default could not be carried over
    DefaultIgnored,
    /// Auto-increment could not be carried over
    AutoIncrementIgnored,
    /// Auto-generation mapped onto a target sequence
    SequenceCreated,
    /// Referential action not supported by the target; using NO ACTION
    ForeignKeyActionUnsupported,
    /// Foreign key references an unknown table or column and was dropped
    ForeignKeyUnresolved,
    /// Table had no primary key; a synthetic one was added
    SyntheticPrimaryKey,
    /// Table declared more than one primary key; the last one was kept
    MultiplePrimaryKeys,
    /// Statement was rewritten to strip spatial types before parsing
    SpatialRewritten,
    /// Name was changed to be valid in the target
    IllegalName,
    /// Table was interleaved in a parent table
    Interleaved,
    /// Check constraint dropped because a column it used was removed
    CheckDropped,
}

impl IssueKind {
    pub fn description(&self) -> &'static str {
        match self {
            IssueKind::Widened => "type widened to a larger target type",
            IssueKind::Decimal => "precision/scale may exceed target NUMERIC limits",
            IssueKind::Datetime => "DATETIME converted to TIMESTAMP using the dump's time zone",
            IssueKind::Timestamp => "timestamp without time zone converted to TIMESTAMP (UTC)",
            IssueKind::Time => "time type stored as STRING",
            IssueKind::Unsigned => "unsigned values above INT64 range will fail to convert",
            IssueKind::NoGoodType => "no good target type; using STRING(MAX)",
            IssueKind::Spatial => "spatial type stored as STRING(MAX)",
            IssueKind::ArrayTypeNotSupported => "array type not supported; using STRING(MAX)",
            IssueKind::DefaultIgnored => "default value not converted",
            IssueKind::AutoIncrementIgnored => "auto-increment not converted",
            IssueKind::SequenceCreated => "auto-generated values use a bit-reversed sequence",
            IssueKind::ForeignKeyActionUnsupported => "referential action not supported; using NO ACTION",
            IssueKind::ForeignKeyUnresolved => "foreign key references unknown table/column; dropped",
            IssueKind::SyntheticPrimaryKey => "no primary key; added synthetic key column",
            IssueKind::MultiplePrimaryKeys => "multiple primary keys declared; last one wins",
            IssueKind::SpatialRewritten => "spatial definitions rewritten as text before parsing",
            IssueKind::IllegalName => "name changed to be valid in the target",
            IssueKind::Interleaved => "table interleaved in parent",
            IssueKind::CheckDropped => "check constraint dropped with a removed column",
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// One recorded issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub table: TableId,
    pub column: Option<ColumnId>,
    pub kind: IssueKind,
}

/// Issues keyed by (table, column); table-level issues use `None`.
#[derive(Debug, Clone, Default)]
pub struct IssueRegistry {
    entries: BTreeMap<(TableId, Option<ColumnId>), Vec<IssueKind>>,
}

impl IssueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a table-level issue (deduplicated)
    pub fn record_table(&mut self, table: TableId, kind: IssueKind) {
        self.record(table, None, kind);
    }

    /// Record a column-level issue (deduplicated)
    pub fn record_column(&mut self, table: TableId, column: ColumnId, kind: IssueKind) {
        self.record(table, Some(column), kind);
    }

    fn record(&mut self, table: TableId, column: Option<ColumnId>, kind: IssueKind) {
        let kinds = self.entries.entry((table, column)).or_default();
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }

    pub fn column_issues(&self, table: TableId, column: ColumnId) -> &[IssueKind] {
        self.entries
            .get(&(table, Some(column)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn table_issues(&self, table: TableId) -> &[IssueKind] {
        self.entries
            .get(&(table, None))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has(&self, table: TableId, column: Option<ColumnId>, kind: IssueKind) -> bool {
        self.entries
            .get(&(table, column))
            .is_some_and(|k| k.contains(&kind))
    }

    /// Drop all issues recorded against a removed column
    pub fn remove_column(&mut self, table: TableId, column: ColumnId) {
        self.entries.remove(&(table, Some(column)));
    }

    /// Withdraw a table-level issue that no longer applies
    pub fn remove_table_issue(&mut self, table: TableId, kind: IssueKind) {
        if let Some(kinds) = self.entries.get_mut(&(table, None)) {
            kinds.retain(|k| *k != kind);
            if kinds.is_empty() {
                self.entries.remove(&(table, None));
            }
        }
    }

    /// All issues in (table, column) order
    pub fn iter(&self) -> impl Iterator<Item = Issue> + '_ {
        self.entries.iter().flat_map(|((table, column), kinds)| {
            kinds.iter().map(move |kind| Issue {
                table: *table,
                column: *column,
                kind: *kind,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduplicates_per_column() {
        let mut reg = IssueRegistry::new();
        reg.record_column(TableId(1), ColumnId(2), IssueKind::Widened);
        reg.record_column(TableId(1), ColumnId(2), IssueKind::Widened);
        reg.record_column(TableId(1), ColumnId(3), IssueKind::Widened);
        reg.record_table(TableId(1), IssueKind::SyntheticPrimaryKey);

        assert_eq!(reg.len(), 3);
        assert_eq!(reg.column_issues(TableId(1), ColumnId(2)), &[IssueKind::Widened]);
        assert!(reg.has(TableId(1), None, IssueKind::SyntheticPrimaryKey));
    }

    #[test]
    fn test_iter_orders_table_level_first() {
        let mut reg = IssueRegistry::new();
        reg.record_column(TableId(1), ColumnId(2), IssueKind::Time);
        reg.record_table(TableId(1), IssueKind::Interleaved);

        let issues: Vec<Issue> = reg.iter().collect();
        assert_eq!(issues[0].column, None);
        assert_eq!(issues[1].column, Some(ColumnId(2)));
    }
}
