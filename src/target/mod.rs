//! Target schema model.
//!
//! Mirrors the source schema in target-type space. Table and column ids are
//! the source ids; the only columns without a source counterpart are
//! synthesized primary keys. Interleaving parents, foreign keys and sequence
//! consumers are all referenced by id.

pub mod ddl;
mod graph;

pub use ddl::{print_schema, print_schema_script, quote_ident};
pub use graph::*;

use crate::schema::{
    CheckId, ColumnId, FkAction, ForeignKeyId, IndexId, IndexKey, KeyColumns, SequenceId, TableId,
};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// SQL dialect of the target database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetDialect {
    #[default]
    GoogleSql,
    #[serde(rename = "postgresql")]
    Postgres,
}

impl std::str::FromStr for TargetDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google_sql" | "googlesql" | "google-sql" => Ok(TargetDialect::GoogleSql),
            "postgresql" | "postgres" | "pg" => Ok(TargetDialect::Postgres),
            _ => Err(format!(
                "Unknown target dialect: {}. Valid options: google_sql, postgresql",
                s
            )),
        }
    }
}

impl fmt::Display for TargetDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetDialect::GoogleSql => write!(f, "google_sql"),
            TargetDialect::Postgres => write!(f, "postgresql"),
        }
    }
}

/// Length of a STRING or BYTES column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Max,
    Fixed(i64),
}

/// Largest STRING length before it is simply MAX
pub const MAX_STRING_LENGTH: i64 = 2_621_440;
/// Largest BYTES length before it is simply MAX
pub const MAX_BYTES_LENGTH: i64 = 10_485_760;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetType {
    Bool,
    Int64,
    Float32,
    Float64,
    Numeric,
    String(Length),
    Bytes(Length),
    Date,
    Timestamp,
    Json,
    Array(Box<TargetType>),
}

impl TargetType {
    pub fn string(len: Option<i64>) -> Self {
        match len {
            Some(n) if n > 0 && n <= MAX_STRING_LENGTH => TargetType::String(Length::Fixed(n)),
            _ => TargetType::String(Length::Max),
        }
    }

    pub fn bytes(len: Option<i64>) -> Self {
        match len {
            Some(n) if n > 0 && n <= MAX_BYTES_LENGTH => TargetType::Bytes(Length::Fixed(n)),
            _ => TargetType::Bytes(Length::Max),
        }
    }

    pub fn sql(&self, dialect: TargetDialect) -> String {
        match dialect {
            TargetDialect::GoogleSql => self.google_sql(),
            TargetDialect::Postgres => self.postgres(),
        }
    }

    fn google_sql(&self) -> String {
        let len = |l: &Length| match l {
            Length::Max => "MAX".to_string(),
            Length::Fixed(n) => n.to_string(),
        };
        match self {
            TargetType::Bool => "BOOL".into(),
            TargetType::Int64 => "INT64".into(),
            TargetType::Float32 => "FLOAT32".into(),
            TargetType::Float64 => "FLOAT64".into(),
            TargetType::Numeric => "NUMERIC".into(),
            TargetType::String(l) => format!("STRING({})", len(l)),
            TargetType::Bytes(l) => format!("BYTES({})", len(l)),
            TargetType::Date => "DATE".into(),
            TargetType::Timestamp => "TIMESTAMP".into(),
            TargetType::Json => "JSON".into(),
            TargetType::Array(elem) => format!("ARRAY<{}>", elem.google_sql()),
        }
    }

    fn postgres(&self) -> String {
        match self {
            TargetType::Bool => "boolean".into(),
            TargetType::Int64 => "bigint".into(),
            TargetType::Float32 => "real".into(),
            TargetType::Float64 => "double precision".into(),
            TargetType::Numeric => "numeric".into(),
            TargetType::String(Length::Max) => "text".into(),
            TargetType::String(Length::Fixed(n)) => format!("varchar({})", n),
            TargetType::Bytes(_) => "bytea".into(),
            TargetType::Date => "date".into(),
            TargetType::Timestamp => "timestamptz".into(),
            TargetType::Json => "jsonb".into(),
            TargetType::Array(elem) => format!("{}[]", elem.postgres()),
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.google_sql())
    }
}

/// How the target generates values for a column
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetAutoGen {
    #[default]
    None,
    Sequence(SequenceId),
    /// A built-in generator function, e.g. `GENERATE_UUID()`
    PreDefined(String),
}

#[derive(Debug, Clone)]
pub struct TargetColumn {
    pub id: ColumnId,
    pub name: String,
    pub ty: TargetType,
    pub not_null: bool,
    pub auto_gen: TargetAutoGen,
    /// Default expression in target syntax
    pub default: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TargetForeignKey {
    pub id: ForeignKeyId,
    pub name: String,
    pub column_ids: Vec<ColumnId>,
    pub refer_table_id: TableId,
    pub refer_column_ids: Vec<ColumnId>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

#[derive(Debug, Clone)]
pub struct TargetIndex {
    pub id: IndexId,
    pub name: String,
    pub unique: bool,
    pub keys: Vec<IndexKey>,
}

#[derive(Debug, Clone)]
pub struct TargetCheck {
    pub id: CheckId,
    pub name: String,
    pub expr: String,
}

/// Physical parent of an interleaved table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterleaveParent {
    pub table: TableId,
    pub on_delete: FkAction,
}

#[derive(Debug, Clone)]
pub struct TargetTable {
    pub id: TableId,
    pub name: String,
    /// Table name as written in the dump, used to route rows
    pub source_name: String,
    pub column_ids: Vec<ColumnId>,
    pub columns: AHashMap<ColumnId, TargetColumn>,
    pub primary_keys: KeyColumns,
    pub foreign_keys: Vec<TargetForeignKey>,
    pub indexes: Vec<TargetIndex>,
    pub checks: Vec<TargetCheck>,
    pub parent: Option<InterleaveParent>,
    /// Set when the primary key was synthesized
    pub synthetic_key: Option<ColumnId>,
}

impl TargetTable {
    pub fn new(id: TableId, name: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            source_name: source_name.into(),
            column_ids: Vec::new(),
            columns: AHashMap::new(),
            primary_keys: KeyColumns::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            checks: Vec::new(),
            parent: None,
            synthetic_key: None,
        }
    }

    pub fn column(&self, id: ColumnId) -> Option<&TargetColumn> {
        self.columns.get(&id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&TargetColumn> {
        self.ordered_columns()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn ordered_columns(&self) -> impl Iterator<Item = &TargetColumn> {
        self.column_ids.iter().filter_map(|id| self.columns.get(id))
    }

    pub fn push_column(&mut self, column: TargetColumn) {
        self.column_ids.push(column.id);
        self.columns.insert(column.id, column);
    }

    pub fn has_column(&self, id: ColumnId) -> bool {
        self.columns.contains_key(&id)
    }

    /// Primary key columns in key order
    pub fn primary_key_columns(&self) -> Vec<&TargetColumn> {
        let mut keys: Vec<&IndexKey> = self.primary_keys.iter().collect();
        keys.sort_by_key(|k| k.order);
        keys.iter().filter_map(|k| self.columns.get(&k.column)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceKind {
    #[default]
    BitReversedPositive,
}

impl SequenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceKind::BitReversedPositive => "bit_reversed_positive",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sequence {
    pub id: SequenceId,
    pub name: String,
    pub kind: SequenceKind,
    /// Which columns draw values from this sequence
    pub columns_using: BTreeMap<TableId, Vec<ColumnId>>,
}

/// Id-keyed arena of target tables and sequences
#[derive(Debug, Clone, Default)]
pub struct TargetSchema {
    tables: BTreeMap<TableId, TargetTable>,
    pub sequences: BTreeMap<SequenceId, Sequence>,
    by_source_name: AHashMap<String, TableId>,
}

impl TargetSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: TargetTable) {
        self.by_source_name
            .insert(table.source_name.to_lowercase(), table.id);
        self.tables.insert(table.id, table);
    }

    pub fn get(&self, id: TableId) -> Option<&TargetTable> {
        self.tables.get(&id)
    }

    pub fn get_mut(&mut self, id: TableId) -> Option<&mut TargetTable> {
        self.tables.get_mut(&id)
    }

    /// Look up by the table's name in the dump; qualified names match on
    /// their last part.
    pub fn by_source_name(&self, name: &str) -> Option<&TargetTable> {
        let unqualified = name.rsplit('.').next().unwrap_or(name);
        self.by_source_name
            .get(&unqualified.to_lowercase())
            .and_then(|id| self.tables.get(id))
    }

    pub fn by_name(&self, name: &str) -> Option<&TargetTable> {
        self.tables
            .values()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tables(&self) -> impl Iterator<Item = &TargetTable> {
        self.tables.values()
    }

    pub fn tables_mut(&mut self) -> impl Iterator<Item = &mut TargetTable> {
        self.tables.values_mut()
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn sequence_by_name(&self, name: &str) -> Option<&Sequence> {
        self.sequences
            .values()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_rendering() {
        let t = TargetType::Array(Box::new(TargetType::string(None)));
        assert_eq!(t.sql(TargetDialect::GoogleSql), "ARRAY<STRING(MAX)>");
        assert_eq!(t.sql(TargetDialect::Postgres), "text[]");
        assert_eq!(
            TargetType::string(Some(10)).sql(TargetDialect::Postgres),
            "varchar(10)"
        );
        assert_eq!(TargetType::string(Some(0)), TargetType::String(Length::Max));
        assert_eq!(TargetType::bytes(Some(16)).to_string(), "BYTES(16)");
    }

    #[test]
    fn test_target_dialect_from_str() {
        assert_eq!("GoogleSQL".parse::<TargetDialect>(), Ok(TargetDialect::GoogleSql));
        assert_eq!("pg".parse::<TargetDialect>(), Ok(TargetDialect::Postgres));
        assert!("oracle".parse::<TargetDialect>().is_err());
    }
}
