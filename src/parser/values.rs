//! Row values extracted from INSERT and COPY statements.

use sqlparser::ast::{Expr, Insert, SetExpr, UnaryOperator, Value};
use std::fmt;

/// A literal as written in the dump, before target conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Null,
    /// Numeric literal text, sign included
    Number(String),
    Text(String),
    Bool(bool),
    /// Hex literal digits without the `0x` / `X''` wrapper
    Hex(String),
    /// An expression rows cannot carry (function calls, bare identifiers, ...)
    Unsupported(String),
}

impl RawValue {
    pub fn from_expr(expr: &Expr) -> RawValue {
        match expr {
            Expr::Value(value) => Self::from_value(value),
            Expr::Nested(inner) => Self::from_expr(inner),
            Expr::Cast { expr: inner, .. } => Self::from_expr(inner),
            Expr::IntroducedString { value, .. } => Self::from_value(value),
            Expr::UnaryOp { op, expr: inner } => match (op, Self::from_expr(inner)) {
                (UnaryOperator::Minus, RawValue::Number(n)) => match n.strip_prefix('-') {
                    Some(positive) => RawValue::Number(positive.to_string()),
                    None => RawValue::Number(format!("-{}", n)),
                },
                (UnaryOperator::Plus, RawValue::Number(n)) => RawValue::Number(n),
                _ => RawValue::Unsupported(expr.to_string()),
            },
            _ => RawValue::Unsupported(expr.to_string()),
        }
    }

    fn from_value(value: &Value) -> RawValue {
        match value {
            Value::Null => RawValue::Null,
            Value::Number(n, _) => RawValue::Number(n.to_string()),
            Value::Boolean(b) => RawValue::Bool(*b),
            Value::SingleQuotedString(s)
            | Value::DoubleQuotedString(s)
            | Value::EscapedStringLiteral(s)
            | Value::NationalStringLiteral(s) => RawValue::Text(s.clone()),
            Value::DollarQuotedString(d) => RawValue::Text(d.value.clone()),
            Value::HexStringLiteral(h) => RawValue::Hex(h.clone()),
            other => RawValue::Unsupported(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => write!(f, "NULL"),
            RawValue::Number(n) => write!(f, "{}", n),
            RawValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            RawValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            RawValue::Hex(h) => write!(f, "X'{}'", h),
            RawValue::Unsupported(e) => write!(f, "{}", e),
        }
    }
}

/// Where a batch of rows came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSource {
    Insert,
    Copy,
}

impl RowSource {
    /// Statement kind used in the counters
    pub fn kind(&self) -> &'static str {
        match self {
            RowSource::Insert => "InsertStmt",
            RowSource::Copy => "CopyStmt",
        }
    }
}

/// Rows destined for one table
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRows {
    /// Table name as written, possibly schema-qualified
    pub table: String,
    /// Explicit column list; `None` means declaration order
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<RawValue>>,
    pub source: RowSource,
    /// Further rows of a COPY block that was already counted
    pub continuation: bool,
}

impl InsertRows {
    pub fn new(table: impl Into<String>, columns: Option<Vec<String>>, source: RowSource) -> Self {
        Self {
            table: table.into(),
            columns,
            rows: Vec::new(),
            source,
            continuation: false,
        }
    }

    /// Extract literal rows from a parsed INSERT.
    ///
    /// Returns `None` for `INSERT ... SELECT` and other non-VALUES sources.
    pub fn from_insert(insert: &Insert) -> Option<InsertRows> {
        let query = insert.source.as_ref()?;
        let SetExpr::Values(values) = query.body.as_ref() else {
            return None;
        };
        let table = insert
            .table_name
            .0
            .iter()
            .map(|ident| ident.value.as_str())
            .collect::<Vec<_>>()
            .join(".");
        let columns = if insert.columns.is_empty() {
            None
        } else {
            Some(insert.columns.iter().map(|c| c.value.clone()).collect())
        };
        let mut rows = InsertRows::new(table, columns, RowSource::Insert);
        rows.rows = values
            .rows
            .iter()
            .map(|row| row.iter().map(RawValue::from_expr).collect())
            .collect();
        Some(rows)
    }

    /// Table name without any schema qualifier
    pub fn unqualified_table(&self) -> &str {
        self.table.rsplit('.').next().unwrap_or(&self.table)
    }

    /// SQL-ish rendering of a row for bad-row samples
    pub fn render_row(row: &[RawValue]) -> String {
        let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        format!("({})", values.join(", "))
    }
}
