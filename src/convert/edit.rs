//! Edits on a converted target schema.
//!
//! Each edit cascades: removing a column rewrites every key, index and
//! constraint that mentions it, and renaming a column rewrites check
//! expressions that use it.

use super::interleave::choose_parent;
use crate::context::{IssueKind, IssueRegistry};
use crate::schema::{ColumnId, SequenceId, TableId};
use crate::target::{TargetAutoGen, TargetSchema};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("unknown table {0}")]
    UnknownTable(TableId),
    #[error("table {table} has no column {column}")]
    UnknownColumn { table: TableId, column: ColumnId },
    #[error("unknown sequence {0}")]
    UnknownSequence(SequenceId),
    #[error("column name '{0}' already exists")]
    DuplicateName(String),
    #[error("column {column} is the last primary key column of table {table}")]
    LastKeyColumn { table: TableId, column: ColumnId },
}

fn check_column(schema: &TargetSchema, table: TableId, column: ColumnId) -> Result<(), EditError> {
    let t = schema.get(table).ok_or(EditError::UnknownTable(table))?;
    if t.has_column(column) {
        Ok(())
    } else {
        Err(EditError::UnknownColumn { table, column })
    }
}

/// Remove a column and everything that depends on it.
///
/// Keys, indexes and foreign keys (on either side) lose the column and are
/// dropped once empty. Checks mentioning the column are dropped. Interleave
/// links of the table and of its children are re-checked afterwards.
///
/// The last primary key column (synthetic or not) cannot be removed: every
/// target table keeps a key.
pub fn remove_column(
    schema: &mut TargetSchema,
    issues: &mut IssueRegistry,
    table: TableId,
    column: ColumnId,
) -> Result<(), EditError> {
    check_column(schema, table, column)?;
    if let Some(t) = schema.get(table) {
        if t.primary_keys.len() == 1 && t.primary_keys[0].column == column {
            return Err(EditError::LastKeyColumn { table, column });
        }
    }

    let t = schema
        .get_mut(table)
        .ok_or(EditError::UnknownTable(table))?;
    let name = t
        .columns
        .remove(&column)
        .map(|c| c.name)
        .unwrap_or_default();
    t.column_ids.retain(|c| *c != column);

    t.primary_keys.retain(|k| k.column != column);
    for (order, key) in t.primary_keys.iter_mut().enumerate() {
        key.order = order;
    }
    if t.synthetic_key == Some(column) {
        t.synthetic_key = None;
    }

    for index in &mut t.indexes {
        index.keys.retain(|k| k.column != column);
        for (order, key) in index.keys.iter_mut().enumerate() {
            key.order = order;
        }
    }
    t.indexes.retain(|i| !i.keys.is_empty());

    for fk in &mut t.foreign_keys {
        if let Some(pos) = fk.column_ids.iter().position(|c| *c == column) {
            fk.column_ids.remove(pos);
            if pos < fk.refer_column_ids.len() {
                fk.refer_column_ids.remove(pos);
            }
        }
    }
    t.foreign_keys.retain(|fk| !fk.column_ids.is_empty());

    let before = t.checks.len();
    t.checks.retain(|ck| !mentions_identifier(&ck.expr, &name));
    if t.checks.len() != before {
        debug!("dropped {} check(s) using {}.{}", before - t.checks.len(), t.name, name);
        issues.record_table(table, IssueKind::CheckDropped);
    }

    for other in schema.tables_mut() {
        for fk in &mut other.foreign_keys {
            if fk.refer_table_id != table {
                continue;
            }
            if let Some(pos) = fk.refer_column_ids.iter().position(|c| *c == column) {
                fk.refer_column_ids.remove(pos);
                if pos < fk.column_ids.len() {
                    fk.column_ids.remove(pos);
                }
            }
        }
        other.foreign_keys.retain(|fk| !fk.refer_column_ids.is_empty());
    }

    for seq in schema.sequences.values_mut() {
        if let Some(cols) = seq.columns_using.get_mut(&table) {
            cols.retain(|c| *c != column);
            if cols.is_empty() {
                seq.columns_using.remove(&table);
            }
        }
    }

    issues.remove_column(table, column);
    relink_interleaved(schema, issues, table);
    Ok(())
}

/// Re-choose the interleave parent of `table` and of every table
/// interleaved in it, dropping links whose key is no longer a prefix
fn relink_interleaved(schema: &mut TargetSchema, issues: &mut IssueRegistry, table: TableId) {
    let affected: Vec<TableId> = schema
        .tables()
        .filter(|t| t.parent.is_some() && (t.id == table || t.parent.map(|p| p.table) == Some(table)))
        .map(|t| t.id)
        .collect();

    for id in affected {
        let Some(child) = schema.get(id) else {
            continue;
        };
        let parent = choose_parent(schema, child);
        if parent.is_none() {
            debug!("{} is no longer interleaved", child.name);
            issues.remove_table_issue(id, IssueKind::Interleaved);
        }
        if let Some(child) = schema.get_mut(id) {
            child.parent = parent;
        }
    }
}

/// Rename a column, rewriting check expressions that reference it
pub fn rename_column(
    schema: &mut TargetSchema,
    table: TableId,
    column: ColumnId,
    new_name: &str,
) -> Result<(), EditError> {
    check_column(schema, table, column)?;
    let t = schema
        .get_mut(table)
        .ok_or(EditError::UnknownTable(table))?;
    if t
        .ordered_columns()
        .any(|c| c.id != column && c.name.eq_ignore_ascii_case(new_name))
    {
        return Err(EditError::DuplicateName(new_name.to_string()));
    }

    let Some(col) = t.columns.get_mut(&column) else {
        return Err(EditError::UnknownColumn { table, column });
    };
    let old_name = std::mem::replace(&mut col.name, new_name.to_string());

    for check in &mut t.checks {
        check.expr = rename_identifier(&check.expr, &old_name, new_name);
    }
    Ok(())
}

pub fn set_not_null(
    schema: &mut TargetSchema,
    table: TableId,
    column: ColumnId,
    not_null: bool,
) -> Result<(), EditError> {
    column_mut(schema, table, column, |c| c.not_null = not_null)
}

pub fn set_default(
    schema: &mut TargetSchema,
    table: TableId,
    column: ColumnId,
    default: Option<String>,
) -> Result<(), EditError> {
    column_mut(schema, table, column, |c| c.default = default)
}

/// Change how a column's values are generated, keeping every sequence's
/// consumer list in step
pub fn set_auto_gen(
    schema: &mut TargetSchema,
    table: TableId,
    column: ColumnId,
    auto_gen: TargetAutoGen,
) -> Result<(), EditError> {
    check_column(schema, table, column)?;
    if let TargetAutoGen::Sequence(seq) = &auto_gen {
        if !schema.sequences.contains_key(seq) {
            return Err(EditError::UnknownSequence(*seq));
        }
    }

    for seq in schema.sequences.values_mut() {
        if let Some(cols) = seq.columns_using.get_mut(&table) {
            cols.retain(|c| *c != column);
            if cols.is_empty() {
                seq.columns_using.remove(&table);
            }
        }
    }
    if let TargetAutoGen::Sequence(seq) = &auto_gen {
        if let Some(seq) = schema.sequences.get_mut(seq) {
            seq.columns_using.entry(table).or_default().push(column);
        }
    }

    column_mut(schema, table, column, |c| c.auto_gen = auto_gen)
}

fn column_mut(
    schema: &mut TargetSchema,
    table: TableId,
    column: ColumnId,
    f: impl FnOnce(&mut crate::target::TargetColumn),
) -> Result<(), EditError> {
    let t = schema
        .get_mut(table)
        .ok_or(EditError::UnknownTable(table))?;
    let col = t
        .columns
        .get_mut(&column)
        .ok_or(EditError::UnknownColumn { table, column })?;
    f(col);
    Ok(())
}

/// One lexical piece of an expression
#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    /// Bare or quoted identifier; `quote` is the quote character if any
    Ident { text: &'a str, quote: Option<char> },
    Other(&'a str),
}

fn tokenize(expr: &str) -> Vec<Token<'_>> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut other_start = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' => {
                // skip string literal, '' is an escaped quote
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
            }
            b'`' | b'"' => {
                let end = expr[i + 1..].find(b as char).map(|p| i + 1 + p);
                match end {
                    Some(end) => {
                        push_other(&mut tokens, expr, other_start, i);
                        tokens.push(Token::Ident {
                            text: &expr[i + 1..end],
                            quote: Some(b as char),
                        });
                        i = end + 1;
                        other_start = i;
                    }
                    None => i = bytes.len(),
                }
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                push_other(&mut tokens, expr, other_start, start);
                tokens.push(Token::Ident {
                    text: &expr[start..i],
                    quote: None,
                });
                other_start = i;
            }
            // numbers like 1e5 or 0x1f are not identifiers
            _ if b.is_ascii_digit() => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    push_other(&mut tokens, expr, other_start, bytes.len());
    tokens
}

fn push_other<'a>(tokens: &mut Vec<Token<'a>>, expr: &'a str, start: usize, end: usize) {
    if end > start {
        tokens.push(Token::Other(&expr[start..end]));
    }
}

/// True if `expr` references `name` as a whole identifier
pub fn mentions_identifier(expr: &str, name: &str) -> bool {
    tokenize(expr).iter().any(|t| match t {
        Token::Ident { text, .. } => text.eq_ignore_ascii_case(name),
        Token::Other(_) => false,
    })
}

/// Replace whole identifier tokens equal to `old` with `new`, keeping each
/// token's quoting
pub fn rename_identifier(expr: &str, old: &str, new: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    for token in tokenize(expr) {
        match token {
            Token::Ident { text, quote } if text.eq_ignore_ascii_case(old) => match quote {
                Some(q) => {
                    out.push(q);
                    out.push_str(new);
                    out.push(q);
                }
                None => out.push_str(new),
            },
            Token::Ident { text, quote } => match quote {
                Some(q) => {
                    out.push(q);
                    out.push_str(text);
                    out.push(q);
                }
                None => out.push_str(text),
            },
            Token::Other(text) => out.push_str(text),
        }
    }
    out
}
