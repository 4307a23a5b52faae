//! Row conversion for the data pass.
//!
//! Each INSERT or COPY chunk is matched against the frozen schemas: column
//! names resolve to source column ids, ids are intersected with the target
//! table (columns removed by an edit drop out), and every literal is
//! converted to its column's target type. Rows that fail conversion are
//! counted and sampled, never written.

mod values;

pub use values::{convert_value, parse_array_literal, parse_timestamp, TargetValue, ValueError};

use crate::context::ConversionContext;
use crate::error::Result;
use crate::parser::{DumpStatement, InsertRows, ParsedChunk};
use crate::schema::{ColumnId, TableId};
use crate::store::Mutation;
use crate::target::TargetType;
use tracing::debug;

/// Converts literal rows into target mutations and hands them to the
/// context's sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct RowConverter;

/// Where each literal of a row goes
struct RowPlan {
    table: String,
    /// (position in the literal row, target type) per written column
    slots: Vec<(usize, TargetType)>,
    columns: Vec<String>,
    arity: usize,
    /// Table id and name of the synthetic key column, if any
    synthetic: Option<(TableId, String)>,
}

impl RowConverter {
    pub fn new() -> Self {
        Self
    }

    /// Convert and write the rows of a chunk; other statements are ignored
    /// in the data pass.
    pub fn process_chunk(&self, ctx: &mut ConversionContext, chunk: &ParsedChunk) -> Result<()> {
        for statement in &chunk.statements {
            if let DumpStatement::Rows(rows) = statement {
                self.process_rows(ctx, rows)?;
            }
        }
        Ok(())
    }

    pub fn process_rows(&self, ctx: &mut ConversionContext, rows: &InsertRows) -> Result<()> {
        if !rows.continuation {
            ctx.stats.data_statement(rows.source.kind());
        }
        let Some(plan) = self.plan(ctx, rows) else {
            return Ok(());
        };

        let table = rows.unqualified_table();
        let tz = ctx.timezone;

        for row in &rows.rows {
            if row.len() != plan.arity {
                ctx.stats.bad_row(
                    table,
                    InsertRows::render_row(row),
                    format!("expected {} value(s), found {}", plan.arity, row.len()),
                );
                continue;
            }

            let converted: std::result::Result<Vec<TargetValue>, ValueError> = plan
                .slots
                .iter()
                .map(|(pos, ty)| convert_value(&row[*pos], ty, tz))
                .collect();
            let mut values = match converted {
                Ok(values) => values,
                Err(e) => {
                    ctx.stats
                        .bad_row(table, InsertRows::render_row(row), e.to_string());
                    continue;
                }
            };

            let mut columns = plan.columns.clone();
            if let Some((id, key)) = &plan.synthetic {
                values.push(TargetValue::String(ctx.next_synthetic_value(*id)));
                columns.push(key.clone());
            }

            ctx.write_row(Mutation::new(plan.table.clone(), columns, values))?;
            ctx.stats.good_row(table);
        }
        Ok(())
    }

    /// Resolve where each literal goes. `None` skips the whole chunk.
    fn plan(&self, ctx: &mut ConversionContext, rows: &InsertRows) -> Option<RowPlan> {
        let table = rows.unqualified_table();
        let source_schema = ctx.shared_source();
        let target_schema = ctx.shared_target();
        let (Some(source), Some(target)) = (
            source_schema.by_name(table),
            target_schema.by_source_name(table),
        ) else {
            ctx.unexpected(format!("rows for unknown table {}", table));
            return None;
        };

        let ids: Vec<ColumnId> = match &rows.columns {
            Some(names) => {
                let mut ids = Vec::with_capacity(names.len());
                for name in names {
                    match source.column_id(name) {
                        Some(id) => ids.push(id),
                        None => {
                            ctx.unexpected(format!("rows for unknown column {}.{}", table, name));
                            return None;
                        }
                    }
                }
                ids
            }
            None => source.column_ids.clone(),
        };

        let mut slots = Vec::new();
        let mut columns = Vec::new();
        for (pos, id) in ids.iter().enumerate() {
            // columns removed from the target are silently dropped
            if let Some(col) = target.column(*id) {
                slots.push((pos, col.ty.clone()));
                columns.push(col.name.clone());
            }
        }
        let synthetic = target
            .synthetic_key
            .and_then(|k| target.column(k))
            .map(|c| (target.id, c.name.clone()));

        debug!(
            "{} row(s) for {} ({} column(s))",
            rows.rows.len(),
            target.name,
            columns.len()
        );
        Some(RowPlan {
            table: target.name.clone(),
            slots,
            columns,
            arity: ids.len(),
            synthetic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;
    use crate::convert::SchemaConverter;
    use crate::dialect::{DumpDialect, MySqlDump};
    use crate::parser::RawValue;
    use crate::schema::SchemaBuilder;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn prepared(sql: &str) -> (ConversionContext, Arc<Mutex<Vec<Mutation>>>) {
        let dialect = MySqlDump;
        let mut ctx = ConversionContext::default();
        let builder = SchemaBuilder::new();
        for stmt in dialect.parse_chunk(sql).unwrap() {
            builder.process_statement(&mut ctx, &stmt, None);
        }
        builder.finish(&mut ctx);
        SchemaConverter::new().convert(&mut ctx, &dialect);
        ctx.begin_pass(Mode::Data);

        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&written);
        ctx.set_sink(Box::new(move |m| {
            sink.lock().push(m);
            Ok(())
        }));
        (ctx, written)
    }

    fn rows(table: &str, columns: Option<&[&str]>, data: Vec<Vec<RawValue>>) -> InsertRows {
        let mut r = InsertRows::new(
            table,
            columns.map(|c| c.iter().map(|s| s.to_string()).collect()),
            crate::parser::RowSource::Insert,
        );
        r.rows = data;
        r
    }

    fn n(s: &str) -> RawValue {
        RawValue::Number(s.into())
    }

    fn t(s: &str) -> RawValue {
        RawValue::Text(s.into())
    }

    #[test]
    fn test_synthetic_values_are_distinct() {
        let (mut ctx, written) = prepared("CREATE TABLE t (a INT, b VARCHAR(10));");
        RowConverter::new()
            .process_rows(&mut ctx, &rows("t", None, vec![vec![n("1"), t("x")], vec![n("2"), t("y")]]))
            .unwrap();

        let written = written.lock();
        assert_eq!(written.len(), 2);
        let a = written[0].value("synth_id").unwrap();
        let b = written[1].value("synth_id").unwrap();
        assert_ne!(a, b);
        assert_eq!(ctx.stats.good_rows["t"], 2);
    }

    #[test]
    fn test_bad_token_marks_row_bad() {
        let (mut ctx, written) = prepared("CREATE TABLE t (a INT, b VARCHAR(10));");
        let data = vec![
            vec![RawValue::Unsupported("bad_token".into()), t("b")],
            vec![n("2"), t("c")],
        ];
        RowConverter::new()
            .process_rows(&mut ctx, &rows("t", None, data))
            .unwrap();

        assert_eq!(written.lock().len(), 1);
        assert_eq!(ctx.stats.bad_rows["t"], 1);
        assert_eq!(ctx.stats.good_rows["t"], 1);
        assert_eq!(ctx.stats.bad_row_samples()[0].values, "(bad_token, 'b')");
    }

    #[test]
    fn test_explicit_column_order_and_arity() {
        let (mut ctx, written) =
            prepared("CREATE TABLE t (id BIGINT NOT NULL, name TEXT, PRIMARY KEY (id));");
        let data = vec![vec![t("ann"), n("1")], vec![t("bob")]];
        RowConverter::new()
            .process_rows(&mut ctx, &rows("t", Some(&["name", "id"]), data))
            .unwrap();

        let written = written.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].value("id"), Some(&TargetValue::Int64(1)));
        assert_eq!(written[0].value("name"), Some(&TargetValue::String("ann".into())));
        assert!(written[0].value("synth_id").is_none());
        assert_eq!(ctx.stats.bad_rows["t"], 1);
    }

    #[test]
    fn test_unknown_table_and_column_skip_statement() {
        let (mut ctx, written) = prepared("CREATE TABLE t (a INT);");
        let conv = RowConverter::new();
        conv.process_rows(&mut ctx, &rows("nope", None, vec![vec![n("1")]]))
            .unwrap();
        conv.process_rows(&mut ctx, &rows("t", Some(&["zzz"]), vec![vec![n("1")]]))
            .unwrap();

        assert!(written.lock().is_empty());
        assert_eq!(ctx.stats.unexpected.len(), 2);
        assert!(ctx.stats.bad_rows.is_empty());
    }

    #[test]
    fn test_removed_column_is_dropped_silently() {
        let (mut ctx, written) =
            prepared("CREATE TABLE t (id BIGINT NOT NULL, junk TEXT, PRIMARY KEY (id));");
        let (table, junk) = {
            let tbl = ctx.target().by_source_name("t").unwrap();
            (tbl.id, tbl.column_by_name("junk").unwrap().id)
        };
        let mut issues = ctx.issues.clone();
        crate::convert::edit::remove_column(ctx.target_mut(), &mut issues, table, junk).unwrap();

        RowConverter::new()
            .process_rows(&mut ctx, &rows("t", None, vec![vec![n("1"), t("whatever")]]))
            .unwrap();
        let written = written.lock();
        assert_eq!(written[0].columns, vec!["id".to_string()]);
    }

    #[test]
    fn test_continuation_counts_statement_once() {
        let (mut ctx, _written) = prepared("CREATE TABLE t (a INT);");
        let mut first = rows("t", None, vec![vec![n("1")]]);
        first.source = crate::parser::RowSource::Copy;
        let mut rest = first.clone();
        rest.continuation = true;
        let conv = RowConverter::new();
        conv.process_rows(&mut ctx, &first).unwrap();
        conv.process_rows(&mut ctx, &rest).unwrap();

        assert_eq!(ctx.stats.statements["CopyStmt"].data, 1);
        assert_eq!(ctx.stats.good_rows["t"], 2);
    }
}
