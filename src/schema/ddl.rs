//! DDL statement processing for the schema pass.
//!
//! Turns parsed CREATE TABLE, ALTER TABLE, CREATE INDEX and SET statements
//! into the source schema held by the conversion context:
//! - Column definitions with declared types, nullability, defaults
//! - Primary keys (column-level and table-level)
//! - Foreign keys, unique constraints, plain/fulltext/spatial indexes
//! - Check constraints
//!
//! Nothing here is fatal: malformed definitions are logged as unexpected
//! and the rest of the statement is still applied.

use super::{
    parse_type_text, CheckConstraint, ColumnId, DefaultValue, ExprId, FkAction, ForeignKey, Index,
    IndexKey, KeyColumns, SourceAutoGen, SourceColumn, SourceTable,
};
use crate::context::{ConversionContext, IssueKind};
use crate::parser::{
    parse_time_zone, statement_kind, DumpStatement, InsertRows, ParsedChunk, RawValue, Repair,
};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{
    AlterColumnOperation, AlterTableOperation, ColumnOption, CreateIndex, CreateTable, DataType,
    Expr, Ident, ObjectName, ReferentialAction, Statement, TableConstraint, Value,
};
use tracing::{debug, warn};

static NEXTVAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bnextval\s*\(\s*'([^']+)'").unwrap());

static UUID_DEFAULT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\(?\s*(?:gen_random_uuid|uuid_generate_v4|uuid)\s*\(\s*\)\s*\)?$").unwrap()
});

/// `_utf8mb4'abc'` collation introducers in MySQL check expressions
static INTRODUCER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b_(?:utf8mb4|utf8mb3|utf8|latin1|binary|ascii|ucs2|utf16|utf32)\s*'").unwrap()
});

const SERIAL_TYPES: &[&str] = &[
    "serial",
    "serial2",
    "serial4",
    "serial8",
    "smallserial",
    "bigserial",
];

/// What happened to one statement, for the counters
enum Handled {
    Processed,
    Skipped,
    Failed,
}

/// Builds the source schema from the statements of the schema pass
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaBuilder;

impl SchemaBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Apply every statement of a chunk
    pub fn process_chunk(&self, ctx: &mut ConversionContext, chunk: &ParsedChunk) {
        for statement in &chunk.statements {
            match statement {
                DumpStatement::Sql(stmt) => self.process_statement(ctx, stmt, chunk.repair.as_ref()),
                DumpStatement::Rows(rows) => self.process_rows(ctx, rows),
            }
        }
    }

    /// Apply one DDL statement and count it by kind
    pub fn process_statement(
        &self,
        ctx: &mut ConversionContext,
        stmt: &Statement,
        repair: Option<&Repair>,
    ) {
        let kind = statement_kind(stmt);
        let handled = match stmt {
            Statement::CreateTable(create) => self.create_table(ctx, create, repair),
            Statement::AlterTable {
                name, operations, ..
            } => self.alter_table(ctx, name, operations, repair),
            Statement::CreateIndex(index) => self.create_index(ctx, index),
            Statement::SetVariable {
                variables, value, ..
            } => {
                if variables.to_string().eq_ignore_ascii_case("time_zone") {
                    self.set_time_zone(ctx, value.first());
                }
                Handled::Processed
            }
            Statement::SetTimeZone { value, .. } => {
                self.set_time_zone(ctx, Some(value));
                Handled::Processed
            }
            _ => {
                debug!("ignoring {} statement", kind);
                Handled::Skipped
            }
        };

        match handled {
            Handled::Processed => ctx.stats.schema_statement(&kind),
            Handled::Skipped => ctx.stats.skip_statement(&kind),
            Handled::Failed => ctx.stats.error_statement(&kind),
        }
    }

    /// Count rows of an INSERT or COPY chunk
    pub fn process_rows(&self, ctx: &mut ConversionContext, rows: &InsertRows) {
        ctx.stats
            .add_rows(rows.unqualified_table(), rows.rows.len() as u64);
        if !rows.continuation {
            ctx.stats.schema_statement(rows.source.kind());
        }
    }

    /// End of the schema pass: resolve foreign key references by id
    pub fn finish(&self, ctx: &mut ConversionContext) {
        for message in ctx.source_mut().resolve_foreign_keys() {
            ctx.unexpected(message);
        }
    }

    fn create_table(
        &self,
        ctx: &mut ConversionContext,
        create: &CreateTable,
        repair: Option<&Repair>,
    ) -> Handled {
        let (namespace, name) = split_name(&create.name);
        if name.is_empty() {
            ctx.unexpected("CREATE TABLE without a table name");
            return Handled::Failed;
        }

        // A re-created table keeps its id, and same-named columns keep theirs
        let previous = ctx.source().by_name(&name).cloned();
        let id = match &previous {
            Some(t) => {
                debug!("table {} re-created", name);
                t.id
            }
            None => ctx.ids.next(),
        };

        let mut table = SourceTable::new(id, name, namespace);
        for def in &create.columns {
            let column_id = previous
                .as_ref()
                .and_then(|t| t.column_id(&def.name.value))
                .unwrap_or_else(|| ctx.ids.next());
            let options: Vec<&ColumnOption> = def.options.iter().map(|o| &o.option).collect();
            let column = self.build_column(
                ctx,
                &mut table,
                column_id,
                &def.name.value,
                &def.data_type,
                &options,
            );
            table.push_column(column);
        }
        for constraint in &create.constraints {
            self.add_constraint(ctx, &mut table, constraint);
        }

        if repair == Some(&Repair::Spatial) {
            ctx.issues.record_table(id, IssueKind::SpatialRewritten);
        }
        debug!(
            "table {} ({}) with {} column(s)",
            table.name,
            id,
            table.column_ids.len()
        );
        ctx.source_mut().insert(table);
        Handled::Processed
    }

    fn alter_table(
        &self,
        ctx: &mut ConversionContext,
        name: &ObjectName,
        operations: &[AlterTableOperation],
        repair: Option<&Repair>,
    ) -> Handled {
        let (_, table_name) = split_name(name);
        let Some(mut table) = ctx.source().by_name(&table_name).cloned() else {
            ctx.unexpected(format!("ALTER TABLE on unknown table {}", table_name));
            return Handled::Skipped;
        };

        for op in operations {
            match op {
                AlterTableOperation::AddConstraint(constraint) => {
                    self.add_constraint(ctx, &mut table, constraint)
                }
                AlterTableOperation::AddColumn { column_def, .. } => {
                    let id = table
                        .column_id(&column_def.name.value)
                        .unwrap_or_else(|| ctx.ids.next());
                    let options: Vec<&ColumnOption> =
                        column_def.options.iter().map(|o| &o.option).collect();
                    let column = self.build_column(
                        ctx,
                        &mut table,
                        id,
                        &column_def.name.value,
                        &column_def.data_type,
                        &options,
                    );
                    table.push_column(column);
                }
                AlterTableOperation::ModifyColumn {
                    col_name,
                    data_type,
                    options,
                    ..
                } => self.replace_column(ctx, &mut table, col_name, col_name, data_type, options),
                AlterTableOperation::ChangeColumn {
                    old_name,
                    new_name,
                    data_type,
                    options,
                    ..
                } => self.replace_column(ctx, &mut table, old_name, new_name, data_type, options),
                AlterTableOperation::DropColumn { column_name, .. } => {
                    match table.column_id(&column_name.value) {
                        Some(id) => {
                            let checks = table.checks.len();
                            table.remove_column(id);
                            if table.checks.len() != checks {
                                ctx.issues.record_table(table.id, IssueKind::CheckDropped);
                            }
                        }
                        None => ctx.unexpected(format!(
                            "DROP COLUMN of unknown column {}.{}",
                            table.name, column_name.value
                        )),
                    }
                }
                AlterTableOperation::RenameColumn {
                    old_column_name,
                    new_column_name,
                } => match table.column_id(&old_column_name.value) {
                    Some(id) => table.rename_column(id, &new_column_name.value),
                    None => ctx.unexpected(format!(
                        "RENAME COLUMN of unknown column {}.{}",
                        table.name, old_column_name.value
                    )),
                },
                AlterTableOperation::AlterColumn { column_name, op } => {
                    self.alter_column(ctx, &mut table, column_name, op)
                }
                other => debug!("ignoring ALTER TABLE {} operation: {}", table.name, other),
            }
        }

        if repair == Some(&Repair::Spatial) {
            ctx.issues.record_table(table.id, IssueKind::SpatialRewritten);
        }
        ctx.source_mut().insert(table);
        Handled::Processed
    }

    fn replace_column(
        &self,
        ctx: &mut ConversionContext,
        table: &mut SourceTable,
        old_name: &Ident,
        new_name: &Ident,
        data_type: &DataType,
        options: &[ColumnOption],
    ) {
        let Some(id) = table.column_id(&old_name.value) else {
            ctx.unexpected(format!(
                "MODIFY/CHANGE of unknown column {}.{}",
                table.name, old_name.value
            ));
            return;
        };
        table.rename_column(id, &new_name.value);
        let options: Vec<&ColumnOption> = options.iter().collect();
        let column = self.build_column(ctx, table, id, &new_name.value, data_type, &options);
        table.push_column(column);
    }

    fn alter_column(
        &self,
        ctx: &mut ConversionContext,
        table: &mut SourceTable,
        column_name: &Ident,
        op: &AlterColumnOperation,
    ) {
        let Some(id) = table.column_id(&column_name.value) else {
            ctx.unexpected(format!(
                "ALTER COLUMN of unknown column {}.{}",
                table.name, column_name.value
            ));
            return;
        };
        let default_id = ctx.ids.next();
        let Some(column) = table.column_mut(id) else {
            return;
        };
        match op {
            AlterColumnOperation::SetNotNull => column.not_null = true,
            AlterColumnOperation::DropNotNull => column.not_null = false,
            AlterColumnOperation::SetDefault { value } => apply_default(column, value, default_id),
            AlterColumnOperation::DropDefault => {
                column.default = None;
                column.ignored.default = false;
                if matches!(
                    column.auto_gen,
                    SourceAutoGen::Sequence(_) | SourceAutoGen::Uuid
                ) {
                    column.auto_gen = SourceAutoGen::None;
                }
            }
            other => debug!("ignoring ALTER COLUMN operation: {}", other),
        }
    }

    fn create_index(&self, ctx: &mut ConversionContext, index: &CreateIndex) -> Handled {
        let (_, table_name) = split_name(&index.table_name);
        let Some(mut table) = ctx.source().by_name(&table_name).cloned() else {
            ctx.unexpected(format!("CREATE INDEX on unknown table {}", table_name));
            return Handled::Skipped;
        };

        let mut keys = Vec::new();
        for (order, column) in index.columns.iter().enumerate() {
            let name = match &column.expr {
                Expr::Identifier(ident) => Some(ident.value.as_str()),
                Expr::CompoundIdentifier(parts) => parts.last().map(|p| p.value.as_str()),
                _ => None,
            };
            match name.and_then(|n| table.column_id(n)) {
                Some(id) => keys.push(IndexKey {
                    column: id,
                    desc: column.asc == Some(false),
                    order,
                }),
                None => ctx.unexpected(format!(
                    "index on {} uses unsupported key {}",
                    table.name, column.expr
                )),
            }
        }
        if keys.is_empty() {
            return Handled::Failed;
        }

        let name = index
            .name
            .as_ref()
            .map(|n| split_name(n).1)
            .unwrap_or_else(|| generated_index_name(&table, &keys, index.unique));
        table.indexes.push(Index {
            id: ctx.ids.next(),
            name,
            unique: index.unique,
            keys,
        });
        ctx.source_mut().insert(table);
        Handled::Processed
    }

    fn set_time_zone(&self, ctx: &mut ConversionContext, value: Option<&Expr>) {
        let Some(RawValue::Text(zone)) = value.map(RawValue::from_expr) else {
            ctx.unexpected("SET TIME_ZONE without a string value");
            return;
        };
        match parse_time_zone(&zone) {
            Ok(offset) => ctx.timezone = offset,
            Err(e) => ctx.unexpected(e),
        }
    }

    /// Build a column from its definition; column-level keys are attached to
    /// the table directly.
    fn build_column(
        &self,
        ctx: &mut ConversionContext,
        table: &mut SourceTable,
        id: ColumnId,
        name: &str,
        data_type: &DataType,
        options: &[&ColumnOption],
    ) -> SourceColumn {
        let (ty, problems) = parse_type_text(&data_type.to_string());
        for problem in problems {
            ctx.unexpected(format!("{}.{}: {}", table.name, name, problem));
        }
        let mut column = SourceColumn::new(id, name, ty);
        if SERIAL_TYPES.contains(&column.ty.name.as_str()) {
            column.auto_gen = SourceAutoGen::AutoIncrement;
            column.not_null = true;
        }

        for option in options {
            match option {
                ColumnOption::NotNull => column.not_null = true,
                ColumnOption::Null => column.not_null = false,
                ColumnOption::Default(expr) => {
                    let default_id = ctx.ids.next();
                    apply_default(&mut column, expr, default_id);
                }
                ColumnOption::Unique { is_primary: true, .. } => {
                    column.not_null = true;
                    if !table.primary_keys.is_empty() {
                        multiple_primary_keys(ctx, table);
                    }
                    table.primary_keys = KeyColumns::from_iter([IndexKey {
                        column: id,
                        desc: false,
                        order: 0,
                    }]);
                }
                ColumnOption::Unique { .. } => table.indexes.push(Index {
                    id: ctx.ids.next(),
                    name: format!("{}_{}_key", table.name, name),
                    unique: true,
                    keys: vec![IndexKey {
                        column: id,
                        desc: false,
                        order: 0,
                    }],
                }),
                ColumnOption::ForeignKey {
                    foreign_table,
                    referred_columns,
                    on_delete,
                    on_update,
                    ..
                } => {
                    column.ignored.foreign_key = true;
                    table.foreign_keys.push(ForeignKey {
                        id: ctx.ids.next(),
                        name: String::new(),
                        column_ids: vec![id],
                        refer_table_name: split_name(foreign_table).1,
                        refer_column_names: referred_columns.iter().map(|c| c.value.clone()).collect(),
                        refer_table_id: None,
                        refer_column_ids: Vec::new(),
                        on_delete: fk_action(on_delete.as_ref()),
                        on_update: fk_action(on_update.as_ref()),
                    });
                }
                ColumnOption::Check(_) => column.ignored.check = true,
                ColumnOption::DialectSpecific(tokens)
                    if tokens.iter().any(|t| {
                        let t = t.to_string();
                        t.eq_ignore_ascii_case("AUTO_INCREMENT") || t.eq_ignore_ascii_case("AUTOINCREMENT")
                    }) =>
                {
                    column.auto_gen = SourceAutoGen::AutoIncrement;
                    column.ignored.auto_increment = true;
                }
                ColumnOption::Generated {
                    generation_expr: None,
                    ..
                } => column.auto_gen = SourceAutoGen::Identity,
                _ => {}
            }
        }
        column
    }

    fn add_constraint(
        &self,
        ctx: &mut ConversionContext,
        table: &mut SourceTable,
        constraint: &TableConstraint,
    ) {
        match constraint {
            TableConstraint::PrimaryKey { columns, .. } => {
                let Some(keys) = key_columns(ctx, table, columns) else {
                    return;
                };
                if !table.primary_keys.is_empty() {
                    multiple_primary_keys(ctx, table);
                }
                for key in &keys {
                    if let Some(column) = table.column_mut(key.column) {
                        column.not_null = true;
                    }
                }
                table.primary_keys = keys.into_iter().collect();
            }
            TableConstraint::Unique {
                name,
                index_name,
                columns,
                ..
            } => {
                let Some(keys) = key_columns(ctx, table, columns) else {
                    return;
                };
                let name = name
                    .as_ref()
                    .or(index_name.as_ref())
                    .map(|n| n.value.clone())
                    .unwrap_or_else(|| generated_index_name(table, &keys, true));
                table.indexes.push(Index {
                    id: ctx.ids.next(),
                    name,
                    unique: true,
                    keys,
                });
            }
            TableConstraint::Index { name, columns, .. } => {
                self.plain_index(ctx, table, name.as_ref(), columns)
            }
            TableConstraint::FulltextOrSpatial {
                opt_index_name,
                columns,
                ..
            } => self.plain_index(ctx, table, opt_index_name.as_ref(), columns),
            TableConstraint::ForeignKey {
                name,
                columns,
                foreign_table,
                referred_columns,
                on_delete,
                on_update,
                ..
            } => {
                let Some(keys) = key_columns(ctx, table, columns) else {
                    return;
                };
                for key in &keys {
                    if let Some(column) = table.column_mut(key.column) {
                        column.ignored.foreign_key = true;
                    }
                }
                table.foreign_keys.push(ForeignKey {
                    id: ctx.ids.next(),
                    name: name.as_ref().map(|n| n.value.clone()).unwrap_or_default(),
                    column_ids: keys.iter().map(|k| k.column).collect(),
                    refer_table_name: split_name(foreign_table).1,
                    refer_column_names: referred_columns.iter().map(|c| c.value.clone()).collect(),
                    refer_table_id: None,
                    refer_column_ids: Vec::new(),
                    on_delete: fk_action(on_delete.as_ref()),
                    on_update: fk_action(on_update.as_ref()),
                });
            }
            TableConstraint::Check { name, expr, .. } => {
                let name = name
                    .as_ref()
                    .map(|n| n.value.clone())
                    .unwrap_or_else(|| format!("{}_chk_{}", table.name, table.checks.len() + 1));
                table.checks.push(CheckConstraint {
                    id: ctx.ids.next(),
                    name,
                    expr: check_expression(&expr.to_string()),
                    expr_id: ctx.ids.next(),
                });
            }
            #[allow(unreachable_patterns)]
            other => debug!("ignoring constraint on {}: {}", table.name, other),
        }
    }

    fn plain_index(
        &self,
        ctx: &mut ConversionContext,
        table: &mut SourceTable,
        name: Option<&Ident>,
        columns: &[Ident],
    ) {
        let Some(keys) = key_columns(ctx, table, columns) else {
            return;
        };
        let name = name
            .map(|n| n.value.clone())
            .unwrap_or_else(|| generated_index_name(table, &keys, false));
        table.indexes.push(Index {
            id: ctx.ids.next(),
            name,
            unique: false,
            keys,
        });
    }
}

fn multiple_primary_keys(ctx: &mut ConversionContext, table: &SourceTable) {
    warn!(
        "table {} declares more than one primary key; keeping the last",
        table.name
    );
    ctx.issues
        .record_table(table.id, IssueKind::MultiplePrimaryKeys);
}

/// Resolve key column names; `None` (logged) if any is unknown
fn key_columns(
    ctx: &mut ConversionContext,
    table: &SourceTable,
    columns: &[Ident],
) -> Option<Vec<IndexKey>> {
    let mut keys = Vec::with_capacity(columns.len());
    for (order, ident) in columns.iter().enumerate() {
        match table.column_id(&ident.value) {
            Some(column) => keys.push(IndexKey {
                column,
                desc: false,
                order,
            }),
            None => {
                ctx.unexpected(format!(
                    "key on {} references unknown column {}",
                    table.name, ident.value
                ));
                return None;
            }
        }
    }
    (!keys.is_empty()).then_some(keys)
}

fn generated_index_name(table: &SourceTable, keys: &[IndexKey], unique: bool) -> String {
    let columns: Vec<&str> = keys
        .iter()
        .filter_map(|k| table.column(k.column))
        .map(|c| c.name.as_str())
        .collect();
    let suffix = if unique { "key" } else { "idx" };
    format!("{}_{}_{}", table.name, columns.join("_"), suffix)
}

fn apply_default(column: &mut SourceColumn, expr: &Expr, id: ExprId) {
    if matches!(expr, Expr::Value(Value::Null)) {
        return;
    }
    let text = expr.to_string();
    if let Some(caps) = NEXTVAL_RE.captures(&text) {
        column.auto_gen = SourceAutoGen::Sequence(caps[1].to_string());
        return;
    }
    if UUID_DEFAULT_RE.is_match(text.trim()) {
        column.auto_gen = SourceAutoGen::Uuid;
        return;
    }
    column.ignored.default = true;
    column.default = Some(DefaultValue { id, expr: text });
}

fn fk_action(action: Option<&ReferentialAction>) -> FkAction {
    action
        .and_then(|a| a.to_string().parse().ok())
        .unwrap_or_default()
}

/// Check expression text without collation introducers, parenthesized
pub fn check_expression(text: &str) -> String {
    let text = INTRODUCER_RE.replace_all(text.trim(), "'");
    if is_wrapped(&text) {
        text.into_owned()
    } else {
        format!("({})", text)
    }
}

/// True if the first `(` is closed by the final `)`
fn is_wrapped(text: &str) -> bool {
    if !text.starts_with('(') || !text.ends_with(')') {
        return false;
    }
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, ch) in text.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// (namespace, name) of a possibly qualified object name
fn split_name(name: &ObjectName) -> (Option<String>, String) {
    match name.0.split_last() {
        Some((last, rest)) => (rest.last().map(|i| i.value.clone()), last.value.clone()),
        None => (None, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DumpDialect, MySqlDump, PostgresDump};

    fn build(dialect: &dyn DumpDialect, sql: &str) -> ConversionContext {
        let mut ctx = ConversionContext::default();
        let builder = SchemaBuilder::new();
        for stmt in dialect.parse_chunk(sql).unwrap() {
            builder.process_statement(&mut ctx, &stmt, None);
        }
        builder.finish(&mut ctx);
        ctx
    }

    #[test]
    fn test_create_table_columns_and_keys() {
        let ctx = build(
            &MySqlDump,
            "CREATE TABLE `users` (
              `id` int(11) NOT NULL AUTO_INCREMENT,
              `email` varchar(255) NOT NULL,
              `status` enum('a','b') DEFAULT 'a',
              `note` text DEFAULT NULL,
              PRIMARY KEY (`id`),
              UNIQUE KEY `uq_email` (`email`),
              KEY `idx_status` (`status`)
            ) ENGINE=InnoDB;",
        );
        let t = ctx.source().by_name("users").unwrap();
        assert_eq!(t.column_ids.len(), 4);
        let id = t.column(t.column_id("id").unwrap()).unwrap();
        assert_eq!(id.ty.name, "int");
        assert_eq!(id.ty.mods, vec![11]);
        assert_eq!(id.auto_gen, SourceAutoGen::AutoIncrement);
        assert!(id.not_null);

        let status = t.column(t.column_id("status").unwrap()).unwrap();
        assert!(status.ignored.default);
        assert_eq!(status.default.as_ref().unwrap().expr, "'a'");
        let note = t.column(t.column_id("note").unwrap()).unwrap();
        assert!(!note.ignored.default);

        assert_eq!(t.primary_keys.len(), 1);
        assert_eq!(t.indexes.len(), 2);
        assert!(t.indexes.iter().any(|i| i.name == "uq_email" && i.unique));
        assert_eq!(ctx.stats.statements["CreateStmt"].schema, 1);
    }

    #[test]
    fn test_recreated_table_keeps_ids() {
        let mut ctx = build(&MySqlDump, "CREATE TABLE t (a INT, b INT);");
        let first = ctx.source().by_name("t").unwrap().clone();
        let stmts = MySqlDump.parse_chunk("CREATE TABLE t (b BIGINT, c INT);").unwrap();
        SchemaBuilder::new().process_statement(&mut ctx, &stmts[0], None);

        let second = ctx.source().by_name("t").unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.column_id("b"), first.column_id("b"));
        assert!(second.column_id("a").is_none());
        assert_eq!(ctx.source().len(), 1);
    }

    #[test]
    fn test_foreign_keys_resolve_forward_references() {
        let ctx = build(
            &MySqlDump,
            "CREATE TABLE orders (id INT PRIMARY KEY, user_id INT,
               CONSTRAINT fk_user FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE);
             CREATE TABLE users (id INT PRIMARY KEY);",
        );
        let orders = ctx.source().by_name("orders").unwrap();
        let users = ctx.source().by_name("users").unwrap();
        let fk = &orders.foreign_keys[0];
        assert_eq!(fk.name, "fk_user");
        assert_eq!(fk.on_delete, FkAction::Cascade);
        assert_eq!(fk.on_update, FkAction::NoAction);
        assert_eq!(fk.refer_table_id, Some(users.id));
    }

    #[test]
    fn test_alter_column_changes_reach_checks() {
        let ctx = build(
            &PostgresDump,
            "CREATE TABLE t (id integer, qty integer, price integer,
               CONSTRAINT qty_pos CHECK (qty > 0), CONSTRAINT price_pos CHECK (price > 0));
             ALTER TABLE t RENAME COLUMN qty TO quantity;
             ALTER TABLE t DROP COLUMN price;",
        );
        let t = ctx.source().by_name("t").unwrap();
        assert_eq!(t.checks.len(), 1);
        assert_eq!(t.checks[0].name, "qty_pos");
        assert!(t.checks[0].expr.contains("quantity > 0"));
        assert!(ctx.issues.has(t.id, None, IssueKind::CheckDropped));
    }

    #[test]
    fn test_composite_primary_key_overrides_column_level() {
        let ctx = build(
            &MySqlDump,
            "CREATE TABLE t (a INT PRIMARY KEY, b INT, PRIMARY KEY (a, b));",
        );
        let t = ctx.source().by_name("t").unwrap();
        assert_eq!(t.primary_keys.len(), 2);
        assert!(ctx
            .issues
            .has(t.id, None, IssueKind::MultiplePrimaryKeys));
    }

    #[test]
    fn test_alter_table_operations() {
        let ctx = build(
            &PostgresDump,
            "CREATE TABLE public.users (id integer NOT NULL, name text, old text);
             ALTER TABLE ONLY public.users ADD CONSTRAINT users_pkey PRIMARY KEY (id);
             ALTER TABLE ONLY public.users ALTER COLUMN id SET DEFAULT nextval('public.users_id_seq'::regclass);
             ALTER TABLE public.users DROP COLUMN old;
             ALTER TABLE public.users RENAME COLUMN name TO full_name;
             ALTER TABLE public.users ALTER COLUMN full_name SET NOT NULL;",
        );
        let t = ctx.source().by_name("users").unwrap();
        assert_eq!(t.namespace.as_deref(), Some("public"));
        assert_eq!(t.column_ids.len(), 2);
        let id = t.column(t.column_id("id").unwrap()).unwrap();
        assert_eq!(id.auto_gen, SourceAutoGen::Sequence("public.users_id_seq".into()));
        let name = t.column(t.column_id("full_name").unwrap()).unwrap();
        assert!(name.not_null);
        assert_eq!(t.primary_keys.len(), 1);
    }

    #[test]
    fn test_alter_unknown_table_is_skipped() {
        let ctx = build(&MySqlDump, "ALTER TABLE nope ADD COLUMN a INT;");
        assert_eq!(ctx.stats.statements["AlterTableStmt"].skipped, 1);
        assert_eq!(ctx.stats.unexpected.len(), 1);
    }

    #[test]
    fn test_create_index_preserves_order_and_direction() {
        let ctx = build(
            &PostgresDump,
            "CREATE TABLE t (a int, b int);
             CREATE UNIQUE INDEX t_ab ON public.t USING btree (b DESC, a);",
        );
        let t = ctx.source().by_name("t").unwrap();
        let index = &t.indexes[0];
        assert!(index.unique);
        assert_eq!(index.keys[0].column, t.column_id("b").unwrap());
        assert!(index.keys[0].desc);
        assert!(!index.keys[1].desc);
    }

    #[test]
    fn test_check_expression() {
        assert_eq!(check_expression("a > 0"), "(a > 0)");
        assert_eq!(check_expression("(a > 0)"), "(a > 0)");
        assert_eq!(check_expression("(a > 0) AND (b > 0)"), "((a > 0) AND (b > 0))");
        assert_eq!(check_expression("(s = _utf8mb4'x')"), "(s = 'x')");
    }

    #[test]
    fn test_set_time_zone() {
        let ctx = build(&MySqlDump, "SET TIME_ZONE = '-05:00';");
        assert_eq!(ctx.timezone.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_rows_are_counted_once_per_statement() {
        let mut ctx = ConversionContext::default();
        let mut rows = InsertRows::new("public.t", None, crate::parser::RowSource::Copy);
        rows.rows = vec![vec![RawValue::Null]; 3];
        let builder = SchemaBuilder::new();
        builder.process_rows(&mut ctx, &rows);
        rows.continuation = true;
        builder.process_rows(&mut ctx, &rows);
        assert_eq!(ctx.stats.rows["t"], 6);
        assert_eq!(ctx.stats.statements["CopyStmt"].schema, 1);
    }
}
