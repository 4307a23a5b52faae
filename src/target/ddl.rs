//! DDL printing for the target schema.
//!
//! Statements come out in dependency order: sequences, tables (interleave
//! parents before children), indexes, then foreign keys as `ALTER TABLE`
//! statements once every table exists. Within a table, columns keep their
//! declaration order and constraints are sorted by name, so the output does
//! not depend on the order clauses appeared in the dump.

use super::{
    Sequence, TargetAutoGen, TargetColumn, TargetDialect, TargetForeignKey, TargetGraph,
    TargetIndex, TargetSchema, TargetTable,
};
use crate::schema::IndexKey;
use once_cell::sync::Lazy;
use regex::Regex;

static SIMPLE_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

const RESERVED: &[&str] = &[
    "all", "and", "array", "as", "asc", "between", "by", "case", "cast", "check", "create",
    "cross", "default", "desc", "distinct", "else", "end", "exists", "false", "from", "full",
    "group", "having", "in", "index", "inner", "interleave", "interval", "into", "is", "join",
    "left", "like", "limit", "not", "null", "on", "or", "order", "outer", "primary", "right",
    "select", "set", "table", "then", "to", "true", "union", "unique", "user", "using", "when",
    "where", "with",
];

/// Quote an identifier when it is not a plain word or is reserved
pub fn quote_ident(name: &str, dialect: TargetDialect) -> String {
    let needs_quotes =
        !SIMPLE_IDENT.is_match(name) || RESERVED.contains(&name.to_lowercase().as_str());
    if !needs_quotes {
        return name.to_string();
    }
    match dialect {
        TargetDialect::GoogleSql => format!("`{}`", name.replace('`', "\\`")),
        TargetDialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}

/// Every statement needed to create the schema, in dependency order
pub fn print_schema(schema: &TargetSchema, dialect: TargetDialect) -> Vec<String> {
    let mut statements = Vec::new();

    for seq in schema.sequences.values() {
        statements.push(print_sequence(seq, dialect));
    }

    let sorted = TargetGraph::from_schema(schema).topo_sort();
    let order = sorted.order.iter().chain(sorted.cyclic_tables.iter());
    let tables: Vec<&TargetTable> = order.filter_map(|id| schema.get(*id)).collect();

    for table in &tables {
        statements.push(print_create_table(schema, table, dialect));
    }
    for table in &tables {
        let mut indexes: Vec<&TargetIndex> = table.indexes.iter().collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        for index in indexes {
            statements.push(print_index(table, index, dialect));
        }
    }
    for table in &tables {
        let mut fks: Vec<&TargetForeignKey> = table.foreign_keys.iter().collect();
        fks.sort_by(|a, b| a.name.cmp(&b.name));
        for fk in fks {
            if let Some(stmt) = print_foreign_key(schema, table, fk, dialect) {
                statements.push(stmt);
            }
        }
    }

    statements
}

/// All statements joined into one script
pub fn print_schema_script(schema: &TargetSchema, dialect: TargetDialect) -> String {
    let mut out = String::new();
    for stmt in print_schema(schema, dialect) {
        out.push_str(&stmt);
        out.push_str(";\n\n");
    }
    out
}

pub fn print_sequence(seq: &Sequence, dialect: TargetDialect) -> String {
    match dialect {
        TargetDialect::GoogleSql => format!(
            "CREATE SEQUENCE {} OPTIONS (sequence_kind='{}')",
            quote_ident(&seq.name, dialect),
            seq.kind.as_str()
        ),
        TargetDialect::Postgres => format!(
            "CREATE SEQUENCE {} {}",
            quote_ident(&seq.name, dialect),
            seq.kind.as_str().to_uppercase()
        ),
    }
}

fn print_column(schema: &TargetSchema, col: &TargetColumn, dialect: TargetDialect) -> String {
    let mut s = format!("{} {}", quote_ident(&col.name, dialect), col.ty.sql(dialect));
    if col.not_null {
        s.push_str(" NOT NULL");
    }
    let default = match &col.auto_gen {
        TargetAutoGen::Sequence(seq_id) => schema.sequences.get(seq_id).map(|seq| {
            let name = quote_ident(&seq.name, dialect);
            match dialect {
                TargetDialect::GoogleSql => format!("GET_NEXT_SEQUENCE_VALUE(SEQUENCE {})", name),
                TargetDialect::Postgres => format!("nextval('{}')", seq.name),
            }
        }),
        TargetAutoGen::PreDefined(func) => Some(predefined_call(func, dialect)),
        TargetAutoGen::None => col.default.clone(),
    };
    if let Some(expr) = default {
        match dialect {
            TargetDialect::GoogleSql => s.push_str(&format!(" DEFAULT ({})", expr)),
            TargetDialect::Postgres => s.push_str(&format!(" DEFAULT {}", expr)),
        }
    }
    s
}

fn predefined_call(func: &str, dialect: TargetDialect) -> String {
    match (func, dialect) {
        ("GENERATE_UUID", TargetDialect::GoogleSql) => "GENERATE_UUID()".to_string(),
        ("GENERATE_UUID", TargetDialect::Postgres) => "spanner.generate_uuid()".to_string(),
        (other, _) => format!("{}()", other),
    }
}

fn print_keys(table: &TargetTable, keys: &[IndexKey], dialect: TargetDialect) -> String {
    let mut keys = keys.to_vec();
    keys.sort_by_key(|k| k.order);
    keys.iter()
        .filter_map(|k| {
            table.column(k.column).map(|c| {
                let name = quote_ident(&c.name, dialect);
                if k.desc {
                    format!("{} DESC", name)
                } else {
                    name
                }
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn print_create_table(schema: &TargetSchema, table: &TargetTable, dialect: TargetDialect) -> String {
    let mut body = Vec::new();
    for col in table.ordered_columns() {
        body.push(print_column(schema, col, dialect));
    }

    let mut checks: Vec<_> = table.checks.iter().collect();
    checks.sort_by(|a, b| a.name.cmp(&b.name));
    for check in checks {
        body.push(format!(
            "CONSTRAINT {} CHECK {}",
            quote_ident(&check.name, dialect),
            check.expr
        ));
    }

    let pk = print_keys(table, &table.primary_keys, dialect);
    let interleave = table.parent.and_then(|p| {
        schema.get(p.table).map(|parent| {
            format!(
                "INTERLEAVE IN PARENT {} ON DELETE {}",
                quote_ident(&parent.name, dialect),
                p.on_delete.as_sql()
            )
        })
    });
    let name = quote_ident(&table.name, dialect);

    match dialect {
        TargetDialect::GoogleSql => {
            let mut s = format!("CREATE TABLE {} (\n", name);
            for line in &body {
                s.push_str(&format!("\t{},\n", line));
            }
            s.push_str(&format!(") PRIMARY KEY ({})", pk));
            if let Some(clause) = interleave {
                s.push_str(",\n");
                s.push_str(&clause);
            }
            s
        }
        TargetDialect::Postgres => {
            body.push(format!("PRIMARY KEY ({})", pk));
            let mut s = format!("CREATE TABLE {} (\n\t{}\n)", name, body.join(",\n\t"));
            if let Some(clause) = interleave {
                s.push(' ');
                s.push_str(&clause);
            }
            s
        }
    }
}

pub fn print_index(table: &TargetTable, index: &TargetIndex, dialect: TargetDialect) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name, dialect),
        quote_ident(&table.name, dialect),
        print_keys(table, &index.keys, dialect)
    )
}

/// `None` when the referenced table no longer exists
pub fn print_foreign_key(
    schema: &TargetSchema,
    table: &TargetTable,
    fk: &TargetForeignKey,
    dialect: TargetDialect,
) -> Option<String> {
    let refer = schema.get(fk.refer_table_id)?;
    let cols: Vec<String> = fk
        .column_ids
        .iter()
        .filter_map(|id| table.column(*id))
        .map(|c| quote_ident(&c.name, dialect))
        .collect();
    let refer_cols: Vec<String> = fk
        .refer_column_ids
        .iter()
        .filter_map(|id| refer.column(*id))
        .map(|c| quote_ident(&c.name, dialect))
        .collect();
    Some(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
        quote_ident(&table.name, dialect),
        quote_ident(&fk.name, dialect),
        cols.join(", "),
        quote_ident(&refer.name, dialect),
        refer_cols.join(", "),
        fk.on_delete.as_sql()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnId, FkAction, KeyColumns, TableId};
    use crate::target::{InterleaveParent, TargetType};

    fn col(id: u32, name: &str, ty: TargetType, not_null: bool) -> TargetColumn {
        TargetColumn {
            id: ColumnId(id),
            name: name.into(),
            ty,
            not_null,
            auto_gen: TargetAutoGen::None,
            default: None,
        }
    }

    fn key(id: u32, order: usize) -> IndexKey {
        IndexKey {
            column: ColumnId(id),
            desc: false,
            order,
        }
    }

    #[test]
    fn test_google_sql_interleaved_table() {
        let mut schema = TargetSchema::new();
        let mut parent = TargetTable::new(TableId(1), "parent", "parent");
        parent.push_column(col(2, "parent_id", TargetType::Int64, true));
        parent.primary_keys = KeyColumns::from_vec(vec![key(2, 0)]);
        schema.insert(parent);

        let mut child = TargetTable::new(TableId(3), "child", "child");
        child.push_column(col(4, "parent_id", TargetType::Int64, true));
        child.push_column(col(5, "child_id", TargetType::Int64, true));
        child.primary_keys = KeyColumns::from_vec(vec![key(4, 0), key(5, 1)]);
        child.parent = Some(InterleaveParent {
            table: TableId(1),
            on_delete: FkAction::Cascade,
        });
        schema.insert(child);

        let stmts = print_schema(&schema, TargetDialect::GoogleSql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TABLE parent"));
        assert_eq!(
            stmts[1],
            "CREATE TABLE child (\n\tparent_id INT64 NOT NULL,\n\tchild_id INT64 NOT NULL,\n) PRIMARY KEY (parent_id, child_id),\nINTERLEAVE IN PARENT parent ON DELETE CASCADE"
        );
    }

    #[test]
    fn test_postgres_table_inlines_primary_key() {
        let mut schema = TargetSchema::new();
        let mut t = TargetTable::new(TableId(1), "order", "order");
        t.push_column(col(2, "id", TargetType::Int64, true));
        t.primary_keys = KeyColumns::from_vec(vec![key(2, 0)]);
        schema.insert(t);

        let stmts = print_schema(&schema, TargetDialect::Postgres);
        assert_eq!(
            stmts[0],
            "CREATE TABLE \"order\" (\n\tid bigint NOT NULL,\n\tPRIMARY KEY (id)\n)"
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users", TargetDialect::GoogleSql), "users");
        assert_eq!(quote_ident("select", TargetDialect::GoogleSql), "`select`");
        assert_eq!(quote_ident("my col", TargetDialect::Postgres), "\"my col\"");
    }
}
