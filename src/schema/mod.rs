//! Source schema model.
//!
//! This module provides:
//! - Stable ids for every schema entity, allocated once and never renumbered
//! - The source-side table/column/key model built from the dump's DDL
//! - The DDL statement builder ([`SchemaBuilder`]) and type sub-parser
//!
//! Tables live in an id-keyed arena; foreign keys and other cross-table
//! edges hold ids, never references, so definitions can be reordered or
//! rewritten without invalidating each other.

mod ddl;
pub mod types;

pub use ddl::*;
pub use types::parse_type_text;

use crate::convert::edit::{mentions_identifier, rename_identifier};
use ahash::AHashMap;
use serde::{Serialize, Serializer};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl From<u32> for $name {
            fn from(n: u32) -> Self {
                $name(n)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }
    };
}

define_id!(
    /// Stable identifier of a table, shared by its source and target definitions
    TableId, "t"
);
define_id!(
    /// Stable identifier of a column, shared by its source and target definitions
    ColumnId, "c"
);
define_id!(IndexId, "i");
define_id!(ForeignKeyId, "f");
define_id!(CheckId, "ck");
define_id!(SequenceId, "s");
define_id!(ExprId, "e");

/// Hands out ids from a single monotonically increasing counter.
///
/// All id kinds share the counter, so an id is unique across kinds too.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next<T: From<u32>>(&mut self) -> T {
        self.next += 1;
        T::from(self.next)
    }
}

/// Declared column type, split into a base name and modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceType {
    /// Lowercase base type name, e.g. `varchar`, `double precision`
    pub name: String,
    /// Length/precision/scale, e.g. `[10, 2]` for `decimal(10,2)`
    pub mods: Vec<i64>,
    /// One entry per array dimension (`-1` when unbounded)
    pub array_bounds: Vec<i64>,
    pub unsigned: bool,
}

impl SourceType {
    pub fn is_array(&self) -> bool {
        !self.array_bounds.is_empty()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.mods.is_empty() {
            let mods: Vec<String> = self.mods.iter().map(|m| m.to_string()).collect();
            write!(f, "({})", mods.join(","))?;
        }
        if self.unsigned {
            write!(f, " unsigned")?;
        }
        if self.name != "set" {
            for _ in &self.array_bounds {
                write!(f, "[]")?;
            }
        }
        Ok(())
    }
}

/// Source features that were present but have no direct target equivalent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IgnoredFeatures {
    pub default: bool,
    pub check: bool,
    pub foreign_key: bool,
    pub auto_increment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultValue {
    pub id: ExprId,
    pub expr: String,
}

/// How the source database generates values for a column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceAutoGen {
    #[default]
    None,
    /// MySQL `AUTO_INCREMENT`
    AutoIncrement,
    /// `GENERATED ... AS IDENTITY`
    Identity,
    /// Default drawn from a named sequence (`nextval('seq')`, `serial`)
    Sequence(String),
    /// Default drawn from a UUID function
    Uuid,
}

#[derive(Debug, Clone)]
pub struct SourceColumn {
    pub id: ColumnId,
    pub name: String,
    pub ty: SourceType,
    pub not_null: bool,
    pub ignored: IgnoredFeatures,
    pub default: Option<DefaultValue>,
    pub auto_gen: SourceAutoGen,
}

impl SourceColumn {
    pub fn new(id: ColumnId, name: impl Into<String>, ty: SourceType) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            not_null: false,
            ignored: IgnoredFeatures::default(),
            default: None,
            auto_gen: SourceAutoGen::None,
        }
    }
}

/// One column of a primary key or index, in key order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexKey {
    pub column: ColumnId,
    pub desc: bool,
    pub order: usize,
}

/// Key column list; most keys have one or two columns.
pub type KeyColumns = SmallVec<[IndexKey; 2]>;

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FkAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl FkAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FkAction::NoAction => "NO ACTION",
            FkAction::Restrict => "RESTRICT",
            FkAction::Cascade => "CASCADE",
            FkAction::SetNull => "SET NULL",
            FkAction::SetDefault => "SET DEFAULT",
        }
    }
}

impl fmt::Display for FkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl std::str::FromStr for FkAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_uppercase().as_str() {
            "NO ACTION" => Ok(FkAction::NoAction),
            "RESTRICT" => Ok(FkAction::Restrict),
            "CASCADE" => Ok(FkAction::Cascade),
            "SET NULL" => Ok(FkAction::SetNull),
            "SET DEFAULT" => Ok(FkAction::SetDefault),
            _ => Err(format!("Unknown referential action: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub id: ForeignKeyId,
    /// Constraint name; empty for anonymous column-level references
    pub name: String,
    pub column_ids: Vec<ColumnId>,
    pub refer_table_name: String,
    pub refer_column_names: Vec<String>,
    /// Filled by [`SourceSchema::resolve_foreign_keys`]
    pub refer_table_id: Option<TableId>,
    pub refer_column_ids: Vec<ColumnId>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

#[derive(Debug, Clone)]
pub struct Index {
    pub id: IndexId,
    pub name: String,
    pub unique: bool,
    pub keys: Vec<IndexKey>,
}

#[derive(Debug, Clone)]
pub struct CheckConstraint {
    pub id: CheckId,
    pub name: String,
    /// Expression text, always wrapped in parentheses
    pub expr: String,
    pub expr_id: ExprId,
}

#[derive(Debug, Clone)]
pub struct SourceTable {
    pub id: TableId,
    pub name: String,
    /// Schema qualifier (e.g. `public`), if the dump used one
    pub namespace: Option<String>,
    /// Columns in declaration order
    pub column_ids: Vec<ColumnId>,
    pub columns: AHashMap<ColumnId, SourceColumn>,
    pub primary_keys: KeyColumns,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
    pub checks: Vec<CheckConstraint>,
}

impl SourceTable {
    pub fn new(id: TableId, name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            namespace,
            column_ids: Vec::new(),
            columns: AHashMap::new(),
            primary_keys: KeyColumns::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn column(&self, id: ColumnId) -> Option<&SourceColumn> {
        self.columns.get(&id)
    }

    pub fn column_mut(&mut self, id: ColumnId) -> Option<&mut SourceColumn> {
        self.columns.get_mut(&id)
    }

    /// Case-insensitive column lookup by name
    pub fn column_id(&self, name: &str) -> Option<ColumnId> {
        self.column_ids
            .iter()
            .copied()
            .find(|id| {
                self.columns
                    .get(id)
                    .is_some_and(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    /// Columns in declaration order
    pub fn ordered_columns(&self) -> impl Iterator<Item = &SourceColumn> {
        self.column_ids.iter().filter_map(|id| self.columns.get(id))
    }

    pub fn push_column(&mut self, column: SourceColumn) {
        if !self.column_ids.contains(&column.id) {
            self.column_ids.push(column.id);
        }
        self.columns.insert(column.id, column);
    }

    pub fn remove_column(&mut self, id: ColumnId) -> Option<SourceColumn> {
        self.column_ids.retain(|c| *c != id);
        self.primary_keys.retain(|k| k.column != id);
        for index in &mut self.indexes {
            index.keys.retain(|k| k.column != id);
        }
        self.indexes.retain(|i| !i.keys.is_empty());
        for fk in &mut self.foreign_keys {
            if let Some(pos) = fk.column_ids.iter().position(|c| *c == id) {
                fk.column_ids.remove(pos);
                if pos < fk.refer_column_names.len() {
                    fk.refer_column_names.remove(pos);
                }
            }
        }
        self.foreign_keys.retain(|fk| !fk.column_ids.is_empty());
        let removed = self.columns.remove(&id);
        if let Some(column) = &removed {
            self.checks
                .retain(|ck| !mentions_identifier(&ck.expr, &column.name));
        }
        removed
    }

    /// Rename a column, rewriting check expressions that use the old name
    pub fn rename_column(&mut self, id: ColumnId, new_name: &str) {
        let Some(column) = self.columns.get_mut(&id) else {
            return;
        };
        let old_name = std::mem::replace(&mut column.name, new_name.to_string());
        if old_name == new_name {
            return;
        }
        for check in &mut self.checks {
            check.expr = rename_identifier(&check.expr, &old_name, new_name);
        }
    }

    pub fn is_primary_key(&self, id: ColumnId) -> bool {
        self.primary_keys.iter().any(|k| k.column == id)
    }

    /// Qualified name as written in the dump
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

/// Id-keyed arena of source tables with a case-insensitive name index.
#[derive(Debug, Clone, Default)]
pub struct SourceSchema {
    tables: BTreeMap<TableId, SourceTable>,
    names: AHashMap<String, TableId>,
}

impl SourceSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a table, keyed by its id
    pub fn insert(&mut self, table: SourceTable) {
        self.names.insert(table.name.to_lowercase(), table.id);
        self.tables.insert(table.id, table);
    }

    pub fn get(&self, id: TableId) -> Option<&SourceTable> {
        self.tables.get(&id)
    }

    pub fn get_mut(&mut self, id: TableId) -> Option<&mut SourceTable> {
        self.tables.get_mut(&id)
    }

    /// Look up a table by name; qualified names match on their last part.
    pub fn table_id(&self, name: &str) -> Option<TableId> {
        let unqualified = name.rsplit('.').next().unwrap_or(name);
        self.names.get(&unqualified.to_lowercase()).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&SourceTable> {
        self.table_id(name).and_then(|id| self.tables.get(&id))
    }

    /// Tables in id (creation) order
    pub fn tables(&self) -> impl Iterator<Item = &SourceTable> {
        self.tables.values()
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

    /// Resolve foreign key references to table and column ids.
    ///
    /// Returns a message for every reference that could not be resolved; the
    /// affected keys keep `refer_table_id == None`.
    pub fn resolve_foreign_keys(&mut self) -> Vec<String> {
        let mut unresolved = Vec::new();
        let this = &*self;
        let lookups: Vec<(TableId, usize, Option<TableId>, Vec<Option<ColumnId>>)> = this
            .tables
            .values()
            .flat_map(|table| {
                table.foreign_keys.iter().enumerate().map(move |(i, fk)| {
                    let target = this.by_name(&fk.refer_table_name);
                    let cols = fk
                        .refer_column_names
                        .iter()
                        .map(|c| target.and_then(|t| t.column_id(c)))
                        .collect();
                    (table.id, i, target.map(|t| t.id), cols)
                })
            })
            .collect();

        for (table_id, idx, target, cols) in lookups {
            let Some(table) = self.tables.get_mut(&table_id) else {
                continue;
            };
            let table_name = table.name.clone();
            let fk = &mut table.foreign_keys[idx];
            match target {
                Some(target_id) if cols.iter().all(Option::is_some) => {
                    fk.refer_table_id = Some(target_id);
                    fk.refer_column_ids = cols.into_iter().flatten().collect();
                }
                Some(_) => unresolved.push(format!(
                    "foreign key on {} references unknown column(s) of {}",
                    table_name, fk.refer_table_name
                )),
                None => unresolved.push(format!(
                    "foreign key on {} references unknown table {}",
                    table_name, fk.refer_table_name
                )),
            }
        }
        unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(ids: &mut IdAllocator, name: &str, cols: &[&str]) -> SourceTable {
        let mut t = SourceTable::new(ids.next(), name, None);
        for c in cols {
            t.push_column(SourceColumn::new(ids.next(), *c, SourceType::default()));
        }
        t
    }

    #[test]
    fn test_ids_are_unique_across_kinds() {
        let mut ids = IdAllocator::new();
        let t: TableId = ids.next();
        let c: ColumnId = ids.next();
        assert_ne!(t.0, c.0);
        assert_eq!(t.to_string(), "t1");
        assert_eq!(c.to_string(), "c2");
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_unqualified() {
        let mut ids = IdAllocator::new();
        let mut schema = SourceSchema::new();
        schema.insert(table(&mut ids, "Users", &["ID"]));

        let t = schema.by_name("public.users").unwrap();
        assert!(t.column_id("id").is_some());
    }

    #[test]
    fn test_resolve_foreign_keys() {
        let mut ids = IdAllocator::new();
        let mut schema = SourceSchema::new();
        let users = table(&mut ids, "users", &["id"]);
        let mut orders = table(&mut ids, "orders", &["id", "user_id"]);
        let user_col = orders.column_id("user_id").unwrap();
        orders.foreign_keys.push(ForeignKey {
            id: ids.next(),
            name: "fk_user".into(),
            column_ids: vec![user_col],
            refer_table_name: "users".into(),
            refer_column_names: vec!["id".into()],
            refer_table_id: None,
            refer_column_ids: Vec::new(),
            on_delete: FkAction::Cascade,
            on_update: FkAction::NoAction,
        });
        orders.foreign_keys.push(ForeignKey {
            id: ids.next(),
            name: "fk_missing".into(),
            column_ids: vec![user_col],
            refer_table_name: "nope".into(),
            refer_column_names: vec!["id".into()],
            refer_table_id: None,
            refer_column_ids: Vec::new(),
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        });
        let users_id = users.id;
        let orders_id = orders.id;
        schema.insert(orders);
        schema.insert(users);

        let unresolved = schema.resolve_foreign_keys();
        assert_eq!(unresolved.len(), 1);

        let orders = schema.get(orders_id).unwrap();
        assert_eq!(orders.foreign_keys[0].refer_table_id, Some(users_id));
        assert_eq!(orders.foreign_keys[0].refer_column_ids.len(), 1);
        assert_eq!(orders.foreign_keys[1].refer_table_id, None);
    }

    #[test]
    fn test_fk_action_from_str() {
        assert_eq!("set  null".parse::<FkAction>(), Ok(FkAction::SetNull));
        assert!("explode".parse::<FkAction>().is_err());
    }
}
