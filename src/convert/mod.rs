//! Schema conversion from the frozen source schema to the target schema.
//!
//! One pass over the source tables in id order:
//! - Column types mapped through the dialect, with lossy mappings recorded
//!   as issues
//! - Keys, indexes and checks carried over by id
//! - A synthetic `STRING(50)` key added to tables without a primary key
//! - Auto-generated columns backed by bit-reversed sequences
//! - Foreign keys remapped (second loop, once every table exists)
//! - Interleave parents chosen from primary-key prefixes
//!
//! Target names are sanitized; see [`naming`]. Follow-up edits on the
//! result live in [`edit`].

pub mod edit;
pub mod interleave;
pub mod naming;

pub use interleave::assign_interleave_parents;
pub use naming::{sanitize_name, NameRegistry};

use crate::context::{ConversionContext, IssueKind};
use crate::dialect::{AutoGenStrategy, DumpDialect};
use crate::schema::{FkAction, IndexKey, SequenceId, SourceSchema, SourceTable, TableId};
use crate::target::{
    Sequence, SequenceKind, TargetAutoGen, TargetCheck, TargetColumn, TargetForeignKey,
    TargetIndex, TargetSchema, TargetTable, TargetType,
};
use ahash::AHashMap;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Length of the synthetic key column
pub const SYNTHETIC_KEY_LENGTH: i64 = 50;

/// Converts the source schema held by a context into its target schema.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaConverter;

/// Mutable state of one conversion run
struct Run<'a> {
    ctx: &'a mut ConversionContext,
    dialect: &'a dyn DumpDialect,
    target: TargetSchema,
    names: NameRegistry,
    /// Sequence ids by lowercase source sequence name
    sequences: AHashMap<String, SequenceId>,
}

impl SchemaConverter {
    pub fn new() -> Self {
        Self
    }

    /// Build the target schema and store it in the context.
    ///
    /// Replaces any target schema from an earlier run.
    pub fn convert(&self, ctx: &mut ConversionContext, dialect: &dyn DumpDialect) {
        let source = ctx.shared_source();
        let mut run = Run {
            ctx,
            dialect,
            target: TargetSchema::new(),
            names: NameRegistry::new(),
            sequences: AHashMap::new(),
        };

        for table in source.tables() {
            run.convert_table(table);
        }
        for table in source.tables() {
            run.convert_foreign_keys(&source, table);
        }

        let Run { ctx, mut target, .. } = run;
        assign_interleave_parents(&mut target, &mut ctx.issues);

        info!(
            "converted {} table(s), {} sequence(s), {} issue(s)",
            target.len(),
            target.sequences.len(),
            ctx.issues.len()
        );
        ctx.set_target(target);
    }
}

impl Run<'_> {
    fn convert_table(&mut self, source: &SourceTable) {
        let name = self.names.claim(&source.name);
        if name != source.name {
            self.ctx.issues.record_table(source.id, IssueKind::IllegalName);
        }
        let mut table = TargetTable::new(source.id, name, source.name.clone());
        let mut column_names = NameRegistry::new();

        for col in source.ordered_columns() {
            let mapping = self.dialect.map_type(&col.ty);
            for issue in &mapping.issues {
                self.ctx.issues.record_column(source.id, col.id, *issue);
            }
            let col_name = column_names.claim(&col.name);
            if col_name != col.name {
                self.ctx.issues.record_column(source.id, col.id, IssueKind::IllegalName);
            }

            let auto_gen = match self.dialect.auto_gen_strategy(&source.name, col) {
                AutoGenStrategy::None => TargetAutoGen::None,
                AutoGenStrategy::Sequence { name } if mapping.ty == TargetType::Int64 => {
                    let seq = self.sequence(&name, source.id, col.id);
                    self.ctx
                        .issues
                        .record_column(source.id, col.id, IssueKind::SequenceCreated);
                    TargetAutoGen::Sequence(seq)
                }
                AutoGenStrategy::Sequence { .. } => {
                    self.ctx
                        .issues
                        .record_column(source.id, col.id, IssueKind::AutoIncrementIgnored);
                    TargetAutoGen::None
                }
                AutoGenStrategy::PreDefined(func) => TargetAutoGen::PreDefined(func),
            };
            if col.ignored.default {
                self.ctx
                    .issues
                    .record_column(source.id, col.id, IssueKind::DefaultIgnored);
            }

            table.push_column(TargetColumn {
                id: col.id,
                name: col_name,
                ty: mapping.ty,
                not_null: col.not_null || source.is_primary_key(col.id),
                auto_gen,
                default: None,
            });
        }

        table.primary_keys = source.primary_keys.clone();
        if table.primary_keys.is_empty() {
            let id = self.ctx.ids.next();
            let key_name = column_names.claim(&self.ctx.options.synthetic_key);
            table.push_column(TargetColumn {
                id,
                name: key_name,
                ty: TargetType::string(Some(SYNTHETIC_KEY_LENGTH)),
                not_null: true,
                auto_gen: TargetAutoGen::None,
                default: None,
            });
            table.primary_keys.push(IndexKey {
                column: id,
                desc: false,
                order: 0,
            });
            table.synthetic_key = Some(id);
            self.ctx
                .issues
                .record_table(source.id, IssueKind::SyntheticPrimaryKey);
            debug!("added synthetic key {} to {}", id, table.name);
        }

        for index in &source.indexes {
            table.indexes.push(TargetIndex {
                id: index.id,
                name: self.names.claim(&index.name),
                unique: index.unique,
                keys: index.keys.clone(),
            });
        }
        for check in &source.checks {
            table.checks.push(TargetCheck {
                id: check.id,
                name: self.names.claim(&check.name),
                expr: check.expr.clone(),
            });
        }

        self.target.insert(table);
    }

    /// Sequence for a source sequence name, created on first use
    fn sequence(&mut self, name: &str, table: TableId, column: crate::schema::ColumnId) -> SequenceId {
        let key = name.to_lowercase();
        let id = match self.sequences.get(&key) {
            Some(id) => *id,
            None => {
                let id: SequenceId = self.ctx.ids.next();
                let seq = Sequence {
                    id,
                    name: self.names.claim(name),
                    kind: SequenceKind::BitReversedPositive,
                    columns_using: BTreeMap::new(),
                };
                self.target.sequences.insert(id, seq);
                self.sequences.insert(key, id);
                id
            }
        };
        if let Some(seq) = self.target.sequences.get_mut(&id) {
            seq.columns_using.entry(table).or_default().push(column);
        }
        id
    }

    fn convert_foreign_keys(&mut self, schema: &SourceSchema, source: &SourceTable) {
        let mut converted = Vec::new();
        for fk in &source.foreign_keys {
            let Some(refer_table) = fk.refer_table_id.filter(|id| schema.get(*id).is_some()) else {
                self.ctx
                    .issues
                    .record_table(source.id, IssueKind::ForeignKeyUnresolved);
                continue;
            };
            if fk.refer_column_ids.len() != fk.column_ids.len() || fk.column_ids.is_empty() {
                self.ctx
                    .issues
                    .record_table(source.id, IssueKind::ForeignKeyUnresolved);
                continue;
            }

            let mut action = |a: FkAction| match a {
                FkAction::Cascade | FkAction::NoAction => a,
                _ => {
                    self.ctx
                        .issues
                        .record_table(source.id, IssueKind::ForeignKeyActionUnsupported);
                    FkAction::NoAction
                }
            };
            let on_delete = action(fk.on_delete);
            let on_update = action(fk.on_update);

            let refer_name = schema
                .get(refer_table)
                .map(|t| t.name.as_str())
                .unwrap_or_default();
            let name = if fk.name.is_empty() {
                format!("fk_{}_{}", source.name, refer_name)
            } else {
                fk.name.clone()
            };

            converted.push(TargetForeignKey {
                id: fk.id,
                name: self.names.claim(&name),
                column_ids: fk.column_ids.clone(),
                refer_table_id: refer_table,
                refer_column_ids: fk.refer_column_ids.clone(),
                on_delete,
                on_update,
            });
        }
        if let Some(table) = self.target.get_mut(source.id) {
            table.foreign_keys = converted;
        }
    }
}
