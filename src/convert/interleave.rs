//! Interleaving: co-locating child rows with their parent row.
//!
//! A table can be interleaved in a parent whose primary key is a strict
//! prefix of its own, column for column by name and target type. Tables
//! with a synthesized key never take part.

use crate::context::{IssueKind, IssueRegistry};
use crate::schema::{FkAction, TableId};
use crate::target::{InterleaveParent, TargetSchema, TargetTable};
use std::cmp::Reverse;
use tracing::debug;

/// Ranking of one parent candidate; larger is better
type Rank = (bool, usize, Reverse<TableId>);

/// True if `parent`'s primary key is a strict prefix of `child`'s
pub fn is_key_prefix(parent: &TargetTable, child: &TargetTable) -> bool {
    if parent.id == child.id || parent.synthetic_key.is_some() || child.synthetic_key.is_some() {
        return false;
    }
    let parent_key = parent.primary_key_columns();
    let child_key = child.primary_key_columns();
    if parent_key.is_empty() || parent_key.len() >= child_key.len() {
        return false;
    }
    parent_key
        .iter()
        .zip(&child_key)
        .all(|(p, c)| p.name.eq_ignore_ascii_case(&c.name) && p.ty == c.ty)
}

/// Best interleave parent for a table, if any
pub fn choose_parent(schema: &TargetSchema, child: &TargetTable) -> Option<InterleaveParent> {
    let mut best: Option<(Rank, InterleaveParent)> = None;
    for parent in schema.tables() {
        if !is_key_prefix(parent, child) {
            continue;
        }
        let backing = child
            .foreign_keys
            .iter()
            .find(|fk| fk.refer_table_id == parent.id);
        let rank = (
            backing.is_some(),
            parent.primary_keys.len(),
            Reverse(parent.id),
        );
        let on_delete = match backing {
            Some(fk) if fk.on_delete == FkAction::Cascade => FkAction::Cascade,
            _ => FkAction::NoAction,
        };
        if best.as_ref().map_or(true, |(r, _)| rank > *r) {
            best = Some((
                rank,
                InterleaveParent {
                    table: parent.id,
                    on_delete,
                },
            ));
        }
    }
    best.map(|(_, parent)| parent)
}

/// Assign an interleave parent to every table that has one.
///
/// Parent keys are strictly shorter than child keys, so the result is
/// always acyclic.
pub fn assign_interleave_parents(schema: &mut TargetSchema, issues: &mut IssueRegistry) {
    let assignments: Vec<(TableId, InterleaveParent)> = schema
        .tables()
        .filter_map(|child| choose_parent(schema, child).map(|p| (child.id, p)))
        .collect();

    for (child, parent) in assignments {
        if let Some(table) = schema.get_mut(child) {
            debug!("interleaving {} in {}", table.name, parent.table);
            table.parent = Some(parent);
            issues.record_table(child, IssueKind::Interleaved);
        }
    }
}
