//! Creation-order graph for target tables.
//!
//! An interleaved child can only be created after its parent, so DDL is
//! emitted in topological order over interleave edges. Foreign keys are
//! emitted separately, after every table exists, and do not constrain order.

use super::TargetSchema;
use crate::schema::TableId;
use std::collections::{BTreeMap, VecDeque};

/// Parent → child interleave graph over a target schema
#[derive(Debug)]
pub struct TargetGraph {
    /// For each table, its interleave parent (if any)
    pub parents: BTreeMap<TableId, Option<TableId>>,
    /// For each table, the tables interleaved in it
    pub children: BTreeMap<TableId, Vec<TableId>>,
}

/// Result of topological sort
#[derive(Debug)]
pub struct TopoSortResult {
    /// Tables in creation order (parents before children)
    pub order: Vec<TableId>,
    /// Tables whose parent chain loops or points at a missing table
    pub cyclic_tables: Vec<TableId>,
}

impl TargetGraph {
    pub fn from_schema(schema: &TargetSchema) -> Self {
        let mut parents = BTreeMap::new();
        let mut children: BTreeMap<TableId, Vec<TableId>> = BTreeMap::new();

        for table in schema.tables() {
            children.entry(table.id).or_default();
            let parent = table.parent.map(|p| p.table).filter(|p| *p != table.id);
            parents.insert(table.id, parent);
            if let Some(parent_id) = parent {
                children.entry(parent_id).or_default().push(table.id);
            }
        }

        Self { parents, children }
    }

    /// Kahn's algorithm over interleave edges; ties resolve by table id.
    pub fn topo_sort(&self) -> TopoSortResult {
        let mut in_degree: BTreeMap<TableId, usize> = self
            .parents
            .iter()
            .map(|(id, parent)| {
                let deg = usize::from(parent.is_some_and(|p| self.parents.contains_key(&p)));
                (*id, deg)
            })
            .collect();

        let mut queue: VecDeque<TableId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(kids) = self.children.get(&id) {
                for child in kids {
                    if let Some(deg) = in_degree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(*child);
                        }
                    }
                }
            }
        }

        let cyclic_tables = in_degree
            .iter()
            .filter(|(_, &deg)| deg > 0)
            .map(|(id, _)| *id)
            .collect();

        TopoSortResult {
            order,
            cyclic_tables,
        }
    }

    /// True if `ancestor` is on `table`'s interleave parent chain
    pub fn is_ancestor(&self, ancestor: TableId, table: TableId) -> bool {
        let mut current = table;
        let mut steps = 0;
        while let Some(Some(parent)) = self.parents.get(&current) {
            if *parent == ancestor {
                return true;
            }
            current = *parent;
            steps += 1;
            if steps > self.parents.len() {
                break;
            }
        }
        false
    }

    /// Interleave depth (0 for root tables)
    pub fn depth(&self, table: TableId) -> usize {
        let mut depth = 0;
        let mut current = table;
        while let Some(Some(parent)) = self.parents.get(&current) {
            depth += 1;
            current = *parent;
            if depth > self.parents.len() {
                break;
            }
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FkAction;
    use crate::target::{InterleaveParent, TargetTable};

    fn schema_with(parents: &[(u32, Option<u32>)]) -> TargetSchema {
        let mut schema = TargetSchema::new();
        for (id, parent) in parents {
            let mut t = TargetTable::new(TableId(*id), format!("t{}", id), format!("t{}", id));
            t.parent = parent.map(|p| InterleaveParent {
                table: TableId(p),
                on_delete: FkAction::NoAction,
            });
            schema.insert(t);
        }
        schema
    }

    #[test]
    fn test_parents_before_children() {
        // 1 <- 5 <- 3, 2 standalone
        let schema = schema_with(&[(3, Some(5)), (5, Some(1)), (1, None), (2, None)]);
        let graph = TargetGraph::from_schema(&schema);
        let result = graph.topo_sort();

        let pos = |id: u32| result.order.iter().position(|t| *t == TableId(id)).unwrap();
        assert!(pos(1) < pos(5));
        assert!(pos(5) < pos(3));
        assert!(result.cyclic_tables.is_empty());
        assert!(graph.is_ancestor(TableId(1), TableId(3)));
        assert_eq!(graph.depth(TableId(3)), 2);
    }

    #[test]
    fn test_cycle_is_reported() {
        let schema = schema_with(&[(1, Some(2)), (2, Some(1)), (3, None)]);
        let result = TargetGraph::from_schema(&schema).topo_sort();
        assert_eq!(result.order, vec![TableId(3)]);
        assert_eq!(result.cyclic_tables.len(), 2);
    }
}
