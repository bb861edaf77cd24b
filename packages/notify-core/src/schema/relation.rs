//! Links between tables and the set of tables reachable from a root.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::Schema;
use crate::types::{ColumnId, TableId};

/// Whether a link column holds one target or an ordered list of targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkShape {
    Single,
    List,
}

/// Outgoing link from a column of one table to another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Table holding the link column
    pub from_table: TableId,
    /// Link column
    pub from_column: ColumnId,
    /// Target table
    pub to_table: TableId,
    /// Single link or link list
    pub shape: LinkShape,
}

/// Tables reachable from a root table, with the link columns to follow in each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelatedTables {
    links: BTreeMap<TableId, Vec<Relation>>,
}

impl RelatedTables {
    /// Walks the schema breadth-first from `root`.
    pub fn find(schema: &Schema, root: TableId) -> Self {
        let mut links = BTreeMap::new();
        let mut pending = vec![root];
        while let Some(table) = pending.pop() {
            if links.contains_key(&table) {
                continue;
            }
            let relations: Vec<Relation> = match schema.table(table) {
                Ok(t) => t.relations().collect(),
                Err(_) => Vec::new(),
            };
            for relation in &relations {
                if !links.contains_key(&relation.to_table) {
                    pending.push(relation.to_table);
                }
            }
            links.insert(table, relations);
        }
        Self { links }
    }

    /// Returns the set of table ids.
    pub fn tables(&self) -> BTreeSet<TableId> {
        self.links.keys().copied().collect()
    }

    /// Returns the outgoing relations of `table`.
    pub fn outgoing(&self, table: TableId) -> &[Relation] {
        self.links.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns `true` if `table` is reachable.
    pub fn contains(&self, table: TableId) -> bool {
        self.links.contains_key(&table)
    }

    /// Merges another reachable set into this one.
    pub fn extend(&mut self, other: &RelatedTables) {
        for (table, relations) in &other.links {
            self.links
                .entry(*table)
                .or_insert_with(|| relations.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnKind, ColumnSchema, TableSchema};
    use ntest::timeout;

    #[timeout(1000)]
    #[test]
    fn test_related_tables_follows_links_and_cycles() {
        let schema = Schema::with_tables([
            TableSchema::new(
                TableId(0),
                "person",
                vec![
                    ColumnSchema::new(ColumnId(0), "name", ColumnKind::Text),
                    ColumnSchema::new(ColumnId(1), "dogs", ColumnKind::LinkList { target: TableId(1) }),
                ],
            ),
            TableSchema::new(
                TableId(1),
                "dog",
                vec![ColumnSchema::new(
                    ColumnId(0),
                    "owner",
                    ColumnKind::Link { target: TableId(0) },
                )],
            ),
            TableSchema::new(TableId(2), "unrelated", vec![]),
        ]);

        let related = schema.related_tables(TableId(1));
        assert_eq!(related.tables(), [TableId(0), TableId(1)].into_iter().collect());
        assert_eq!(related.outgoing(TableId(0)).len(), 1);
        assert_eq!(related.outgoing(TableId(0))[0].shape, LinkShape::List);
        assert!(!related.contains(TableId(2)));
        assert_eq!(schema.incoming(TableId(0)).len(), 1);
    }
}
