use std::collections::BTreeMap;

use crate::model::NodeId;

use super::StoreError;

/// Concrete handle for one node's timeslot table.
///
/// The name is derived from a validated [`NodeId`] when the registry is
/// built, so it is safe to splice into statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    node: NodeId,
    name: String,
}

impl Table {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            name: format!("timeslot_{node}"),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// DDL for the table and its two indexes.
    pub(super) fn schema(&self) -> String {
        let t = &self.name;
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                region      TEXT    NOT NULL CHECK (length(region) = 2),
                area        INTEGER NOT NULL CHECK (area >= 0),
                locality    INTEGER NOT NULL CHECK (locality >= 0),
                sublocality INTEGER NOT NULL CHECK (sublocality >= 0),
                housing_id  INTEGER NOT NULL,
                lot_id      INTEGER NOT NULL,
                start_at    INTEGER NOT NULL DEFAULT 0     CHECK (start_at BETWEEN 0 AND 65535),
                end_at      INTEGER NOT NULL DEFAULT 65535 CHECK (end_at BETWEEN 0 AND 65535)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS {t}_slot ON {t} (
                region, area, locality, sublocality, housing_id, lot_id, start_at
            );
            CREATE INDEX IF NOT EXISTS {t}_free_slot ON {t} (region, start_at, end_at);"
        )
    }
}

/// Allow-list of nodes resolved at configuration time. Requests naming a
/// node outside this list never reach SQL.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    tables: BTreeMap<NodeId, Table>,
}

impl NodeRegistry {
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let tables = nodes
            .into_iter()
            .map(|node| (node, Table::new(node)))
            .collect();
        Self { tables }
    }

    pub fn table(&self, node: NodeId) -> Result<&Table, StoreError> {
        self.tables.get(&node).ok_or(StoreError::UnknownNode(node))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
