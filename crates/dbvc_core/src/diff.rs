//! Structural diff between two database snapshots.
//!
//! Output is fully ordered (tables, then keys, then columns by name) so
//! that `diff_snapshots(b, a)` is the exact mirror of `diff_snapshots(a, b)`.

use crate::snapshot::{
    key_usable, row_hash_key, row_key, ColumnDefinition, DatabaseSnapshot, IndexDefinition, Row,
    TableDefinition,
};
use crate::types::{
    Change, ChangeOperation, ColumnChange, ColumnChangeKind, Constraint, ConstraintChange,
    DataChange, IndexChange, SchemaChange, ViewChange,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Counts over a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// CREATE and INSERT changes.
    pub insertions: usize,
    /// DROP and DELETE changes.
    pub deletions: usize,
    /// ALTER and UPDATE changes.
    pub modifications: usize,
    /// Distinct tables touched by schema, constraint or data changes.
    pub tables_changed: usize,
}

/// Difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Table creations, drops and alterations.
    pub schema_changes: Vec<SchemaChange>,
    /// Row insertions, updates and deletions.
    pub data_changes: Vec<DataChange>,
    /// View changes.
    pub view_changes: Vec<ViewChange>,
    /// Index changes.
    pub index_changes: Vec<IndexChange>,
    /// Primary and foreign key changes on tables present on both sides.
    pub constraint_changes: Vec<ConstraintChange>,
    /// Aggregate counts.
    pub summary: DiffSummary,
}

impl Diff {
    /// True if the snapshots are equivalent.
    pub fn is_empty(&self) -> bool {
        self.total_changes() == 0
    }

    /// Number of change records.
    pub fn total_changes(&self) -> usize {
        self.schema_changes.len()
            + self.data_changes.len()
            + self.view_changes.len()
            + self.index_changes.len()
            + self.constraint_changes.len()
    }

    /// Flattens the diff into commit change records: schema, constraints,
    /// views, indexes, then data.
    pub fn to_changes(&self) -> Vec<Change> {
        let mut changes = Vec::with_capacity(self.total_changes());
        changes.extend(self.schema_changes.iter().cloned().map(Change::Schema));
        changes.extend(self.constraint_changes.iter().cloned().map(Change::Constraint));
        changes.extend(self.view_changes.iter().cloned().map(Change::View));
        changes.extend(self.index_changes.iter().cloned().map(Change::Index));
        changes.extend(self.data_changes.iter().cloned().map(Change::Data));
        changes
    }

    fn summarize(&mut self) {
        let ops = self
            .schema_changes
            .iter()
            .map(|c| c.operation)
            .chain(self.data_changes.iter().map(|c| c.operation))
            .chain(self.view_changes.iter().map(|c| c.operation))
            .chain(self.index_changes.iter().map(|c| c.operation))
            .chain(self.constraint_changes.iter().map(|c| c.operation));

        let mut summary = DiffSummary::default();
        for op in ops {
            match op {
                ChangeOperation::Create | ChangeOperation::Insert => summary.insertions += 1,
                ChangeOperation::Drop | ChangeOperation::Delete => summary.deletions += 1,
                ChangeOperation::Alter | ChangeOperation::Update => summary.modifications += 1,
            }
        }

        let tables: BTreeSet<&str> = self
            .schema_changes
            .iter()
            .map(|c| c.table.as_str())
            .chain(self.data_changes.iter().map(|c| c.table.as_str()))
            .chain(self.constraint_changes.iter().map(|c| c.table.as_str()))
            .collect();
        summary.tables_changed = tables.len();

        self.summary = summary;
    }
}

/// Compares two snapshots.
///
/// ```
/// use dbvc_core::{diff_snapshots, row, ColumnDefinition, DatabaseSnapshot, TableDefinition, Value};
///
/// let table = TableDefinition::new(vec![ColumnDefinition::new("id", "integer")], &["id"]);
/// let before = DatabaseSnapshot::empty().with_table("t", table.clone());
/// let after = before.clone().with_row("t", row([("id", Value::from(1))]));
///
/// let diff = diff_snapshots(&before, &after);
/// assert_eq!(diff.summary.insertions, 1);
/// assert_eq!(diff.data_changes[0].key, "id=1");
/// ```
pub fn diff_snapshots(from: &DatabaseSnapshot, to: &DatabaseSnapshot) -> Diff {
    let mut diff = Diff {
        schema_changes: diff_tables(from, to),
        constraint_changes: diff_constraints(from, to),
        view_changes: diff_views(from, to),
        index_changes: diff_indexes(from, to),
        data_changes: diff_data(from, to),
        summary: DiffSummary::default(),
    };
    diff.summarize();
    diff
}

fn diff_tables(from: &DatabaseSnapshot, to: &DatabaseSnapshot) -> Vec<SchemaChange> {
    let names: BTreeSet<&String> = from
        .schema
        .tables
        .keys()
        .chain(to.schema.tables.keys())
        .collect();

    let mut changes = Vec::new();
    for name in names {
        match (from.schema.tables.get(name), to.schema.tables.get(name)) {
            (None, Some(new)) => changes.push(SchemaChange {
                operation: ChangeOperation::Create,
                table: name.clone(),
                description: format!("Create table {}", name),
                column_changes: Vec::new(),
                old_definition: None,
                new_definition: Some(new.clone()),
            }),
            (Some(old), None) => changes.push(SchemaChange {
                operation: ChangeOperation::Drop,
                table: name.clone(),
                description: format!("Drop table {}", name),
                column_changes: Vec::new(),
                old_definition: Some(old.clone()),
                new_definition: None,
            }),
            (Some(old), Some(new)) => {
                let column_changes = diff_columns(old, new);
                if !column_changes.is_empty() {
                    let parts: Vec<String> = column_changes
                        .iter()
                        .map(|cc| {
                            let verb = match cc.kind {
                                ColumnChangeKind::Add => "add",
                                ColumnChangeKind::Drop => "drop",
                                ColumnChangeKind::Modify => "modify",
                            };
                            format!("{} {}", verb, cc.column)
                        })
                        .collect();
                    changes.push(SchemaChange {
                        operation: ChangeOperation::Alter,
                        table: name.clone(),
                        description: format!("Alter table {}: {}", name, parts.join(", ")),
                        column_changes,
                        old_definition: Some(old.clone()),
                        new_definition: Some(new.clone()),
                    });
                }
            }
            (None, None) => {}
        }
    }
    changes
}

/// Column differences, ordered by column name. Column order alone is not
/// a difference.
pub(crate) fn diff_columns(old: &TableDefinition, new: &TableDefinition) -> Vec<ColumnChange> {
    let old_cols: BTreeMap<&str, &ColumnDefinition> =
        old.columns.iter().map(|c| (c.name.as_str(), c)).collect();
    let new_cols: BTreeMap<&str, &ColumnDefinition> =
        new.columns.iter().map(|c| (c.name.as_str(), c)).collect();
    let names: BTreeSet<&str> = old_cols.keys().chain(new_cols.keys()).copied().collect();

    names
        .into_iter()
        .filter_map(|name| {
            let (kind, old, new) = match (old_cols.get(name), new_cols.get(name)) {
                (None, Some(n)) => (ColumnChangeKind::Add, None, Some(*n)),
                (Some(o), None) => (ColumnChangeKind::Drop, Some(*o), None),
                (Some(o), Some(n)) if o != n => (ColumnChangeKind::Modify, Some(*o), Some(*n)),
                _ => return None,
            };
            Some(ColumnChange {
                kind,
                column: name.to_string(),
                old: old.cloned(),
                new: new.cloned(),
            })
        })
        .collect()
}

fn diff_constraints(from: &DatabaseSnapshot, to: &DatabaseSnapshot) -> Vec<ConstraintChange> {
    let mut changes = Vec::new();

    for (name, old) in &from.schema.tables {
        let Some(new) = to.schema.tables.get(name) else {
            continue;
        };

        if old.primary_key != new.primary_key {
            let (operation, verb) = match (old.primary_key.is_empty(), new.primary_key.is_empty()) {
                (true, false) => (ChangeOperation::Create, "Add"),
                (false, true) => (ChangeOperation::Drop, "Drop"),
                _ => (ChangeOperation::Alter, "Change"),
            };
            let non_empty = |pk: &Vec<String>| {
                (!pk.is_empty()).then(|| Constraint::PrimaryKey(pk.clone()))
            };
            changes.push(ConstraintChange {
                operation,
                table: name.clone(),
                description: format!("{} primary key on {}", verb, name),
                old_constraint: non_empty(&old.primary_key),
                new_constraint: non_empty(&new.primary_key),
            });
        }

        let old_fks: BTreeSet<_> = old.foreign_keys.iter().collect();
        let new_fks: BTreeSet<_> = new.foreign_keys.iter().collect();
        let all: BTreeSet<_> = old_fks.union(&new_fks).copied().collect();
        for fk in all {
            match (old_fks.contains(fk), new_fks.contains(fk)) {
                (false, true) => changes.push(ConstraintChange {
                    operation: ChangeOperation::Create,
                    table: name.clone(),
                    description: format!("Add {} on {}", fk, name),
                    old_constraint: None,
                    new_constraint: Some(Constraint::ForeignKey(fk.clone())),
                }),
                (true, false) => changes.push(ConstraintChange {
                    operation: ChangeOperation::Drop,
                    table: name.clone(),
                    description: format!("Drop {} on {}", fk, name),
                    old_constraint: Some(Constraint::ForeignKey(fk.clone())),
                    new_constraint: None,
                }),
                _ => {}
            }
        }
    }

    changes
}

fn diff_views(from: &DatabaseSnapshot, to: &DatabaseSnapshot) -> Vec<ViewChange> {
    let names: BTreeSet<&String> = from
        .schema
        .views
        .keys()
        .chain(to.schema.views.keys())
        .collect();

    names
        .into_iter()
        .filter_map(|name| {
            let old = from.schema.views.get(name).map(|v| v.definition.clone());
            let new = to.schema.views.get(name).map(|v| v.definition.clone());
            let (operation, verb) = match (&old, &new) {
                (None, Some(_)) => (ChangeOperation::Create, "Create"),
                (Some(_), None) => (ChangeOperation::Drop, "Drop"),
                (Some(o), Some(n)) if o != n => (ChangeOperation::Alter, "Alter"),
                _ => return None,
            };
            Some(ViewChange {
                operation,
                name: name.clone(),
                description: format!("{} view {}", verb, name),
                old_definition: old,
                new_definition: new,
            })
        })
        .collect()
}

fn diff_indexes(from: &DatabaseSnapshot, to: &DatabaseSnapshot) -> Vec<IndexChange> {
    let names: BTreeSet<&String> = from
        .schema
        .indexes
        .keys()
        .chain(to.schema.indexes.keys())
        .collect();

    names
        .into_iter()
        .filter_map(|name| {
            let old: Option<IndexDefinition> = from.schema.indexes.get(name).cloned();
            let new: Option<IndexDefinition> = to.schema.indexes.get(name).cloned();
            let (operation, verb) = match (&old, &new) {
                (None, Some(_)) => (ChangeOperation::Create, "Create"),
                (Some(_), None) => (ChangeOperation::Drop, "Drop"),
                (Some(o), Some(n)) if o != n => (ChangeOperation::Alter, "Alter"),
                _ => return None,
            };
            Some(IndexChange {
                operation,
                name: name.clone(),
                description: format!("{} index {}", verb, name),
                old_definition: old,
                new_definition: new,
            })
        })
        .collect()
}

/// Primary key both sides agree on for `table`, or empty.
///
/// A table present on only one side uses that side's key.
pub(crate) fn shared_primary_key(
    table: &str,
    sides: &[&DatabaseSnapshot],
) -> Vec<String> {
    let present: Vec<&DatabaseSnapshot> = sides
        .iter()
        .copied()
        .filter(|s| s.schema.tables.contains_key(table) || s.data.contains_key(table))
        .collect();

    let Some(first) = present.first() else {
        return Vec::new();
    };
    let pk = first.primary_key(table);
    if present.iter().all(|s| s.primary_key(table) == pk)
        && present.iter().all(|s| key_usable(pk, s.rows(table)))
    {
        pk.to_vec()
    } else {
        Vec::new()
    }
}

/// Key for a row under an agreed primary key (hash when there is none).
pub(crate) fn keyed(row: &Row, pk: &[String]) -> String {
    if pk.is_empty() {
        row_hash_key(row)
    } else {
        row_key(row, pk)
    }
}

/// Groups rows by key, keeping adapter order within a key.
pub(crate) fn group_rows<'r>(rows: &'r [Row], pk: &[String]) -> BTreeMap<String, Vec<&'r Row>> {
    let mut groups: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
    for row in rows {
        groups.entry(keyed(row, pk)).or_default().push(row);
    }
    groups
}

fn diff_data(from: &DatabaseSnapshot, to: &DatabaseSnapshot) -> Vec<DataChange> {
    let tables: BTreeSet<&String> = from.data.keys().chain(to.data.keys()).collect();

    let mut changes = Vec::new();
    for table in tables {
        let pk = shared_primary_key(table, &[from, to]);
        let old_groups = group_rows(from.rows(table), &pk);
        let new_groups = group_rows(to.rows(table), &pk);
        let keys: BTreeSet<&String> = old_groups.keys().chain(new_groups.keys()).collect();

        for key in keys {
            let old_rows = old_groups.get(key).map(Vec::as_slice).unwrap_or(&[]);
            let new_rows = new_groups.get(key).map(Vec::as_slice).unwrap_or(&[]);

            for i in 0..old_rows.len().max(new_rows.len()) {
                match (old_rows.get(i), new_rows.get(i)) {
                    (Some(old), Some(new)) if old != new => {
                        let change = DataChange {
                            operation: ChangeOperation::Update,
                            table: table.clone(),
                            key: key.clone(),
                            description: String::new(),
                            old_values: Some((*old).clone()),
                            new_values: Some((*new).clone()),
                        };
                        let description = format!(
                            "Update row {} in {} ({})",
                            key,
                            table,
                            change.changed_columns().join(", ")
                        );
                        changes.push(DataChange { description, ..change });
                    }
                    (Some(old), None) => changes.push(DataChange {
                        operation: ChangeOperation::Delete,
                        table: table.clone(),
                        key: key.clone(),
                        description: format!("Delete row {} from {}", key, table),
                        old_values: Some((*old).clone()),
                        new_values: None,
                    }),
                    (None, Some(new)) => changes.push(DataChange {
                        operation: ChangeOperation::Insert,
                        table: table.clone(),
                        key: key.clone(),
                        description: format!("Insert row {} into {}", key, table),
                        old_values: None,
                        new_values: Some((*new).clone()),
                    }),
                    _ => {}
                }
            }
        }
    }
    changes
}
