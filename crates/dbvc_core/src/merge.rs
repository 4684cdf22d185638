//! Three-way merge of snapshots, and the merge, cherry-pick and rebase
//! operations built on it.

use crate::diff::{diff_snapshots, group_rows, keyed, shared_primary_key};
use crate::error::Result;
use crate::object_id::ObjectId;
use crate::repo::DbvcRepo;
use crate::snapshot::{format_row, ColumnDefinition, DatabaseSnapshot, Row, TableData, TableDefinition};
use crate::storage::StorageProvider;
use crate::types::{Author, Commit, ReflogAction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{info, warn};

/// How conflicting entities are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStrategy {
    /// Surface conflicts; the merge fails unless conflicts are allowed.
    #[default]
    Recursive,
    /// Resolve every conflict in favour of the target (current branch).
    Ours,
    /// Resolve every conflict in favour of the source.
    Theirs,
}

/// Which kind of entity a conflict is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    /// Whole table: created differently, or dropped on one side and
    /// changed on the other.
    Table,
    /// One column definition.
    Column,
    /// Primary key columns.
    PrimaryKey,
    /// Foreign key set.
    ForeignKeys,
    /// View definition.
    View,
    /// Index definition.
    Index,
    /// Whole row: deleted on one side and changed on the other.
    Row,
    /// One column value of a row.
    Cell,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Table => "table",
            Self::Column => "column",
            Self::PrimaryKey => "primary key",
            Self::ForeignKeys => "foreign keys",
            Self::View => "view",
            Self::Index => "index",
            Self::Row => "row",
            Self::Cell => "cell",
        };
        f.write_str(s)
    }
}

/// An entity both sides changed differently.
///
/// Values are rendered as text; `None` means the entity is absent on that
/// side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// Kind of entity.
    pub kind: ConflictKind,
    /// Entity path, e.g. `users`, `users.email`, `users[id=1].name`.
    pub target: String,
    /// Table, where applicable.
    pub table: Option<String>,
    /// Row key, for row and cell conflicts.
    pub key: Option<String>,
    /// Column, for column and cell conflicts.
    pub column: Option<String>,
    /// Value at the merge base.
    pub base_value: Option<String>,
    /// Value on the target (current branch).
    pub current_value: Option<String>,
    /// Value on the source.
    pub incoming_value: Option<String>,
    /// True if a strategy picked a side.
    pub resolved: bool,
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "<absent>".to_string());
        write!(
            f,
            "{} conflict on {}: ours {}, theirs {} (base {})",
            self.kind,
            self.target,
            show(&self.current_value),
            show(&self.incoming_value),
            show(&self.base_value)
        )
    }
}

/// Merged snapshot plus the conflicts met on the way.
#[derive(Debug, Clone)]
pub struct ThreeWayMerge {
    /// The merged state. Conflicting entities hold the side the strategy
    /// picked (the target's for `Recursive`).
    pub snapshot: DatabaseSnapshot,
    /// Every conflict, resolved or not.
    pub conflicts: Vec<MergeConflict>,
}

impl ThreeWayMerge {
    /// True if some conflict was left unresolved.
    pub fn has_unresolved(&self) -> bool {
        self.conflicts.iter().any(|c| !c.resolved)
    }
}

enum Pick<'a, T> {
    Clean(Option<&'a T>),
    Conflict,
}

/// Git's three-way rule: a side that didn't change yields to the one that
/// did; identical changes agree.
fn pick<'a, T: PartialEq>(base: Option<&'a T>, ours: Option<&'a T>, theirs: Option<&'a T>) -> Pick<'a, T> {
    if ours == theirs {
        Pick::Clean(ours)
    } else if ours == base {
        Pick::Clean(theirs)
    } else if theirs == base {
        Pick::Clean(ours)
    } else {
        Pick::Conflict
    }
}

struct Merger {
    strategy: MergeStrategy,
    conflicts: Vec<MergeConflict>,
}

/// Conflict location and rendered values, before resolution.
struct Site {
    kind: ConflictKind,
    target: String,
    table: Option<String>,
    key: Option<String>,
    column: Option<String>,
}

impl Merger {
    /// Records a conflict and returns the side the strategy picks.
    fn resolve<'a, T>(
        &mut self,
        site: Site,
        values: [Option<String>; 3],
        ours: Option<&'a T>,
        theirs: Option<&'a T>,
    ) -> Option<&'a T> {
        let [base_value, current_value, incoming_value] = values;
        self.conflicts.push(MergeConflict {
            kind: site.kind,
            target: site.target,
            table: site.table,
            key: site.key,
            column: site.column,
            base_value,
            current_value,
            incoming_value,
            resolved: self.strategy != MergeStrategy::Recursive,
        });
        match self.strategy {
            MergeStrategy::Theirs => theirs,
            MergeStrategy::Ours | MergeStrategy::Recursive => ours,
        }
    }

    fn tables(
        &mut self,
        base: &DatabaseSnapshot,
        ours: &DatabaseSnapshot,
        theirs: &DatabaseSnapshot,
    ) -> BTreeMap<String, TableDefinition> {
        let names: BTreeSet<&String> = base
            .schema
            .tables
            .keys()
            .chain(ours.schema.tables.keys())
            .chain(theirs.schema.tables.keys())
            .collect();

        let mut merged = BTreeMap::new();
        for name in names {
            let b = base.schema.tables.get(name);
            let o = ours.schema.tables.get(name);
            let t = theirs.schema.tables.get(name);

            let result = match pick(b, o, t) {
                Pick::Clean(v) => v.cloned(),
                Pick::Conflict => match (o, t) {
                    (Some(o), Some(t)) => {
                        let empty = TableDefinition::default();
                        Some(self.table_definition(name, b.unwrap_or(&empty), o, t))
                    }
                    _ => self
                        .resolve(
                            Site {
                                kind: ConflictKind::Table,
                                target: name.clone(),
                                table: Some(name.clone()),
                                key: None,
                                column: None,
                            },
                            [render(b), render(o), render(t)],
                            o,
                            t,
                        )
                        .cloned(),
                },
            };

            if let Some(def) = result {
                merged.insert(name.clone(), def);
            }
        }
        merged
    }

    /// Column-level merge of a table changed on both sides.
    fn table_definition(
        &mut self,
        table: &str,
        base: &TableDefinition,
        ours: &TableDefinition,
        theirs: &TableDefinition,
    ) -> TableDefinition {
        let mut order: Vec<&str> = Vec::new();
        for column in ours.columns.iter().chain(&theirs.columns).chain(&base.columns) {
            if !order.contains(&column.name.as_str()) {
                order.push(&column.name);
            }
        }

        let mut columns: Vec<ColumnDefinition> = Vec::new();
        for name in order {
            let (b, o, t) = (base.column(name), ours.column(name), theirs.column(name));
            let chosen = match pick(b, o, t) {
                Pick::Clean(v) => v,
                Pick::Conflict => self.resolve(
                    Site {
                        kind: ConflictKind::Column,
                        target: format!("{}.{}", table, name),
                        table: Some(table.to_string()),
                        key: None,
                        column: Some(name.to_string()),
                    },
                    [render(b), render(o), render(t)],
                    o,
                    t,
                ),
            };
            columns.extend(chosen.cloned());
        }

        let primary_key = match pick(
            Some(&base.primary_key),
            Some(&ours.primary_key),
            Some(&theirs.primary_key),
        ) {
            Pick::Clean(v) => v.cloned().unwrap_or_default(),
            Pick::Conflict => self
                .resolve(
                    Site {
                        kind: ConflictKind::PrimaryKey,
                        target: format!("{} (primary key)", table),
                        table: Some(table.to_string()),
                        key: None,
                        column: None,
                    },
                    [
                        Some(base.primary_key.join(", ")),
                        Some(ours.primary_key.join(", ")),
                        Some(theirs.primary_key.join(", ")),
                    ],
                    Some(&ours.primary_key),
                    Some(&theirs.primary_key),
                )
                .cloned()
                .unwrap_or_default(),
        };

        let foreign_keys = match pick(
            Some(&base.foreign_keys),
            Some(&ours.foreign_keys),
            Some(&theirs.foreign_keys),
        ) {
            Pick::Clean(v) => v.cloned().unwrap_or_default(),
            Pick::Conflict => {
                let show = |fks: &Vec<crate::snapshot::ForeignKey>| {
                    Some(fks.iter().map(|fk| fk.to_string()).collect::<Vec<_>>().join("; "))
                };
                self.resolve(
                    Site {
                        kind: ConflictKind::ForeignKeys,
                        target: format!("{} (foreign keys)", table),
                        table: Some(table.to_string()),
                        key: None,
                        column: None,
                    },
                    [
                        show(&base.foreign_keys),
                        show(&ours.foreign_keys),
                        show(&theirs.foreign_keys),
                    ],
                    Some(&ours.foreign_keys),
                    Some(&theirs.foreign_keys),
                )
                .cloned()
                .unwrap_or_default()
            }
        };

        TableDefinition {
            columns,
            primary_key,
            foreign_keys,
        }
    }

    fn named<T: PartialEq + Clone>(
        &mut self,
        kind: ConflictKind,
        base: &BTreeMap<String, T>,
        ours: &BTreeMap<String, T>,
        theirs: &BTreeMap<String, T>,
        show: impl Fn(&T) -> String,
    ) -> BTreeMap<String, T> {
        let names: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();

        let mut merged = BTreeMap::new();
        for name in names {
            let (b, o, t) = (base.get(name), ours.get(name), theirs.get(name));
            let chosen = match pick(b, o, t) {
                Pick::Clean(v) => v,
                Pick::Conflict => self.resolve(
                    Site {
                        kind,
                        target: name.clone(),
                        table: None,
                        key: None,
                        column: None,
                    },
                    [b.map(&show), o.map(&show), t.map(&show)],
                    o,
                    t,
                ),
            };
            if let Some(v) = chosen {
                merged.insert(name.clone(), v.clone());
            }
        }
        merged
    }

    fn table_rows(
        &mut self,
        table: &str,
        base: &DatabaseSnapshot,
        ours: &DatabaseSnapshot,
        theirs: &DatabaseSnapshot,
    ) -> Vec<Row> {
        let pk = shared_primary_key(table, &[base, ours, theirs]);
        if pk.is_empty() {
            return count_merge(&pk, base.rows(table), ours.rows(table), theirs.rows(table));
        }

        let index = |rows: &[Row]| -> BTreeMap<String, Row> {
            let mut map = BTreeMap::new();
            for row in rows {
                map.entry(keyed(row, &pk)).or_insert_with(|| row.clone());
            }
            map
        };
        let b = index(base.rows(table));
        let o = index(ours.rows(table));
        let t = index(theirs.rows(table));

        let mut order: Vec<String> = Vec::new();
        let mut seen = BTreeSet::new();
        for row in ours.rows(table).iter().chain(theirs.rows(table)) {
            let key = keyed(row, &pk);
            if seen.insert(key.clone()) {
                order.push(key);
            }
        }

        let mut rows = Vec::new();
        for key in order {
            let (br, or, tr) = (b.get(&key), o.get(&key), t.get(&key));
            let merged = match pick(br, or, tr) {
                Pick::Clean(v) => v.cloned(),
                Pick::Conflict => match (or, tr) {
                    (Some(or), Some(tr)) => Some(self.row_cells(table, &key, br, or, tr)),
                    _ => self
                        .resolve(
                            Site {
                                kind: ConflictKind::Row,
                                target: format!("{}[{}]", table, key),
                                table: Some(table.to_string()),
                                key: Some(key.clone()),
                                column: None,
                            },
                            [br.map(format_row), or.map(format_row), tr.map(format_row)],
                            or,
                            tr,
                        )
                        .cloned(),
                },
            };
            rows.extend(merged);
        }
        rows
    }

    /// Cell-level merge of a row changed on both sides.
    fn row_cells(&mut self, table: &str, key: &str, base: Option<&Row>, ours: &Row, theirs: &Row) -> Row {
        let empty = Row::new();
        let base = base.unwrap_or(&empty);
        let columns: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();

        let mut row = Row::new();
        for column in columns {
            let (b, o, t) = (base.get(column), ours.get(column), theirs.get(column));
            let chosen = match pick(b, o, t) {
                Pick::Clean(v) => v,
                Pick::Conflict => self.resolve(
                    Site {
                        kind: ConflictKind::Cell,
                        target: format!("{}[{}].{}", table, key, column),
                        table: Some(table.to_string()),
                        key: Some(key.to_string()),
                        column: Some(column.clone()),
                    },
                    [render(b), render(o), render(t)],
                    o,
                    t,
                ),
            };
            if let Some(value) = chosen {
                row.insert(column.clone(), value.clone());
            }
        }
        row
    }
}

fn render<T: fmt::Display>(value: Option<&T>) -> Option<String> {
    value.map(|v| v.to_string())
}

/// Multiset merge for rows without a usable key: each distinct row ends
/// up `ours + theirs - base` times (never negative).
fn count_merge(pk: &[String], base: &[Row], ours: &[Row], theirs: &[Row]) -> Vec<Row> {
    let count = |rows: &[Row]| -> HashMap<String, i64> {
        group_rows(rows, pk)
            .into_iter()
            .map(|(k, v)| (k, v.len() as i64))
            .collect()
    };
    let (b, o, t) = (count(base), count(ours), count(theirs));

    let mut remaining: HashMap<String, i64> = HashMap::new();
    for key in b.keys().chain(o.keys()).chain(t.keys()) {
        let get = |m: &HashMap<String, i64>| m.get(key).copied().unwrap_or(0);
        remaining.insert(key.clone(), (get(&o) + get(&t) - get(&b)).max(0));
    }

    let mut rows = Vec::new();
    for row in ours.iter().chain(theirs) {
        let key = keyed(row, pk);
        if let Some(left) = remaining.get_mut(&key) {
            if *left > 0 {
                *left -= 1;
                rows.push(row.clone());
            }
        }
    }
    rows
}

/// Merges `ours` and `theirs` against their common `base`.
///
/// Tables, columns, keys, views, indexes, rows and row cells are merged
/// independently, so changes to different parts of one table (or of one
/// row) combine cleanly.
pub fn merge_snapshots(
    base: &DatabaseSnapshot,
    ours: &DatabaseSnapshot,
    theirs: &DatabaseSnapshot,
    strategy: MergeStrategy,
) -> ThreeWayMerge {
    let mut merger = Merger {
        strategy,
        conflicts: Vec::new(),
    };

    let mut snapshot = DatabaseSnapshot {
        timestamp: ours.timestamp.max(theirs.timestamp),
        ..Default::default()
    };
    snapshot.schema.tables = merger.tables(base, ours, theirs);

    // A table dropped on one side while the other changed its rows
    for (name, def) in &base.schema.tables {
        if snapshot.schema.tables.contains_key(name) {
            continue;
        }
        let (o, t) = (ours.schema.tables.get(name), theirs.schema.tables.get(name));
        let survivor_changed = |side: &DatabaseSnapshot| side.rows(name) != base.rows(name);
        let kept = match (o, t) {
            (Some(o), None) if survivor_changed(ours) => Some((Some(o), None)),
            (None, Some(t)) if survivor_changed(theirs) => Some((None, Some(t))),
            _ => None,
        };
        if let Some((o, t)) = kept {
            let chosen = merger.resolve(
                Site {
                    kind: ConflictKind::Table,
                    target: name.clone(),
                    table: Some(name.clone()),
                    key: None,
                    column: None,
                },
                [Some(def.to_string()), render(o), render(t)],
                o,
                t,
            );
            if let Some(def) = chosen {
                snapshot.schema.tables.insert(name.clone(), def.clone());
            }
        }
    }

    snapshot.schema.views = merger.named(
        ConflictKind::View,
        &base.schema.views,
        &ours.schema.views,
        &theirs.schema.views,
        |v| v.definition.clone(),
    );
    snapshot.schema.indexes = merger.named(
        ConflictKind::Index,
        &base.schema.indexes,
        &ours.schema.indexes,
        &theirs.schema.indexes,
        |i| i.to_string(),
    );

    let tables: BTreeSet<&String> = base
        .data
        .keys()
        .chain(ours.data.keys())
        .chain(theirs.data.keys())
        .collect();
    for table in tables {
        let declared_somewhere = [base, ours, theirs]
            .iter()
            .any(|s| s.schema.tables.contains_key(table.as_str()));
        if declared_somewhere && !snapshot.schema.tables.contains_key(table.as_str()) {
            continue;
        }
        let rows = merger.table_rows(table, base, ours, theirs);
        let had_data = [ours, theirs].iter().any(|s| s.data.contains_key(table.as_str()));
        if !rows.is_empty() || had_data {
            snapshot.data.insert(table.clone(), TableData { rows });
        }
    }

    ThreeWayMerge {
        snapshot,
        conflicts: merger.conflicts,
    }
}

/// Options for [`DbvcRepo::merge`].
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Conflict strategy (default: `config.merge.strategy`, else `Recursive`).
    pub strategy: Option<MergeStrategy>,
    /// Always create a merge commit (default: `config.merge.no_fast_forward`).
    pub no_fast_forward: Option<bool>,
    /// Commit even with unresolved conflicts, keeping the target's values.
    pub allow_conflicts: bool,
    /// Merge commit message.
    pub message: Option<String>,
    /// Merge commit author (default: configured user, else the source
    /// head's author).
    pub author: Option<Author>,
}

/// How a merge concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeKind {
    /// Source already contained in target; nothing changed.
    UpToDate,
    /// Target moved to source without a new commit.
    FastForward,
    /// Three-way merge (a commit when successful).
    Merge,
}

/// Outcome of [`DbvcRepo::merge`]. Conflicts are data, not errors.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// False if unresolved conflicts stopped the merge.
    pub success: bool,
    /// How the merge concluded.
    pub kind: MergeKind,
    /// New target head.
    pub commit_id: Option<ObjectId>,
    /// Conflicts met.
    pub conflicts: Vec<MergeConflict>,
    /// Snapshot for the caller to apply.
    pub snapshot: Option<DatabaseSnapshot>,
}

/// Options for [`DbvcRepo::cherry_pick`].
#[derive(Debug, Clone, Default)]
pub struct CherryPickOptions {
    /// Conflict strategy (default `Recursive`).
    pub strategy: Option<MergeStrategy>,
    /// Compute the result without committing or moving the branch.
    pub no_commit: bool,
}

/// Outcome of [`DbvcRepo::cherry_pick`].
#[derive(Debug, Clone)]
pub struct CherryPickResult {
    /// False if unresolved conflicts stopped the pick.
    pub success: bool,
    /// The new commit, unless `no_commit` or failed.
    pub commit_id: Option<ObjectId>,
    /// Conflicts met.
    pub conflicts: Vec<MergeConflict>,
    /// Resulting snapshot, when successful.
    pub snapshot: Option<DatabaseSnapshot>,
}

/// Options for [`DbvcRepo::rebase`].
#[derive(Debug, Clone, Default)]
pub struct RebaseOptions {
    /// Conflict strategy for each replayed commit (default `Recursive`).
    pub strategy: Option<MergeStrategy>,
}

/// Outcome of [`DbvcRepo::rebase`].
#[derive(Debug, Clone)]
pub struct RebaseResult {
    /// False if a replayed commit conflicted.
    pub success: bool,
    /// Branch head before the rebase; pass to `reset` to abort.
    pub original_head: ObjectId,
    /// Branch head afterwards.
    pub new_head: ObjectId,
    /// New commits, oldest first.
    pub applied: Vec<ObjectId>,
    /// Merge commits left out.
    pub skipped: Vec<ObjectId>,
    /// The commit that failed to apply.
    pub failed_commit: Option<ObjectId>,
    /// Its conflicts.
    pub conflicts: Vec<MergeConflict>,
}

impl<S: StorageProvider> DbvcRepo<S> {
    /// Merges branch `source` into the current branch.
    ///
    /// Fast-forwards when the current branch has no commits of its own
    /// (unless disabled); otherwise merges three-way against the merge base
    /// and commits with parents `[current head, source head]`.
    pub fn merge(&mut self, source: &str, options: &MergeOptions) -> Result<MergeResult> {
        let _lock = self.storage.lock()?;

        let config = self.storage.get_config()?;
        let defaults = config.merge.clone().unwrap_or_default();
        let strategy = options.strategy.unwrap_or(defaults.strategy);
        let no_fast_forward = options.no_fast_forward.unwrap_or(defaults.no_fast_forward);

        let source_head = self.branch_head(source)?;
        let target = self.current_branch.clone();
        let target_head = self.head()?;
        let graph = self.graph();

        if let Some(head) = target_head {
            if graph.is_ancestor(source_head, head)? {
                info!(branch = %target, source = %source, "Already up to date");
                return Ok(MergeResult {
                    success: true,
                    kind: MergeKind::UpToDate,
                    commit_id: Some(head),
                    conflicts: Vec::new(),
                    snapshot: None,
                });
            }
        }

        let can_fast_forward = match target_head {
            None => true,
            Some(head) => graph.is_ancestor(head, source_head)?,
        };
        let actor = options
            .author
            .clone()
            .or_else(|| config.author())
            .map(|a| a.key())
            .unwrap_or_default();

        if can_fast_forward && !no_fast_forward {
            self.move_branch(&target, Some(source_head))?;
            self.record(
                &target,
                target_head,
                Some(source_head),
                ReflogAction::Merge,
                format!("merge {}: Fast-forward", source),
                &actor,
            )?;
            info!(branch = %target, commit = %source_head, "Fast-forward merge");
            return Ok(MergeResult {
                success: true,
                kind: MergeKind::FastForward,
                commit_id: Some(source_head),
                conflicts: Vec::new(),
                snapshot: Some(self.snapshot_at(source_head)?),
            });
        }

        let base = match target_head {
            Some(head) => graph.merge_base(head, source_head)?,
            None => None,
        };
        let base_snapshot = match base {
            Some(id) => self.snapshot_at(id)?,
            None => DatabaseSnapshot::empty(),
        };
        let ours = self.head_snapshot()?;
        let theirs = self.snapshot_at(source_head)?;

        let merged = merge_snapshots(&base_snapshot, &ours, &theirs, strategy);
        if merged.has_unresolved() && !options.allow_conflicts {
            warn!(
                branch = %target,
                source = %source,
                conflicts = merged.conflicts.len(),
                "Merge stopped on conflicts"
            );
            return Ok(MergeResult {
                success: false,
                kind: MergeKind::Merge,
                commit_id: None,
                conflicts: merged.conflicts,
                snapshot: None,
            });
        }

        let author = match options.author.clone().or_else(|| config.author()) {
            Some(author) => author,
            None => self.get_commit(source_head)?.author.author(),
        };
        let message = options
            .message
            .clone()
            .unwrap_or_else(|| format!("Merge branch '{}' into {}", source, target));
        let changes = diff_snapshots(&ours, &merged.snapshot).to_changes();
        let signature = crate::types::Signature::new(&author, self.now());
        let parents = target_head.into_iter().chain([source_head]).collect();

        let commit = self.write_commit(parents, &message, signature, changes, &merged.snapshot)?;
        self.move_branch(&target, Some(commit.id))?;
        self.record(
            &target,
            target_head,
            Some(commit.id),
            ReflogAction::Merge,
            format!(
                "merge {}: Merge made by the '{}' strategy",
                source,
                format!("{:?}", strategy).to_lowercase()
            ),
            &author.key(),
        )?;

        info!(branch = %target, commit = %commit.id, conflicts = merged.conflicts.len(), "Merged");
        Ok(MergeResult {
            success: true,
            kind: MergeKind::Merge,
            commit_id: Some(commit.id),
            conflicts: merged.conflicts,
            snapshot: Some(merged.snapshot),
        })
    }

    /// Re-applies commit `id` on top of the current branch.
    ///
    /// The commit's own change is computed against its first parent and
    /// merged onto HEAD; the new commit keeps the original author, message
    /// and change list.
    pub fn cherry_pick(&mut self, id: ObjectId, options: &CherryPickOptions) -> Result<CherryPickResult> {
        let _lock = self.storage.lock()?;
        let picked = self.get_commit(id)?;
        let old_head = self.head()?;
        let result = self.replay(&picked, options.strategy.unwrap_or_default(), options.no_commit)?;

        if let Some(new_id) = result.commit_id {
            self.record(
                &self.current_branch,
                old_head,
                Some(new_id),
                ReflogAction::CherryPick,
                format!("cherry-pick: {}", picked.summary()),
                &picked.author.key(),
            )?;
            info!(branch = %self.current_branch, picked = %id, commit = %new_id, "Cherry-picked");
        }
        Ok(result)
    }

    /// Applies one commit onto HEAD and advances the branch, without
    /// touching the reflog.
    fn replay(&self, picked: &Commit, strategy: MergeStrategy, no_commit: bool) -> Result<CherryPickResult> {
        let base = match picked.first_parent() {
            Some(parent) => self.snapshot_at(parent)?,
            None => DatabaseSnapshot::empty(),
        };
        let theirs = self.load_snapshot(picked.tree_id)?;
        let ours = self.head_snapshot()?;

        let merged = merge_snapshots(&base, &ours, &theirs, strategy);
        if merged.has_unresolved() {
            return Ok(CherryPickResult {
                success: false,
                commit_id: None,
                conflicts: merged.conflicts,
                snapshot: None,
            });
        }
        if no_commit {
            return Ok(CherryPickResult {
                success: true,
                commit_id: None,
                conflicts: merged.conflicts,
                snapshot: Some(merged.snapshot),
            });
        }

        let head = self.head()?;
        let commit = self.write_commit(
            head.into_iter().collect(),
            &picked.message,
            picked.author.clone(),
            picked.changes.clone(),
            &merged.snapshot,
        )?;
        self.move_branch(&self.current_branch, Some(commit.id))?;

        Ok(CherryPickResult {
            success: true,
            commit_id: Some(commit.id),
            conflicts: merged.conflicts,
            snapshot: Some(merged.snapshot),
        })
    }

    /// Replays the current branch's own commits onto `upstream`.
    ///
    /// Commits reachable from the current head but not from the upstream
    /// head are cherry-picked oldest first; merge commits are skipped. On
    /// a conflict the branch stays at the last replayed commit and the
    /// result names the failing one; `reset(original_head)` aborts.
    pub fn rebase(&mut self, upstream: &str, options: &RebaseOptions) -> Result<RebaseResult> {
        let _lock = self.storage.lock()?;
        let branch = self.current_branch.clone();
        let upstream_head = self.branch_head(upstream)?;
        let original_head = self.branch_head(&branch)?;
        let strategy = options.strategy.unwrap_or_default();

        let graph = self.graph();
        let mut result = RebaseResult {
            success: true,
            original_head,
            new_head: original_head,
            applied: Vec::new(),
            skipped: Vec::new(),
            failed_commit: None,
            conflicts: Vec::new(),
        };
        if graph.is_ancestor(upstream_head, original_head)? {
            info!(branch = %branch, upstream = %upstream, "Current branch is up to date");
            return Ok(result);
        }

        let unique = graph.commits_between(Some(upstream_head), original_head)?;
        self.move_branch(&branch, Some(upstream_head))?;

        for commit in &unique {
            if commit.is_merge() {
                result.skipped.push(commit.id);
                continue;
            }
            let step = self.replay(commit, strategy, false)?;
            match step.commit_id {
                Some(new_id) if step.success => result.applied.push(new_id),
                _ => {
                    warn!(branch = %branch, commit = %commit.id, "Rebase stopped on conflicts");
                    result.success = false;
                    result.failed_commit = Some(commit.id);
                    result.conflicts = step.conflicts;
                    break;
                }
            }
        }

        result.new_head = self.branch_head(&branch)?;
        self.record(
            &branch,
            Some(original_head),
            Some(result.new_head),
            ReflogAction::Rebase,
            format!(
                "rebase onto {}: {} applied, {} skipped{}",
                upstream,
                result.applied.len(),
                result.skipped.len(),
                if result.success { "" } else { ", stopped" }
            ),
            &self.actor()?,
        )?;

        info!(branch = %branch, upstream = %upstream, applied = result.applied.len(), "Rebased");
        Ok(result)
    }
}
