//! Core version-control records: commits, changes, refs, stashes and logs.

use crate::error::{DbvcError, Result};
use crate::object_id::{encode_object, ObjectId, ObjectKind};
use crate::snapshot::{format_row, ColumnDefinition, ForeignKey, IndexDefinition, Row, TableDefinition};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl Author {
    /// Creates an author.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Parses `Name <email>`; a bare string is taken as the name.
    pub fn parse(s: &str) -> Self {
        match (s.find('<'), s.rfind('>')) {
            (Some(open), Some(close)) if open < close => Self {
                name: s[..open].trim().to_string(),
                email: s[open + 1..close].trim().to_string(),
            },
            _ => Self {
                name: s.trim().to_string(),
                email: String::new(),
            },
        }
    }

    /// Aggregation key `name <email>`.
    pub fn key(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// An author stamped with the time of the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl Signature {
    /// Stamps an author with a timestamp.
    pub fn new(author: &Author, timestamp: i64) -> Self {
        Self {
            name: author.name.clone(),
            email: author.email.clone(),
            timestamp,
        }
    }

    /// The unstamped author.
    pub fn author(&self) -> Author {
        Author::new(self.name.clone(), self.email.clone())
    }

    /// Aggregation key `name <email>`.
    pub fn key(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

/// Operation carried by a change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOperation {
    /// Object created.
    Create,
    /// Object definition altered.
    Alter,
    /// Object dropped.
    Drop,
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
}

impl ChangeOperation {
    /// The operation seen from the opposite diff direction.
    pub fn inverse(self) -> Self {
        match self {
            Self::Create => Self::Drop,
            Self::Drop => Self::Create,
            Self::Insert => Self::Delete,
            Self::Delete => Self::Insert,
            Self::Alter => Self::Alter,
            Self::Update => Self::Update,
        }
    }

    /// `+`, `-` or ` ` as used in patch text.
    pub fn patch_prefix(self) -> char {
        match self {
            Self::Create | Self::Insert => '+',
            Self::Drop | Self::Delete => '-',
            Self::Alter | Self::Update => ' ',
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// What happened to one column inside an ALTER.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnChangeKind {
    /// Column added.
    Add,
    /// Column dropped.
    Drop,
    /// Type, nullability or default changed.
    Modify,
}

/// One column difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnChange {
    /// Kind of change.
    pub kind: ColumnChangeKind,
    /// Column name.
    pub column: String,
    /// Definition before.
    pub old: Option<ColumnDefinition>,
    /// Definition after.
    pub new: Option<ColumnDefinition>,
}

/// Table-level schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChange {
    /// CREATE, ALTER or DROP.
    pub operation: ChangeOperation,
    /// Table name.
    pub table: String,
    /// Human-readable summary.
    pub description: String,
    /// Column differences (ALTER only).
    #[serde(default)]
    pub column_changes: Vec<ColumnChange>,
    /// Definition before (ALTER/DROP).
    pub old_definition: Option<TableDefinition>,
    /// Definition after (CREATE/ALTER).
    pub new_definition: Option<TableDefinition>,
}

/// Row-level data change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChange {
    /// INSERT, UPDATE or DELETE.
    pub operation: ChangeOperation,
    /// Table name.
    pub table: String,
    /// Row key (see `row_key`).
    pub key: String,
    /// Human-readable summary.
    pub description: String,
    /// Row before (UPDATE/DELETE).
    pub old_values: Option<Row>,
    /// Row after (INSERT/UPDATE).
    pub new_values: Option<Row>,
}

impl DataChange {
    /// Columns whose value differs between old and new.
    pub fn changed_columns(&self) -> Vec<String> {
        let empty = Row::new();
        let old = self.old_values.as_ref().unwrap_or(&empty);
        let new = self.new_values.as_ref().unwrap_or(&empty);
        let mut columns: Vec<String> = old
            .keys()
            .chain(new.keys())
            .filter(|c| old.get(*c) != new.get(*c))
            .cloned()
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }
}

/// View change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChange {
    /// CREATE, ALTER or DROP.
    pub operation: ChangeOperation,
    /// View name.
    pub name: String,
    /// Human-readable summary.
    pub description: String,
    /// Query text before.
    pub old_definition: Option<String>,
    /// Query text after.
    pub new_definition: Option<String>,
}

/// Index change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChange {
    /// CREATE, ALTER or DROP.
    pub operation: ChangeOperation,
    /// Index name.
    pub name: String,
    /// Human-readable summary.
    pub description: String,
    /// Definition before.
    pub old_definition: Option<IndexDefinition>,
    /// Definition after.
    pub new_definition: Option<IndexDefinition>,
}

/// A table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constraint {
    /// Primary key columns.
    PrimaryKey(Vec<String>),
    /// Foreign key.
    ForeignKey(ForeignKey),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::PrimaryKey(cols) => write!(f, "PRIMARY KEY ({})", cols.join(", ")),
            Constraint::ForeignKey(fk) => write!(f, "{}", fk),
        }
    }
}

/// Constraint change on a table present on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintChange {
    /// CREATE, ALTER or DROP.
    pub operation: ChangeOperation,
    /// Owning table.
    pub table: String,
    /// Human-readable summary.
    pub description: String,
    /// Constraint before.
    pub old_constraint: Option<Constraint>,
    /// Constraint after.
    pub new_constraint: Option<Constraint>,
}

/// A recorded change, one variant per kind of database object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    /// Table created, altered or dropped.
    Schema(SchemaChange),
    /// Row inserted, updated or deleted.
    Data(DataChange),
    /// View created, altered or dropped.
    View(ViewChange),
    /// Index created, altered or dropped.
    Index(IndexChange),
    /// Constraint added, changed or removed.
    Constraint(ConstraintChange),
}

impl Change {
    /// The change's operation.
    pub fn operation(&self) -> ChangeOperation {
        match self {
            Change::Schema(c) => c.operation,
            Change::Data(c) => c.operation,
            Change::View(c) => c.operation,
            Change::Index(c) => c.operation,
            Change::Constraint(c) => c.operation,
        }
    }

    /// The changed object: table, `table[key]`, view or index name.
    pub fn target(&self) -> String {
        match self {
            Change::Schema(c) => c.table.clone(),
            Change::Data(c) => format!("{}[{}]", c.table, c.key),
            Change::View(c) => c.name.clone(),
            Change::Index(c) => c.name.clone(),
            Change::Constraint(c) => c.table.clone(),
        }
    }

    /// Human-readable summary.
    pub fn description(&self) -> &str {
        match self {
            Change::Schema(c) => &c.description,
            Change::Data(c) => &c.description,
            Change::View(c) => &c.description,
            Change::Index(c) => &c.description,
            Change::Constraint(c) => &c.description,
        }
    }

    /// Table this change touches, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Change::Schema(c) => Some(&c.table),
            Change::Data(c) => Some(&c.table),
            Change::Index(c) => c
                .new_definition
                .as_ref()
                .or(c.old_definition.as_ref())
                .map(|d| d.table.as_str()),
            Change::Constraint(c) => Some(&c.table),
            Change::View(_) => None,
        }
    }

    /// True if the change touches `table`.
    pub fn references_table(&self, table: &str) -> bool {
        self.table() == Some(table)
    }

    /// True if the change touches `table.column`.
    pub fn references_column(&self, table: &str, column: &str) -> bool {
        if !self.references_table(table) {
            return false;
        }
        match self {
            Change::Schema(c) => match c.operation {
                ChangeOperation::Alter => c.column_changes.iter().any(|cc| cc.column == column),
                _ => c
                    .new_definition
                    .as_ref()
                    .or(c.old_definition.as_ref())
                    .map_or(false, |d| d.column(column).is_some()),
            },
            Change::Data(c) => c.changed_columns().iter().any(|col| col == column),
            Change::Index(c) => [&c.old_definition, &c.new_definition]
                .iter()
                .filter_map(|d| d.as_ref())
                .any(|d| d.columns.iter().any(|col| col == column)),
            Change::Constraint(c) => [&c.old_constraint, &c.new_constraint]
                .iter()
                .filter_map(|d| d.as_ref())
                .any(|d| match d {
                    Constraint::PrimaryKey(cols) => cols.iter().any(|col| col == column),
                    Constraint::ForeignKey(fk) => fk.columns.iter().any(|col| col == column),
                }),
            Change::View(_) => false,
        }
    }

    /// True if the change touches the row with `key` in `table`.
    pub fn references_row(&self, table: &str, key: &str) -> bool {
        matches!(self, Change::Data(c) if c.table == table && c.key == key)
    }

    /// Detail lines used by patch rendering.
    pub fn detail_lines(&self) -> Vec<String> {
        match self {
            Change::Schema(c) => c
                .column_changes
                .iter()
                .map(|cc| match cc.kind {
                    ColumnChangeKind::Add => format!(
                        "+ column {}",
                        cc.new.as_ref().map(|d| d.to_string()).unwrap_or_default()
                    ),
                    ColumnChangeKind::Drop => format!("- column {}", cc.column),
                    ColumnChangeKind::Modify => format!(
                        "  column {} -> {}",
                        cc.old.as_ref().map(|d| d.to_string()).unwrap_or_default(),
                        cc.new.as_ref().map(|d| d.to_string()).unwrap_or_default()
                    ),
                })
                .collect(),
            Change::Data(c) => {
                let mut lines = Vec::new();
                if let Some(old) = &c.old_values {
                    lines.push(format!("- {}", format_row(old)));
                }
                if let Some(new) = &c.new_values {
                    lines.push(format!("+ {}", format_row(new)));
                }
                lines
            }
            Change::View(c) => c
                .new_definition
                .iter()
                .map(|d| format!("  AS {}", d))
                .collect(),
            Change::Index(c) => c
                .new_definition
                .iter()
                .map(|d| format!("  {}", d))
                .collect(),
            Change::Constraint(_) => Vec::new(),
        }
    }
}

/// Fields of a commit that its id is computed from.
#[derive(Serialize)]
struct CommitHeaderRef<'a> {
    parent_ids: &'a [ObjectId],
    message: &'a str,
    author: &'a Signature,
    timestamp: i64,
    tree_id: &'a ObjectId,
    changes: &'a [Change],
    branch_name: Option<&'a str>,
}

/// Owned counterpart of [`CommitHeaderRef`], as stored in the object store.
#[derive(Deserialize)]
pub(crate) struct CommitHeader {
    parent_ids: Vec<ObjectId>,
    message: String,
    author: Signature,
    timestamp: i64,
    tree_id: ObjectId,
    changes: Vec<Change>,
    branch_name: Option<String>,
}

impl CommitHeader {
    pub(crate) fn into_commit(self, id: ObjectId) -> Commit {
        Commit {
            id,
            parent_ids: self.parent_ids,
            message: self.message,
            author: self.author,
            timestamp: self.timestamp,
            tree_id: self.tree_id,
            changes: self.changes,
            branch_name: self.branch_name,
        }
    }
}

/// An immutable commit.
///
/// The id is the BLAKE3 hash of every other field, so two commits are
/// equal exactly when their ids are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    /// Content id.
    pub id: ObjectId,
    /// Parents: none for a root, one normally, two or more for merges.
    pub parent_ids: Vec<ObjectId>,
    /// Commit message.
    pub message: String,
    /// Author and authoring time.
    pub author: Signature,
    /// Commit time (Unix milliseconds).
    pub timestamp: i64,
    /// Id of the snapshot this commit records.
    pub tree_id: ObjectId,
    /// Changes relative to the first parent.
    pub changes: Vec<Change>,
    /// Branch the commit was created on.
    pub branch_name: Option<String>,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Commit {}

impl Commit {
    /// Builds a commit and computes its id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent_ids: Vec<ObjectId>,
        message: impl Into<String>,
        author: Signature,
        timestamp: i64,
        tree_id: ObjectId,
        changes: Vec<Change>,
        branch_name: Option<String>,
    ) -> Result<Self> {
        let mut commit = Self {
            id: ObjectId::from_bytes([0; 32]),
            parent_ids,
            message: message.into(),
            author,
            timestamp,
            tree_id,
            changes,
            branch_name,
        };
        commit.id = commit.compute_id()?;
        Ok(commit)
    }

    fn header(&self) -> CommitHeaderRef<'_> {
        CommitHeaderRef {
            parent_ids: &self.parent_ids,
            message: &self.message,
            author: &self.author,
            timestamp: self.timestamp,
            tree_id: &self.tree_id,
            changes: &self.changes,
            branch_name: self.branch_name.as_deref(),
        }
    }

    /// Recomputes the id from the commit's fields.
    pub fn compute_id(&self) -> Result<ObjectId> {
        encode_object(ObjectKind::Commit, &self.header()).map(|(id, _)| id)
    }

    /// Encodes the header; returns `(id, payload)`.
    pub(crate) fn encode(&self) -> Result<(ObjectId, Vec<u8>)> {
        let (id, payload) = encode_object(ObjectKind::Commit, &self.header())?;
        if id != self.id {
            return Err(DbvcError::HashMismatch {
                expected: self.id.as_hex(),
                actual: id.as_hex(),
            });
        }
        Ok((id, payload))
    }

    /// Decodes a stored header.
    pub(crate) fn decode(id: ObjectId, payload: &[u8]) -> Result<Self> {
        let header: CommitHeader =
            postcard::from_bytes(payload).map_err(|e| DbvcError::Deserialization(e.to_string()))?;
        Ok(header.into_commit(id))
    }

    /// First parent, if any.
    pub fn first_parent(&self) -> Option<ObjectId> {
        self.parent_ids.first().copied()
    }

    /// True for commits with two or more parents.
    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() > 1
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// A named, movable pointer to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Unique name.
    pub name: String,
    /// Head commit, `None` until the first commit lands.
    pub commit_id: Option<ObjectId>,
    /// Protected branches need `force` to delete.
    #[serde(default)]
    pub protected: bool,
    /// Optional upstream branch name.
    #[serde(default)]
    pub upstream: Option<String>,
}

impl Branch {
    /// Creates an unprotected branch.
    pub fn new(name: impl Into<String>, commit_id: Option<ObjectId>) -> Self {
        Self {
            name: name.into(),
            commit_id,
            protected: false,
            upstream: None,
        }
    }
}

/// Lightweight tags only point; annotated tags carry a message and tagger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagKind {
    /// Name only.
    Lightweight,
    /// With message and tagger.
    Annotated,
}

/// An immutable named pointer to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Unique name.
    pub name: String,
    /// Tagged commit.
    pub commit_id: ObjectId,
    /// Kind.
    pub kind: TagKind,
    /// Annotation message.
    pub message: Option<String>,
    /// Annotation author.
    pub tagger: Option<Signature>,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// An uncommitted change set saved against a branch head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stash {
    /// Unique id.
    pub id: String,
    /// Description.
    pub message: String,
    /// Branch current at push time.
    pub branch_name: String,
    /// Head of that branch at push time.
    pub parent_commit_id: Option<ObjectId>,
    /// Stashed changes.
    pub changes: Vec<Change>,
    /// Who stashed.
    pub author: Signature,
    /// Unix milliseconds, strictly increasing per repository.
    pub created_at: i64,
    /// Snapshot captured with the stash, if any.
    #[serde(default)]
    pub snapshot_id: Option<ObjectId>,
}

/// Why a ref moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReflogAction {
    /// New commit.
    Commit,
    /// HEAD switched.
    Checkout,
    /// Merge or fast-forward.
    Merge,
    /// Rebase.
    Rebase,
    /// Cherry-pick.
    CherryPick,
    /// Branch pointer reset.
    Reset,
    /// Branch created, renamed or deleted.
    Branch,
    /// Stash push, pop or drop.
    Stash,
}

impl fmt::Display for ReflogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Commit => "commit",
            Self::Checkout => "checkout",
            Self::Merge => "merge",
            Self::Rebase => "rebase",
            Self::CherryPick => "cherry-pick",
            Self::Reset => "reset",
            Self::Branch => "branch",
            Self::Stash => "stash",
        };
        f.write_str(s)
    }
}

/// One ref movement in the append-only reflog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflogEntry {
    /// Unique id.
    pub id: String,
    /// Ref that moved (branch name, or `HEAD`).
    pub ref_name: String,
    /// Previous target.
    pub old_commit_id: Option<ObjectId>,
    /// New target.
    pub new_commit_id: Option<ObjectId>,
    /// Why.
    pub action: ReflogAction,
    /// Details.
    pub message: String,
    /// `name <email>` of the actor.
    pub author: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// Filter for reading the reflog.
#[derive(Debug, Clone, Default)]
pub struct ReflogQuery {
    /// Only entries for this ref.
    pub ref_name: Option<String>,
    /// Entries at or after this time.
    pub since: Option<i64>,
    /// Entries at or before this time.
    pub until: Option<i64>,
    /// Cap on returned entries.
    pub max_count: Option<usize>,
}

impl ReflogQuery {
    /// True if `entry` passes the ref and time filters.
    pub fn matches(&self, entry: &ReflogEntry) -> bool {
        self.ref_name
            .as_deref()
            .map_or(true, |name| entry.ref_name == name)
            && self.since.map_or(true, |t| entry.timestamp >= t)
            && self.until.map_or(true, |t| entry.timestamp <= t)
    }

    /// Applies the filters and cap to entries given most recent first.
    pub fn apply<I: IntoIterator<Item = ReflogEntry>>(&self, newest_first: I) -> Vec<ReflogEntry> {
        newest_first
            .into_iter()
            .filter(|e| self.matches(e))
            .take(self.max_count.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Lifecycle of a bisect session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BisectStatus {
    /// Waiting for a verdict on `current_commit`.
    Active,
    /// `first_bad_commit` is known.
    Found,
    /// Reset before finishing.
    Aborted,
}

/// State of a binary search over history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BisectSession {
    /// Unique id.
    pub id: String,
    /// Commits marked good (including the starting one).
    pub good_commits: Vec<ObjectId>,
    /// Commits marked bad (including the starting one).
    pub bad_commits: Vec<ObjectId>,
    /// Commit awaiting a verdict.
    pub current_commit: Option<ObjectId>,
    /// Candidates still in play, oldest first.
    pub remaining_commits: Vec<ObjectId>,
    /// Commits skipped without a verdict.
    #[serde(default)]
    pub skipped_commits: Vec<ObjectId>,
    /// Status.
    pub status: BisectStatus,
    /// Result once found.
    pub first_bad_commit: Option<ObjectId>,
    /// Verdicts and skips so far.
    pub steps: u32,
    /// Unix milliseconds.
    pub started_at: i64,
}
