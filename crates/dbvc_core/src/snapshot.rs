//! Database snapshot model: schema definitions, rows and cell values.

use crate::error::{DbvcError, Result};
use crate::object_id::{encode_object, ObjectId, ObjectKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single cell value.
///
/// Covers what relational and document adapters produce. Values are
/// compared structurally; `Float` uses IEEE equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// SQL NULL / JSON null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit float.
    Float(f64),
    /// Text.
    Text(String),
    /// Raw bytes (BLOB / BYTEA).
    Bytes(Vec<u8>),
    /// Array value (document stores, array columns).
    Array(Vec<Value>),
    /// Nested document.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Converts into plain JSON. Bytes become an array of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Integer(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Text(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|x| Json::from(*x)).collect()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// False if any float inside is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float(f) => f.is_finite(),
            Value::Array(items) => items.iter().all(Value::is_finite),
            Value::Object(map) => map.values().all(Value::is_finite),
            _ => true,
        }
    }

    /// Feeds a type-tagged encoding of this value into a hasher.
    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            Value::Null => {
                hasher.update(&[0]);
            }
            Value::Bool(b) => {
                hasher.update(&[1, *b as u8]);
            }
            Value::Integer(i) => {
                hasher.update(&[2]);
                hasher.update(&i.to_le_bytes());
            }
            Value::Float(f) => {
                hasher.update(&[3]);
                hasher.update(&f.to_bits().to_le_bytes());
            }
            Value::Text(s) => {
                hasher.update(&[4]);
                hash_bytes(hasher, s.as_bytes());
            }
            Value::Bytes(b) => {
                hasher.update(&[5]);
                hash_bytes(hasher, b);
            }
            Value::Array(items) => {
                hasher.update(&[6]);
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.hash_into(hasher);
                }
            }
            Value::Object(map) => {
                hasher.update(&[7]);
                hasher.update(&(map.len() as u64).to_le_bytes());
                for (k, v) in map {
                    hash_bytes(hasher, k.as_bytes());
                    v.hash_into(hasher);
                }
            }
        }
    }
}

fn hash_bytes(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Text(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => write!(f, "x'{}'", hex::encode(b)),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A row: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Renders a row as `{col: value, ...}`.
pub fn format_row(row: &Row) -> String {
    Value::Object(row.clone()).to_string()
}

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Adapter-specific type name (e.g. `integer`, `varchar(255)`).
    pub data_type: String,
    /// Whether NULL is allowed.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Default expression, as the database reports it.
    #[serde(default)]
    pub default: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDefinition {
    /// Creates a nullable column without a default.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
        }
    }

    /// Marks the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the default expression.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

impl fmt::Display for ColumnDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        if let Some(default) = &self.default {
            write!(f, " DEFAULT {}", default)?;
        }
        Ok(())
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced columns.
    pub referenced_columns: Vec<String>,
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.columns.join(", "),
            self.referenced_table,
            self.referenced_columns.join(", ")
        )
    }
}

/// Definition of one table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Columns in declaration order.
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    /// Primary key columns (empty when the table has none).
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Foreign keys.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDefinition {
    /// Creates a table from columns and a primary key.
    pub fn new(columns: Vec<ColumnDefinition>, primary_key: &[&str]) -> Self {
        Self {
            columns,
            primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
            foreign_keys: Vec::new(),
        }
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for TableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));
        }
        parts.extend(self.foreign_keys.iter().map(|fk| fk.to_string()));
        write!(f, "({})", parts.join(", "))
    }
}

/// A view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    /// The view's query text.
    pub definition: String,
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Indexed table.
    pub table: String,
    /// Indexed columns.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl fmt::Display for IndexDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unique {
            write!(f, "UNIQUE ")?;
        }
        write!(f, "INDEX ON {} ({})", self.table, self.columns.join(", "))
    }
}

/// The schema part of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Tables by name.
    #[serde(default)]
    pub tables: BTreeMap<String, TableDefinition>,
    /// Views by name.
    #[serde(default)]
    pub views: BTreeMap<String, ViewDefinition>,
    /// Indexes by name.
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexDefinition>,
}

/// Rows of one table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableData {
    /// Rows in adapter order.
    pub rows: Vec<Row>,
}

/// Full state of a database at one point in time.
///
/// Snapshots are produced by database adapters outside this crate and
/// stored content-addressed; their id is the commit's `tree_id`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    /// Schema.
    pub schema: SchemaDefinition,
    /// Data per table.
    pub data: BTreeMap<String, TableData>,
    /// Capture time (Unix milliseconds).
    pub timestamp: i64,
}

/// Plain JSON document form of a snapshot, as adapters emit it.
#[derive(Deserialize, Serialize)]
struct SnapshotDocument {
    #[serde(default)]
    schema: SchemaDefinition,
    #[serde(default)]
    data: BTreeMap<String, TableDocument>,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Deserialize, Serialize)]
struct TableDocument {
    #[serde(default)]
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl DatabaseSnapshot {
    /// An empty snapshot (no tables, no rows).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses the plain JSON document form:
    ///
    /// ```
    /// use dbvc_core::{DatabaseSnapshot, Value};
    ///
    /// let snap = DatabaseSnapshot::from_json(r#"{
    ///     "schema": {"tables": {"users": {
    ///         "columns": [{"name": "id", "data_type": "integer", "nullable": false}],
    ///         "primary_key": ["id"]
    ///     }}},
    ///     "data": {"users": {"rows": [{"id": 1}]}}
    /// }"#).unwrap();
    ///
    /// assert_eq!(snap.rows("users")[0]["id"], Value::Integer(1));
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: SnapshotDocument =
            serde_json::from_str(json).map_err(|e| DbvcError::Deserialization(e.to_string()))?;

        let data = doc
            .data
            .into_iter()
            .map(|(table, t)| {
                let rows = t
                    .rows
                    .into_iter()
                    .map(|row| row.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
                    .collect();
                (table, TableData { rows })
            })
            .collect();

        Ok(Self {
            schema: doc.schema,
            data,
            timestamp: doc.timestamp,
        })
    }

    /// Renders the plain JSON document form.
    pub fn to_json_pretty(&self) -> Result<String> {
        let doc = SnapshotDocument {
            schema: self.schema.clone(),
            data: self
                .data
                .iter()
                .map(|(table, t)| {
                    let rows = t
                        .rows
                        .iter()
                        .map(|row| row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
                        .collect();
                    (table.clone(), TableDocument { rows })
                })
                .collect(),
            timestamp: self.timestamp,
        };
        serde_json::to_string_pretty(&doc).map_err(|e| DbvcError::Serialization(e.to_string()))
    }

    /// Content id of this snapshot (the `tree_id` of commits that carry it).
    pub fn tree_id(&self) -> Result<ObjectId> {
        encode_object(ObjectKind::Snapshot, self).map(|(id, _)| id)
    }

    /// Rows of a table (empty if the table has no data).
    pub fn rows(&self, table: &str) -> &[Row] {
        self.data.get(table).map(|t| t.rows.as_slice()).unwrap_or(&[])
    }

    /// Adds or replaces a table definition, builder style.
    pub fn with_table(mut self, name: impl Into<String>, definition: TableDefinition) -> Self {
        self.schema.tables.insert(name.into(), definition);
        self
    }

    /// Appends a row, builder style.
    pub fn with_row(mut self, table: impl Into<String>, row: Row) -> Self {
        self.data.entry(table.into()).or_default().rows.push(row);
        self
    }

    /// Finds a row by its key (see [`row_key`]).
    pub fn find_row(&self, table: &str, key: &str) -> Option<&Row> {
        let pk = self.primary_key(table);
        self.rows(table).iter().find(|row| row_key(row, pk) == key)
    }

    /// Primary key columns of a table, empty if undeclared.
    pub fn primary_key(&self, table: &str) -> &[String] {
        self.schema
            .tables
            .get(table)
            .map(|t| t.primary_key.as_slice())
            .unwrap_or(&[])
    }
}

/// Builds a row from `(column, value)` pairs.
///
/// ```
/// use dbvc_core::{row, Value};
///
/// let r = row([("id", Value::from(1)), ("name", Value::from("ada"))]);
/// assert_eq!(r.len(), 2);
/// ```
pub fn row<K, I>(cells: I) -> Row
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    cells.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Prefix of keys derived from a row hash rather than a primary key.
pub const HASH_KEY_PREFIX: &str = "#";

/// Key identifying a row within its table.
///
/// With a usable primary key this is `col=value[, col=value]`; otherwise a
/// hash of the full row prefixed with `#`.
pub fn row_key(row: &Row, primary_key: &[String]) -> String {
    if !primary_key.is_empty() && primary_key.iter().all(|c| row.contains_key(c)) {
        primary_key
            .iter()
            .map(|c| format!("{}={}", c, row[c]))
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        row_hash_key(row)
    }
}

/// Hash-based key of a full row.
pub fn row_hash_key(row: &Row) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(row.len() as u64).to_le_bytes());
    for (column, value) in row {
        hash_bytes(&mut hasher, column.as_bytes());
        value.hash_into(&mut hasher);
    }
    let hash = hasher.finalize();
    format!("{}{}", HASH_KEY_PREFIX, &hash.to_hex()[..16])
}

/// True if every row carries all primary key columns.
pub(crate) fn key_usable(primary_key: &[String], rows: &[Row]) -> bool {
    !primary_key.is_empty()
        && rows
            .iter()
            .all(|row| primary_key.iter().all(|c| row.contains_key(c)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> DatabaseSnapshot {
        DatabaseSnapshot::empty()
            .with_table(
                "users",
                TableDefinition::new(
                    vec![
                        ColumnDefinition::new("id", "integer").not_null(),
                        ColumnDefinition::new("name", "text"),
                    ],
                    &["id"],
                ),
            )
            .with_row("users", row([("id", 1.into()), ("name", "ada".into())]))
    }

    #[test]
    fn test_row_key_primary() {
        let r = row([("id", Value::from(7)), ("name", Value::from("x"))]);
        assert_eq!(row_key(&r, &["id".to_string()]), "id=7");
    }

    #[test]
    fn test_row_key_composite() {
        let r = row([("a", Value::from(1)), ("b", Value::from("z"))]);
        assert_eq!(row_key(&r, &["a".into(), "b".into()]), "a=1, b='z'");
    }

    #[test]
    fn test_row_key_falls_back_to_hash() {
        let r = row([("name", Value::from("x"))]);
        let key = row_key(&r, &["id".to_string()]);
        assert!(key.starts_with(HASH_KEY_PREFIX));
        assert_eq!(key, row_hash_key(&r));
    }

    #[test]
    fn test_row_hash_distinguishes_types() {
        let a = row([("v", Value::from(1))]);
        let b = row([("v", Value::from("1"))]);
        assert_ne!(row_hash_key(&a), row_hash_key(&b));
    }

    #[test]
    fn test_tree_id_deterministic() {
        assert_eq!(users().tree_id().unwrap(), users().tree_id().unwrap());
        let other = users().with_row("users", row([("id", Value::from(2))]));
        assert_ne!(users().tree_id().unwrap(), other.tree_id().unwrap());
    }

    #[test]
    fn test_json_document_roundtrip() {
        let snap = users();
        let json = snap.to_json_pretty().unwrap();
        let back = DatabaseSnapshot::from_json(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_find_row() {
        let snap = users();
        assert!(snap.find_row("users", "id=1").is_some());
        assert!(snap.find_row("users", "id=2").is_none());
        assert!(snap.find_row("missing", "id=1").is_none());
    }

    #[test]
    fn test_display_definitions() {
        let col = ColumnDefinition::new("email", "text")
            .not_null()
            .with_default("''");
        assert_eq!(col.to_string(), "email text NOT NULL DEFAULT ''");
        assert_eq!(Value::from("it's").to_string(), "'it''s'");
    }
}
