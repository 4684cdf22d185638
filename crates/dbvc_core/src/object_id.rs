//! Object identification and canonical envelope format.

use crate::error::{DbvcError, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A 32-byte BLAKE3 content hash identifying a commit or snapshot.
///
/// Commits are identified by the hash of their header and snapshots by
/// the hash of their contents, so identical content always yields the
/// same id and any tampering is detected on read.
///
/// Human-readable formats (JSON, TOML) carry the id as a 64 char hex
/// string; binary formats carry the raw bytes.
///
/// # Examples
///
/// ```
/// use dbvc_core::ObjectId;
///
/// let id = ObjectId::from_bytes([0xab; 32]);
/// assert_eq!(id.as_hex().len(), 64);
/// assert_eq!(id.short(), "abababa");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// The length of an ObjectId in bytes.
    pub const LEN: usize = 32;

    /// The length of an ObjectId as a hex string.
    pub const HEX_LEN: usize = 64;

    /// Length of the abbreviated form used in logs and CLI output.
    pub const SHORT_LEN: usize = 7;

    /// Creates an ObjectId from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying hash bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns this ObjectId as a lowercase hex string.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the abbreviated hex form.
    pub fn short(&self) -> String {
        self.as_hex()[..Self::SHORT_LEN].to_string()
    }

    /// Returns the shard prefix (first 2 hex characters).
    ///
    /// Used for directory sharding in the object store:
    /// `.dbvc/objects/{shard}/{full_hex}`
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Parses an ObjectId from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `DbvcError::InvalidHex` if the string is not valid hex
    /// or is not exactly 64 characters long.
    ///
    /// # Examples
    ///
    /// ```
    /// use dbvc_core::ObjectId;
    ///
    /// let hex = "a".repeat(64);
    /// let id = ObjectId::from_hex(&hex).unwrap();
    /// assert_eq!(id.as_hex(), hex);
    /// ```
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::HEX_LEN {
            return Err(DbvcError::InvalidHex(format!(
                "expected {} hex chars, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }

        let bytes = hex::decode(s).map_err(|e| DbvcError::InvalidHex(e.to_string()))?;

        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DbvcError::InvalidHex("invalid length".to_string()))?;

        Ok(Self(arr))
    }

    /// True if `prefix` is a (case-insensitive) prefix of the hex form.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.as_hex().starts_with(&prefix.to_ascii_lowercase())
    }

    /// Computes the id of a payload of the given kind.
    pub(crate) fn hash_object(kind: ObjectKind, payload: &[u8]) -> Self {
        let canonical = canonical_bytes(kind, payload);
        Self::from_bytes(*blake3::hash(&canonical).as_bytes())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({}...)", &self.as_hex()[..12])
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.as_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            struct HexVisitor;

            impl Visitor<'_> for HexVisitor {
                type Value = ObjectId;

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("a 64 character hex object id")
                }

                fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<ObjectId, E> {
                    ObjectId::from_hex(v).map_err(E::custom)
                }
            }

            deserializer.deserialize_str(HexVisitor)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(ObjectId)
        }
    }
}

/// Object kind discriminant for the canonical envelope.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Commit header.
    Commit = 1,
    /// Database snapshot (the commit's tree).
    Snapshot = 2,
}

impl ObjectKind {
    pub(crate) fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Commit),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }
}

/// Canonical envelope magic bytes.
pub(crate) const MAGIC: &[u8; 5] = b"DBVC1";

/// Size of the envelope header preceding the payload.
pub(crate) const HEADER_LEN: usize = 5 + 1 + 8;

/// Constructs canonical bytes for hashing.
///
/// Format:
/// - Magic: "DBVC1" (5 bytes)
/// - Kind: u8 (1 byte)
/// - Length: u64 LE (8 bytes)
/// - Payload: variable bytes
pub(crate) fn canonical_bytes(kind: ObjectKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(kind as u8);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encodes a value with postcard and returns `(id, payload)`.
pub(crate) fn encode_object<T: Serialize + ?Sized>(
    kind: ObjectKind,
    value: &T,
) -> Result<(ObjectId, Vec<u8>)> {
    let payload =
        postcard::to_allocvec(value).map_err(|e| DbvcError::Serialization(e.to_string()))?;
    Ok((ObjectId::hash_object(kind, &payload), payload))
}
