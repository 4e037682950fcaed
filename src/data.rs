//! The key-value payload passed into and out of every stage.
//!
//! [`Data`] is an immutable mapping from string keys to primitive
//! [`DataValue`]s. It is the only thing that crosses a stage boundary, which
//! keeps results persistable by any scheduler regardless of what the stage
//! does internally.
//!
//! Absence is never an error at construction time. A stage declares the keys
//! it needs with a [`DataSchema`] and validates its input on entry.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::MAX_DATA_BYTES;
use crate::error::{Error, Result};

/// A single primitive value stored in [`Data`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataValue {
    /// UTF-8 string.
    String(String),
    /// Signed 64-bit integer.
    Int(i64),
    /// Boolean flag.
    Bool(bool),
    /// Raw byte blob.
    Bytes(Vec<u8>),
}

impl DataValue {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Int(_) => ValueKind::Int,
            Self::Bool(_) => ValueKind::Bool,
            Self::Bytes(_) => ValueKind::Bytes,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
            Self::Int(_) | Self::Bool(_) => false,
        }
    }
}

/// The kind of a [`DataValue`], used by [`DataSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// [`DataValue::String`]
    String,
    /// [`DataValue::Int`]
    Int,
    /// [`DataValue::Bool`]
    Bool,
    /// [`DataValue::Bytes`]
    Bytes,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Bool => write!(f, "bool"),
            Self::Bytes => write!(f, "bytes"),
        }
    }
}

/// Immutable string-keyed payload used as a stage's input and output.
///
/// # Examples
///
/// ```
/// use taskchain::Data;
///
/// let data = Data::builder()
///     .put_string("uri", "file:///tmp/in.png")
///     .put_int("level", 3)
///     .build()
///     .unwrap();
///
/// assert_eq!(data.get_string("uri"), Some("file:///tmp/in.png"));
/// assert_eq!(data.get_int("level"), Some(3));
/// assert_eq!(data.get_bool("missing"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Data {
    values: BTreeMap<String, DataValue>,
}

impl Data {
    /// An empty payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Starts building a payload.
    pub fn builder() -> DataBuilder {
        DataBuilder::default()
    }

    /// Raw value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.values.get(key)
    }

    /// String value for `key`, if present and a string.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(DataValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// String value for `key`, treating the empty string as absent.
    pub fn get_non_empty_string(&self, key: &str) -> Option<&str> {
        self.get_string(key).filter(|s| !s.is_empty())
    }

    /// Integer value for `key`, if present and an integer.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(DataValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Boolean value for `key`, if present and a boolean.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(DataValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Byte value for `key`, if present and a blob.
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.values.get(key) {
            Some(DataValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// Returns `true` if `key` is present (with any value).
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the payload has no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Persisted size: the length of the payload's JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the payload cannot be encoded.
    pub fn size_in_bytes(&self) -> Result<usize> {
        Ok(serde_json::to_vec(self)?.len())
    }

    /// Returns a copy of `self` with every entry of `top` laid over it.
    ///
    /// Keys present in both take `top`'s value.
    #[must_use]
    pub fn overlay(&self, top: &Data) -> Data {
        let mut values = self.values.clone();
        values.extend(top.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Data { values }
    }

    /// Merges the outputs of several predecessor stages into one input.
    ///
    /// `inputs` must be in predecessor declaration order.
    ///
    /// # Errors
    ///
    /// With [`MergePolicy::RejectConflicts`], returns [`MergeConflict`] for
    /// the first key two inputs disagree on.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskchain::{Data, MergePolicy};
    ///
    /// let a = Data::builder().put_string("uri", "a").build().unwrap();
    /// let b = Data::builder().put_string("uri", "b").build().unwrap();
    ///
    /// let merged = Data::merge(&[a.clone(), b.clone()], MergePolicy::Overwrite).unwrap();
    /// assert_eq!(merged.get_string("uri"), Some("b"));
    ///
    /// assert!(Data::merge(&[a, b], MergePolicy::RejectConflicts).is_err());
    /// ```
    pub fn merge(inputs: &[Data], policy: MergePolicy) -> std::result::Result<Data, MergeConflict> {
        let mut values: BTreeMap<String, DataValue> = BTreeMap::new();
        for input in inputs {
            for (key, value) in &input.values {
                if policy == MergePolicy::RejectConflicts {
                    if let Some(existing) = values.get(key) {
                        if existing != value {
                            return Err(MergeConflict { key: key.clone() });
                        }
                    }
                }
                values.insert(key.clone(), value.clone());
            }
        }
        Ok(Data { values })
    }
}

/// Builder for [`Data`].
#[derive(Debug, Clone, Default)]
pub struct DataBuilder {
    values: BTreeMap<String, DataValue>,
}

impl DataBuilder {
    /// Stores a string value.
    #[must_use]
    pub fn put_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values
            .insert(key.into(), DataValue::String(value.into()));
        self
    }

    /// Stores an integer value.
    #[must_use]
    pub fn put_int(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), DataValue::Int(value));
        self
    }

    /// Stores a boolean value.
    #[must_use]
    pub fn put_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.values.insert(key.into(), DataValue::Bool(value));
        self
    }

    /// Stores a byte blob.
    #[must_use]
    pub fn put_bytes(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.values
            .insert(key.into(), DataValue::Bytes(value.into()));
        self
    }

    /// Copies every entry of `data`, replacing existing keys.
    #[must_use]
    pub fn put_all(mut self, data: &Data) -> Self {
        self.values
            .extend(data.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Finishes the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataTooLarge`] if the payload exceeds
    /// [`MAX_DATA_BYTES`].
    pub fn build(self) -> Result<Data> {
        let data = Data {
            values: self.values,
        };
        let actual_bytes = data.size_in_bytes()?;
        if actual_bytes > MAX_DATA_BYTES {
            return Err(Error::DataTooLarge {
                limit_bytes: MAX_DATA_BYTES,
                actual_bytes,
            });
        }
        Ok(data)
    }
}

/// How a stage with several predecessors combines their outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Union of all outputs; the later predecessor wins on a shared key.
    #[default]
    Overwrite,
    /// Union of all outputs; two predecessors disagreeing on a key fail the stage.
    RejectConflicts,
}

/// Two predecessor outputs disagree on `key`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("predecessor outputs conflict on key '{key}'")]
pub struct MergeConflict {
    /// The conflicting key.
    pub key: String,
}

/// A key a stage requires in its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredKey {
    /// The input key.
    pub key: String,
    /// The expected value kind.
    pub kind: ValueKind,
    /// Whether an empty string or blob counts as present.
    pub allow_empty: bool,
}

/// The keys a stage requires, checked once on entry.
///
/// # Examples
///
/// ```
/// use taskchain::{Data, DataSchema};
///
/// let schema = DataSchema::new().require_non_empty_string("uri");
///
/// assert!(schema.validate(&Data::empty()).is_err());
///
/// let input = Data::builder().put_string("uri", "file:///x.png").build().unwrap();
/// assert!(schema.validate(&input).is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSchema {
    required: Vec<RequiredKey>,
}

impl DataSchema {
    /// A schema with no requirements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `key` to hold a value of `kind` (empty values allowed).
    #[must_use]
    pub fn require(mut self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.required.push(RequiredKey {
            key: key.into(),
            kind,
            allow_empty: true,
        });
        self
    }

    /// Requires `key` to hold a non-empty string.
    #[must_use]
    pub fn require_non_empty_string(mut self, key: impl Into<String>) -> Self {
        self.required.push(RequiredKey {
            key: key.into(),
            kind: ValueKind::String,
            allow_empty: false,
        });
        self
    }

    /// The declared requirements.
    pub fn required(&self) -> &[RequiredKey] {
        &self.required
    }

    /// Checks `data` against every requirement, reporting the first violation.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaViolation`] naming the missing, mistyped or empty key.
    pub fn validate(&self, data: &Data) -> std::result::Result<(), SchemaViolation> {
        for requirement in &self.required {
            let Some(value) = data.get(&requirement.key) else {
                return Err(SchemaViolation::new(&requirement.key, "is missing"));
            };
            if value.kind() != requirement.kind {
                return Err(SchemaViolation::new(
                    &requirement.key,
                    format!("expected {} but found {}", requirement.kind, value.kind()),
                ));
            }
            if !requirement.allow_empty && value.is_empty() {
                return Err(SchemaViolation::new(&requirement.key, "is empty"));
            }
        }
        Ok(())
    }
}

/// A stage input failed its [`DataSchema`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("input key '{key}' {reason}")]
pub struct SchemaViolation {
    /// The offending key.
    pub key: String,
    /// What is wrong with it.
    pub reason: String,
}

impl SchemaViolation {
    fn new(key: &str, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn uri(value: &str) -> Data {
        Data::builder().put_string("uri", value).build().unwrap()
    }

    #[test]
    fn typed_getters_ignore_other_kinds() {
        let data = Data::builder()
            .put_string("s", "x")
            .put_int("i", 7)
            .put_bool("b", true)
            .put_bytes("raw", vec![1, 2, 3])
            .build()
            .unwrap();

        assert_eq!(data.get_string("s"), Some("x"));
        assert_eq!(data.get_int("s"), None);
        assert_eq!(data.get_int("i"), Some(7));
        assert_eq!(data.get_bool("b"), Some(true));
        assert_eq!(data.get_bytes("raw"), Some(&[1u8, 2, 3][..]));
        assert_eq!(data.len(), 4);
    }

    #[test]
    fn empty_string_is_absent_for_non_empty_getter() {
        let data = uri("");
        assert_eq!(data.get_string("uri"), Some(""));
        assert_eq!(data.get_non_empty_string("uri"), None);
    }

    #[test]
    fn build_rejects_oversized_payload() {
        let result = Data::builder()
            .put_bytes("blob", vec![0u8; MAX_DATA_BYTES + 1])
            .build();
        assert!(matches!(result, Err(Error::DataTooLarge { .. })));
    }

    #[test]
    fn size_is_the_json_encoding_length() {
        let data = Data::builder()
            .put_string("uri", "file:///a.png")
            .put_int("level", 3)
            .build()
            .unwrap();
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(data.size_in_bytes().unwrap(), json.len());
        assert_eq!(Data::empty().size_in_bytes().unwrap(), "{}".len());
    }

    #[test]
    fn limit_counts_encoding_overhead() {
        // Byte blobs encode as number arrays, so a blob well under the raw
        // limit still overflows once encoded.
        let result = Data::builder()
            .put_bytes("blob", vec![255u8; MAX_DATA_BYTES / 2])
            .build();
        match result {
            Err(Error::DataTooLarge {
                limit_bytes,
                actual_bytes,
            }) => {
                assert_eq!(limit_bytes, MAX_DATA_BYTES);
                assert!(actual_bytes > MAX_DATA_BYTES);
            },
            other => panic!("expected DataTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn overlay_prefers_top() {
        let base = Data::builder()
            .put_string("uri", "old")
            .put_int("level", 1)
            .build()
            .unwrap();
        let merged = base.overlay(&uri("new"));
        assert_eq!(merged.get_string("uri"), Some("new"));
        assert_eq!(merged.get_int("level"), Some(1));
    }

    #[test]
    fn merge_overwrite_is_last_writer_wins() {
        let merged = Data::merge(&[uri("a"), uri("b"), uri("c")], MergePolicy::Overwrite).unwrap();
        assert_eq!(merged.get_string("uri"), Some("c"));
    }

    #[test]
    fn merge_reject_conflicts_allows_agreeing_keys() {
        let merged =
            Data::merge(&[uri("same"), uri("same")], MergePolicy::RejectConflicts).unwrap();
        assert_eq!(merged.get_string("uri"), Some("same"));

        let err = Data::merge(&[uri("a"), uri("b")], MergePolicy::RejectConflicts).unwrap_err();
        assert_eq!(err.key, "uri");
    }

    #[test]
    fn schema_reports_missing_mistyped_and_empty() {
        let schema = DataSchema::new().require_non_empty_string("uri");

        let err = schema.validate(&Data::empty()).unwrap_err();
        assert_eq!(err.reason, "is missing");

        let mistyped = Data::builder().put_int("uri", 1).build().unwrap();
        let err = schema.validate(&mistyped).unwrap_err();
        assert!(err.reason.contains("expected string"));

        let err = schema.validate(&uri("")).unwrap_err();
        assert_eq!(err.reason, "is empty");
    }

    #[test]
    fn schema_allows_empty_when_declared() {
        let schema = DataSchema::new().require("note", ValueKind::String);
        let data = Data::builder().put_string("note", "").build().unwrap();
        assert!(schema.validate(&data).is_ok());
    }

    #[test]
    fn data_serializes_as_tagged_map() {
        let json = serde_json::to_value(uri("file:///a.png")).unwrap();
        assert_eq!(json["uri"]["type"], "string");
        assert_eq!(json["uri"]["value"], "file:///a.png");
    }
}
