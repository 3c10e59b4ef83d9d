//! Item model
//!
//! This module defines the canonical in-memory shape of one scraped item and
//! of a pending schema change:
//!
//! - `AnnotatedValue`: a value paired with a human-readable annotation that is
//!   persisted as a column comment, never as data
//! - `Record`: ordered field name to value mapping produced by the normalizer
//! - `SchemaChange`: an additive alteration computed by the reconciler
//! - `DedupRule`: field mapping used to find an existing document to update
//! - `WriteOutcome`: the terminal state of one write call

mod normalize;

pub use normalize::{normalize, ItemInput, Normalized, ShapeDiagnostic, StructuredItem};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A scraped value with its human-readable description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedValue {
    pub value: Value,
    pub annotation: String,
}

impl AnnotatedValue {
    pub fn new(value: impl Into<Value>, annotation: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            annotation: annotation.into(),
        }
    }
}

/// One field of a record: either a bare value or an annotated one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Annotated(AnnotatedValue),
    Raw(Value),
}

impl FieldValue {
    pub fn value(&self) -> &Value {
        match self {
            FieldValue::Annotated(a) => &a.value,
            FieldValue::Raw(v) => v,
        }
    }

    /// The annotation, empty for raw values
    pub fn annotation(&self) -> &str {
        match self {
            FieldValue::Annotated(a) => &a.annotation,
            FieldValue::Raw(_) => "",
        }
    }
}

impl From<AnnotatedValue> for FieldValue {
    fn from(value: AnnotatedValue) -> Self {
        FieldValue::Annotated(value)
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Raw(value)
    }
}

/// Canonical record: field names are unique and map 1:1 to destination
/// column or document field names. Insertion order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, returning the value it replaced if the name was taken
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field name to annotation, empty where the producer supplied none
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.annotation().to_string()))
            .collect()
    }

    /// The record's values as a JSON object, annotations dropped
    pub fn to_document(&self) -> serde_json::Map<String, Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.value().clone()))
            .collect()
    }
}

/// Destination table name and its table-level comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default)]
    pub comment: String,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: comment.into(),
        }
    }

    /// A descriptor with no table comment
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }
}

/// Kind of additive schema alteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The table does not exist yet
    CreateTable,
    /// The table exists but lacks some of the record's fields
    AddColumns,
}

/// A pending, strictly additive modification of a relational table
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChange {
    pub kind: ChangeKind,
    /// The fields to create, with the values used for type inference
    pub fields: Record,
    /// Comment for each field in `fields`
    pub annotations: BTreeMap<String, String>,
    pub target: TableDescriptor,
    /// Whether the source record came from a fixed-shape structured item
    pub structured: bool,
}

impl SchemaChange {
    pub fn field_names(&self) -> Vec<String> {
        self.fields.names().map(str::to_string).collect()
    }

    /// Comment to persist for `field`; the field name stands in for an empty
    /// annotation so that no created column goes uncommented
    pub fn comment_for<'a>(&'a self, field: &'a str) -> &'a str {
        match self.annotations.get(field) {
            Some(c) if !c.is_empty() => c,
            _ => field,
        }
    }
}

/// Maps a stored document's field (left) to the incoming record's field
/// (right) whose value identifies the document to update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRule {
    pairs: IndexMap<String, String>,
}

impl DedupRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule with a single `stored_field == record[record_field]` condition
    pub fn single(stored_field: impl Into<String>, record_field: impl Into<String>) -> Self {
        let mut rule = Self::new();
        rule.insert(stored_field, record_field);
        rule
    }

    pub fn insert(&mut self, stored_field: impl Into<String>, record_field: impl Into<String>) {
        self.pairs.insert(stored_field.into(), record_field.into());
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `(stored_field, record_field)` pairs in declaration order
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DedupRule {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut rule = Self::new();
        for (k, v) in iter {
            rule.insert(k, v);
        }
        rule
    }
}

/// Why a write was skipped without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A plain insert hit an existing unique key
    DuplicateKey(String),
    /// The record had no fields to write
    EmptyRecord,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DuplicateKey(detail) => write!(f, "duplicate key: {}", detail),
            SkipReason::EmptyRecord => write!(f, "empty record"),
        }
    }
}

/// Terminal state of one write call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    Skipped(SkipReason),
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOutcome::Inserted => write!(f, "inserted"),
            WriteOutcome::Updated => write!(f, "updated"),
            WriteOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_preserves_order_and_annotations() {
        let mut record = Record::new();
        record.insert("title", AnnotatedValue::new("hi", "标题"));
        record.insert("views", json!(5));

        assert_eq!(record.names().collect::<Vec<_>>(), vec!["title", "views"]);
        let notes = record.annotations();
        assert_eq!(notes["title"], "标题");
        assert_eq!(notes["views"], "");
        assert_eq!(record.to_document()["title"], json!("hi"));
    }

    #[test]
    fn test_comment_falls_back_to_field_name() {
        let mut fields = Record::new();
        fields.insert("likes", json!(0));
        let change = SchemaChange {
            kind: ChangeKind::AddColumns,
            annotations: fields.annotations(),
            fields,
            target: TableDescriptor::named("posts"),
            structured: false,
        };
        assert_eq!(change.comment_for("likes"), "likes");
    }

    #[test]
    fn test_dedup_rule_pairs() {
        let rule: DedupRule = [("url", "_url")].into_iter().collect();
        assert_eq!(rule.pairs().collect::<Vec<_>>(), vec![("url", "_url")]);
        assert_eq!(DedupRule::single("url", "_url"), rule);
    }

    #[test]
    fn test_outcome_display() {
        let skipped = WriteOutcome::Skipped(SkipReason::EmptyRecord);
        assert_eq!(skipped.to_string(), "skipped (empty record)");
        assert_eq!(WriteOutcome::Updated.to_string(), "updated");
    }
}
