//! Shape normalization
//!
//! Producers hand items over in one of three shapes. `normalize` folds each
//! of them into a `Record` so the rest of the pipeline never looks at the
//! input shape again.

use serde_json::Value;
use tracing::warn;

use super::{AnnotatedValue, FieldValue, Record, TableDescriptor};
use crate::error::{PipelineError, PipelineResult};

/// A fixed-shape item of annotated fields with its own table descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredItem {
    pub table: TableDescriptor,
    pub fields: Vec<(String, AnnotatedValue)>,
}

impl StructuredItem {
    pub fn new(table: TableDescriptor) -> Self {
        Self {
            table,
            fields: Vec::new(),
        }
    }

    /// Append a field (builder style)
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>, annotation: impl Into<String>) -> Self {
        self.fields
            .push((name.into(), AnnotatedValue::new(value, annotation)));
        self
    }
}

/// The accepted producer input shapes
#[derive(Debug, Clone, PartialEq)]
pub enum ItemInput {
    /// Free-form mapping whose values carry annotations
    Annotated {
        table: String,
        fields: Vec<(String, AnnotatedValue)>,
    },
    /// Fixed-shape structured item
    Structured(StructuredItem),
    /// Free-form mapping of bare values
    Plain {
        table: String,
        fields: Vec<(String, Value)>,
    },
}

impl ItemInput {
    /// Destination table or collection name
    pub fn table_name(&self) -> &str {
        match self {
            ItemInput::Annotated { table, .. } | ItemInput::Plain { table, .. } => table,
            ItemInput::Structured(item) => &item.table.name,
        }
    }
}

/// Something the normalizer tolerated but wants the caller to know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeDiagnostic {
    /// The same field name appeared more than once; the later entry won
    DuplicateField {
        field: String,
        kept_annotation: String,
        dropped_annotation: String,
    },
}

/// Output of `normalize`
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: Record,
    pub target: TableDescriptor,
    pub structured: bool,
    pub diagnostics: Vec<ShapeDiagnostic>,
}

/// Fold any accepted input shape into a canonical record
///
/// Empty table or field names are rejected. A duplicated field name is not an
/// error: the later entry replaces the earlier one and a diagnostic is
/// recorded.
pub fn normalize(input: ItemInput) -> PipelineResult<Normalized> {
    let (target, structured, entries): (TableDescriptor, bool, Vec<(String, FieldValue)>) =
        match input {
            ItemInput::Annotated { table, fields } => (
                TableDescriptor::named(table),
                false,
                fields.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
            ItemInput::Structured(item) => (
                item.table,
                true,
                item.fields.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
            ItemInput::Plain { table, fields } => (
                TableDescriptor::named(table),
                false,
                fields.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        };

    if target.name.trim().is_empty() {
        return Err(PipelineError::shape("", "destination name is empty"));
    }

    let mut record = Record::new();
    let mut diagnostics = Vec::new();

    for (position, (name, value)) in entries.into_iter().enumerate() {
        if name.trim().is_empty() {
            return Err(PipelineError::shape(
                &target.name,
                format!("field #{} has an empty name", position),
            ));
        }

        let kept_annotation = value.annotation().to_string();
        if let Some(previous) = record.insert(name.clone(), value) {
            warn!(
                "duplicate field '{}' in item for '{}', keeping the later entry",
                name, target.name
            );
            diagnostics.push(ShapeDiagnostic::DuplicateField {
                field: name,
                kept_annotation,
                dropped_annotation: previous.annotation().to_string(),
            });
        }
    }

    Ok(Normalized {
        record,
        target,
        structured,
        diagnostics,
    })
}
