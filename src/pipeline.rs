//! Write coordination
//!
//! A writer takes one producer item through the whole pipeline:
//!
//! ```text
//! ItemInput -> normalize -> Record
//!   relational: introspect -> reconcile -> apply (under the DDL lock) -> insert
//!   document:   match on the dedup rule -> partial update | insert
//! ```
//!
//! Writers receive the `ConnectionRegistry` through their constructors and
//! are safe to share between producer threads.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::database::core::{ConnectionIdentity, ConnectionRegistry, Deadline, PoolOptions};
use crate::database::{DocumentCollection, RelationalTable};
use crate::error::{PipelineError, PipelineResult};
use crate::item::{normalize, DedupRule, ItemInput, ShapeDiagnostic, SkipReason, WriteOutcome};
use crate::schema::{case_collisions, reconcile, TableOptions};

/// Schema apply rounds per write before missing columns are an error
const APPLY_ROUNDS: usize = 2;

/// Per-call write options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Abort checkout and in-flight statements after this long
    pub deadline: Option<Duration>,
}

impl WriteOptions {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

/// Outcome of one write plus what the normalizer tolerated on the way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub outcome: WriteOutcome,
    pub diagnostics: Vec<ShapeDiagnostic>,
}

impl WriteReport {
    fn new(outcome: WriteOutcome, diagnostics: Vec<ShapeDiagnostic>) -> Self {
        Self {
            outcome,
            diagnostics,
        }
    }
}

/// A destination that accepts producer items
pub trait ItemSink: Send + Sync {
    /// Normalize and persist one item, reporting normalizer diagnostics
    fn write_report(
        &self,
        input: ItemInput,
        dedup: Option<&DedupRule>,
        options: &WriteOptions,
    ) -> PipelineResult<WriteReport>;

    /// Normalize and persist one item
    ///
    /// Diagnostics such as a collapsed duplicate field are only logged; use
    /// `write_report` to receive them.
    fn write(
        &self,
        input: ItemInput,
        dedup: Option<&DedupRule>,
        options: &WriteOptions,
    ) -> PipelineResult<WriteOutcome> {
        self.write_report(input, dedup, options)
            .map(|report| report.outcome)
    }
}

/// Settings of a relational destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationalSettings {
    pub identity: ConnectionIdentity,
    pub pool: PoolOptions,
    /// Only shapes rendered MySQL DDL
    pub table: TableOptions,
    /// Update the conflicting row instead of skipping on a key conflict
    pub upsert: bool,
    /// Surface key conflicts of plain inserts as `DuplicateKey` errors
    pub strict: bool,
}

impl RelationalSettings {
    pub fn new(identity: ConnectionIdentity) -> Self {
        Self {
            identity,
            pool: PoolOptions::default(),
            table: TableOptions::default(),
            upsert: false,
            strict: false,
        }
    }
}

/// Writes items to tables of a relational store, growing their schema as
/// needed
pub struct RelationalWriter {
    registry: Arc<ConnectionRegistry>,
    settings: RelationalSettings,
}

impl RelationalWriter {
    pub fn new(registry: Arc<ConnectionRegistry>, settings: RelationalSettings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &RelationalSettings {
        &self.settings
    }
}

impl ItemSink for RelationalWriter {
    fn write_report(
        &self,
        input: ItemInput,
        dedup: Option<&DedupRule>,
        options: &WriteOptions,
    ) -> PipelineResult<WriteReport> {
        let normalized = normalize(input)?;
        let record = &normalized.record;
        let target = &normalized.target;
        let diagnostics = normalized.diagnostics.clone();

        if record.is_empty() {
            return Ok(WriteReport::new(
                WriteOutcome::Skipped(SkipReason::EmptyRecord),
                diagnostics,
            ));
        }

        let collisions = case_collisions(record);
        if !collisions.is_empty() {
            return Err(PipelineError::SchemaApply {
                identity: self.settings.identity.to_string(),
                table: target.name.clone(),
                fields: collisions,
                detail: "field names differ only in case and would share a column".to_string(),
            });
        }

        if dedup.is_some() {
            debug!(
                "dedup rule ignored for relational table '{}', key conflicts are resolved by the store",
                target.name
            );
        }

        let deadline = Deadline::from_timeout(options.deadline);
        let pooled = self
            .registry
            .acquire(&self.settings.identity, &self.settings.pool)?;
        let conn = pooled.get(&deadline)?;
        let _watch = deadline.watch(&conn);

        let table = RelationalTable::new(&conn, pooled.identity(), &target.name);

        let live = table.live_columns()?;
        if reconcile(record, target, live.as_ref(), normalized.structured).is_some() {
            let _ddl = pooled.ddl_guard();
            // Re-read the schema under the lock: another writer may have
            // applied the change already. A second round covers a table that
            // a concurrent creator made with fewer columns.
            for round in 0..=APPLY_ROUNDS {
                let live = table.live_columns()?;
                let Some(change) = reconcile(record, target, live.as_ref(), normalized.structured)
                else {
                    break;
                };
                if round == APPLY_ROUNDS {
                    return Err(PipelineError::SchemaApply {
                        identity: pooled.identity().to_string(),
                        table: target.name.clone(),
                        fields: change.field_names(),
                        detail: format!("columns still missing after {} schema changes", APPLY_ROUNDS),
                    });
                }
                table.apply_change(&change, &self.settings.table)?;
            }
        }

        let outcome = table.insert(record, self.settings.upsert)?;
        debug!("{} into '{}' on {}", outcome, target.name, pooled.identity());

        match outcome {
            WriteOutcome::Skipped(SkipReason::DuplicateKey(detail)) if self.settings.strict => {
                Err(PipelineError::DuplicateKey {
                    identity: pooled.identity().to_string(),
                    table: target.name.clone(),
                    detail,
                })
            }
            outcome => Ok(WriteReport::new(outcome, diagnostics)),
        }
    }
}

/// Settings of a document destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSettings {
    pub identity: ConnectionIdentity,
    pub pool: PoolOptions,
    /// Prepended to every item's table name to form the collection name
    pub collection_prefix: String,
}

impl DocumentSettings {
    pub fn new(identity: ConnectionIdentity) -> Self {
        Self {
            identity,
            pool: PoolOptions::default(),
            collection_prefix: String::new(),
        }
    }
}

/// Writes items to document collections, updating instead of inserting
/// when a dedup rule matches an existing document
pub struct DocumentWriter {
    registry: Arc<ConnectionRegistry>,
    settings: DocumentSettings,
}

impl DocumentWriter {
    pub fn new(registry: Arc<ConnectionRegistry>, settings: DocumentSettings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &DocumentSettings {
        &self.settings
    }

    pub fn collection_name(&self, table: &str) -> String {
        format!("{}{}", self.settings.collection_prefix, table)
    }
}

impl ItemSink for DocumentWriter {
    fn write_report(
        &self,
        input: ItemInput,
        dedup: Option<&DedupRule>,
        options: &WriteOptions,
    ) -> PipelineResult<WriteReport> {
        let normalized = normalize(input)?;
        let record = &normalized.record;
        let collection = self.collection_name(&normalized.target.name);
        let diagnostics = normalized.diagnostics.clone();

        if record.is_empty() {
            return Ok(WriteReport::new(
                WriteOutcome::Skipped(SkipReason::EmptyRecord),
                diagnostics,
            ));
        }

        // The rule's right-hand side names a field of the incoming record
        let mut filter = Vec::new();
        if let Some(rule) = dedup {
            for (stored_field, record_field) in rule.pairs() {
                let value = record.get(record_field).ok_or_else(|| {
                    PipelineError::shape(
                        &collection,
                        format!(
                            "dedup rule matches '{}' on field '{}', which the item does not have",
                            stored_field, record_field
                        ),
                    )
                })?;
                filter.push((stored_field, value.value()));
            }
        }

        let doc = record.to_document();
        let deadline = Deadline::from_timeout(options.deadline);
        let pooled = self
            .registry
            .acquire(&self.settings.identity, &self.settings.pool)?;
        let conn = pooled.get(&deadline)?;
        let _watch = deadline.watch(&conn);

        let coll = DocumentCollection::new(&conn, pooled.identity(), collection);
        let outcome = if filter.is_empty() {
            coll.ensure()?;
            coll.insert(&doc)?;
            WriteOutcome::Inserted
        } else {
            coll.upsert(&doc, &filter)?
        };

        debug!("{} into '{}' on {}", outcome, coll.name(), pooled.identity());
        Ok(WriteReport::new(outcome, diagnostics))
    }
}
