//! Relational table repository
//!
//! Applies additive schema changes and writes single records to a table of
//! the relational store. Errors are mapped to `PipelineError` with the
//! destination identity, the table and the offending fields attached.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, ErrorCode, Transaction, TransactionBehavior};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::database::core::{is_interrupted, ConnectionIdentity, SchemaManager};
use crate::error::{PipelineError, PipelineResult};
use crate::item::{ChangeKind, Record, SchemaChange, SkipReason, WriteOutcome};
use crate::schema::{Dialect, InsertMode, TableOptions};

/// Convert a scraped value to a SQLite value
///
/// Nested arrays and objects are stored as their JSON text.
pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else if n.is_u64() {
                SqlValue::Text(n.to_string())
            } else {
                n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null)
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Whether a DDL error reports an object that a concurrent writer created
///
/// Only the error matching the statement kind counts: a `CREATE TABLE`
/// rejected for a duplicate column is a malformed table, not a race.
fn is_already_exists(kind: ChangeKind, err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => match kind {
            ChangeKind::CreateTable => msg.contains("already exists"),
            ChangeKind::AddColumns => msg.contains("duplicate column name"),
        },
        _ => false,
    }
}

/// Whether an insert failed on a unique or primary key
fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// Repository for one destination table
pub struct RelationalTable<'a> {
    conn: &'a Connection,
    identity: &'a ConnectionIdentity,
    table: &'a str,
}

impl<'a> RelationalTable<'a> {
    pub fn new(conn: &'a Connection, identity: &'a ConnectionIdentity, table: &'a str) -> Self {
        Self {
            conn,
            identity,
            table,
        }
    }

    fn timeout(&self, operation: &str) -> PipelineError {
        PipelineError::Timeout {
            identity: self.identity.to_string(),
            operation: format!("{} on '{}'", operation, self.table),
        }
    }

    fn schema_error(&self, fields: Vec<String>, err: rusqlite::Error) -> PipelineError {
        if is_interrupted(&err) {
            return self.timeout("schema change");
        }
        PipelineError::SchemaApply {
            identity: self.identity.to_string(),
            table: self.table.to_string(),
            fields,
            detail: err.to_string(),
        }
    }

    fn write_error(&self, record: &Record, err: rusqlite::Error) -> PipelineError {
        if is_interrupted(&err) {
            return self.timeout("insert");
        }
        PipelineError::Write {
            identity: self.identity.to_string(),
            table: self.table.to_string(),
            fields: record.names().map(str::to_string).collect(),
            detail: err.to_string(),
        }
    }

    /// Live column set, `None` when the table does not exist
    pub fn live_columns(&self) -> PipelineResult<Option<BTreeSet<String>>> {
        SchemaManager::new(self.conn)
            .columns(self.table)
            .map_err(|e| {
                if is_interrupted(&e) {
                    self.timeout("schema introspection")
                } else {
                    PipelineError::connection(self.identity.as_str(), e)
                }
            })
    }

    /// Apply an additive change, treating "already exists" as success
    ///
    /// The DDL and the catalog comments commit together.
    pub fn apply_change(&self, change: &SchemaChange, options: &TableOptions) -> PipelineResult<()> {
        let fields = change.field_names();
        let schema = SchemaManager::new(self.conn);

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(|e| self.schema_error(fields.clone(), e))?;

        schema
            .ensure_catalog()
            .map_err(|e| self.schema_error(fields.clone(), e))?;

        for stmt in Dialect::Sqlite.render_change(change, options) {
            match tx.execute(&stmt, []) {
                Ok(_) => debug!("{}", stmt),
                Err(e) if is_already_exists(change.kind, &e) => {
                    warn!(
                        "{} on {} was applied concurrently: {}",
                        self.table, self.identity, e
                    );
                }
                Err(e) => return Err(self.schema_error(fields, e)),
            }
        }

        if change.kind == ChangeKind::CreateTable && !change.target.comment.is_empty() {
            schema
                .set_comment(self.table, "", &change.target.comment)
                .map_err(|e| self.schema_error(fields.clone(), e))?;
        }
        for field in &fields {
            schema
                .set_comment(self.table, field, change.comment_for(field))
                .map_err(|e| self.schema_error(fields.clone(), e))?;
        }

        tx.commit().map_err(|e| self.schema_error(fields.clone(), e))?;

        match change.kind {
            ChangeKind::CreateTable => info!(
                "Created table '{}' on {} with {} fields",
                self.table,
                self.identity,
                fields.len()
            ),
            ChangeKind::AddColumns => info!(
                "Added columns [{}] to '{}' on {}",
                fields.join(", "),
                self.table,
                self.identity
            ),
        }
        Ok(())
    }

    /// Insert one record
    ///
    /// With `upsert`, a key conflict updates the existing row and yields
    /// `Updated`. Without it, a key conflict yields
    /// `Skipped(DuplicateKey)`.
    pub fn insert(&self, record: &Record, upsert: bool) -> PipelineResult<WriteOutcome> {
        if record.is_empty() {
            return Ok(WriteOutcome::Skipped(SkipReason::EmptyRecord));
        }

        let columns: Vec<&str> = record.names().collect();
        let values: Vec<SqlValue> = record.iter().map(|(_, v)| to_sql_value(v.value())).collect();

        if !upsert {
            let sql = Dialect::Sqlite.render_insert(self.table, &columns, InsertMode::Plain);
            return match self.conn.execute(&sql, params_from_iter(values.iter())) {
                Ok(_) => Ok(WriteOutcome::Inserted),
                Err(e) if is_duplicate_key(&e) => {
                    Ok(WriteOutcome::Skipped(SkipReason::DuplicateKey(e.to_string())))
                }
                Err(e) => Err(self.write_error(record, e)),
            };
        }

        // Try a conflict-free insert first; only when it inserted nothing does
        // the conflicting row get updated. Both run in one immediate
        // transaction so no other writer slips in between.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(|e| self.write_error(record, e))?;

        let ignore_sql =
            Dialect::Sqlite.render_insert(self.table, &columns, InsertMode::IgnoreConflicts);
        let inserted = tx
            .execute(&ignore_sql, params_from_iter(values.iter()))
            .map_err(|e| self.write_error(record, e))?;

        let outcome = if inserted > 0 {
            WriteOutcome::Inserted
        } else {
            let upsert_sql = Dialect::Sqlite.render_insert(self.table, &columns, InsertMode::Upsert);
            tx.execute(&upsert_sql, params_from_iter(values.iter()))
                .map_err(|e| self.write_error(record, e))?;
            WriteOutcome::Updated
        };

        tx.commit().map_err(|e| self.write_error(record, e))?;
        Ok(outcome)
    }
}
