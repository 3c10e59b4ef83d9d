//! DDL and DML rendering
//!
//! Statements are rendered per dialect. SQLite is the executable dialect of
//! the relational store; MySQL renders the same changes with inline column
//! comments and the configured engine, charset and collation.

use serde::{Deserialize, Serialize};

use super::{ColumnType, DEFAULT_VARCHAR_LEN, MAX_VARCHAR_LEN};
use crate::item::{ChangeKind, SchemaChange};

/// Name of the synthetic key column added to created tables
pub const ID_COLUMN: &str = "id";

/// SQL dialect used for rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Mysql,
}

/// Table-level defaults applied when a table is created
///
/// Only the MySQL dialect renders them; SQLite tables have no engine,
/// charset or collation clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    pub engine: String,
    pub charset: String,
    pub collate: String,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            engine: "InnoDB".to_string(),
            charset: "utf8mb4".to_string(),
            collate: "utf8mb4_general_ci".to_string(),
        }
    }
}

impl Dialect {
    /// Quote an identifier
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
        }
    }

    /// Render a column type
    pub fn column_type(&self, ty: ColumnType) -> String {
        match (self, ty) {
            (Dialect::Sqlite, ColumnType::Integer | ColumnType::BigInt) => "INTEGER".to_string(),
            (Dialect::Sqlite, ColumnType::Double) => "REAL".to_string(),
            (Dialect::Sqlite, ColumnType::Text { .. }) => "TEXT".to_string(),
            (Dialect::Mysql, ColumnType::Integer) => "INT".to_string(),
            (Dialect::Mysql, ColumnType::BigInt) => "BIGINT".to_string(),
            (Dialect::Mysql, ColumnType::Double) => "DOUBLE".to_string(),
            (Dialect::Mysql, ColumnType::Text { observed_len }) => {
                if observed_len > MAX_VARCHAR_LEN {
                    "LONGTEXT".to_string()
                } else {
                    format!("VARCHAR({})", observed_len.max(DEFAULT_VARCHAR_LEN))
                }
            }
        }
    }

    fn column_def(&self, change: &SchemaChange, field: &str) -> String {
        let ty = change
            .fields
            .get(field)
            .map(|v| ColumnType::infer(v.value()))
            .unwrap_or(ColumnType::Text { observed_len: 0 });
        let ident = self.quote_ident(field);
        let sql_type = self.column_type(ty);
        match self {
            Dialect::Sqlite => format!("{} {}", ident, sql_type),
            Dialect::Mysql => format!(
                "{} {} NULL COMMENT {}",
                ident,
                sql_type,
                quote_literal(change.comment_for(field))
            ),
        }
    }

    /// Render the statements applying `change`, in execution order
    ///
    /// A created table gets an auto-increment `id` key unless the record
    /// already carries an `id` field. Added columns are nullable and emitted
    /// one statement each, so a concurrent duplicate can be tolerated per
    /// column.
    pub fn render_change(&self, change: &SchemaChange, options: &TableOptions) -> Vec<String> {
        let table = self.quote_ident(&change.target.name);
        match change.kind {
            ChangeKind::CreateTable => {
                let mut defs = Vec::with_capacity(change.fields.len() + 2);
                if !change.fields.contains(ID_COLUMN) {
                    defs.push(match self {
                        Dialect::Sqlite => {
                            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote_ident(ID_COLUMN))
                        }
                        Dialect::Mysql => format!(
                            "{} INT NOT NULL AUTO_INCREMENT COMMENT 'id'",
                            self.quote_ident(ID_COLUMN)
                        ),
                    });
                }
                for field in change.fields.names() {
                    defs.push(self.column_def(change, field));
                }
                if *self == Dialect::Mysql && !change.fields.contains(ID_COLUMN) {
                    defs.push(format!("PRIMARY KEY ({})", self.quote_ident(ID_COLUMN)));
                }

                let body = defs.join(", ");
                let stmt = match self {
                    Dialect::Sqlite => format!("CREATE TABLE IF NOT EXISTS {} ({})", table, body),
                    Dialect::Mysql => format!(
                        "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE={} DEFAULT CHARSET={} COLLATE={} COMMENT={}",
                        table,
                        body,
                        options.engine,
                        options.charset,
                        options.collate,
                        quote_literal(&change.target.comment)
                    ),
                };
                vec![stmt]
            }
            ChangeKind::AddColumns => change
                .fields
                .names()
                .map(|field| format!("ALTER TABLE {} ADD COLUMN {}", table, self.column_def(change, field)))
                .collect(),
        }
    }

    /// Render a parameterized single-row insert
    pub fn render_insert(&self, table: &str, columns: &[&str], mode: InsertMode) -> String {
        let table = self.quote_ident(table);
        let idents: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        let placeholders: Vec<String> = match self {
            Dialect::Sqlite => (1..=columns.len()).map(|i| format!("?{}", i)).collect(),
            Dialect::Mysql => columns.iter().map(|_| "?".to_string()).collect(),
        };

        let verb = match (self, mode) {
            (Dialect::Sqlite, InsertMode::IgnoreConflicts) => "INSERT OR IGNORE INTO",
            (Dialect::Mysql, InsertMode::IgnoreConflicts) => "INSERT IGNORE INTO",
            _ => "INSERT INTO",
        };
        let mut sql = format!(
            "{} {} ({}) VALUES ({})",
            verb,
            table,
            idents.join(", "),
            placeholders.join(", ")
        );

        if mode == InsertMode::Upsert {
            let updates: Vec<String> = idents
                .iter()
                .map(|c| match self {
                    Dialect::Sqlite => format!("{} = excluded.{}", c, c),
                    Dialect::Mysql => format!("{} = VALUES({})", c, c),
                })
                .collect();
            sql.push_str(match self {
                Dialect::Sqlite => " ON CONFLICT DO UPDATE SET ",
                Dialect::Mysql => " ON DUPLICATE KEY UPDATE ",
            });
            sql.push_str(&updates.join(", "));
        }

        sql
    }
}

/// How an insert treats a key conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Fail with a constraint violation
    Plain,
    /// Silently insert nothing
    IgnoreConflicts,
    /// Update every written column of the conflicting row
    Upsert,
}

/// Quote a string literal
fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}
