//! Live schema introspection and the comment catalog
//!
//! SQLite has no column comments, so annotations are persisted in a catalog
//! table next to the data. The table-level comment is stored under an empty
//! column name.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;

/// Schema definitions for the pipeline's own tables
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// Name of the comment catalog table
    pub const COMMENT_TABLE_NAME: &'static str = "_item_comments";

    /// SQL for creating the comment catalog
    pub const COMMENT_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS _item_comments (
            table_name TEXT NOT NULL,
            column_name TEXT NOT NULL,
            comment TEXT NOT NULL,
            PRIMARY KEY (table_name, column_name)
        );
    "#;
}

/// Read-side view of a database's live schema plus catalog writes
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> rusqlite::Result<bool> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Column names of `table_name`, or `None` when the table does not exist
    pub fn columns(&self, table_name: &str) -> rusqlite::Result<Option<BTreeSet<String>>> {
        if !self.table_exists(table_name)? {
            return Ok(None);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1)")?;
        let names = stmt
            .query_map([table_name], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;
        Ok(Some(names))
    }

    /// Create the comment catalog if needed
    pub fn ensure_catalog(&self) -> rusqlite::Result<()> {
        self.conn.execute(SchemaDefinitions::COMMENT_TABLE, [])?;
        Ok(())
    }

    /// Record a comment; an empty `column_name` addresses the table itself
    ///
    /// An existing comment is kept, matching DDL that never alters an
    /// existing column.
    pub fn set_comment(&self, table_name: &str, column_name: &str, comment: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO _item_comments (table_name, column_name, comment) VALUES (?1, ?2, ?3)",
            params![table_name, column_name, comment],
        )?;
        Ok(())
    }

    /// Get a column comment, or the table comment for an empty `column_name`
    pub fn comment(&self, table_name: &str, column_name: &str) -> rusqlite::Result<Option<String>> {
        if !self.table_exists(SchemaDefinitions::COMMENT_TABLE_NAME)? {
            return Ok(None);
        }
        self.conn
            .query_row(
                "SELECT comment FROM _item_comments WHERE table_name = ?1 AND column_name = ?2",
                [table_name, column_name],
                |row| row.get(0),
            )
            .optional()
    }
}
