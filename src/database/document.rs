//! Document collection repository
//!
//! Each collection is a table of JSON documents, one per row. Field lookups
//! go through SQLite's `json_extract`, so documents need no fixed schema and
//! carry no comments.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::{Map, Value};
use tracing::debug;

use crate::database::core::{is_interrupted, ConnectionIdentity};
use crate::database::relational::to_sql_value;
use crate::error::{PipelineError, PipelineResult};
use crate::item::WriteOutcome;
use crate::schema::Dialect;

/// A stored document and its row id
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: i64,
    pub body: Map<String, Value>,
}

/// Repository for one collection
pub struct DocumentCollection<'a> {
    conn: &'a Connection,
    identity: &'a ConnectionIdentity,
    name: String,
}

impl<'a> DocumentCollection<'a> {
    pub fn new(conn: &'a Connection, identity: &'a ConnectionIdentity, name: impl Into<String>) -> Self {
        Self {
            conn,
            identity,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn error(&self, fields: Vec<String>, operation: &str, err: impl std::fmt::Display) -> PipelineError {
        PipelineError::Write {
            identity: self.identity.to_string(),
            table: self.name.clone(),
            fields,
            detail: format!("{}: {}", operation, err),
        }
    }

    fn sql_error(&self, fields: Vec<String>, operation: &str, err: rusqlite::Error) -> PipelineError {
        if is_interrupted(&err) {
            return PipelineError::Timeout {
                identity: self.identity.to_string(),
                operation: format!("{} on '{}'", operation, self.name),
            };
        }
        self.error(fields, operation, err)
    }

    /// Create the backing table if needed
    pub fn ensure(&self) -> PipelineResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL)",
            Dialect::Sqlite.quote_ident(&self.name)
        );
        self.conn
            .execute(&sql, [])
            .map_err(|e| self.sql_error(Vec::new(), "create collection", e))?;
        Ok(())
    }

    /// First document (by id) whose fields equal every `(field, value)` pair
    pub fn find_one(&self, filter: &[(&str, &Value)]) -> PipelineResult<Option<StoredDocument>> {
        let fields: Vec<String> = filter.iter().map(|(f, _)| f.to_string()).collect();

        let mut sql = format!(
            "SELECT id, body FROM {}",
            Dialect::Sqlite.quote_ident(&self.name)
        );
        let mut args: Vec<SqlValue> = Vec::with_capacity(filter.len() * 2);
        for (i, (field, value)) in filter.iter().enumerate() {
            let path = json_path(field).ok_or_else(|| {
                PipelineError::shape(
                    &self.name,
                    format!("field '{}' cannot be matched: names containing '\"' have no JSON path", field),
                )
            })?;
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!(
                "json_extract(body, ?{}) IS ?{}",
                args.len() + 1,
                args.len() + 2
            ));
            args.push(SqlValue::Text(path));
            args.push(to_sql_value(value));
        }
        sql.push_str(" ORDER BY id LIMIT 1");

        let row: Option<(i64, String)> = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()
            .map_err(|e| self.sql_error(fields.clone(), "find", e))?;

        match row {
            Some((id, body)) => {
                let body = serde_json::from_str::<Map<String, Value>>(&body)
                    .map_err(|e| self.error(fields, "decode document", e))?;
                Ok(Some(StoredDocument { id, body }))
            }
            None => Ok(None),
        }
    }

    /// Insert a new document, returning its id
    pub fn insert(&self, doc: &Map<String, Value>) -> PipelineResult<i64> {
        let fields: Vec<String> = doc.keys().cloned().collect();
        let body = serde_json::to_string(doc).map_err(|e| self.error(fields.clone(), "encode document", e))?;
        let sql = format!(
            "INSERT INTO {} (body) VALUES (?1)",
            Dialect::Sqlite.quote_ident(&self.name)
        );
        self.conn
            .execute(&sql, [body])
            .map_err(|e| self.sql_error(fields, "insert", e))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite only the given fields of an existing document
    pub fn update_fields(&self, existing: &StoredDocument, fields: &Map<String, Value>) -> PipelineResult<()> {
        let names: Vec<String> = fields.keys().cloned().collect();
        let mut body = existing.body.clone();
        for (k, v) in fields {
            body.insert(k.clone(), v.clone());
        }
        let body = serde_json::to_string(&body).map_err(|e| self.error(names.clone(), "encode document", e))?;

        let sql = format!(
            "UPDATE {} SET body = ?1 WHERE id = ?2",
            Dialect::Sqlite.quote_ident(&self.name)
        );
        self.conn
            .execute(&sql, params![body, existing.id])
            .map_err(|e| self.sql_error(names, "update", e))?;
        Ok(())
    }

    /// Update the document matching `filter` with `doc`, or insert `doc`
    ///
    /// The lookup and the write share one immediate transaction, so two
    /// writers with the same key cannot both insert.
    pub fn upsert(&self, doc: &Map<String, Value>, filter: &[(&str, &Value)]) -> PipelineResult<WriteOutcome> {
        let fields: Vec<String> = doc.keys().cloned().collect();
        self.ensure()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(|e| self.sql_error(fields.clone(), "begin", e))?;

        let outcome = match self.find_one(filter)? {
            Some(existing) => {
                debug!("document {} in '{}' matched, updating", existing.id, self.name);
                self.update_fields(&existing, doc)?;
                WriteOutcome::Updated
            }
            None => {
                self.insert(doc)?;
                WriteOutcome::Inserted
            }
        };

        tx.commit()
            .map_err(|e| self.sql_error(fields, "commit", e))?;
        Ok(outcome)
    }

    /// Number of documents in the collection
    pub fn count(&self) -> PipelineResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", Dialect::Sqlite.quote_ident(&self.name));
        self.conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| self.sql_error(Vec::new(), "count", e))
    }
}

/// JSON path addressing a top-level field
///
/// SQLite's path syntax has no escape inside a quoted label, so a name
/// containing `"` cannot be addressed.
fn json_path(field: &str) -> Option<String> {
    if field.contains('"') {
        return None;
    }
    Some(format!("$.\"{}\"", field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn setup() -> (Connection, ConnectionIdentity) {
        (
            Connection::open_in_memory().unwrap(),
            ConnectionIdentity::new("sqlite://memory"),
        )
    }

    #[test]
    fn test_insert_and_find() {
        let (conn, identity) = setup();
        let coll = DocumentCollection::new(&conn, &identity, "articles");
        coll.ensure().unwrap();

        coll.insert(&doc(json!({"url": "http://x", "title": "t1", "views": 3})))
            .unwrap();

        let url = json!("http://x");
        let found = coll.find_one(&[("url", &url)]).unwrap().unwrap();
        assert_eq!(found.body["title"], json!("t1"));

        let views = json!(3);
        assert!(coll.find_one(&[("views", &views)]).unwrap().is_some());

        let other = json!("http://y");
        assert!(coll.find_one(&[("url", &other)]).unwrap().is_none());
    }

    #[test]
    fn test_upsert_updates_only_incoming_fields() {
        let (conn, identity) = setup();
        let coll = DocumentCollection::new(&conn, &identity, "articles");
        coll.ensure().unwrap();
        coll.insert(&doc(json!({"url": "http://x", "title": "t1", "author": "a"})))
            .unwrap();

        let incoming = doc(json!({"_url": "http://x", "title": "t2"}));
        let key = json!("http://x");
        let outcome = coll.upsert(&incoming, &[("url", &key)]).unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);

        let stored = coll.find_one(&[("url", &key)]).unwrap().unwrap();
        assert_eq!(stored.body["title"], json!("t2"));
        assert_eq!(stored.body["author"], json!("a"));
        assert_eq!(coll.count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_without_match_inserts() {
        let (conn, identity) = setup();
        let coll = DocumentCollection::new(&conn, &identity, "articles");

        let incoming = doc(json!({"_url": "http://z", "title": "t"}));
        let key = json!("http://z");
        assert_eq!(
            coll.upsert(&incoming, &[("url", &key)]).unwrap(),
            WriteOutcome::Inserted
        );
        assert_eq!(coll.count().unwrap(), 1);
    }

    #[test]
    fn test_json_path() {
        assert_eq!(json_path("url").as_deref(), Some("$.\"url\""));
        assert_eq!(json_path("a.b").as_deref(), Some("$.\"a.b\""));
        assert_eq!(json_path("say \"hi\""), None);
    }

    #[test]
    fn test_unaddressable_filter_field_is_shape_error() {
        let (conn, identity) = setup();
        let coll = DocumentCollection::new(&conn, &identity, "articles");
        coll.ensure().unwrap();

        let key = json!("x");
        let err = coll.find_one(&[("bad\"name", &key)]).unwrap_err();
        assert!(matches!(err, PipelineError::Shape { ref table, .. } if table == "articles"));
    }

    #[test]
    fn test_multi_field_filter_requires_all() {
        let (conn, identity) = setup();
        let coll = DocumentCollection::new(&conn, &identity, "articles");
        coll.ensure().unwrap();
        coll.insert(&doc(json!({"site": "a", "slug": "s1"}))).unwrap();

        let site = json!("a");
        let slug = json!("s2");
        assert!(coll
            .find_one(&[("site", &site), ("slug", &slug)])
            .unwrap()
            .is_none());
    }
}
