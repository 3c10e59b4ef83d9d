use std::collections::BTreeSet;

use crate::item::{ChangeKind, Record, SchemaChange, TableDescriptor};

/// Key under which a column name is compared
///
/// Column names are case-insensitive in both dialects (ASCII folding, as
/// SQLite does it).
fn column_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Fields of `record` whose names collide with an earlier field when case is
/// ignored, in record order
///
/// Such a record cannot map onto one table: the second field would address
/// the first field's column.
pub fn case_collisions(record: &Record) -> Vec<String> {
    let mut seen = BTreeSet::new();
    record
        .names()
        .filter(|name| !seen.insert(column_key(name)))
        .map(str::to_string)
        .collect()
}

/// Compute the additive change needed before `record` can be written
///
/// `live` is the destination's current column set, or `None` when the table
/// does not exist. Returns `None` when every field already has a column.
/// Field and column names match regardless of case. Existing columns are
/// never dropped or retyped.
pub fn reconcile(
    record: &Record,
    target: &TableDescriptor,
    live: Option<&BTreeSet<String>>,
    structured: bool,
) -> Option<SchemaChange> {
    let (kind, fields) = match live {
        None => (ChangeKind::CreateTable, record.clone()),
        Some(columns) => {
            let live: BTreeSet<String> = columns.iter().map(|c| column_key(c)).collect();
            let mut missing = Record::new();
            for (name, value) in record.iter() {
                if !live.contains(&column_key(name)) {
                    missing.insert(name, value.clone());
                }
            }
            if missing.is_empty() {
                return None;
            }
            (ChangeKind::AddColumns, missing)
        }
    };

    if fields.is_empty() {
        return None;
    }

    Some(SchemaChange {
        kind,
        annotations: fields.annotations(),
        fields,
        target: target.clone(),
        structured,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::AnnotatedValue;
    use serde_json::json;

    fn posts_record() -> Record {
        let mut record = Record::new();
        record.insert("title", AnnotatedValue::new("hi", "标题"));
        record.insert("views", json!(5));
        record
    }

    fn columns(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_table_creates_all_fields() {
        let target = TableDescriptor::new("posts", "帖子");
        let change = reconcile(&posts_record(), &target, None, false).unwrap();

        assert_eq!(change.kind, ChangeKind::CreateTable);
        assert_eq!(change.field_names(), vec!["title", "views"]);
        assert_eq!(change.annotations["title"], "标题");
        assert_eq!(change.annotations["views"], "");
        assert_eq!(change.target.comment, "帖子");
    }

    #[test]
    fn test_subset_needs_no_change() {
        let live = columns(&["id", "title", "views", "likes"]);
        let target = TableDescriptor::named("posts");
        assert!(reconcile(&posts_record(), &target, Some(&live), false).is_none());
    }

    #[test]
    fn test_only_missing_fields_are_added() {
        let mut record = posts_record();
        record.insert("likes", json!(0));
        let live = columns(&["id", "title", "views"]);
        let target = TableDescriptor::named("posts");

        let change = reconcile(&record, &target, Some(&live), true).unwrap();
        assert_eq!(change.kind, ChangeKind::AddColumns);
        assert_eq!(change.field_names(), vec!["likes"]);
        assert_eq!(change.annotations.len(), 1);
        assert!(change.structured);
    }

    #[test]
    fn test_case_variant_field_matches_live_column() {
        let mut record = Record::new();
        record.insert("Views", json!(2));
        record.insert("TITLE", json!("x"));
        let live = columns(&["id", "title", "views"]);
        let target = TableDescriptor::named("posts");

        assert!(reconcile(&record, &target, Some(&live), false).is_none());
    }

    #[test]
    fn test_case_collisions() {
        let mut record = posts_record();
        assert!(case_collisions(&record).is_empty());

        record.insert("Title", json!("again"));
        record.insert("VIEWS", json!(1));
        assert_eq!(case_collisions(&record), vec!["Title", "VIEWS"]);
    }

    #[test]
    fn test_empty_record_against_missing_table() {
        let target = TableDescriptor::named("posts");
        assert!(reconcile(&Record::new(), &target, None, false).is_none());
    }
}
