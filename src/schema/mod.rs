//! Schema reconciliation
//!
//! - `reconcile`: diff an incoming record against the live column set and
//!   produce an additive `SchemaChange`
//! - `ColumnType`: the fixed, total mapping from a runtime value to a column type
//! - `ddl`: dialect-aware rendering of schema changes and writes

pub mod ddl;
mod reconcile;

pub use ddl::{Dialect, InsertMode, TableOptions, ID_COLUMN};
pub use reconcile::{case_collisions, reconcile};

use serde_json::Value;

/// Lower bound for the declared length of an inferred text column
pub const DEFAULT_VARCHAR_LEN: usize = 190;

/// Longest text column still declared as `VARCHAR`; longer values use `LONGTEXT`
pub const MAX_VARCHAR_LEN: usize = 16383;

/// Column type inferred for a newly created field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Booleans and integers that fit in 32 bits
    Integer,
    /// Integers outside the 32-bit range
    BigInt,
    Double,
    /// Everything else, sized to the observed value's character count
    Text { observed_len: usize },
}

impl ColumnType {
    /// Infer the column type for a value
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ColumnType::Integer,
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i32::try_from(i).is_ok() {
                        ColumnType::Integer
                    } else {
                        ColumnType::BigInt
                    }
                } else if n.is_u64() {
                    ColumnType::BigInt
                } else {
                    ColumnType::Double
                }
            }
            Value::String(s) => ColumnType::Text {
                observed_len: s.chars().count(),
            },
            Value::Null => ColumnType::Text { observed_len: 0 },
            Value::Array(_) | Value::Object(_) => ColumnType::Text {
                observed_len: value.to_string().chars().count(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_numbers() {
        assert_eq!(ColumnType::infer(&json!(5)), ColumnType::Integer);
        assert_eq!(ColumnType::infer(&json!(-7)), ColumnType::Integer);
        assert_eq!(ColumnType::infer(&json!(true)), ColumnType::Integer);
        assert_eq!(ColumnType::infer(&json!(5_000_000_000i64)), ColumnType::BigInt);
        assert_eq!(ColumnType::infer(&json!(u64::MAX)), ColumnType::BigInt);
        assert_eq!(ColumnType::infer(&json!(1.5)), ColumnType::Double);
    }

    #[test]
    fn test_infer_text() {
        assert_eq!(
            ColumnType::infer(&json!("标题")),
            ColumnType::Text { observed_len: 2 }
        );
        assert_eq!(
            ColumnType::infer(&Value::Null),
            ColumnType::Text { observed_len: 0 }
        );
        assert_eq!(
            ColumnType::infer(&json!(["a"])),
            ColumnType::Text { observed_len: 5 }
        );
    }
}
