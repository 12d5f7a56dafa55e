//! # Model Module
//!
//! Defines the `Model` trait every ORM entity implements (normally via
//! `#[derive(Model)]`) and the `ColumnInfo` metadata that describes how a
//! struct maps onto a table.

use std::collections::HashMap;

/// Metadata about a single database column, populated by `#[derive(Model)]`
/// from struct fields and `#[orm(...)]` attributes.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column name (struct field name, `r#` stripped, snake_cased at use sites).
    pub name: &'static str,
    /// SQL type string used verbatim in `CREATE TABLE` (e.g. `"INTEGER"`, `"UUID"`).
    pub sql_type: &'static str,
    /// Whether this column participates in the primary key.
    pub is_primary_key: bool,
    /// Whether `NULL` is allowed (derived from `Option<T>`).
    pub is_nullable: bool,
    /// Whether the column auto-populates with `CURRENT_TIMESTAMP` on insert.
    pub create_time: bool,
    /// Whether the column auto-updates to the current time on every save.
    pub update_time: bool,
    /// Whether a `UNIQUE` constraint should be generated.
    pub unique: bool,
    /// Whether an index should be generated.
    pub index: bool,
    /// Referenced table, for `#[orm(foreign_key = "Table::Column")]`.
    pub foreign_table: Option<&'static str>,
    /// Referenced column, for `#[orm(foreign_key = "Table::Column")]`.
    pub foreign_key: Option<&'static str>,
    /// Whether this column is excluded from `SELECT *` projections by default.
    pub omit: bool,
    /// Whether this column is the optimistic-locking `lock_version` counter.
    pub is_lock_version: bool,
    /// Whether this column stores ciphertext for a logical encrypted attribute
    /// (its name is always `<attr>_encrypted`; see the `encryption` module).
    pub is_encrypted_storage: bool,
}

/// A dynamically-typed attribute value, spanning every logical type a
/// column declaration can carry. Used at the model boundary for bulk
/// insert/upsert and anywhere a value must be handled without static typing.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Text(String),
    Uuid(uuid::Uuid),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
    NaiveDateTime(chrono::NaiveDateTime),
    NaiveDate(chrono::NaiveDate),
    NaiveTime(chrono::NaiveTime),
    Json(serde_json::Value),
    Blob(Vec<u8>),
}

impl ColumnValue {
    /// Renders the value to the string representation the value-binding
    /// layer expects, or `None` for `Null`.
    pub fn as_db_string(&self) -> Option<String> {
        match self {
            ColumnValue::Null => None,
            ColumnValue::Bool(v) => Some(v.to_string()),
            ColumnValue::I32(v) => Some(v.to_string()),
            ColumnValue::I64(v) => Some(v.to_string()),
            ColumnValue::F64(v) => Some(v.to_string()),
            ColumnValue::Text(v) => Some(v.clone()),
            ColumnValue::Uuid(v) => Some(v.hyphenated().to_string()),
            ColumnValue::DateTimeUtc(v) => Some(v.to_rfc3339()),
            ColumnValue::NaiveDateTime(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            ColumnValue::NaiveDate(v) => Some(v.format("%Y-%m-%d").to_string()),
            ColumnValue::NaiveTime(v) => Some(v.format("%H:%M:%S%.6f").to_string()),
            ColumnValue::Json(v) => Some(v.to_string()),
            ColumnValue::Blob(v) => Some(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, v)),
        }
    }

    /// True for `ColumnValue::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// Parses a raw DB-string value (as produced by `Model::to_map()`) into
    /// the `ColumnValue` variant matching `sql_type`, so predicates built
    /// from column metadata (e.g. keyset-pagination cursors) bind with the
    /// same type as the column they compare against instead of always
    /// falling back to `Text`.
    pub fn from_sql_str(value: &str, sql_type: &str) -> ColumnValue {
        match sql_type {
            "INTEGER" | "INT" | "SERIAL" | "serial" | "int4" | "SMALLINT" | "INT2" | "int2" => {
                value.parse::<i32>().map(ColumnValue::I32).unwrap_or_else(|_| ColumnValue::Text(value.to_string()))
            }
            "BIGINT" | "INT8" | "int8" | "BIGSERIAL" => {
                value.parse::<i64>().map(ColumnValue::I64).unwrap_or_else(|_| ColumnValue::Text(value.to_string()))
            }
            "BOOLEAN" | "BOOL" | "bool" => {
                value.parse::<bool>().map(ColumnValue::Bool).unwrap_or_else(|_| ColumnValue::Text(value.to_string()))
            }
            "DOUBLE PRECISION" | "FLOAT" | "float8" | "NUMERIC" | "DECIMAL" | "REAL" | "float4" => {
                value.parse::<f64>().map(ColumnValue::F64).unwrap_or_else(|_| ColumnValue::Text(value.to_string()))
            }
            "UUID" => {
                value.parse::<uuid::Uuid>().map(ColumnValue::Uuid).unwrap_or_else(|_| ColumnValue::Text(value.to_string()))
            }
            _ => ColumnValue::Text(value.to_string()),
        }
    }
}

/// The core trait every ORM entity implements, normally via
/// `#[derive(Model)]`. Provides table metadata, column metadata, and
/// serialization to/from a generic row representation.
pub trait Model {
    /// The table name, declared case (callers snake_case it at use sites).
    fn table_name() -> &'static str;

    /// Full column metadata for this model, in declaration order.
    fn columns() -> Vec<ColumnInfo>;

    /// Column names only, in declaration order.
    fn active_columns() -> Vec<&'static str>;

    /// Serializes the instance into a `column name -> string value` map,
    /// used for `INSERT`/`UPDATE` statement construction and as the basis
    /// for dirty-tracking snapshots.
    fn to_map(&self) -> HashMap<String, String>;

    /// Returns the primary key column names, in declaration order. A model
    /// with no primary key is a programmer error — at least one primary
    /// column must exist.
    fn primary_key_columns() -> Vec<&'static str> {
        Self::columns().into_iter().filter(|c| c.is_primary_key).map(|c| c.name).collect()
    }

    /// The current value(s) of the primary key, read back out of `to_map()`.
    fn primary_key_values(&self) -> Vec<String> {
        let map = self.to_map();
        Self::primary_key_columns().into_iter().filter_map(|name| map.get(name).cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_value_round_trips_to_string() {
        assert_eq!(ColumnValue::I32(42).as_db_string(), Some("42".to_string()));
        assert_eq!(ColumnValue::Null.as_db_string(), None);
        assert!(ColumnValue::Null.is_null());
        assert!(!ColumnValue::Bool(true).is_null());
    }

    #[test]
    fn from_sql_str_parses_into_the_matching_variant() {
        assert_eq!(ColumnValue::from_sql_str("42", "INTEGER"), ColumnValue::I32(42));
        assert_eq!(ColumnValue::from_sql_str("9000000000", "BIGINT"), ColumnValue::I64(9_000_000_000));
        assert_eq!(ColumnValue::from_sql_str("true", "BOOLEAN"), ColumnValue::Bool(true));
        assert_eq!(ColumnValue::from_sql_str("3.5", "NUMERIC"), ColumnValue::F64(3.5));
        assert_eq!(ColumnValue::from_sql_str("hello", "TEXT"), ColumnValue::Text("hello".to_string()));
        // A value that doesn't parse as the declared type falls back to Text
        // rather than panicking or silently dropping the value.
        assert_eq!(ColumnValue::from_sql_str("not-a-number", "INTEGER"), ColumnValue::Text("not-a-number".to_string()));
    }

    struct Widget;

    impl Model for Widget {
        fn table_name() -> &'static str {
            "widget"
        }

        fn columns() -> Vec<ColumnInfo> {
            vec![ColumnInfo {
                name: "id",
                sql_type: "INTEGER",
                is_primary_key: true,
                is_nullable: false,
                create_time: false,
                update_time: false,
                unique: false,
                index: false,
                foreign_table: None,
                foreign_key: None,
                omit: false,
                is_lock_version: false,
                is_encrypted_storage: false,
            }]
        }

        fn active_columns() -> Vec<&'static str> {
            vec!["id"]
        }

        fn to_map(&self) -> HashMap<String, String> {
            let mut m = HashMap::new();
            m.insert("id".to_string(), "7".to_string());
            m
        }
    }

    #[test]
    fn primary_key_helpers_read_from_to_map() {
        assert_eq!(Widget::primary_key_columns(), vec!["id"]);
        assert_eq!(Widget.primary_key_values(), vec!["7".to_string()]);
    }
}
