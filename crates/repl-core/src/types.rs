//! Core data model: source type families, target column types, tagged row
//! values, table/column specs, replication strategy, watermarks, and change
//! classification. See `SPEC_FULL.md` §3–§4.1.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse family a source SQL type belongs to, used by [`map_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTypeFamily {
    VarChar,
    Int,
    BigInt,
    SmallInt,
    TinyInt,
    Decimal,
    Float,
    Double,
    Bit,
    Date,
    Time,
    DateTime,
    Unknown,
}

impl SourceTypeFamily {
    /// Classify a SQL Server type name (as reported by
    /// `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE`) into a family.
    pub fn from_sql_type_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "varchar" | "nvarchar" | "char" | "nchar" | "text" | "ntext" | "binary"
            | "varbinary" | "image" | "uniqueidentifier" | "xml" => SourceTypeFamily::VarChar,
            "int" => SourceTypeFamily::Int,
            "bigint" => SourceTypeFamily::BigInt,
            "smallint" => SourceTypeFamily::SmallInt,
            "tinyint" => SourceTypeFamily::TinyInt,
            "decimal" | "numeric" | "money" | "smallmoney" => SourceTypeFamily::Decimal,
            "float" | "real" => SourceTypeFamily::Float,
            "double" | "double precision" => SourceTypeFamily::Double,
            "bit" => SourceTypeFamily::Bit,
            "date" => SourceTypeFamily::Date,
            "time" => SourceTypeFamily::Time,
            "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" => {
                SourceTypeFamily::DateTime
            }
            _ => SourceTypeFamily::Unknown,
        }
    }
}

/// A source column's declared type, as read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceType {
    pub family: SourceTypeFamily,
    pub raw_name: String,
}

/// Target (ClickHouse) column type. `map_type` is total: every
/// [`SourceTypeFamily`] has a mapping, with `Unknown` falling back to
/// `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    /// Fixed-point with 2 fractional digits, i.e. `Decimal(38, 2)`.
    Decimal38_2,
    Float32,
    Float64,
    Date,
    /// `DateTime64(3, tz)`.
    DateTime64Tz,
}

impl ColumnType {
    /// The ClickHouse DDL fragment for this type, not wrapped in `Nullable`.
    pub fn ddl(&self, timezone: &str) -> String {
        match self {
            ColumnType::String => "String".to_string(),
            ColumnType::Int8 => "Int8".to_string(),
            ColumnType::Int16 => "Int16".to_string(),
            ColumnType::Int32 => "Int32".to_string(),
            ColumnType::Int64 => "Int64".to_string(),
            ColumnType::UInt8 => "UInt8".to_string(),
            ColumnType::Decimal38_2 => "Decimal(38, 2)".to_string(),
            ColumnType::Float32 => "Float32".to_string(),
            ColumnType::Float64 => "Float64".to_string(),
            ColumnType::Date => "Date".to_string(),
            ColumnType::DateTime64Tz => format!("DateTime64(3, '{timezone}')"),
        }
    }
}

/// Total mapping from `(source_family, max_length)` to a target type.
/// `max_length` is currently unused by the mapping itself (ClickHouse
/// `String` is unbounded) but is threaded through so future width-sensitive
/// mappings (e.g. `FixedString`) have a natural home.
pub fn map_type(family: SourceTypeFamily, _max_length: Option<i32>) -> ColumnType {
    match family {
        SourceTypeFamily::VarChar => ColumnType::String,
        SourceTypeFamily::Int => ColumnType::Int32,
        SourceTypeFamily::BigInt => ColumnType::Int64,
        SourceTypeFamily::SmallInt => ColumnType::Int16,
        SourceTypeFamily::TinyInt => ColumnType::Int8,
        SourceTypeFamily::Decimal => ColumnType::Decimal38_2,
        SourceTypeFamily::Float => ColumnType::Float32,
        SourceTypeFamily::Double => ColumnType::Float64,
        SourceTypeFamily::Bit => ColumnType::UInt8,
        SourceTypeFamily::Date => ColumnType::Date,
        SourceTypeFamily::Time => ColumnType::String,
        SourceTypeFamily::DateTime => ColumnType::DateTime64Tz,
        SourceTypeFamily::Unknown => ColumnType::String,
    }
}

/// Tagged representation of a single source value, carried through
/// cleansing and hashing before the target adapter serializes it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Decimal(Decimal),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Normalize this value to the stable string form used by the change
    /// detector's hashing (SPEC_FULL.md §4.6).
    pub fn normalize_for_hash(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int64(i) => i.to_string(),
            Value::Float64(f) => format!("{:.6}", f),
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) => s.clone(),
            Value::Timestamp(ts) => ts.to_rfc3339(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Bytes(b) => base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalize_for_hash())
    }
}

/// Identifier for a source table: schema + name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdent {
    pub schema: String,
    pub name: String,
}

impl TableIdent {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// A source column's catalog metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub source_type: SourceType,
    pub max_length: Option<i32>,
    pub nullable: bool,
    pub ordinal: i32,
}

/// Immutable description of a source table for the duration of a run.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub ident: TableIdent,
    pub columns: Vec<Column>,
}

impl TableSpec {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// The inferred target column for one source column.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub source_name: String,
    pub target_name: String,
    pub target_type: ColumnType,
    /// True for every column except the one promoted to `ORDER BY`.
    pub nullable: bool,
}

/// Build the full set of column mappings for a table, given the column that
/// will be promoted to `ORDER BY` (if any — hash/degenerate strategies have
/// no source column promoted, since they order by `row_key`/`ingested_at`).
pub fn build_column_mappings(spec: &TableSpec, order_by_source: Option<&str>) -> Vec<ColumnMapping> {
    spec.columns
        .iter()
        .map(|c| {
            let target_type = map_type(c.source_type.family, c.max_length);
            let is_order_by = order_by_source == Some(c.name.as_str());
            ColumnMapping {
                source_name: c.name.clone(),
                target_name: crate::ident::sanitize_identifier(&c.name),
                target_type,
                nullable: !is_order_by,
            }
        })
        .collect()
}

/// One replicated row: a positional tuple of source values, in column order.
#[derive(Debug, Clone)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-table incremental replication strategy (SPEC_FULL.md §3, §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    RowVersion { column: String },
    Identity { column: String },
    Timestamp { column: String },
    Hash { logical_key: Vec<String> },
}

impl Strategy {
    /// The column used in the scan's `ORDER BY`/watermark predicate, if any.
    pub fn watermark_column(&self) -> Option<&str> {
        match self {
            Strategy::RowVersion { column } | Strategy::Identity { column } | Strategy::Timestamp { column } => {
                Some(column.as_str())
            }
            Strategy::Hash { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::RowVersion { .. } => "row_version",
            Strategy::Identity { .. } => "identity",
            Strategy::Timestamp { .. } => "timestamp",
            Strategy::Hash { .. } => "hash",
        }
    }
}

/// The maximum value of the strategy column observed in the target at the
/// start of a run. `None` means "empty target; scan from the beginning".
pub type Watermark = Option<Value>;

/// Per-row classification under the hash strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClassification {
    New,
    Updated,
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_map_is_total_and_unknown_falls_back_to_string() {
        let all = [
            SourceTypeFamily::VarChar,
            SourceTypeFamily::Int,
            SourceTypeFamily::BigInt,
            SourceTypeFamily::SmallInt,
            SourceTypeFamily::TinyInt,
            SourceTypeFamily::Decimal,
            SourceTypeFamily::Float,
            SourceTypeFamily::Double,
            SourceTypeFamily::Bit,
            SourceTypeFamily::Date,
            SourceTypeFamily::Time,
            SourceTypeFamily::DateTime,
            SourceTypeFamily::Unknown,
        ];
        for family in all {
            // Must not panic; every variant has an arm.
            let _ = map_type(family, Some(50));
        }
        assert_eq!(map_type(SourceTypeFamily::Unknown, None), ColumnType::String);
        assert_eq!(
            map_type(SourceTypeFamily::from_sql_type_name("geography"), None),
            ColumnType::String
        );
    }

    #[test]
    fn normalize_null_and_bool() {
        assert_eq!(Value::Null.normalize_for_hash(), "NULL");
        assert_eq!(Value::Bool(true).normalize_for_hash(), "1");
        assert_eq!(Value::Bool(false).normalize_for_hash(), "0");
    }

    #[test]
    fn normalize_float_rounds_to_six_digits() {
        assert_eq!(Value::Float64(1.0 / 3.0).normalize_for_hash(), "0.333333");
    }
}
