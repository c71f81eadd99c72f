use serde::{Deserialize, Serialize};

/// Source-side column types as declared by the warehouse export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    String,
    Integer,
    Float,
    Numeric,
    Boolean,
    /// 8-digit integer date encoding (e.g. 20240131).
    DateYyyymmdd,
    Timestamp,
    /// Nested record; flattened to a JSON document on the destination side.
    Record,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceColumn {
    pub name: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub repeated: bool,
    #[serde(default)]
    pub primary_key: bool,
}

/// Destination column types. The mapper owns the source-to-destination
/// translation table; nothing else decides types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    BigInt,
    DoublePrecision,
    Boolean,
    Date,
    TimestampTz,
    Jsonb,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::BigInt => "BIGINT",
            ColumnType::DoublePrecision => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::TimestampTz => "TIMESTAMPTZ",
            ColumnType::Jsonb => "JSONB",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
}

/// Secondary index created after the bulk load phase, never per batch.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.primary_key)
    }
}
