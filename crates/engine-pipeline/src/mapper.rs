use model::{
    record::{FieldValue, NormalizedRecord, RawRecord},
    schema::{ColumnDef, ColumnType, IndexDef, SourceColumn, SourceType, TableSchema},
    value::Value,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("column '{column}': invalid date encoding {raw}")]
    InvalidDate { column: String, raw: String },
    #[error("column '{column}': expected {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: String,
    },
}

/// Translates source column descriptors into a destination schema once, and
/// normalizes raw records into typed rows one at a time. Type rules are a
/// fixed table, never inferred from the data.
pub struct SchemaMapper {
    columns: Vec<SourceColumn>,
    schema: TableSchema,
}

impl SchemaMapper {
    pub fn new(table: impl Into<String>, columns: Vec<SourceColumn>) -> Self {
        let table = table.into();

        let defs = columns
            .iter()
            .map(|col| ColumnDef {
                name: col.name.clone(),
                column_type: destination_type(col),
                primary_key: col.primary_key,
            })
            .collect();

        // Date columns get a secondary index after the bulk load, since
        // date-range scans are the dominant query pattern downstream.
        let indexes = columns
            .iter()
            .filter(|col| destination_type(col) == ColumnType::Date)
            .map(|col| IndexDef {
                name: format!("idx_{}_{}", table, col.name),
                column: col.name.clone(),
            })
            .collect();

        let schema = TableSchema {
            table,
            columns: defs,
            indexes,
        };

        Self { columns, schema }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Normalizes one raw record. Errors are per-record and must never
    /// abort the surrounding batch; the caller routes them to the
    /// dead-letter sink.
    pub fn normalize(&self, raw: &RawRecord) -> Result<NormalizedRecord, MapError> {
        let mut fields = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = match raw.get(&column.name) {
                None | Some(serde_json::Value::Null) => Value::Null,
                Some(json) => coerce(column, json)?,
            };
            fields.push(FieldValue {
                column: column.name.clone(),
                value,
            });
        }
        Ok(NormalizedRecord { fields })
    }
}

fn destination_type(col: &SourceColumn) -> ColumnType {
    if col.repeated {
        return ColumnType::Jsonb;
    }
    match col.source_type {
        SourceType::String => ColumnType::Text,
        SourceType::Integer => ColumnType::BigInt,
        SourceType::Float | SourceType::Numeric => ColumnType::DoublePrecision,
        SourceType::Boolean => ColumnType::Boolean,
        SourceType::DateYyyymmdd => ColumnType::Date,
        SourceType::Timestamp => ColumnType::TimestampTz,
        SourceType::Record => ColumnType::Jsonb,
    }
}

fn coerce(column: &SourceColumn, json: &serde_json::Value) -> Result<Value, MapError> {
    use serde_json::Value as Json;

    if column.repeated || column.source_type == SourceType::Record {
        return Ok(Value::Json(json.clone()));
    }

    let mismatch = |expected: &'static str| MapError::TypeMismatch {
        column: column.name.clone(),
        expected,
        found: json.to_string(),
    };

    match column.source_type {
        SourceType::String => match json {
            Json::String(s) => Ok(Value::Text(s.clone())),
            _ => Err(mismatch("string")),
        },
        SourceType::Integer => json
            .as_i64()
            .map(Value::Integer)
            .ok_or_else(|| mismatch("integer")),
        SourceType::Float | SourceType::Numeric => match json {
            // Warehouse exports spell non-numbers as the string "NaN";
            // both it and a float NaN normalize to an explicit null.
            Json::String(s) if s.eq_ignore_ascii_case("nan") => Ok(Value::Null),
            _ => {
                let v = json.as_f64().ok_or_else(|| mismatch("float"))?;
                if v.is_nan() {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Float(v))
                }
            }
        },
        SourceType::Boolean => json
            .as_bool()
            .map(Value::Boolean)
            .ok_or_else(|| mismatch("boolean")),
        SourceType::DateYyyymmdd => parse_yyyymmdd(column, json),
        SourceType::Timestamp => parse_timestamp(column, json),
        SourceType::Record => unreachable!("handled above"),
    }
}

/// Strict calendar parse of an 8-digit YYYYMMDD integer encoding. Exports
/// sometimes stringify the integer, so both forms are accepted.
fn parse_yyyymmdd(column: &SourceColumn, json: &serde_json::Value) -> Result<Value, MapError> {
    let invalid = |raw: String| MapError::InvalidDate {
        column: column.name.clone(),
        raw,
    };

    let encoded = match json {
        serde_json::Value::Number(n) => n.as_i64().ok_or_else(|| invalid(n.to_string()))?,
        serde_json::Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(s.clone()))?,
        other => return Err(invalid(other.to_string())),
    };

    if !(10_000_101..=99_991_231).contains(&encoded) {
        return Err(invalid(encoded.to_string()));
    }

    let year = (encoded / 10_000) as i32;
    let month = ((encoded / 100) % 100) as u32;
    let day = (encoded % 100) as u32;

    chrono::NaiveDate::from_ymd_opt(year, month, day)
        .map(Value::Date)
        .ok_or_else(|| invalid(encoded.to_string()))
}

fn parse_timestamp(column: &SourceColumn, json: &serde_json::Value) -> Result<Value, MapError> {
    let mismatch = || MapError::TypeMismatch {
        column: column.name.clone(),
        expected: "timestamp",
        found: json.to_string(),
    };

    match json {
        serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|ts| Value::Timestamp(ts.with_timezone(&chrono::Utc)))
            .map_err(|_| mismatch()),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(Value::Timestamp)
            .ok_or_else(mismatch),
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn col(name: &str, source_type: SourceType) -> SourceColumn {
        SourceColumn {
            name: name.into(),
            source_type,
            repeated: false,
            primary_key: false,
        }
    }

    fn raw(value: serde_json::Value) -> RawRecord {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    fn patents_mapper() -> SchemaMapper {
        let mut pk = col("publication_number", SourceType::String);
        pk.primary_key = true;
        let mut claims = col("claims", SourceType::Record);
        claims.repeated = true;
        SchemaMapper::new(
            "patents",
            vec![
                pk,
                col("filing_date", SourceType::DateYyyymmdd),
                col("claim_count", SourceType::Integer),
                col("score", SourceType::Float),
                claims,
            ],
        )
    }

    #[test]
    fn type_table_is_fixed() {
        let mapper = patents_mapper();
        let types: Vec<ColumnType> = mapper
            .schema()
            .columns
            .iter()
            .map(|c| c.column_type)
            .collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Text,
                ColumnType::Date,
                ColumnType::BigInt,
                ColumnType::DoublePrecision,
                ColumnType::Jsonb,
            ]
        );
        assert_eq!(
            mapper.schema().primary_key().unwrap().name,
            "publication_number"
        );
    }

    #[test]
    fn date_columns_get_deferred_indexes() {
        let mapper = patents_mapper();
        let indexes = &mapper.schema().indexes;
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "idx_patents_filing_date");
        assert_eq!(indexes[0].column, "filing_date");
    }

    #[test]
    fn normalizes_a_well_formed_record() {
        let mapper = patents_mapper();
        let record = mapper
            .normalize(&raw(json!({
                "publication_number": "US-1234-A",
                "filing_date": 20240131,
                "claim_count": 12,
                "score": 0.82,
                "claims": [{"text": "A method"}],
            })))
            .unwrap();

        assert_eq!(
            record.value("publication_number"),
            Some(&Value::Text("US-1234-A".into()))
        );
        assert_eq!(
            record.value("filing_date"),
            Some(&Value::Date(
                chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
            ))
        );
        assert_eq!(record.value("claim_count"), Some(&Value::Integer(12)));
        assert_eq!(
            record.value("claims"),
            Some(&Value::Json(json!([{"text": "A method"}])))
        );
    }

    #[test]
    fn invalid_dates_fail_the_record_not_the_batch() {
        let mapper = patents_mapper();

        // Month 13 does not exist.
        let err = mapper
            .normalize(&raw(json!({
                "publication_number": "US-1-A",
                "filing_date": 20241301,
            })))
            .unwrap_err();
        assert!(matches!(err, MapError::InvalidDate { .. }));

        // February 30th fails the calendar check even though the digits fit.
        let err = mapper
            .normalize(&raw(json!({
                "publication_number": "US-2-A",
                "filing_date": 20240230,
            })))
            .unwrap_err();
        assert!(matches!(err, MapError::InvalidDate { .. }));
    }

    #[test]
    fn stringified_dates_are_accepted() {
        let mapper = patents_mapper();
        let record = mapper
            .normalize(&raw(json!({
                "publication_number": "US-1-A",
                "filing_date": "20231205",
            })))
            .unwrap();
        assert_eq!(
            record.value("filing_date"),
            Some(&Value::Date(
                chrono::NaiveDate::from_ymd_opt(2023, 12, 5).unwrap()
            ))
        );
    }

    #[test]
    fn null_and_nan_normalize_to_null() {
        let mapper = patents_mapper();
        let record = mapper
            .normalize(&raw(json!({
                "publication_number": "US-1-A",
                "filing_date": null,
                "score": "NaN",
            })))
            .unwrap();

        assert_eq!(record.value("filing_date"), Some(&Value::Null));
        assert_eq!(record.value("score"), Some(&Value::Null));
        assert_eq!(record.value("claim_count"), Some(&Value::Null));
    }

    #[test]
    fn type_mismatch_is_a_mapping_error() {
        let mapper = patents_mapper();
        let err = mapper
            .normalize(&raw(json!({
                "publication_number": 42,
            })))
            .unwrap_err();
        assert!(matches!(err, MapError::TypeMismatch { .. }));
    }
}
