use chrono::{DateTime, NaiveDate, Utc};
use model::{
    record::NormalizedRecord,
    schema::{ColumnType, TableSchema},
    value::Value,
};
use tokio_postgres::types::{Json as PgJson, ToSql};

pub struct PgParam(Box<dyn ToSql + Sync + Send>);

impl PgParam {
    /// Nulls must be typed to satisfy the wire protocol, so the destination
    /// column type rides along.
    pub fn from_value(value: Value, column_type: ColumnType) -> Self {
        match value {
            Value::Text(v) => PgParam(Box::new(v)),
            Value::Integer(v) => PgParam(Box::new(v)),
            Value::Float(v) => PgParam(Box::new(v)),
            Value::Boolean(v) => PgParam(Box::new(v)),
            Value::Date(v) => PgParam(Box::new(v)),
            Value::Timestamp(v) => PgParam(Box::new(v)),
            Value::Json(v) => PgParam(Box::new(PgJson(v))),
            Value::Null => match column_type {
                ColumnType::Text => PgParam(Box::new(Option::<String>::None)),
                ColumnType::BigInt => PgParam(Box::new(Option::<i64>::None)),
                ColumnType::DoublePrecision => PgParam(Box::new(Option::<f64>::None)),
                ColumnType::Boolean => PgParam(Box::new(Option::<bool>::None)),
                ColumnType::Date => PgParam(Box::new(Option::<NaiveDate>::None)),
                ColumnType::TimestampTz => {
                    PgParam(Box::new(Option::<DateTime<Utc>>::None))
                }
                ColumnType::Jsonb => {
                    PgParam(Box::new(Option::<PgJson<serde_json::Value>>::None))
                }
            },
        }
    }
}

impl AsRef<dyn ToSql + Sync> for PgParam {
    fn as_ref(&self) -> &(dyn ToSql + Sync + 'static) {
        &*self.0
    }
}

pub struct PgParamStore {
    params: Vec<PgParam>,
}

impl PgParamStore {
    /// Flattens records into one parameter list in schema column order,
    /// filling absent columns with typed nulls.
    pub fn from_records(schema: &TableSchema, records: &[NormalizedRecord]) -> Self {
        let mut params = Vec::with_capacity(records.len() * schema.columns.len());
        for record in records {
            for column in &schema.columns {
                let value = record.value(&column.name).cloned().unwrap_or(Value::Null);
                params.push(PgParam::from_value(value, column.column_type));
            }
        }
        Self { params }
    }

    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|param| param.as_ref()).collect()
    }
}
