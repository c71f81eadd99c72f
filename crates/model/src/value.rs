use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of destination value variants. Every source record is coerced
/// into these at the mapping boundary; nothing downstream inspects raw
/// source values again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Null,
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}
