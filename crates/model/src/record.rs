use crate::value::Value;

/// One untyped row as fetched from the source, keyed by column name.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone)]
pub struct FieldValue {
    pub column: String,
    pub value: Value,
}

/// One typed row in destination column order. Built by the mapper, consumed
/// by a sink, then dropped; never retained beyond its batch.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub fields: Vec<FieldValue>,
}

impl NormalizedRecord {
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|f| f.column == column)
            .map(|f| &f.value)
    }
}
