// Backend seam
// The adapter hands translated statements to a Backend; the MS-SQL pool is one implementation

use crate::db::connection::ConnectionError;
use crate::db::translate::TranslatedStatement;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;

/// Cell value in a result set
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(String),
    Binary(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            // NUMERIC identity columns come back as decimals
            CellValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) | CellValue::DateTime(s) => Some(s),
            _ => None,
        }
    }
}

/// A single row: column names in engine order mapped to their values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, CellValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: CellValue) {
        self.columns.push((column.into(), value));
    }

    pub fn with(mut self, column: impl Into<String>, value: CellValue) -> Self {
        self.push(column, value);
        self
    }

    /// Case-insensitive lookup; T-SQL column names are not case sensitive by default
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Metadata returned alongside the rows
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<i64>,
}

/// Uniform result of [`crate::db::QueryAdapter::execute`]
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct QueryOutput {
    pub rows: Vec<Record>,
    pub meta: QueryMeta,
}

/// Failures reported by a backend before normalization
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Server error {code}: {message}")]
    Server { code: u32, message: String },

    #[error("Driver error: {0}")]
    Driver(String),
}

/// Something that can run a fully translated statement and return its first result set
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Display name for logs
    fn name(&self) -> &str;

    /// Whether the underlying connection pool is already established
    fn is_connected(&self) -> bool;

    /// Establish the connection pool if it is not yet connected
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Execute the statement with its bindings
    async fn run(&self, statement: &TranslatedStatement) -> Result<Vec<Record>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lookup_is_case_insensitive() {
        let record = Record::new()
            .with("ID", CellValue::Int(7))
            .with("name", CellValue::String("Physics".to_string()));

        assert_eq!(record.get("id"), Some(&CellValue::Int(7)));
        assert_eq!(record.get("NAME").and_then(CellValue::as_str), Some("Physics"));
        assert!(record.get("missing").is_none());
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_record_serializes_in_column_order() {
        let record = Record::new()
            .with("title", CellValue::String("Intro".to_string()))
            .with("id", CellValue::Int(1))
            .with("s3_url", CellValue::Null);

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"title":"Intro","id":1,"s3_url":null}"#);
    }

    #[test]
    fn test_meta_omits_missing_insert_id() {
        let json = serde_json::to_value(QueryMeta::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));

        let json = serde_json::to_value(QueryMeta { insert_id: Some(3) }).unwrap();
        assert_eq!(json, serde_json::json!({ "insertId": 3 }));
    }

    #[test]
    fn test_cell_value_as_i64() {
        assert_eq!(CellValue::Int(5).as_i64(), Some(5));
        assert_eq!(CellValue::Float(5.0).as_i64(), Some(5));
        assert_eq!(CellValue::Float(5.5).as_i64(), None);
        assert_eq!(CellValue::String("5".to_string()).as_i64(), None);
    }
}
