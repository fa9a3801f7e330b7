//! Document encoding for search-engine backends
//!
//! Records become JSON documents in daily indices named
//! `{namespace}_{type}-{yyyyMMdd}`. Binary values are base64 strings.

use super::{
    check_record, decode_error, encode_mismatch, exploded_tags, narrow_int, require_time_bucket,
    StorageConverter,
};
use crate::model::{Record, SemanticType, Value};
use crate::schema::{ColumnSpec, Schema};
use crate::time_bucket::partition_day;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Number, Value as Json};
use std::collections::BTreeMap;

/// A document to index, or one read back.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub index: String,
    pub id: String,
    pub source: Map<String, Json>,
}

/// Converter for the document backend.
#[derive(Debug, Clone)]
pub struct DocumentConverter {
    namespace: String,
}

impl DocumentConverter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Daily index a record with this bucket lands in.
    pub fn index_name(&self, schema: &Schema, time_bucket: i64) -> Result<String> {
        Ok(format!(
            "{}-{}",
            self.table_name(schema),
            partition_day(time_bucket)?
        ))
    }

    fn encode(value: &Value, spec: &ColumnSpec) -> Result<Json> {
        Ok(match value {
            Value::Int(v) => Json::from(*v),
            Value::Long(v) => Json::from(*v),
            Value::Double(v) => Json::Number(
                Number::from_f64(*v)
                    .ok_or_else(|| encode_mismatch(&spec.name, value, "finite double"))?,
            ),
            Value::Str(s) | Value::Complex(s) => Json::String(s.clone()),
            Value::Binary(b) => Json::String(BASE64.encode(b)),
            Value::List(l) => Json::Array(l.iter().cloned().map(Json::String).collect()),
        })
    }

    fn decode(stored: &Json, spec: &ColumnSpec) -> Result<Value> {
        let name = spec.name.as_str();
        let mismatch = || decode_error(name, spec.semantic, json_kind(stored));
        Ok(match spec.semantic {
            SemanticType::Integer => {
                Value::Int(narrow_int(name, stored.as_i64().ok_or_else(mismatch)?)?)
            }
            SemanticType::Long | SemanticType::Enum => {
                Value::Long(stored.as_i64().ok_or_else(mismatch)?)
            }
            SemanticType::Double => Value::Double(stored.as_f64().ok_or_else(mismatch)?),
            SemanticType::String => Value::Str(stored.as_str().ok_or_else(mismatch)?.to_string()),
            SemanticType::ComplexObject => {
                Value::Complex(stored.as_str().ok_or_else(mismatch)?.to_string())
            }
            SemanticType::Binary => {
                let encoded = stored.as_str().ok_or_else(mismatch)?;
                Value::Binary(BASE64.decode(encoded).map_err(|e| Error::Decode {
                    column: name.to_string(),
                    reason: format!("invalid base64: {}", e),
                })?)
            }
            SemanticType::TagList => {
                let items = stored.as_array().ok_or_else(mismatch)?;
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    list.push(item.as_str().ok_or_else(mismatch)?.to_string());
                }
                Value::List(list)
            }
        })
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

impl StorageConverter for DocumentConverter {
    type Request = Document;
    type Row = Document;

    fn table_name(&self, schema: &Schema) -> String {
        if self.namespace.is_empty() {
            schema.type_name().to_string()
        } else {
            format!("{}_{}", self.namespace, schema.type_name())
        }
    }

    fn entity_to_storage(&self, record: &Record, schema: &Schema) -> Result<Document> {
        check_record(record, schema)?;
        let exploded = exploded_tags(record, schema)?;
        let index = self.index_name(schema, require_time_bucket(record)?)?;

        let mut source = Map::new();
        for spec in schema.stored_columns() {
            if let Some(value) = record.get(&spec.name) {
                source.insert(spec.name.clone(), Self::encode(value, spec)?);
            }
        }
        for (key, value) in exploded {
            source.insert(key, Json::String(value));
        }

        Ok(Document {
            index,
            id: record.id.clone(),
            source,
        })
    }

    fn storage_to_entity(&self, row: &Document, schema: &Schema) -> Result<Record> {
        let mut values = BTreeMap::new();
        for spec in schema.stored_columns() {
            match row.source.get(&spec.name) {
                None | Some(Json::Null) => {}
                Some(stored) => {
                    values.insert(spec.name.clone(), Self::decode(stored, spec)?);
                }
            }
        }
        Ok(Record {
            type_name: schema.type_name().to_string(),
            id: row.id.clone(),
            values,
        })
    }
}
