//! Stream/measure encoding
//!
//! Append-only records become stream elements holding only tags. Metrics
//! become measure points with tags and fields split by declared role, plus
//! an `id` tag carrying the record identity.

use super::{
    check_record, decode_error, encode_mismatch, exploded_tags, narrow_int, require_time_bucket,
    StorageConverter,
};
use super::byte_codec::{bytes_to_double, double_to_bytes};
use crate::model::{Record, RecordKind, SemanticType, Value};
use crate::schema::{ColumnSpec, NativeType, Schema};
use crate::time_bucket::bucket_start_millis;
use crate::Result;
use std::collections::BTreeMap;

/// Tag written on measure points to carry the record id.
pub const ID_TAG: &str = "id";

/// A tag or field value on the measure backend.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasureValue {
    Long(i64),
    Str(String),
    Binary(Vec<u8>),
    StrArray(Vec<String>),
}

impl MeasureValue {
    pub fn kind(&self) -> &'static str {
        match self {
            MeasureValue::Long(_) => "long",
            MeasureValue::Str(_) => "string",
            MeasureValue::Binary(_) => "binary",
            MeasureValue::StrArray(_) => "string_array",
        }
    }
}

/// A stream element or measure data point.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurePoint {
    /// `group/name`
    pub table: String,
    pub id: String,
    pub timestamp_millis: i64,
    /// Rendered shard-key values in shard order
    pub shard_key: Vec<String>,
    pub tags: BTreeMap<String, MeasureValue>,
    pub fields: BTreeMap<String, MeasureValue>,
}

/// Converter for the measure backend.
#[derive(Debug, Clone)]
pub struct MeasureConverter {
    group: String,
}

impl MeasureConverter {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
        }
    }

    fn encode(value: &Value, spec: &ColumnSpec) -> Result<MeasureValue> {
        Ok(match (value, spec.native) {
            (Value::Int(v), NativeType::Long) => MeasureValue::Long(*v as i64),
            (Value::Long(v), NativeType::Long) => MeasureValue::Long(*v),
            (Value::Double(v), NativeType::Binary) => {
                MeasureValue::Binary(double_to_bytes(*v).to_vec())
            }
            (Value::Str(s) | Value::Complex(s), NativeType::String) => MeasureValue::Str(s.clone()),
            (Value::Binary(b), NativeType::Binary) => MeasureValue::Binary(b.clone()),
            (Value::List(l), NativeType::StringArray) if spec.is_tag() => {
                MeasureValue::StrArray(l.clone())
            }
            (value, native) => return Err(encode_mismatch(&spec.name, value, native.as_str())),
        })
    }

    fn decode(stored: &MeasureValue, spec: &ColumnSpec) -> Result<Value> {
        let name = spec.name.as_str();
        Ok(match (spec.semantic, stored) {
            (SemanticType::Integer, MeasureValue::Long(v)) => Value::Int(narrow_int(name, *v)?),
            (SemanticType::Long | SemanticType::Enum, MeasureValue::Long(v)) => Value::Long(*v),
            (SemanticType::Double, MeasureValue::Binary(b)) => {
                Value::Double(bytes_to_double(name, b)?)
            }
            (SemanticType::String, MeasureValue::Str(s)) => Value::Str(s.clone()),
            (SemanticType::ComplexObject, MeasureValue::Str(s)) => Value::Complex(s.clone()),
            (SemanticType::Binary, MeasureValue::Binary(b)) => Value::Binary(b.clone()),
            (SemanticType::TagList, MeasureValue::StrArray(l)) => Value::List(l.clone()),
            (semantic, stored) => return Err(decode_error(name, semantic, stored.kind())),
        })
    }
}

impl StorageConverter for MeasureConverter {
    type Request = MeasurePoint;
    type Row = MeasurePoint;

    fn table_name(&self, schema: &Schema) -> String {
        format!("{}/{}", self.group, schema.type_name())
    }

    fn entity_to_storage(&self, record: &Record, schema: &Schema) -> Result<MeasurePoint> {
        check_record(record, schema)?;
        let exploded = exploded_tags(record, schema)?;
        let timestamp_millis = bucket_start_millis(require_time_bucket(record)?)?;

        let mut tags = BTreeMap::new();
        let mut fields = BTreeMap::new();
        for spec in schema.stored_columns() {
            let Some(value) = record.get(&spec.name) else {
                continue;
            };
            let encoded = Self::encode(value, spec)?;
            if spec.is_tag() {
                tags.insert(spec.name.clone(), encoded);
            } else {
                fields.insert(spec.name.clone(), encoded);
            }
        }
        for (key, value) in exploded {
            tags.insert(key, MeasureValue::Str(value));
        }
        if schema.kind() == RecordKind::Metric {
            tags.insert(ID_TAG.to_string(), MeasureValue::Str(record.id.clone()));
        }

        let shard_key = schema
            .shard_key()
            .iter()
            .map(|c| {
                record
                    .get(&c.name)
                    .and_then(Value::identity_fragment)
                    .unwrap_or_default()
            })
            .collect();

        Ok(MeasurePoint {
            table: self.table_name(schema),
            id: record.id.clone(),
            timestamp_millis,
            shard_key,
            tags,
            fields,
        })
    }

    fn storage_to_entity(&self, row: &MeasurePoint, schema: &Schema) -> Result<Record> {
        let mut values = BTreeMap::new();
        for spec in schema.stored_columns() {
            let stored = if spec.is_tag() {
                row.tags.get(&spec.name)
            } else {
                row.fields.get(&spec.name)
            };
            if let Some(stored) = stored {
                values.insert(spec.name.clone(), Self::decode(stored, spec)?);
            }
        }
        Ok(Record {
            type_name: schema.type_name().to_string(),
            id: row.id.clone(),
            values,
        })
    }
}
