//! Converters between generic records and backend-native representations
//!
//! Each backend has one [`StorageConverter`]: `entity_to_storage` produces
//! the write request a flush sends, `storage_to_entity` turns a stored row
//! back into a record.

mod byte_codec;
mod columnar;
mod document;
mod measure;
mod tags;

pub use byte_codec::{bytes_to_double, double_to_bytes};
pub use columnar::{Cell, ColumnarConverter, ColumnarRow, Damage, ID_FIELD};
pub use document::{Document, DocumentConverter};
pub use measure::{MeasureConverter, MeasurePoint, MeasureValue, ID_TAG};
pub use tags::explode_tag_list;

use crate::model::{Record, SemanticType, Value, TIME_BUCKET};
use crate::schema::Schema;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Bidirectional codec between records and one backend's native form.
pub trait StorageConverter: Send + Sync + 'static {
    /// Write request built per record
    type Request: Send + 'static;
    /// Stored row read back by id
    type Row: Send + 'static;

    /// Backend table/index/measure name for a record type.
    fn table_name(&self, schema: &Schema) -> String;

    fn entity_to_storage(&self, record: &Record, schema: &Schema) -> Result<Self::Request>;

    fn storage_to_entity(&self, row: &Self::Row, schema: &Schema) -> Result<Record>;
}

/// Rejects records with undeclared columns or mistyped values before
/// anything is encoded.
pub(crate) fn check_record(record: &Record, schema: &Schema) -> Result<()> {
    if record.type_name != schema.type_name() {
        return Err(Error::InvalidSchema(format!(
            "{} record offered to the {} schema",
            record.type_name,
            schema.type_name()
        )));
    }
    for (name, value) in &record.values {
        let spec = schema
            .column(name)
            .filter(|c| !c.is_virtual())
            .ok_or_else(|| Error::UnknownColumn {
                record_type: record.type_name.clone(),
                column: name.clone(),
            })?;
        value.check(name, spec.semantic)?;
    }
    Ok(())
}

/// Time bucket of a record, which every backend needs for placement.
pub(crate) fn require_time_bucket(record: &Record) -> Result<i64> {
    record.time_bucket().ok_or_else(|| Error::MissingValue {
        record_type: record.type_name.clone(),
        column: TIME_BUCKET.to_string(),
    })
}

/// Tags exploded from every list column, keyed by target column.
///
/// A key with no matching exploded column fails with `UnknownColumn`.
pub(crate) fn exploded_tags(record: &Record, schema: &Schema) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for list in schema
        .columns()
        .iter()
        .filter(|c| c.semantic == SemanticType::TagList)
    {
        let Some(Value::List(entries)) = record.get(&list.name) else {
            continue;
        };
        for (key, value) in explode_tag_list(entries) {
            match schema.column(&key) {
                Some(target) if target.exploded_from.as_deref() == Some(list.name.as_str()) => {
                    out.insert(key, value);
                }
                _ => {
                    return Err(Error::UnknownColumn {
                        record_type: record.type_name.clone(),
                        column: key,
                    })
                }
            }
        }
    }
    Ok(out)
}

pub(crate) fn decode_error(column: &str, expected: SemanticType, found: &str) -> Error {
    Error::Decode {
        column: column.to_string(),
        reason: format!("expected {} storage, found {}", expected, found),
    }
}

pub(crate) fn narrow_int(column: &str, value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::Decode {
        column: column.to_string(),
        reason: format!("{} does not fit an INTEGER column", value),
    })
}

pub(crate) fn encode_mismatch(column: &str, value: &Value, native: &str) -> Error {
    Error::TypeMismatch {
        column: column.to_string(),
        expected: native.to_string(),
        actual: value.kind().to_string(),
    }
}
