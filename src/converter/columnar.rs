//! Columnar row encoding
//!
//! Records become rows of an Arrow schema derived from the record schema.
//! The transport groups rows into record batches per table and day.

use super::{
    check_record, decode_error, encode_mismatch, exploded_tags, narrow_int, require_time_bucket,
    StorageConverter,
};
use crate::model::{Record, SemanticType, Value};
use crate::schema::{ColumnSpec, NativeType, Schema};
use crate::time_bucket::partition_day;
use crate::{Error, Result};
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Arrow column holding the record id.
pub const ID_FIELD: &str = "id";

/// One cell of a columnar row. Absent cells are nulls.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Long(i64),
    Double(f64),
    Str(String),
    Binary(Vec<u8>),
    StrList(Vec<String>),
}

impl Cell {
    pub fn kind(&self) -> &'static str {
        match self {
            Cell::Long(_) => "long",
            Cell::Double(_) => "double",
            Cell::Str(_) => "string",
            Cell::Binary(_) => "binary",
            Cell::StrList(_) => "string_list",
        }
    }

    /// Whether the cell can be appended to an Arrow column of `data_type`.
    pub fn fits(&self, data_type: &DataType) -> bool {
        match (self, data_type) {
            (Cell::Long(_), DataType::Int64) => true,
            (Cell::Double(_), DataType::Float64) => true,
            (Cell::Str(_), DataType::Utf8) => true,
            (Cell::Binary(_), DataType::Binary) => true,
            (Cell::StrList(_), DataType::List(item)) => item.data_type() == &DataType::Utf8,
            _ => false,
        }
    }
}

/// A row destined for (or read from) a columnar table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarRow {
    pub table: String,
    /// Day partition, `yyyyMMdd`
    pub partition: String,
    pub id: String,
    pub schema: SchemaRef,
    pub cells: BTreeMap<String, Cell>,
    /// Set on rows read back from a damaged object or cell
    pub damage: Option<Damage>,
}

/// What could not be read back for a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Damage {
    pub column: String,
    pub reason: String,
}

/// Converter for the columnar backend.
#[derive(Debug, Default)]
pub struct ColumnarConverter {
    arrow_schemas: DashMap<String, SchemaRef>,
}

impl ColumnarConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrow schema for a record schema, built once per record type.
    pub fn arrow_schema(&self, schema: &Schema) -> SchemaRef {
        if let Some(cached) = self.arrow_schemas.get(schema.type_name()) {
            return cached.clone();
        }
        let built = build_arrow_schema(schema);
        self.arrow_schemas
            .entry(schema.type_name().to_string())
            .or_insert(built)
            .clone()
    }

    fn encode(value: &Value, spec: &ColumnSpec) -> Result<Cell> {
        Ok(match (value, spec.native) {
            (Value::Int(v), NativeType::Long) => Cell::Long(*v as i64),
            (Value::Long(v), NativeType::Long) => Cell::Long(*v),
            (Value::Double(v), NativeType::Double) => Cell::Double(*v),
            (Value::Str(s) | Value::Complex(s), NativeType::String) => Cell::Str(s.clone()),
            (Value::Binary(b), NativeType::Binary) => Cell::Binary(b.clone()),
            (Value::List(l), NativeType::StringArray) => Cell::StrList(l.clone()),
            (value, native) => return Err(encode_mismatch(&spec.name, value, native.as_str())),
        })
    }

    fn decode(cell: &Cell, spec: &ColumnSpec) -> Result<Value> {
        let name = spec.name.as_str();
        Ok(match (spec.semantic, cell) {
            (SemanticType::Integer, Cell::Long(v)) => Value::Int(narrow_int(name, *v)?),
            (SemanticType::Long | SemanticType::Enum, Cell::Long(v)) => Value::Long(*v),
            (SemanticType::Double, Cell::Double(v)) => Value::Double(*v),
            (SemanticType::String, Cell::Str(s)) => Value::Str(s.clone()),
            (SemanticType::ComplexObject, Cell::Str(s)) => Value::Complex(s.clone()),
            (SemanticType::Binary, Cell::Binary(b)) => Value::Binary(b.clone()),
            (SemanticType::TagList, Cell::StrList(l)) => Value::List(l.clone()),
            (semantic, cell) => return Err(decode_error(name, semantic, cell.kind())),
        })
    }
}

fn build_arrow_schema(schema: &Schema) -> SchemaRef {
    let mut fields = vec![Field::new(ID_FIELD, DataType::Utf8, false)];
    for spec in schema.columns() {
        let data_type = match spec.native {
            NativeType::Long => DataType::Int64,
            NativeType::Double => DataType::Float64,
            NativeType::String => DataType::Utf8,
            NativeType::Binary => DataType::Binary,
            NativeType::StringArray => {
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
            }
        };
        fields.push(Field::new(&spec.name, data_type, true));
    }
    Arc::new(ArrowSchema::new(fields))
}

impl StorageConverter for ColumnarConverter {
    type Request = ColumnarRow;
    type Row = ColumnarRow;

    fn table_name(&self, schema: &Schema) -> String {
        schema.type_name().to_string()
    }

    fn entity_to_storage(&self, record: &Record, schema: &Schema) -> Result<ColumnarRow> {
        check_record(record, schema)?;
        let exploded = exploded_tags(record, schema)?;
        let partition = partition_day(require_time_bucket(record)?)?;

        let mut cells = BTreeMap::new();
        for spec in schema.stored_columns() {
            if let Some(value) = record.get(&spec.name) {
                cells.insert(spec.name.clone(), Self::encode(value, spec)?);
            }
        }
        for (key, value) in exploded {
            cells.insert(key, Cell::Str(value));
        }

        Ok(ColumnarRow {
            table: self.table_name(schema),
            partition,
            id: record.id.clone(),
            schema: self.arrow_schema(schema),
            cells,
            damage: None,
        })
    }

    fn storage_to_entity(&self, row: &ColumnarRow, schema: &Schema) -> Result<Record> {
        if let Some(damage) = &row.damage {
            return Err(Error::Decode {
                column: damage.column.clone(),
                reason: damage.reason.clone(),
            });
        }
        let mut values = BTreeMap::new();
        for spec in schema.stored_columns() {
            if let Some(cell) = row.cells.get(&spec.name) {
                values.insert(spec.name.clone(), Self::decode(cell, spec)?);
            }
        }
        Ok(Record {
            type_name: schema.type_name().to_string(),
            id: row.id.clone(),
            values,
        })
    }
}
