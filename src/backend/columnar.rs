//! Columnar tables as Parquet objects
//!
//! Each flush writes one Parquet object per table and day under
//! `{prefix}/{table}/day={yyyyMMdd}/part-{nanos}-{uuid}.parquet`. Reads by
//! id scan a table's objects in write order, so the latest write of an id
//! wins. Objects or cells that cannot be decoded do not fail the scan: they
//! come back as rows carrying a [`Damage`], after the rows that were found.

use super::parquet_writer::ParquetWriter;
use crate::client::{BatchResult, RejectedItem, Transport};
use crate::converter::{Cell, ColumnarRow, Damage, ID_FIELD};
use crate::time_bucket::MonotonicClock;
use crate::{Error, Result};
use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type};
use arrow_array::{
    Array, ArrayRef, BinaryArray, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, SchemaRef};
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Transport writing columnar rows to an object store.
pub struct ObjectStoreTransport {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    writer: ParquetWriter,
    clock: MonotonicClock,
}

impl ObjectStoreTransport {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
            writer: ParquetWriter::new(),
            clock: MonotonicClock::new(),
        }
    }

    fn table_path(&self, table: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(table)
        } else {
            Path::from(format!("{}/{}", self.prefix, table))
        }
    }

    fn object_path(&self, table: &str, day: &str) -> Path {
        Path::from(format!(
            "{}/day={}/part-{:020}-{}.parquet",
            self.table_path(table),
            day,
            self.clock.now_nanos(),
            uuid::Uuid::new_v4()
        ))
    }

    /// Objects of a table in write order.
    pub async fn list_objects(&self, table: &str) -> Result<Vec<Path>> {
        let prefix = self.table_path(table);
        let mut objects: Vec<Path> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(|e| Error::Connection(format!("listing {}: {}", prefix, e)))?;
        objects.retain(|p| p.as_ref().ends_with(".parquet"));
        // day=, then zero-padded nanos
        objects.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
        Ok(objects)
    }

    async fn read_object(&self, path: &Path) -> Result<Option<Vec<RecordBatch>>> {
        let bytes = match self.store.get(path).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch?);
        }
        Ok(Some(batches))
    }
}

/// Why a row cannot be appended under `schema`, if it cannot.
fn reject_reason(row: &ColumnarRow, schema: &SchemaRef) -> Option<String> {
    if row.id.is_empty() {
        return Some("row id must not be empty".to_string());
    }
    if row.schema.fields() != schema.fields() {
        return Some("row schema differs from the rest of its table".to_string());
    }
    for (name, cell) in &row.cells {
        match schema.field_with_name(name) {
            Ok(field) if cell.fits(field.data_type()) => {}
            Ok(field) => {
                return Some(format!(
                    "column {} is {}, got {}",
                    name,
                    field.data_type(),
                    cell.kind()
                ))
            }
            Err(_) => return Some(format!("column {} is not in the table schema", name)),
        }
    }
    None
}

fn rows_to_batch(schema: &SchemaRef, rows: &[ColumnarRow]) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let name = field.name().as_str();
        let cells = rows.iter().map(|r| r.cells.get(name));
        let array: ArrayRef = if name == ID_FIELD {
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.id.as_str())))
        } else {
            match field.data_type() {
                DataType::Int64 => Arc::new(
                    cells
                        .map(|c| match c {
                            Some(Cell::Long(v)) => Some(*v),
                            _ => None,
                        })
                        .collect::<Int64Array>(),
                ),
                DataType::Float64 => Arc::new(
                    cells
                        .map(|c| match c {
                            Some(Cell::Double(v)) => Some(*v),
                            _ => None,
                        })
                        .collect::<Float64Array>(),
                ),
                DataType::Utf8 => Arc::new(
                    cells
                        .map(|c| match c {
                            Some(Cell::Str(s)) => Some(s.as_str()),
                            _ => None,
                        })
                        .collect::<StringArray>(),
                ),
                DataType::Binary => Arc::new(
                    cells
                        .map(|c| match c {
                            Some(Cell::Binary(b)) => Some(b.as_slice()),
                            _ => None,
                        })
                        .collect::<BinaryArray>(),
                ),
                DataType::List(_) => {
                    let mut builder = ListBuilder::new(StringBuilder::new());
                    for cell in cells {
                        match cell {
                            Some(Cell::StrList(items)) => {
                                for item in items {
                                    builder.values().append_value(item);
                                }
                                builder.append(true);
                            }
                            _ => builder.append(false),
                        }
                    }
                    Arc::new(builder.finish())
                }
                other => {
                    return Err(Error::Internal(format!(
                        "column {} has unsupported type {}",
                        name, other
                    )))
                }
            }
        };
        columns.push(array);
    }
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn cell_at(column: &ArrayRef, name: &str, row: usize) -> Result<Option<Cell>> {
    if column.is_null(row) {
        return Ok(None);
    }
    let unsupported = |data_type: &DataType| Error::Decode {
        column: name.to_string(),
        reason: format!("unsupported stored type {}", data_type),
    };
    Ok(Some(match column.data_type() {
        DataType::Int64 => Cell::Long(column.as_primitive::<Int64Type>().value(row)),
        DataType::Float64 => Cell::Double(column.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => Cell::Str(column.as_string::<i32>().value(row).to_string()),
        DataType::Binary => Cell::Binary(column.as_binary::<i32>().value(row).to_vec()),
        DataType::List(item) => {
            let values = column.as_list::<i32>().value(row);
            let strings = values
                .as_string_opt::<i32>()
                .ok_or_else(|| unsupported(item.data_type()))?;
            Cell::StrList(strings.iter().flatten().map(str::to_string).collect())
        }
        other => return Err(unsupported(other)),
    }))
}

fn partition_of(path: &Path) -> String {
    path.parts()
        .find_map(|p| p.as_ref().strip_prefix("day=").map(str::to_string))
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Transport for ObjectStoreTransport {
    type Request = ColumnarRow;
    type Row = ColumnarRow;

    fn name(&self) -> &'static str {
        "columnar"
    }

    async fn open(&self) -> Result<()> {
        let prefix = Path::from(self.prefix.as_str());
        self.store
            .list_with_delimiter(Some(&prefix))
            .await
            .map_err(|e| Error::Connection(format!("object store unreachable: {}", e)))?;
        Ok(())
    }

    async fn bulk(&self, batch: Vec<ColumnarRow>) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        // (table, day) -> rows in arrival order
        let mut groups: BTreeMap<(String, String), Vec<ColumnarRow>> = BTreeMap::new();
        for row in batch {
            let key = (row.table.clone(), row.partition.clone());
            let schema = groups
                .get(&key)
                .and_then(|rows| rows.first())
                .map(|first| first.schema.clone())
                .unwrap_or_else(|| row.schema.clone());
            match reject_reason(&row, &schema) {
                Some(reason) => result.rejected.push(RejectedItem {
                    table: row.table,
                    id: row.id,
                    reason,
                }),
                None => groups.entry(key).or_default().push(row),
            }
        }

        for ((table, day), rows) in groups {
            let schema = rows[0].schema.clone();
            let record_batch = rows_to_batch(&schema, &rows)?;
            let bytes = self.writer.write_batch(&record_batch)?;
            let path = self.object_path(&table, &day);
            self.store
                .put(&path, PutPayload::from(bytes))
                .await
                .map_err(|e| Error::Connection(format!("writing {}: {}", path, e)))?;
            debug!(path = %path, rows = rows.len(), "Wrote columnar object");
            result.succeeded += rows.len();
        }
        Ok(result)
    }

    async fn get_by_ids(&self, table: &str, ids: &[String]) -> Result<Vec<ColumnarRow>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut latest: HashMap<String, ColumnarRow> = HashMap::new();
        let mut damaged = Vec::new();

        for path in self.list_objects(table).await? {
            let batches = match self.read_object(&path).await {
                Ok(Some(batches)) => batches,
                Ok(None) => continue,
                Err(e @ (Error::Parquet(_) | Error::Arrow(_))) => {
                    warn!(path = %path, error = %e, "Skipping unreadable columnar object");
                    damaged.push(damaged_object(table, &path, e.to_string()));
                    continue;
                }
                Err(e) => return Err(e),
            };
            let partition = partition_of(&path);
            for batch in batches {
                let schema = batch.schema();
                let Some(id_column) = batch
                    .column_by_name(ID_FIELD)
                    .and_then(|c| c.as_string_opt::<i32>())
                else {
                    warn!(path = %path, "Skipping columnar object without a string id column");
                    damaged.push(damaged_object(table, &path, "no string id column".to_string()));
                    break;
                };
                for row in 0..batch.num_rows() {
                    if id_column.is_null(row) {
                        continue;
                    }
                    let id = id_column.value(row);
                    if !wanted.contains(id) {
                        continue;
                    }
                    let mut cells = BTreeMap::new();
                    let mut damage = None;
                    for (i, field) in schema.fields().iter().enumerate() {
                        if field.name() == ID_FIELD {
                            continue;
                        }
                        match cell_at(batch.column(i), field.name(), row) {
                            Ok(Some(cell)) => {
                                cells.insert(field.name().clone(), cell);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(path = %path, id, error = %e, "Stored cell undecodable");
                                damage = Some(Damage {
                                    column: field.name().clone(),
                                    reason: format!("{}: {}", path, e),
                                });
                            }
                        }
                    }
                    latest.insert(
                        id.to_string(),
                        ColumnarRow {
                            table: table.to_string(),
                            partition: partition.clone(),
                            id: id.to_string(),
                            schema: schema.clone(),
                            cells,
                            damage,
                        },
                    );
                }
            }
        }

        let mut rows: Vec<ColumnarRow> = ids.iter().filter_map(|id| latest.remove(id)).collect();
        rows.extend(damaged);
        Ok(rows)
    }
}

/// Stand-in row for an object whose ids could not be read.
fn damaged_object(table: &str, path: &Path, reason: String) -> ColumnarRow {
    ColumnarRow {
        table: table.to_string(),
        partition: partition_of(path),
        id: path.to_string(),
        schema: Arc::new(arrow_schema::Schema::empty()),
        cells: BTreeMap::new(),
        damage: Some(Damage {
            column: ID_FIELD.to_string(),
            reason: format!("{}: {}", path, reason),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{Field, Schema};
    use object_store::memory::InMemory;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new(ID_FIELD, DataType::Utf8, false),
            Field::new("time_bucket", DataType::Int64, true),
            Field::new("ratio", DataType::Float64, true),
            Field::new(
                "tags",
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
                true,
            ),
        ]))
    }

    fn row(id: &str, ratio: Cell) -> ColumnarRow {
        let mut cells = BTreeMap::new();
        cells.insert("time_bucket".to_string(), Cell::Long(20240101));
        cells.insert("ratio".to_string(), ratio);
        cells.insert(
            "tags".to_string(),
            Cell::StrList(vec!["a=1".to_string(), "b=2".to_string()]),
        );
        ColumnarRow {
            table: "segment".into(),
            partition: "20240101".into(),
            id: id.into(),
            schema: schema(),
            cells,
            damage: None,
        }
    }

    #[tokio::test]
    async fn writes_and_reads_back_latest() {
        let transport = ObjectStoreTransport::new(Arc::new(InMemory::new()), "data");
        transport.open().await.unwrap();

        let first = transport
            .bulk(vec![row("a", Cell::Double(0.5)), row("b", Cell::Double(1.5))])
            .await
            .unwrap();
        assert_eq!(first, BatchResult::all_succeeded(2));
        transport.bulk(vec![row("a", Cell::Double(0.75))]).await.unwrap();

        let rows = transport
            .get_by_ids("segment", &["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cells["ratio"], Cell::Double(0.75));
        assert_eq!(rows[1].cells["ratio"], Cell::Double(1.5));
        assert_eq!(rows[0].partition, "20240101");
        assert_eq!(
            rows[0].cells["tags"],
            Cell::StrList(vec!["a=1".to_string(), "b=2".to_string()])
        );
        assert_eq!(transport.list_objects("segment").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn mistyped_rows_are_rejected_alone() {
        let transport = ObjectStoreTransport::new(Arc::new(InMemory::new()), "");
        let result = transport
            .bulk(vec![
                row("a", Cell::Double(0.5)),
                row("b", Cell::Str("nope".into())),
            ])
            .await
            .unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].id, "b");
    }

    #[tokio::test]
    async fn unreadable_objects_are_reported_next_to_good_rows() {
        let store = Arc::new(InMemory::new());
        let transport = ObjectStoreTransport::new(store.clone(), "data");
        transport.bulk(vec![row("a", Cell::Double(0.5))]).await.unwrap();
        store
            .put(
                &Path::from("data/segment/day=20240101/part-99999999999999999999-x.parquet"),
                PutPayload::from(b"not parquet".to_vec()),
            )
            .await
            .unwrap();

        let rows = transport.get_by_ids("segment", &["a".into()]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[0].damage, None);
        assert_eq!(rows[0].cells["ratio"], Cell::Double(0.5));
        let damage = rows[1].damage.as_ref().unwrap();
        assert_eq!(damage.column, ID_FIELD);
        assert!(damage.reason.contains("part-99999999999999999999-x.parquet"));
    }

    #[tokio::test]
    async fn objects_without_an_id_column_are_reported() {
        let store = Arc::new(InMemory::new());
        let transport = ObjectStoreTransport::new(store.clone(), "data");
        transport.bulk(vec![row("a", Cell::Double(0.5))]).await.unwrap();

        let no_ids = Arc::new(Schema::new(vec![Field::new("ratio", DataType::Float64, true)]));
        let batch = RecordBatch::try_new(
            no_ids,
            vec![Arc::new(Float64Array::from(vec![1.0])) as ArrayRef],
        )
        .unwrap();
        let bytes = ParquetWriter::new().write_batch(&batch).unwrap();
        store
            .put(
                &Path::from("data/segment/day=20240102/part-1-x.parquet"),
                PutPayload::from(bytes),
            )
            .await
            .unwrap();

        let rows = transport.get_by_ids("segment", &["a".into()]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].damage, None);
        assert!(rows[1].damage.as_ref().unwrap().reason.contains("no string id column"));
    }

    #[test]
    fn partition_comes_from_the_path() {
        let path = Path::from("data/segment/day=20240101/part-1.parquet");
        assert_eq!(partition_of(&path), "20240101");
    }
}
