//! Parquet encoding for columnar tables

use crate::Result;
use arrow_array::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties, WriterVersion};

/// Writes record batches as self-contained Parquet objects.
#[derive(Debug, Clone)]
pub struct ParquetWriter {
    props: WriterProperties,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            props: Self::build_writer_properties(),
        }
    }

    fn build_writer_properties() -> WriterProperties {
        WriterProperties::builder()
            .set_writer_version(WriterVersion::PARQUET_2_0)
            .set_compression(Compression::ZSTD(ZstdLevel::try_new(3).unwrap_or_default()))
            // Tags repeat heavily within a flush
            .set_dictionary_enabled(true)
            .set_statistics_enabled(EnabledStatistics::Chunk)
            .set_max_row_group_size(100_000)
            .build()
    }

    pub fn write_batch(&self, batch: &RecordBatch) -> Result<Bytes> {
        let mut buffer = Vec::new();
        {
            let mut writer =
                ArrowWriter::try_new(&mut buffer, batch.schema(), Some(self.props.clone()))?;
            writer.write(batch)?;
            writer.close()?;
        }
        Ok(Bytes::from(buffer))
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}
