//! Storage backend transports
//!
//! - [`EmbeddedMeasureTransport`]: in-process stream/measure engine
//! - [`ElasticsearchTransport`]: document indices over REST
//! - [`ObjectStoreTransport`]: Parquet tables in an object store

mod columnar;
mod elasticsearch;
mod measure;
mod parquet_writer;

pub use columnar::ObjectStoreTransport;
pub use elasticsearch::{bulk_body, parse_bulk_response, ElasticsearchTransport};
pub use measure::EmbeddedMeasureTransport;
pub use parquet_writer::ParquetWriter;
