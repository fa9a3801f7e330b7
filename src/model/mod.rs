//! Entity model shared by every backend
//!
//! Record types declare their columns, identity rule, sharding and index
//! hints, and merge policies through a [`RecordDescriptor`]. Instances cross
//! the storage boundary as generic [`Record`]s.

mod data_table;
mod descriptor;
mod record;
mod value;

pub use data_table::DataTable;
pub use descriptor::{
    ColumnDescriptor, ColumnRole, MergePolicy, RecordDescriptor, RecordDescriptorBuilder,
    RecordKind, ID_CONNECTOR, RESERVED_COLUMNS, TIME_BUCKET,
};
pub use record::{derive_id, Record, RecordBuilder};
pub use value::{ComplexObject, SemanticType, Value};

use crate::Result;

/// A typed domain record that can cross the storage boundary.
pub trait StorageEntity: Sized {
    /// Descriptor shared by all instances of the type.
    fn descriptor() -> &'static RecordDescriptor;

    fn to_record(&self) -> Result<Record>;

    fn from_record(record: &Record) -> Result<Self>;
}
