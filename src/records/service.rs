//! Service inventory

use super::Layer;
use crate::model::{MergePolicy, Record, RecordDescriptor, RecordKind, SemanticType, StorageEntity, TIME_BUCKET};
use crate::Result;
use std::sync::OnceLock;

pub const INDEX_NAME: &str = "service_traffic";
pub const SERVICE_ID: &str = "service_id";
pub const NAME: &str = "name";
pub const LAYER: &str = "layer";

/// A service seen by the platform, kept from its first bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceTraffic {
    pub service_id: String,
    pub name: String,
    pub layer: Layer,
    pub time_bucket: i64,
}

impl StorageEntity for ServiceTraffic {
    fn descriptor() -> &'static RecordDescriptor {
        static DESCRIPTOR: OnceLock<RecordDescriptor> = OnceLock::new();
        DESCRIPTOR.get_or_init(|| {
            RecordDescriptor::builder(INDEX_NAME, RecordKind::Metric)
                .tag(SERVICE_ID, SemanticType::String)
                .tag(NAME, SemanticType::String)
                .tag(LAYER, SemanticType::Enum)
                .merge_by(TIME_BUCKET, MergePolicy::Min)
                .shard_key(SERVICE_ID, 0)
                .identity(&[SERVICE_ID])
                .index_group(&[NAME, LAYER])
                .build()
        })
    }

    fn to_record(&self) -> Result<Record> {
        Record::builder(Self::descriptor())
            .with(SERVICE_ID, self.service_id.as_str())
            .with(NAME, self.name.as_str())
            .with(LAYER, self.layer.ordinal())
            .with(TIME_BUCKET, self.time_bucket)
            .build()
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            service_id: record.get_str(SERVICE_ID)?.to_string(),
            name: record.get_str(NAME)?.to_string(),
            layer: Layer::from_ordinal(record.get_i64(LAYER)?)?,
            time_bucket: record.get_i64(TIME_BUCKET)?,
        })
    }
}
