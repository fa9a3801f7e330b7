//! Trace segments

use crate::model::{Record, RecordDescriptor, RecordKind, SemanticType, StorageEntity, TIME_BUCKET};
use crate::Result;
use std::sync::OnceLock;

pub const INDEX_NAME: &str = "segment";
pub const SEGMENT_ID: &str = "segment_id";
pub const TRACE_ID: &str = "trace_id";
pub const SERVICE_ID: &str = "service_id";
pub const SERVICE_INSTANCE_ID: &str = "service_instance_id";
pub const ENDPOINT_ID: &str = "endpoint_id";
pub const START_TIME: &str = "start_time";
pub const LATENCY: &str = "latency";
pub const IS_ERROR: &str = "is_error";
pub const TAGS: &str = "tags";
pub const DATA_BINARY: &str = "data_binary";

/// Tag keys searchable on their own column.
pub const SEARCHABLE_TAG_KEYS: [&str; 3] = ["http.method", "status_code", "db.type"];

/// A finished trace segment with its raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub segment_id: String,
    pub trace_id: String,
    pub service_id: String,
    pub service_instance_id: String,
    pub endpoint_id: String,
    pub start_time: i64,
    pub latency: i32,
    pub is_error: bool,
    /// `key=value` span tags
    pub tags: Vec<String>,
    pub data_binary: Vec<u8>,
    pub time_bucket: i64,
}

impl StorageEntity for SegmentRecord {
    fn descriptor() -> &'static RecordDescriptor {
        static DESCRIPTOR: OnceLock<RecordDescriptor> = OnceLock::new();
        DESCRIPTOR.get_or_init(|| {
            let mut builder = RecordDescriptor::builder(INDEX_NAME, RecordKind::AppendOnly)
                .tag(SEGMENT_ID, SemanticType::String)
                .tag(TRACE_ID, SemanticType::String)
                .tag(SERVICE_ID, SemanticType::String)
                .tag(SERVICE_INSTANCE_ID, SemanticType::String)
                .tag(ENDPOINT_ID, SemanticType::String)
                .tag(START_TIME, SemanticType::Long)
                .tag(LATENCY, SemanticType::Integer)
                .tag(IS_ERROR, SemanticType::Integer)
                .tag(TAGS, SemanticType::TagList)
                .field(DATA_BINARY, SemanticType::Binary);
            for key in SEARCHABLE_TAG_KEYS {
                builder = builder.exploded_tag(key, TAGS);
            }
            builder
                .shard_key(SERVICE_ID, 0)
                .identity(&[SEGMENT_ID])
                .index_group(&[SERVICE_ID, START_TIME])
                .index_group(&[TRACE_ID])
                .build()
        })
    }

    fn to_record(&self) -> Result<Record> {
        Record::builder(Self::descriptor())
            .with(SEGMENT_ID, self.segment_id.as_str())
            .with(TRACE_ID, self.trace_id.as_str())
            .with(SERVICE_ID, self.service_id.as_str())
            .with(SERVICE_INSTANCE_ID, self.service_instance_id.as_str())
            .with(ENDPOINT_ID, self.endpoint_id.as_str())
            .with(START_TIME, self.start_time)
            .with(LATENCY, self.latency)
            .with(IS_ERROR, i32::from(self.is_error))
            .with(TAGS, self.tags.clone())
            .with(DATA_BINARY, self.data_binary.clone())
            .with(TIME_BUCKET, self.time_bucket)
            .build()
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            segment_id: record.get_str(SEGMENT_ID)?.to_string(),
            trace_id: record.get_str(TRACE_ID)?.to_string(),
            service_id: record.get_str(SERVICE_ID)?.to_string(),
            service_instance_id: record.get_str(SERVICE_INSTANCE_ID)?.to_string(),
            endpoint_id: record.get_str(ENDPOINT_ID)?.to_string(),
            start_time: record.get_i64(START_TIME)?,
            latency: record.get_i32(LATENCY)?,
            is_error: record.get_i32(IS_ERROR)? != 0,
            tags: record
                .get(TAGS)
                .and_then(|v| v.as_list())
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
            data_binary: record.get_bytes(DATA_BINARY)?.to_vec(),
            time_bucket: record.get_i64(TIME_BUCKET)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_explode_into_declared_columns() {
        let descriptor = SegmentRecord::descriptor();
        for key in SEARCHABLE_TAG_KEYS {
            let column = descriptor.column(key).unwrap();
            assert_eq!(column.exploded_from.as_deref(), Some(TAGS));
        }
    }

    #[test]
    fn error_flag_is_stored_as_integer() {
        let segment = SegmentRecord {
            segment_id: "s1".into(),
            trace_id: "t1".into(),
            service_id: "c3Zj.1".into(),
            service_instance_id: "c3Zj.1_aW5zdA==".into(),
            endpoint_id: "e".into(),
            start_time: 1,
            latency: 12,
            is_error: true,
            tags: vec!["http.method=GET".into()],
            data_binary: vec![1, 2],
            time_bucket: 202403050708,
        };
        let record = segment.to_record().unwrap();
        assert_eq!(record.get_i32(IS_ERROR).unwrap(), 1);
        assert_eq!(record.id, "s1");
        assert_eq!(SegmentRecord::from_record(&record).unwrap(), segment);
    }
}
