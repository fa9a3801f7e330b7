//! Profiling thread snapshots

use crate::dao::StorageDao;
use crate::model::{
    Record, RecordDescriptor, RecordKind, SemanticType, StorageEntity, ID_CONNECTOR, TIME_BUCKET,
};
use crate::Result;
use std::sync::OnceLock;

pub const INDEX_NAME: &str = "profile_task_segment_snapshot";
pub const TASK_ID: &str = "task_id";
pub const SEGMENT_ID: &str = "segment_id";
pub const DUMP_TIME: &str = "dump_time";
pub const SEQUENCE: &str = "sequence";
pub const STACK_BINARY: &str = "stack_binary";

/// One thread dump taken while profiling a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileThreadSnapshotRecord {
    pub task_id: String,
    pub segment_id: String,
    pub dump_time: i64,
    pub sequence: i32,
    pub stack_binary: Vec<u8>,
    /// Second-granularity bucket of `dump_time`
    pub time_bucket: i64,
}

impl ProfileThreadSnapshotRecord {
    /// `task_segment_sequence`
    pub fn id_of(task_id: &str, segment_id: &str, sequence: i32) -> String {
        [task_id, segment_id, &sequence.to_string()].join(ID_CONNECTOR)
    }
}

impl StorageEntity for ProfileThreadSnapshotRecord {
    fn descriptor() -> &'static RecordDescriptor {
        static DESCRIPTOR: OnceLock<RecordDescriptor> = OnceLock::new();
        DESCRIPTOR.get_or_init(|| {
            RecordDescriptor::builder(INDEX_NAME, RecordKind::AppendOnly)
                .tag(TASK_ID, SemanticType::String)
                .tag(SEGMENT_ID, SemanticType::String)
                .tag(DUMP_TIME, SemanticType::Long)
                .tag(SEQUENCE, SemanticType::Integer)
                .field(STACK_BINARY, SemanticType::Binary)
                .shard_key(SEGMENT_ID, 0)
                .identity(&[TASK_ID, SEGMENT_ID, SEQUENCE])
                .index_group(&[TASK_ID, SEGMENT_ID])
                .index_group(&[SEGMENT_ID, SEQUENCE])
                .index_group(&[SEGMENT_ID, DUMP_TIME])
                .build()
        })
    }

    fn to_record(&self) -> Result<Record> {
        Record::builder(Self::descriptor())
            .with(TASK_ID, self.task_id.as_str())
            .with(SEGMENT_ID, self.segment_id.as_str())
            .with(DUMP_TIME, self.dump_time)
            .with(SEQUENCE, self.sequence)
            .with(STACK_BINARY, self.stack_binary.clone())
            .with(TIME_BUCKET, self.time_bucket)
            .build()
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            task_id: record.get_str(TASK_ID)?.to_string(),
            segment_id: record.get_str(SEGMENT_ID)?.to_string(),
            dump_time: record.get_i64(DUMP_TIME)?,
            sequence: record.get_i32(SEQUENCE)?,
            // an empty dump may be stored without a stack
            stack_binary: record
                .get(STACK_BINARY)
                .and_then(|v| v.as_bytes())
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
            time_bucket: record.get_i64(TIME_BUCKET)?,
        })
    }
}

/// Snapshots of one profiled segment with `min_sequence <= sequence <
/// max_sequence`, in sequence order, at most `limit` of them.
///
/// Snapshot ids are derived from the sequence, so the range is read by id.
pub async fn query_thread_snapshots(
    dao: &dyn StorageDao,
    task_id: &str,
    segment_id: &str,
    min_sequence: i32,
    max_sequence: i32,
    limit: usize,
) -> Result<Vec<ProfileThreadSnapshotRecord>> {
    let ids: Vec<String> = (min_sequence..max_sequence)
        .take(limit)
        .map(|seq| ProfileThreadSnapshotRecord::id_of(task_id, segment_id, seq))
        .collect();
    let result = dao.query_by_ids(INDEX_NAME, &ids).await?;
    let mut snapshots = result
        .records
        .iter()
        .map(ProfileThreadSnapshotRecord::from_record)
        .collect::<Result<Vec<_>>>()?;
    snapshots.sort_by_key(|s| s.sequence);
    Ok(snapshots)
}
