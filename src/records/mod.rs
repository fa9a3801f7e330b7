//! Domain record types
//!
//! Each type publishes its descriptor through [`StorageEntity`] and
//! converts itself to and from a generic [`Record`](crate::model::Record).

mod instance;
mod latency;
mod profile;
mod segment;
mod service;

pub use instance::{InstanceProperties, InstanceTraffic, IPV4S};
pub use latency::{latency_bucket, ServiceLatencyMetrics, LATENCY_BUCKET_STEP_MS};
pub use profile::{query_thread_snapshots, ProfileThreadSnapshotRecord};
pub use segment::SegmentRecord;
pub use service::ServiceTraffic;

use crate::model::{RecordDescriptor, StorageEntity};
use crate::{Error, Result};

/// Every built-in record type, registered by the storage provider at start.
pub fn all_descriptors() -> Vec<&'static RecordDescriptor> {
    vec![
        ProfileThreadSnapshotRecord::descriptor(),
        SegmentRecord::descriptor(),
        InstanceTraffic::descriptor(),
        ServiceTraffic::descriptor(),
        ServiceLatencyMetrics::descriptor(),
    ]
}

/// Technology layer a service belongs to, stored by ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Undefined = 0,
    Mesh = 1,
    General = 2,
    Os = 3,
    K8s = 4,
}

impl Layer {
    pub fn ordinal(self) -> i64 {
        self as i64
    }

    pub fn from_ordinal(value: i64) -> Result<Self> {
        Ok(match value {
            0 => Layer::Undefined,
            1 => Layer::Mesh,
            2 => Layer::General,
            3 => Layer::Os,
            4 => Layer::K8s,
            other => {
                return Err(Error::Decode {
                    column: "layer".to_string(),
                    reason: format!("unknown layer ordinal {}", other),
                })
            }
        })
    }
}
