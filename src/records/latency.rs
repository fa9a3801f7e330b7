//! Per-service latency metrics

use crate::model::{
    DataTable, MergePolicy, Record, RecordDescriptor, RecordKind, SemanticType, StorageEntity,
    TIME_BUCKET,
};
use crate::Result;
use std::sync::OnceLock;

pub const INDEX_NAME: &str = "service_latency";
pub const SERVICE_ID: &str = "service_id";
pub const SUMMATION: &str = "summation";
pub const COUNT: &str = "count";
pub const VALUE: &str = "value";
pub const MAX_LATENCY: &str = "max_latency";
pub const PEAK_THROUGHPUT: &str = "peak_throughput";
pub const HISTOGRAM: &str = "histogram";

/// Width of a latency histogram bucket.
pub const LATENCY_BUCKET_STEP_MS: i64 = 50;
const LATENCY_BUCKET_CAP_MS: i64 = 2000;

/// Histogram bucket key of a latency: the bucket's lower bound, with
/// everything from the cap up sharing the last bucket.
pub fn latency_bucket(latency_ms: i64) -> String {
    let bounded = latency_ms.clamp(0, LATENCY_BUCKET_CAP_MS);
    (bounded / LATENCY_BUCKET_STEP_MS * LATENCY_BUCKET_STEP_MS).to_string()
}

/// Latency of one service in one minute bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceLatencyMetrics {
    pub service_id: String,
    pub summation: i64,
    pub count: i64,
    /// Mean latency, `summation / count`
    pub value: i64,
    pub max_latency: i64,
    /// Highest calls-per-second sample seen in the bucket
    pub peak_throughput: f64,
    pub histogram: DataTable,
    pub time_bucket: i64,
}

impl ServiceLatencyMetrics {
    /// Metrics for a single observed call.
    pub fn from_sample(service_id: &str, latency_ms: i64, throughput: f64, time_bucket: i64) -> Self {
        let mut histogram = DataTable::new();
        histogram.value_accumulation(latency_bucket(latency_ms), 1);
        Self {
            service_id: service_id.to_string(),
            summation: latency_ms,
            count: 1,
            value: latency_ms,
            max_latency: latency_ms,
            peak_throughput: throughput,
            histogram,
            time_bucket,
        }
    }
}

impl StorageEntity for ServiceLatencyMetrics {
    fn descriptor() -> &'static RecordDescriptor {
        static DESCRIPTOR: OnceLock<RecordDescriptor> = OnceLock::new();
        DESCRIPTOR.get_or_init(|| {
            RecordDescriptor::builder(INDEX_NAME, RecordKind::Metric)
                .tag(SERVICE_ID, SemanticType::String)
                .merged(SUMMATION, SemanticType::Long, MergePolicy::Sum)
                .merged(COUNT, SemanticType::Long, MergePolicy::Sum)
                .merged(
                    VALUE,
                    SemanticType::Long,
                    MergePolicy::MeanOf {
                        sum: SUMMATION.to_string(),
                        count: COUNT.to_string(),
                    },
                )
                .merged(MAX_LATENCY, SemanticType::Long, MergePolicy::Max)
                .merged(PEAK_THROUGHPUT, SemanticType::Double, MergePolicy::Max)
                .merged(HISTOGRAM, SemanticType::ComplexObject, MergePolicy::DataTableSum)
                .shard_key(SERVICE_ID, 0)
                .identity(&[TIME_BUCKET, SERVICE_ID])
                .build()
        })
    }

    fn to_record(&self) -> Result<Record> {
        Record::builder(Self::descriptor())
            .with(SERVICE_ID, self.service_id.as_str())
            .with(SUMMATION, self.summation)
            .with(COUNT, self.count)
            .with(VALUE, self.value)
            .with(MAX_LATENCY, self.max_latency)
            .with(PEAK_THROUGHPUT, self.peak_throughput)
            .with_complex(HISTOGRAM, &self.histogram)
            .with(TIME_BUCKET, self.time_bucket)
            .build()
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            service_id: record.get_str(SERVICE_ID)?.to_string(),
            summation: record.get_i64(SUMMATION)?,
            count: record.get_i64(COUNT)?,
            value: record.get_i64(VALUE)?,
            max_latency: record.get_i64(MAX_LATENCY)?,
            peak_throughput: record.get_f64(PEAK_THROUGHPUT)?,
            histogram: record.get_complex(HISTOGRAM)?,
            time_bucket: record.get_i64(TIME_BUCKET)?,
        })
    }
}
