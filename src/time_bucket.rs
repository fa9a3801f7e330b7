//! Time buckets and partition keys
//!
//! A time bucket is a wall-clock instant truncated to a downsampling
//! granularity and written as a decimal number: `yyyyMMddHHmmss`,
//! `yyyyMMddHHmm`, `yyyyMMddHH` or `yyyyMMdd`. Every persisted record
//! carries one, so the day partition is computable from the record alone.

use crate::{Error, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Granularity a time bucket is truncated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownSampling {
    Second,
    Minute,
    Hour,
    Day,
}

impl DownSampling {
    fn digits(&self) -> usize {
        match self {
            DownSampling::Second => 14,
            DownSampling::Minute => 12,
            DownSampling::Hour => 10,
            DownSampling::Day => 8,
        }
    }

    fn from_digits(digits: usize) -> Option<Self> {
        match digits {
            14 => Some(DownSampling::Second),
            12 => Some(DownSampling::Minute),
            10 => Some(DownSampling::Hour),
            8 => Some(DownSampling::Day),
            _ => None,
        }
    }
}

/// Time bucket for an epoch-millisecond instant.
pub fn time_bucket(epoch_millis: i64, downsampling: DownSampling) -> i64 {
    let dt = Utc
        .timestamp_millis_opt(epoch_millis)
        .single()
        .unwrap_or_default();
    let day = dt.year() as i64 * 10_000 + dt.month() as i64 * 100 + dt.day() as i64;
    match downsampling {
        DownSampling::Day => day,
        DownSampling::Hour => day * 100 + dt.hour() as i64,
        DownSampling::Minute => (day * 100 + dt.hour() as i64) * 100 + dt.minute() as i64,
        DownSampling::Second => {
            ((day * 100 + dt.hour() as i64) * 100 + dt.minute() as i64) * 100
                + dt.second() as i64
        }
    }
}

/// Granularity of an existing bucket, inferred from its digit count.
pub fn downsampling_of(bucket: i64) -> Result<DownSampling> {
    if bucket <= 0 {
        return Err(invalid(bucket));
    }
    DownSampling::from_digits(bucket.to_string().len()).ok_or_else(|| invalid(bucket))
}

/// Epoch millis of the first instant covered by `bucket`.
pub fn bucket_start_millis(bucket: i64) -> Result<i64> {
    let ds = downsampling_of(bucket)?;
    // Pad to seconds precision, then split.
    let mut full = bucket;
    for _ in ds.digits()..DownSampling::Second.digits() {
        full *= 100;
    }
    let second = (full % 100) as u32;
    let minute = (full / 100 % 100) as u32;
    let hour = (full / 10_000 % 100) as u32;
    let day = (full / 1_000_000 % 100) as u32;
    let month = (full / 100_000_000 % 100) as u32;
    let year = (full / 10_000_000_000) as i32;

    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| invalid(bucket))?;
    let time: NaiveDateTime = date
        .and_hms_opt(hour, minute, second)
        .ok_or_else(|| invalid(bucket))?;
    Ok(time.and_utc().timestamp_millis())
}

/// Day partition key (`yyyyMMdd`) for any bucket granularity.
pub fn partition_day(bucket: i64) -> Result<String> {
    let ds = downsampling_of(bucket)?;
    let mut day = bucket;
    for _ in DownSampling::Day.digits()..ds.digits() {
        day /= 100;
    }
    Ok(day.to_string())
}

fn invalid(bucket: i64) -> Error {
    Error::InvalidSchema(format!("'{}' is not a valid time bucket", bucket))
}

/// Wall clock that never returns the same or an earlier nanosecond twice.
///
/// Used to order objects written by one process (later object names sort
/// after earlier ones even across an NTP step backward).
#[derive(Debug, Default)]
pub struct MonotonicClock {
    high_water_ns: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strictly increasing nanosecond timestamp.
    pub fn now_nanos(&self) -> i64 {
        let wall = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        loop {
            let prev = self.high_water_ns.load(Ordering::Acquire);
            let ts = wall.max(prev + 1);
            if self
                .high_water_ns
                .compare_exchange_weak(prev, ts, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return ts;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-03-05T07:08:09.123Z
    const MILLIS: i64 = 1_709_622_489_123;

    #[test]
    fn buckets_at_every_granularity() {
        assert_eq!(time_bucket(MILLIS, DownSampling::Second), 20240305070809);
        assert_eq!(time_bucket(MILLIS, DownSampling::Minute), 202403050708);
        assert_eq!(time_bucket(MILLIS, DownSampling::Hour), 2024030507);
        assert_eq!(time_bucket(MILLIS, DownSampling::Day), 20240305);
    }

    #[test]
    fn bucket_start_truncates() {
        let minute = time_bucket(MILLIS, DownSampling::Minute);
        assert_eq!(bucket_start_millis(minute).unwrap(), 1_709_622_480_000);
        assert_eq!(bucket_start_millis(20240305).unwrap(), 1_709_596_800_000);
    }

    #[test]
    fn partition_day_from_any_granularity() {
        assert_eq!(partition_day(20240305070809).unwrap(), "20240305");
        assert_eq!(partition_day(202403050708).unwrap(), "20240305");
        assert_eq!(partition_day(20240305).unwrap(), "20240305");
    }

    #[test]
    fn rejects_malformed_buckets() {
        assert!(downsampling_of(2024030).is_err());
        assert!(bucket_start_millis(20241305).is_err());
        assert!(partition_day(-1).is_err());
    }

    #[test]
    fn monotonic_clock_strictly_increases() {
        let clock = MonotonicClock::new();
        let mut prev = 0i64;
        for _ in 0..100 {
            let ts = clock.now_nanos();
            assert!(ts > prev);
            prev = ts;
        }
    }
}
