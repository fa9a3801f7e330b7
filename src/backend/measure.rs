//! Embedded stream/measure engine
//!
//! In-process storage engine for the measure backend, for development and
//! tests. Everything lives in process memory: nothing survives a restart and
//! nothing is evicted. Points are sharded by their shard key and
//! overwritten by id. The first write of a tag or field fixes its value
//! type for the table; later points disagreeing with it are rejected
//! individually.

use crate::client::{BatchResult, RejectedItem, Transport};
use crate::converter::MeasurePoint;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_SHARDS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Tag,
    Field,
}

#[derive(Debug, Default)]
struct Engine {
    shards: u32,
    /// (table, shard) -> id -> point
    data: DashMap<(String, u32), HashMap<String, MeasurePoint>>,
    /// (table, slot, name) -> value kind
    kinds: DashMap<(String, Slot, String), &'static str>,
    bulk_calls: AtomicU64,
}

/// Handle to an embedded engine. Clones share the same data.
#[derive(Debug, Clone)]
pub struct EmbeddedMeasureTransport {
    engine: Arc<Engine>,
}

impl Default for EmbeddedMeasureTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl EmbeddedMeasureTransport {
    pub fn new(shards: u32) -> Self {
        Self {
            engine: Arc::new(Engine {
                shards: shards.max(1),
                ..Default::default()
            }),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.engine.shards
    }

    /// Shard a point is stored in.
    pub fn shard_of(&self, point: &MeasurePoint) -> u32 {
        let mut hasher = DefaultHasher::new();
        if point.shard_key.is_empty() {
            point.id.hash(&mut hasher);
        } else {
            point.shard_key.hash(&mut hasher);
        }
        (hasher.finish() % self.engine.shards as u64) as u32
    }

    /// Points stored for a table across all shards.
    pub fn len(&self, table: &str) -> usize {
        (0..self.engine.shards)
            .filter_map(|s| self.engine.data.get(&(table.to_string(), s)).map(|m| m.len()))
            .sum()
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    pub fn bulk_calls(&self) -> u64 {
        self.engine.bulk_calls.load(Ordering::Relaxed)
    }

    fn check(&self, point: &MeasurePoint) -> std::result::Result<(), String> {
        if point.id.is_empty() {
            return Err("element id must not be empty".to_string());
        }
        let values = point
            .tags
            .iter()
            .map(|(n, v)| (Slot::Tag, n, v))
            .chain(point.fields.iter().map(|(n, v)| (Slot::Field, n, v)));
        for (slot, name, value) in values.clone() {
            let key = (point.table.clone(), slot, name.clone());
            if let Some(kind) = self.engine.kinds.get(&key) {
                if *kind != value.kind() {
                    return Err(format!(
                        "{} {} expects {}, got {}",
                        if slot == Slot::Tag { "tag" } else { "field" },
                        name,
                        *kind,
                        value.kind()
                    ));
                }
            }
        }
        for (slot, name, value) in values {
            self.engine
                .kinds
                .entry((point.table.clone(), slot, name.clone()))
                .or_insert(value.kind());
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for EmbeddedMeasureTransport {
    type Request = MeasurePoint;
    type Row = MeasurePoint;

    fn name(&self) -> &'static str {
        "measure"
    }

    async fn open(&self) -> Result<()> {
        debug!(shards = self.engine.shards, "Embedded measure engine ready");
        Ok(())
    }

    async fn bulk(&self, batch: Vec<MeasurePoint>) -> Result<BatchResult> {
        self.engine.bulk_calls.fetch_add(1, Ordering::Relaxed);
        let mut result = BatchResult::default();
        for point in batch {
            if let Err(reason) = self.check(&point) {
                result.rejected.push(RejectedItem {
                    table: point.table,
                    id: point.id,
                    reason,
                });
                continue;
            }
            let shard = self.shard_of(&point);
            self.engine
                .data
                .entry((point.table.clone(), shard))
                .or_default()
                .insert(point.id.clone(), point);
            result.succeeded += 1;
        }
        Ok(result)
    }

    async fn get_by_ids(&self, table: &str, ids: &[String]) -> Result<Vec<MeasurePoint>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            for shard in 0..self.engine.shards {
                let hit = self
                    .engine
                    .data
                    .get(&(table.to_string(), shard))
                    .and_then(|m| m.get(id).cloned());
                if let Some(point) = hit {
                    found.push(point);
                    break;
                }
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::MeasureValue;
    use std::collections::BTreeMap;

    fn point(id: &str, latency: MeasureValue) -> MeasurePoint {
        let mut tags = BTreeMap::new();
        tags.insert("service".to_string(), MeasureValue::Str("svc".into()));
        let mut fields = BTreeMap::new();
        fields.insert("latency".to_string(), latency);
        MeasurePoint {
            table: "sw/latency".into(),
            id: id.into(),
            timestamp_millis: 1,
            shard_key: vec!["svc".into()],
            tags,
            fields,
        }
    }

    #[tokio::test]
    async fn overwrites_by_id() {
        let engine = EmbeddedMeasureTransport::new(4);
        engine.bulk(vec![point("a", MeasureValue::Long(1))]).await.unwrap();
        engine.bulk(vec![point("a", MeasureValue::Long(2))]).await.unwrap();
        assert_eq!(engine.len("sw/latency"), 1);
        let rows = engine.get_by_ids("sw/latency", &["a".into()]).await.unwrap();
        assert_eq!(rows[0].fields["latency"], MeasureValue::Long(2));
    }

    #[tokio::test]
    async fn rejects_only_conflicting_items() {
        let engine = EmbeddedMeasureTransport::default();
        let result = engine
            .bulk(vec![
                point("a", MeasureValue::Long(1)),
                point("b", MeasureValue::Str("oops".into())),
                point("", MeasureValue::Long(3)),
                point("c", MeasureValue::Long(4)),
            ])
            .await
            .unwrap();
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.rejected.len(), 2);
        assert_eq!(result.rejected[0].id, "b");
        assert!(result.rejected[0].reason.contains("latency"));
        assert_eq!(engine.len("sw/latency"), 2);
    }

    #[tokio::test]
    async fn missing_ids_are_skipped() {
        let engine = EmbeddedMeasureTransport::default();
        engine.bulk(vec![point("a", MeasureValue::Long(1))]).await.unwrap();
        let rows = engine
            .get_by_ids("sw/latency", &["zzz".into(), "a".into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "a");
    }

    #[test]
    fn shard_is_stable_for_a_key() {
        let engine = EmbeddedMeasureTransport::new(8);
        let p = point("a", MeasureValue::Long(1));
        let mut q = point("b", MeasureValue::Long(1));
        q.shard_key = p.shard_key.clone();
        assert_eq!(engine.shard_of(&p), engine.shard_of(&q));
        assert!(engine.shard_of(&p) < 8);
    }
}
