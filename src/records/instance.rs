//! Service instance inventory

use super::Layer;
use crate::model::{
    ComplexObject, MergePolicy, Record, RecordDescriptor, RecordKind, SemanticType, StorageEntity,
    TIME_BUCKET,
};
use crate::{Error, Result};
use serde_json::{Map, Value as Json};
use std::sync::OnceLock;

pub const INDEX_NAME: &str = "instance_traffic";
pub const SERVICE_ID: &str = "service_id";
pub const NAME: &str = "name";
pub const LAYER: &str = "layer";
pub const LAST_PING: &str = "last_ping";
pub const PROPERTIES: &str = "properties";
pub const PROPERTIES_TIME: &str = "properties_time";

/// Property holding the instance's IPv4 addresses, comma separated.
pub const IPV4S: &str = "ipv4s";

/// Instance properties as reported at registration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceProperties(pub Map<String, Json>);

impl InstanceProperties {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Json::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), Json::String(value.into()));
    }
}

impl ComplexObject for InstanceProperties {
    fn to_storage_form(&self) -> String {
        Json::Object(self.0.clone()).to_string()
    }

    fn from_storage_form(data: &str) -> Result<Self> {
        match serde_json::from_str(data) {
            Ok(Json::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(Error::Decode {
                column: PROPERTIES.to_string(),
                reason: format!("expected a JSON object, got {}", other),
            }),
            Err(e) => Err(Error::Decode {
                column: PROPERTIES.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Heartbeat and registration state of one service instance.
///
/// Keyed by service and instance name only, so every update of an instance
/// lands on one row. The first bucket it was seen in is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceTraffic {
    pub service_id: String,
    pub name: String,
    pub layer: Layer,
    pub last_ping: i64,
    /// Set by registrations, absent on plain heartbeats
    pub properties: Option<InstanceProperties>,
    pub time_bucket: i64,
}

impl StorageEntity for InstanceTraffic {
    fn descriptor() -> &'static RecordDescriptor {
        static DESCRIPTOR: OnceLock<RecordDescriptor> = OnceLock::new();
        DESCRIPTOR.get_or_init(|| {
            RecordDescriptor::builder(INDEX_NAME, RecordKind::Metric)
                .tag(SERVICE_ID, SemanticType::String)
                .tag(NAME, SemanticType::String)
                .tag(LAYER, SemanticType::Enum)
                .merged(LAST_PING, SemanticType::Long, MergePolicy::Max)
                .merged(PROPERTIES_TIME, SemanticType::Long, MergePolicy::Max)
                .merged(
                    PROPERTIES,
                    SemanticType::ComplexObject,
                    MergePolicy::LatestBy(PROPERTIES_TIME.to_string()),
                )
                .merge_by(TIME_BUCKET, MergePolicy::Min)
                .shard_key(SERVICE_ID, 0)
                .identity(&[SERVICE_ID, NAME])
                .build()
        })
    }

    fn to_record(&self) -> Result<Record> {
        let mut builder = Record::builder(Self::descriptor())
            .with(SERVICE_ID, self.service_id.as_str())
            .with(NAME, self.name.as_str())
            .with(LAYER, self.layer.ordinal())
            .with(LAST_PING, self.last_ping)
            .with(TIME_BUCKET, self.time_bucket);
        if let Some(properties) = &self.properties {
            builder = builder
                .with_complex(PROPERTIES, properties)
                .with(PROPERTIES_TIME, self.last_ping);
        }
        builder.build()
    }

    fn from_record(record: &Record) -> Result<Self> {
        let properties = match record.get(PROPERTIES) {
            Some(_) => Some(record.get_complex::<InstanceProperties>(PROPERTIES)?),
            None => None,
        };
        Ok(Self {
            service_id: record.get_str(SERVICE_ID)?.to_string(),
            name: record.get_str(NAME)?.to_string(),
            layer: Layer::from_ordinal(record.get_i64(LAYER)?)?,
            last_ping: record.get_i64(LAST_PING)?,
            properties,
            time_bucket: record.get_i64(TIME_BUCKET)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traffic(last_ping: i64, properties: Option<&str>, bucket: i64) -> Record {
        InstanceTraffic {
            service_id: "c3Zj.1".into(),
            name: "inst-1".into(),
            layer: Layer::General,
            last_ping,
            properties: properties.map(|os| {
                let mut p = InstanceProperties::default();
                p.insert("os", os);
                p
            }),
            time_bucket: bucket,
        }
        .to_record()
        .unwrap()
    }

    #[test]
    fn heartbeat_keeps_registered_properties() {
        let descriptor = InstanceTraffic::descriptor();
        let mut registered = traffic(100, Some("linux"), 202403050701);
        registered
            .merge(&traffic(200, None, 202403050703), descriptor)
            .unwrap();

        let merged = InstanceTraffic::from_record(&registered).unwrap();
        assert_eq!(merged.last_ping, 200);
        assert_eq!(merged.time_bucket, 202403050701);
        assert_eq!(merged.properties.unwrap().get("os"), Some("linux"));
    }

    #[test]
    fn later_registration_wins() {
        let descriptor = InstanceTraffic::descriptor();
        let mut a = traffic(300, Some("windows"), 202403050705);
        a.merge(&traffic(100, Some("linux"), 202403050701), descriptor)
            .unwrap();
        let merged = InstanceTraffic::from_record(&a).unwrap();
        assert_eq!(merged.properties.unwrap().get("os"), Some("windows"));
    }

    #[test]
    fn id_is_service_and_instance() {
        assert_eq!(traffic(1, None, 202403050701).id, "c3Zj.1_inst-1");
    }
}
