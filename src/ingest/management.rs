//! Instance registration and heartbeat messages

use super::{id, NamingControl, ServiceInstanceUpdate, ServiceMeta, Source, SourceReceiver};
use crate::records::{InstanceProperties, Layer, IPV4S};
use crate::time_bucket::{time_bucket, DownSampling};
use crate::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Message key prefix marking a registration.
pub const REGISTER_PREFIX: &str = "register-";
const IPV4: &str = "ipv4";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyStringValuePair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePropertiesReport {
    pub service: String,
    pub service_instance: String,
    #[serde(default)]
    pub properties: Vec<KeyStringValuePair>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePing {
    pub service: String,
    pub service_instance: String,
}

/// Turns management messages into instance and service sources.
pub struct ServiceManagementHandler {
    receiver: Arc<SourceReceiver>,
    naming: NamingControl,
}

impl ServiceManagementHandler {
    pub fn new(receiver: Arc<SourceReceiver>, naming: NamingControl) -> Self {
        Self { receiver, naming }
    }

    /// Handles one JSON message. Keys starting with `register-` carry
    /// instance properties, all others are heartbeats.
    pub fn handle(&self, key: &str, payload: &[u8]) -> Result<()> {
        self.handle_at(key, payload, chrono::Utc::now().timestamp_millis())
    }

    pub fn handle_at(&self, key: &str, payload: &[u8], now_millis: i64) -> Result<()> {
        if key.starts_with(REGISTER_PREFIX) {
            self.report_properties(serde_json::from_slice(payload)?, now_millis)
        } else {
            self.keep_alive(serde_json::from_slice(payload)?, now_millis)
        }
    }

    fn report_properties(&self, report: InstancePropertiesReport, now_millis: i64) -> Result<()> {
        let service_name = self.naming.format_service_name(&report.service);
        let instance_name = self.naming.format_instance_name(&report.service_instance);
        debug!(service = %service_name, instance = %instance_name, "Instance registered");

        let mut properties = InstanceProperties::default();
        let mut ipv4s = Vec::new();
        for prop in report.properties {
            if prop.key == IPV4 {
                ipv4s.push(prop.value);
            } else {
                properties.insert(prop.key, prop.value);
            }
        }
        properties.insert(IPV4S, ipv4s.join(","));

        self.receiver
            .receive(Source::ServiceInstanceUpdate(ServiceInstanceUpdate {
                service_id: id::service_id(&service_name, true),
                name: instance_name,
                layer: Layer::General,
                properties: Some(properties),
                time_bucket: time_bucket(now_millis, DownSampling::Minute),
            }))
    }

    fn keep_alive(&self, ping: InstancePing, now_millis: i64) -> Result<()> {
        let bucket = time_bucket(now_millis, DownSampling::Minute);
        let service_name = self.naming.format_service_name(&ping.service);
        let instance_name = self.naming.format_instance_name(&ping.service_instance);
        debug!(service = %service_name, instance = %instance_name, "Instance ping");

        self.receiver
            .receive(Source::ServiceInstanceUpdate(ServiceInstanceUpdate {
                service_id: id::service_id(&service_name, true),
                name: instance_name,
                layer: Layer::General,
                properties: None,
                time_bucket: bucket,
            }))?;
        self.receiver.receive(Source::ServiceMeta(ServiceMeta {
            name: service_name,
            layer: Layer::General,
            time_bucket: bucket,
        }))
    }
}
