use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use zigbee_core::ids::{ClusterId, EndpointId, Eui64};
use zigbee_core::model::{ClusterPriority, DiscoveredDeviceDetails};
use zigbee_core::zhal::RadioOutbound;
use zigbee_core::DriverError;
use std::sync::Arc;

/// Configuration choice a cluster records about itself for one device, e.g.
/// a poll interval in quarter-seconds or a reporting on/off flag.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    U32(u32),
    Bool(bool),
    Text(String),
}

/// Cluster-specific configuration choices, consulted with typed
/// get-with-default helpers.
#[derive(Debug, Default)]
pub struct ConfigMap {
    values: Mutex<HashMap<String, ConfigValue>>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: impl Into<String>, value: ConfigValue) {
        self.values.lock().await.insert(key.into(), value);
    }

    pub async fn get_u32_or(&self, key: &str, default: u32) -> u32 {
        match self.values.lock().await.get(key) {
            Some(ConfigValue::U32(v)) => *v,
            _ => default,
        }
    }

    pub async fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.values.lock().await.get(key) {
            Some(ConfigValue::Bool(v)) => *v,
            _ => default,
        }
    }

    pub async fn get_text_or(&self, key: &str, default: &str) -> String {
        match self.values.lock().await.get(key) {
            Some(ConfigValue::Text(v)) => v.clone(),
            _ => default.to_string(),
        }
    }
}

/// Everything a cluster needs to configure itself for one device/endpoint.
pub struct ConfigureContext {
    pub eui64: Eui64,
    pub endpoint_id: EndpointId,
    pub details: DiscoveredDeviceDetails,
    pub radio: Arc<dyn RadioOutbound>,
    pub config: ConfigMap,
}

/// Context for an inbound-event dispatch into a cluster's handler.
///
/// `ne_rssi`/`ne_lqi` carry the near-end link metadata attached to the
/// inbound radio frame that triggered this dispatch, or `0, 0` when the
/// context was synthesized rather than decoded from a real message (e.g. a
/// diagnostics sweep's on-demand read). The registry treats `0, 0` as "no
/// metadata" and skips the near-end link-quality update for it.
pub struct DispatchContext {
    pub eui64: Eui64,
    pub endpoint_id: EndpointId,
    pub radio: Arc<dyn RadioOutbound>,
    pub ne_rssi: i8,
    pub ne_lqi: u8,
}

impl DispatchContext {
    /// A context not derived from a real inbound message (e.g. an on-demand
    /// read or a synthetic checkin), carrying no link metadata.
    pub fn without_link_metadata(eui64: Eui64, endpoint_id: EndpointId, radio: Arc<dyn RadioOutbound>) -> Self {
        DispatchContext { eui64, endpoint_id, radio, ne_rssi: 0, ne_lqi: 0 }
    }
}

/// A single ZCL cluster's behavior for one driver: configuration plus the
/// subset of inbound hooks it cares about. All hooks default to no-ops so a
/// cluster only needs to implement what it actually handles.
#[async_trait]
pub trait Cluster: Send + Sync + 'static {
    fn cluster_id(&self) -> ClusterId;

    fn priority(&self) -> ClusterPriority {
        ClusterPriority::Default
    }

    async fn configure(&self, _ctx: &ConfigureContext) -> Result<(), DriverError> {
        Ok(())
    }

    async fn on_attribute_report(&self, _ctx: &DispatchContext, _payload: &[u8]) -> Result<(), DriverError> {
        Ok(())
    }

    async fn on_cluster_command(&self, _ctx: &DispatchContext, _command_id: u8, _payload: &[u8]) -> Result<(), DriverError> {
        Ok(())
    }

    /// Invoked while a sleepy device is in its checkin window, letting a
    /// cluster read attributes that only matter for that device on-demand.
    async fn on_poll_control_checkin(&self, _ctx: &DispatchContext) -> Result<(), DriverError> {
        Ok(())
    }

    async fn on_device_rejoined(&self, _ctx: &DispatchContext) -> Result<(), DriverError> {
        Ok(())
    }

    /// Fired when the radio reports an alarm condition on this cluster
    /// (e.g. a Power Configuration low-battery alarm). No cluster in this
    /// tree currently raises one; kept as a default no-op hook so a future
    /// cluster can opt in without widening the trait.
    async fn on_alarm(&self, _ctx: &DispatchContext, _alarm_code: u8) -> Result<(), DriverError> {
        Ok(())
    }

    async fn on_alarm_cleared(&self, _ctx: &DispatchContext, _alarm_code: u8) -> Result<(), DriverError> {
        Ok(())
    }

    /// Called once before a cluster is dropped from the registry, for any
    /// cluster holding a resource (a scheduled task, an open handle) that
    /// needs explicit teardown rather than relying on `Drop`.
    async fn destroy(&self) {}
}
