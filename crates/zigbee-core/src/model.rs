use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ClusterId, EndpointId, Eui64};

/// Resource read/write/notify semantics. Combines freely, matching the
/// `readable|writable|executable|dynamic|emits-events|lazy-save` mode set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceMode {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub dynamic: bool,
    pub emits_events: bool,
    pub lazy_save: bool,
}

impl ResourceMode {
    pub const fn read_only() -> Self {
        ResourceMode {
            readable: true,
            writable: false,
            executable: false,
            dynamic: false,
            emits_events: true,
            lazy_save: false,
        }
    }

    pub const fn read_write() -> Self {
        ResourceMode {
            readable: true,
            writable: true,
            executable: false,
            dynamic: false,
            emits_events: true,
            lazy_save: false,
        }
    }
}

/// Typed resource value. The semantic type set matches the fixed schema
/// described for device resources: booleans, temperature in centi-degrees
/// Celsius, RSSI in dBm, LQI 0-255, percentages, battery millivolts, epoch
/// timestamps, ZCL enumerations rendered as strings, CIE-1931 color, and
/// opaque JSON for things like battery thresholds and link-quality detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ResourceValue {
    Bool(bool),
    CentiDegreesC(i32),
    Rssi(i8),
    Lqi(u8),
    Percentage(u8),
    MilliVolts(u32),
    EpochMillis(u64),
    Enum(String),
    Color { x: f64, y: f64 },
    Json(serde_json::Value),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: String,
    pub value: ResourceValue,
    pub mode: ResourceMode,
    pub last_updated_millis: Option<u64>,
}

impl Resource {
    pub fn new(id: impl Into<String>, value: ResourceValue, mode: ResourceMode) -> Self {
        Resource {
            id: id.into(),
            value,
            mode,
            last_updated_millis: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Decimal string form of the 8-bit endpoint number; the integer form
    /// lives in `endpoint_id` and must agree with metadata key
    /// `zigbee_epid` on the owning device (Invariant 1's sibling rule for
    /// endpoints).
    pub endpoint_id: EndpointId,
    pub profile: String,
    pub resources: HashMap<String, Resource>,
}

impl Endpoint {
    pub fn new(endpoint_id: EndpointId, profile: impl Into<String>) -> Self {
        Endpoint {
            endpoint_id,
            profile: profile.into(),
            resources: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerSource {
    Mains,
    Battery,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZigbeeDeviceType {
    EndDevice,
    Router,
    Coordinator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub endpoint_id: u8,
    pub app_device_id: u16,
    pub app_version: u8,
    pub server_cluster_ids: Vec<u16>,
    pub client_cluster_ids: Vec<u16>,
}

/// Immutable-after-pairing snapshot of what the radio observed about a
/// device at discovery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDeviceDetails {
    pub eui64: String,
    pub manufacturer: String,
    pub model: String,
    pub hardware_version: u32,
    pub firmware_version: u32,
    pub power_source: PowerSource,
    pub device_type: ZigbeeDeviceType,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl DiscoveredDeviceDetails {
    pub fn endpoint(&self, endpoint_id: u8) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|e| e.endpoint_id == endpoint_id)
    }
}

/// Opaque, per-device metadata map. Typed fields cover the keys this core
/// reads and writes directly; `extra` round-trips anything else untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub discovered_details: Option<String>,
    pub zigbee_common_version: Option<u32>,
    pub ota_upgrade_info: Option<serde_json::Value>,
    pub comm_fail_override_seconds: Option<u32>,
    pub battery_used_milli_amp_hr: Option<u32>,
    pub rejoins: Option<u32>,
    pub retries: Option<u32>,
    pub comcast_batt_save_extra: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub uuid: Eui64,
    pub device_class: String,
    pub device_class_version: u32,
    pub endpoints: Vec<Endpoint>,
    pub resources: HashMap<String, Resource>,
    pub metadata: DeviceMetadata,
}

impl Device {
    pub fn new(uuid: Eui64, device_class: impl Into<String>, device_class_version: u32) -> Self {
        Device {
            uuid,
            device_class: device_class.into(),
            device_class_version,
            endpoints: Vec::new(),
            resources: HashMap::new(),
            metadata: DeviceMetadata::default(),
        }
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.endpoint_id == id)
    }

    pub fn endpoint_mut(&mut self, id: EndpointId) -> Option<&mut Endpoint> {
        self.endpoints.iter_mut().find(|e| e.endpoint_id == id)
    }
}

/// Cluster priority used to order `configureCluster` calls; `Highest`
/// clusters configure before `Default`, unstable within the same band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClusterPriority {
    Default,
    Highest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub cluster_id: ClusterId,
}
