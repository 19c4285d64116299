//! The radio abstraction (`zhal`) boundary. This core never talks to a
//! radio chip directly; it consumes inbound events and issues outbound
//! operations through these traits, exactly as described as an external
//! collaborator. A production binding implements [`RadioOutbound`] against
//! the real radio; a test double implements it in memory.

use async_trait::async_trait;

use crate::error::DriverError;
use crate::ids::{ClusterId, EndpointId, Eui64};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaEventType {
    LegacyBootloadStarted,
    LegacyBootloadFailed,
    LegacyBootloadCompleted,
    ImageNotify,
    QueryNextImageRequest,
    QueryNextImageResponse,
    UpgradeStarted,
    UpgradeEndRequest,
    UpgradeEndResponse,
}

/// Events the radio layer delivers to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioInboundEvent {
    AttributeReport {
        eui64: Eui64,
        endpoint_id: EndpointId,
        cluster_id: ClusterId,
        rssi: i8,
        lqi: u8,
        payload: Vec<u8>,
    },
    ClusterCommand {
        eui64: Eui64,
        endpoint_id: EndpointId,
        cluster_id: ClusterId,
        command_id: u8,
        mfg_specific: bool,
        mfg_code: Option<u16>,
        rssi: i8,
        lqi: u8,
        payload: Vec<u8>,
    },
    DeviceRejoined {
        eui64: Eui64,
        is_secure: bool,
    },
    DeviceLeft {
        eui64: Eui64,
    },
    DeviceAnnounced {
        eui64: Eui64,
        device_type: crate::model::ZigbeeDeviceType,
        power_source: crate::model::PowerSource,
    },
    OtaUpgradeMessageSent {
        eui64: Eui64,
        event_type: OtaEventType,
        timestamp_millis: u64,
        sent_status: Option<bool>,
        buffer: Vec<u8>,
    },
    OtaUpgradeMessageReceived {
        eui64: Eui64,
        event_type: OtaEventType,
        timestamp_millis: u64,
        buffer: Vec<u8>,
    },
}

/// Outbound operations the core invokes on the radio layer. All operations
/// are potentially blocking I/O from the caller's point of view (§5), so
/// they are modeled as async and may fail with a [`DriverError::Transient`].
#[async_trait]
pub trait RadioOutbound: Send + Sync + 'static {
    async fn send_command(
        &self,
        eui64: Eui64,
        endpoint_id: EndpointId,
        cluster_id: ClusterId,
        mfg_code: Option<u16>,
        encrypted: bool,
        command_id: u8,
        payload: &[u8],
    ) -> Result<(), DriverError>;

    async fn read_attribute(
        &self,
        eui64: Eui64,
        endpoint_id: EndpointId,
        cluster_id: ClusterId,
        mfg_code: Option<u16>,
        attribute_id: u16,
    ) -> Result<Vec<u8>, DriverError>;

    async fn write_attribute(
        &self,
        eui64: Eui64,
        endpoint_id: EndpointId,
        cluster_id: ClusterId,
        mfg_code: Option<u16>,
        attribute_id: u16,
        value: &[u8],
    ) -> Result<(), DriverError>;

    async fn set_binding(
        &self,
        eui64: Eui64,
        endpoint_id: EndpointId,
        cluster_id: ClusterId,
    ) -> Result<(), DriverError>;

    async fn set_reporting(
        &self,
        eui64: Eui64,
        endpoint_id: EndpointId,
        cluster_id: ClusterId,
        attribute_id: u16,
        min_interval_secs: u16,
        max_interval_secs: u16,
    ) -> Result<(), DriverError>;

    async fn start_discovery(&self) -> Result<(), DriverError>;
    async fn stop_discovery(&self) -> Result<(), DriverError>;
    async fn request_leave(&self, eui64: Eui64) -> Result<(), DriverError>;
    async fn refresh_ota_files(&self) -> Result<(), DriverError>;

    async fn configure_network_health_check(
        &self,
        interval_millis: u32,
        cca_threshold: i32,
        cca_failure_threshold: u32,
        restore_threshold: u32,
        delay_between_retries_millis: u32,
    ) -> Result<(), DriverError>;

    async fn configure_pan_id_defender(
        &self,
        change_threshold: u32,
        window_millis: u32,
        restore_millis: u32,
    ) -> Result<(), DriverError>;
}
