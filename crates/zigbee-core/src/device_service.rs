use async_trait::async_trait;
use serde_json::Value;

use crate::error::DriverError;
use crate::ids::{EndpointId, Eui64};
use crate::model::{Device, Resource};

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFoundPayload {
    pub device_class: String,
    pub device_class_version: u32,
    pub uuid: String,
    pub manufacturer: String,
    pub model: String,
    /// Hardware version rendered as a decimal string.
    pub hardware_version: String,
    /// Firmware version rendered as `0x%08x`.
    pub firmware_version: String,
    pub higher_driver_metadata: Option<Value>,
    pub endpoint_profiles: Vec<(u8, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostUpgradeAction {
    None,
    Reconfigure,
}

/// The surrounding device service: persistence, descriptor repository, and
/// the application-facing resource model. Owned entirely outside this core;
/// only the contract is specified here.
#[async_trait]
pub trait DeviceService: Send + Sync + 'static {
    async fn get_devices_by_driver(&self, driver_name: &str) -> Vec<Eui64>;

    async fn get_resource_by_id(
        &self,
        uuid: &str,
        endpoint_id: Option<EndpointId>,
        resource_id: &str,
    ) -> Option<Resource>;

    async fn update_resource(
        &self,
        uuid: &str,
        endpoint_id: Option<EndpointId>,
        resource_id: &str,
        value: &crate::model::ResourceValue,
        details_json: Option<Value>,
    ) -> Result<(), DriverError>;

    async fn get_metadata(&self, uuid: &str, key: &str) -> Option<String>;
    async fn set_metadata(&self, uuid: &str, key: &str, value: &str) -> Result<(), DriverError>;

    async fn device_found(&self, payload: DeviceFoundPayload) -> Result<bool, DriverError>;

    fn is_shutting_down(&self) -> bool;
    fn is_in_recovery_mode(&self) -> bool;

    async fn reconfigure_device(
        &self,
        uuid: &str,
        delay_seconds: u32,
    ) -> Result<(), DriverError>;

    async fn is_reconfiguration_pending(&self, uuid: &str) -> bool;
    async fn send_reconfiguration_signal(&self, uuid: &str) -> Result<(), DriverError>;

    async fn get_post_upgrade_action(&self, uuid: &str) -> PostUpgradeAction;
    async fn is_device_in_comm_fail(&self, uuid: &str) -> bool;
    async fn get_resource_age_millis(
        &self,
        uuid: &str,
        endpoint_id: Option<EndpointId>,
        resource_id: &str,
    ) -> Option<u64>;

    async fn get_full_device(&self, uuid: &str) -> Option<Device>;
}
