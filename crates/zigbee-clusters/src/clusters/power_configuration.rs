//! Power Configuration cluster (0x0001). Configures battery voltage
//! reporting and turns inbound reports into the battery resources fed to
//! `fetchInitialResourceValues` / live updates, for devices that are
//! battery powered or battery-backed-up.

use async_trait::async_trait;
use std::sync::Arc;

use zigbee_codec::primitives::ZclReader;
use zigbee_core::device_service::DeviceService;
use zigbee_core::ids::ClusterId;
use zigbee_core::model::ResourceValue;
use zigbee_core::DriverError;

use crate::cluster::{Cluster, ConfigureContext, DispatchContext};

const ATTR_BATTERY_VOLTAGE: u16 = 0x0020;
const ATTR_BATTERY_PERCENTAGE_REMAINING: u16 = 0x0021;
const ATTR_BATTERY_VOLTAGE_MIN_THRESHOLD: u16 = 0x0035;
const ATTR_BATTERY_VOLTAGE_THRESHOLD1: u16 = 0x0036;
const ATTR_BATTERY_VOLTAGE_THRESHOLD2: u16 = 0x0037;
const ATTR_BATTERY_VOLTAGE_THRESHOLD3: u16 = 0x0038;
const ATTR_BATTERY_PERCENTAGE_MIN_THRESHOLD: u16 = 0x0039;
const ATTR_BATTERY_PERCENTAGE_THRESHOLD1: u16 = 0x003a;
const ATTR_BATTERY_PERCENTAGE_THRESHOLD2: u16 = 0x003b;
const ATTR_BATTERY_PERCENTAGE_THRESHOLD3: u16 = 0x003c;

const RESOURCE_BATTERY_VOLTAGE: &str = "batteryVoltage";
const RESOURCE_BATTERY_PERCENT: &str = "batteryPercent";
const RESOURCE_BATTERY_THRESHOLDS: &str = "batteryThresholds";

const CONFIG_MIN_REPORT_INTERVAL_SECS: &str = "powerConfig.minReportIntervalSecs";
const CONFIG_MAX_REPORT_INTERVAL_SECS: &str = "powerConfig.maxReportIntervalSecs";

const DEFAULT_MIN_REPORT_INTERVAL_SECS: u32 = 3600;
const DEFAULT_MAX_REPORT_INTERVAL_SECS: u32 = 21600;

pub struct PowerConfigurationCluster {
    device_service: Arc<dyn DeviceService>,
}

impl PowerConfigurationCluster {
    pub fn new(device_service: Arc<dyn DeviceService>) -> Self {
        PowerConfigurationCluster { device_service }
    }

    /// Best-effort initial battery voltage/percent read for
    /// `fetchInitialResourceValues`. Each attribute is read independently so
    /// a device that doesn't support one doesn't block the other.
    pub async fn read_initial_battery_values(&self, ctx: &DispatchContext) -> Vec<(String, ResourceValue)> {
        let mut values = Vec::new();

        if let Ok(bytes) = ctx.radio.read_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::POWER_CONFIGURATION, None, ATTR_BATTERY_VOLTAGE).await {
            if let Some(&raw) = bytes.first() {
                values.push((RESOURCE_BATTERY_VOLTAGE.to_string(), ResourceValue::MilliVolts(u32::from(raw) * 100)));
            }
        }

        if let Ok(bytes) = ctx
            .radio
            .read_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::POWER_CONFIGURATION, None, ATTR_BATTERY_PERCENTAGE_REMAINING)
            .await
        {
            if let Some(&raw) = bytes.first() {
                values.push((RESOURCE_BATTERY_PERCENT.to_string(), ResourceValue::Percentage((raw / 2).min(100))));
            }
        }

        values
    }

    /// Reads the four voltage and four percentage battery threshold
    /// attributes into a single JSON resource, matching the shape of
    /// `PowerConfigurationClusterBatteryThresholds` in the original driver.
    /// Fields whose attribute isn't supported by the device are left out of
    /// the object entirely rather than reported as zero.
    pub async fn read_initial_battery_thresholds(&self, ctx: &DispatchContext) -> Option<(String, ResourceValue)> {
        let attrs: [(&str, u16); 8] = [
            ("minThresholdDecivolts", ATTR_BATTERY_VOLTAGE_MIN_THRESHOLD),
            ("threshold1Decivolts", ATTR_BATTERY_VOLTAGE_THRESHOLD1),
            ("threshold2Decivolts", ATTR_BATTERY_VOLTAGE_THRESHOLD2),
            ("threshold3Decivolts", ATTR_BATTERY_VOLTAGE_THRESHOLD3),
            ("minThresholdPercent", ATTR_BATTERY_PERCENTAGE_MIN_THRESHOLD),
            ("threshold1Percent", ATTR_BATTERY_PERCENTAGE_THRESHOLD1),
            ("threshold2Percent", ATTR_BATTERY_PERCENTAGE_THRESHOLD2),
            ("threshold3Percent", ATTR_BATTERY_PERCENTAGE_THRESHOLD3),
        ];

        let mut fields = serde_json::Map::new();
        for (key, attribute_id) in attrs {
            if let Ok(bytes) = ctx.radio.read_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::POWER_CONFIGURATION, None, attribute_id).await {
                if let Some(&raw) = bytes.first() {
                    fields.insert(key.to_string(), serde_json::Value::from(raw));
                }
            }
        }

        if fields.is_empty() {
            None
        } else {
            Some((RESOURCE_BATTERY_THRESHOLDS.to_string(), ResourceValue::Json(serde_json::Value::Object(fields))))
        }
    }
}

#[async_trait]
impl Cluster for PowerConfigurationCluster {
    fn cluster_id(&self) -> ClusterId {
        ClusterId::POWER_CONFIGURATION
    }

    async fn configure(&self, ctx: &ConfigureContext) -> Result<(), DriverError> {
        let min_interval = ctx.config.get_u32_or(CONFIG_MIN_REPORT_INTERVAL_SECS, DEFAULT_MIN_REPORT_INTERVAL_SECS).await;
        let max_interval = ctx.config.get_u32_or(CONFIG_MAX_REPORT_INTERVAL_SECS, DEFAULT_MAX_REPORT_INTERVAL_SECS).await;

        ctx.radio.set_binding(ctx.eui64, ctx.endpoint_id, ClusterId::POWER_CONFIGURATION).await?;
        ctx.radio
            .set_reporting(
                ctx.eui64,
                ctx.endpoint_id,
                ClusterId::POWER_CONFIGURATION,
                ATTR_BATTERY_VOLTAGE,
                min_interval as u16,
                max_interval as u16,
            )
            .await
    }

    async fn on_attribute_report(&self, ctx: &DispatchContext, payload: &[u8]) -> Result<(), DriverError> {
        let mut reader = ZclReader::new(payload);
        let attribute_id = reader
            .get_u16()
            .map_err(|e| DriverError::MalformedFrame { cluster_id: ClusterId::POWER_CONFIGURATION.0, detail: e.to_string() })?;
        // One type byte follows the attribute id before the value in a real
        // ZCL attribute report; skip it since both attributes here are
        // single-byte uint8.
        let _data_type = reader.get_u8();
        let value = reader
            .get_u8()
            .map_err(|e| DriverError::MalformedFrame { cluster_id: ClusterId::POWER_CONFIGURATION.0, detail: e.to_string() })?;

        let uuid = ctx.eui64.to_uuid_string();
        match attribute_id {
            ATTR_BATTERY_VOLTAGE => {
                // Attribute is in units of 100mV.
                let millivolts = u32::from(value) * 100;
                self.device_service
                    .update_resource(&uuid, Some(ctx.endpoint_id), RESOURCE_BATTERY_VOLTAGE, &ResourceValue::MilliVolts(millivolts), None)
                    .await
            }
            ATTR_BATTERY_PERCENTAGE_REMAINING => {
                // Attribute is in units of half a percent.
                let percent = (value / 2).min(100);
                self.device_service
                    .update_resource(&uuid, Some(ctx.endpoint_id), RESOURCE_BATTERY_PERCENT, &ResourceValue::Percentage(percent), None)
                    .await
            }
            _ => Ok(()),
        }
    }
}
