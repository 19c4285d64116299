//! Temperature Measurement cluster (0x0402). Used only to seed the
//! `temperature` resource at registration time; nothing in this tree
//! configures reporting or handles live updates for it.

use async_trait::async_trait;

use zigbee_core::ids::ClusterId;
use zigbee_core::DriverError;

use crate::cluster::{Cluster, DispatchContext};

const ATTR_MEASURED_VALUE: u16 = 0x0000;

/// `MeasuredValue`'s "not available" sentinel, also `i16::MIN` once
/// interpreted as a signed value.
const INVALID_MEASURED_VALUE: i16 = -32768;

pub struct TemperatureMeasurementCluster;

impl TemperatureMeasurementCluster {
    pub fn new() -> Self {
        TemperatureMeasurementCluster
    }

    /// Reads `MeasuredValue`, already in centi-°C. `None` on a read failure
    /// or the invalid sentinel `0x8000`.
    pub async fn read_measured_value(&self, ctx: &DispatchContext) -> Option<i32> {
        let bytes = ctx
            .radio
            .read_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::TEMPERATURE_MEASUREMENT, None, ATTR_MEASURED_VALUE)
            .await
            .ok()?;
        let raw = i16::from_le_bytes(bytes.get(0..2)?.try_into().ok()?);
        if raw == INVALID_MEASURED_VALUE {
            return None;
        }
        Some(i32::from(raw))
    }
}

impl Default for TemperatureMeasurementCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cluster for TemperatureMeasurementCluster {
    fn cluster_id(&self) -> ClusterId {
        ClusterId::TEMPERATURE_MEASUREMENT
    }
}
