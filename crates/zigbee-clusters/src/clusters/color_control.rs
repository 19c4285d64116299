//! Color Control cluster (0x0300). Exposes a direct command-send helper for
//! the common layer's resource-write path; there's no reporting configured
//! by default since color is normally driven by writes, not device-pushed
//! reports.

use async_trait::async_trait;

use zigbee_codec::color::encode_move_to_color;
use zigbee_core::ids::ClusterId;
use zigbee_core::DriverError;

use crate::cluster::{Cluster, DispatchContext};

/// ZCL Color Control "Move to Color" command id.
const CMD_MOVE_TO_COLOR: u8 = 0x07;

pub struct ColorControlCluster;

impl ColorControlCluster {
    pub fn new() -> Self {
        ColorControlCluster
    }

    /// Sends a `moveToColor` command for normalized CIE `x`/`y`. Returns
    /// `Err(ConfigConflict)` if the coordinates are outside `[0, 1)`.
    pub async fn write_color(&self, ctx: &DispatchContext, x: f64, y: f64, transition_time: u16) -> Result<(), DriverError> {
        let payload = encode_move_to_color(x, y, transition_time).ok_or_else(|| DriverError::ConfigConflict {
            detail: format!("color coordinates out of range: x={x}, y={y}"),
        })?;
        ctx.radio
            .send_command(ctx.eui64, ctx.endpoint_id, ClusterId::COLOR_CONTROL, None, false, CMD_MOVE_TO_COLOR, &payload)
            .await
    }
}

impl Default for ColorControlCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cluster for ColorControlCluster {
    fn cluster_id(&self) -> ClusterId {
        ClusterId::COLOR_CONTROL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::Arc;
    use zigbee_core::ids::{EndpointId, Eui64};
    use zigbee_core::zhal::RadioOutbound;

    struct RecordingRadio {
        sent: StdMutex<Vec<(u8, Vec<u8>)>>,
    }

    #[async_trait]
    impl RadioOutbound for RecordingRadio {
        async fn send_command(
            &self,
            _eui64: Eui64,
            _endpoint_id: EndpointId,
            _cluster_id: ClusterId,
            _mfg_code: Option<u16>,
            _encrypted: bool,
            command_id: u8,
            payload: &[u8],
        ) -> Result<(), DriverError> {
            self.sent.lock().unwrap().push((command_id, payload.to_vec()));
            Ok(())
        }
        async fn read_attribute(&self, _: Eui64, _: EndpointId, _: ClusterId, _: Option<u16>, _: u16) -> Result<Vec<u8>, DriverError> {
            Ok(vec![])
        }
        async fn write_attribute(&self, _: Eui64, _: EndpointId, _: ClusterId, _: Option<u16>, _: u16, _: &[u8]) -> Result<(), DriverError> {
            Ok(())
        }
        async fn set_binding(&self, _: Eui64, _: EndpointId, _: ClusterId) -> Result<(), DriverError> {
            Ok(())
        }
        async fn set_reporting(&self, _: Eui64, _: EndpointId, _: ClusterId, _: u16, _: u16, _: u16) -> Result<(), DriverError> {
            Ok(())
        }
        async fn start_discovery(&self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn stop_discovery(&self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn request_leave(&self, _: Eui64) -> Result<(), DriverError> {
            Ok(())
        }
        async fn refresh_ota_files(&self) -> Result<(), DriverError> {
            Ok(())
        }
        async fn configure_network_health_check(&self, _: u32, _: i32, _: u32, _: u32, _: u32) -> Result<(), DriverError> {
            Ok(())
        }
        async fn configure_pan_id_defender(&self, _: u32, _: u32, _: u32) -> Result<(), DriverError> {
            Ok(())
        }
    }

    // Reproduces the "color write" scenario: writing a normalized CIE pair
    // produces the scaled little-endian moveToColor payload.
    #[tokio::test]
    async fn write_color_sends_scaled_move_to_color_payload() {
        let radio = Arc::new(RecordingRadio { sent: StdMutex::new(Vec::new()) });
        let ctx = DispatchContext::without_link_metadata(Eui64(1), EndpointId(1), radio.clone());
        let cluster = ColorControlCluster::new();

        cluster.write_color(&ctx, 0.3127, 0.329, 0).await.unwrap();

        let sent = radio.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (CMD_MOVE_TO_COLOR, vec![0x0D, 0x50, 0x39, 0x54, 0x00, 0x00]));
    }

    #[tokio::test]
    async fn write_color_rejects_out_of_range_coordinates() {
        let radio = Arc::new(RecordingRadio { sent: StdMutex::new(Vec::new()) });
        let ctx = DispatchContext::without_link_metadata(Eui64(1), EndpointId(1), radio);
        let cluster = ColorControlCluster::new();

        assert!(cluster.write_color(&ctx, 1.5, 0.5, 0).await.is_err());
    }
}
