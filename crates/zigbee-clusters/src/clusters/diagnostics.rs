//! Diagnostics cluster (0x0b05). Backs both the link-quality resources
//! populated at `fetchInitialResourceValues` and the 30-minute diagnostics
//! collection task, both of which read `LastMessageRSSI`/`LastMessageLQI`
//! on demand rather than configuring reports.

use async_trait::async_trait;

use zigbee_core::ids::ClusterId;
use zigbee_core::zhal::RadioOutbound;
use zigbee_core::DriverError;

use crate::cluster::{Cluster, DispatchContext};

const ATTR_LAST_MESSAGE_LQI: u16 = 0x011c;
const ATTR_LAST_MESSAGE_RSSI: u16 = 0x011d;

pub struct DiagnosticsCluster;

impl DiagnosticsCluster {
    pub fn new() -> Self {
        DiagnosticsCluster
    }

    /// Reads the far-end RSSI/LQI pair the device last observed from us.
    pub async fn read_fe_rssi_lqi(&self, ctx: &DispatchContext) -> Result<(i8, u8), DriverError> {
        let rssi_bytes = ctx.radio.read_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::DIAGNOSTICS, None, ATTR_LAST_MESSAGE_RSSI).await?;
        let lqi_bytes = ctx.radio.read_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::DIAGNOSTICS, None, ATTR_LAST_MESSAGE_LQI).await?;

        let rssi = *rssi_bytes.first().ok_or_else(|| DriverError::MalformedFrame {
            cluster_id: ClusterId::DIAGNOSTICS.0,
            detail: "empty LastMessageRSSI reply".to_string(),
        })? as i8;
        let lqi = *lqi_bytes.first().ok_or_else(|| DriverError::MalformedFrame {
            cluster_id: ClusterId::DIAGNOSTICS.0,
            detail: "empty LastMessageLQI reply".to_string(),
        })?;

        Ok((rssi, lqi))
    }
}

impl Default for DiagnosticsCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cluster for DiagnosticsCluster {
    fn cluster_id(&self) -> ClusterId {
        ClusterId::DIAGNOSTICS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use zigbee_core::ids::{EndpointId, Eui64};

    struct ScriptedRadio;
    #[async_trait]
    impl RadioOutbound for ScriptedRadio {
        async fn send_command(&self, _: Eui64, _: EndpointId, _: ClusterId, _: Option<u16>, _: bool, _: u8, _: &[u8]) -> Result<(), DriverError> {
            Ok(())
        }
        async fn read_attribute(&self, _: Eui64, _: EndpointId, _: ClusterId, _: Option<u16>, attribute_id: u16) -> Result<Vec<u8>, DriverError> {
            match attribute_id {
                ATTR_LAST_MESSAGE_RSSI => Ok(vec![(-40i8) as u8]),
                ATTR_LAST_MESSAGE_LQI => Ok(vec![200]),
                _ => Err(DriverError::transient("read_attribute", "unexpected attribute")),
            }
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

    #[tokio::test]
    async fn reads_rssi_and_lqi() {
        let ctx = DispatchContext::without_link_metadata(Eui64(1), EndpointId(1), Arc::new(ScriptedRadio));
        let cluster = DiagnosticsCluster::new();
        let (rssi, lqi) = cluster.read_fe_rssi_lqi(&ctx).await.unwrap();
        assert_eq!(rssi, -40);
        assert_eq!(lqi, 200);
    }
}
