//! OTA Upgrade cluster (0x0019) plug-in. Configuration and attribute
//! reporting live entirely in [`zigbee_firmware`]; this cluster's only job
//! is to resend `ImageNotify` while a pending upgrade's device is listening,
//! and to feed `QueryNextImage` requests back into the firmware pipeline as
//! completion signals.

use async_trait::async_trait;
use std::sync::Arc;

use zigbee_core::device_service::DeviceService;
use zigbee_core::ids::ClusterId;
use zigbee_core::model::ResourceValue;
use zigbee_core::DriverError;
use zigbee_codec::primitives::ZclReader;

use zigbee_firmware::FirmwarePipeline;

use crate::cluster::{Cluster, DispatchContext};

const FIRMWARE_UPDATE_STATUS_RESOURCE: &str = "firmwareUpdateStatus";
const FIRMWARE_UPDATE_STATUS_PENDING: &str = "pending";
const OTA_IMAGE_NOTIFY_COMMAND_ID: u8 = 0x00;
const OTA_QUERY_NEXT_IMAGE_COMMAND_ID: u8 = 0x01;
const PAYLOAD_TYPE_QUERY_JITTER: u8 = 0x00;
const JITTER_MAX: u8 = 100;

pub struct OtaUpgradeCluster {
    device_service: Arc<dyn DeviceService>,
    firmware: Arc<FirmwarePipeline>,
}

impl OtaUpgradeCluster {
    pub fn new(device_service: Arc<dyn DeviceService>, firmware: Arc<FirmwarePipeline>) -> Self {
        OtaUpgradeCluster { device_service, firmware }
    }

    async fn send_image_notify(&self, ctx: &DispatchContext) -> Result<(), DriverError> {
        let payload = [PAYLOAD_TYPE_QUERY_JITTER, JITTER_MAX];
        ctx.radio
            .send_command(ctx.eui64, ctx.endpoint_id, ClusterId::OTA_UPGRADE, None, false, OTA_IMAGE_NOTIFY_COMMAND_ID, &payload)
            .await
    }
}

#[async_trait]
impl Cluster for OtaUpgradeCluster {
    fn cluster_id(&self) -> ClusterId {
        ClusterId::OTA_UPGRADE
    }

    async fn on_poll_control_checkin(&self, ctx: &DispatchContext) -> Result<(), DriverError> {
        let uuid = ctx.eui64.to_uuid_string();
        let status = self.device_service.get_resource_by_id(&uuid, None, FIRMWARE_UPDATE_STATUS_RESOURCE).await;
        let is_pending = matches!(
            status.map(|r| r.value),
            Some(ResourceValue::Enum(s)) if s.eq_ignore_ascii_case(FIRMWARE_UPDATE_STATUS_PENDING)
        );
        if is_pending {
            self.send_image_notify(ctx).await?;
        }
        Ok(())
    }

    async fn on_cluster_command(&self, ctx: &DispatchContext, command_id: u8, payload: &[u8]) -> Result<(), DriverError> {
        if command_id != OTA_QUERY_NEXT_IMAGE_COMMAND_ID {
            return Ok(());
        }

        let mut reader = ZclReader::new(payload);
        // FieldControl(1) + ManufacturerCode(2) + ImageType(2) precede the
        // current file version the device reports.
        let _field_control = reader.get_u8();
        let _manufacturer_code = reader.get_u16();
        let _image_type = reader.get_u16();
        let reported_version = match reader.get_u32() {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };

        let uuid = ctx.eui64.to_uuid_string();
        self.firmware.handle_query_next_image(&uuid, reported_version).await
    }
}
