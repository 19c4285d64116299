//! Sleepy-device checkin handling: reconfiguration handshake, battery-saving
//! payload ingestion, and the on-demand refresh window for clusters whose
//! resources have gone stale between checkins.

use std::sync::Arc;

use zigbee_core::device_service::DeviceService;
use zigbee_core::ids::ClusterId;
use zigbee_core::model::ResourceValue;
use zigbee_core::properties::PropertyProvider;
use zigbee_core::DriverError;

use crate::cluster::DispatchContext;
use crate::registry::{ClusterRegistry, DriverEventHooks};

/// ZCL Poll Control client command ids, sent in response to a checkin.
const CMD_CHECKIN_RESPONSE: u8 = 0x00;
const CMD_FAST_POLL_STOP: u8 = 0x01;

/// Resource ids this coordinator knows how to age-check. Kept as plain
/// strings since the backing resource model addresses resources by id.
const RESOURCE_BATTERY_VOLTAGE: &str = "batteryVoltage";
const RESOURCE_FE_RSSI: &str = "feRssi";
const RESOURCE_FE_LQI: &str = "feLqi";
const RESOURCE_TEMPERATURE: &str = "temperature";

/// Metadata key overrides, one per tracked resource; fall back to the
/// matching `PropertyProvider` default when absent.
const METADATA_BATTERY_VOLTAGE_REFRESH_SECS: &str = "BatteryVoltageRefreshMinSecs";
const METADATA_FE_RSSI_REFRESH_SECS: &str = "FeRssiRefreshMinSecs";
const METADATA_FE_LQI_REFRESH_SECS: &str = "FeLqiRefreshMinSecs";
const METADATA_TEMP_REFRESH_SECS: &str = "TempRefreshMinSecs";

/// The Comcast battery-saving checkin payload, attached in place of a normal
/// checkin when the device wants to push its diagnostic snapshot instead of
/// being polled for it.
#[derive(Debug, Clone, PartialEq)]
pub struct BatterySavingPayload {
    pub voltage_millivolts: u32,
    pub temp_centi_c: Option<i32>,
    pub rssi: i8,
    pub lqi: u8,
    pub retries: u32,
    pub rejoins: u32,
}

pub struct PollControlCoordinator {
    device_service: Arc<dyn DeviceService>,
    registry: Arc<ClusterRegistry>,
}

impl PollControlCoordinator {
    pub fn new(device_service: Arc<dyn DeviceService>, registry: Arc<ClusterRegistry>) -> Self {
        PollControlCoordinator { device_service, registry }
    }

    /// Handles an inbound checkin for `uuid`, addressed via `ctx` to the
    /// endpoint hosting the Poll Control cluster. `hooks` receives the
    /// forwarded higher-driver callback once cluster dispatch completes.
    pub async fn handle_checkin(
        &self,
        driver: &str,
        uuid: &str,
        ctx: &DispatchContext,
        properties: &dyn PropertyProvider,
        payload: Option<BatterySavingPayload>,
        hooks: &dyn DriverEventHooks,
    ) -> Result<(), DriverError> {
        if self.device_service.is_reconfiguration_pending(uuid).await {
            self.send_checkin_response(ctx, true).await?;
            self.device_service.send_reconfiguration_signal(uuid).await?;
            return Ok(());
        }

        if let Some(payload) = payload {
            self.apply_battery_saving_payload(uuid, ctx, &payload).await?;
            self.send_checkin_response(ctx, false).await?;
            return Ok(());
        }

        if !self.needs_refresh(uuid, properties).await {
            self.send_checkin_response(ctx, false).await?;
            return Ok(());
        }

        self.send_checkin_response(ctx, true).await?;
        self.registry.dispatch_poll_control_checkin(driver, ctx, hooks).await;
        self.send_fast_poll_stop(ctx).await?;
        Ok(())
    }

    /// Behaves like the reconfiguration branch of [`Self::handle_checkin`],
    /// used when a device rejoins the network while reconfiguration is
    /// still owed and the caller's policy allows acting on it immediately.
    pub async fn handle_device_rejoined(
        &self,
        uuid: &str,
        ctx: &DispatchContext,
        reconfigure_asap_allowed: bool,
    ) -> Result<(), DriverError> {
        if !reconfigure_asap_allowed {
            return Ok(());
        }
        if !self.device_service.is_reconfiguration_pending(uuid).await {
            return Ok(());
        }
        self.send_checkin_response(ctx, true).await?;
        self.device_service.send_reconfiguration_signal(uuid).await
    }

    async fn apply_battery_saving_payload(
        &self,
        uuid: &str,
        ctx: &DispatchContext,
        payload: &BatterySavingPayload,
    ) -> Result<(), DriverError> {
        self.device_service
            .update_resource(
                uuid,
                Some(ctx.endpoint_id),
                RESOURCE_BATTERY_VOLTAGE,
                &ResourceValue::MilliVolts(payload.voltage_millivolts),
                None,
            )
            .await?;
        self.device_service
            .update_resource(uuid, Some(ctx.endpoint_id), RESOURCE_FE_RSSI, &ResourceValue::Rssi(payload.rssi), None)
            .await?;
        self.device_service
            .update_resource(uuid, Some(ctx.endpoint_id), RESOURCE_FE_LQI, &ResourceValue::Lqi(payload.lqi), None)
            .await?;
        if let Some(temp) = payload.temp_centi_c {
            self.device_service
                .update_resource(
                    uuid,
                    Some(ctx.endpoint_id),
                    RESOURCE_TEMPERATURE,
                    &ResourceValue::CentiDegreesC(temp),
                    None,
                )
                .await?;
        }
        Ok(())
    }

    /// True if any tracked resource's age exceeds its refresh floor, or the
    /// resource has never been populated at all.
    async fn needs_refresh(&self, uuid: &str, properties: &dyn PropertyProvider) -> bool {
        let checks = [
            (RESOURCE_BATTERY_VOLTAGE, METADATA_BATTERY_VOLTAGE_REFRESH_SECS, properties.battery_voltage_refresh_min_secs()),
            (RESOURCE_FE_RSSI, METADATA_FE_RSSI_REFRESH_SECS, properties.fe_rssi_refresh_min_secs()),
            (RESOURCE_FE_LQI, METADATA_FE_LQI_REFRESH_SECS, properties.fe_lqi_refresh_min_secs()),
            (RESOURCE_TEMPERATURE, METADATA_TEMP_REFRESH_SECS, properties.temp_refresh_min_secs()),
        ];

        for (resource_id, metadata_key, default_floor_secs) in checks {
            let floor_secs = match self.device_service.get_metadata(uuid, metadata_key).await {
                Some(raw) => raw.parse::<u32>().unwrap_or(default_floor_secs),
                None => default_floor_secs,
            };
            let floor_millis = u64::from(floor_secs) * 1000;

            let age_millis = self.device_service.get_resource_age_millis(uuid, None, resource_id).await;
            match age_millis {
                None => return true,
                Some(age) if age > floor_millis => return true,
                Some(_) => {}
            }
        }
        false
    }

    async fn send_checkin_response(&self, ctx: &DispatchContext, start_fast_polling: bool) -> Result<(), DriverError> {
        let payload = [u8::from(start_fast_polling), 0x00, 0x00];
        ctx.radio
            .send_command(ctx.eui64, ctx.endpoint_id, ClusterId::POLL_CONTROL, None, false, CMD_CHECKIN_RESPONSE, &payload)
            .await
    }

    /// Exposed for callers that enter fast poll through a different path
    /// (e.g. a sleepy reconfiguration handshake during `configureDevice`)
    /// and need to end it once their own work is done.
    pub async fn stop_fast_poll(&self, ctx: &DispatchContext) -> Result<(), DriverError> {
        self.send_fast_poll_stop(ctx).await
    }

    async fn send_fast_poll_stop(&self, ctx: &DispatchContext) -> Result<(), DriverError> {
        ctx.radio
            .send_command(ctx.eui64, ctx.endpoint_id, ClusterId::POLL_CONTROL, None, false, CMD_FAST_POLL_STOP, &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Cluster, ConfigureContext};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use zigbee_core::device_service::{DeviceFoundPayload, PostUpgradeAction};
    use zigbee_core::ids::{EndpointId, Eui64};
    use zigbee_core::model::{Device, Resource};
    use zigbee_core::properties::MapPropertyProvider;
    use zigbee_core::zhal::RadioOutbound;

    #[derive(Default)]
    struct FakeDeviceService {
        reconfiguration_pending: AtomicBool,
        reconfiguration_signaled: AtomicBool,
        metadata: StdMutex<HashMap<(String, String), String>>,
        resource_ages: StdMutex<HashMap<String, u64>>,
        updated_resources: StdMutex<HashMap<String, ResourceValue>>,
    }

    #[async_trait]
    impl DeviceService for FakeDeviceService {
        async fn get_devices_by_driver(&self, _driver_name: &str) -> Vec<Eui64> {
            vec![]
        }

        async fn get_resource_by_id(&self, _uuid: &str, _endpoint_id: Option<EndpointId>, _resource_id: &str) -> Option<Resource> {
            None
        }

        async fn update_resource(
            &self,
            _uuid: &str,
            _endpoint_id: Option<EndpointId>,
            resource_id: &str,
            value: &ResourceValue,
            _details_json: Option<serde_json::Value>,
        ) -> Result<(), DriverError> {
            self.updated_resources.lock().unwrap().insert(resource_id.to_string(), value.clone());
            Ok(())
        }

        async fn get_metadata(&self, uuid: &str, key: &str) -> Option<String> {
            self.metadata.lock().unwrap().get(&(uuid.to_string(), key.to_string())).cloned()
        }

        async fn set_metadata(&self, uuid: &str, key: &str, value: &str) -> Result<(), DriverError> {
            self.metadata.lock().unwrap().insert((uuid.to_string(), key.to_string()), value.to_string());
            Ok(())
        }

        async fn device_found(&self, _payload: DeviceFoundPayload) -> Result<bool, DriverError> {
            Ok(true)
        }

        fn is_shutting_down(&self) -> bool {
            false
        }

        fn is_in_recovery_mode(&self) -> bool {
            false
        }

        async fn reconfigure_device(&self, _uuid: &str, _delay_seconds: u32) -> Result<(), DriverError> {
            Ok(())
        }

        async fn is_reconfiguration_pending(&self, _uuid: &str) -> bool {
            self.reconfiguration_pending.load(Ordering::SeqCst)
        }

        async fn send_reconfiguration_signal(&self, _uuid: &str) -> Result<(), DriverError> {
            self.reconfiguration_signaled.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn get_post_upgrade_action(&self, _uuid: &str) -> PostUpgradeAction {
            PostUpgradeAction::None
        }

        async fn is_device_in_comm_fail(&self, _uuid: &str) -> bool {
            false
        }

        async fn get_resource_age_millis(&self, _uuid: &str, _endpoint_id: Option<EndpointId>, resource_id: &str) -> Option<u64> {
            self.resource_ages.lock().unwrap().get(resource_id).copied()
        }

        async fn get_full_device(&self, _uuid: &str) -> Option<Device> {
            None
        }
    }

    struct CountingCluster {
        id: ClusterId,
        checkins: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Cluster for CountingCluster {
        fn cluster_id(&self) -> ClusterId {
            self.id
        }

        async fn on_poll_control_checkin(&self, _ctx: &DispatchContext) -> Result<(), DriverError> {
            self.checkins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RecordingRadio {
        sent: StdMutex<Vec<(u8, Vec<u8>)>>,
    }

    impl RecordingRadio {
        fn new() -> Arc<Self> {
            Arc::new(RecordingRadio { sent: StdMutex::new(Vec::new()) })
        }
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

    struct NoopHooks;
    impl DriverEventHooks for NoopHooks {}

    fn ctx(radio: Arc<dyn RadioOutbound>) -> DispatchContext {
        DispatchContext::without_link_metadata(Eui64(1), EndpointId(1), radio)
    }

    // Reproduces the "sleepy reconfiguration handshake" scenario: a checkin
    // arrives while reconfiguration is pending, and the only visible effect
    // is a fast-poll checkin response plus the reconfiguration signal, with
    // no attribute reads or cluster dispatch.
    #[tokio::test]
    async fn reconfiguration_pending_short_circuits_to_fast_poll() {
        let service = Arc::new(FakeDeviceService::default());
        service.reconfiguration_pending.store(true, Ordering::SeqCst);
        let registry = Arc::new(ClusterRegistry::new());
        let checkins = Arc::new(AtomicU32::new(0));
        registry.add_cluster("driverA", Arc::new(CountingCluster { id: ClusterId(1), checkins: checkins.clone() }));

        let coordinator = PollControlCoordinator::new(service.clone(), registry);
        let radio = RecordingRadio::new();
        let c = ctx(radio.clone());
        let properties = MapPropertyProvider::new();

        coordinator
            .handle_checkin("driverA", "000d6f000abcdef1", &c, &properties, None, &NoopHooks)
            .await
            .unwrap();

        assert!(service.reconfiguration_signaled.load(Ordering::SeqCst));
        assert_eq!(checkins.load(Ordering::SeqCst), 0);
        let sent = radio.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (CMD_CHECKIN_RESPONSE, vec![1, 0, 0]));
    }

    #[tokio::test]
    async fn battery_saving_payload_updates_resources_and_skips_fast_poll() {
        let service = Arc::new(FakeDeviceService::default());
        let registry = Arc::new(ClusterRegistry::new());
        let coordinator = PollControlCoordinator::new(service.clone(), registry);
        let radio = RecordingRadio::new();
        let c = ctx(radio.clone());
        let properties = MapPropertyProvider::new();

        let payload = BatterySavingPayload {
            voltage_millivolts: 3000,
            temp_centi_c: Some(2100),
            rssi: -60,
            lqi: 200,
            retries: 0,
            rejoins: 0,
        };

        coordinator
            .handle_checkin("driverA", "000d6f000abcdef1", &c, &properties, Some(payload), &NoopHooks)
            .await
            .unwrap();

        assert_eq!(
            service.updated_resources.lock().unwrap().get(RESOURCE_BATTERY_VOLTAGE),
            Some(&ResourceValue::MilliVolts(3000))
        );
        let sent = radio.sent.lock().unwrap();
        assert_eq!(sent[0], (CMD_CHECKIN_RESPONSE, vec![0, 0, 0]));
    }

    #[tokio::test]
    async fn empty_refresh_set_skips_fast_poll() {
        let service = Arc::new(FakeDeviceService::default());
        for resource in [RESOURCE_BATTERY_VOLTAGE, RESOURCE_FE_RSSI, RESOURCE_FE_LQI, RESOURCE_TEMPERATURE] {
            service.resource_ages.lock().unwrap().insert(resource.to_string(), 0);
        }
        let registry = Arc::new(ClusterRegistry::new());
        let coordinator = PollControlCoordinator::new(service, registry);
        let radio = RecordingRadio::new();
        let c = ctx(radio.clone());
        let properties = MapPropertyProvider::new();

        coordinator
            .handle_checkin("driverA", "000d6f000abcdef1", &c, &properties, None, &NoopHooks)
            .await
            .unwrap();

        let sent = radio.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (CMD_CHECKIN_RESPONSE, vec![0, 0, 0]));
    }

    #[tokio::test]
    async fn stale_resource_enters_fast_poll_dispatches_and_stops() {
        let service = Arc::new(FakeDeviceService::default());
        // No ages recorded at all: every resource is treated as never
        // populated, forcing a refresh.
        let registry = Arc::new(ClusterRegistry::new());
        let checkins = Arc::new(AtomicU32::new(0));
        registry.add_cluster("driverA", Arc::new(CountingCluster { id: ClusterId(1), checkins: checkins.clone() }));
        let coordinator = PollControlCoordinator::new(service, registry);
        let radio = RecordingRadio::new();
        let c = ctx(radio.clone());
        let properties = MapPropertyProvider::new();

        coordinator
            .handle_checkin("driverA", "000d6f000abcdef1", &c, &properties, None, &NoopHooks)
            .await
            .unwrap();

        assert_eq!(checkins.load(Ordering::SeqCst), 1);
        let sent = radio.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (CMD_CHECKIN_RESPONSE, vec![1, 0, 0]));
        assert_eq!(sent[1], (CMD_FAST_POLL_STOP, vec![]));
    }

    #[tokio::test]
    async fn device_rejoined_triggers_reconfiguration_handshake_when_allowed() {
        let service = Arc::new(FakeDeviceService::default());
        service.reconfiguration_pending.store(true, Ordering::SeqCst);
        let registry = Arc::new(ClusterRegistry::new());
        let coordinator = PollControlCoordinator::new(service.clone(), registry);
        let radio = RecordingRadio::new();
        let c = ctx(radio.clone());

        coordinator.handle_device_rejoined("000d6f000abcdef1", &c, true).await.unwrap();

        assert!(service.reconfiguration_signaled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn device_rejoined_does_nothing_when_asap_not_allowed() {
        let service = Arc::new(FakeDeviceService::default());
        service.reconfiguration_pending.store(true, Ordering::SeqCst);
        let registry = Arc::new(ClusterRegistry::new());
        let coordinator = PollControlCoordinator::new(service.clone(), registry);
        let radio = RecordingRadio::new();
        let c = ctx(radio.clone());

        coordinator.handle_device_rejoined("000d6f000abcdef1", &c, false).await.unwrap();

        assert!(!service.reconfiguration_signaled.load(Ordering::SeqCst));
    }
}
