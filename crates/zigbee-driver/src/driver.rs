//! Per-driver orchestration: the lifecycle hooks a device service drives a
//! Zigbee driver instance through, built on top of the cluster registry,
//! discovered-device cache, poll-control coordinator and firmware pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use zigbee_clusters::cluster::{ConfigMap, ConfigureContext, DispatchContext};
use zigbee_clusters::clusters::{DiagnosticsCluster, PowerConfigurationCluster, TemperatureMeasurementCluster};
use zigbee_clusters::registry::DriverEventHooks;
use zigbee_clusters::{ClusterRegistry, DiscoveredDeviceStore, PollControlCoordinator};
use zigbee_core::device_service::{DeviceFoundPayload, DeviceService};
use zigbee_core::events::EventBus;
use zigbee_core::ids::{ClusterId, EndpointId, Eui64};
use zigbee_core::model::{DiscoveredDeviceDetails, PowerSource, ResourceValue};
use zigbee_core::zhal::RadioOutbound;
use zigbee_core::{Clock, DriverError};
use zigbee_firmware::FirmwarePipeline;
use zigbee_watchdog::{CommWatchdog, WatchdogError};

use crate::link_quality::{determine_link_quality, link_quality_details_json, LinkQualityLevel};
use crate::profile::{profile_for_device_class, PROFILE_SENSOR};

const ZIGBEE_COMMON_VERSION_METADATA_KEY: &str = "zigbeeCommonVersion";
const CURRENT_ZIGBEE_COMMON_VERSION: u32 = 2;

const RESOURCE_LINK_QUALITY: &str = "linkQuality";
const RESOURCE_NETWORK_TYPE: &str = "networkType";
const RESOURCE_COMM_FAIL: &str = "commFail";
const RESOURCE_LABEL: &str = "label";
const RESOURCE_RESET_TO_FACTORY: &str = "resetToFactory";
const RESOURCE_LAST_USER_INTERACTION_DATE: &str = "lastUserInteractionDate";
const RESOURCE_TEMPERATURE: &str = "temperature";

const NETWORK_TYPE_ZIGBEE: &str = "zigbee";

const DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(30 * 60);
const DIAGNOSTICS_INTER_DEVICE_DELAY: Duration = Duration::from_secs(5);
const RECONFIGURATION_CHECKIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How a device reports: whether it stays awake to be polled, checks in
/// periodically, or maintains a reporting-only live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxMode {
    Sleepy,
    PseudoSleepy,
    NonSleepy,
}

/// Static per-driver identity and policy flags, separated from the
/// runtime collaborators so a driver's wiring reads as "who it talks to"
/// plus "how it's configured" rather than one long constructor.
#[derive(Debug, Clone)]
pub struct CommonDriverConfig {
    pub driver_name: String,
    pub device_class: String,
    pub device_class_version: u32,
    pub device_ids: Vec<u16>,
    pub rx_mode: RxMode,
    pub skip_configuration: bool,
    pub battery_backed_up: bool,
    pub read_initial_battery_thresholds: bool,
    pub diagnostics_collection_enabled: bool,
    /// Baseline comm-fail timeout for every device this driver monitors,
    /// overridden per device by the `commFailOverrideSeconds` metadata key.
    pub comm_fail_timeout_seconds: u32,
}

/// Hooks a concrete device-type driver implements on top of the behavior
/// every Zigbee driver shares. All default to the common-only behavior so a
/// driver with nothing special to add can skip implementing this entirely.
#[async_trait]
pub trait HigherDriver: Send + Sync + 'static {
    /// Gives the higher driver first refusal on a discovered device. `None`
    /// defers to the default app-device-id match against the driver's
    /// configured `device_ids`.
    fn claim_device(&self, _details: &DiscoveredDeviceDetails) -> Option<bool> {
        None
    }

    async fn device_rejected(&self, _uuid: &str) {}
    async fn post_device_removed(&self, _uuid: &str) {}

    /// Resources the higher driver wants populated at registration time, on
    /// top of the common set (`linkQuality`, `networkType`, ...).
    async fn fetch_initial_resource_values(&self, _ctx: &ConfigureContext) -> Vec<(String, ResourceValue)> {
        Vec::new()
    }

    /// `Ok(true)` means the higher driver persisted the write itself and the
    /// common driver should not also call `update_resource`.
    async fn write_resource(&self, _uuid: &str, _resource_id: &str, _value: &ResourceValue) -> Result<bool, DriverError> {
        Ok(false)
    }

    /// Forwarded after the common driver's own attribute-report handling
    /// (near-end link quality update, then cluster dispatch) has run.
    async fn attribute_report(&self, _ctx: &DispatchContext, _cluster_id: ClusterId, _payload: &[u8]) {}
    async fn cluster_command(&self, _ctx: &DispatchContext, _cluster_id: ClusterId, _command_id: u8, _payload: &[u8]) {}
    async fn poll_control_checkin(&self, _ctx: &DispatchContext) {}
    async fn device_rejoined(&self, _ctx: &DispatchContext) {}
}

struct NullHigherDriver;
#[async_trait]
impl HigherDriver for NullHigherDriver {}

/// The last RSSI/LQI reading seen from each end, cached so a near-end-only
/// update (from an inbound message's link metadata) and a far-end-only
/// update (from a Diagnostics cluster read) can each recompute the merged
/// level without clobbering the other side's last known value.
struct LinkQualityState {
    level: LinkQualityLevel,
    ne_rssi: i8,
    ne_lqi: u8,
    fe_rssi: i8,
    fe_lqi: u8,
}

impl Default for LinkQualityState {
    fn default() -> Self {
        LinkQualityState { level: LinkQualityLevel::Unknown, ne_rssi: i8::MIN, ne_lqi: 0, fe_rssi: i8::MIN, fe_lqi: 0 }
    }
}

struct Inner {
    config: CommonDriverConfig,

    clock: Arc<dyn Clock>,
    radio: Arc<dyn RadioOutbound>,
    device_service: Arc<dyn DeviceService>,
    events: Arc<dyn EventBus>,
    registry: Arc<ClusterRegistry>,
    discovered_store: Arc<DiscoveredDeviceStore>,
    poll_control: Arc<PollControlCoordinator>,
    firmware: Arc<FirmwarePipeline>,
    higher: Arc<dyn HigherDriver>,
    watchdog: Arc<CommWatchdog>,

    discovery_active: AtomicBool,
    link_quality: DashMap<String, LinkQualityState>,
    diagnostics_task: Mutex<Option<JoinHandle<()>>>,
}

/// One instance of this orchestrator exists per device-class driver. Cheap
/// to clone; every clone shares the same registry, caches and background
/// diagnostics task.
#[derive(Clone)]
pub struct CommonDriver {
    inner: Arc<Inner>,
}

impl CommonDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CommonDriverConfig,
        clock: Arc<dyn Clock>,
        radio: Arc<dyn RadioOutbound>,
        device_service: Arc<dyn DeviceService>,
        events: Arc<dyn EventBus>,
        registry: Arc<ClusterRegistry>,
        discovered_store: Arc<DiscoveredDeviceStore>,
        poll_control: Arc<PollControlCoordinator>,
        firmware: Arc<FirmwarePipeline>,
        higher: Option<Arc<dyn HigherDriver>>,
    ) -> Self {
        let watchdog = Arc::new(CommWatchdog::new(clock.clone(), Some(device_service.clone())));
        CommonDriver {
            inner: Arc::new(Inner {
                config,
                clock,
                radio,
                device_service,
                events,
                registry,
                discovered_store,
                poll_control,
                firmware,
                higher: higher.unwrap_or_else(|| Arc::new(NullHigherDriver)),
                watchdog,
                discovery_active: AtomicBool::new(false),
                link_quality: DashMap::new(),
                diagnostics_task: Mutex::new(None),
            }),
        }
    }

    pub fn driver_name(&self) -> &str {
        &self.inner.config.driver_name
    }

    /// Migrates `zigbeeCommonVersion` 1 to 2 (introduces the `linkQuality`
    /// resource) for every device already registered under this driver, then
    /// starts the diagnostics collection task if at least one device is
    /// registered and collection is enabled.
    pub async fn startup(&self) -> Result<(), DriverError> {
        let bridge: Arc<dyn EventBus> = Arc::new(WatchdogEventBridge { inner: Arc::downgrade(&self.inner) });
        match self.inner.watchdog.init(bridge).await {
            Ok(()) | Err(WatchdogError::AlreadyInitialized) => {}
            Err(err) => return Err(err.into()),
        }

        let devices = self.inner.device_service.get_devices_by_driver(&self.inner.config.driver_name).await;

        for eui64 in &devices {
            let uuid = eui64.to_uuid_string();
            let version = self
                .inner
                .device_service
                .get_metadata(&uuid, ZIGBEE_COMMON_VERSION_METADATA_KEY)
                .await
                .and_then(|raw| raw.parse::<u32>().ok())
                .unwrap_or(1);

            if version < CURRENT_ZIGBEE_COMMON_VERSION {
                if self
                    .inner
                    .device_service
                    .get_resource_by_id(&uuid, None, RESOURCE_LINK_QUALITY)
                    .await
                    .is_none()
                {
                    self.inner
                        .device_service
                        .update_resource(&uuid, None, RESOURCE_LINK_QUALITY, &ResourceValue::Enum(LinkQualityLevel::Unknown.as_str().to_string()), None)
                        .await?;
                }
                self.inner
                    .device_service
                    .set_metadata(&uuid, ZIGBEE_COMMON_VERSION_METADATA_KEY, &CURRENT_ZIGBEE_COMMON_VERSION.to_string())
                    .await?;
            }
        }

        if self.inner.config.diagnostics_collection_enabled && !devices.is_empty() {
            self.start_diagnostics_task();
        }

        Ok(())
    }

    pub async fn discover_start(&self) -> Result<(), DriverError> {
        self.inner.discovery_active.store(true, Ordering::SeqCst);
        self.inner.radio.start_discovery().await
    }

    pub async fn discover_stop(&self) -> Result<(), DriverError> {
        self.inner.discovery_active.store(false, Ordering::SeqCst);
        self.inner.radio.stop_discovery().await
    }

    /// Handles a device announce. `migrating` bypasses the discovery-active
    /// gate, since devices rediscovered mid-migration must still be
    /// accepted regardless of whether a discovery window is open.
    pub async fn device_discovered(&self, details: DiscoveredDeviceDetails, migrating: bool) -> Result<(), DriverError> {
        if !migrating && !self.inner.discovery_active.load(Ordering::SeqCst) {
            debug!(uuid = %details.eui64, "ignoring discovery event, discovery window is closed");
            return Ok(());
        }

        let claimed = self
            .inner
            .higher
            .claim_device(&details)
            .unwrap_or_else(|| self.default_claim(&details));

        if !claimed {
            self.reject_device(&details, migrating).await;
            return Ok(());
        }

        self.inner.discovered_store.ingest(&details.eui64, details.clone()).await?;

        let profile = profile_for_device_class(&self.inner.config.device_class).unwrap_or(PROFILE_SENSOR);
        let endpoint_profiles = details.endpoints.iter().map(|e| (e.endpoint_id, profile.to_string())).collect();

        let payload = DeviceFoundPayload {
            device_class: self.inner.config.device_class.clone(),
            device_class_version: self.inner.config.device_class_version,
            uuid: details.eui64.clone(),
            manufacturer: details.manufacturer.clone(),
            model: details.model.clone(),
            hardware_version: details.hardware_version.to_string(),
            firmware_version: zigbee_codec::format_version(details.firmware_version),
            higher_driver_metadata: None,
            endpoint_profiles,
        };

        let accepted = self.inner.device_service.device_found(payload).await?;
        if !accepted {
            self.reject_device(&details, migrating).await;
        }
        Ok(())
    }

    fn default_claim(&self, details: &DiscoveredDeviceDetails) -> bool {
        details.endpoints.iter().any(|e| self.inner.config.device_ids.contains(&e.app_device_id))
    }

    async fn reject_device(&self, details: &DiscoveredDeviceDetails, migrating: bool) {
        self.inner.higher.device_rejected(&details.eui64).await;
        self.inner.discovered_store.purge(&details.eui64).await;

        if migrating {
            return;
        }
        if let Ok(eui64) = Eui64::parse_uuid_string(&details.eui64) {
            if let Err(e) = self.inner.radio.request_leave(eui64).await {
                warn!(uuid = %details.eui64, error = %e, "best-effort leave request failed for a rejected device");
            }
        }
    }

    /// Runs per-endpoint cluster configuration in priority order. A sleepy
    /// device already awaiting reconfiguration waits for its next checkin
    /// before configuring, then stops fast poll once done.
    pub async fn configure_device(&self, uuid: &str, endpoint_id: EndpointId) -> Result<(), DriverError> {
        if self.inner.config.skip_configuration {
            return Ok(());
        }

        let details = self
            .inner
            .discovered_store
            .get_or_load(uuid)
            .await
            .ok_or_else(|| DriverError::DescriptorError { uuid: uuid.to_string(), detail: "no discovered details cached for device".to_string() })?;

        if details.power_source == PowerSource::Unknown {
            return Err(DriverError::ProtocolMismatch { uuid: uuid.to_string(), detail: "power source unknown, deferring configuration".to_string() });
        }

        let eui64 = Eui64::parse_uuid_string(uuid).map_err(|e| DriverError::internal(format!("malformed uuid `{uuid}`: {e}")))?;

        let sleepy_reconfiguring =
            self.inner.config.rx_mode == RxMode::Sleepy && self.inner.device_service.is_reconfiguration_pending(uuid).await;
        if sleepy_reconfiguring {
            self.wait_for_checkin(uuid).await;
        }

        let ctx = ConfigureContext { eui64, endpoint_id, details, radio: self.inner.radio.clone(), config: ConfigMap::new() };
        self.inner.registry.configure_all(&self.inner.config.driver_name, &ctx).await?;

        if sleepy_reconfiguring {
            let dispatch_ctx = DispatchContext::without_link_metadata(eui64, endpoint_id, self.inner.radio.clone());
            self.inner.poll_control.stop_fast_poll(&dispatch_ctx).await?;
        }

        Ok(())
    }

    /// Spins on `is_reconfiguration_pending` rather than waiting on a push
    /// signal: `DeviceService` exposes no wake primitive for this, only the
    /// boolean and the separate `send_reconfiguration_signal` the checkin
    /// handler calls once it has responded.
    async fn wait_for_checkin(&self, uuid: &str) {
        while self.inner.device_service.is_reconfiguration_pending(uuid).await {
            self.inner.clock.sleep(RECONFIGURATION_CHECKIN_POLL_INTERVAL).await;
        }
    }

    /// Recomputes link quality from a fresh far-end reading against the
    /// last known near-end reading, stores the result, and returns
    /// `(new_level, ne_rssi, ne_lqi)` for the caller to render detail JSON.
    fn update_far_end_link_quality(&self, uuid: &str, fe_rssi: i8, fe_lqi: u8) -> (LinkQualityLevel, i8, u8) {
        let (prior, ne_rssi, ne_lqi) = self
            .inner
            .link_quality
            .get(uuid)
            .map(|e| (e.level, e.ne_rssi, e.ne_lqi))
            .unwrap_or((LinkQualityLevel::Unknown, i8::MIN, 0));
        let level = determine_link_quality(ne_rssi, fe_rssi, ne_lqi, fe_lqi, prior);
        self.inner.link_quality.insert(uuid.to_string(), LinkQualityState { level, ne_rssi, ne_lqi, fe_rssi, fe_lqi });
        (level, ne_rssi, ne_lqi)
    }

    /// Recomputes link quality from a fresh near-end reading (carried on an
    /// inbound message) against the last known far-end reading.
    fn update_near_end_link_quality(&self, uuid: &str, ne_rssi: i8, ne_lqi: u8) -> LinkQualityLevel {
        let (prior, fe_rssi, fe_lqi) = self
            .inner
            .link_quality
            .get(uuid)
            .map(|e| (e.level, e.fe_rssi, e.fe_lqi))
            .unwrap_or((LinkQualityLevel::Unknown, i8::MIN, 0));
        let level = determine_link_quality(ne_rssi, fe_rssi, ne_lqi, fe_lqi, prior);
        self.inner.link_quality.insert(uuid.to_string(), LinkQualityState { level, ne_rssi, ne_lqi, fe_rssi, fe_lqi });
        level
    }

    /// Reads the resources this driver populates for every device
    /// regardless of device class (link quality, network type, comm state,
    /// temperature, and — for battery-powered or battery-backed-up devices
    /// — battery voltage/percent/thresholds), then appends whatever the
    /// higher driver wants to add.
    pub async fn fetch_initial_resource_values(
        &self,
        uuid: &str,
        ctx: &ConfigureContext,
    ) -> Result<Vec<(String, ResourceValue, Option<serde_json::Value>)>, DriverError> {
        let mut values = Vec::new();
        values.push((RESOURCE_NETWORK_TYPE.to_string(), ResourceValue::Enum(NETWORK_TYPE_ZIGBEE.to_string()), None));
        values.push((RESOURCE_LAST_USER_INTERACTION_DATE.to_string(), ResourceValue::Null, None));

        let comm_fail = self.inner.device_service.is_device_in_comm_fail(uuid).await;
        let dispatch_ctx = DispatchContext::without_link_metadata(ctx.eui64, ctx.endpoint_id, ctx.radio.clone());
        let diagnostics = DiagnosticsCluster::new();
        let (fe_rssi, fe_lqi) = diagnostics.read_fe_rssi_lqi(&dispatch_ctx).await.unwrap_or((i8::MIN, 0));

        let (level, ne_rssi, ne_lqi) = self.update_far_end_link_quality(uuid, fe_rssi, fe_lqi);
        let detail = link_quality_details_json(ne_rssi, fe_rssi, ne_lqi, fe_lqi, comm_fail);
        values.push((RESOURCE_LINK_QUALITY.to_string(), ResourceValue::Enum(level.as_str().to_string()), Some(detail)));

        let temperature = TemperatureMeasurementCluster::new()
            .read_measured_value(&dispatch_ctx)
            .await
            .map(ResourceValue::CentiDegreesC)
            .unwrap_or(ResourceValue::Null);
        values.push((RESOURCE_TEMPERATURE.to_string(), temperature, None));

        if ctx.details.power_source == PowerSource::Battery || self.inner.config.battery_backed_up {
            let power_configuration = PowerConfigurationCluster::new(self.inner.device_service.clone());
            for (id, value) in power_configuration.read_initial_battery_values(&dispatch_ctx).await {
                values.push((id, value, None));
            }
            if self.inner.config.read_initial_battery_thresholds {
                if let Some((id, value)) = power_configuration.read_initial_battery_thresholds(&dispatch_ctx).await {
                    values.push((id, value, None));
                }
            }
        }

        for (id, value) in self.inner.higher.fetch_initial_resource_values(ctx).await {
            values.push((id, value, None));
        }

        Ok(values)
    }

    /// Registers a just-discovered device: populates its resources with the
    /// values [`Self::fetch_initial_resource_values`] gathered.
    pub async fn register_resources(
        &self,
        uuid: &str,
        endpoint_id: EndpointId,
        ctx: &ConfigureContext,
    ) -> Result<(), DriverError> {
        let values = self.fetch_initial_resource_values(uuid, ctx).await?;
        for (resource_id, value, detail) in values {
            self.inner.device_service.update_resource(uuid, Some(endpoint_id), &resource_id, &value, detail).await?;
        }
        Ok(())
    }

    pub async fn device_persisted(&self, uuid: &str) -> Result<(), DriverError> {
        if self.inner.config.diagnostics_collection_enabled {
            self.start_diagnostics_task();
        }

        if let Ok(eui64) = Eui64::parse_uuid_string(uuid) {
            let timeout_seconds = self
                .inner
                .device_service
                .get_full_device(uuid)
                .await
                .and_then(|d| d.metadata.comm_fail_override_seconds)
                .unwrap_or(self.inner.config.comm_fail_timeout_seconds);
            let in_comm_fail = self.inner.device_service.is_device_in_comm_fail(uuid).await;
            if let Err(e) = self.inner.watchdog.monitor(eui64, timeout_seconds, in_comm_fail) {
                warn!(uuid, error = %e, "failed to start comm-fail monitoring for device");
            }
        }

        debug!(uuid, "device persisted");
        Ok(())
    }

    /// `label` is handled locally; `resetToFactory` triggers a background
    /// reset-and-leave; everything else delegates to the higher driver, with
    /// the returned flag telling the caller whether it still needs to
    /// persist the value itself.
    pub async fn write_resource(&self, uuid: &str, endpoint_id: EndpointId, resource_id: &str, value: &ResourceValue) -> Result<bool, DriverError> {
        match resource_id {
            RESOURCE_LABEL => {
                self.inner.device_service.update_resource(uuid, Some(endpoint_id), RESOURCE_LABEL, value, None).await?;
                Ok(false)
            }
            RESOURCE_RESET_TO_FACTORY => {
                if let ResourceValue::Bool(true) = value {
                    self.spawn_reset_to_factory(uuid, endpoint_id);
                }
                Ok(false)
            }
            _ => self.inner.higher.write_resource(uuid, resource_id, value).await,
        }
    }

    fn spawn_reset_to_factory(&self, uuid: &str, endpoint_id: EndpointId) {
        let Ok(eui64) = Eui64::parse_uuid_string(uuid) else {
            warn!(uuid, "refusing resetToFactory for malformed uuid");
            return;
        };
        let radio = self.inner.radio.clone();
        let uuid = uuid.to_string();
        tokio::spawn(async move {
            if let Err(e) = radio.request_leave(eui64).await {
                warn!(uuid, endpoint = endpoint_id.0, error = %e, "resetToFactory leave request failed");
            }
        });
    }

    /// Cleans up every trace of a removed device: cancels pending firmware
    /// upgrades, invokes the higher driver's hook, and best-effort leaves
    /// the network.
    pub async fn device_removed(&self, uuid: &str, first_endpoint_id: EndpointId) {
        let eui64 = Eui64::parse_uuid_string(uuid).ok();
        if let Some(eui64) = eui64 {
            self.inner.watchdog.stop_monitoring(&eui64);
        }

        self.inner.firmware.cancel_pending_upgrade(uuid);
        self.inner.link_quality.remove(uuid);

        if let Some(eui64) = eui64 {
            if let Err(e) = self.inner.radio.request_leave(eui64).await {
                debug!(uuid, error = %e, "best-effort leave failed during device removal");
            }
        }
        let _ = first_endpoint_id;

        self.inner.higher.post_device_removed(uuid).await;
        info!(uuid, "device removed");
    }

    /// Updates the `commFail` resource, then forwards the event outward —
    /// this order is required so the resource read by anything reacting to
    /// the event already reflects the new state.
    pub async fn comm_failed(&self, uuid: Eui64) -> Result<(), DriverError> {
        let key = uuid.to_uuid_string();
        self.inner.device_service.update_resource(&key, None, RESOURCE_COMM_FAIL, &ResourceValue::Bool(true), None).await?;
        self.inner.events.comm_failed(uuid).await;
        Ok(())
    }

    pub async fn comm_restored(&self, uuid: Eui64) -> Result<(), DriverError> {
        let key = uuid.to_uuid_string();
        self.inner.device_service.update_resource(&key, None, RESOURCE_COMM_FAIL, &ResourceValue::Bool(false), None).await?;
        self.inner.events.comm_restored(uuid).await;
        Ok(())
    }

    /// Starts the diagnostics task if not already running. Idempotent.
    fn start_diagnostics_task(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut slot = inner.diagnostics_task.lock().await;
            if slot.is_some() {
                return;
            }
            let task_inner = inner.clone();
            *slot = Some(tokio::spawn(async move {
                run_diagnostics_loop(task_inner).await;
            }));
        });
    }

    pub async fn stop_diagnostics_task(&self) {
        if let Some(handle) = self.inner.diagnostics_task.lock().await.take() {
            handle.abort();
        }
    }
}

/// Fixed-rate 30-minute diagnostics sweep. The first tick is skipped so a
/// driver that just started up doesn't immediately hammer every device; the
/// 5-second gap between devices spreads the resulting traffic out instead of
/// bursting it onto the network all at once.
async fn run_diagnostics_loop(inner: Arc<Inner>) {
    let mut first_tick = true;
    loop {
        inner.clock.sleep(DIAGNOSTICS_INTERVAL).await;
        if first_tick {
            first_tick = false;
            continue;
        }

        let devices = inner.device_service.get_devices_by_driver(&inner.config.driver_name).await;
        let diagnostics = DiagnosticsCluster::new();

        for eui64 in devices {
            let uuid = eui64.to_uuid_string();
            if inner.device_service.is_device_in_comm_fail(&uuid).await {
                continue;
            }

            let Some(details) = inner.discovered_store.get_or_load(&uuid).await else {
                continue;
            };
            let Some(endpoint) = details.endpoints.first() else {
                continue;
            };

            let ctx = DispatchContext::without_link_metadata(eui64, EndpointId(endpoint.endpoint_id), inner.radio.clone());
            match diagnostics.read_fe_rssi_lqi(&ctx).await {
                Ok((fe_rssi, fe_lqi)) => {
                    let (prior, ne_rssi, ne_lqi) = inner
                        .link_quality
                        .get(&uuid)
                        .map(|e| (e.level, e.ne_rssi, e.ne_lqi))
                        .unwrap_or((LinkQualityLevel::Unknown, i8::MIN, 0));
                    let level = determine_link_quality(ne_rssi, fe_rssi, ne_lqi, fe_lqi, prior);
                    inner.link_quality.insert(uuid.clone(), LinkQualityState { level, ne_rssi, ne_lqi, fe_rssi, fe_lqi });

                    let detail = link_quality_details_json(ne_rssi, fe_rssi, ne_lqi, fe_lqi, false);
                    if let Err(e) = inner
                        .device_service
                        .update_resource(&uuid, None, RESOURCE_LINK_QUALITY, &ResourceValue::Enum(level.as_str().to_string()), Some(detail))
                        .await
                    {
                        warn!(uuid, error = %e, "failed to persist diagnostics sweep result");
                    }
                }
                Err(e) => debug!(uuid, error = %e, "diagnostics sweep read failed"),
            }

            inner.clock.sleep(DIAGNOSTICS_INTER_DEVICE_DELAY).await;
        }
    }
}

#[async_trait]
impl DriverEventHooks for CommonDriver {
    /// Runs before cluster dispatch for any context carrying real link
    /// metadata: updates the cached near-end reading (recomputing link
    /// quality against the last known far-end reading) and pets the
    /// watchdog, since both are driven by "we just heard from this device".
    async fn note_link_metadata(&self, ctx: &DispatchContext) {
        let uuid = ctx.eui64.to_uuid_string();
        self.update_near_end_link_quality(&uuid, ctx.ne_rssi, ctx.ne_lqi);
        self.inner.watchdog.pet(&ctx.eui64).await;
    }

    async fn attribute_report(&self, ctx: &DispatchContext, cluster_id: ClusterId, payload: &[u8]) {
        let uuid = ctx.eui64.to_uuid_string();
        debug!(uuid, cluster_id = %cluster_id, "attribute report dispatched to higher driver");
        self.inner.higher.attribute_report(ctx, cluster_id, payload).await;
    }

    async fn cluster_command(&self, ctx: &DispatchContext, cluster_id: ClusterId, command_id: u8, payload: &[u8]) {
        let uuid = ctx.eui64.to_uuid_string();
        debug!(uuid, cluster_id = %cluster_id, "cluster command dispatched to higher driver");
        self.inner.higher.cluster_command(ctx, cluster_id, command_id, payload).await;
    }

    async fn poll_control_checkin(&self, ctx: &DispatchContext) {
        let uuid = ctx.eui64.to_uuid_string();
        debug!(uuid, "poll control checkin dispatched to higher driver");
        self.inner.watchdog.pet(&ctx.eui64).await;
        self.inner.higher.poll_control_checkin(ctx).await;
    }

    async fn device_rejoined(&self, ctx: &DispatchContext) {
        let uuid = ctx.eui64.to_uuid_string();
        debug!(uuid, "device rejoined dispatched to higher driver");
        self.inner.watchdog.pet(&ctx.eui64).await;
        self.inner.higher.device_rejoined(ctx).await;
    }
}

/// Bridges `CommWatchdog`'s own event bus back into this driver's
/// `comm_failed`/`comm_restored`, which persist the `commFail` resource
/// before forwarding outward. Holds a weak reference since the watchdog
/// this bridges for is itself owned by the same `Inner` it points back
/// into — a strong reference here would leak the whole driver.
struct WatchdogEventBridge {
    inner: Weak<Inner>,
}

#[async_trait]
impl EventBus for WatchdogEventBridge {
    async fn comm_failed(&self, uuid: Eui64) {
        if let Some(inner) = self.inner.upgrade() {
            if let Err(e) = (CommonDriver { inner }).comm_failed(uuid).await {
                warn!(uuid = %uuid, error = %e, "failed to persist comm-fail transition raised by watchdog");
            }
        }
    }

    async fn comm_restored(&self, uuid: Eui64) {
        if let Some(inner) = self.inner.upgrade() {
            if let Err(e) = (CommonDriver { inner }).comm_restored(uuid).await {
                warn!(uuid = %uuid, error = %e, "failed to persist comm-restore transition raised by watchdog");
            }
        }
    }

    async fn network_interference(&self, _active: bool) {}
    async fn pan_id_attack(&self, _active: bool) {}
    async fn remote_cli_command_response_received(&self, _uuid: Eui64, _response: String) {}
}
