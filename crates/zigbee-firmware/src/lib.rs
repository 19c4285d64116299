pub mod download;
pub mod error;
mod task;

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use zigbee_core::device_service::{DeviceService, PostUpgradeAction};
use zigbee_core::ids::{EndpointId, Eui64};
use zigbee_core::model::ResourceValue;
use zigbee_core::properties::PropertyProvider;
use zigbee_core::zhal::RadioOutbound;
use zigbee_core::{Clock, DriverError};

pub use download::{FileDownloader, HttpFileDownloader};
pub use error::FirmwareError;
pub use task::CancelHandle;

const RECONFIGURATION_DELAY_SECS: u32 = 60;
const FIRMWARE_UPDATE_STATUS_RESOURCE: &str = "firmwareUpdateStatus";
const FIRMWARE_VERSION_RESOURCE: &str = "firmwareVersion";
const OTA_MILESTONES_METADATA_KEY: &str = "otaUpgradeMilestones";
const OTA_IMAGE_NOTIFY_COMMAND_ID: u8 = 0x00;

const IN_PROGRESS_STATUSES: &[&str] = &["started", "downloading", "downloaded"];

/// One file to fetch for an upgrade: `(type, fileName, expected md5)`.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub file_type: String,
    pub file_name: String,
    pub md5: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FirmwareDescriptor {
    pub latest_version: u32,
    pub base_url: String,
    pub file_infos: Vec<FileInfo>,
}

/// Optional higher-driver customization of the upgrade decision/initiation.
#[async_trait]
pub trait FirmwareUpgradeHooks: Send + Sync + 'static {
    fn firmware_upgrade_required(&self, _current_version: u32, _latest_version: u32) -> Option<bool> {
        None
    }

    /// If this returns `Ok(true)`, the pipeline assumes the higher driver
    /// has taken over notifying the device and does not send an
    /// ImageNotify itself.
    async fn initiate_firmware_upgrade(
        &self,
        _uuid: &str,
        _endpoint_id: EndpointId,
        _descriptor: &FirmwareDescriptor,
    ) -> Result<bool, DriverError> {
        Ok(false)
    }
}

struct Inner {
    clock: Arc<dyn Clock>,
    radio: Arc<dyn RadioOutbound>,
    device_service: Arc<dyn DeviceService>,
    downloader: Arc<dyn FileDownloader>,
    hooks: Option<Arc<dyn FirmwareUpgradeHooks>>,
    firmware_dir: PathBuf,
    pending_upgrades: DashMap<String, CancelHandle>,
    milestone_lock: Mutex<()>,
    blocking_upgrades: Mutex<HashSet<Eui64>>,
    blocking_upgrades_drained: Notify,
}

#[derive(Clone)]
pub struct FirmwarePipeline {
    inner: Arc<Inner>,
}

impl FirmwarePipeline {
    pub fn new(
        clock: Arc<dyn Clock>,
        radio: Arc<dyn RadioOutbound>,
        device_service: Arc<dyn DeviceService>,
        downloader: Arc<dyn FileDownloader>,
        firmware_dir: PathBuf,
        hooks: Option<Arc<dyn FirmwareUpgradeHooks>>,
    ) -> Self {
        FirmwarePipeline {
            inner: Arc::new(Inner {
                clock,
                radio,
                device_service,
                downloader,
                hooks,
                firmware_dir,
                pending_upgrades: DashMap::new(),
                milestone_lock: Mutex::new(()),
                blocking_upgrades: Mutex::new(HashSet::new()),
                blocking_upgrades_drained: Notify::new(),
            }),
        }
    }

    /// Steps 1-4: decide whether an upgrade is needed and, if so, schedule
    /// the download/notify task.
    pub async fn process_descriptor(
        &self,
        uuid: &str,
        first_endpoint_id: EndpointId,
        descriptor: FirmwareDescriptor,
        properties: &dyn PropertyProvider,
    ) -> Result<(), DriverError> {
        let current_version_resource = match self
            .inner
            .device_service
            .get_resource_by_id(uuid, None, FIRMWARE_VERSION_RESOURCE)
            .await
        {
            Some(resource) => resource,
            None => {
                debug!(uuid, "no firmwareVersion resource yet, skipping descriptor processing");
                return Ok(());
            }
        };

        let current_version = match &current_version_resource.value {
            ResourceValue::Json(Value::String(s)) => zigbee_codec::parse_version(s).unwrap_or(0),
            ResourceValue::Enum(s) => zigbee_codec::parse_version(s).unwrap_or(0),
            _ => 0,
        };

        let needs_upgrade = self
            .inner
            .hooks
            .as_ref()
            .and_then(|h| h.firmware_upgrade_required(current_version, descriptor.latest_version))
            .unwrap_or(current_version < descriptor.latest_version);

        if needs_upgrade {
            let current_status = self
                .inner
                .device_service
                .get_metadata(uuid, FIRMWARE_UPDATE_STATUS_RESOURCE)
                .await
                .unwrap_or_default();
            if current_status != "started" && !IN_PROGRESS_STATUSES.contains(&current_status.as_str()) {
                self.set_update_status(uuid, "pending").await?;
            }
        } else {
            self.set_update_status(uuid, "upToDate").await?;
            return Ok(());
        }

        if descriptor.file_infos.is_empty() {
            return Ok(());
        }

        if let Some((_, prev)) = self.inner.pending_upgrades.remove(uuid) {
            prev.cancel();
        }

        let no_delay = properties.firmware_upgrade_no_delay();
        let delay_secs = if no_delay { 0 } else { properties.firmware_upgrade_delay_secs() };
        let retry_delay_secs = properties.firmware_upgrade_retry_delay_secs();

        self.schedule(uuid.to_string(), first_endpoint_id, descriptor, delay_secs, retry_delay_secs);
        Ok(())
    }

    fn schedule(
        &self,
        uuid: String,
        first_endpoint_id: EndpointId,
        descriptor: FirmwareDescriptor,
        delay_secs: u32,
        retry_delay_secs: u32,
    ) {
        let inner = self.inner.clone();
        let clock = self.inner.clock.clone();
        let task_uuid = uuid.clone();

        let (_, cancel) = task::spawn_delayed(clock, Duration::from_secs(delay_secs as u64), move || {
            attempt_upgrade(inner, task_uuid, first_endpoint_id, descriptor, retry_delay_secs)
        });

        self.inner.pending_upgrades.insert(uuid, cancel);
    }

    async fn set_update_status(&self, uuid: &str, status: &str) -> Result<(), DriverError> {
        self.inner
            .device_service
            .set_metadata(uuid, FIRMWARE_UPDATE_STATUS_RESOURCE, status)
            .await
    }

    pub async fn set_blocking_upgrade(&self, eui64: Eui64, in_progress: bool) {
        let mut set = self.inner.blocking_upgrades.lock().await;
        if in_progress {
            set.insert(eui64);
        } else {
            set.remove(&eui64);
            if set.is_empty() {
                self.inner.blocking_upgrades_drained.notify_waiters();
            }
        }
    }

    /// Unbounded wait until no device reports an in-progress blocking
    /// upgrade. The hosting process is responsible for an outer deadline.
    pub async fn wait_for_blocking_upgrades_to_drain(&self) {
        loop {
            {
                let set = self.inner.blocking_upgrades.lock().await;
                if set.is_empty() {
                    return;
                }
            }
            self.inner.blocking_upgrades_drained.notified().await;
        }
    }

    /// Step 7: a device reported `QueryNextImage` with `reported_version`.
    /// If it differs from what is persisted, records completion and
    /// enqueues a reconfiguration when requested.
    pub async fn handle_query_next_image(&self, uuid: &str, reported_version: u32) -> Result<(), DriverError> {
        let persisted = self
            .inner
            .device_service
            .get_resource_by_id(uuid, None, FIRMWARE_VERSION_RESOURCE)
            .await
            .and_then(|r| match r.value {
                ResourceValue::Json(Value::String(s)) => zigbee_codec::parse_version(&s),
                _ => None,
            })
            .unwrap_or(0);

        self.record_milestone(uuid, "QNIResponseImageStatus").await;

        if persisted != reported_version {
            info!(uuid, old = persisted, new = reported_version, "firmware upgrade completed");
            self.inner
                .device_service
                .update_resource(
                    uuid,
                    None,
                    FIRMWARE_VERSION_RESOURCE,
                    &ResourceValue::Json(Value::String(zigbee_codec::format_version(reported_version))),
                    None,
                )
                .await?;
            self.set_update_status(uuid, "completed").await?;

            if self.inner.device_service.get_post_upgrade_action(uuid).await == PostUpgradeAction::Reconfigure {
                self.inner
                    .device_service
                    .reconfigure_device(uuid, RECONFIGURATION_DELAY_SECS)
                    .await?;
            }
        }
        Ok(())
    }

    /// Step 8: read-modify-write a named milestone timestamp into the
    /// per-device OTA metadata JSON object, serialized under a mutex.
    pub async fn record_milestone(&self, uuid: &str, milestone: &str) {
        record_milestone_inner(&self.inner, uuid, milestone).await;
    }

    pub fn cancel_pending_upgrade(&self, uuid: &str) {
        if let Some((_, cancel)) = self.inner.pending_upgrades.remove(uuid) {
            cancel.cancel();
        }
    }
}

/// Steps 5-6, boxed so the retry-reschedule path (6) can call back into
/// this same function without an unbounded `impl Future` recursion error.
fn attempt_upgrade(
    inner: Arc<Inner>,
    uuid: String,
    first_endpoint_id: EndpointId,
    descriptor: FirmwareDescriptor,
    retry_delay_secs: u32,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        // Step 5: idempotent removal; if this task was already canceled and
        // removed from the map by a newer descriptor, there is nothing left
        // to do.
        if inner.pending_upgrades.remove(&uuid).is_none() {
            debug!(uuid, "upgrade task fired after cancellation, exiting");
            return;
        }

        let mut all_available = true;
        for file in &descriptor.file_infos {
            if !stage_file(&inner, &descriptor.base_url, file).await {
                all_available = false;
            }
        }

        if all_available {
            let _ = inner.radio.refresh_ota_files().await;

            let initiated = if let Some(hooks) = &inner.hooks {
                hooks
                    .initiate_firmware_upgrade(&uuid, first_endpoint_id, &descriptor)
                    .await
                    .unwrap_or(false)
            } else {
                false
            };

            if !initiated {
                send_image_notify(&inner, &uuid, first_endpoint_id).await;
            }

            let _ = inner
                .device_service
                .set_metadata(&uuid, FIRMWARE_UPDATE_STATUS_RESOURCE, "started")
                .await;
            record_milestone_inner(&inner, &uuid, "INSentDate").await;
        } else {
            debug!(uuid, retry_delay_secs, "upgrade download incomplete, rescheduling");
            let inner2 = inner.clone();
            let retry_uuid = uuid.clone();
            let (_, cancel) = task::spawn_delayed(inner.clock.clone(), Duration::from_secs(retry_delay_secs as u64), move || {
                attempt_upgrade(inner2, retry_uuid, first_endpoint_id, descriptor, retry_delay_secs)
            });
            inner.pending_upgrades.insert(uuid, cancel);
        }
    })
}

async fn stage_file(inner: &Arc<Inner>, base_url: &str, file: &FileInfo) -> bool {
    let dest_dir = inner.firmware_dir.join(&file.file_type);
    let dest_path = dest_dir.join(&file.file_name);

    if let Err(e) = tokio::fs::create_dir_all(&dest_dir).await {
        warn!(file = %file.file_name, error = %e, "failed to create firmware directory");
        return false;
    }

    let already_good = if dest_path.exists() {
        match &file.md5 {
            None => true,
            Some(expected) => download::md5_of_file(&dest_path)
                .await
                .map(|actual| expected.eq_ignore_ascii_case(&actual))
                .unwrap_or(false),
        }
    } else {
        false
    };

    if already_good {
        return true;
    }

    let _ = tokio::fs::remove_file(&dest_path).await;
    let temp_path = dest_dir.join(format!("{}.part", file.file_name));
    let url = format!("{}/{}", base_url.trim_end_matches('/'), file.file_name);

    match inner.downloader.fetch_to_file(&url, &temp_path).await {
        Ok(()) => {
            let checksum_ok = match &file.md5 {
                None => true,
                Some(expected) => download::md5_of_file(&temp_path)
                    .await
                    .map(|actual| expected.eq_ignore_ascii_case(&actual))
                    .unwrap_or(false),
            };

            if !checksum_ok {
                warn!(file = %file.file_name, "checksum mismatch, discarding partial file");
                let _ = tokio::fs::remove_file(&temp_path).await;
                return false;
            }

            if tokio::fs::rename(&temp_path, &dest_path).await.is_err() {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return false;
            }
            let _ = set_permissions_0777(&dest_path).await;
            true
        }
        Err(e) => {
            warn!(file = %file.file_name, error = %e, "download failed");
            let _ = tokio::fs::remove_file(&temp_path).await;
            false
        }
    }
}

async fn send_image_notify(inner: &Arc<Inner>, uuid: &str, endpoint_id: EndpointId) {
    let eui64 = match Eui64::parse_uuid_string(uuid) {
        Ok(e) => e,
        Err(_) => return,
    };
    // payload type QUERY_JITTER=0, jitter max=100, matching the original
    // two-byte ImageNotify body.
    let payload = [0u8, 100u8];
    let _ = inner
        .radio
        .send_command(
            eui64,
            endpoint_id,
            zigbee_core::ClusterId::OTA_UPGRADE,
            None,
            false,
            OTA_IMAGE_NOTIFY_COMMAND_ID,
            &payload,
        )
        .await;
}

async fn record_milestone_inner(inner: &Arc<Inner>, uuid: &str, milestone: &str) {
    let _guard = inner.milestone_lock.lock().await;
    let now_millis = wall_clock_millis();

    let existing = inner
        .device_service
        .get_metadata(uuid, OTA_MILESTONES_METADATA_KEY)
        .await
        .and_then(|s| serde_json::from_str::<Value>(&s).ok())
        .unwrap_or_else(|| json!({}));

    let mut map = match existing {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    map.insert(milestone.to_string(), json!(now_millis));

    let serialized = Value::Object(map).to_string();
    let _ = inner.device_service.set_metadata(uuid, OTA_MILESTONES_METADATA_KEY, &serialized).await;
}

fn wall_clock_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

async fn set_permissions_0777(path: &std::path::Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)).await
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
