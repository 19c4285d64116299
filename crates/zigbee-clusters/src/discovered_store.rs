//! Cache of the immutable-after-pairing discovery snapshot
//! (`DiscoveredDeviceDetails`), persisted under device metadata key
//! `discoveredDetails`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use zigbee_core::device_service::DeviceService;
use zigbee_core::model::DiscoveredDeviceDetails;
use zigbee_core::DriverError;

const METADATA_KEY: &str = "discoveredDetails";

/// Keyed by eui64 (the uuid string form). Reads check the in-memory cache
/// first and fall back to device metadata; ingest clones what it's given so
/// callers can keep their own copy of the details they just observed.
pub struct DiscoveredDeviceStore {
    device_service: Arc<dyn DeviceService>,
    cache: Mutex<HashMap<String, DiscoveredDeviceDetails>>,
}

impl DiscoveredDeviceStore {
    pub fn new(device_service: Arc<dyn DeviceService>) -> Self {
        DiscoveredDeviceStore {
            device_service,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached details for `uuid`, loading them from device
    /// metadata on a cache miss. `None` if neither has them.
    pub async fn get_or_load(&self, uuid: &str) -> Option<DiscoveredDeviceDetails> {
        {
            let cache = self.cache.lock().await;
            if let Some(details) = cache.get(uuid) {
                return Some(details.clone());
            }
        }

        let raw = self.device_service.get_metadata(uuid, METADATA_KEY).await?;
        let details: DiscoveredDeviceDetails = match serde_json::from_str(&raw) {
            Ok(d) => d,
            Err(e) => {
                warn!(uuid, error = %e, "discoveredDetails metadata is not valid JSON");
                return None;
            }
        };

        self.cache.lock().await.insert(uuid.to_string(), details.clone());
        Some(details)
    }

    /// Called at device-announce time with freshly observed details. Writes
    /// through to metadata only when `deviceType` or `powerSource` changed
    /// from what was previously cached, since those are the fields a
    /// higher-level driver branches on.
    pub async fn ingest(&self, uuid: &str, details: DiscoveredDeviceDetails) -> Result<(), DriverError> {
        let changed = {
            let mut cache = self.cache.lock().await;
            let changed = match cache.get(uuid) {
                Some(existing) => {
                    existing.device_type != details.device_type || existing.power_source != details.power_source
                }
                None => true,
            };
            cache.insert(uuid.to_string(), details.clone());
            changed
        };

        if changed {
            let json = serde_json::to_string(&details)
                .map_err(|e| DriverError::internal(format!("failed to serialize discoveredDetails: {e}")))?;
            self.device_service.set_metadata(uuid, METADATA_KEY, &json).await?;
        }

        Ok(())
    }

    /// Drops the cached entry for a device that was never accepted (or is
    /// being forgotten), leaving metadata untouched — the device service
    /// owns deleting the record itself.
    pub async fn purge(&self, uuid: &str) {
        self.cache.lock().await.remove(uuid);
    }
}
