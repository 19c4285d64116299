//! Single process-wide supervisor that fires `commFailed(uuid)` when a
//! device has been silent beyond its timeout, and `commRestored(uuid)` on
//! the next pet.

mod entry;
pub mod error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use zigbee_core::device_service::DeviceService;
use zigbee_core::events::EventBus;
use zigbee_core::{Clock, Eui64};

pub use entry::MonitoredDeviceInfo;
pub use error::WatchdogError;

const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 60;
const MIN_UPDATE_INTERVAL: Duration = Duration::from_millis(5000);

struct Inner {
    clock: Arc<dyn Clock>,
    devices: DashMap<String, MonitoredDeviceInfo>,
    running: AtomicBool,
    fast_mode: AtomicBool,
    notify: Notify,
    monitor_interval_raw: std::sync::atomic::AtomicU64,
    event_bus: Mutex<Option<Arc<dyn EventBus>>>,
    device_service: Option<Arc<dyn DeviceService>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

/// The communication watchdog. Cheap to clone; every clone shares the same
/// device map and background monitor task.
#[derive(Clone)]
pub struct CommWatchdog {
    inner: Arc<Inner>,
}

impl CommWatchdog {
    pub fn new(clock: Arc<dyn Clock>, device_service: Option<Arc<dyn DeviceService>>) -> Self {
        CommWatchdog {
            inner: Arc::new(Inner {
                clock,
                devices: DashMap::new(),
                running: AtomicBool::new(false),
                fast_mode: AtomicBool::new(false),
                notify: Notify::new(),
                monitor_interval_raw: std::sync::atomic::AtomicU64::new(DEFAULT_MONITOR_INTERVAL_SECS),
                event_bus: Mutex::new(None),
                device_service,
                task_handle: Mutex::new(None),
            }),
        }
    }

    /// Idempotent-on-reinit is a programming error: calling `init` twice
    /// returns `AlreadyInitialized` rather than silently replacing the bus.
    pub async fn init(&self, event_bus: Arc<dyn EventBus>) -> Result<(), WatchdogError> {
        let mut slot = self.inner.event_bus.lock().await;
        if slot.is_some() {
            return Err(WatchdogError::AlreadyInitialized);
        }
        *slot = Some(event_bus);
        self.inner.running.store(true, Ordering::SeqCst);

        let inner = self.inner.clone();
        let mut handle_slot = self.inner.task_handle.lock().await;
        *handle_slot = Some(tokio::spawn(async move {
            run_monitor_loop(inner).await;
        }));
        Ok(())
    }

    /// Overrides the monitor loop cadence (seconds normally, milliseconds
    /// when fast mode is on — see the design note on this ambiguity).
    pub fn set_monitor_interval(&self, raw: u64) {
        self.inner.monitor_interval_raw.store(raw, Ordering::SeqCst);
    }

    pub async fn term(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        *self.inner.event_bus.lock().await = None;
        self.inner.notify.notify_waiters();
        if let Some(handle) = self.inner.task_handle.lock().await.take() {
            handle.abort();
        }
    }

    pub fn is_device_monitored(&self, uuid: &Eui64) -> bool {
        self.inner.devices.contains_key(&uuid.to_uuid_string())
    }

    pub fn monitor(
        &self,
        uuid: Eui64,
        timeout_seconds: u32,
        initially_in_comm_fail: bool,
    ) -> Result<(), WatchdogError> {
        let key = uuid.to_uuid_string();
        if timeout_seconds == 0 {
            return Err(WatchdogError::ZeroTimeout { uuid: key });
        }
        if !self.inner.running.load(Ordering::SeqCst) {
            warn!(uuid = %key, "ignoring monitor request, watchdog is not running");
            return Err(WatchdogError::NotRunning { uuid: key });
        }

        debug!(uuid = %key, timeout_seconds, initially_in_comm_fail, "start monitoring device");
        let info = MonitoredDeviceInfo::new(
            self.inner.clock.now(),
            Duration::from_secs(timeout_seconds as u64),
            initially_in_comm_fail,
        );
        // DashMap::insert replaces an existing entry without leaking,
        // tolerating the duplicate-insert case called out for device
        // recovery flows.
        self.inner.devices.insert(key, info);
        Ok(())
    }

    pub fn stop_monitoring(&self, uuid: &Eui64) {
        self.inner.devices.remove(&uuid.to_uuid_string());
    }

    pub async fn pet(&self, uuid: &Eui64) {
        let key = uuid.to_uuid_string();
        let mut became_restored = false;

        if let Some(mut entry) = self.inner.devices.get_mut(&key) {
            let full_timeout = entry.timeout;
            let diff = entry.set_remaining(self.inner.clock.now(), full_timeout);
            if diff >= MIN_UPDATE_INTERVAL {
                trace!(uuid = %key, "petting device, updating dateLastContacted");
                self.touch_date_last_contacted(&key).await;
            }
            if entry.in_comm_fail {
                info!(uuid = %key, "device is no longer in comm fail");
                entry.in_comm_fail = false;
                became_restored = true;
            }
        }

        if became_restored {
            if let Some(bus) = self.inner.event_bus.lock().await.as_ref() {
                bus.comm_restored(*uuid).await;
            }
        }
    }

    pub async fn force_comm_fail(&self, uuid: &Eui64) {
        let key = uuid.to_uuid_string();
        let mut became_failed = false;

        if let Some(mut entry) = self.inner.devices.get_mut(&key) {
            if !entry.in_comm_fail {
                entry.in_comm_fail = true;
                became_failed = true;
            } else {
                debug!(uuid = %key, "device already in comm failure, ignoring");
            }
        }

        if became_failed {
            if let Some(bus) = self.inner.event_bus.lock().await.as_ref() {
                bus.comm_failed(*uuid).await;
            }
        }
    }

    /// Returns remaining seconds until comm-fail, extended by
    /// `max(0, floor_seconds - baseline_timeout)`. A request to shorten the
    /// effective timeout is rejected (logged, original value returned).
    /// Returns `None` if the device is already in comm fail or unmonitored.
    pub fn get_remaining_for_lpm(&self, uuid: &Eui64, floor_seconds: u32) -> Option<i64> {
        let key = uuid.to_uuid_string();
        let entry = self.inner.devices.get(&key)?;
        if entry.in_comm_fail {
            return Some(-1);
        }

        let mut secs_until_comm_fail = entry.millis_until_comm_fail(self.inner.clock.now()).as_millis() as i64 / 1000;
        let baseline = entry.timeout.as_secs() as i64;
        let diff = floor_seconds as i64 - baseline;
        if diff >= 0 {
            secs_until_comm_fail += diff;
        } else {
            warn!(
                uuid = %key,
                requested = floor_seconds,
                baseline,
                "ignoring invalid commFailDelaySeconds shorter than baseline"
            );
        }
        Some(secs_until_comm_fail)
    }

    pub fn set_remaining_from_lpm(&self, uuid: &Eui64, seconds: u32) -> Result<(), WatchdogError> {
        let key = uuid.to_uuid_string();
        let mut entry = self
            .inner
            .devices
            .get_mut(&key)
            .ok_or(WatchdogError::NotMonitored { uuid: key.clone() })?;
        if entry.in_comm_fail {
            debug!(uuid = %key, "device already in comm failure, ignoring LPM update");
            return Ok(());
        }
        entry.set_remaining(self.inner.clock.now(), Duration::from_secs(seconds as u64));
        Ok(())
    }

    pub fn set_fast_mode(&self, on: bool) {
        self.inner.fast_mode.store(on, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn check_devices(&self) {
        self.inner.notify.notify_waiters();
    }

    /// Runs a single monitor-loop scan pass, exactly what the background
    /// task does on each wakeup. Exposed directly so tests can drive it
    /// deterministically against a `MockClock` instead of racing a
    /// background task against virtual-time advances.
    pub async fn tick(&self) {
        scan_once(&self.inner).await;
    }

    async fn touch_date_last_contacted(&self, uuid: &str) {
        if let Some(service) = &self.inner.device_service {
            let now_millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            let _ = service
                .set_metadata(uuid, "dateLastContacted", &now_millis.to_string())
                .await;
        }
    }
}

async fn scan_once(inner: &Arc<Inner>) {
    let fast = inner.fast_mode.load(Ordering::SeqCst);
    let now = inner.clock.now();
    let mut newly_failed = Vec::new();

    for mut entry in inner.devices.iter_mut() {
        let key = entry.key().clone();
        let mut millis_until_comm_fail = entry.value().millis_until_comm_fail(now);
        if fast {
            millis_until_comm_fail = millis_until_comm_fail / 100;
        }

        if millis_until_comm_fail.is_zero() && !entry.value().in_comm_fail {
            warn!(uuid = %key, "device is in comm fail");
            entry.value_mut().in_comm_fail = true;
            newly_failed.push(key.clone());
        }

        trace!(uuid = %key, millis_left = ?millis_until_comm_fail, "watchdog tick");
        entry.value_mut().set_remaining(now, millis_until_comm_fail);
    }

    for uuid in &newly_failed {
        debug!(uuid, "notifying callback of comm fail");
    }

    if !newly_failed.is_empty() {
        if let Some(bus) = inner.event_bus.lock().await.as_ref() {
            for uuid in newly_failed {
                if let Ok(eui) = uuid.parse::<Eui64>() {
                    bus.comm_failed(eui).await;
                }
            }
        }
    }
}

async fn run_monitor_loop(inner: Arc<Inner>) {
    debug!("comm-fail watchdog monitor loop starting up");
    while inner.running.load(Ordering::SeqCst) {
        let fast = inner.fast_mode.load(Ordering::SeqCst);
        let raw = inner.monitor_interval_raw.load(Ordering::SeqCst);
        let wait = if fast {
            Duration::from_millis(raw)
        } else {
            Duration::from_secs(raw)
        };

        tokio::select! {
            _ = inner.clock.sleep(wait) => {}
            _ = inner.notify.notified() => {}
        }

        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        scan_once(&inner).await;
    }
    info!("comm-fail watchdog monitor loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use zigbee_core::events::RecordingEventBus;
    use zigbee_core::MockClock;

    fn eui(n: u64) -> Eui64 {
        Eui64(n)
    }

    #[tokio::test]
    async fn comm_fail_transition_and_restore() {
        let clock = Arc::new(MockClock::new());
        let watchdog = CommWatchdog::new(clock.clone(), None);
        let bus = Arc::new(RecordingEventBus::default());
        watchdog.init(bus.clone()).await.unwrap();

        let uuid = eui(0xA);
        watchdog.monitor(uuid, 5, false).unwrap();

        clock.advance(Duration::from_millis(5001));
        watchdog.tick().await;

        {
            let events = bus.events.lock().await;
            assert_eq!(events.len(), 1);
            assert_eq!(events[0], zigbee_core::events::RecordedEvent::CommFailed(uuid));
        }

        watchdog.pet(&uuid).await;
        let events = bus.events.lock().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], zigbee_core::events::RecordedEvent::CommRestored(uuid));
    }

    #[tokio::test]
    async fn pet_within_window_prevents_comm_fail() {
        let clock = Arc::new(MockClock::new());
        let watchdog = CommWatchdog::new(clock.clone(), None);
        let bus = Arc::new(RecordingEventBus::default());
        watchdog.init(bus.clone()).await.unwrap();

        let uuid = eui(0xB);
        watchdog.monitor(uuid, 5, false).unwrap();

        clock.advance(Duration::from_millis(3000));
        watchdog.pet(&uuid).await;
        clock.advance(Duration::from_millis(3000));
        watchdog.tick().await;

        assert!(bus.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn force_comm_fail_emits_once() {
        let clock = Arc::new(MockClock::new());
        let watchdog = CommWatchdog::new(clock.clone(), None);
        let bus = Arc::new(RecordingEventBus::default());
        watchdog.init(bus.clone()).await.unwrap();

        let uuid = eui(0xC);
        watchdog.monitor(uuid, 5, false).unwrap();

        watchdog.force_comm_fail(&uuid).await;
        watchdog.force_comm_fail(&uuid).await;

        let events = bus.events.lock().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn lpm_shorten_request_is_rejected() {
        let clock = Arc::new(MockClock::new());
        let watchdog = CommWatchdog::new(clock.clone(), None);
        let uuid = eui(0xD);
        watchdog.monitor(uuid, 120, false).unwrap();

        let remaining = watchdog.get_remaining_for_lpm(&uuid, 60).unwrap();
        assert_eq!(remaining, 120);
    }

    #[tokio::test]
    async fn double_init_is_rejected() {
        let clock = Arc::new(MockClock::new());
        let watchdog = CommWatchdog::new(clock, None);
        let bus = Arc::new(RecordingEventBus::default());
        watchdog.init(bus.clone()).await.unwrap();
        assert!(matches!(
            watchdog.init(bus).await,
            Err(WatchdogError::AlreadyInitialized)
        ));
    }

    #[test]
    fn eui_parse_used_in_scan_roundtrips() {
        let uuid = eui(0x42);
        let parsed = Eui64::from_str(&uuid.to_uuid_string()).unwrap();
        assert_eq!(parsed, uuid);
    }
}
