//! Network health supervision (CCA interference detection) and the PAN-ID
//! change attack defender. Both are thin, stateful wrappers around a single
//! `RadioOutbound::configure_*` call plus a one-shot "clear" event fired when
//! monitoring transitions from enabled to disabled while a problem was
//! already flagged.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use zigbee_core::events::EventBus;
use zigbee_core::properties::PropertyProvider;
use zigbee_core::zhal::RadioOutbound;
use zigbee_core::DriverError;

const MIN_NETWORK_HEALTH_CHECK_INTERVAL_MILLIS: u32 = 1000;

/// Tracks whether network interference is currently flagged, so that
/// disabling the feature while a problem is active emits a clearing event
/// instead of leaving a stale "interference" state for consumers.
pub struct HealthSupervisor {
    radio: Arc<dyn RadioOutbound>,
    events: Arc<dyn EventBus>,
    interference_detected: Mutex<bool>,
}

impl HealthSupervisor {
    pub fn new(radio: Arc<dyn RadioOutbound>, events: Arc<dyn EventBus>) -> Self {
        HealthSupervisor {
            radio,
            events,
            interference_detected: Mutex::new(false),
        }
    }

    /// Reads the health-check properties and (re)configures the radio.
    /// Interval `0` disables the feature; any nonzero value below the floor
    /// is silently raised to the floor rather than rejected.
    pub async fn start(&self, properties: &dyn PropertyProvider) -> Result<(), DriverError> {
        let mut interval_millis = properties.health_check_interval_millis();

        if interval_millis == 0 {
            debug!("not monitoring network health, feature disabled");
            self.stop().await?;

            let mut detected = self.interference_detected.lock().await;
            if *detected {
                *detected = false;
                self.events.network_interference(false).await;
            }
            return Ok(());
        }

        if interval_millis < MIN_NETWORK_HEALTH_CHECK_INTERVAL_MILLIS {
            warn!(
                requested = interval_millis,
                floor = MIN_NETWORK_HEALTH_CHECK_INTERVAL_MILLIS,
                "requested network health check interval is below minimum, clamping"
            );
            interval_millis = MIN_NETWORK_HEALTH_CHECK_INTERVAL_MILLIS;
        }

        let cca_threshold = properties.health_check_cca_threshold();
        let cca_failure_threshold = properties.health_check_cca_failure_threshold();
        let restore_threshold = properties.health_check_restore_threshold();
        let delay_between_retries_millis = properties.health_check_delay_between_retries_millis();

        let result = self
            .radio
            .configure_network_health_check(
                interval_millis,
                cca_threshold,
                cca_failure_threshold,
                restore_threshold,
                delay_between_retries_millis,
            )
            .await;
        if let Err(e) = &result {
            error!(error = %e, "failed to start network health checking");
        }
        result
    }

    pub async fn stop(&self) -> Result<(), DriverError> {
        debug!("stopping network health checking");
        let result = self.radio.configure_network_health_check(0, 0, 0, 0, 0).await;
        if let Err(e) = &result {
            error!(error = %e, "failed to stop network health checking");
        }
        result
    }

    /// Called from the radio's reported CCA/interference status. Always
    /// emits, even if the state is unchanged, mirroring the source's
    /// unconditional-send behavior.
    pub async fn set_problem(&self, problem_exists: bool) {
        debug!(problem_exists, "network interference status changed");
        *self.interference_detected.lock().await = problem_exists;
        self.events.network_interference(problem_exists).await;
    }
}

/// PAN-ID change attack defender. A change-threshold of `0` disables the
/// feature and clears any currently-flagged attack.
pub struct PanIdDefender {
    radio: Arc<dyn RadioOutbound>,
    events: Arc<dyn EventBus>,
    attack_detected: Mutex<bool>,
}

impl PanIdDefender {
    pub fn new(radio: Arc<dyn RadioOutbound>, events: Arc<dyn EventBus>) -> Self {
        PanIdDefender {
            radio,
            events,
            attack_detected: Mutex::new(false),
        }
    }

    pub async fn configure(&self, properties: &dyn PropertyProvider) -> Result<(), DriverError> {
        let change_threshold = properties.defender_change_threshold();
        let window_millis = properties.defender_window_millis();
        let restore_millis = properties.defender_restore_millis();

        let result = self
            .radio
            .configure_pan_id_defender(change_threshold, window_millis, restore_millis)
            .await;
        if let Err(e) = &result {
            error!(error = %e, "failed to configure defender");
        }

        if change_threshold == 0 {
            debug!("not monitoring pan id changes, feature disabled");
            let mut detected = self.attack_detected.lock().await;
            if *detected {
                *detected = false;
                self.events.pan_id_attack(false).await;
            }
        }

        result
    }

    pub async fn set_pan_id_attack(&self, attack_detected: bool) {
        debug!(attack_detected, "pan id attack status changed");
        *self.attack_detected.lock().await = attack_detected;
        self.events.pan_id_attack(attack_detected).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use zigbee_core::events::{RecordedEvent, RecordingEventBus};
    use zigbee_core::ids::{ClusterId, EndpointId, Eui64};
    use zigbee_core::properties::MapPropertyProvider;

    #[derive(Default)]
    struct FakeRadio {
        health_check_calls: AtomicU32,
        defender_calls: AtomicU32,
    }

    #[async_trait]
    impl RadioOutbound for FakeRadio {
        async fn send_command(
            &self,
            _: Eui64,
            _: EndpointId,
            _: ClusterId,
            _: Option<u16>,
            _: bool,
            _: u8,
            _: &[u8],
        ) -> Result<(), DriverError> {
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
            self.health_check_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn configure_pan_id_defender(&self, _: u32, _: u32, _: u32) -> Result<(), DriverError> {
            self.defender_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn health_check_disabled_by_default_and_clears_flagged_interference() {
        let radio = Arc::new(FakeRadio::default());
        let bus = Arc::new(RecordingEventBus::default());
        let supervisor = HealthSupervisor::new(radio, bus.clone());

        supervisor.set_problem(true).await;
        supervisor.start(&MapPropertyProvider::new()).await.unwrap();

        let events = bus.events.lock().await;
        assert_eq!(events[0], RecordedEvent::NetworkInterference(true));
        assert_eq!(events[1], RecordedEvent::NetworkInterference(false));
    }

    #[tokio::test]
    async fn health_check_interval_below_floor_is_clamped_not_rejected() {
        let radio = Arc::new(FakeRadio::default());
        let bus = Arc::new(RecordingEventBus::default());
        let supervisor = HealthSupervisor::new(radio.clone(), bus);
        let props = MapPropertyProvider::new().with("cpe.zigbee.healthCheck.intervalMillis", "50");

        supervisor.start(&props).await.unwrap();
        assert_eq!(radio.health_check_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn defender_zero_threshold_clears_active_attack() {
        let radio = Arc::new(FakeRadio::default());
        let bus = Arc::new(RecordingEventBus::default());
        let defender = PanIdDefender::new(radio, bus.clone());

        defender.set_pan_id_attack(true).await;
        defender.configure(&MapPropertyProvider::new()).await.unwrap();

        let events = bus.events.lock().await;
        assert_eq!(events[0], RecordedEvent::PanIdAttack(true));
        assert_eq!(events[1], RecordedEvent::PanIdAttack(false));
    }
}
