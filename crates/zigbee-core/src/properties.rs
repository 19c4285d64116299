/// Configuration reads with defaults, mirroring the property table. All
/// reads are infallible from the caller's perspective: a missing key
/// resolves to the documented default rather than an error.
pub trait PropertyProvider: Send + Sync + 'static {
    fn get_string(&self, key: &str) -> Option<String>;
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn get_u32(&self, key: &str, default: u32) -> u32;
    fn get_i32(&self, key: &str, default: i32) -> i32;

    fn device_firmware_base_url(&self) -> Option<String> {
        self.get_string("deviceFirmwareBaseUrl")
    }

    fn firmware_upgrade_delay_secs(&self) -> u32 {
        self.get_u32("firmware.upgrade.delaySecs", 7200)
    }

    fn firmware_upgrade_retry_delay_secs(&self) -> u32 {
        self.get_u32("firmware.upgrade.retryDelaySecs", 3600)
    }

    fn firmware_upgrade_no_delay(&self) -> bool {
        self.get_bool("zigbee.fw.upgrade.nodelay.flag", false)
    }

    fn battery_voltage_refresh_min_secs(&self) -> u32 {
        self.get_u32("BatteryVoltageRefreshMinSecs", 86400)
    }

    fn fe_rssi_refresh_min_secs(&self) -> u32 {
        self.get_u32("FeRssiRefreshMinSecs", 1500)
    }

    fn fe_lqi_refresh_min_secs(&self) -> u32 {
        self.get_u32("FeLqiRefreshMinSecs", 1500)
    }

    fn temp_refresh_min_secs(&self) -> u32 {
        self.get_u32("TempRefreshMinSecs", 3000)
    }

    fn fast_comm_fail_test_mode(&self) -> bool {
        self.get_bool("zigbee.testing.fastCommFail.flag", false)
    }

    fn health_check_interval_millis(&self) -> u32 {
        self.get_u32("cpe.zigbee.healthCheck.intervalMillis", 0)
    }

    fn health_check_cca_threshold(&self) -> i32 {
        self.get_i32("cpe.zigbee.healthCheck.ccaThreshold", 1)
    }

    fn health_check_cca_failure_threshold(&self) -> u32 {
        self.get_u32("cpe.zigbee.healthCheck.ccaFailureThreshold", 10)
    }

    fn health_check_restore_threshold(&self) -> u32 {
        self.get_u32("cpe.zigbee.healthCheck.restoreThreshold", 600)
    }

    fn health_check_delay_between_retries_millis(&self) -> u32 {
        self.get_u32("cpe.zigbee.healthCheck.delayBetweenThresholdRetriesMillis", 1000)
    }

    fn defender_change_threshold(&self) -> u32 {
        self.get_u32("cpe.zigbee.defender.changeThreshold", 0)
    }

    fn defender_window_millis(&self) -> u32 {
        self.get_u32("cpe.zigbee.defender.windowMillis", 0)
    }

    fn defender_restore_millis(&self) -> u32 {
        self.get_u32("cpe.zigbee.defender.restoreMillis", 0)
    }
}

/// Simple in-memory implementation used by tests and by binaries that load
/// configuration from a flat map before handing it to the rest of the core.
#[derive(Debug, Clone, Default)]
pub struct MapPropertyProvider {
    values: std::collections::HashMap<String, String>,
}

impl MapPropertyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl PropertyProvider for MapPropertyProvider {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values
            .get(key)
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(default)
    }

    fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.values
            .get(key)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(default)
    }

    fn get_i32(&self, key: &str, default: i32) -> i32 {
        self.values
            .get(key)
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(default)
    }
}
