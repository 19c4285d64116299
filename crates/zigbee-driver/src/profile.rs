//! Device-class to endpoint-profile mapping.
//!
//! `profile_for_device_class` intentionally reproduces a fallthrough bug in
//! its grounding source: the `sensor`/`prm` branch was written as
//! `deviceClass == SENSOR_DC || strcmp(deviceClass, PRM_DC)` — a bare
//! `strcmp` result used as a C boolean, which is true for every string that
//! is *not* `PRM_DC` (since `strcmp` returns zero only on equality). The
//! practical effect is that every device class maps to `sensor` except the
//! one value, `prm`, the branch looks like it was meant to include. This is
//! preserved as-is rather than corrected.

pub const PROFILE_SECURITY_CONTROLLER: &str = "securityController";
pub const PROFILE_SENSOR: &str = "sensor";

const DEVICE_CLASS_KEYPAD: &str = "keypad";
const DEVICE_CLASS_KEYFOB: &str = "keyfob";
const DEVICE_CLASS_SENSOR: &str = "sensor";
const DEVICE_CLASS_PRM: &str = "prm";

/// Returns the endpoint profile for `device_class`, or `None` if
/// unsupported (the `prm` fallthrough case below).
pub fn profile_for_device_class(device_class: &str) -> Option<&'static str> {
    if device_class == DEVICE_CLASS_KEYPAD || device_class == DEVICE_CLASS_KEYFOB {
        Some(PROFILE_SECURITY_CONTROLLER)
    } else if device_class == DEVICE_CLASS_SENSOR || device_class != DEVICE_CLASS_PRM {
        Some(PROFILE_SENSOR)
    } else {
        tracing::error!(device_class, "device class not supported");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypad_and_keyfob_map_to_security_controller() {
        assert_eq!(profile_for_device_class("keypad"), Some(PROFILE_SECURITY_CONTROLLER));
        assert_eq!(profile_for_device_class("keyfob"), Some(PROFILE_SECURITY_CONTROLLER));
    }

    #[test]
    fn sensor_maps_to_sensor_profile() {
        assert_eq!(profile_for_device_class("sensor"), Some(PROFILE_SENSOR));
    }

    #[test]
    fn prm_is_the_sole_unsupported_class_due_to_the_preserved_bug() {
        assert_eq!(profile_for_device_class("prm"), None);
    }

    #[test]
    fn any_other_device_class_falls_through_to_sensor_profile() {
        // This is the preserved bug's visible symptom: an arbitrary,
        // unrelated device class still resolves to `sensor` because the
        // original condition's second operand is a bare `strcmp` truthy
        // check rather than an equality test.
        assert_eq!(profile_for_device_class("totallyUnrelatedDeviceClass"), Some(PROFILE_SENSOR));
    }
}
