//! Common per-driver orchestration layered on top of `zigbee-clusters` and
//! `zigbee-firmware`: lifecycle hooks, link quality, device-class-to-profile
//! mapping, and the periodic diagnostics sweep.

pub mod driver;
pub mod link_quality;
pub mod profile;

pub use driver::{CommonDriver, CommonDriverConfig, HigherDriver, RxMode};
pub use link_quality::{determine_link_quality, link_quality_details_json, LinkQualityLevel};
pub use profile::{profile_for_device_class, PROFILE_SECURITY_CONTROLLER, PROFILE_SENSOR};
