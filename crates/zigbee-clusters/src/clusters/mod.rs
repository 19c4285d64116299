//! Standard cluster plug-ins built on top of the [`crate::cluster::Cluster`]
//! trait. Each one is grounded on the matching real ZCL cluster; none of
//! them are required to be registered for the registry/dispatch machinery
//! in [`crate::registry`] to work.

pub mod basic;
pub mod color_control;
pub mod diagnostics;
pub mod ota_upgrade;
pub mod poll_control;
pub mod power_configuration;
pub mod temperature_measurement;

pub use basic::{BasicAttributes, BasicCluster};
pub use color_control::ColorControlCluster;
pub use diagnostics::DiagnosticsCluster;
pub use ota_upgrade::OtaUpgradeCluster;
pub use poll_control::PollControlCluster;
pub use power_configuration::PowerConfigurationCluster;
pub use temperature_measurement::TemperatureMeasurementCluster;
