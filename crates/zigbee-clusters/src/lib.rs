//! Cluster registry and dispatch, the discovered-device details cache,
//! poll-control checkin coordination, and the standard ZCL cluster
//! plug-ins built on top of them.

pub mod cluster;
pub mod clusters;
pub mod discovered_store;
pub mod poll_control;
pub mod registry;

pub use cluster::{Cluster, ConfigMap, ConfigValue, ConfigureContext, DispatchContext};
pub use discovered_store::DiscoveredDeviceStore;
pub use poll_control::{BatterySavingPayload, PollControlCoordinator};
pub use registry::{ClusterRegistry, DriverEventHooks};
