//! Shared data model, external-interface traits, error taxonomy, and clock
//! abstraction for the Zigbee device management core. Every other crate in
//! this workspace depends on this one; nothing in here depends on a
//! concrete radio binding, device-service implementation, or persistence
//! layer — those are expressed purely as traits (see [`zhal`],
//! [`device_service`], [`properties`], [`events`]).

pub mod device_service;
pub mod error;
pub mod events;
pub mod ids;
pub mod model;
pub mod properties;
pub mod time;
pub mod zhal;

pub use error::{DriverError, ErrorCategory};
pub use ids::{ClusterId, EndpointId, Eui64};
pub use time::{Clock, MockClock, SystemClock};
