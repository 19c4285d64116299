//! Poll Control cluster (0x0020) plug-in. Owns the configuration side
//! (checkin/long-poll/short-poll intervals written to the device); the
//! inbound checkin event itself is routed through
//! [`crate::poll_control::PollControlCoordinator`], not through this
//! cluster's hooks, since a checkin isn't addressed to one cluster id.

use async_trait::async_trait;

use zigbee_core::ids::ClusterId;
use zigbee_core::DriverError;

use crate::cluster::{Cluster, ConfigureContext};

const ATTR_CHECKIN_INTERVAL: u16 = 0x0000;
const ATTR_LONG_POLL_INTERVAL: u16 = 0x0001;
const ATTR_SHORT_POLL_INTERVAL: u16 = 0x0002;

const CONFIG_CHECKIN_INTERVAL_QS: &str = "pollControl.checkinIntervalQuarterSecs";
const CONFIG_LONG_POLL_INTERVAL_QS: &str = "pollControl.longPollIntervalQuarterSecs";
const CONFIG_SHORT_POLL_INTERVAL_QS: &str = "pollControl.shortPollIntervalQuarterSecs";

const DEFAULT_CHECKIN_INTERVAL_QS: u32 = 14400; // 1 hour
const DEFAULT_LONG_POLL_INTERVAL_QS: u32 = 20; // 5 seconds
const DEFAULT_SHORT_POLL_INTERVAL_QS: u32 = 2; // 0.5 seconds

pub struct PollControlCluster;

impl PollControlCluster {
    pub fn new() -> Self {
        PollControlCluster
    }
}

impl Default for PollControlCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cluster for PollControlCluster {
    fn cluster_id(&self) -> ClusterId {
        ClusterId::POLL_CONTROL
    }

    async fn configure(&self, ctx: &ConfigureContext) -> Result<(), DriverError> {
        let checkin = ctx.config.get_u32_or(CONFIG_CHECKIN_INTERVAL_QS, DEFAULT_CHECKIN_INTERVAL_QS).await;
        let long_poll = ctx.config.get_u32_or(CONFIG_LONG_POLL_INTERVAL_QS, DEFAULT_LONG_POLL_INTERVAL_QS).await;
        let short_poll = ctx.config.get_u32_or(CONFIG_SHORT_POLL_INTERVAL_QS, DEFAULT_SHORT_POLL_INTERVAL_QS).await;

        ctx.radio
            .write_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::POLL_CONTROL, None, ATTR_CHECKIN_INTERVAL, &checkin.to_le_bytes())
            .await?;
        ctx.radio
            .write_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::POLL_CONTROL, None, ATTR_LONG_POLL_INTERVAL, &long_poll.to_le_bytes())
            .await?;
        ctx.radio
            .write_attribute(
                ctx.eui64,
                ctx.endpoint_id,
                ClusterId::POLL_CONTROL,
                None,
                ATTR_SHORT_POLL_INTERVAL,
                &(short_poll as u16).to_le_bytes(),
            )
            .await
    }
}
