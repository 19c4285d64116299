use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use zigbee_core::ids::ClusterId;
use zigbee_core::DriverError;

use crate::cluster::{Cluster, ConfigureContext, DispatchContext};

/// The higher-level driver's equivalent hooks, always invoked after the
/// matching cluster hook runs, whether or not the cluster handled the
/// event itself.
#[async_trait]
pub trait DriverEventHooks: Send + Sync + 'static {
    /// Called before cluster dispatch for any context carrying non-zero
    /// `ne_rssi`/`ne_lqi`, so near-end link quality reflects the inbound
    /// message before a cluster or driver hook can act on it.
    async fn note_link_metadata(&self, _ctx: &DispatchContext) {}
    async fn attribute_report(&self, _ctx: &DispatchContext, _cluster_id: ClusterId, _payload: &[u8]) {}
    async fn cluster_command(&self, _ctx: &DispatchContext, _cluster_id: ClusterId, _command_id: u8, _payload: &[u8]) {}
    async fn poll_control_checkin(&self, _ctx: &DispatchContext) {}
    async fn device_rejoined(&self, _ctx: &DispatchContext) {}
}

/// Holds the set of clusters a driver instance cares about and maps
/// inbound events to the right one. One registry is shared across every
/// instance of a given driver, keyed by driver name.
#[derive(Default)]
pub struct ClusterRegistry {
    drivers: DashMap<String, DashMap<ClusterId, Arc<dyn Cluster>>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent by cluster id for one driver: re-adding replaces silently.
    pub fn add_cluster(&self, driver: &str, cluster: Arc<dyn Cluster>) {
        let clusters = self.drivers.entry(driver.to_string()).or_default();
        clusters.insert(cluster.cluster_id(), cluster);
    }

    pub fn get_cluster(&self, driver: &str, cluster_id: ClusterId) -> Option<Arc<dyn Cluster>> {
        self.drivers.get(driver)?.get(&cluster_id).map(|e| e.clone())
    }

    /// Drops a single cluster from a driver's set, calling its `destroy`
    /// hook first. Used on driver shutdown to unwind `add_cluster`
    /// registrations one at a time rather than dropping the whole
    /// per-driver map at once.
    pub async fn remove_cluster(&self, driver: &str, cluster_id: ClusterId) {
        let removed = self.drivers.get(driver).and_then(|clusters| clusters.remove(&cluster_id)).map(|(_, c)| c);
        if let Some(cluster) = removed {
            cluster.destroy().await;
        }
    }

    fn clusters_for(&self, driver: &str) -> Vec<Arc<dyn Cluster>> {
        match self.drivers.get(driver) {
            Some(map) => map.iter().map(|e| e.value().clone()).collect(),
            None => Vec::new(),
        }
    }

    /// The same highest-first ordering `configure_all` uses, exposed so
    /// other callers (the diagnostics sweep looking for a device's
    /// Diagnostics cluster) don't have to re-derive the sort themselves.
    pub fn clusters_by_priority(&self, driver: &str) -> Vec<Arc<dyn Cluster>> {
        let mut clusters = self.clusters_for(driver);
        clusters.sort_by(|a, b| b.priority().cmp(&a.priority()));
        clusters
    }

    /// Updates near-end link quality from the context's link metadata before
    /// any cluster or driver hook runs, skipping contexts synthesized
    /// without real metadata (`ne_rssi == 0 && ne_lqi == 0`).
    async fn note_link_metadata_if_present(&self, ctx: &DispatchContext, hooks: &dyn DriverEventHooks) {
        if ctx.ne_rssi != 0 || ctx.ne_lqi != 0 {
            hooks.note_link_metadata(ctx).await;
        }
    }

    pub async fn dispatch_attribute_report(
        &self,
        driver: &str,
        ctx: &DispatchContext,
        cluster_id: ClusterId,
        payload: &[u8],
        hooks: &dyn DriverEventHooks,
    ) {
        self.note_link_metadata_if_present(ctx, hooks).await;
        if let Some(cluster) = self.get_cluster(driver, cluster_id) {
            if let Err(e) = cluster.on_attribute_report(ctx, payload).await {
                warn!(cluster_id = %cluster_id, error = %e, "cluster failed to handle attribute report");
            }
        }
        hooks.attribute_report(ctx, cluster_id, payload).await;
    }

    pub async fn dispatch_cluster_command(
        &self,
        driver: &str,
        ctx: &DispatchContext,
        cluster_id: ClusterId,
        command_id: u8,
        payload: &[u8],
        hooks: &dyn DriverEventHooks,
    ) {
        self.note_link_metadata_if_present(ctx, hooks).await;
        if let Some(cluster) = self.get_cluster(driver, cluster_id) {
            if let Err(e) = cluster.on_cluster_command(ctx, command_id, payload).await {
                warn!(cluster_id = %cluster_id, error = %e, "cluster failed to handle cluster command");
            }
        }
        hooks.cluster_command(ctx, cluster_id, command_id, payload).await;
    }

    /// Poll-control checkins aren't addressed to a single cluster id; every
    /// registered cluster that cares gets a chance (mirrors the grounding
    /// source, where the OTA cluster implements this hook to resend a
    /// pending ImageNotify while the device is listening).
    pub async fn dispatch_poll_control_checkin(&self, driver: &str, ctx: &DispatchContext, hooks: &dyn DriverEventHooks) {
        for cluster in self.clusters_for(driver) {
            if let Err(e) = cluster.on_poll_control_checkin(ctx).await {
                warn!(cluster_id = %cluster.cluster_id(), error = %e, "cluster failed to handle poll control checkin");
            }
        }
        hooks.poll_control_checkin(ctx).await;
    }

    pub async fn dispatch_device_rejoined(&self, driver: &str, ctx: &DispatchContext, hooks: &dyn DriverEventHooks) {
        for cluster in self.clusters_for(driver) {
            if let Err(e) = cluster.on_device_rejoined(ctx).await {
                warn!(cluster_id = %cluster.cluster_id(), error = %e, "cluster failed to handle device rejoined");
            }
        }
        hooks.device_rejoined(ctx).await;
    }

    /// Ordering of configuration: `highest` priority first, unstable within
    /// the same band. Aborts on the first failure.
    pub async fn configure_all(&self, driver: &str, ctx: &ConfigureContext) -> Result<(), DriverError> {
        // `ClusterPriority::Highest` sorts after `Default` in declaration
        // order; `clusters_by_priority` already reverses the comparison so
        // highest-priority clusters run first.
        for cluster in self.clusters_by_priority(driver) {
            debug!(cluster_id = %cluster.cluster_id(), "configuring cluster");
            cluster.configure(ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Mutex as StdMutex;
    use zigbee_core::ids::{EndpointId, Eui64};
    use zigbee_core::model::{ClusterPriority, DiscoveredDeviceDetails};

    struct OrderRecordingCluster {
        id: ClusterId,
        priority: ClusterPriority,
        order: Arc<StdMutex<Vec<u16>>>,
    }

    #[async_trait]
    impl Cluster for OrderRecordingCluster {
        fn cluster_id(&self) -> ClusterId {
            self.id
        }
        fn priority(&self) -> ClusterPriority {
            self.priority
        }
        async fn configure(&self, _ctx: &ConfigureContext) -> Result<(), DriverError> {
            self.order.lock().unwrap().push(self.id.0);
            Ok(())
        }
    }

    fn fake_radio() -> Arc<dyn zigbee_core::zhal::RadioOutbound> {
        struct NoopRadio;
        #[async_trait]
        impl zigbee_core::zhal::RadioOutbound for NoopRadio {
            async fn send_command(&self, _: Eui64, _: EndpointId, _: ClusterId, _: Option<u16>, _: bool, _: u8, _: &[u8]) -> Result<(), DriverError> {
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
                Ok(())
            }
            async fn configure_pan_id_defender(&self, _: u32, _: u32, _: u32) -> Result<(), DriverError> {
                Ok(())
            }
        }
        Arc::new(NoopRadio)
    }

    #[tokio::test]
    async fn configure_all_runs_highest_priority_first() {
        let registry = ClusterRegistry::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        registry.add_cluster(
            "driverA",
            Arc::new(OrderRecordingCluster {
                id: ClusterId(1),
                priority: ClusterPriority::Default,
                order: order.clone(),
            }),
        );
        registry.add_cluster(
            "driverA",
            Arc::new(OrderRecordingCluster {
                id: ClusterId(2),
                priority: ClusterPriority::Highest,
                order: order.clone(),
            }),
        );

        let ctx = ConfigureContext {
            eui64: Eui64(1),
            endpoint_id: EndpointId(1),
            details: DiscoveredDeviceDetails {
                eui64: Eui64(1).to_uuid_string(),
                manufacturer: String::new(),
                model: String::new(),
                hardware_version: 0,
                firmware_version: 0,
                power_source: zigbee_core::model::PowerSource::Mains,
                device_type: zigbee_core::model::ZigbeeDeviceType::EndDevice,
                endpoints: vec![],
            },
            radio: fake_radio(),
            config: crate::cluster::ConfigMap::new(),
        };

        registry.configure_all("driverA", &ctx).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn add_cluster_is_idempotent_by_cluster_id() {
        let registry = ClusterRegistry::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let counter = Arc::new(AtomicU8::new(0));
        let _ = &counter;

        registry.add_cluster(
            "driverB",
            Arc::new(OrderRecordingCluster {
                id: ClusterId(5),
                priority: ClusterPriority::Default,
                order: order.clone(),
            }),
        );
        registry.add_cluster(
            "driverB",
            Arc::new(OrderRecordingCluster {
                id: ClusterId(5),
                priority: ClusterPriority::Default,
                order: order.clone(),
            }),
        );

        assert!(registry.get_cluster("driverB", ClusterId(5)).is_some());
        assert_eq!(registry.clusters_for("driverB").len(), 1);
    }

    struct DestroyTrackingCluster {
        id: ClusterId,
        destroyed: Arc<AtomicU8>,
    }

    #[async_trait]
    impl Cluster for DestroyTrackingCluster {
        fn cluster_id(&self) -> ClusterId {
            self.id
        }
        async fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn remove_cluster_calls_destroy_and_drops_it() {
        let registry = ClusterRegistry::new();
        let destroyed = Arc::new(AtomicU8::new(0));
        registry.add_cluster("driverC", Arc::new(DestroyTrackingCluster { id: ClusterId(9), destroyed: destroyed.clone() }));

        registry.remove_cluster("driverC", ClusterId(9)).await;

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(registry.get_cluster("driverC", ClusterId(9)).is_none());
    }

    #[tokio::test]
    async fn remove_cluster_on_unknown_driver_is_a_noop() {
        let registry = ClusterRegistry::new();
        registry.remove_cluster("neverAdded", ClusterId(1)).await;
    }

    #[derive(Default)]
    struct RecordingHooks {
        calls: StdMutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl DriverEventHooks for RecordingHooks {
        async fn note_link_metadata(&self, _ctx: &DispatchContext) {
            self.calls.lock().unwrap().push("note_link_metadata");
        }
        async fn attribute_report(&self, _ctx: &DispatchContext, _cluster_id: ClusterId, _payload: &[u8]) {
            self.calls.lock().unwrap().push("attribute_report");
        }
    }

    #[tokio::test]
    async fn attribute_report_dispatch_updates_link_metadata_before_hook_runs() {
        let registry = ClusterRegistry::new();
        let hooks = RecordingHooks::default();
        let ctx = DispatchContext { eui64: Eui64(1), endpoint_id: EndpointId(1), radio: fake_radio(), ne_rssi: -40, ne_lqi: 200 };

        registry.dispatch_attribute_report("driverE", &ctx, ClusterId(1), &[], &hooks).await;

        assert_eq!(*hooks.calls.lock().unwrap(), vec!["note_link_metadata", "attribute_report"]);
    }

    #[tokio::test]
    async fn attribute_report_dispatch_skips_link_metadata_update_without_real_metadata() {
        let registry = ClusterRegistry::new();
        let hooks = RecordingHooks::default();
        let ctx = DispatchContext::without_link_metadata(Eui64(1), EndpointId(1), fake_radio());

        registry.dispatch_attribute_report("driverE", &ctx, ClusterId(1), &[], &hooks).await;

        assert_eq!(*hooks.calls.lock().unwrap(), vec!["attribute_report"]);
    }

    #[tokio::test]
    async fn clusters_by_priority_orders_highest_first() {
        let registry = ClusterRegistry::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        registry.add_cluster("driverD", Arc::new(OrderRecordingCluster { id: ClusterId(1), priority: ClusterPriority::Default, order: order.clone() }));
        registry.add_cluster("driverD", Arc::new(OrderRecordingCluster { id: ClusterId(2), priority: ClusterPriority::Highest, order: order.clone() }));

        let ids: Vec<u16> = registry.clusters_by_priority("driverD").iter().map(|c| c.cluster_id().0).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
