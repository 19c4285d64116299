//! Basic cluster (0x0000). Carries only the static identity attributes the
//! common driver folds into its `deviceFound` payload and initial resource
//! fetch; there's no reporting to configure and no inbound event to react
//! to, so this exposes a direct read helper instead of overriding any
//! `Cluster` hook.

use async_trait::async_trait;

use zigbee_core::ids::ClusterId;
use zigbee_core::zhal::RadioOutbound;
use zigbee_core::DriverError;

use crate::cluster::{Cluster, DispatchContext};

const ATTR_HW_VERSION: u16 = 0x0003;
const ATTR_MANUFACTURER_NAME: u16 = 0x0004;
const ATTR_MODEL_IDENTIFIER: u16 = 0x0005;
const ATTR_SW_BUILD_ID: u16 = 0x4000;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicAttributes {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub hardware_version: Option<u8>,
    pub sw_build_id: Option<String>,
}

pub struct BasicCluster;

impl BasicCluster {
    pub fn new() -> Self {
        BasicCluster
    }

    /// Best-effort read of every identity attribute; a single attribute's
    /// read failure doesn't fail the others.
    pub async fn read_basic_attributes(&self, ctx: &DispatchContext) -> BasicAttributes {
        let mut attrs = BasicAttributes::default();

        if let Ok(bytes) = ctx.radio.read_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::BASIC, None, ATTR_MANUFACTURER_NAME).await {
            attrs.manufacturer = decode_attribute_string(&bytes);
        }
        if let Ok(bytes) = ctx.radio.read_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::BASIC, None, ATTR_MODEL_IDENTIFIER).await {
            attrs.model = decode_attribute_string(&bytes);
        }
        if let Ok(bytes) = ctx.radio.read_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::BASIC, None, ATTR_HW_VERSION).await {
            attrs.hardware_version = bytes.first().copied();
        }
        if let Ok(bytes) = ctx.radio.read_attribute(ctx.eui64, ctx.endpoint_id, ClusterId::BASIC, None, ATTR_SW_BUILD_ID).await {
            attrs.sw_build_id = decode_attribute_string(&bytes);
        }

        attrs
    }
}

impl Default for BasicCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_attribute_string(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let len = bytes[0] as usize;
    let body = bytes.get(1..1 + len)?;
    Some(String::from_utf8_lossy(body).into_owned())
}

#[async_trait]
impl Cluster for BasicCluster {
    fn cluster_id(&self) -> ClusterId {
        ClusterId::BASIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use zigbee_core::ids::{EndpointId, Eui64};
    use std::sync::Arc;

    struct ScriptedRadio {
        answers: StdMutex<std::collections::HashMap<u16, Vec<u8>>>,
    }

    #[async_trait]
    impl RadioOutbound for ScriptedRadio {
        async fn send_command(&self, _: Eui64, _: EndpointId, _: ClusterId, _: Option<u16>, _: bool, _: u8, _: &[u8]) -> Result<(), DriverError> {
            Ok(())
        }
        async fn read_attribute(&self, _: Eui64, _: EndpointId, _: ClusterId, _: Option<u16>, attribute_id: u16) -> Result<Vec<u8>, DriverError> {
            self.answers
                .lock()
                .unwrap()
                .get(&attribute_id)
                .cloned()
                .ok_or_else(|| DriverError::transient("read_attribute", "no scripted answer"))
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

    #[tokio::test]
    async fn reads_identity_attributes() {
        let mut answers = std::collections::HashMap::new();
        answers.insert(ATTR_MANUFACTURER_NAME, {
            let mut v = vec![4u8];
            v.extend_from_slice(b"Acme");
            v
        });
        answers.insert(ATTR_MODEL_IDENTIFIER, {
            let mut v = vec![6u8];
            v.extend_from_slice(b"Widget");
            v
        });
        answers.insert(ATTR_HW_VERSION, vec![2]);

        let radio: Arc<dyn RadioOutbound> = Arc::new(ScriptedRadio { answers: StdMutex::new(answers) });
        let ctx = DispatchContext::without_link_metadata(Eui64(1), EndpointId(1), radio);

        let cluster = BasicCluster::new();
        let attrs = cluster.read_basic_attributes(&ctx).await;

        assert_eq!(attrs.manufacturer.as_deref(), Some("Acme"));
        assert_eq!(attrs.model.as_deref(), Some("Widget"));
        assert_eq!(attrs.hardware_version, Some(2));
        assert_eq!(attrs.sw_build_id, None);
    }
}
