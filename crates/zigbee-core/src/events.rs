use async_trait::async_trait;

use crate::ids::Eui64;

/// The outbound event bus. Wire format and transport are owned by the
/// surrounding device service; this core only needs to know it can publish
/// these named events.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    async fn comm_failed(&self, uuid: Eui64);
    async fn comm_restored(&self, uuid: Eui64);
    async fn network_interference(&self, active: bool);
    async fn pan_id_attack(&self, active: bool);
    async fn remote_cli_command_response_received(&self, uuid: Eui64, response: String);
}

/// No-op bus for tests that don't care about event delivery, and a
/// recording bus for tests that do.
#[derive(Debug, Default)]
pub struct NullEventBus;

#[async_trait]
impl EventBus for NullEventBus {
    async fn comm_failed(&self, _uuid: Eui64) {}
    async fn comm_restored(&self, _uuid: Eui64) {}
    async fn network_interference(&self, _active: bool) {}
    async fn pan_id_attack(&self, _active: bool) {}
    async fn remote_cli_command_response_received(&self, _uuid: Eui64, _response: String) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    CommFailed(Eui64),
    CommRestored(Eui64),
    NetworkInterference(bool),
    PanIdAttack(bool),
    RemoteCliResponse(Eui64, String),
}

#[derive(Debug, Default)]
pub struct RecordingEventBus {
    pub events: tokio::sync::Mutex<Vec<RecordedEvent>>,
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn comm_failed(&self, uuid: Eui64) {
        self.events.lock().await.push(RecordedEvent::CommFailed(uuid));
    }

    async fn comm_restored(&self, uuid: Eui64) {
        self.events.lock().await.push(RecordedEvent::CommRestored(uuid));
    }

    async fn network_interference(&self, active: bool) {
        self.events
            .lock()
            .await
            .push(RecordedEvent::NetworkInterference(active));
    }

    async fn pan_id_attack(&self, active: bool) {
        self.events.lock().await.push(RecordedEvent::PanIdAttack(active));
    }

    async fn remote_cli_command_response_received(&self, uuid: Eui64, response: String) {
        self.events
            .lock()
            .await
            .push(RecordedEvent::RemoteCliResponse(uuid, response));
    }
}
