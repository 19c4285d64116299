//! A delayed, cancelable background task. Used for the per-device firmware
//! upgrade scheduling: `spawn_delayed` fires its closure once the delay
//! elapses, unless `CancelHandle::cancel` is called first — used both for
//! "a newer descriptor arrived, supersede the earlier schedule" and for
//! "device removed / driver shutting down, drop pending work".

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use zigbee_core::Clock;

#[derive(Clone)]
pub struct CancelHandle {
    cancel: Arc<Notify>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel.notify_waiters();
    }
}

pub fn spawn_delayed<F, Fut>(clock: Arc<dyn Clock>, delay: Duration, work: F) -> (JoinHandle<()>, CancelHandle)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = Arc::new(Notify::new());
    let cancel_waiter = cancel.clone();

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = clock.sleep(delay) => {
                work().await;
            }
            _ = cancel_waiter.notified() => {}
        }
    });

    (handle, CancelHandle { cancel })
}
