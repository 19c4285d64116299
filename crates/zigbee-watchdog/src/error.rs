use thiserror::Error;
use zigbee_core::DriverError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchdogError {
    #[error("watchdog already initialized")]
    AlreadyInitialized,

    #[error("watchdog is not running, ignoring request for `{uuid}`")]
    NotRunning { uuid: String },

    #[error("device `{uuid}` is not monitored")]
    NotMonitored { uuid: String },

    #[error("invalid commFailTimeoutSeconds: 0 is not a valid timeout for `{uuid}`")]
    ZeroTimeout { uuid: String },

    #[error("refusing to shorten commFail timeout for `{uuid}`: requested floor {requested}s is below baseline {baseline}s")]
    ShortenRejected {
        uuid: String,
        requested: u32,
        baseline: u32,
    },
}

impl From<WatchdogError> for DriverError {
    fn from(value: WatchdogError) -> Self {
        match value {
            WatchdogError::AlreadyInitialized => DriverError::Internal {
                detail: "watchdog already initialized".into(),
            },
            WatchdogError::NotRunning { uuid } => DriverError::Internal {
                detail: format!("watchdog not running, ignored request for `{uuid}`"),
            },
            WatchdogError::NotMonitored { uuid } => DriverError::Internal {
                detail: format!("device `{uuid}` is not monitored"),
            },
            WatchdogError::ZeroTimeout { uuid } => DriverError::Internal {
                detail: format!("invalid zero commFailTimeoutSeconds for `{uuid}`"),
            },
            WatchdogError::ShortenRejected {
                uuid,
                requested,
                baseline,
            } => DriverError::ConfigConflict {
                detail: format!(
                    "refused to shorten commFail timeout for `{uuid}`: {requested}s < baseline {baseline}s"
                ),
            },
        }
    }
}
