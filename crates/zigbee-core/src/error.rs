use thiserror::Error;

/// Coarse failure classification, used by callers to decide policy without
/// matching on every [`DriverError`] variant directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The originating operation should be retried, by the caller or by a
    /// scheduled retry loop.
    Retryable,
    /// The event is dropped with a log line; nothing is surfaced further.
    Silent,
    /// The current operation aborts and waits for a later event to repair
    /// state (e.g. a device announce that fills in missing details).
    Aborts,
    /// Logged and returned; never causes a crash, but is not retried here.
    Fatal,
}

/// Unified error domain for the Zigbee device management core.
///
/// Each variant carries the context needed to log usefully without string
/// parsing. Domain-specific error enums in sibling crates (`WatchdogError`,
/// `FirmwareError`, `ClusterError`, ...) convert into this type via `From`
/// so `?` works across crate boundaries, mirroring how `SwitchError`
/// converts into the shared domain error in the session-management layer
/// this crate's registries are modeled on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("transient radio error during `{operation}`: {detail}")]
    Transient { operation: String, detail: String },

    #[error("malformed ZCL frame on cluster {cluster_id:#06x}: {detail}")]
    MalformedFrame { cluster_id: u16, detail: String },

    #[error("protocol mismatch for device `{uuid}`: {detail}")]
    ProtocolMismatch { uuid: String, detail: String },

    #[error("firmware descriptor error for device `{uuid}`: {detail}")]
    DescriptorError { uuid: String, detail: String },

    #[error("integrity check failed for `{file_name}`: {detail}")]
    IntegrityError { file_name: String, detail: String },

    #[error("configuration conflict: {detail}")]
    ConfigConflict { detail: String },

    #[error("programmer error: {detail}")]
    Internal { detail: String },
}

impl DriverError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DriverError::Transient { .. } => ErrorCategory::Retryable,
            DriverError::MalformedFrame { .. } => ErrorCategory::Silent,
            DriverError::ProtocolMismatch { .. } => ErrorCategory::Aborts,
            DriverError::DescriptorError { .. } => ErrorCategory::Fatal,
            DriverError::IntegrityError { .. } => ErrorCategory::Retryable,
            DriverError::ConfigConflict { .. } => ErrorCategory::Silent,
            DriverError::Internal { .. } => ErrorCategory::Fatal,
        }
    }

    /// Stable dotted code, suitable for metrics/log correlation, e.g.
    /// `driver.transient.radio`.
    pub fn code(&self) -> &'static str {
        match self {
            DriverError::Transient { .. } => "driver.transient",
            DriverError::MalformedFrame { .. } => "driver.malformed_frame",
            DriverError::ProtocolMismatch { .. } => "driver.protocol_mismatch",
            DriverError::DescriptorError { .. } => "driver.descriptor",
            DriverError::IntegrityError { .. } => "driver.integrity",
            DriverError::ConfigConflict { .. } => "driver.config_conflict",
            DriverError::Internal { .. } => "driver.internal",
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        DriverError::Internal {
            detail: detail.into(),
        }
    }

    pub fn transient(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        DriverError::Transient {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_match_spec_policy_table() {
        assert_eq!(
            DriverError::transient("send", "timeout").category(),
            ErrorCategory::Retryable
        );
        assert_eq!(
            DriverError::MalformedFrame {
                cluster_id: 0x0019,
                detail: "short buffer".into()
            }
            .category(),
            ErrorCategory::Silent
        );
        assert_eq!(
            DriverError::ConfigConflict {
                detail: "shorten rejected".into()
            }
            .category(),
            ErrorCategory::Silent
        );
    }
}
