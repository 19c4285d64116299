use thiserror::Error;
use zigbee_core::DriverError;

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("failed to download `{url}`: {detail}")]
    DownloadFailed { url: String, detail: String },

    #[error("checksum mismatch for `{file_name}`: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file_name: String,
        expected: String,
        actual: String,
    },

    #[error("firmware descriptor for `{uuid}` could not be parsed: {detail}")]
    DescriptorError { uuid: String, detail: String },

    #[error("filesystem error while staging `{file_name}`: {detail}")]
    Io { file_name: String, detail: String },
}

impl From<FirmwareError> for DriverError {
    fn from(value: FirmwareError) -> Self {
        match value {
            FirmwareError::DownloadFailed { url, detail } => DriverError::Transient {
                operation: format!("download {url}"),
                detail,
            },
            FirmwareError::ChecksumMismatch {
                file_name,
                expected,
                actual,
            } => DriverError::IntegrityError {
                file_name,
                detail: format!("expected md5 {expected}, got {actual}"),
            },
            FirmwareError::DescriptorError { uuid, detail } => {
                DriverError::DescriptorError { uuid, detail }
            }
            FirmwareError::Io { file_name, detail } => DriverError::IntegrityError { file_name, detail },
        }
    }
}
