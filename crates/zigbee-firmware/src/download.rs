//! Checksum-verified file staging. `FileDownloader` is the seam a test
//! double replaces; `HttpFileDownloader` is the production implementation.

use std::path::Path;

use async_trait::async_trait;
use md5::{Digest, Md5};
use tokio::io::AsyncWriteExt;

use crate::error::FirmwareError;

#[async_trait]
pub trait FileDownloader: Send + Sync + 'static {
    /// Fetches `url` and writes the full body to `dest_path`, overwriting
    /// any existing file. Callers are responsible for staging to a temp
    /// path and moving into place atomically.
    async fn fetch_to_file(&self, url: &str, dest_path: &Path) -> Result<(), FirmwareError>;
}

pub struct HttpFileDownloader {
    client: reqwest::Client,
}

impl HttpFileDownloader {
    pub fn new() -> Self {
        HttpFileDownloader {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFileDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileDownloader for HttpFileDownloader {
    async fn fetch_to_file(&self, url: &str, dest_path: &Path) -> Result<(), FirmwareError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FirmwareError::DownloadFailed {
                url: url.to_string(),
                detail: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| FirmwareError::DownloadFailed {
                url: url.to_string(),
                detail: e.to_string(),
            })?;

        let bytes = response.bytes().await.map_err(|e| FirmwareError::DownloadFailed {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

        let mut file = tokio::fs::File::create(dest_path)
            .await
            .map_err(|e| FirmwareError::Io {
                file_name: dest_path.display().to_string(),
                detail: e.to_string(),
            })?;
        file.write_all(&bytes).await.map_err(|e| FirmwareError::Io {
            file_name: dest_path.display().to_string(),
            detail: e.to_string(),
        })?;
        Ok(())
    }
}

/// Lowercase hex MD5 of a file already on disk.
pub async fn md5_of_file(path: &Path) -> Result<String, FirmwareError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| FirmwareError::Io {
        file_name: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let mut hasher = Md5::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
