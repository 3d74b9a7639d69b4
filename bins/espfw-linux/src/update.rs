//! Firmware download over reqwest and a file-backed OTA partition.

use espfw_core::ota::{FirmwareFetcher, FlashError, FlashWriter};
use espfw_core::TransportError;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Blocking HTTP GET driven on the shared runtime.
///
/// Only call from outside the runtime's worker threads.
pub struct HttpFetcher {
    runtime: Handle,
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            client: reqwest::Client::new(),
        }
    }
}

impl FirmwareFetcher for HttpFetcher {
    fn get_text(&mut self, url: &str) -> Result<(i32, String), TransportError> {
        let request = self.client.get(url);
        self.runtime.block_on(async move {
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("[HTTP] GET {} failed: {}", url, e);
                    return Ok((-1, String::new()));
                }
            };
            let status = i32::from(response.status().as_u16());
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::Http(e.to_string()))?;
            Ok((status, body))
        })
    }

    fn download(&mut self, url: &str, out: &mut dyn Write) -> Result<i32, TransportError> {
        let request = self.client.get(url);
        self.runtime.block_on(async move {
            let mut response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("[HTTP] GET {} failed: {}", url, e);
                    return Ok(-1);
                }
            };
            let status = i32::from(response.status().as_u16());
            if status != 200 {
                return Ok(status);
            }
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| TransportError::Http(e.to_string()))?
            {
                out.write_all(&chunk)?;
            }
            Ok(status)
        })
    }
}

/// Stages an image next to the running "firmware" and swaps it in on finish.
pub struct FileFlash {
    staging: PathBuf,
    target: PathBuf,
    file: Option<File>,
    expected: usize,
    written: usize,
}

impl FileFlash {
    pub fn new(dir: &Path) -> Self {
        Self {
            staging: dir.join("ota.bin.part"),
            target: dir.join("firmware.bin"),
            file: None,
            expected: 0,
            written: 0,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl FlashWriter for FileFlash {
    fn begin(&mut self, size: usize) -> Result<(), FlashError> {
        if size == 0 {
            return Err(FlashError("empty image".into()));
        }
        if let Some(parent) = self.staging.parent() {
            fs::create_dir_all(parent).map_err(|e| FlashError(e.to_string()))?;
        }
        let file = File::create(&self.staging).map_err(|e| FlashError(e.to_string()))?;
        self.file = Some(file);
        self.expected = size;
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), FlashError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| FlashError("update not started".into()))?;
        file.write_all(data).map_err(|e| FlashError(e.to_string()))?;
        self.written += data.len();
        Ok(())
    }

    fn finish(&mut self) -> Result<(), FlashError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| FlashError("update not started".into()))?;
        file.flush().map_err(|e| FlashError(e.to_string()))?;
        drop(file);
        if self.written != self.expected {
            return Err(FlashError(format!(
                "wrote {} of {} bytes",
                self.written, self.expected
            )));
        }
        fs::rename(&self.staging, &self.target).map_err(|e| FlashError(e.to_string()))?;
        info!("Firmware staged at {}", self.target.display());
        Ok(())
    }
}
