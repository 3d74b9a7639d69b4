//! Firmware update over HTTP.
//!
//! The update server publishes the id of the latest image at
//! `{remote_update_url}/{app}/firmware/id` and the image itself at
//! `{remote_update_url}/{app}/firmware`. The image is downloaded to the
//! flash filesystem first and then streamed into the OTA partition.

use crate::config::FirmwareConfig;
use crate::topics::firmware_file_name;
use crate::transport::TransportError;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delay between a successful update and the restart.
pub const RESTART_DELAY: Duration = Duration::from_secs(2);

const CHUNK_SIZE: usize = 4096;

/// Errors raised during a firmware update.
#[derive(Debug, thiserror::Error)]
pub enum OtaError {
    #[error("[HTTP] GET {url} failed with code {status}")]
    Http { url: String, status: i32 },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Firmware index returned an empty image id")]
    EmptyImageId,
    #[error("Cannot do the update: {0}")]
    CannotBegin(String),
    #[error("Flash error: {0}")]
    Flash(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error reported by a [`FlashWriter`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct FlashError(pub String);

/// HTTP GET access to the update server.
///
/// Both methods return the HTTP status. A negative status means the request
/// never got a response.
pub trait FirmwareFetcher {
    fn get_text(&mut self, url: &str) -> Result<(i32, String), TransportError>;

    /// Stream the body into `out` when the status is 200.
    fn download(&mut self, url: &str, out: &mut dyn Write) -> Result<i32, TransportError>;
}

/// Writes a firmware image into the inactive OTA partition.
pub trait FlashWriter {
    fn begin(&mut self, size: usize) -> Result<(), FlashError>;
    fn write(&mut self, data: &[u8]) -> Result<(), FlashError>;
    /// Validate the image and mark it bootable.
    fn finish(&mut self) -> Result<(), FlashError>;
}

/// Result of a completed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Flashed { bytes: usize },
}

/// Statuses treated as success.
pub fn is_success(status: i32) -> bool {
    status == 200 || status == 301
}

/// GET `http://host:port/path`. Returns the status and body; the body is
/// empty unless the status counts as success.
pub fn web_get<F: FirmwareFetcher + ?Sized>(
    fetcher: &mut F,
    host: &str,
    port: u16,
    path: &str,
) -> Result<(i32, String), TransportError> {
    let url = format!("http://{}:{}/{}", host, port, path.trim_start_matches('/'));
    debug!("[HTTP] GET {}", url);
    let (status, body) = fetcher.get_text(&url)?;
    if status <= 0 {
        error!("[HTTP] GET... failed, error: {}", status);
    }
    if is_success(status) {
        Ok((status, body))
    } else {
        Ok((status, String::new()))
    }
}

/// Fetch the latest image, store it under `fs_root` and flash it.
///
/// The caller restarts after [`RESTART_DELAY`] on success.
pub fn check_for_update<F, W>(
    config: &FirmwareConfig,
    fetcher: &mut F,
    flash: &mut W,
    fs_root: &Path,
) -> Result<UpdateOutcome, OtaError>
where
    F: FirmwareFetcher + ?Sized,
    W: FlashWriter + ?Sized,
{
    let index_url = config.firmware_index_url();
    let (status, image_id) = fetcher.get_text(&index_url)?;
    if !is_success(status) {
        return Err(OtaError::Http {
            url: index_url,
            status,
        });
    }
    let image_id = image_id.trim();
    if image_id.is_empty() {
        return Err(OtaError::EmptyImageId);
    }

    let file_name = firmware_file_name(&config.app_name, image_id);
    let path = fs_root.join(file_name.trim_start_matches('/'));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    info!("Downloading firmware {} to {}", image_id, path.display());

    let url = config.firmware_url();
    let mut file = File::create(&path)?;
    let status = fetcher.download(&url, &mut file)?;
    file.flush()?;
    drop(file);
    if status != 200 {
        return Err(OtaError::Http { url, status });
    }

    let bytes = flash_from_file(&path, flash)?;
    info!("Completed checking for FW updates.");
    Ok(UpdateOutcome::Flashed { bytes })
}

/// Stream a stored image into the flash writer.
pub fn flash_from_file<W: FlashWriter + ?Sized>(
    path: &Path,
    flash: &mut W,
) -> Result<usize, OtaError> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len() as usize;

    info!("Starting update..");
    flash.begin(size).map_err(|e| {
        warn!("Cannot do the update!");
        OtaError::CannotBegin(e.0)
    })?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        flash.write(&buf[..n]).map_err(|e| OtaError::Flash(e.0))?;
        written += n;
    }

    flash.finish().map_err(|e| {
        error!("Error Occurred: {}", e);
        OtaError::Flash(e.0)
    })?;
    info!("Successful update");
    info!("Reset in 2 seconds...");
    Ok(written)
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeFetcher, FakeFlash};
    use super::*;

    fn config() -> FirmwareConfig {
        FirmwareConfig {
            app_name: "cam".into(),
            remote_update_url: "http://fw.local/iot".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_full_update() {
        let dir = tempfile::tempdir().unwrap();
        let image = vec![0xE9u8; 10_000];
        let mut fetcher = FakeFetcher::default()
            .with("http://fw.local/iot/cam/firmware/id", 200, b"42\n")
            .with("http://fw.local/iot/cam/firmware", 200, &image);
        let mut flash = FakeFlash::default();

        let outcome = check_for_update(&config(), &mut fetcher, &mut flash, dir.path()).unwrap();
        assert_eq!(outcome, UpdateOutcome::Flashed { bytes: 10_000 });
        assert_eq!(flash.size, Some(10_000));
        assert_eq!(flash.data, image);
        assert!(flash.finished);
        assert!(dir.path().join("firmware/cam_42.bin").exists());
    }

    #[test]
    fn test_index_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetcher = FakeFetcher::default();
        let mut flash = FakeFlash::default();

        let err = check_for_update(&config(), &mut fetcher, &mut flash, dir.path()).unwrap_err();
        assert!(matches!(err, OtaError::Http { status: 404, .. }));
        assert_eq!(fetcher.requests.len(), 1);
    }

    #[test]
    fn test_empty_image_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut fetcher =
            FakeFetcher::default().with("http://fw.local/iot/cam/firmware/id", 200, b"  ");
        let err = check_for_update(&config(), &mut fetcher, &mut FakeFlash::default(), dir.path())
            .unwrap_err();
        assert!(matches!(err, OtaError::EmptyImageId));
    }

    #[test]
    fn test_flash_failures() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = || {
            FakeFetcher::default()
                .with("http://fw.local/iot/cam/firmware/id", 200, b"7")
                .with("http://fw.local/iot/cam/firmware", 200, b"image")
        };

        let mut flash = FakeFlash {
            refuse_begin: true,
            ..Default::default()
        };
        let err = check_for_update(&config(), &mut fetcher(), &mut flash, dir.path()).unwrap_err();
        assert!(matches!(err, OtaError::CannotBegin(_)));

        let mut flash = FakeFlash {
            refuse_finish: true,
            ..Default::default()
        };
        let err = check_for_update(&config(), &mut fetcher(), &mut flash, dir.path()).unwrap_err();
        assert!(matches!(err, OtaError::Flash(_)));
    }

    #[test]
    fn test_web_get() {
        let mut fetcher = FakeFetcher::default()
            .with("http://10.0.0.2:5000/api/time", 200, b"12:00")
            .with("http://10.0.0.2:5000/moved", 301, b"elsewhere")
            .with("http://10.0.0.2:5000/broken", 500, b"oops");

        assert_eq!(
            web_get(&mut fetcher, "10.0.0.2", 5000, "/api/time").unwrap(),
            (200, "12:00".to_string())
        );
        assert_eq!(
            web_get(&mut fetcher, "10.0.0.2", 5000, "moved").unwrap(),
            (301, "elsewhere".to_string())
        );
        assert_eq!(
            web_get(&mut fetcher, "10.0.0.2", 5000, "broken").unwrap(),
            (500, String::new())
        );
    }

    #[test]
    fn test_is_success() {
        assert!(is_success(200));
        assert!(is_success(301));
        assert!(!is_success(-1));
        assert!(!is_success(404));
    }
}
