//! HTTP downloads and OTA partition writes.

use embedded_svc::http::client::Client as HttpClient;
use embedded_svc::http::Method;
use embedded_svc::io::Read;
use espfw_core::ota::{FirmwareFetcher, FlashError, FlashWriter};
use espfw_core::TransportError;
use esp_idf_svc::http::client::{Configuration as HttpClientConfiguration, EspHttpConnection};
use esp_idf_svc::sys;
use log::{info, warn};
use std::io::Write;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const CHUNK_SIZE: usize = 1024;

/// Status reported when no response arrived.
const NO_RESPONSE: i32 = -1;

/// Blocking HTTP GET over the ESP-IDF client.
#[derive(Debug, Default)]
pub struct EspHttpFetcher;

impl EspHttpFetcher {
    fn get(
        &mut self,
        url: &str,
        mut on_body: impl FnMut(&[u8]) -> Result<(), TransportError>,
    ) -> Result<i32, TransportError> {
        let conf = HttpClientConfiguration {
            timeout: Some(HTTP_TIMEOUT),
            ..Default::default()
        };
        let connection =
            EspHttpConnection::new(&conf).map_err(|e| TransportError::Http(e.to_string()))?;
        let mut client = HttpClient::wrap(connection);
        let request = match client.request(Method::Get, url, &[]) {
            Ok(request) => request,
            Err(e) => {
                warn!("[HTTP] GET {} failed: {:?}", url, e);
                return Ok(NO_RESPONSE);
            }
        };
        let mut response = match request.submit() {
            Ok(response) => response,
            Err(e) => {
                warn!("[HTTP] GET {} failed: {:?}", url, e);
                return Ok(NO_RESPONSE);
            }
        };
        let status = i32::from(response.status());
        if status != 200 {
            return Ok(status);
        }

        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            let read = response
                .read(&mut chunk)
                .map_err(|e| TransportError::Http(format!("{:?}", e)))?;
            if read == 0 {
                break;
            }
            on_body(&chunk[..read])?;
        }
        Ok(status)
    }
}

impl FirmwareFetcher for EspHttpFetcher {
    fn get_text(&mut self, url: &str) -> Result<(i32, String), TransportError> {
        let mut body = Vec::new();
        let status = self.get(url, |chunk| {
            body.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok((status, String::from_utf8_lossy(&body).into_owned()))
    }

    fn download(&mut self, url: &str, out: &mut dyn Write) -> Result<i32, TransportError> {
        self.get(url, |chunk| out.write_all(chunk).map_err(TransportError::Io))
    }
}

fn esp_error(call: &str, code: sys::esp_err_t) -> FlashError {
    FlashError(format!("{} failed with error 0x{:x}", call, code))
}

/// Writes into the next OTA slot through the IDF update API.
pub struct EspFlash {
    partition: *const sys::esp_partition_t,
    handle: Option<sys::esp_ota_handle_t>,
}

impl Default for EspFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl EspFlash {
    pub fn new() -> Self {
        Self {
            partition: std::ptr::null(),
            handle: None,
        }
    }
}

impl FlashWriter for EspFlash {
    fn begin(&mut self, size: usize) -> Result<(), FlashError> {
        if let Some(handle) = self.handle.take() {
            // SAFETY: `handle` came from a successful esp_ota_begin.
            unsafe { sys::esp_ota_abort(handle) };
        }
        // SAFETY: a null argument asks for the slot after the running one.
        let partition = unsafe { sys::esp_ota_get_next_update_partition(std::ptr::null()) };
        if partition.is_null() {
            return Err(FlashError("no OTA partition available".into()));
        }
        let mut handle: sys::esp_ota_handle_t = 0;
        // SAFETY: `partition` is a valid table entry and `handle` is writable.
        let err = unsafe { sys::esp_ota_begin(partition, size, &mut handle) };
        if err != sys::ESP_OK {
            return Err(esp_error("esp_ota_begin", err));
        }
        self.partition = partition;
        self.handle = Some(handle);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), FlashError> {
        let handle = self
            .handle
            .ok_or_else(|| FlashError("update not started".into()))?;
        // SAFETY: `data` is valid for `data.len()` bytes.
        let err = unsafe { sys::esp_ota_write(handle, data.as_ptr().cast(), data.len()) };
        if err != sys::ESP_OK {
            return Err(esp_error("esp_ota_write", err));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), FlashError> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| FlashError("update not started".into()))?;
        // SAFETY: `handle` is open; esp_ota_end releases it on any result.
        let err = unsafe { sys::esp_ota_end(handle) };
        if err != sys::ESP_OK {
            return Err(esp_error("esp_ota_end", err));
        }
        // SAFETY: `partition` was returned by the IDF and holds a verified image.
        let err = unsafe { sys::esp_ota_set_boot_partition(self.partition) };
        if err != sys::ESP_OK {
            return Err(esp_error("esp_ota_set_boot_partition", err));
        }
        info!("New image set as boot partition");
        Ok(())
    }
}
