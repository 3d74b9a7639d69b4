//! Status web server on the ESP-IDF HTTP server.

use crate::camera::EspCamera;
use espfw_core::{FirmwareConfig, FrameSource, SharedCamera};
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::Write;
use std::time::Instant;

/// Body of `GET /`.
pub fn status_json(
    config: &FirmwareConfig,
    uptime_secs: u64,
    camera_ready: bool,
    stream_url: Option<&str>,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&serde_json::json!({
        "app": config.app_name,
        "version": config.firmware_version,
        "hostname": config.hostname(),
        "uptimeSecs": uptime_secs,
        "camera": camera_ready,
        "stream": stream_url,
    }))
}

/// Start the server with `/` and `/snapshot` registered.
pub fn start(
    port: u16,
    config: FirmwareConfig,
    camera: SharedCamera<EspCamera>,
    started: Instant,
    stream_url: Option<String>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&Configuration {
        http_port: port,
        ..Default::default()
    })?;

    let status_camera = camera.clone();
    server.fn_handler("/", Method::Get, move |request| {
        let body = status_json(
            &config,
            started.elapsed().as_secs(),
            status_camera.is_ready(),
            stream_url.as_deref(),
        )?;
        request
            .into_response(200, Some("OK"), &[("Content-Type", "application/json")])?
            .write_all(body.as_bytes())?;
        Ok::<(), anyhow::Error>(())
    })?;

    server.fn_handler("/snapshot", Method::Get, move |request| {
        let mut camera = camera.clone();
        match camera.capture() {
            Ok(frame) => {
                request
                    .into_response(200, Some("OK"), &[("Content-Type", "image/jpeg")])?
                    .write_all(&frame.data)?;
            }
            Err(e) => {
                request
                    .into_status_response(503)?
                    .write_all(e.to_string().as_bytes())?;
            }
        }
        Ok::<(), anyhow::Error>(())
    })?;

    log::info!("HTTP server listening on port {}", port);
    Ok(server)
}
