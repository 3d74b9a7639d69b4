//! ESP32-CAM firmware.
//!
//! This binary requires the ESP32 Rust toolchain.
//! It will not compile with the standard Rust toolchain.
//!
//! Credentials are baked in at build time from `ESPFW_*` environment
//! variables; anything unset keeps the framework default.

use espfw_core::snapshot::SnapshotSpool;
use espfw_core::{CameraApp, FirmwareConfig, Framework, SharedCamera};
use espfw_esp32::camera::{EspCamera, EspFlashLight};
use espfw_esp32::nvs::NvsPreferences;
use espfw_esp32::platform::EspPlatform;
use espfw_esp32::system::{self, FS_ROOT};
use esp_idf_hal::gpio::OutputPin;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;
use std::sync::mpsc;

fn build_time_override(key: &str) -> Option<String> {
    let value = match key {
        "ESPFW_APP_NAME" => option_env!("ESPFW_APP_NAME"),
        "ESPFW_WIFI_SSID" => option_env!("ESPFW_WIFI_SSID"),
        "ESPFW_WIFI_PASSWORD" => option_env!("ESPFW_WIFI_PASSWORD"),
        "ESPFW_MQTT_HOST" => option_env!("ESPFW_MQTT_HOST"),
        "ESPFW_MQTT_PORT" => option_env!("ESPFW_MQTT_PORT"),
        "ESPFW_MQTT_USER" => option_env!("ESPFW_MQTT_USER"),
        "ESPFW_MQTT_PASSWORD" => option_env!("ESPFW_MQTT_PASSWORD"),
        "ESPFW_RTSP_PORT" => option_env!("ESPFW_RTSP_PORT"),
        "ESPFW_WEB_PORT" => option_env!("ESPFW_WEB_PORT"),
        "ESPFW_UPDATE_URL" => option_env!("ESPFW_UPDATE_URL"),
        _ => None,
    };
    value.map(str::to_string)
}

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = FirmwareConfig::default();
    config.apply_overrides(build_time_override)?;
    log::info!("{} {} starting...", config.app_name, config.firmware_version);
    system::log_boot_info();

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    system::mount_flash_fs()?;

    let store = NvsPreferences::open(nvs.clone(), &config.app_name)?;
    let wifi = EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs))?;
    let flash = EspFlashLight::new(peripherals.pins.gpio4.downgrade_output())?;
    let camera = SharedCamera::new(EspCamera::new());

    let (events_tx, events_rx) = mpsc::channel();
    let platform = EspPlatform::new(events_tx, config.clone(), wifi, sysloop, camera.clone());

    // No SD card slot is wired up, so snapshots spool to internal flash.
    let app = CameraApp::new(camera, flash, SnapshotSpool::open(FS_ROOT)?);

    let mut framework = Framework::new(config, platform, Box::new(store), app);
    framework.setup()?;
    framework.run(events_rx)
}
