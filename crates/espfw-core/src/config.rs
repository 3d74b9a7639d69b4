//! Firmware configuration.
//!
//! Holds the connection secrets and feature switches for a device. The
//! defaults mirror the values baked into a fresh build; a JSON file and
//! `ESPFW_*` environment variables can override them on platforms that have
//! a filesystem or an environment.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Read error: {0}")]
    ReadError(#[from] std::io::Error),
    /// Configuration data is invalid.
    #[error("Invalid data: {0}")]
    InvalidData(#[from] serde_json::Error),
    /// A value failed validation.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Optional framework subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Features {
    /// Report the deep-sleep wakeup cause at boot.
    pub deep_sleep: bool,
    /// Camera capture and snapshots.
    pub camera: bool,
    /// TFT display and font rendering.
    pub graphics: bool,
    /// SD card mount and directory report.
    pub sd_card: bool,
    /// Status web server, started once WiFi is up.
    pub web_server: bool,
    /// RTSP streaming task.
    pub rtsp: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            deep_sleep: true,
            camera: true,
            graphics: false,
            sd_card: true,
            web_server: true,
            rtsp: true,
        }
    }
}

/// Device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FirmwareConfig {
    /// Application name. Used as hostname, MQTT root topic and NVS namespace.
    pub app_name: String,

    /// Firmware version string reported by the device.
    pub firmware_version: String,

    /// Shared application secret.
    pub app_secret: String,

    /// WiFi network SSID.
    pub wifi_ssid: String,

    /// WiFi network password (empty for open networks).
    pub wifi_password: String,

    /// NTP server used once WiFi is up.
    pub ntp_server: String,

    /// POSIX timezone string applied after time sync.
    pub timezone: String,

    /// Offset from GMT in seconds.
    pub gmt_offset_secs: i64,

    /// Daylight saving offset in seconds.
    pub daylight_offset_secs: i32,

    /// Application HTTP server host.
    pub http_server: String,

    /// Application HTTP server port.
    pub http_port: u16,

    /// MQTT broker host.
    pub mqtt_host: String,

    /// MQTT broker port.
    pub mqtt_port: u16,

    /// Optional MQTT username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_user: Option<String>,

    /// Optional MQTT password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_password: Option<String>,

    /// RTSP listen port.
    pub rtsp_port: u16,

    /// Status web server port.
    pub web_port: u16,

    /// Base URL of the firmware repository.
    pub remote_update_url: String,

    /// Device latitude.
    pub latitude: f64,

    /// Device longitude.
    pub longitude: f64,

    /// Enabled subsystems.
    pub features: Features,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            app_name: "esp32FWApp".to_string(),
            firmware_version: "v0.0.1".to_string(),
            app_secret: "536CB6A57A55C82BEDD22A9566A47".to_string(),
            wifi_ssid: "APName".to_string(),
            wifi_password: "APPassword".to_string(),
            ntp_server: "pool.ntp.org".to_string(),
            timezone: "PST8PDT,M3.2.0/2:00:00,M11.1.0/2:00:00".to_string(),
            gmt_offset_secs: 0,
            daylight_offset_secs: 3600,
            http_server: "192.168.0.12".to_string(),
            http_port: 5000,
            mqtt_host: "192.168.0.200".to_string(),
            mqtt_port: 1883,
            mqtt_user: None,
            mqtt_password: None,
            rtsp_port: 8554,
            web_port: 80,
            remote_update_url: "http://192.168.0.12/internal/iot".to_string(),
            latitude: 37.3380937,
            longitude: -121.8853892,
            features: Features::default(),
        }
    }
}

impl FirmwareConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Override credentials and endpoints from `ESPFW_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, keyed by `ESPFW_*` names.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ESPFW_APP_NAME") {
            self.app_name = v;
        }
        if let Some(v) = lookup("ESPFW_WIFI_SSID") {
            self.wifi_ssid = v;
        }
        if let Some(v) = lookup("ESPFW_WIFI_PASSWORD") {
            self.wifi_password = v;
        }
        if let Some(v) = lookup("ESPFW_MQTT_HOST") {
            self.mqtt_host = v;
        }
        if let Some(v) = lookup("ESPFW_MQTT_PORT") {
            self.mqtt_port = parse_port("mqtt_port", &v)?;
        }
        if let Some(v) = lookup("ESPFW_MQTT_USER") {
            self.mqtt_user = Some(v);
        }
        if let Some(v) = lookup("ESPFW_MQTT_PASSWORD") {
            self.mqtt_password = Some(v);
        }
        if let Some(v) = lookup("ESPFW_RTSP_PORT") {
            self.rtsp_port = parse_port("rtsp_port", &v)?;
        }
        if let Some(v) = lookup("ESPFW_WEB_PORT") {
            self.web_port = parse_port("web_port", &v)?;
        }
        if let Some(v) = lookup("ESPFW_UPDATE_URL") {
            self.remote_update_url = v;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "app_name",
                reason: "cannot be empty".to_string(),
            });
        }
        if self.app_name.contains(['/', '#', '+']) {
            return Err(ConfigError::InvalidValue {
                field: "app_name",
                reason: "must not contain MQTT topic separators or wildcards".to_string(),
            });
        }
        Ok(())
    }

    /// Network hostname of the device.
    pub fn hostname(&self) -> &str {
        &self.app_name
    }

    /// Broker URL in `mqtt://host:port` form.
    pub fn mqtt_url(&self) -> String {
        format!("mqtt://{}:{}", self.mqtt_host, self.mqtt_port)
    }

    /// URL serving the latest firmware image.
    pub fn firmware_url(&self) -> String {
        format!("{}/{}/firmware", self.remote_update_url, self.app_name)
    }

    /// URL returning the id of the latest firmware image.
    pub fn firmware_index_url(&self) -> String {
        format!("{}/{}/firmware/id", self.remote_update_url, self.app_name)
    }
}

fn parse_port(field: &'static str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|e| ConfigError::InvalidValue {
        field,
        reason: format!("{value:?}: {e}"),
    })
}
