//! ESP32 platform services for the espfw framework.
//!
//! This crate provides the hardware side of [`espfw_core::Platform`]:
//! - WiFi station management and disconnect events
//! - NVS-backed preferences
//! - MQTT, HTTP downloads and OTA partition writes
//! - The OV2640 camera and flash LED on the AI-Thinker ESP32-CAM
//! - The status web server and flash filesystem mount
//!
//! # Example
//!
//! ```ignore
//! use espfw_esp32::platform::EspPlatform;
//!
//! let platform = EspPlatform::new(events_tx, config, wifi, sysloop, camera);
//! let mut framework = Framework::new(config, platform, Box::new(prefs), app);
//! framework.setup()?;
//! framework.run(events_rx);
//! ```

pub mod camera;
pub mod http;
pub mod mqtt;
pub mod nvs;
pub mod ota;
pub mod platform;
pub mod system;
pub mod wifi;
