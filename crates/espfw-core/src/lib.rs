//! # espfw-core
//!
//! Core of the ESP32 camera firmware framework.
//!
//! This crate provides:
//! - Firmware configuration and persisted preferences
//! - MQTT topic layout, app instance ID negotiation and message routing
//! - WiFi/MQTT reconnect supervision with one-shot timers
//! - Camera settings, snapshot spooling and OTA update flow
//! - Clock, display and storage helpers
//! - The [`Framework`](framework::Framework) that drives application hooks
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! making it usable on both Linux (tokio) and ESP32 (esp-idf) targets.
//! Hardware and network stacks are reached through the traits defined here.

pub mod camera;
pub mod camera_app;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod dispatch;
pub mod display;
pub mod framework;
pub mod identity;
pub mod ota;
pub mod prefs;
pub mod snapshot;
pub mod storage;
pub mod system;
pub mod timer;
pub mod topics;
pub mod transport;

pub use camera::{
    CameraError, CameraSettings, FlashLight, Frame, FrameSize, FrameSource, SharedCamera,
};
pub use camera_app::CameraApp;
pub use config::{ConfigError, Features, FirmwareConfig};
pub use framework::{App, AppContext, Control, Event, Framework, Platform};
pub use prefs::{AppPreferences, PreferenceStore, PrefsError};
pub use topics::{AppTopics, TopicKind, TopicPath};
pub use transport::{LastWill, MqttClient, QoS, TransportError};
