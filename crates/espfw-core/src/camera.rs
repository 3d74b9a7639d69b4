//! Camera settings and frame capture.
//!
//! The sensor driver lives behind [`FrameSource`]. Snapshots and the RTSP
//! task share one camera through [`SharedCamera`].

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Errors that can occur during camera operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("Camera not initialized")]
    NotInitialized,
    #[error("Camera init failed: {0}")]
    InitFailed(String),
    #[error("Camera capture failed: {0}")]
    CaptureFailed(String),
}

/// Sensor output sizes, in the order the driver numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FrameSize {
    Qvga,
    Cif,
    Vga,
    Svga,
    Xga,
    Sxga,
    Uxga,
}

impl FrameSize {
    /// Width and height in pixels.
    pub fn dimensions(&self) -> (u16, u16) {
        match self {
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }
}

/// Highest JPEG quality setting the sensor accepts. Lower is better.
pub const MAX_JPEG_QUALITY: u8 = 63;

/// Sensor configuration chosen at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub frame_size: FrameSize,
    pub jpeg_quality: u8,
    pub fb_count: u8,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self::select(FrameSize::Svga, 10, true)
    }
}

impl CameraSettings {
    /// Pick settings for the available memory.
    ///
    /// Without PSRAM only one frame buffer fits, so large sizes are clamped
    /// to SVGA and the quality is lowered.
    pub fn select(requested: FrameSize, quality: u8, psram: bool) -> Self {
        if psram {
            info!("Configuring CAM to use PSRAM");
            Self {
                frame_size: requested,
                jpeg_quality: quality.min(MAX_JPEG_QUALITY),
                fb_count: 2,
            }
        } else {
            warn!("PSRAM NOT FOUND. Configuring CAM normally.");
            Self {
                frame_size: requested.min(FrameSize::Svga),
                jpeg_quality: 12,
                fb_count: 1,
            }
        }
    }
}

/// A captured JPEG frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u16,
    pub height: u16,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A camera that produces JPEG frames.
pub trait FrameSource: Send {
    /// Configure the sensor. Sources without configuration succeed.
    fn init(&mut self, settings: &CameraSettings) -> Result<(), CameraError> {
        let _ = settings;
        Ok(())
    }

    /// Whether `capture` can be called.
    fn is_ready(&self) -> bool;

    fn capture(&mut self) -> Result<Frame, CameraError>;
}

/// A camera shared between the snapshot path and the RTSP task.
pub struct SharedCamera<C> {
    inner: Arc<Mutex<C>>,
}

impl<C> Clone for SharedCamera<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: FrameSource> SharedCamera<C> {
    pub fn new(camera: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(camera)),
        }
    }
}

impl<C: FrameSource> FrameSource for SharedCamera<C> {
    fn init(&mut self, settings: &CameraSettings) -> Result<(), CameraError> {
        match self.inner.lock() {
            Ok(mut camera) => camera.init(settings),
            Err(_) => Err(CameraError::InitFailed("camera lock poisoned".into())),
        }
    }

    fn is_ready(&self) -> bool {
        self.inner.lock().map(|c| c.is_ready()).unwrap_or(false)
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        match self.inner.lock() {
            Ok(mut camera) => camera.capture(),
            Err(_) => Err(CameraError::CaptureFailed("camera lock poisoned".into())),
        }
    }
}

/// The flash LED next to the sensor.
pub trait FlashLight: Send {
    fn set(&mut self, on: bool);
}

/// Boards without a flash LED.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFlash;

impl FlashLight for NoFlash {
    fn set(&mut self, _on: bool) {}
}
