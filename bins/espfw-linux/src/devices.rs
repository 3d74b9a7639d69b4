//! Stand-ins for the camera, flash LED and display.

use espfw_core::display::{Align, Canvas, Color};
use espfw_core::{CameraError, CameraSettings, FlashLight, Frame, FrameSize, FrameSource};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Serves the JPEG files of a directory in name order, looping forever.
pub struct DirectoryCamera {
    dir: PathBuf,
    frames: Vec<PathBuf>,
    next: usize,
    frame_size: FrameSize,
}

impl DirectoryCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frames: Vec::new(),
            next: 0,
            frame_size: FrameSize::Svga,
        }
    }

    fn scan(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut frames: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            })
            .collect();
        frames.sort();
        Ok(frames)
    }
}

impl FrameSource for DirectoryCamera {
    fn init(&mut self, settings: &CameraSettings) -> Result<(), CameraError> {
        let frames = Self::scan(&self.dir)
            .map_err(|e| CameraError::InitFailed(format!("{}: {e}", self.dir.display())))?;
        if frames.is_empty() {
            return Err(CameraError::InitFailed(format!(
                "no JPEG frames in {}",
                self.dir.display()
            )));
        }
        info!("Camera serving {} frames from {}", frames.len(), self.dir.display());
        self.frames = frames;
        self.next = 0;
        self.frame_size = settings.frame_size;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        !self.frames.is_empty()
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        if self.frames.is_empty() {
            return Err(CameraError::NotInitialized);
        }
        let path = &self.frames[self.next % self.frames.len()];
        self.next = (self.next + 1) % self.frames.len();
        let data = fs::read(path)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", path.display())))?;
        let (width, height) = self.frame_size.dimensions();
        Ok(Frame {
            data,
            width,
            height,
        })
    }
}

/// Logs flash LED changes.
#[derive(Debug, Default)]
pub struct LogFlash {
    on: bool,
}

impl FlashLight for LogFlash {
    fn set(&mut self, on: bool) {
        if self.on != on {
            debug!("Flash {}", if on { "on" } else { "off" });
        }
        self.on = on;
    }
}

/// A display that logs what would be drawn.
#[derive(Debug)]
pub struct LogCanvas {
    width: i32,
    height: i32,
    font_size: u16,
}

impl LogCanvas {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            font_size: 0,
        }
    }
}

impl Canvas for LogCanvas {
    fn width(&self) -> i32 {
        self.width
    }

    fn height(&self) -> i32 {
        self.height
    }

    fn fill_screen(&mut self, color: Color) {
        debug!("[display] fill 0x{:04x}", color);
    }

    fn set_font_size(&mut self, size: u16) {
        self.font_size = size;
    }

    fn set_font_color(&mut self, _color: Color, _background: Option<Color>) {}

    fn set_alignment(&mut self, _align: Align) {}

    fn draw_text(&mut self, text: &str, x: i32, y: i32) {
        info!("[display] ({}, {}) size {}: {}", x, y, self.font_size, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_camera_rotates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.jpg"), b"second").unwrap();
        fs::write(dir.path().join("a.JPG"), b"first").unwrap();
        fs::write(dir.path().join("notes.txt"), b"skip").unwrap();

        let mut camera = DirectoryCamera::new(dir.path());
        assert!(!camera.is_ready());
        assert!(matches!(camera.capture(), Err(CameraError::NotInitialized)));

        camera.init(&CameraSettings::default()).unwrap();
        assert!(camera.is_ready());
        assert_eq!(camera.capture().unwrap().data, b"first");
        assert_eq!(camera.capture().unwrap().data, b"second");
        let frame = camera.capture().unwrap();
        assert_eq!(frame.data, b"first");
        assert_eq!((frame.width, frame.height), (800, 600));
    }

    #[test]
    fn test_directory_camera_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut camera = DirectoryCamera::new(dir.path());
        assert!(matches!(
            camera.init(&CameraSettings::default()),
            Err(CameraError::InitFailed(_))
        ));
    }
}
