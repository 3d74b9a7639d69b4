//! Snapshot spooling.
//!
//! Captured images are written to `images/` under the flash filesystem and
//! stay there until they have been published over MQTT.

use crate::camera::{CameraError, FlashLight, FrameSource};
use crate::transport::{MqttClient, QoS, TransportError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Errors raised while capturing or sending snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Camera Not Ready. Can't capture image!!!")]
    CameraNotReady,
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Publish failed: {0}")]
    Publish(#[from] TransportError),
}

const IMAGE_DIR: &str = "images";

/// Directory of images waiting to be published.
#[derive(Debug)]
pub struct SnapshotSpool {
    dir: PathBuf,
    capture_failed: bool,
}

impl SnapshotSpool {
    /// Open the spool under `root`, creating `images/` if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let dir = root.as_ref().join(IMAGE_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            capture_failed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Set when the last capture attempt got no frame from the sensor.
    pub fn capture_failed(&self) -> bool {
        self.capture_failed
    }

    /// Capture one frame with the flash on and write it to a free file.
    ///
    /// Returns the number of bytes written.
    pub fn capture_to_file<C, F>(
        &mut self,
        camera: &mut C,
        flash: &mut F,
    ) -> Result<usize, SnapshotError>
    where
        C: FrameSource + ?Sized,
        F: FlashLight + ?Sized,
    {
        if !camera.is_ready() {
            warn!("Camera Not Ready. Can't capture image!!!");
            return Err(SnapshotError::CameraNotReady);
        }

        info!("Capturing image to file");
        flash.set(true);
        let frame = match camera.capture() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Camera capture failed: {}", e);
                self.capture_failed = true;
                flash.set(false);
                return Err(e.into());
            }
        };
        self.capture_failed = false;

        let path = self.free_name();
        info!("Picture file name: {}", path.display());
        let written = fs::write(&path, &frame.data);
        flash.set(false);
        written?;

        info!("{} {} bytes", path.display(), frame.len());
        Ok(frame.len())
    }

    /// Images waiting to be sent, oldest name first.
    pub fn pending(&self) -> Result<Vec<PathBuf>, SnapshotError> {
        let mut images: Vec<(Option<u32>, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(index) = parse_image_name(name) {
                images.push((index, path));
            }
        }
        images.sort();
        Ok(images.into_iter().map(|(_, path)| path).collect())
    }

    /// Publish every pending image and delete it once sent.
    ///
    /// Returns the number of images sent. Stops at the first failed publish
    /// and leaves the remaining files in place.
    pub fn send_all<M: MqttClient + ?Sized>(
        &self,
        mqtt: &mut M,
        topic: &str,
    ) -> Result<usize, SnapshotError> {
        let mut count = 0;
        for path in self.pending()? {
            let data = fs::read(&path)?;
            mqtt.publish(topic, QoS::AtLeastOnce, false, &data)?;
            fs::remove_file(&path)?;
            count += 1;
        }
        info!("Sending {} images.", count);
        Ok(count)
    }

    /// Capture a snapshot and, when MQTT is up, send everything pending.
    pub fn capture_and_send<C, F, M>(
        &mut self,
        camera: &mut C,
        flash: &mut F,
        mqtt: &mut M,
        topic: &str,
    ) -> Result<usize, SnapshotError>
    where
        C: FrameSource + ?Sized,
        F: FlashLight + ?Sized,
        M: MqttClient + ?Sized,
    {
        self.capture_to_file(camera, flash)?;
        if mqtt.is_connected() {
            self.send_all(mqtt, topic)
        } else {
            Ok(0)
        }
    }

    fn free_name(&self) -> PathBuf {
        let first = self.dir.join("temp.jpg");
        if !first.exists() {
            return first;
        }
        let mut n = 0u32;
        loop {
            let path = self.dir.join(format!("temp{n}.jpg"));
            if !path.exists() {
                return path;
            }
            n += 1;
        }
    }
}

/// `temp.jpg` sorts before `temp0.jpg`, `temp1.jpg`, ...
fn parse_image_name(name: &str) -> Option<Option<u32>> {
    let stem = name.strip_prefix("temp")?.strip_suffix(".jpg")?;
    if stem.is_empty() {
        Some(None)
    } else {
        stem.parse().ok().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::{FakeCamera, RecordingFlash};
    use crate::transport::testing::RecordingMqtt;

    fn ready_camera() -> FakeCamera {
        FakeCamera {
            ready: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_camera_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = SnapshotSpool::open(dir.path()).unwrap();
        let mut flash = RecordingFlash::default();

        let result = spool.capture_to_file(&mut FakeCamera::default(), &mut flash);
        assert!(matches!(result, Err(SnapshotError::CameraNotReady)));
        assert!(flash.history.is_empty());
    }

    #[test]
    fn test_capture_names_and_flash() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = SnapshotSpool::open(dir.path()).unwrap();
        let mut camera = ready_camera();
        let mut flash = RecordingFlash::default();

        assert_eq!(spool.capture_to_file(&mut camera, &mut flash).unwrap(), 5);
        spool.capture_to_file(&mut camera, &mut flash).unwrap();
        spool.capture_to_file(&mut camera, &mut flash).unwrap();

        assert_eq!(flash.history, vec![true, false, true, false, true, false]);
        let names: Vec<String> = spool
            .pending()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["temp.jpg", "temp0.jpg", "temp1.jpg"]);
    }

    #[test]
    fn test_capture_failure_sets_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = SnapshotSpool::open(dir.path()).unwrap();
        let mut camera = FakeCamera {
            ready: true,
            fail: true,
            ..Default::default()
        };
        let mut flash = RecordingFlash::default();

        assert!(matches!(
            spool.capture_to_file(&mut camera, &mut flash),
            Err(SnapshotError::Camera(_))
        ));
        assert!(spool.capture_failed());
        assert_eq!(flash.history, vec![true, false]);
        assert!(spool.pending().unwrap().is_empty());
    }

    #[test]
    fn test_send_all_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = SnapshotSpool::open(dir.path()).unwrap();
        let mut camera = ready_camera();
        let mut flash = RecordingFlash::default();
        for _ in 0..3 {
            spool.capture_to_file(&mut camera, &mut flash).unwrap();
        }

        let mut mqtt = RecordingMqtt::connected();
        assert_eq!(spool.send_all(&mut mqtt, "cam/snapshot").unwrap(), 3);
        let order: Vec<u8> = mqtt.published.iter().map(|p| p.3[2]).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(mqtt
            .published
            .iter()
            .all(|p| p.0 == "cam/snapshot" && p.1 == QoS::AtLeastOnce && !p.2));
        assert!(spool.pending().unwrap().is_empty());
    }

    #[test]
    fn test_send_failure_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = SnapshotSpool::open(dir.path()).unwrap();
        spool
            .capture_to_file(&mut ready_camera(), &mut RecordingFlash::default())
            .unwrap();

        let mut mqtt = RecordingMqtt::connected();
        mqtt.fail_publish = true;
        assert!(matches!(
            spool.send_all(&mut mqtt, "cam/snapshot"),
            Err(SnapshotError::Publish(_))
        ));
        assert_eq!(spool.pending().unwrap().len(), 1);
    }

    #[test]
    fn test_capture_and_send_offline() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = SnapshotSpool::open(dir.path()).unwrap();
        let mut camera = ready_camera();
        let mut flash = RecordingFlash::default();

        let mut offline = RecordingMqtt::default();
        assert_eq!(
            spool
                .capture_and_send(&mut camera, &mut flash, &mut offline, "cam/snapshot")
                .unwrap(),
            0
        );
        let mut online = RecordingMqtt::connected();
        assert_eq!(
            spool
                .capture_and_send(&mut camera, &mut flash, &mut online, "cam/snapshot")
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SnapshotSpool::open(dir.path()).unwrap();
        fs::write(spool.dir().join("notes.txt"), b"x").unwrap();
        fs::write(spool.dir().join("tempx.jpg"), b"x").unwrap();
        assert!(spool.pending().unwrap().is_empty());
    }
}
