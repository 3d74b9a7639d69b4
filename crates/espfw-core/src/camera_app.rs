//! The default application: snapshots on connect plus an optional clock.

use crate::camera::{CameraSettings, FlashLight, FrameSize, FrameSource};
use crate::clock::{is_good_time, log_timestamp, ClockFace};
use crate::display::{Canvas, SplashScreen, TextRenderer};
use crate::framework::{App, AppContext};
use crate::snapshot::{SnapshotError, SnapshotSpool};
use crate::storage::mount_report;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const TIMESTAMP_PERIOD: Duration = Duration::from_secs(10);
const CLOCK_PERIOD: Duration = Duration::from_secs(1);

/// Captures a snapshot at boot and on every MQTT connect, and publishes
/// whatever is spooled.
pub struct CameraApp<C, F> {
    camera: C,
    flash: F,
    spool: SnapshotSpool,
    frame_size: FrameSize,
    jpeg_quality: u8,
    sd_root: Option<PathBuf>,
    screen: Option<TextRenderer<Box<dyn Canvas>>>,
    clock: ClockFace,
    good_time: bool,
    first_draw: bool,
    last_timestamp: Option<Instant>,
    last_clock_check: Option<Instant>,
}

impl<C: FrameSource, F: FlashLight> CameraApp<C, F> {
    pub fn new(camera: C, flash: F, spool: SnapshotSpool) -> Self {
        Self {
            camera,
            flash,
            spool,
            frame_size: FrameSize::Svga,
            jpeg_quality: 10,
            sd_root: None,
            screen: None,
            clock: ClockFace::new(),
            good_time: false,
            first_draw: true,
            last_timestamp: None,
            last_clock_check: None,
        }
    }

    /// Requested sensor size and JPEG quality.
    pub fn with_resolution(mut self, frame_size: FrameSize, jpeg_quality: u8) -> Self {
        self.frame_size = frame_size;
        self.jpeg_quality = jpeg_quality;
        self
    }

    /// Report the SD card mounted at `root` during setup.
    pub fn with_sd_card(mut self, root: impl Into<PathBuf>) -> Self {
        self.sd_root = Some(root.into());
        self
    }

    /// Draw the splash screen and clock on `canvas`.
    pub fn with_display(mut self, canvas: Box<dyn Canvas>) -> Self {
        self.screen = Some(TextRenderer::new(canvas));
        self
    }

    pub fn spool(&self) -> &SnapshotSpool {
        &self.spool
    }

    pub fn good_time(&self) -> bool {
        self.good_time
    }

    fn capture_and_send(&mut self, ctx: &mut AppContext<'_>) {
        let topic = ctx.topics.snapshot.clone();
        match self
            .spool
            .capture_and_send(&mut self.camera, &mut self.flash, ctx.mqtt(), &topic)
        {
            Ok(_) | Err(SnapshotError::CameraNotReady) => {}
            Err(e) => error!("Snapshot failed: {}", e),
        }
    }

    fn send_all(&mut self, ctx: &mut AppContext<'_>) {
        let topic = ctx.topics.snapshot.clone();
        if let Err(e) = self.spool.send_all(ctx.mqtt(), &topic) {
            error!("Sending images failed: {}", e);
        }
    }

    fn due(last: &mut Option<Instant>, now: Instant, period: Duration) -> bool {
        match last {
            Some(at) if now.saturating_duration_since(*at) < period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl<C: FrameSource, F: FlashLight> App for CameraApp<C, F> {
    fn setup(&mut self, ctx: &mut AppContext<'_>) {
        info!("Configuring hardware.");
        self.flash.set(false);

        if !ctx.config.features.graphics {
            self.screen = None;
        }
        if let Some(screen) = self.screen.as_mut() {
            SplashScreen {
                app_name: &ctx.config.app_name,
                friendly_name: &ctx.prefs.friendly_name,
                instance_id: ctx.prefs.app_instance_id,
            }
            .draw(screen);
        }

        if ctx.config.features.sd_card {
            if let Some(root) = &self.sd_root {
                if let Err(e) = mount_report(root) {
                    error!("Failed to open SD card directory: {}", e);
                }
            }
        }

        if ctx.config.features.camera {
            let settings = CameraSettings::select(
                self.frame_size,
                self.jpeg_quality,
                ctx.platform.has_psram(),
            );
            match self.camera.init(&settings) {
                Ok(()) => info!("Camera initialized successfully."),
                Err(e) => error!("Camera init failed: {}", e),
            }
            self.capture_and_send(ctx);
        }
    }

    fn on_mqtt_connect(&mut self, ctx: &mut AppContext<'_>) {
        if !ctx.config.features.camera {
            return;
        }
        self.send_all(ctx);
        self.capture_and_send(ctx);
    }

    fn on_command(&mut self, ctx: &mut AppContext<'_>, command: &[String], payload: &str) {
        match command.first().map(String::as_str) {
            Some("snapshot") => self.capture_and_send(ctx),
            Some("flash") => self.flash.set(payload.trim().eq_ignore_ascii_case("on")),
            Some("name") => {
                ctx.prefs.set_friendly_name(payload.trim());
                if let Err(e) = ctx.store_prefs() {
                    error!("Could not store friendly name: {}", e);
                }
            }
            Some("restart") => ctx.request_restart(Duration::ZERO),
            other => warn!("Unknown command {:?}", other),
        }
    }

    fn tick(&mut self, ctx: &mut AppContext<'_>) {
        let now = ctx.platform.now();

        if Self::due(&mut self.last_timestamp, now, TIMESTAMP_PERIOD) {
            let wall = ctx.platform.wall_clock();
            info!("Time: {}", log_timestamp(&wall, ctx.uptime()));
        }

        if !Self::due(&mut self.last_clock_check, now, CLOCK_PERIOD) {
            return;
        }
        let wall = ctx.platform.wall_clock();
        if !self.good_time {
            self.good_time = is_good_time(&wall);
            if !self.good_time {
                info!("Time not set yet.");
            }
        }

        if let Some(screen) = self.screen.as_mut() {
            let changed = self.clock.update(&wall);
            if self.first_draw || changed {
                self.first_draw = false;
                screen.draw_time(self.clock.text());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::{FakeCamera, RecordingFlash};
    use crate::config::FirmwareConfig;
    use crate::connectivity::NetEvent;
    use crate::display::testing::RecordingCanvas;
    use crate::framework::testing::FakePlatform;
    use crate::framework::{Control, Event, Framework};
    use crate::prefs::{MemoryPreferences, PreferenceStore, KEY_FRIENDLY_NAME, KEY_INSTANCE_ID};
    use crate::transport::QoS;

    type TestApp = CameraApp<FakeCamera, RecordingFlash>;

    fn framework(root: &std::path::Path) -> Framework<FakePlatform, TestApp> {
        let store = MemoryPreferences::new();
        store.set_i32(KEY_INSTANCE_ID, 1).unwrap();
        let spool = SnapshotSpool::open(root).unwrap();
        let app = CameraApp::new(FakeCamera::default(), RecordingFlash::default(), spool);
        let config = FirmwareConfig {
            app_name: "cam".into(),
            ..Default::default()
        };
        Framework::new(
            config,
            FakePlatform::new(root.to_path_buf()),
            Box::new(store),
            app,
        )
    }

    fn connect(fw: &mut Framework<FakePlatform, TestApp>) {
        fw.handle(Event::Net(NetEvent::WifiGotIp("10.0.0.9".into())));
        fw.platform_mut().mqtt.connected = true;
        fw.handle(Event::Net(NetEvent::MqttConnected));
    }

    fn snapshots(fw: &Framework<FakePlatform, TestApp>) -> usize {
        fw.platform()
            .mqtt
            .published
            .iter()
            .filter(|p| p.0 == "cam/snapshot" && p.1 == QoS::AtLeastOnce)
            .count()
    }

    #[test]
    fn test_setup_initializes_camera_and_spools() {
        let dir = tempfile::tempdir().unwrap();
        let mut fw = framework(dir.path());
        fw.setup().unwrap();

        // Offline at boot, so the first image stays in the spool.
        assert_eq!(fw.app().spool().pending().unwrap().len(), 1);
        assert_eq!(snapshots(&fw), 0);
    }

    #[test]
    fn test_connect_sends_pending_and_new() {
        let dir = tempfile::tempdir().unwrap();
        let mut fw = framework(dir.path());
        fw.setup().unwrap();
        connect(&mut fw);

        assert_eq!(snapshots(&fw), 2);
        assert!(fw.app().spool().pending().unwrap().is_empty());
    }

    #[test]
    fn test_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut fw = framework(dir.path());
        fw.setup().unwrap();
        connect(&mut fw);

        fw.handle(Event::Message {
            topic: "cam/1/snapshot".into(),
            payload: Vec::new(),
        });
        assert_eq!(snapshots(&fw), 3);

        fw.handle(Event::Message {
            topic: "cam/1/name".into(),
            payload: b"porch".to_vec(),
        });
        assert_eq!(fw.prefs().friendly_name, "porch");

        assert_eq!(
            fw.handle(Event::Message {
                topic: "cam/1/restart".into(),
                payload: Vec::new(),
            }),
            Control::Restart {
                delay: Duration::ZERO
            }
        );
    }

    #[test]
    fn test_tick_tracks_good_time_and_draws() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryPreferences::new();
        store.set_i32(KEY_INSTANCE_ID, 1).unwrap();
        store.set_string(KEY_FRIENDLY_NAME, "porch").unwrap();
        let app = CameraApp::new(
            FakeCamera::default(),
            RecordingFlash::default(),
            SnapshotSpool::open(dir.path()).unwrap(),
        )
        .with_display(Box::new(RecordingCanvas::new(240, 320)));
        let mut config = FirmwareConfig::default();
        config.features.graphics = true;
        let mut fw = Framework::new(
            config,
            FakePlatform::new(dir.path().to_path_buf()),
            Box::new(store),
            app,
        );
        fw.setup().unwrap();

        assert!(!fw.app().good_time());
        fw.tick();
        assert!(fw.app().good_time());
    }
}
