mod devices;
mod mqtt;
mod platform;
mod update;
mod web;

use devices::{DirectoryCamera, LogCanvas, LogFlash};
use espfw_core::prefs::FilePreferences;
use espfw_core::snapshot::SnapshotSpool;
use espfw_core::storage::init_fs;
use espfw_core::{CameraApp, FirmwareConfig, Framework, SharedCamera};
use platform::LinuxPlatform;
use std::path::PathBuf;
use std::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DISPLAY_WIDTH: i32 = 320;
const DISPLAY_HEIGHT: i32 = 240;

fn load_config() -> anyhow::Result<FirmwareConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ESPFW_CONFIG").ok());
    let mut config = match path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            FirmwareConfig::load(&path)?
        }
        None => FirmwareConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,espfw_core=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    tracing::info!("{} {} starting...", config.app_name, config.firmware_version);

    let data_dir = PathBuf::from(std::env::var("ESPFW_DATA").unwrap_or_else(|_| "./espfw-data".into()));
    let fs_root = data_dir.join("flash");
    let sd_root = data_dir.join("sdcard");
    let camera_dir = data_dir.join("camera");
    init_fs(&fs_root)?;
    std::fs::create_dir_all(&sd_root)?;
    std::fs::create_dir_all(&camera_dir)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let (events_tx, events_rx) = mpsc::channel();

    let store = FilePreferences::open(data_dir.join("prefs.json"))?;
    let camera = SharedCamera::new(DirectoryCamera::new(&camera_dir));
    let platform = LinuxPlatform::new(
        runtime.handle().clone(),
        events_tx,
        config.clone(),
        &fs_root,
        camera.clone(),
    );

    let mut app = CameraApp::new(camera, LogFlash::default(), SnapshotSpool::open(&sd_root)?)
        .with_sd_card(&sd_root);
    if config.features.graphics {
        app = app.with_display(Box::new(LogCanvas::new(DISPLAY_WIDTH, DISPLAY_HEIGHT)));
    }

    let mut framework = Framework::new(config, platform, Box::new(store), app);
    framework.setup()?;

    // The framework blocks on its event channel, so it gets its own thread.
    std::thread::Builder::new()
        .name("framework".into())
        .spawn(move || {
            framework.run(events_rx);
        })?;

    runtime.block_on(tokio::signal::ctrl_c())?;
    tracing::info!("Received Ctrl+C, shutting down...");
    Ok(())
}
