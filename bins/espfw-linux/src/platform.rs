//! The framework's platform services on a Linux host.

use crate::devices::DirectoryCamera;
use crate::mqtt::RumqttClient;
use crate::update::{FileFlash, HttpFetcher};
use crate::web::{self, WebState};
use chrono::{DateTime, FixedOffset, Local};
use espfw_core::connectivity::NetEvent;
use espfw_core::ota::{FirmwareFetcher, FlashWriter};
use espfw_core::{Event, FirmwareConfig, LastWill, MqttClient, Platform, SharedCamera, TransportError};
use espfw_rtsp::{stream_url, RtspHandle, RtspServer, DEFAULT_FRAME_PERIOD};
use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Exit status asking the supervisor to start the process again.
pub const RESTART_EXIT_CODE: i32 = 3;

pub struct LinuxPlatform {
    runtime: Handle,
    events: Sender<Event>,
    config: FirmwareConfig,
    fs_root: PathBuf,
    camera: SharedCamera<DirectoryCamera>,
    mqtt: RumqttClient,
    fetcher: HttpFetcher,
    flash: FileFlash,
    ip: Option<String>,
    started: Instant,
    web: Option<JoinHandle<()>>,
    rtsp: Option<RtspHandle>,
}

impl LinuxPlatform {
    pub fn new(
        runtime: Handle,
        events: Sender<Event>,
        config: FirmwareConfig,
        fs_root: &Path,
        camera: SharedCamera<DirectoryCamera>,
    ) -> Self {
        Self {
            mqtt: RumqttClient::new(runtime.clone(), events.clone()),
            fetcher: HttpFetcher::new(runtime.clone()),
            flash: FileFlash::new(fs_root),
            runtime,
            events,
            config,
            fs_root: fs_root.to_path_buf(),
            camera,
            ip: None,
            started: Instant::now(),
            web: None,
            rtsp: None,
        }
    }

    fn host(&self) -> &str {
        self.ip.as_deref().unwrap_or("127.0.0.1")
    }

    /// Where clients find the stream when streaming is enabled.
    fn stream_url(&self) -> Option<String> {
        let features = &self.config.features;
        (features.rtsp && features.camera).then(|| stream_url(self.host(), self.config.rtsp_port))
    }

    /// Address of the interface that routes to the broker.
    fn local_ip(config: &FirmwareConfig) -> String {
        UdpSocket::bind("0.0.0.0:0")
            .and_then(|socket| {
                socket.connect((config.mqtt_host.as_str(), config.mqtt_port))?;
                socket.local_addr()
            })
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| "127.0.0.1".to_string())
    }

    fn notify(&self, event: NetEvent) -> Result<(), TransportError> {
        self.events
            .send(Event::Net(event))
            .map_err(|_| TransportError::Wifi("event channel closed".into()))
    }
}

impl Platform for LinuxPlatform {
    fn connect_wifi(&mut self, config: &FirmwareConfig) -> Result<(), TransportError> {
        info!("Using host network in place of WiFi {}", config.wifi_ssid);
        let ip = Self::local_ip(config);
        self.ip = Some(ip.clone());
        self.notify(NetEvent::StationStart)?;
        self.notify(NetEvent::StationConnected)?;
        self.notify(NetEvent::WifiGotIp(ip))
    }

    fn connect_mqtt(
        &mut self,
        config: &FirmwareConfig,
        will: &LastWill,
    ) -> Result<(), TransportError> {
        info!("Connecting to MQTT at {}", config.mqtt_url());
        self.mqtt.connect(config, will);
        Ok(())
    }

    fn sync_time(&mut self, config: &FirmwareConfig) {
        info!(
            "Using the system clock in place of SNTP ({})",
            config.ntp_server
        );
    }

    fn mqtt(&mut self) -> &mut dyn MqttClient {
        &mut self.mqtt
    }

    fn start_web_server(&mut self) -> Result<(), TransportError> {
        if self.web.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.web_port));
        let state = Arc::new(WebState {
            config: self.config.clone(),
            camera: self.camera.clone(),
            started: self.started,
            stream_url: self.stream_url(),
        });
        self.web = Some(self.runtime.spawn(async move {
            if let Err(e) = web::serve(addr, state).await {
                error!("HTTP server error: {}", e);
            }
        }));
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<(), TransportError> {
        if self.rtsp.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        let handle = RtspServer::spawn(
            self.config.rtsp_port,
            self.camera.clone(),
            DEFAULT_FRAME_PERIOD,
        )
        .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))?;
        self.rtsp = Some(handle);
        if let Some(url) = self.stream_url() {
            info!("Stream Link: {}", url);
        }
        Ok(())
    }

    fn stop_streaming(&mut self) {
        if let Some(handle) = self.rtsp.take() {
            handle.stop();
            if let Err(e) = handle.join() {
                warn!("RTSP task ended badly: {}", e);
            }
        }
    }

    fn ota(&mut self) -> (&mut dyn FirmwareFetcher, &mut dyn FlashWriter) {
        (&mut self.fetcher, &mut self.flash)
    }

    fn fs_root(&self) -> PathBuf {
        self.fs_root.clone()
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }

    fn restart(&mut self, delay: Duration) -> ! {
        std::thread::sleep(delay);
        self.stop_streaming();
        if let Some(web) = self.web.take() {
            web.abort();
        }
        info!("Restarting...");
        std::process::exit(RESTART_EXIT_CODE)
    }
}
