//! The framework's platform services on ESP-IDF.

use crate::camera::EspCamera;
use crate::http;
use crate::mqtt::EspMqtt;
use crate::ota::{EspFlash, EspHttpFetcher};
use crate::system::{self, FS_ROOT};
use crate::wifi::{connect_wifi, watch_disconnects};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use espfw_core::connectivity::NetEvent;
use espfw_core::ota::{FirmwareFetcher, FlashWriter};
use espfw_core::{Event, FirmwareConfig, LastWill, MqttClient, Platform, SharedCamera, TransportError};
use espfw_rtsp::{stream_url, RtspHandle, RtspServer, DEFAULT_FRAME_PERIOD};
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::http::server::EspHttpServer;
use esp_idf_svc::sntp::{EspSntp, SntpConf};
use esp_idf_svc::sys;
use esp_idf_svc::wifi::EspWifi;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

/// pthread stacks default to a few KiB on ESP-IDF.
const RTSP_STACK: usize = 32 * 1024;

pub struct EspPlatform {
    events: Sender<Event>,
    config: FirmwareConfig,
    wifi: EspWifi<'static>,
    sysloop: EspSystemEventLoop,
    wifi_events: Option<EspSubscription<'static, System>>,
    sntp: Option<EspSntp<'static>>,
    camera: SharedCamera<EspCamera>,
    mqtt: EspMqtt,
    fetcher: EspHttpFetcher,
    flash: EspFlash,
    ip: Option<String>,
    started: Instant,
    http: Option<EspHttpServer<'static>>,
    rtsp: Option<RtspHandle>,
}

impl EspPlatform {
    pub fn new(
        events: Sender<Event>,
        config: FirmwareConfig,
        wifi: EspWifi<'static>,
        sysloop: EspSystemEventLoop,
        camera: SharedCamera<EspCamera>,
    ) -> Self {
        Self {
            mqtt: EspMqtt::new(events.clone()),
            fetcher: EspHttpFetcher,
            flash: EspFlash::new(),
            events,
            config,
            wifi,
            sysloop,
            wifi_events: None,
            sntp: None,
            camera,
            ip: None,
            started: Instant::now(),
            http: None,
            rtsp: None,
        }
    }

    fn stream_url(&self) -> Option<String> {
        let features = &self.config.features;
        let host = self.ip.as_deref()?;
        (features.rtsp && features.camera).then(|| stream_url(host, self.config.rtsp_port))
    }

    fn notify(&self, event: NetEvent) -> Result<(), TransportError> {
        self.events
            .send(Event::Net(event))
            .map_err(|_| TransportError::Wifi("event channel closed".into()))
    }
}

/// UTC offset of the local timezone at `utc_secs`.
fn local_offset(utc_secs: sys::time_t) -> Option<FixedOffset> {
    // SAFETY: `tm` is plain data filled in by newlib.
    let mut tm: sys::tm = unsafe { std::mem::zeroed() };
    if unsafe { sys::localtime_r(&utc_secs, &mut tm) }.is_null() {
        return None;
    }
    let local = NaiveDate::from_ymd_opt(tm.tm_year + 1900, (tm.tm_mon + 1) as u32, tm.tm_mday as u32)?
        .and_hms_opt(tm.tm_hour as u32, tm.tm_min as u32, tm.tm_sec as u32)?;
    let utc = DateTime::from_timestamp(utc_secs as i64, 0)?.naive_utc();
    FixedOffset::east_opt((local - utc).num_seconds() as i32)
}

impl Platform for EspPlatform {
    fn connect_wifi(&mut self, config: &FirmwareConfig) -> Result<(), TransportError> {
        if self.wifi_events.is_none() {
            let subscription = watch_disconnects(&self.sysloop, self.events.clone())
                .map_err(|e| TransportError::Wifi(e.to_string()))?;
            self.wifi_events = Some(subscription);
        }
        self.notify(NetEvent::StationStart)?;
        let ip = connect_wifi(
            &mut self.wifi,
            self.sysloop.clone(),
            &config.wifi_ssid,
            &config.wifi_password,
        )
        .map_err(|e| TransportError::Wifi(e.to_string()))?;
        self.ip = Some(ip.clone());
        self.notify(NetEvent::StationConnected)?;
        self.notify(NetEvent::WifiGotIp(ip))
    }

    fn connect_mqtt(
        &mut self,
        config: &FirmwareConfig,
        will: &LastWill,
    ) -> Result<(), TransportError> {
        self.mqtt.connect(config, will)
    }

    fn sync_time(&mut self, config: &FirmwareConfig) {
        std::env::set_var("TZ", &config.timezone);
        // SAFETY: re-reads TZ into newlib's timezone state.
        unsafe { sys::tzset() };

        let mut conf = SntpConf::default();
        conf.servers[0] = &config.ntp_server;
        // Dropping the old client stops it before the new one starts.
        self.sntp = None;
        match EspSntp::new(&conf) {
            Ok(sntp) => {
                info!("SNTP started with {}", config.ntp_server);
                self.sntp = Some(sntp);
            }
            Err(e) => error!("SNTP start failed: {}", e),
        }
    }

    fn mqtt(&mut self) -> &mut dyn MqttClient {
        &mut self.mqtt
    }

    fn start_web_server(&mut self) -> Result<(), TransportError> {
        if self.http.is_some() {
            return Ok(());
        }
        let server = http::start(
            self.config.web_port,
            self.config.clone(),
            self.camera.clone(),
            self.started,
            self.stream_url(),
        )
        .map_err(|e| TransportError::Http(e.to_string()))?;
        self.http = Some(server);
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<(), TransportError> {
        if self.rtsp.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        let handle = RtspServer::spawn_with_stack(
            self.config.rtsp_port,
            self.camera.clone(),
            DEFAULT_FRAME_PERIOD,
            Some(RTSP_STACK),
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
        PathBuf::from(FS_ROOT)
    }

    fn has_psram(&self) -> bool {
        system::has_psram()
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<FixedOffset> {
        let now = Utc::now();
        let offset = local_offset(now.timestamp() as sys::time_t)
            .unwrap_or_else(|| Utc.fix());
        now.with_timezone(&offset)
    }

    fn restart(&mut self, delay: Duration) -> ! {
        std::thread::sleep(delay);
        self.stop_streaming();
        info!("Restarting...");
        esp_idf_hal::reset::restart()
    }
}
