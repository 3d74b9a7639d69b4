//! The framework main loop.
//!
//! [`Framework`] owns the preferences, timers and connection state, feeds
//! network events through the [`ConnectionSupervisor`](crate::connectivity::ConnectionSupervisor)
//! and calls the [`App`] hooks. Everything that touches hardware or the
//! network goes through [`Platform`].

use crate::config::FirmwareConfig;
use crate::connectivity::{ConnectionSupervisor, NetAction, NetEvent};
use crate::dispatch::{DispatchError, MessageRouter, Routed};
use crate::identity::InstanceIdNegotiator;
use crate::ota::{check_for_update, FirmwareFetcher, FlashWriter, UpdateOutcome, RESTART_DELAY};
use crate::prefs::{AppPreferences, PreferenceStore, PrefsError, KEY_BOOT_COUNT};
use crate::timer::{TimerKind, TimerQueue};
use crate::topics::{AppTopics, TopicPath};
use crate::transport::{LastWill, MqttClient, QoS, TransportError};
use chrono::{DateTime, FixedOffset};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long the main loop waits for an event before ticking.
pub const LOOP_PERIOD: Duration = Duration::from_millis(10);

/// Errors raised while setting up the framework.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error(transparent)]
    Prefs(#[from] PrefsError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Hardware and network services the framework drives.
pub trait Platform {
    /// Start joining the configured access point. Completion is reported
    /// as [`NetEvent::WifiGotIp`].
    fn connect_wifi(&mut self, config: &FirmwareConfig) -> Result<(), TransportError>;

    /// Start connecting to the broker with `will` registered. Completion is
    /// reported as [`NetEvent::MqttConnected`].
    fn connect_mqtt(&mut self, config: &FirmwareConfig, will: &LastWill)
        -> Result<(), TransportError>;

    /// Configure SNTP and the timezone.
    fn sync_time(&mut self, config: &FirmwareConfig);

    fn mqtt(&mut self) -> &mut dyn MqttClient;

    /// Start the status web server. Called on every WiFi connect.
    fn start_web_server(&mut self) -> Result<(), TransportError>;

    /// Start the RTSP task if it is not running.
    fn start_streaming(&mut self) -> Result<(), TransportError>;

    /// Stop the RTSP task and wait for it to exit.
    fn stop_streaming(&mut self);

    /// HTTP access and the OTA partition writer.
    fn ota(&mut self) -> (&mut dyn FirmwareFetcher, &mut dyn FlashWriter);

    /// Root of the flash filesystem.
    fn fs_root(&self) -> PathBuf;

    fn has_psram(&self) -> bool {
        false
    }

    /// Monotonic time.
    fn now(&self) -> Instant;

    /// Local wall-clock time. Before SNTP sync this is near the epoch.
    fn wall_clock(&self) -> DateTime<FixedOffset>;

    /// Reboot the device after `delay`.
    fn restart(&mut self, delay: Duration) -> !;
}

/// Input to [`Framework::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Net(NetEvent),
    Message { topic: String, payload: Vec<u8> },
}

/// What the main loop should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Restart { delay: Duration },
}

/// Framework state handed to app hooks.
pub struct AppContext<'a> {
    pub config: &'a FirmwareConfig,
    pub topics: &'a AppTopics,
    pub prefs: &'a mut AppPreferences,
    pub store: &'a dyn PreferenceStore,
    pub platform: &'a mut dyn Platform,
    router: &'a mut MessageRouter,
    restart: &'a mut Option<Duration>,
    uptime: Duration,
    wifi_connected: bool,
    mqtt_connected: bool,
}

impl AppContext<'_> {
    pub fn mqtt(&mut self) -> &mut dyn MqttClient {
        self.platform.mqtt()
    }

    pub fn wifi_connected(&self) -> bool {
        self.wifi_connected
    }

    pub fn mqtt_connected(&self) -> bool {
        self.mqtt_connected
    }

    /// Time since [`Framework::new`].
    pub fn uptime(&self) -> Duration {
        self.uptime
    }

    /// Listen to another app's topic. Takes effect on the next MQTT connect.
    pub fn register_foreign(&mut self, topic: &str) -> Result<usize, DispatchError> {
        self.router.register_foreign(topic)
    }

    /// Persist the current preferences.
    pub fn store_prefs(&mut self) -> Result<(), PrefsError> {
        self.prefs.store(self.store)
    }

    /// Ask the main loop to reboot after `delay`.
    pub fn request_restart(&mut self, delay: Duration) {
        *self.restart = Some(delay);
    }
}

/// Application hooks. Every hook has an empty default.
#[allow(unused_variables)]
pub trait App {
    /// Called once at the end of [`Framework::setup`].
    fn setup(&mut self, ctx: &mut AppContext<'_>) {}

    /// Called on every loop step after the timers.
    fn tick(&mut self, ctx: &mut AppContext<'_>) {}

    fn on_wifi_connect(&mut self, ctx: &mut AppContext<'_>) {}

    fn on_wifi_disconnect(&mut self, ctx: &mut AppContext<'_>) {}

    fn on_mqtt_connect(&mut self, ctx: &mut AppContext<'_>) {}

    fn on_mqtt_disconnect(&mut self, ctx: &mut AppContext<'_>) {}

    /// A message under the app topic that is not a command.
    fn on_message(&mut self, ctx: &mut AppContext<'_>, topic: &TopicPath, payload: &str) {}

    /// A command addressed to this instance, e.g. `["flash"]` for
    /// `app/2/flash`.
    fn on_command(&mut self, ctx: &mut AppContext<'_>, command: &[String], payload: &str) {}

    /// A registered foreign topic.
    fn on_foreign(
        &mut self,
        ctx: &mut AppContext<'_>,
        handler: usize,
        topic: &TopicPath,
        doc: &serde_json::Value,
    ) {
    }
}

/// How incoming messages are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// No instance ID yet: only sibling presence is collected.
    Negotiating,
    Normal,
}

/// Drives the platform and the app.
pub struct Framework<P, A> {
    config: FirmwareConfig,
    topics: AppTopics,
    platform: P,
    app: A,
    store: Box<dyn PreferenceStore>,
    prefs: AppPreferences,
    router: MessageRouter,
    supervisor: ConnectionSupervisor,
    timers: TimerQueue,
    negotiator: InstanceIdNegotiator,
    mode: Mode,
    restart: Option<Duration>,
    started: Instant,
}

impl<P: Platform, A: App> Framework<P, A> {
    pub fn new(
        config: FirmwareConfig,
        platform: P,
        store: Box<dyn PreferenceStore>,
        app: A,
    ) -> Self {
        let topics = AppTopics::new(&config.app_name);
        let router = MessageRouter::new(&config.app_name);
        let started = platform.now();
        Self {
            config,
            topics,
            platform,
            app,
            store,
            prefs: AppPreferences::default(),
            router,
            supervisor: ConnectionSupervisor::new(),
            timers: TimerQueue::new(),
            negotiator: InstanceIdNegotiator::new(),
            mode: Mode::Negotiating,
            restart: None,
            started,
        }
    }

    pub fn config(&self) -> &FirmwareConfig {
        &self.config
    }

    pub fn prefs(&self) -> &AppPreferences {
        &self.prefs
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Load preferences, arm the startup timer, join WiFi and run the
    /// app's setup hook.
    pub fn setup(&mut self) -> Result<(), FrameworkError> {
        info!("Starting {}...", self.config.app_name);

        self.prefs = AppPreferences::load(self.store.as_ref())?;
        self.prefs.boot_count = self.prefs.boot_count.saturating_add(1);
        if self.prefs.has_instance_id() {
            if let Err(e) = self.store.set_i32(KEY_BOOT_COUNT, self.prefs.boot_count) {
                warn!("Could not store boot count: {}", e);
            }
        }
        info!("Boot number {}", self.prefs.boot_count);

        let now = self.platform.now();
        if self.prefs.has_instance_id() {
            self.mode = Mode::Normal;
            self.timers.start(TimerKind::CheckFirmwareUpdate, now);
        } else {
            self.mode = Mode::Negotiating;
            self.timers.start(TimerKind::InstanceIdWait, now);
        }

        self.connect_wifi();

        let (app, mut ctx) = self.split();
        app.setup(&mut ctx);
        Ok(())
    }

    /// Process one event.
    pub fn handle(&mut self, event: Event) -> Control {
        match event {
            Event::Net(net) => {
                for action in self.supervisor.handle(net) {
                    self.execute(action);
                }
            }
            Event::Message { topic, payload } => self.dispatch(&topic, &payload),
        }
        self.control()
    }

    /// Fire due timers and run the app's tick hook.
    pub fn tick(&mut self) -> Control {
        let now = self.platform.now();
        for kind in self.timers.poll(now) {
            match kind {
                TimerKind::MqttReconnect => self.connect_mqtt(),
                TimerKind::WifiReconnect => self.connect_wifi(),
                TimerKind::InstanceIdWait => self.claim_instance_id(),
                TimerKind::CheckFirmwareUpdate => self.update_firmware(),
            }
        }

        let (app, mut ctx) = self.split();
        app.tick(&mut ctx);
        self.control()
    }

    /// Run forever, feeding `events` and ticking between them.
    pub fn run(mut self, events: Receiver<Event>) -> ! {
        let mut events = Some(events);
        loop {
            let control = match events.as_ref().map(|rx| rx.recv_timeout(LOOP_PERIOD)) {
                Some(Ok(event)) => self.handle(event),
                Some(Err(RecvTimeoutError::Timeout)) => Control::Continue,
                Some(Err(RecvTimeoutError::Disconnected)) => {
                    error!("Event channel closed");
                    events = None;
                    Control::Continue
                }
                None => {
                    std::thread::sleep(LOOP_PERIOD);
                    Control::Continue
                }
            };
            if let Control::Restart { delay } = control {
                self.platform.restart(delay);
            }
            if let Control::Restart { delay } = self.tick() {
                self.platform.restart(delay);
            }
        }
    }

    fn split(&mut self) -> (&mut A, AppContext<'_>) {
        let uptime = self.platform.now().saturating_duration_since(self.started);
        let ctx = AppContext {
            config: &self.config,
            topics: &self.topics,
            prefs: &mut self.prefs,
            store: self.store.as_ref(),
            platform: &mut self.platform,
            router: &mut self.router,
            restart: &mut self.restart,
            uptime,
            wifi_connected: self.supervisor.wifi_connected(),
            mqtt_connected: self.supervisor.mqtt_connected(),
        };
        (&mut self.app, ctx)
    }

    fn control(&mut self) -> Control {
        match self.restart.take() {
            Some(delay) => Control::Restart { delay },
            None => Control::Continue,
        }
    }

    fn execute(&mut self, action: NetAction) {
        let now = self.platform.now();
        match action {
            NetAction::SyncTime => {
                info!("Connecting to NTP Server...");
                self.platform.sync_time(&self.config);
            }
            NetAction::ConnectMqtt => self.connect_mqtt(),
            NetAction::StartTimer(kind) => self.timers.start(kind, now),
            NetAction::StopTimer(kind) => self.timers.stop(kind),
            NetAction::RunWifiConnectTasks => {
                if self.config.features.web_server {
                    if let Err(e) = self.platform.start_web_server() {
                        error!("Failed to start web server: {}", e);
                    }
                }
                if self.config.features.rtsp && self.config.features.camera {
                    if let Err(e) = self.platform.start_streaming() {
                        error!("Failed to start RTSP task: {}", e);
                    }
                }
                let (app, mut ctx) = self.split();
                app.on_wifi_connect(&mut ctx);
            }
            NetAction::RunWifiDisconnectTasks => {
                let (app, mut ctx) = self.split();
                app.on_wifi_disconnect(&mut ctx);
            }
            NetAction::RunMqttConnectTasks => {
                self.mqtt_connect_tasks();
                let (app, mut ctx) = self.split();
                app.on_mqtt_connect(&mut ctx);
            }
            NetAction::RunMqttDisconnectTasks => {
                let (app, mut ctx) = self.split();
                app.on_mqtt_disconnect(&mut ctx);
            }
        }
    }

    fn connect_wifi(&mut self) {
        info!("Connecting to WiFi {}...", self.config.wifi_ssid);
        if let Err(e) = self.platform.connect_wifi(&self.config) {
            error!("WiFi connect failed: {}", e);
            let now = self.platform.now();
            self.timers.start(TimerKind::WifiReconnect, now);
        }
    }

    fn connect_mqtt(&mut self) {
        info!("Connecting to MQTT Broker {}...", self.config.mqtt_url());
        let will = LastWill::offline(&self.topics.offline, self.prefs.app_instance_id);
        if let Err(e) = self.platform.connect_mqtt(&self.config, &will) {
            error!("MQTT connect failed: {}", e);
            if self.supervisor.wifi_connected() {
                let now = self.platform.now();
                self.timers.start(TimerKind::MqttReconnect, now);
            }
        }
    }

    fn mqtt_connect_tasks(&mut self) {
        let mqtt = self.platform.mqtt();
        match mqtt.subscribe(&self.topics.subscription, QoS::ExactlyOnce) {
            Ok(()) => info!("Subscribing to {} at QoS 2", self.topics.subscription),
            Err(e) => error!("Failed to subscribe to {}: {}", self.topics.subscription, e),
        }
        for topic in self.router.foreign_topics() {
            if let Err(e) = mqtt.subscribe(topic, QoS::AtLeastOnce) {
                error!("Failed to subscribe to {}: {}", topic, e);
            }
        }

        if self.mode == Mode::Normal {
            let payload = crate::identity::presence_payload(self.prefs.app_instance_id);
            match mqtt.publish(&self.topics.online, QoS::AtLeastOnce, false, payload.as_bytes()) {
                Ok(()) => info!("Published {} topic", self.topics.online),
                Err(e) => error!("Failed to publish {}: {}", self.topics.online, e),
            }
        }
    }

    fn dispatch(&mut self, topic: &str, payload: &[u8]) {
        let routed = match self
            .router
            .route(topic, payload, self.prefs.app_instance_id)
        {
            Ok(routed) => routed,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        if self.mode == Mode::Negotiating {
            if let Routed::Presence { .. } = routed {
                self.negotiator.observe(&String::from_utf8_lossy(payload));
            }
            return;
        }

        let (app, mut ctx) = self.split();
        match routed {
            Routed::Presence { online, index } => {
                debug!("Instance {:?} is {}", index, if online { "online" } else { "offline" });
            }
            Routed::Command {
                command, payload, ..
            } => app.on_command(&mut ctx, &command, &payload),
            Routed::App { topic, payload } => app.on_message(&mut ctx, &topic, &payload),
            Routed::Foreign {
                handler,
                topic,
                doc,
            } => app.on_foreign(&mut ctx, handler, &topic, &doc),
            Routed::Ignored => {}
        }
    }

    fn claim_instance_id(&mut self) {
        self.prefs.app_instance_id = self.negotiator.claim();
        if let Err(e) = self.prefs.store(self.store.as_ref()) {
            error!("Could not store appInstanceID: {}", e);
        }
        info!(
            "Got appID {}, restarting...",
            self.prefs.app_instance_id
        );
        self.restart = Some(Duration::ZERO);
    }

    fn update_firmware(&mut self) {
        info!("Checking for firmware updates");
        self.platform.stop_streaming();

        let fs_root = self.platform.fs_root();
        let (fetcher, flash) = self.platform.ota();
        match check_for_update(&self.config, fetcher, flash, &fs_root) {
            Ok(UpdateOutcome::Flashed { bytes }) => {
                info!("Flashed {} bytes", bytes);
                self.restart = Some(RESTART_DELAY);
            }
            Err(e) => {
                warn!("Firmware update failed: {}", e);
                if self.config.features.rtsp
                    && self.config.features.camera
                    && self.supervisor.wifi_connected()
                {
                    if let Err(e) = self.platform.start_streaming() {
                        error!("Failed to restart RTSP task: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::ota::testing::{FakeFetcher, FakeFlash};
    use crate::transport::testing::RecordingMqtt;
    use chrono::TimeZone;

    /// In-memory platform with a hand-driven clock.
    pub struct FakePlatform {
        pub now: Instant,
        pub root: PathBuf,
        pub mqtt: RecordingMqtt,
        pub fetcher: FakeFetcher,
        pub flash: FakeFlash,
        pub psram: bool,
        pub wifi_attempts: usize,
        pub mqtt_attempts: Vec<LastWill>,
        pub time_syncs: usize,
        pub web_started: usize,
        pub streaming: bool,
        pub stream_stops: usize,
    }

    impl FakePlatform {
        pub fn new(root: PathBuf) -> Self {
            Self {
                now: Instant::now(),
                root,
                mqtt: RecordingMqtt::default(),
                fetcher: FakeFetcher::default(),
                flash: FakeFlash::default(),
                psram: false,
                wifi_attempts: 0,
                mqtt_attempts: Vec::new(),
                time_syncs: 0,
                web_started: 0,
                streaming: false,
                stream_stops: 0,
            }
        }

        pub fn advance(&mut self, by: Duration) {
            self.now += by;
        }
    }

    impl Platform for FakePlatform {
        fn connect_wifi(&mut self, _config: &FirmwareConfig) -> Result<(), TransportError> {
            self.wifi_attempts += 1;
            Ok(())
        }

        fn connect_mqtt(
            &mut self,
            _config: &FirmwareConfig,
            will: &LastWill,
        ) -> Result<(), TransportError> {
            self.mqtt_attempts.push(will.clone());
            Ok(())
        }

        fn sync_time(&mut self, _config: &FirmwareConfig) {
            self.time_syncs += 1;
        }

        fn mqtt(&mut self) -> &mut dyn MqttClient {
            &mut self.mqtt
        }

        fn start_web_server(&mut self) -> Result<(), TransportError> {
            self.web_started += 1;
            Ok(())
        }

        fn start_streaming(&mut self) -> Result<(), TransportError> {
            self.streaming = true;
            Ok(())
        }

        fn stop_streaming(&mut self) {
            self.streaming = false;
            self.stream_stops += 1;
        }

        fn ota(&mut self) -> (&mut dyn FirmwareFetcher, &mut dyn FlashWriter) {
            (&mut self.fetcher, &mut self.flash)
        }

        fn fs_root(&self) -> PathBuf {
            self.root.clone()
        }

        fn has_psram(&self) -> bool {
            self.psram
        }

        fn now(&self) -> Instant {
            self.now
        }

        fn wall_clock(&self) -> DateTime<FixedOffset> {
            FixedOffset::east_opt(0)
                .and_then(|tz| tz.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single())
                .unwrap()
        }

        fn restart(&mut self, delay: Duration) -> ! {
            panic!("restart requested after {delay:?}");
        }
    }
}
