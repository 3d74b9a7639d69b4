//! MQTT over rumqttc.
//!
//! The rumqttc event loop runs on the tokio runtime and forwards connection
//! changes and publishes to the framework thread over its event channel.

use espfw_core::connectivity::NetEvent;
use espfw_core::{Event, FirmwareConfig, LastWill, MqttClient, QoS, TransportError};
use rumqttc::{AsyncClient, MqttOptions, Packet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 32;

fn to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// One broker connection at a time. Reconnecting replaces the event loop.
pub struct RumqttClient {
    runtime: Handle,
    events: Sender<Event>,
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl RumqttClient {
    pub fn new(runtime: Handle, events: Sender<Event>) -> Self {
        Self {
            runtime,
            events,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Start a connection attempt. The outcome arrives as a [`NetEvent`].
    pub fn connect(&mut self, config: &FirmwareConfig, will: &LastWill) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.connected.store(false, Ordering::Release);

        let client_id = format!(
            "{}-{}",
            config.app_name,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let mut options = MqttOptions::new(client_id, config.mqtt_host.clone(), config.mqtt_port);
        options.set_keep_alive(KEEP_ALIVE);
        if let (Some(user), Some(password)) = (&config.mqtt_user, &config.mqtt_password) {
            options.set_credentials(user.clone(), password.clone());
        }
        options.set_last_will(rumqttc::LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            to_rumqttc(will.qos),
            will.retain,
        ));

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        self.client = Some(client);

        let connected = Arc::clone(&self.connected);
        let events = self.events.clone();
        self.task = Some(self.runtime.spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) => {
                        connected.store(true, Ordering::Release);
                        if events.send(Event::Net(NetEvent::MqttConnected)).is_err() {
                            break;
                        }
                    }
                    Ok(rumqttc::Event::Incoming(Packet::Publish(publish))) => {
                        let event = Event::Message {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        connected.store(false, Ordering::Release);
                        let _ = events.send(Event::Net(NetEvent::MqttDisconnected));
                        break;
                    }
                }
            }
            debug!("MQTT event loop finished");
        }));
    }
}

impl MqttClient for RumqttClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let client = match &self.client {
            Some(client) if self.is_connected() => client,
            _ => return Err(TransportError::NotConnected),
        };
        client
            .try_publish(topic, to_rumqttc(qos), retain, payload.to_vec())
            .map_err(|e| TransportError::Mqtt(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .try_subscribe(topic, to_rumqttc(qos))
            .map_err(|e| TransportError::Mqtt(e.to_string()))
    }
}

impl Drop for RumqttClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
