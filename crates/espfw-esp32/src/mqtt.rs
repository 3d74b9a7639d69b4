//! MQTT over the ESP-IDF client.

use espfw_core::connectivity::NetEvent;
use espfw_core::{Event, FirmwareConfig, LastWill, MqttClient, QoS, TransportError};
use embedded_svc::mqtt::client::{Details, EventPayload};
use esp_idf_svc::mqtt::client::{EspMqttClient, EspMqttConnection, LwtConfiguration, MqttClientConfiguration};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

const RECEIVER_STACK: usize = 8 * 1024;

fn to_esp(qos: QoS) -> embedded_svc::mqtt::client::QoS {
    match qos {
        QoS::AtMostOnce => embedded_svc::mqtt::client::QoS::AtMostOnce,
        QoS::AtLeastOnce => embedded_svc::mqtt::client::QoS::AtLeastOnce,
        QoS::ExactlyOnce => embedded_svc::mqtt::client::QoS::ExactlyOnce,
    }
}

/// Owns the current broker session. A new `connect` drops the old client,
/// which ends its receiver thread.
pub struct EspMqtt {
    events: Sender<Event>,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
}

impl EspMqtt {
    pub fn new(events: Sender<Event>) -> Self {
        Self {
            events,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn connect(
        &mut self,
        config: &FirmwareConfig,
        will: &LastWill,
    ) -> Result<(), TransportError> {
        self.client = None;
        self.connected.store(false, Ordering::Release);

        let conf = MqttClientConfiguration {
            client_id: Some(config.hostname()),
            username: config.mqtt_user.as_deref(),
            password: config.mqtt_password.as_deref(),
            lwt: Some(LwtConfiguration {
                topic: &will.topic,
                payload: will.payload.as_bytes(),
                qos: to_esp(will.qos),
                retain: will.retain,
            }),
            ..Default::default()
        };
        let (client, connection) = EspMqttClient::new(&config.mqtt_url(), &conf)
            .map_err(|e| TransportError::Mqtt(e.to_string()))?;
        self.client = Some(client);

        let connected = Arc::clone(&self.connected);
        let events = self.events.clone();
        thread::Builder::new()
            .name("mqtt-rx".into())
            .stack_size(RECEIVER_STACK)
            .spawn(move || receive(connection, connected, events))
            .map_err(TransportError::Io)?;
        Ok(())
    }
}

fn receive(mut connection: EspMqttConnection, connected: Arc<AtomicBool>, events: Sender<Event>) {
    while let Ok(event) = connection.next() {
        let forwarded = match event.payload() {
            EventPayload::Connected(_) => {
                connected.store(true, Ordering::Release);
                Some(Event::Net(NetEvent::MqttConnected))
            }
            EventPayload::Disconnected => {
                connected.store(false, Ordering::Release);
                Some(Event::Net(NetEvent::MqttDisconnected))
            }
            EventPayload::Received {
                topic: Some(topic),
                data,
                details: Details::Complete,
                ..
            } => Some(Event::Message {
                topic: topic.to_string(),
                payload: data.to_vec(),
            }),
            EventPayload::Received { .. } => {
                warn!("Dropping fragmented MQTT message");
                None
            }
            _ => None,
        };
        if let Some(event) = forwarded {
            if events.send(event).is_err() {
                break;
            }
        }
    }
    info!("MQTT connection closed");
}

impl MqttClient for EspMqtt {
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
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
        client
            .enqueue(topic, to_esp(qos), retain, payload)
            .map(|_| ())
            .map_err(|e| TransportError::Mqtt(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
        client
            .subscribe(topic, to_esp(qos))
            .map(|_| ())
            .map_err(|e| TransportError::Mqtt(e.to_string()))
    }
}
