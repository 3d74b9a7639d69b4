//! MQTT client abstraction.
//!
//! The framework publishes and subscribes through [`MqttClient`]; each
//! platform wraps its own MQTT stack behind it.

/// MQTT quality of service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Message the broker publishes when the device drops off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl LastWill {
    /// The offline will for an app instance: QoS 1, retained.
    pub fn offline(topic: &str, instance_id: i32) -> Self {
        Self {
            topic: topic.to_string(),
            payload: crate::identity::presence_payload(instance_id),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }
}

/// Errors raised by network transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,
    #[error("WiFi error: {0}")]
    Wifi(String),
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A connected (or connecting) MQTT client.
pub trait MqttClient {
    fn is_connected(&self) -> bool;

    fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Records publishes and subscriptions.
    #[derive(Debug, Default)]
    pub struct RecordingMqtt {
        pub connected: bool,
        pub fail_publish: bool,
        pub published: Vec<(String, QoS, bool, Vec<u8>)>,
        pub subscribed: Vec<(String, QoS)>,
    }

    impl RecordingMqtt {
        pub fn connected() -> Self {
            Self {
                connected: true,
                ..Default::default()
            }
        }
    }

    impl MqttClient for RecordingMqtt {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn publish(
            &mut self,
            topic: &str,
            qos: QoS,
            retain: bool,
            payload: &[u8],
        ) -> Result<(), TransportError> {
            if self.fail_publish || !self.connected {
                return Err(TransportError::NotConnected);
            }
            self.published
                .push((topic.to_string(), qos, retain, payload.to_vec()));
            Ok(())
        }

        fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
            self.subscribed.push((topic.to_string(), qos));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_will() {
        let will = LastWill::offline("cam/offline", 3);
        assert_eq!(will.payload, "3");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
    }
}
