//! WiFi and MQTT reconnect supervision.
//!
//! The network stacks report events; the supervisor decides what to do
//! next and returns the actions for the framework to carry out.

use crate::timer::TimerKind;
use tracing::{info, warn};

/// Events reported by the network stacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    WifiReady,
    StationStart,
    StationConnected,
    WifiGotIp(String),
    WifiDisconnected,
    MqttConnected,
    MqttDisconnected,
}

/// What the framework should do in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetAction {
    SyncTime,
    ConnectMqtt,
    StartTimer(TimerKind),
    StopTimer(TimerKind),
    RunWifiConnectTasks,
    RunWifiDisconnectTasks,
    RunMqttConnectTasks,
    RunMqttDisconnectTasks,
}

/// Tracks link state and maps events to actions.
#[derive(Debug, Default, Clone)]
pub struct ConnectionSupervisor {
    wifi_connected: bool,
    mqtt_connected: bool,
    ip: Option<String>,
}

impl ConnectionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wifi_connected(&self) -> bool {
        self.wifi_connected
    }

    pub fn mqtt_connected(&self) -> bool {
        self.mqtt_connected
    }

    /// IP address from the last `WifiGotIp`, cleared on disconnect.
    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    pub fn handle(&mut self, event: NetEvent) -> Vec<NetAction> {
        match event {
            NetEvent::WifiReady => {
                info!("WiFi interface ready");
                Vec::new()
            }
            NetEvent::StationStart => {
                info!("WiFi client started");
                Vec::new()
            }
            NetEvent::StationConnected => {
                info!("Connected to access point");
                Vec::new()
            }
            NetEvent::WifiGotIp(ip) => {
                info!("WiFi connected, IP address: {}", ip);
                self.wifi_connected = true;
                self.ip = Some(ip);
                vec![
                    NetAction::SyncTime,
                    NetAction::ConnectMqtt,
                    NetAction::RunWifiConnectTasks,
                ]
            }
            NetEvent::WifiDisconnected => {
                warn!("WiFi lost connection");
                self.wifi_connected = false;
                self.mqtt_connected = false;
                self.ip = None;
                vec![
                    NetAction::StopTimer(TimerKind::MqttReconnect),
                    NetAction::StartTimer(TimerKind::WifiReconnect),
                    NetAction::RunWifiDisconnectTasks,
                ]
            }
            NetEvent::MqttConnected => {
                info!("Connected to MQTT.");
                self.mqtt_connected = true;
                vec![NetAction::RunMqttConnectTasks]
            }
            NetEvent::MqttDisconnected => {
                warn!("Disconnected from MQTT.");
                self.mqtt_connected = false;
                let mut actions = vec![NetAction::RunMqttDisconnectTasks];
                if self.wifi_connected {
                    actions.push(NetAction::StartTimer(TimerKind::MqttReconnect));
                }
                actions
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_got_ip() {
        let mut supervisor = ConnectionSupervisor::new();
        let actions = supervisor.handle(NetEvent::WifiGotIp("10.0.0.7".into()));
        assert_eq!(
            actions,
            vec![
                NetAction::SyncTime,
                NetAction::ConnectMqtt,
                NetAction::RunWifiConnectTasks
            ]
        );
        assert!(supervisor.wifi_connected());
        assert_eq!(supervisor.ip(), Some("10.0.0.7"));
    }

    #[test]
    fn test_wifi_lost() {
        let mut supervisor = ConnectionSupervisor::new();
        supervisor.handle(NetEvent::WifiGotIp("10.0.0.7".into()));
        supervisor.handle(NetEvent::MqttConnected);

        let actions = supervisor.handle(NetEvent::WifiDisconnected);
        assert_eq!(
            actions,
            vec![
                NetAction::StopTimer(TimerKind::MqttReconnect),
                NetAction::StartTimer(TimerKind::WifiReconnect),
                NetAction::RunWifiDisconnectTasks
            ]
        );
        assert!(!supervisor.wifi_connected());
        assert!(!supervisor.mqtt_connected());
        assert_eq!(supervisor.ip(), None);
    }

    #[test]
    fn test_mqtt_reconnect_only_with_wifi() {
        let mut supervisor = ConnectionSupervisor::new();
        assert_eq!(
            supervisor.handle(NetEvent::MqttDisconnected),
            vec![NetAction::RunMqttDisconnectTasks]
        );

        supervisor.handle(NetEvent::WifiGotIp("10.0.0.7".into()));
        assert_eq!(
            supervisor.handle(NetEvent::MqttConnected),
            vec![NetAction::RunMqttConnectTasks]
        );
        assert_eq!(
            supervisor.handle(NetEvent::MqttDisconnected),
            vec![
                NetAction::RunMqttDisconnectTasks,
                NetAction::StartTimer(TimerKind::MqttReconnect)
            ]
        );
    }

    #[test]
    fn test_informational_events() {
        let mut supervisor = ConnectionSupervisor::new();
        assert!(supervisor.handle(NetEvent::WifiReady).is_empty());
        assert!(supervisor.handle(NetEvent::StationStart).is_empty());
        assert!(supervisor.handle(NetEvent::StationConnected).is_empty());
    }
}
