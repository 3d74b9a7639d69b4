//! MQTT topic layout and parsing.
//!
//! Every topic owned by an app is rooted at the app name, e.g.
//! `esp32FWApp/online`. Commands address one instance by putting its
//! numeric instance ID in the second level: `esp32FWApp/2/reboot`.

use crate::system::is_numeric;

/// Maximum number of levels accepted in an incoming topic.
pub const MAX_TOPIC_LEVELS: usize = 10;

/// Topics used by an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTopics {
    /// Announces the instance ID when the device comes online.
    pub online: String,
    /// Last will, published by the broker when the device drops off.
    pub offline: String,
    /// Instance ID topic.
    pub id: String,
    /// Device status.
    pub status: String,
    /// Camera snapshots.
    pub snapshot: String,
    /// Wildcard subscription covering every app topic.
    pub subscription: String,
}

impl AppTopics {
    pub fn new(app_name: &str) -> Self {
        Self {
            online: format!("{app_name}/online"),
            offline: format!("{app_name}/offline"),
            id: format!("{app_name}/id"),
            status: format!("{app_name}/status"),
            snapshot: format!("{app_name}/snapshot"),
            subscription: format!("{app_name}/#"),
        }
    }

    /// Topic addressing a single instance, e.g. `app/3/reboot`.
    pub fn command(app_name: &str, instance_id: i32, command: &str) -> String {
        format!("{app_name}/{instance_id}/{command}")
    }
}

/// Path of a firmware image stored on the flash filesystem.
pub fn firmware_file_name(app_name: &str, image_id: &str) -> String {
    format!("/firmware/{}_{}.bin", app_name, image_id.trim())
}

/// Errors that can occur when parsing a topic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("Empty topic")]
    Empty,
    #[error("MQTT Topic has {0} levels, more than {max}", max = MAX_TOPIC_LEVELS)]
    TooManyLevels(usize),
}

/// What a topic means to this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    /// `{app}/online` or `{app}/offline` from some instance.
    Presence { online: bool },
    /// `{app}/{id}/...` addressed to one instance.
    Command {
        target: i32,
        for_us: bool,
        command: Vec<String>,
    },
    /// Any other topic under the app.
    AppMessage,
    /// A topic belonging to something else.
    Foreign,
}

/// A parsed MQTT topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPath {
    raw: String,
    levels: Vec<String>,
}

impl TopicPath {
    /// Split a topic into its levels.
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        if topic.is_empty() {
            return Err(TopicError::Empty);
        }
        let levels: Vec<String> = topic.split('/').map(String::from).collect();
        if levels.len() > MAX_TOPIC_LEVELS {
            return Err(TopicError::TooManyLevels(levels.len()));
        }
        Ok(Self {
            raw: topic.to_string(),
            levels,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Level at `index`, if present.
    pub fn level(&self, index: usize) -> Option<&str> {
        self.levels.get(index).map(String::as_str)
    }

    /// Classify this topic relative to an app and our instance ID.
    pub fn classify(&self, app_name: &str, instance_id: i32) -> TopicKind {
        if self.level(0) != Some(app_name) {
            return TopicKind::Foreign;
        }

        match self.level(1) {
            Some("online") if self.levels.len() == 2 => TopicKind::Presence { online: true },
            Some("offline") if self.levels.len() == 2 => TopicKind::Presence { online: false },
            Some(level) if !level.is_empty() && is_numeric(level) => match level.parse::<i32>() {
                Ok(target) => TopicKind::Command {
                    target,
                    for_us: target == instance_id,
                    command: self.levels[2..].to_vec(),
                },
                Err(_) => TopicKind::AppMessage,
            },
            _ => TopicKind::AppMessage,
        }
    }
}

impl std::fmt::Display for TopicPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_topics() {
        let topics = AppTopics::new("cam");
        assert_eq!(topics.online, "cam/online");
        assert_eq!(topics.offline, "cam/offline");
        assert_eq!(topics.subscription, "cam/#");
        assert_eq!(AppTopics::command("cam", 4, "snap"), "cam/4/snap");
    }

    #[test]
    fn test_firmware_file_name() {
        assert_eq!(firmware_file_name("cam", "17\n"), "/firmware/cam_17.bin");
    }

    #[test]
    fn test_parse_levels() {
        let topic = TopicPath::parse("cam/2/flash/on").unwrap();
        assert_eq!(topic.levels(), &["cam", "2", "flash", "on"]);
        assert_eq!(topic.level(2), Some("flash"));
        assert_eq!(topic.level(9), None);
    }

    #[test]
    fn test_parse_limits() {
        assert_eq!(TopicPath::parse(""), Err(TopicError::Empty));
        assert!(TopicPath::parse("a/b/c/d/e/f/g/h/i/j").is_ok());
        assert_eq!(
            TopicPath::parse("a/b/c/d/e/f/g/h/i/j/k"),
            Err(TopicError::TooManyLevels(11))
        );
    }

    #[test]
    fn test_classify_presence() {
        let online = TopicPath::parse("cam/online").unwrap();
        assert_eq!(online.classify("cam", 0), TopicKind::Presence { online: true });

        let offline = TopicPath::parse("cam/offline").unwrap();
        assert_eq!(offline.classify("cam", 0), TopicKind::Presence { online: false });

        // Deeper topics are ordinary app messages.
        let nested = TopicPath::parse("cam/online/extra").unwrap();
        assert_eq!(nested.classify("cam", 0), TopicKind::AppMessage);
    }

    #[test]
    fn test_classify_command() {
        let topic = TopicPath::parse("cam/3/snapshot").unwrap();
        assert_eq!(
            topic.classify("cam", 3),
            TopicKind::Command {
                target: 3,
                for_us: true,
                command: vec!["snapshot".to_string()],
            }
        );
        assert!(matches!(
            topic.classify("cam", 1),
            TopicKind::Command { for_us: false, .. }
        ));
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(
            TopicPath::parse("cam/status").unwrap().classify("cam", 0),
            TopicKind::AppMessage
        );
        assert_eq!(
            TopicPath::parse("weather/now").unwrap().classify("cam", 0),
            TopicKind::Foreign
        );
        assert_eq!(
            TopicPath::parse("cam/99999999999/x").unwrap().classify("cam", 0),
            TopicKind::AppMessage
        );
    }
}
