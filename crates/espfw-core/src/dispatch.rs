//! MQTT message routing.
//!
//! Incoming publishes are classified by topic and turned into a [`Routed`]
//! value the framework hands to the app. Topics of other apps are only
//! delivered when registered, and their payloads must be JSON.

use crate::topics::{TopicError, TopicKind, TopicPath};
use tracing::{debug, error, info};

/// Maximum number of foreign topics an app can register.
pub const MAX_FOREIGN_TOPICS: usize = 10;

/// Maximum length of a registered foreign topic, in bytes.
pub const MAX_FOREIGN_TOPIC_LEN: usize = 24;

/// Errors raised while registering or routing.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Cannot register more than {max} foreign topics", max = MAX_FOREIGN_TOPICS)]
    TooManySubscriptions,
    #[error("Topic {0:?} is longer than {max} bytes", max = MAX_FOREIGN_TOPIC_LEN)]
    TopicTooLong(String),
    #[error(transparent)]
    Topic(#[from] TopicError),
}

/// Result of routing one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// A sibling announced itself (or its will fired).
    Presence { online: bool, index: Option<i32> },
    /// A command addressed to our instance.
    Command {
        topic: TopicPath,
        command: Vec<String>,
        payload: String,
    },
    /// Any other message under our app.
    App { topic: TopicPath, payload: String },
    /// A registered foreign topic with its JSON document.
    Foreign {
        handler: usize,
        topic: TopicPath,
        doc: serde_json::Value,
    },
    /// Nothing to deliver.
    Ignored,
}

/// Routes MQTT messages for one app.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    app_name: String,
    foreign: Vec<String>,
}

impl MessageRouter {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            foreign: Vec::new(),
        }
    }

    /// Register interest in another app's topic.
    ///
    /// Returns the handler index delivered with [`Routed::Foreign`].
    pub fn register_foreign(&mut self, topic: &str) -> Result<usize, DispatchError> {
        if topic.len() > MAX_FOREIGN_TOPIC_LEN {
            return Err(DispatchError::TopicTooLong(topic.to_string()));
        }
        if let Some(index) = self.foreign.iter().position(|t| t == topic) {
            return Ok(index);
        }
        if self.foreign.len() >= MAX_FOREIGN_TOPICS {
            return Err(DispatchError::TooManySubscriptions);
        }
        self.foreign.push(topic.to_string());
        Ok(self.foreign.len() - 1)
    }

    /// Registered foreign topics, in handler order.
    pub fn foreign_topics(&self) -> &[String] {
        &self.foreign
    }

    /// Route a message received on `topic`.
    pub fn route(
        &self,
        topic: &str,
        payload: &[u8],
        instance_id: i32,
    ) -> Result<Routed, DispatchError> {
        let text = String::from_utf8_lossy(payload);
        info!("[{}] {{{}}}", topic, text);

        let path = TopicPath::parse(topic)?;
        let routed = match path.classify(&self.app_name, instance_id) {
            TopicKind::Presence { online } => Routed::Presence {
                online,
                index: text.trim().parse::<i32>().ok().filter(|i| *i >= 0),
            },
            TopicKind::Command {
                for_us: true,
                command,
                ..
            } => Routed::Command {
                topic: path,
                command,
                payload: text.into_owned(),
            },
            TopicKind::Command { target, .. } => {
                debug!("Command for instance {} ignored", target);
                Routed::Ignored
            }
            TopicKind::AppMessage => Routed::App {
                topic: path,
                payload: text.into_owned(),
            },
            TopicKind::Foreign => match self.foreign.iter().position(|t| t == topic) {
                Some(handler) => match serde_json::from_slice(payload) {
                    Ok(doc) => Routed::Foreign {
                        handler,
                        topic: path,
                        doc,
                    },
                    Err(e) => {
                        error!("deserializeJson() failed: {}", e);
                        Routed::Ignored
                    }
                },
                None => Routed::Ignored,
            },
        };
        Ok(routed)
    }
}
