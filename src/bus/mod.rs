//! Message bus — topic-addressed publish with delivery acknowledgement
//!
//! `MessageBus::publish` blocks until the bus has accepted the message.
//! Two transports:
//! - `InMemoryBus`: in-process topics, for tests and single-process demos
//! - `swarm`: libp2p gossipsub between processes

pub mod protocol;
pub mod swarm;

use crate::error::{EmlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

pub use protocol::BusMessage;
pub use swarm::{run_swarm, NetworkEvent, SwarmCommand, SwarmConfig, SwarmHandle};

/// Identifier assigned by the bus to an accepted message
pub type MessageId = String;

/// Fully qualified topic name: `projects/{project}/topics/{topic}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPath(String);

impl TopicPath {
    pub fn new(project_id: &str, topic_id: &str) -> Self {
        Self(format!("projects/{}/topics/{}", project_id, topic_id))
    }

    pub fn parse(path: &str) -> Result<Self> {
        match path.split('/').collect::<Vec<_>>().as_slice() {
            ["projects", project, "topics", topic] if !project.is_empty() && !topic.is_empty() => {
                Ok(Self(path.to_string()))
            }
            _ => Err(EmlError::Config(format!("invalid topic path '{}'", path))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn project(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or_default()
    }

    pub fn topic(&self) -> &str {
        self.0.split('/').nth(3).unwrap_or_default()
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TopicPath {
    type Error = EmlError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TopicPath> for String {
    fn from(topic: TopicPath) -> Self {
        topic.0
    }
}

/// Publish side of a message bus
pub trait MessageBus {
    /// Publish `data` to `topic`, returning once the bus acknowledged it
    fn publish(&self, topic: &TopicPath, data: Vec<u8>) -> Result<MessageId>;
}

impl<B: MessageBus + ?Sized> MessageBus for &B {
    fn publish(&self, topic: &TopicPath, data: Vec<u8>) -> Result<MessageId> {
        (**self).publish(topic, data)
    }
}

/// In-process bus. Clones share the same topics.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    topics: Arc<Mutex<HashMap<TopicPath, Vec<BusMessage>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published to `topic`, oldest first
    pub fn messages(&self, topic: &TopicPath) -> Vec<BusMessage> {
        self.topics
            .lock()
            .map(|t| t.get(topic).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Remove and return the pending messages of `topic`
    pub fn drain(&self, topic: &TopicPath) -> Vec<BusMessage> {
        self.topics
            .lock()
            .map(|mut t| t.remove(topic).unwrap_or_default())
            .unwrap_or_default()
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, topic: &TopicPath, data: Vec<u8>) -> Result<MessageId> {
        let msg = BusMessage::new(topic.clone(), data);
        let id = msg.id.clone();
        self.topics
            .lock()
            .map_err(|_| EmlError::Delivery("in-memory bus lock poisoned".into()))?
            .entry(topic.clone())
            .or_default()
            .push(msg);
        Ok(id)
    }
}
