use core::fmt::Write;

use heapless::String;

use super::traits::MAX_TOPIC_LEN;

pub type Topic = String<MAX_TOPIC_LEN>;

/// The four device topics under one topic root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    /// Discovery document, `<root>/config`.
    pub config: Topic,
    /// Inbound commands, `<root>/set`.
    pub command: Topic,
    /// Availability, `<root>/status`.
    pub status: Topic,
    /// State JSON, `<root>/state`.
    pub state: Topic,
}

impl TopicSet {
    pub const CONFIG: &'static str = "config";
    pub const COMMAND: &'static str = "set";
    pub const STATUS: &'static str = "status";
    pub const STATE: &'static str = "state";

    /// Returns `None` if the root is too long for the topic buffers.
    pub fn from_root(root: &str) -> Option<Self> {
        Some(Self {
            config: join(root, Self::CONFIG)?,
            command: join(root, Self::COMMAND)?,
            status: join(root, Self::STATUS)?,
            state: join(root, Self::STATE)?,
        })
    }
}

fn join(root: &str, leaf: &str) -> Option<Topic> {
    let mut topic = Topic::new();
    write!(topic, "{}/{}", root, leaf).ok()?;
    Some(topic)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::string::String as StdString;

    #[test]
    fn test_from_root() {
        let topics = TopicSet::from_root("hatt/projector").unwrap();
        assert_eq!(topics.config.as_str(), "hatt/projector/config");
        assert_eq!(topics.command.as_str(), "hatt/projector/set");
        assert_eq!(topics.status.as_str(), "hatt/projector/status");
        assert_eq!(topics.state.as_str(), "hatt/projector/state");
    }

    #[test]
    fn test_root_too_long() {
        let root: StdString = "r".repeat(MAX_TOPIC_LEN);
        assert!(TopicSet::from_root(&root).is_none());
    }
}
