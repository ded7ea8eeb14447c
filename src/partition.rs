//! Partition identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one independently ordered, independently assignable shard of
/// an event stream.
///
/// Used as a map key throughout the engine. Cloning allocates for the topic
/// name, which is acceptable because identities are copied on assignment and
/// revocation, never per record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic name
    pub topic: String,
    /// Partition number within the topic
    pub partition: i32,
}

impl TopicPartition {
    /// Create a new topic/partition identity
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}
