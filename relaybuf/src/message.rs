//! Message value types handed to the producer and echoed back by the broker

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

use crate::error::BrokerError;

pub type TopicName = String;
pub type PartitionId = u32;

/// Identifier linking a message to its retry tracker.
///
/// Assigned by the producer when retry tracking is enabled. Brokers must carry
/// it through unchanged so delivery reports can be matched to their tracker.
/// Ids are scoped to the producer that issued them; another producer treats a
/// foreign id as untracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackingId {
    scope: u64,
    sequence: u64,
}

impl TrackingId {
    pub(crate) fn new(scope: u64, sequence: u64) -> Self {
        Self { scope, sequence }
    }

    /// Producer that issued this id
    pub fn scope(&self) -> u64 {
        self.scope
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.scope, self.sequence)
    }
}

/// An immutable message bound for a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: TopicName,
    partition: Option<PartitionId>,
    key: Option<Bytes>,
    payload: Bytes,
    headers: HashMap<String, Bytes>,
    tracking: Option<TrackingId>,
}

impl Message {
    /// Create a new message builder for `topic`
    pub fn builder<T: Into<TopicName>>(topic: T) -> MessageBuilder {
        MessageBuilder::new(topic)
    }

    /// Create a simple message with topic and payload
    pub fn new<T: Into<TopicName>, V: Into<Bytes>>(topic: T, payload: V) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            payload: payload.into(),
            headers: HashMap::new(),
            tracking: None,
        }
    }

    /// Create a message with topic, key, and payload
    pub fn with_key<T: Into<TopicName>, K: Into<Bytes>, V: Into<Bytes>>(
        topic: T,
        key: K,
        payload: V,
    ) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::new(topic, payload)
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> Option<PartitionId> {
        self.partition
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn headers(&self) -> &HashMap<String, Bytes> {
        &self.headers
    }

    /// Tracker handle, present only when the producer tracks retries
    pub fn tracking_id(&self) -> Option<TrackingId> {
        self.tracking
    }

    /// Size of key plus payload in bytes
    pub fn size(&self) -> usize {
        self.payload.len() + self.key.as_ref().map_or(0, Bytes::len)
    }

    pub(crate) fn set_tracking_id(&mut self, id: TrackingId) {
        self.tracking = Some(id);
    }
}

/// Builder for [`Message`]
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    topic: TopicName,
    partition: Option<PartitionId>,
    key: Option<Bytes>,
    payload: Bytes,
    headers: HashMap<String, Bytes>,
}

impl MessageBuilder {
    pub fn new<T: Into<TopicName>>(topic: T) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            payload: Bytes::new(),
            headers: HashMap::new(),
        }
    }

    pub fn partition(mut self, partition: PartitionId) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn key<K: Into<Bytes>>(mut self, key: K) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn payload<V: Into<Bytes>>(mut self, payload: V) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn header<K: Into<String>, V: Into<Bytes>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Message {
        Message {
            topic: self.topic,
            partition: self.partition,
            key: self.key,
            payload: self.payload,
            headers: self.headers,
            tracking: None,
        }
    }
}

impl From<MessageBuilder> for Message {
    fn from(builder: MessageBuilder) -> Self {
        builder.build()
    }
}

/// Outcome of a single delivery, reported by the broker once per accepted send
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub message: Message,
    pub result: Result<(), BrokerError>,
}

impl DeliveryReport {
    pub fn delivered(message: Message) -> Self {
        Self {
            message,
            result: Ok(()),
        }
    }

    pub fn failed(message: Message, error: BrokerError) -> Self {
        Self {
            message,
            result: Err(error),
        }
    }

    pub fn error(&self) -> Option<&BrokerError> {
        self.result.as_ref().err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builder() {
        let message = Message::builder("orders")
            .key("order-1")
            .payload("created")
            .partition(2)
            .header("source", "web")
            .build();

        assert_eq!(message.topic(), "orders");
        assert_eq!(message.key(), Some(&Bytes::from("order-1")));
        assert_eq!(message.payload(), &Bytes::from("created"));
        assert_eq!(message.partition(), Some(2));
        assert_eq!(message.headers().len(), 1);
        assert_eq!(message.size(), "order-1".len() + "created".len());
        assert!(message.tracking_id().is_none());
    }

    #[test]
    fn test_clone_keeps_tracking_id() {
        let mut message = Message::with_key("t", "k", "v");
        message.set_tracking_id(TrackingId::new(1, 7));
        let copy = message.clone();
        assert_eq!(copy.tracking_id(), Some(TrackingId::new(1, 7)));
        assert_eq!(copy, message);
    }
}
