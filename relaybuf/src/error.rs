//! Error types for the relaybuf producer

/// Errors reported by a [`BrokerClient`](crate::broker::BrokerClient)
///
/// These are returned from `send` and `flush`, and carried by delivery
/// reports when the broker rejects a message after accepting it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The broker's local send queue is full; poll and try again
    #[error("Broker send queue is full")]
    QueueFull,

    /// A flush did not drain the broker queue before its timeout
    #[error("Broker operation timed out")]
    TimedOut,

    /// The destination topic is unknown to the broker
    #[error("Topic '{topic}' does not exist")]
    UnknownTopic { topic: String },

    /// Message exceeds the broker's size limit
    #[error("Message size {size} exceeds maximum {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    /// The broker accepted the message but failed to deliver it
    #[error("Delivery failed: {message}")]
    Delivery { message: String },

    /// Any other broker failure
    #[error("{message}")]
    Generic { message: String },
}

impl BrokerError {
    /// Create a new delivery error
    pub fn delivery<S: Into<String>>(message: S) -> Self {
        Self::Delivery {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Create a new unknown topic error
    pub fn unknown_topic<S: Into<String>>(topic: S) -> Self {
        Self::UnknownTopic {
            topic: topic.into(),
        }
    }

    /// Check if this error is the transient queue-full condition
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull)
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Check if resending the same message could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::QueueFull | Self::TimedOut | Self::Delivery { .. } => true,
            Self::UnknownTopic { .. } | Self::MessageTooLarge { .. } | Self::Generic { .. } => {
                false
            }
        }
    }
}

/// Main error type for buffered producer operations
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A setter received an out-of-range value
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The message could not be handed to the broker and will not be retried
    #[error("Send failed: {0}")]
    Send(#[source] BrokerError),

    /// The broker rejected the message and the retry budget is exhausted
    #[error("Delivery failed: {0}")]
    Delivery(#[source] BrokerError),

    /// Broker flush or poll failure
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// The delivery outcome for a synchronous send never arrived
    #[error("Completion signal dropped before the delivery outcome was reported")]
    CompletionLost,
}

impl RelayError {
    /// Create a new invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a new invalid config error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// The broker error behind this failure, if any
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            Self::Send(e) | Self::Delivery(e) | Self::Broker(e) => Some(e),
            _ => None,
        }
    }
}

impl From<::config::ConfigError> for RelayError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::invalid_config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_classification() {
        assert!(BrokerError::QueueFull.is_queue_full());
        assert!(BrokerError::TimedOut.is_timeout());
        assert!(BrokerError::delivery("nack").is_retryable());
        assert!(!BrokerError::unknown_topic("t").is_retryable());
        assert!(!BrokerError::MessageTooLarge {
            size: 10,
            max_size: 5
        }
        .is_retryable());
    }

    #[test]
    fn test_relay_error_exposes_broker_error() {
        let err = RelayError::Send(BrokerError::unknown_topic("missing"));
        assert_eq!(
            err.broker_error(),
            Some(&BrokerError::UnknownTopic {
                topic: "missing".to_string()
            })
        );
        assert!(RelayError::invalid_argument("x").broker_error().is_none());
        assert_eq!(
            err.to_string(),
            "Send failed: Topic 'missing' does not exist"
        );
    }
}
