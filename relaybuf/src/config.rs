//! Configuration types for the buffered producer

use ::config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::RelayError;

/// Buffer size value meaning "never auto-flush"
pub const UNBOUNDED_BUFFER: i64 = -1;

/// How a flush triggered by a full buffer behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMethod {
    /// Empty the buffer and wait for acks from the broker
    #[default]
    Sync,
    /// Empty the buffer and return once the sends are issued
    Async,
}

/// When to invoke the queue-full callback while the broker applies backpressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullNotification {
    /// Don't notify
    #[default]
    None,
    /// Notify once per send attempt of a message, however long it stays blocked
    OncePerMessage,
    /// Notify every time the broker reports a full queue
    EachOccurrence,
}

/// Buffered producer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Buffered message count that triggers a flush; -1 disables auto-flush
    pub max_buffer_size: i64,
    /// Flush method used when the buffer limit is hit
    pub flush_method: FlushMethod,
    /// Per-message retry budget; any value above zero enables tracking
    pub max_number_retries: usize,
    /// Queue-full notification policy
    pub queue_full_notification: QueueFullNotification,
    /// Broker flush timeout used for each round of an unbounded ack wait
    pub ack_poll_interval_ms: u64,
    /// Initial capacity reserved for each buffer queue
    pub queue_capacity_hint: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: UNBOUNDED_BUFFER,
            flush_method: FlushMethod::Sync,
            max_number_retries: 0,
            queue_full_notification: QueueFullNotification::None,
            ack_poll_interval_ms: 100,
            queue_capacity_hint: 0,
        }
    }
}

impl ProducerConfig {
    /// Create a new builder
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::new()
    }

    /// Load from `RELAYBUF_*` environment variables, e.g. `RELAYBUF_MAX_BUFFER_SIZE`
    pub fn from_env() -> Result<Self, RelayError> {
        let settings = Config::builder()
            .add_source(Environment::with_prefix("RELAYBUF"))
            .build()?;
        Self::from_settings(settings)
    }

    /// Deserialize from an already assembled configuration source
    pub fn from_settings(settings: Config) -> Result<Self, RelayError> {
        let config = settings.try_deserialize::<ProducerConfig>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        validate_buffer_size(self.max_buffer_size)?;
        if self.ack_poll_interval_ms == 0 {
            return Err(RelayError::invalid_config(
                "ack_poll_interval_ms must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn ack_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ack_poll_interval_ms)
    }

    pub fn tracking_enabled(&self) -> bool {
        self.max_number_retries > 0
    }
}

pub(crate) fn validate_buffer_size(max_buffer_size: i64) -> Result<(), RelayError> {
    if max_buffer_size < UNBOUNDED_BUFFER {
        return Err(RelayError::invalid_argument(format!(
            "max buffer size must be -1 or non-negative, got {}",
            max_buffer_size
        )));
    }
    Ok(())
}

/// Builder for ProducerConfig
#[derive(Debug, Default)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_buffer_size(mut self, size: i64) -> Self {
        self.config.max_buffer_size = size;
        self
    }

    pub fn flush_method(mut self, method: FlushMethod) -> Self {
        self.config.flush_method = method;
        self
    }

    pub fn max_number_retries(mut self, retries: usize) -> Self {
        self.config.max_number_retries = retries;
        self
    }

    pub fn queue_full_notification(mut self, notification: QueueFullNotification) -> Self {
        self.config.queue_full_notification = notification;
        self
    }

    pub fn ack_poll_interval(mut self, interval: Duration) -> Self {
        self.config.ack_poll_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    pub fn queue_capacity_hint(mut self, capacity: usize) -> Self {
        self.config.queue_capacity_hint = capacity;
        self
    }

    pub fn build(self) -> Result<ProducerConfig, RelayError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::config::{File, FileFormat};

    #[test]
    fn test_producer_config_builder() {
        let config = ProducerConfigBuilder::new()
            .max_buffer_size(100)
            .flush_method(FlushMethod::Async)
            .max_number_retries(3)
            .queue_full_notification(QueueFullNotification::EachOccurrence)
            .ack_poll_interval(Duration::from_millis(20))
            .build()
            .unwrap();

        assert_eq!(config.max_buffer_size, 100);
        assert_eq!(config.flush_method, FlushMethod::Async);
        assert_eq!(config.max_number_retries, 3);
        assert!(config.tracking_enabled());
        assert_eq!(config.ack_poll_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_defaults() {
        let config = ProducerConfig::default();
        assert_eq!(config.max_buffer_size, UNBOUNDED_BUFFER);
        assert_eq!(config.flush_method, FlushMethod::Sync);
        assert_eq!(config.queue_full_notification, QueueFullNotification::None);
        assert!(!config.tracking_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_buffer_size_rejected() {
        let err = ProducerConfig::builder()
            .max_buffer_size(-2)
            .build()
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument { .. }));
    }

    #[test]
    fn test_from_settings() {
        let settings = Config::builder()
            .add_source(File::from_str(
                r#"
                max_buffer_size = 50
                flush_method = "async"
                max_number_retries = 2
                queue_full_notification = "once_per_message"
                "#,
                FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let config = ProducerConfig::from_settings(settings).unwrap();
        assert_eq!(config.max_buffer_size, 50);
        assert_eq!(config.flush_method, FlushMethod::Async);
        assert_eq!(config.max_number_retries, 2);
        assert_eq!(
            config.queue_full_notification,
            QueueFullNotification::OncePerMessage
        );
        assert_eq!(config.ack_poll_interval_ms, 100);
    }

    #[test]
    fn test_from_settings_rejects_invalid_values() {
        let settings = Config::builder()
            .add_source(File::from_str("max_buffer_size = -5", FileFormat::Toml))
            .build()
            .unwrap();
        assert!(ProducerConfig::from_settings(settings).is_err());
    }
}
