//! # relaybuf
//!
//! A buffered, retrying message producer for log-style message brokers.
//!
//! ## Features
//!
//! - **Buffering**: Messages collect locally and go out on flush or when a size limit is hit
//! - **Bounded Retries**: Failed deliveries are retried per message up to a configurable budget
//! - **Ordered Flush**: Optional one-at-a-time flushing that never reorders messages
//! - **Backpressure**: A full broker send queue is polled through instead of failing
//! - **Pluggable Broker**: Any [`BrokerClient`] works; [`InMemoryBroker`] ships for tests
//! - **Observability**: Counters via [`MetricsSnapshot`] and `tracing` events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relaybuf::*;
//!
//! fn main() -> Result<()> {
//!     let config = ProducerConfig::builder()
//!         .max_buffer_size(100)
//!         .max_number_retries(2)
//!         .build()?;
//!     let producer: BufferedProducer<InMemoryBroker> =
//!         BufferedProducer::new(config, InMemoryBrokerConfig::default())?;
//!
//!     let message = producer
//!         .make_builder("my-topic")
//!         .key("user-123")
//!         .payload("Hello!")
//!         .build();
//!     producer.add_message(message)?;
//!
//!     producer.flush(true)?;
//!     println!("delivered {} messages", producer.total_produced());
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod producer;
pub(crate) mod queue;
pub(crate) mod tracker;

pub use broker::{BrokerClient, DeliveryHandler};
pub use callbacks::*;
pub use crate::config::*;
pub use error::*;
pub use memory::{InMemoryBroker, InMemoryBrokerConfig};
pub use message::*;
pub use metrics::MetricsSnapshot;
pub use producer::*;

/// Library result type
pub type Result<T> = std::result::Result<T, RelayError>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
