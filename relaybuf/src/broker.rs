//! The broker client seam
//!
//! The producer drives any client implementing [`BrokerClient`]. A client
//! accepts messages without blocking, delivers them on its own schedule, and
//! reports every accepted message exactly once through the delivery handler
//! installed by the producer at construction. Handlers run on whichever thread
//! calls [`BrokerClient::poll`] or [`BrokerClient::flush`], or on the client's
//! own completion threads.

use std::sync::Arc;
use std::time::Duration;

use crate::error::BrokerError;
use crate::message::{DeliveryReport, Message};

/// Receives one report per accepted message.
///
/// This slot is reserved for the producer; applications observe deliveries
/// through the producer's success, failure and termination callbacks.
pub type DeliveryHandler = Arc<dyn Fn(DeliveryReport) + Send + Sync>;

/// Non-blocking broker client with asynchronous delivery reports
pub trait BrokerClient: Send + Sync + 'static {
    /// Client-specific connection settings
    type Config;

    /// Create a client whose delivery reports go to `on_delivery`
    fn connect(config: Self::Config, on_delivery: DeliveryHandler) -> Result<Self, BrokerError>
    where
        Self: Sized;

    /// Queue a message for delivery.
    ///
    /// Must not block. Returns [`BrokerError::QueueFull`] when the client has no
    /// room; any other error means the message was never accepted. The message's
    /// tracking id must be preserved in the delivery report.
    fn send(&self, message: Message) -> Result<(), BrokerError>;

    /// Serve completed deliveries and free send-queue capacity
    fn poll(&self);

    /// Wait up to `timeout` for every accepted message to be reported.
    ///
    /// Returns [`BrokerError::TimedOut`] if messages are still outstanding.
    fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;
}
