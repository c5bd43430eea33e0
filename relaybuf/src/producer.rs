//! Buffered producer with bounded per-message retries
//!
//! [`BufferedProducer`] collects messages in a regular buffer and a retry
//! buffer, hands them to a [`BrokerClient`] when flushed, and reacts to the
//! delivery reports the client sends back.
//!
//! # Retries
//!
//! Retry tracking switches on the first time a retry budget above zero is
//! configured and stays on for the lifetime of the producer. Each message
//! then gets a tracker holding its remaining budget. A failed delivery spends
//! one retry and either puts the message at the front of the retry buffer
//! (buffered and [`produce`](BufferedProducer::produce)d messages) or lets the
//! blocked [`sync_produce`](BufferedProducer::sync_produce) loop resend it.
//! Once the budget is spent, or a failure callback vetoes the retry, the
//! message is dropped and the matching termination callback fires.
//!
//! A full broker send queue is never a failure: the producer polls the broker
//! and tries again until the message is accepted.
//!
//! # Example
//!
//! ```rust,no_run
//! use relaybuf::*;
//!
//! fn main() -> Result<()> {
//!     let config = ProducerConfig::builder()
//!         .max_buffer_size(1000)
//!         .max_number_retries(3)
//!         .build()?;
//!     let producer: BufferedProducer<InMemoryBroker> =
//!         BufferedProducer::new(config, InMemoryBrokerConfig::default())?;
//!
//!     producer.set_produce_termination_callback(|message, error| {
//!         eprintln!("dropped message for {}: {}", message.topic(), error);
//!     });
//!
//!     producer.add_message(Message::with_key("events", "user-1", "login"))?;
//!     producer.flush(false)?;
//!     Ok(())
//! }
//! ```

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::broker::BrokerClient;
use crate::callbacks::Callbacks;
use crate::config::{validate_buffer_size, FlushMethod, ProducerConfig, QueueFullNotification};
use crate::error::{BrokerError, RelayError};
use crate::message::{DeliveryReport, Message, MessageBuilder, TopicName};
use crate::metrics::{MetricsSnapshot, ProducerMetrics};
use crate::queue::MessageQueue;
use crate::tracker::{Outcome, SenderKind, Tracker, TrackerTable};
use crate::Result;

/// State shared between the producer and the broker's delivery handler
#[derive(Debug)]
struct Shared {
    config: RwLock<ProducerConfig>,
    tracking_enabled: AtomicBool,
    queue: MessageQueue,
    retry_queue: MessageQueue,
    trackers: TrackerTable,
    callbacks: Callbacks,
    metrics: ProducerMetrics,
}

impl Shared {
    fn new(config: ProducerConfig) -> Self {
        Self {
            tracking_enabled: AtomicBool::new(config.tracking_enabled()),
            queue: MessageQueue::with_capacity("regular", config.queue_capacity_hint),
            retry_queue: MessageQueue::with_capacity("retry", config.queue_capacity_hint),
            trackers: TrackerTable::new(),
            callbacks: Callbacks::default(),
            metrics: ProducerMetrics::default(),
            config: RwLock::new(config),
        }
    }

    fn attach_tracker(&self, message: &mut Message, sender: SenderKind) -> Option<Arc<Tracker>> {
        if !self.tracking_enabled.load(Ordering::Acquire) {
            return None;
        }
        let max_retries = self.config.read().max_number_retries;
        Some(self.trackers.attach(message, sender, max_retries))
    }

    /// Ids only exist for tracked messages and for in-flight synchronous
    /// sends, so no check of the tracking switch is needed here.
    fn tracker_for(&self, message: &Message) -> Option<Arc<Tracker>> {
        self.trackers.get(message)
    }

    /// Handle one delivery report from the broker
    fn on_delivery(&self, report: DeliveryReport) {
        let DeliveryReport { message, result } = report;
        let tracker = self.tracker_for(&message);

        let outcome = match result {
            Ok(()) => {
                self.callbacks.produce_success(&message);
                self.metrics.record_produced();
                self.trackers.release(&message);
                Outcome::Delivered
            }
            Err(error) => {
                // No failure callback means the retry budget alone decides.
                let retry_allowed = self
                    .callbacks
                    .produce_failure(&message, &error)
                    .unwrap_or(true);
                let resend = if retry_allowed {
                    tracker.as_ref().and_then(|tracker| tracker.claim_retry())
                } else {
                    None
                };

                match resend {
                    Some(SenderKind::Async) => {
                        self.metrics.record_retry();
                        debug!(
                            "Delivery to '{}' failed ({}), queued for retry",
                            message.topic(),
                            error
                        );
                        self.retry_queue.push_front(message);
                        Outcome::Retry
                    }
                    Some(SenderKind::Sync) => {
                        self.metrics.record_retry();
                        debug!(
                            "Delivery to '{}' failed ({}), resending synchronously",
                            message.topic(),
                            error
                        );
                        Outcome::Retry
                    }
                    None => {
                        self.metrics.record_dropped();
                        self.trackers.release(&message);
                        warn!(
                            "Dropping message for topic '{}' after delivery failure: {}",
                            message.topic(),
                            error
                        );
                        self.callbacks.produce_termination(&message, &error);
                        Outcome::Dropped(error)
                    }
                }
            }
        };

        if let Some(tracker) = tracker {
            tracker.complete(outcome);
        }
        self.metrics.record_ack();
    }
}

/// Buffered, retrying producer on top of a [`BrokerClient`]
///
/// All operations take `&self`; share the producer between threads with an
/// `Arc`.
pub struct BufferedProducer<B: BrokerClient> {
    shared: Arc<Shared>,
    broker: B,
}

impl<B: BrokerClient> BufferedProducer<B> {
    /// Connect a broker client and wire its delivery reports to this producer
    pub fn new(config: ProducerConfig, broker_config: B::Config) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared::new(config));

        let handler_state = Arc::clone(&shared);
        let broker = B::connect(
            broker_config,
            Arc::new(move |report: DeliveryReport| handler_state.on_delivery(report)),
        )?;

        info!(
            "Buffered producer created (max buffer size {}, flush method {:?}, retries {})",
            config.max_buffer_size, config.flush_method, config.max_number_retries
        );
        Ok(Self { shared, broker })
    }

    /// Buffer a message, flushing if the buffer limit is reached.
    ///
    /// With [`FlushMethod::Sync`] a triggered flush blocks until every
    /// buffered message is acknowledged; with [`FlushMethod::Async`] it
    /// returns once the sends are issued.
    pub fn add_message(&self, message: impl Into<Message>) -> Result<()> {
        let mut message = message.into();
        self.shared.attach_tracker(&mut message, SenderKind::Async);
        self.shared.queue.push_back(message);

        let config = *self.shared.config.read();
        if config.max_buffer_size >= 0 && self.buffer_size() as i64 >= config.max_buffer_size {
            debug!(
                "Buffer reached {} messages, flushing ({:?})",
                config.max_buffer_size, config.flush_method
            );
            match config.flush_method {
                FlushMethod::Sync => self.flush(false)?,
                FlushMethod::Async => self.async_flush()?,
            }
        }
        Ok(())
    }

    /// Send a message immediately, bypassing the buffer.
    ///
    /// The delivery is tracked like a buffered one. If the broker refuses the
    /// message and it cannot be queued for retry, the error is returned.
    pub fn produce(&self, message: &Message) -> Result<()> {
        let mut message = message.clone();
        self.shared.attach_tracker(&mut message, SenderKind::Async);
        self.async_produce(message, true)
    }

    /// Send a message and block until it is delivered or dropped.
    ///
    /// With retry tracking the message is resent until it is delivered or its
    /// budget is spent, and the final failure is returned. Without tracking it
    /// is sent once and a refused send or failed delivery is returned.
    ///
    /// A given tracked message must not be synchronously produced from two
    /// threads at the same time.
    pub fn sync_produce(&self, message: &Message) -> Result<()> {
        self.sync_produce_owned(message.clone())
    }

    /// Send everything buffered without waiting for acknowledgements.
    ///
    /// The retry buffer is drained first. Messages the broker refuses are
    /// retried on a later flush or dropped; no error is returned for them.
    pub fn async_flush(&self) -> Result<()> {
        let _guard = self.shared.metrics.flush_guard();
        let mut issued = 0;
        for queue in [&self.shared.retry_queue, &self.shared.queue] {
            let batch = queue.take();
            trace!("Flushing {} messages from the {} queue", batch.len(), queue.name());
            issued += batch.len();
            for message in batch {
                self.async_produce(message, false)?;
            }
        }
        debug!("Issued {} buffered messages", issued);

        // Push the sends out without blocking on them.
        self.wait_for_acks_timeout(Duration::ZERO)?;
        Ok(())
    }

    /// Send everything buffered and wait for all acknowledgements.
    ///
    /// With `preserve_order` each message is resolved, retries included,
    /// before the next one is sent. This is slower but keeps strict ordering
    /// even when the broker could reorder resent messages.
    pub fn flush(&self, preserve_order: bool) -> Result<()> {
        if preserve_order {
            self.flush_in_order(None).map(|_| ())
        } else {
            self.async_flush()?;
            self.wait_for_acks()
        }
    }

    /// Bounded [`flush`](Self::flush); returns whether it finished in time.
    ///
    /// In order-preserving mode the deadline is only checked between
    /// messages, so a slow acknowledgement can overrun it. The result is then
    /// `true` when both buffers were drained, even if the last message
    /// finished after the deadline, and `false` when messages were left over.
    /// Those go back to the front of their buffers in their original order.
    pub fn flush_timeout(&self, timeout: Duration, preserve_order: bool) -> Result<bool> {
        if preserve_order {
            self.flush_in_order(Some(timeout))
        } else {
            self.async_flush()?;
            self.wait_for_acks_timeout(timeout)
        }
    }

    /// Block until every message sent so far has been acknowledged
    pub fn wait_for_acks(&self) -> Result<()> {
        let interval = self.shared.config.read().ack_poll_interval();
        while self.shared.metrics.pending_acks() > 0 {
            match self.broker.flush(interval) {
                Ok(()) => {}
                Err(error) if error.is_timeout() => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    /// Wait up to `timeout` for acknowledgements; returns whether none are pending
    pub fn wait_for_acks_timeout(&self, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        let mut remaining = timeout;
        loop {
            match self.broker.flush(remaining) {
                Ok(()) => {}
                Err(error) if error.is_timeout() => {
                    return Ok(self.shared.metrics.pending_acks() == 0);
                }
                Err(error) => return Err(error.into()),
            }
            remaining = timeout.saturating_sub(start.elapsed());
            if self.shared.metrics.pending_acks() == 0 || remaining.is_zero() {
                break;
            }
        }
        Ok(self.shared.metrics.pending_acks() == 0)
    }

    /// Discard everything buffered. Messages already sent are unaffected.
    pub fn clear(&self) {
        let retry_batch = self.shared.retry_queue.take();
        let batch = self.shared.queue.take();
        for message in retry_batch.iter().chain(batch.iter()) {
            self.shared.trackers.release(message);
        }
        debug!(
            "Cleared {} buffered and {} retry messages",
            batch.len(),
            retry_batch.len()
        );
    }

    /// Messages waiting in the regular and retry buffers
    pub fn buffer_size(&self) -> usize {
        self.shared.queue.len() + self.shared.retry_queue.len()
    }

    /// Set the buffer limit that triggers a flush; -1 means unbounded
    pub fn set_max_buffer_size(&self, max_buffer_size: i64) -> Result<()> {
        validate_buffer_size(max_buffer_size)?;
        self.shared.config.write().max_buffer_size = max_buffer_size;
        Ok(())
    }

    pub fn max_buffer_size(&self) -> i64 {
        self.shared.config.read().max_buffer_size
    }

    pub fn set_flush_method(&self, method: FlushMethod) {
        self.shared.config.write().flush_method = method;
    }

    pub fn flush_method(&self) -> FlushMethod {
        self.shared.config.read().flush_method
    }

    /// Set the retry budget for newly tracked messages.
    ///
    /// A value above zero enables retry tracking permanently; messages
    /// buffered before that point stay untracked.
    pub fn set_max_number_retries(&self, max_number_retries: usize) {
        self.shared.config.write().max_number_retries = max_number_retries;
        if max_number_retries > 0 {
            self.shared.tracking_enabled.store(true, Ordering::Release);
        }
    }

    pub fn max_number_retries(&self) -> usize {
        self.shared.config.read().max_number_retries
    }

    pub fn set_queue_full_notification(&self, notification: QueueFullNotification) {
        self.shared.config.write().queue_full_notification = notification;
    }

    pub fn queue_full_notification(&self) -> QueueFullNotification {
        self.shared.config.read().queue_full_notification
    }

    /// Messages sent to the broker and not yet acknowledged
    pub fn pending_acks(&self) -> usize {
        self.shared.metrics.pending_acks()
    }

    pub fn total_produced(&self) -> usize {
        self.metrics().total_produced
    }

    pub fn total_dropped(&self) -> usize {
        self.metrics().total_dropped
    }

    pub fn flushes_in_progress(&self) -> usize {
        self.metrics().flushes_in_progress
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Current configuration, including changes made through setters
    pub fn config(&self) -> ProducerConfig {
        *self.shared.config.read()
    }

    /// The underlying broker client
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Start building a message for `topic`
    pub fn make_builder<T: Into<TopicName>>(&self, topic: T) -> MessageBuilder {
        MessageBuilder::new(topic)
    }

    /// Called for every successful delivery
    pub fn set_produce_success_callback<F>(&self, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .set_produce_success(Some(Arc::new(callback)));
    }

    /// Called for every failed delivery; return `false` to drop the message
    /// instead of retrying it. Without this callback retries are limited only
    /// by the retry budget.
    pub fn set_produce_failure_callback<F>(&self, callback: F)
    where
        F: Fn(&Message, &BrokerError) -> bool + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .set_produce_failure(Some(Arc::new(callback)));
    }

    /// Called when a message is dropped after a failed delivery
    pub fn set_produce_termination_callback<F>(&self, callback: F)
    where
        F: Fn(&Message, &BrokerError) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .set_produce_termination(Some(Arc::new(callback)));
    }

    /// Called when the broker refuses a message during a flush or produce;
    /// return `false` to drop it instead of retrying. Without this callback
    /// retries are limited only by the retry budget.
    pub fn set_flush_failure_callback<F>(&self, callback: F)
    where
        F: Fn(&Message, &BrokerError) -> bool + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .set_flush_failure(Some(Arc::new(callback)));
    }

    /// Called when a message the broker refused is dropped
    pub fn set_flush_termination_callback<F>(&self, callback: F)
    where
        F: Fn(&Message, &BrokerError) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .set_flush_termination(Some(Arc::new(callback)));
    }

    /// Called while the broker's send queue is full, per the notification policy
    pub fn set_queue_full_callback<F>(&self, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.callbacks.set_queue_full(Some(Arc::new(callback)));
    }

    fn sync_produce_owned(&self, mut message: Message) -> Result<()> {
        let tracker = match self.shared.attach_tracker(&mut message, SenderKind::Sync) {
            Some(tracker) => tracker,
            // Untracked sends still wait on their outcome; a zero budget never resends.
            None => self.shared.trackers.attach(&mut message, SenderKind::Sync, 0),
        };

        // This loop now owns resending, even for a message that was buffered.
        tracker.set_sender(SenderKind::Sync);
        loop {
            let completion = tracker.arm();
            if let Err(error) = self.produce_message(&message) {
                if self.recover_send_failure(&message, &error, false) {
                    continue;
                }
                return Err(RelayError::Send(error));
            }

            if let Err(error) = self.wait_for_acks() {
                // Let a late failure report requeue the message instead.
                tracker.set_sender(SenderKind::Async);
                return Err(error);
            }

            // The report is handled before the pending count drops, so the
            // outcome is already in the slot.
            match completion.try_recv() {
                Ok(Outcome::Retry) => {
                    trace!("Resending tracked message {}", tracker.id());
                    continue;
                }
                Ok(Outcome::Delivered) => return Ok(()),
                Ok(Outcome::Dropped(error)) => return Err(RelayError::Delivery(error)),
                Err(_) => return Err(RelayError::CompletionLost),
            }
        }
    }

    fn flush_in_order(&self, timeout: Option<Duration>) -> Result<bool> {
        let _guard = self.shared.metrics.flush_guard();
        let mut retry_batch = self.shared.retry_queue.take();
        let mut batch = self.shared.queue.take();
        debug!(
            "Flushing {} retry and {} buffered messages in order",
            retry_batch.len(),
            batch.len()
        );

        let start = Instant::now();
        let mut result = Ok(());
        while let Some(message) = retry_batch.pop_front().or_else(|| batch.pop_front()) {
            match self.sync_produce_owned(message) {
                Ok(()) => {}
                // Already counted as dropped and reported to the termination callback.
                Err(RelayError::Send(error)) | Err(RelayError::Delivery(error)) => {
                    warn!("Ordered flush skipped a message: {}", error);
                }
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
            if timeout.map_or(false, |timeout| start.elapsed() >= timeout) {
                break;
            }
        }

        let completed = retry_batch.is_empty() && batch.is_empty();
        if !completed {
            debug!(
                "Ordered flush stopped early, re-queueing {} messages",
                retry_batch.len() + batch.len()
            );
        }
        self.shared.retry_queue.restore_front(retry_batch);
        self.shared.queue.restore_front(batch);
        result.map(|()| completed)
    }

    /// Send without waiting, routing a refused send through the flush callbacks
    fn async_produce(&self, message: Message, propagate: bool) -> Result<()> {
        match self.produce_message(&message) {
            Ok(()) => Ok(()),
            Err(error) => {
                if self.recover_send_failure(&message, &error, true) || !propagate {
                    Ok(())
                } else {
                    Err(RelayError::Send(error))
                }
            }
        }
    }

    /// Hand a message to the broker, waiting out a full send queue
    fn produce_message(&self, message: &Message) -> std::result::Result<(), BrokerError> {
        let policy = self.shared.config.read().queue_full_notification;
        let mut notify = policy != QueueFullNotification::None;
        loop {
            self.shared.metrics.record_in_flight();
            match self.broker.send(message.clone()) {
                Ok(()) => return Ok(()),
                Err(error) => {
                    self.shared.metrics.record_send_rejected();
                    if !error.is_queue_full() {
                        return Err(error);
                    }
                    self.shared.metrics.record_queue_full();
                    trace!("Broker queue full, polling before resending");
                    self.broker.poll();
                    if notify {
                        notify = policy == QueueFullNotification::EachOccurrence;
                        self.shared.callbacks.queue_full(message);
                    }
                }
            }
        }
    }

    /// Apply the retry policy to a message the broker refused to accept.
    ///
    /// Returns `true` if the message will be retried, either from the retry
    /// buffer (`requeue`) or by the caller. Otherwise it has been dropped.
    fn recover_send_failure(&self, message: &Message, error: &BrokerError, requeue: bool) -> bool {
        let retry_allowed = self
            .shared
            .callbacks
            .flush_failure(message, error)
            .unwrap_or(true);
        if retry_allowed {
            let claimed = self
                .shared
                .tracker_for(message)
                .and_then(|tracker| tracker.claim_retry());
            if claimed.is_some() {
                self.shared.metrics.record_retry();
                debug!(
                    "Send to '{}' failed ({}), will retry",
                    message.topic(),
                    error
                );
                if requeue {
                    self.shared.retry_queue.push_back(message.clone());
                }
                return true;
            }
        }

        self.shared.metrics.record_dropped();
        self.shared.trackers.release(message);
        warn!(
            "Dropping message for topic '{}' after send failure: {}",
            message.topic(),
            error
        );
        self.shared.callbacks.flush_termination(message, error);
        false
    }
}

impl<B: BrokerClient> Drop for BufferedProducer<B> {
    fn drop(&mut self) {
        let buffered = self.buffer_size();
        if buffered > 0 {
            warn!("Producer dropped with {} unflushed messages", buffered);
        }
    }
}

impl<B: BrokerClient> std::fmt::Debug for BufferedProducer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedProducer")
            .field("config", &self.config())
            .field("buffer_size", &self.buffer_size())
            .field("metrics", &self.metrics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBroker, InMemoryBrokerConfig};

    fn producer(config: ProducerConfig) -> BufferedProducer<InMemoryBroker> {
        BufferedProducer::new(config, InMemoryBrokerConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_buffer_size_rejected() {
        let producer = producer(ProducerConfig::default());
        assert!(matches!(
            producer.set_max_buffer_size(-2),
            Err(RelayError::InvalidArgument { .. })
        ));
        assert_eq!(producer.max_buffer_size(), -1);

        producer.set_max_buffer_size(0).unwrap();
        assert_eq!(producer.max_buffer_size(), 0);
    }

    #[test]
    fn test_setters_round_trip() {
        let producer = producer(ProducerConfig::default());
        producer.set_flush_method(FlushMethod::Async);
        producer.set_queue_full_notification(QueueFullNotification::OncePerMessage);
        producer.set_max_number_retries(4);

        assert_eq!(producer.flush_method(), FlushMethod::Async);
        assert_eq!(
            producer.queue_full_notification(),
            QueueFullNotification::OncePerMessage
        );
        assert_eq!(producer.max_number_retries(), 4);
        assert_eq!(producer.config().max_number_retries, 4);
    }

    #[test]
    fn test_tracking_stays_enabled_once_switched_on() {
        let producer = producer(ProducerConfig::default());
        producer.add_message(Message::new("t", "untracked")).unwrap();

        producer.set_max_number_retries(1);
        producer.set_max_number_retries(0);
        producer.add_message(Message::new("t", "tracked")).unwrap();

        let buffered = producer.shared.queue.take();
        assert!(buffered[0].tracking_id().is_none());
        assert!(buffered[1].tracking_id().is_some());
        // Budget comes from the setting at attach time.
        let tracker = producer.shared.trackers.get(&buffered[1]).unwrap();
        assert_eq!(tracker.remaining_retries(), 0);
    }

    #[test]
    fn test_clear_releases_trackers() {
        let producer = producer(ProducerConfig::builder().max_number_retries(2).build().unwrap());
        producer.add_message(Message::new("t", "a")).unwrap();
        producer.add_message(Message::new("t", "b")).unwrap();
        assert_eq!(producer.shared.trackers.len(), 2);

        producer.clear();
        assert_eq!(producer.buffer_size(), 0);
        assert_eq!(producer.shared.trackers.len(), 0);
        assert!(producer.broker().sent().is_empty());
    }

    #[test]
    fn test_trackers_released_after_delivery() {
        let producer = producer(ProducerConfig::builder().max_number_retries(2).build().unwrap());
        for i in 0..5 {
            producer.add_message(Message::new("t", format!("m{}", i))).unwrap();
        }
        producer.flush(false).unwrap();

        assert_eq!(producer.total_produced(), 5);
        assert_eq!(producer.shared.trackers.len(), 0);
        assert_eq!(producer.pending_acks(), 0);
    }

    #[test]
    fn test_untracked_sync_produce_reports_refused_send() {
        let producer = producer(ProducerConfig::default());
        producer.broker().reject_sends_where(|_| true);

        let err = producer.sync_produce(&Message::new("t", "v")).unwrap_err();
        assert!(matches!(err, RelayError::Send(BrokerError::Generic { .. })));
        assert_eq!(producer.total_dropped(), 1);
        assert_eq!(producer.pending_acks(), 0);
        assert_eq!(producer.shared.trackers.len(), 0);
    }

    #[test]
    fn test_untracked_sync_produce_releases_its_tracker() {
        let producer = producer(ProducerConfig::default());
        producer.broker().fail_next_deliveries(1);

        let err = producer.sync_produce(&Message::new("t", "v")).unwrap_err();
        assert!(matches!(err, RelayError::Delivery(_)));
        assert_eq!(producer.shared.trackers.len(), 0);
        assert_eq!(producer.metrics().retries, 0);

        producer.flush(true).unwrap();
        producer.sync_produce(&Message::new("t", "w")).unwrap();
        assert_eq!(producer.shared.trackers.len(), 0);
    }

    #[test]
    fn test_sync_produce_surfaces_exhausted_delivery() {
        let producer = producer(ProducerConfig::builder().max_number_retries(1).build().unwrap());
        producer.broker().fail_deliveries_where(|_| true);

        let err = producer.sync_produce(&Message::new("t", "v")).unwrap_err();
        assert!(matches!(err, RelayError::Delivery(BrokerError::Delivery { .. })));
        assert_eq!(producer.broker().sent().len(), 2);
        assert_eq!(producer.total_dropped(), 1);
        assert_eq!(producer.total_produced(), 0);
        assert_eq!(producer.metrics().retries, 1);
    }

    #[test]
    fn test_sync_produce_does_not_requeue_buffered_message() {
        let producer = producer(ProducerConfig::builder().max_number_retries(3).build().unwrap());
        producer.broker().fail_next_deliveries(2);
        producer.add_message(Message::new("t", "v")).unwrap();

        producer.flush(true).unwrap();
        assert_eq!(producer.broker().sent().len(), 3);
        assert_eq!(producer.broker().delivered().len(), 1);
        assert_eq!(producer.buffer_size(), 0);
        assert_eq!(producer.total_produced(), 1);
    }
}
