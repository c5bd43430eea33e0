//! In-process broker client
//!
//! [`InMemoryBroker`] accepts messages into a bounded send queue and reports
//! them when polled, on the polling thread. It never touches the network,
//! which makes it suitable for tests and demos, and it can be told to fail
//! deliveries, reject sends, stall, or report a full queue.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::broker::{BrokerClient, DeliveryHandler};
use crate::error::BrokerError;
use crate::message::{DeliveryReport, Message};

/// Predicate used to select messages for fault injection
pub type MessagePredicate = Box<dyn Fn(&Message) -> bool + Send + Sync>;

/// In-memory broker configuration
#[derive(Debug, Clone)]
pub struct InMemoryBrokerConfig {
    /// Accepted-but-unreported messages before `send` returns `QueueFull`
    pub queue_capacity: usize,
    /// Largest key plus payload size accepted
    pub max_message_size: usize,
    /// Known topics; `None` accepts any topic
    pub topics: Option<HashSet<String>>,
    /// Time spent delivering each message during a poll
    pub delivery_latency: Duration,
}

impl Default for InMemoryBrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100_000,
            max_message_size: 1024 * 1024, // 1MB
            topics: None,
            delivery_latency: Duration::ZERO,
        }
    }
}

impl InMemoryBrokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = Some(topics.into_iter().map(|s| s.into()).collect());
        self
    }

    pub fn with_delivery_latency(mut self, latency: Duration) -> Self {
        self.delivery_latency = latency;
        self
    }
}

#[derive(Default)]
struct Faults {
    fail_next: usize,
    fail_where: Option<MessagePredicate>,
    reject_where: Option<MessagePredicate>,
    queue_full_next: usize,
}

/// Broker client that keeps everything in process memory
pub struct InMemoryBroker {
    config: InMemoryBrokerConfig,
    on_delivery: DeliveryHandler,
    in_flight: Mutex<VecDeque<Message>>,
    sent: Mutex<Vec<Message>>,
    delivered: Mutex<Vec<Message>>,
    faults: Mutex<Faults>,
    paused: Mutex<bool>,
    resumed: Condvar,
    flush_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight_len())
            .field("flush_calls", &self.flush_calls())
            .finish()
    }
}

impl BrokerClient for InMemoryBroker {
    type Config = InMemoryBrokerConfig;

    fn connect(config: Self::Config, on_delivery: DeliveryHandler) -> Result<Self, BrokerError> {
        if config.queue_capacity == 0 {
            return Err(BrokerError::generic("queue capacity must be greater than zero"));
        }
        debug!(
            "In-memory broker ready (queue capacity {})",
            config.queue_capacity
        );
        Ok(Self {
            config,
            on_delivery,
            in_flight: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            flush_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        })
    }

    fn send(&self, message: Message) -> Result<(), BrokerError> {
        {
            let mut faults = self.faults.lock();
            if faults.queue_full_next > 0 {
                faults.queue_full_next -= 1;
                return Err(BrokerError::QueueFull);
            }
            if faults.reject_where.as_ref().map_or(false, |p| p(&message)) {
                return Err(BrokerError::generic(format!(
                    "send rejected for topic '{}'",
                    message.topic()
                )));
            }
        }

        if let Some(topics) = &self.config.topics {
            if !topics.contains(message.topic()) {
                return Err(BrokerError::unknown_topic(message.topic()));
            }
        }
        if message.size() > self.config.max_message_size {
            return Err(BrokerError::MessageTooLarge {
                size: message.size(),
                max_size: self.config.max_message_size,
            });
        }

        let mut in_flight = self.in_flight.lock();
        if in_flight.len() >= self.config.queue_capacity {
            return Err(BrokerError::QueueFull);
        }
        self.sent.lock().push(message.clone());
        in_flight.push_back(message);
        Ok(())
    }

    fn poll(&self) {
        self.poll_calls.fetch_add(1, Ordering::Relaxed);
        if *self.paused.lock() {
            return;
        }

        let batch: Vec<Message> = self.in_flight.lock().drain(..).collect();
        for message in batch {
            if !self.config.delivery_latency.is_zero() {
                thread::sleep(self.config.delivery_latency);
            }
            let report = match self.delivery_fault(&message) {
                Some(error) => {
                    trace!("Failing delivery to '{}': {}", message.topic(), error);
                    DeliveryReport::failed(message, error)
                }
                None => {
                    self.delivered.lock().push(message.clone());
                    DeliveryReport::delivered(message)
                }
            };
            (self.on_delivery)(report);
        }
    }

    fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.flush_calls.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now().checked_add(timeout);

        loop {
            {
                let mut paused = self.paused.lock();
                while *paused {
                    match deadline {
                        Some(deadline) => {
                            if self.resumed.wait_until(&mut paused, deadline).timed_out() {
                                return Err(BrokerError::TimedOut);
                            }
                        }
                        None => self.resumed.wait(&mut paused),
                    }
                }
            }

            self.poll();
            if self.in_flight.lock().is_empty() {
                return Ok(());
            }
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                return Err(BrokerError::TimedOut);
            }
        }
    }
}

impl InMemoryBroker {
    /// Fail the next `count` deliveries
    pub fn fail_next_deliveries(&self, count: usize) {
        self.faults.lock().fail_next = count;
    }

    /// Fail every delivery whose message matches `predicate`
    pub fn fail_deliveries_where<F>(&self, predicate: F)
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.faults.lock().fail_where = Some(Box::new(predicate));
    }

    /// Refuse to accept messages matching `predicate`
    pub fn reject_sends_where<F>(&self, predicate: F)
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.faults.lock().reject_where = Some(Box::new(predicate));
    }

    /// Report `QueueFull` for the next `count` sends regardless of capacity
    pub fn report_queue_full(&self, count: usize) {
        self.faults.lock().queue_full_next = count;
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Hold all deliveries; flushes time out until [`resume`](Self::resume)
    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    pub fn resume(&self) {
        *self.paused.lock() = false;
        self.resumed.notify_all();
    }

    /// Every message accepted by `send`, in acceptance order
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Every message delivered successfully, in delivery order
    pub fn delivered(&self) -> Vec<Message> {
        self.delivered.lock().clone()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn flush_calls(&self) -> usize {
        self.flush_calls.load(Ordering::Relaxed)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::Relaxed)
    }

    fn delivery_fault(&self, message: &Message) -> Option<BrokerError> {
        let mut faults = self.faults.lock();
        if faults.fail_next > 0 {
            faults.fail_next -= 1;
            return Some(BrokerError::delivery("injected delivery failure"));
        }
        if faults.fail_where.as_ref().map_or(false, |p| p(message)) {
            return Some(BrokerError::delivery(format!(
                "delivery to '{}' refused",
                message.topic()
            )));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    type Reports = Arc<Mutex<Vec<DeliveryReport>>>;

    fn collecting_broker(config: InMemoryBrokerConfig) -> (InMemoryBroker, Reports) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let broker = InMemoryBroker::connect(
            config,
            Arc::new(move |report: DeliveryReport| sink.lock().push(report)),
        )
        .unwrap();
        (broker, reports)
    }

    #[test]
    fn test_poll_reports_in_order() {
        let (broker, reports) = collecting_broker(InMemoryBrokerConfig::default());
        broker.send(Message::new("t", "a")).unwrap();
        broker.send(Message::new("t", "b")).unwrap();
        assert_eq!(broker.in_flight_len(), 2);
        assert!(reports.lock().is_empty());

        broker.poll();
        let reports = reports.lock();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].message.payload(), "a");
        assert!(reports.iter().all(|r| r.error().is_none()));
        assert_eq!(broker.delivered().len(), 2);
    }

    #[test]
    fn test_queue_full_until_polled() {
        let (broker, _reports) =
            collecting_broker(InMemoryBrokerConfig::new().with_queue_capacity(1));
        broker.send(Message::new("t", "a")).unwrap();
        assert_eq!(
            broker.send(Message::new("t", "b")),
            Err(BrokerError::QueueFull)
        );
        broker.poll();
        assert!(broker.send(Message::new("t", "b")).is_ok());
    }

    #[test]
    fn test_local_rejections() {
        let (broker, _reports) = collecting_broker(
            InMemoryBrokerConfig::new()
                .with_topics(["known"])
                .with_max_message_size(4),
        );
        assert_eq!(
            broker.send(Message::new("other", "a")),
            Err(BrokerError::unknown_topic("other"))
        );
        assert!(matches!(
            broker.send(Message::new("known", "too long")),
            Err(BrokerError::MessageTooLarge { .. })
        ));

        broker.reject_sends_where(|m| m.payload() == "bad");
        assert!(matches!(
            broker.send(Message::new("known", "bad")),
            Err(BrokerError::Generic { .. })
        ));
        assert!(broker.sent().is_empty());
    }

    #[test]
    fn test_injected_delivery_failures() {
        let (broker, reports) = collecting_broker(InMemoryBrokerConfig::default());
        broker.fail_next_deliveries(1);
        broker.send(Message::new("t", "a")).unwrap();
        broker.send(Message::new("t", "b")).unwrap();
        broker.flush(Duration::from_millis(10)).unwrap();

        let reports = reports.lock();
        assert!(reports[0].error().is_some());
        assert!(reports[1].error().is_none());
        assert_eq!(broker.delivered().len(), 1);
    }

    #[test]
    fn test_flush_times_out_while_paused() {
        let (broker, reports) = collecting_broker(InMemoryBrokerConfig::default());
        broker.pause();
        broker.send(Message::new("t", "a")).unwrap();
        assert_eq!(
            broker.flush(Duration::from_millis(5)),
            Err(BrokerError::TimedOut)
        );
        assert!(reports.lock().is_empty());

        broker.resume();
        assert_eq!(broker.flush(Duration::from_millis(5)), Ok(()));
        assert_eq!(reports.lock().len(), 1);
        assert_eq!(broker.flush_calls(), 2);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = InMemoryBroker::connect(
            InMemoryBrokerConfig::new().with_queue_capacity(0),
            Arc::new(|_: DeliveryReport| {}),
        );
        assert!(result.is_err());
    }
}
