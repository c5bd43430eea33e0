//! User callbacks fired by the producer
//!
//! Every callback is optional. Absence is an explicit state with its own
//! default, documented on each setter of
//! [`BufferedProducer`](crate::producer::BufferedProducer).

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

use crate::error::BrokerError;
use crate::message::Message;

/// Called once per message the broker acknowledged
pub type ProduceSuccessCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Called when the broker rejects a delivery; return `false` to veto a retry
pub type ProduceFailureCallback = Arc<dyn Fn(&Message, &BrokerError) -> bool + Send + Sync>;

/// Called when a message is dropped after a delivery failure
pub type ProduceTerminationCallback = Arc<dyn Fn(&Message, &BrokerError) + Send + Sync>;

/// Called when handing a message to the broker fails locally; return `false` to veto a retry
pub type FlushFailureCallback = Arc<dyn Fn(&Message, &BrokerError) -> bool + Send + Sync>;

/// Called when a message is dropped after a local send failure
pub type FlushTerminationCallback = Arc<dyn Fn(&Message, &BrokerError) + Send + Sync>;

/// Called while the broker's send queue is full
pub type QueueFullCallback = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Default)]
struct Registered {
    produce_success: Option<ProduceSuccessCallback>,
    produce_failure: Option<ProduceFailureCallback>,
    produce_termination: Option<ProduceTerminationCallback>,
    flush_failure: Option<FlushFailureCallback>,
    flush_termination: Option<FlushTerminationCallback>,
    queue_full: Option<QueueFullCallback>,
}

/// Callback registry.
///
/// Callbacks are cloned out of the lock before being invoked, so a callback
/// may safely replace callbacks or call back into the producer.
#[derive(Default)]
pub(crate) struct Callbacks {
    registered: RwLock<Registered>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered = self.registered.read();
        f.debug_struct("Callbacks")
            .field("produce_success", &registered.produce_success.is_some())
            .field("produce_failure", &registered.produce_failure.is_some())
            .field("produce_termination", &registered.produce_termination.is_some())
            .field("flush_failure", &registered.flush_failure.is_some())
            .field("flush_termination", &registered.flush_termination.is_some())
            .field("queue_full", &registered.queue_full.is_some())
            .finish()
    }
}

impl Callbacks {
    pub fn set_produce_success(&self, callback: Option<ProduceSuccessCallback>) {
        self.registered.write().produce_success = callback;
    }

    pub fn set_produce_failure(&self, callback: Option<ProduceFailureCallback>) {
        self.registered.write().produce_failure = callback;
    }

    pub fn set_produce_termination(&self, callback: Option<ProduceTerminationCallback>) {
        self.registered.write().produce_termination = callback;
    }

    pub fn set_flush_failure(&self, callback: Option<FlushFailureCallback>) {
        self.registered.write().flush_failure = callback;
    }

    pub fn set_flush_termination(&self, callback: Option<FlushTerminationCallback>) {
        self.registered.write().flush_termination = callback;
    }

    pub fn set_queue_full(&self, callback: Option<QueueFullCallback>) {
        self.registered.write().queue_full = callback;
    }

    pub fn produce_success(&self, message: &Message) {
        let callback = self.registered.read().produce_success.clone();
        match callback {
            Some(callback) => callback(message),
            None => trace!("No produce success callback registered"),
        }
    }

    /// Returns `None` when no failure callback is registered
    pub fn produce_failure(&self, message: &Message, error: &BrokerError) -> Option<bool> {
        let callback = self.registered.read().produce_failure.clone();
        callback.map(|callback| callback(message, error))
    }

    pub fn produce_termination(&self, message: &Message, error: &BrokerError) {
        let callback = self.registered.read().produce_termination.clone();
        if let Some(callback) = callback {
            callback(message, error);
        }
    }

    /// Returns `None` when no flush failure callback is registered
    pub fn flush_failure(&self, message: &Message, error: &BrokerError) -> Option<bool> {
        let callback = self.registered.read().flush_failure.clone();
        callback.map(|callback| callback(message, error))
    }

    pub fn flush_termination(&self, message: &Message, error: &BrokerError) {
        let callback = self.registered.read().flush_termination.clone();
        if let Some(callback) = callback {
            callback(message, error);
        }
    }

    pub fn queue_full(&self, message: &Message) {
        let callback = self.registered.read().queue_full.clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_absent_callbacks_are_distinguishable() {
        let callbacks = Callbacks::default();
        let message = Message::new("t", "v");
        let error = BrokerError::delivery("nack");

        assert_eq!(callbacks.produce_failure(&message, &error), None);
        assert_eq!(callbacks.flush_failure(&message, &error), None);

        callbacks.set_produce_failure(Some(Arc::new(|_: &Message, _: &BrokerError| false)));
        assert_eq!(callbacks.produce_failure(&message, &error), Some(false));

        callbacks.set_produce_failure(None);
        assert_eq!(callbacks.produce_failure(&message, &error), None);
    }

    #[test]
    fn test_callback_may_reenter_registry() {
        let callbacks = Arc::new(Callbacks::default());
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let registry = Arc::clone(&callbacks);
            let calls = Arc::clone(&calls);
            callbacks.set_queue_full(Some(Arc::new(move |_: &Message| {
                calls.fetch_add(1, Ordering::SeqCst);
                registry.set_queue_full(None);
            })));
        }

        let message = Message::new("t", "v");
        callbacks.queue_full(&message);
        callbacks.queue_full(&message);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
