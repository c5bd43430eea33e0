//! Locked FIFO used for the regular and retry buffers
//!
//! Each queue owns its own lock. Callers never hold two queue locks at once,
//! and the lock is never held while talking to the broker: flush paths swap
//! the contents out and work on the detached batch.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::message::Message;

pub(crate) type Batch = VecDeque<Message>;

#[derive(Debug)]
pub(crate) struct MessageQueue {
    name: &'static str,
    messages: Mutex<Batch>,
}

impl MessageQueue {
    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn push_back(&self, message: Message) {
        self.messages.lock().push_back(message);
    }

    pub fn push_front(&self, message: Message) {
        self.messages.lock().push_front(message);
    }

    /// Swap the contents out, leaving the live queue empty
    pub fn take(&self) -> Batch {
        std::mem::take(&mut *self.messages.lock())
    }

    /// Put an unprocessed batch back ahead of anything queued since it was taken
    pub fn restore_front(&self, mut batch: Batch) {
        if batch.is_empty() {
            return;
        }
        let mut messages = self.messages.lock();
        batch.append(&mut messages);
        *messages = batch;
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payloads(batch: &Batch) -> Vec<String> {
        batch
            .iter()
            .map(|m| String::from_utf8_lossy(m.payload()).into_owned())
            .collect()
    }

    #[test]
    fn test_take_leaves_queue_empty() {
        let queue = MessageQueue::with_capacity("regular", 4);
        queue.push_back(Message::new("t", "a"));
        queue.push_back(Message::new("t", "b"));

        let batch = queue.take();
        assert_eq!(payloads(&batch), vec!["a", "b"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_push_front_takes_priority() {
        let queue = MessageQueue::with_capacity("retry", 0);
        queue.push_back(Message::new("t", "old"));
        queue.push_front(Message::new("t", "retried"));

        assert_eq!(payloads(&queue.take()), vec!["retried", "old"]);
    }

    #[test]
    fn test_restore_front_keeps_relative_order() {
        let queue = MessageQueue::with_capacity("regular", 0);
        queue.push_back(Message::new("t", "a"));
        queue.push_back(Message::new("t", "b"));
        let batch = queue.take();

        queue.push_back(Message::new("t", "c"));
        queue.restore_front(batch);

        assert_eq!(queue.len(), 3);
        assert_eq!(payloads(&queue.take()), vec!["a", "b", "c"]);
    }
}
