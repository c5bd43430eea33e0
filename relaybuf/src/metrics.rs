//! Counters kept by each buffered producer

use std::sync::atomic::{AtomicUsize, Ordering};

/// Producer metrics collector
#[derive(Debug, Default)]
pub struct ProducerMetrics {
    // Outcome counters
    pub pending_acks: AtomicUsize,
    pub flushes_in_progress: AtomicUsize,
    pub total_produced: AtomicUsize,
    pub total_dropped: AtomicUsize,

    // Diagnostics
    pub send_attempts: AtomicUsize,
    pub retries: AtomicUsize,
    pub queue_full_events: AtomicUsize,
}

impl ProducerMetrics {
    /// Record a message accepted by the broker and awaiting its ack.
    ///
    /// Counted before the send so a delivery racing the caller can never
    /// observe the counter at zero.
    pub fn record_in_flight(&self) {
        self.pending_acks.fetch_add(1, Ordering::SeqCst);
        self.send_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement pending acks, saturating at zero
    pub fn record_ack(&self) {
        let _ = self
            .pending_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Undo `record_in_flight` for a send the broker refused
    pub fn record_send_rejected(&self) {
        self.record_ack();
    }

    pub fn record_produced(&self) {
        self.total_produced.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_dropped(&self) {
        self.total_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_full(&self) {
        self.queue_full_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pending_acks(&self) -> usize {
        self.pending_acks.load(Ordering::SeqCst)
    }

    /// Mark a flush in progress until the returned guard is dropped
    pub fn flush_guard(&self) -> FlushGuard<'_> {
        self.flushes_in_progress.fetch_add(1, Ordering::SeqCst);
        FlushGuard { metrics: self }
    }

    /// Get snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pending_acks: self.pending_acks.load(Ordering::SeqCst),
            flushes_in_progress: self.flushes_in_progress.load(Ordering::SeqCst),
            total_produced: self.total_produced.load(Ordering::SeqCst),
            total_dropped: self.total_dropped.load(Ordering::SeqCst),
            send_attempts: self.send_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            queue_full_events: self.queue_full_events.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub pending_acks: usize,
    pub flushes_in_progress: usize,
    pub total_produced: usize,
    pub total_dropped: usize,
    pub send_attempts: usize,
    pub retries: usize,
    pub queue_full_events: usize,
}

impl MetricsSnapshot {
    /// Messages that reached a terminal outcome
    pub fn total_completed(&self) -> usize {
        self.total_produced + self.total_dropped
    }
}

/// Keeps `flushes_in_progress` raised for its lifetime
pub struct FlushGuard<'a> {
    metrics: &'a ProducerMetrics,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.metrics
            .flushes_in_progress
            .fetch_sub(1, Ordering::SeqCst);
    }
}
