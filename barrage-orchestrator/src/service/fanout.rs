//! Log fan-out
//!
//! Per-run log buffer plus a broadcast channel to live observers.
//! Publishing appends to the buffer and hands the entry to every receiver.
//! A receiver that falls behind lags on its own; others are unaffected.
//! Dropping a receiver unsubscribes it.

use barrage_core::domain::log::LogEntry;
use std::sync::Mutex;
use tokio::sync::broadcast;

use super::lock;

pub struct LogFanout {
    inner: Mutex<Inner>,
}

struct Inner {
    buffer: Vec<LogEntry>,
    /// `None` once the run has terminated
    sender: Option<broadcast::Sender<LogEntry>>,
}

impl LogFanout {
    /// Creates a fan-out whose observers may lag by up to `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Mutex::new(Inner {
                buffer: Vec::new(),
                sender: Some(sender),
            }),
        }
    }

    /// Appends an entry and delivers it to current subscribers
    pub fn publish(&self, entry: LogEntry) {
        let mut inner = lock(&self.inner);
        if let Some(sender) = &inner.sender {
            // Err only means nobody is listening right now
            let _ = sender.send(entry.clone());
        }
        inner.buffer.push(entry);
    }

    /// Subscribes to entries published from now on
    ///
    /// Returns `None` once the fan-out is closed.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<LogEntry>> {
        let inner = lock(&self.inner);
        inner.sender.as_ref().map(broadcast::Sender::subscribe)
    }

    /// Snapshot of the buffer together with a subscription starting right after it
    pub fn replay_and_subscribe(&self) -> Option<(Vec<LogEntry>, broadcast::Receiver<LogEntry>)> {
        let inner = lock(&self.inner);
        let receiver = inner.sender.as_ref()?.subscribe();
        Some((inner.buffer.clone(), receiver))
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        lock(&self.inner).buffer.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner)
            .sender
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Ends every subscription; receivers drain what they have, then see `Closed`
    pub fn close(&self) {
        lock(&self.inner).sender = None;
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).sender.is_none()
    }
}
