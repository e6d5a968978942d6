//! Outbound dispatch queue.
//!
//! Every line the bot sends goes through this FIFO. Any number of producers
//! enqueue without blocking; the single consumer is the sender task of the
//! current connection, which holds the receiving end for its lifetime and
//! releases it when cancelled so the next connection's sender can take over.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Multi-producer, single-consumer line queue.
#[derive(Clone, Debug)]
pub struct DispatchQueue {
    tx: UnboundedSender<String>,
    rx: Arc<Mutex<UnboundedReceiver<String>>>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Append a raw line (without terminator).
    pub fn enqueue(&self, line: impl Into<String>) {
        // The queue owns its receiver, so the channel cannot be closed.
        let _ = self.tx.send(line.into());
    }

    /// Exclusive access to the consuming end, held by a sender task.
    pub(crate) async fn consumer(&self) -> OwnedMutexGuard<UnboundedReceiver<String>> {
        self.rx.clone().lock_owned().await
    }

    /// Pop the next line if one is ready and no sender task currently owns
    /// the queue.
    pub fn try_dequeue(&self) -> Option<String> {
        let mut rx = self.rx.try_lock().ok()?;
        match rx.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Drain every pending line, waiting for the consumer end if a sender
    /// task is still releasing it. Returns the discarded lines.
    pub async fn clear(&self) -> Vec<String> {
        let mut rx = self.consumer().await;
        let mut drained = Vec::new();
        while let Ok(line) = rx.try_recv() {
            drained.push(line);
        }
        drained
    }
}
