//! Bounded queues between pipeline stages.

use crate::Metrics;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Why an item could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendError {
    /// The consuming stage has stopped.
    Closed,
    /// Shutdown was requested while waiting for room.
    Cancelled,
}

/// Creates a queue holding at most `max_depth` items.
pub(crate) fn queue<T>(
    stage: &'static str,
    max_depth: usize,
    poll: Duration,
) -> (QueueSender<T>, QueueReceiver<T>) {
    let max_depth = max_depth.max(1);
    let (tx, rx) = mpsc::channel(max_depth);
    (QueueSender { stage, poll, max_depth, tx }, QueueReceiver { stage, rx })
}

/// Producer half of a stage queue.
#[derive(Debug)]
pub(crate) struct QueueSender<T> {
    stage: &'static str,
    poll: Duration,
    max_depth: usize,
    tx: mpsc::Sender<T>,
}

impl<T> QueueSender<T> {
    /// Enqueues `item`, pausing in steps of the poll interval while the queue is full.
    pub(crate) async fn send(&self, mut item: T, cancel: &CancellationToken) -> Result<(), SendError> {
        let mut throttled = false;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    Metrics::set_queue_depth(self.stage, self.depth());
                    return Ok(());
                }
                Err(TrySendError::Closed(_)) => return Err(SendError::Closed),
                Err(TrySendError::Full(rejected)) => {
                    item = rejected;
                    if !throttled {
                        throttled = true;
                        Metrics::record_throttled(self.stage);
                        trace!(target: "ingest::pipeline", stage = self.stage, "Queue full, pausing");
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SendError::Cancelled),
                        _ = tokio::time::sleep(self.poll) => {}
                    }
                }
            }
        }
    }

    /// Returns the number of queued items.
    pub(crate) fn depth(&self) -> usize {
        self.max_depth - self.tx.capacity()
    }
}

/// Consumer half of a stage queue.
#[derive(Debug)]
pub(crate) struct QueueReceiver<T> {
    stage: &'static str,
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Receives the next item, or `None` once the producer finished and the queue is drained.
    pub(crate) async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        Metrics::set_queue_depth(self.stage, self.rx.len());
        item
    }

    /// Returns the number of queued items.
    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[tokio::test(start_paused = true)]
    async fn test_producer_pauses_at_max_depth_and_resumes() {
        let (tx, mut rx) = queue::<u64>("transactions", 3, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let sent = Arc::new(AtomicUsize::new(0));

        let producer = {
            let sent = Arc::clone(&sent);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for i in 0..10 {
                    tx.send(i, &cancel).await.unwrap();
                    sent.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 3);
        assert_eq!(rx.depth(), 3);

        assert_eq!(rx.recv().await, Some(0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sent.load(Ordering::SeqCst), 4);
        assert_eq!(rx.depth(), 3);

        let mut rest = Vec::new();
        while let Some(item) = rx.recv().await {
            rest.push(item);
        }
        assert_eq!(rest, (1..10).collect::<Vec<_>>());
        producer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_blocked_producer() {
        let (tx, _rx) = queue::<u64>("receipts", 1, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        tx.send(1, &cancel).await.unwrap();

        let blocked = {
            let cancel = cancel.clone();
            tokio::spawn(async move { tx.send(2, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        assert_eq!(blocked.await.unwrap(), Err(SendError::Cancelled));
    }

    #[tokio::test]
    async fn test_send_fails_once_consumer_dropped() {
        let (tx, rx) = queue::<u64>("headers", 2, Duration::from_millis(1));
        drop(rx);
        assert_eq!(tx.send(1, &CancellationToken::new()).await, Err(SendError::Closed));
    }
}
