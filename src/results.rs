use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A connection-addressed payload waiting to be pushed over SSE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResult {
    pub connection_id: u64,
    pub payload: String,
}

/// FIFO of dialog results produced on the UI thread and consumed by the
/// gateway loop.
#[derive(Debug, Default)]
pub struct ResultQueue {
    entries: Mutex<VecDeque<PendingResult>>,
    wakeup: Notify,
}

impl ResultQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, connection_id: u64, payload: impl Into<String>) {
        self.entries.lock().push_back(PendingResult {
            connection_id,
            payload: payload.into(),
        });
        self.wakeup.notify_one();
    }

    /// Takes every queued entry in enqueue order.
    pub fn drain(&self) -> Vec<PendingResult> {
        let mut entries = self.entries.lock();
        std::mem::take(&mut *entries).into()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Waits for a push, or for `timeout` to elapse, whichever is first.
    pub(crate) async fn wait(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.wakeup.notified()).await;
    }

    pub(crate) fn wake(&self) {
        self.wakeup.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    #[test]
    fn drain_preserves_enqueue_order() {
        let queue = ResultQueue::new();
        queue.push(3, "/tmp/a.txt");
        queue.push(1, "");
        queue.push(2, "stop");

        let drained = queue.drain();

        let ids = drained.iter().map(|entry| entry.connection_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(drained[1].payload, "");
        assert!(queue.is_empty());
    }

    #[test]
    fn push_from_another_thread_is_visible() {
        let queue = Arc::new(ResultQueue::new());
        let producer = Arc::clone(&queue);
        std::thread::spawn(move || producer.push(7, "saved"))
            .join()
            .expect("producer thread");

        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.drain(),
            vec![PendingResult {
                connection_id: 7,
                payload: "saved".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn wait_returns_early_on_push() {
        let queue = Arc::new(ResultQueue::new());
        let producer = Arc::clone(&queue);
        let started = Instant::now();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(1, "x");
        });

        queue.wait(Duration::from_secs(5)).await;

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(queue.len(), 1);
    }
}
