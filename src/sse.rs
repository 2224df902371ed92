use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

const NO_SUBSCRIBER: u64 = 0;
const KEEP_ALIVE_FRAME: &[u8] = b":\n\n";

/// Registry of open event-stream connections, keyed by connection id.
///
/// At most one of them is the tracked subscription; a newer subscriber
/// displaces the older one, which stays open but is no longer addressed by
/// shutdown notices.
#[derive(Debug)]
pub struct SseChannels {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    subscriber: AtomicU64,
}

impl Default for SseChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl SseChannels {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            open: Mutex::new(HashMap::new()),
            subscriber: AtomicU64::new(NO_SUBSCRIBER),
        }
    }

    /// Registers a new connection and returns its id with the payload stream
    /// that feeds it.
    pub fn open(self: &Arc<Self>) -> (u64, SseStream) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        self.open.lock().insert(id, tx);
        debug!(connection_id = id, "event stream opened");

        let guard = Registration {
            id,
            channels: Arc::clone(self),
        };
        (id, SseStream { rx, guard })
    }

    pub fn is_open(&self, id: u64) -> bool {
        self.open.lock().contains_key(&id)
    }

    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }

    /// Sends one `data:` frame and closes the connection once it is flushed.
    /// Returns false when the connection is already gone.
    pub fn push_and_close(&self, id: u64, payload: String) -> bool {
        let Some(tx) = self.open.lock().remove(&id) else {
            return false;
        };
        self.clear_subscriber_if(id);
        tx.send(payload).is_ok()
    }

    pub fn close_all(&self) {
        let drained = std::mem::take(&mut *self.open.lock());
        if !drained.is_empty() {
            debug!(count = drained.len(), "closing event streams");
        }
        self.subscriber.store(NO_SUBSCRIBER, Ordering::Release);
    }

    pub fn set_subscriber(&self, id: u64) {
        let previous = self.subscriber.swap(id, Ordering::AcqRel);
        if previous != NO_SUBSCRIBER && previous != id {
            debug!(previous, current = id, "event subscriber displaced");
        }
    }

    /// The tracked subscription, if its connection is still open.
    pub fn subscriber(&self) -> Option<u64> {
        let id = self.subscriber.load(Ordering::Acquire);
        (id != NO_SUBSCRIBER && self.is_open(id)).then_some(id)
    }

    fn unregister(&self, id: u64) {
        if self.open.lock().remove(&id).is_some() {
            debug!(connection_id = id, "event stream disconnected");
        }
        self.clear_subscriber_if(id);
    }

    fn clear_subscriber_if(&self, id: u64) {
        let _ = self.subscriber.compare_exchange(
            id,
            NO_SUBSCRIBER,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

struct Registration {
    id: u64,
    channels: Arc<SseChannels>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.channels.unregister(self.id);
    }
}

/// Payloads for one connection. Dropping it (client went away) unregisters
/// the connection.
pub struct SseStream {
    rx: mpsc::UnboundedReceiver<String>,
    guard: Registration,
}

impl SseStream {
    pub fn id(&self) -> u64 {
        self.guard.id
    }

    pub async fn next_payload(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    fn into_frames(
        self,
        keep_alive: Duration,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        // `interval_at` panics on a zero period.
        let keep_alive = keep_alive.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(Instant::now() + keep_alive, keep_alive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        stream::unfold((self, ticker), |(mut this, mut ticker)| async move {
            let frame = tokio::select! {
                payload = this.rx.recv() => data_frame(&payload?),
                _ = ticker.tick() => Bytes::from_static(KEEP_ALIVE_FRAME),
            };
            Some((Ok(frame), (this, ticker)))
        })
    }

    /// The event-stream response: status 200, `Connection: keep-alive`,
    /// `Content-Type: text/event-stream`, `Cache-Control: no-cache`.
    pub fn into_response(self, keep_alive: Duration) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Body::from_stream(self.into_frames(keep_alive)),
        )
            .into_response()
    }
}

/// One `data:` line per payload, empty payloads included. Callers keep line
/// breaks out of `payload`.
fn data_frame(payload: &str) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}
