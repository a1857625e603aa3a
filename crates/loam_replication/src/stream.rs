//! Chunk stream contract.
//!
//! The replicator is not an HTTP client; it consumes byte chunks from
//! whatever response handler the blob store integration provides. The
//! contract is a single-producer publisher with explicit request-n
//! backpressure and terminal signals. Publishers serialize subscriber
//! callbacks and emit nothing beyond the requested demand.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;

/// Demand and cancellation handle given to a subscriber.
pub trait ChunkSubscription: Send + Sync {
    /// Requests `n` more chunks.
    fn request(&self, n: u64);

    /// Cancels the stream; no further chunks are delivered.
    fn cancel(&self);
}

/// Receives chunks and terminal signals from a publisher.
pub trait ChunkSubscriber: Send + Sync {
    /// Hands over the subscription before any chunk is delivered.
    fn on_subscribe(&self, subscription: Arc<dyn ChunkSubscription>);

    /// Delivers one chunk. Called at most once per requested unit of
    /// demand.
    fn on_next(&self, chunk: &[u8]);

    /// Signals that every chunk was delivered.
    fn on_complete(&self);

    /// Signals that the source failed; no further chunks follow.
    fn on_error(&self, message: &str);
}

/// Produces a stream of byte chunks for one subscriber.
pub trait ChunkPublisher {
    /// Subscribes and starts the stream.
    fn subscribe(&self, subscriber: Arc<dyn ChunkSubscriber>);
}

/// A publisher that serves pre-buffered chunks from a background
/// thread, honoring demand.
///
/// Used by tests and by replica bootstrap from an already-buffered
/// payload. An injected failure replaces the chunk at the configured
/// index (or the completion signal) with `on_error`.
#[derive(Debug, Clone, Default)]
pub struct StaticChunkPublisher {
    chunks: Vec<Vec<u8>>,
    fail_after: Option<usize>,
}

impl StaticChunkPublisher {
    /// Creates a publisher serving the given chunks.
    #[must_use]
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            fail_after: None,
        }
    }

    /// Creates a publisher by splitting `payload` at the given chunk
    /// sizes. Any remainder becomes a final chunk.
    #[must_use]
    pub fn from_payload(payload: &[u8], chunk_sizes: &[usize]) -> Self {
        let mut chunks = Vec::new();
        let mut rest = payload;
        for &size in chunk_sizes {
            if rest.is_empty() {
                break;
            }
            let take = size.min(rest.len());
            chunks.push(rest[..take].to_vec());
            rest = &rest[take..];
        }
        if !rest.is_empty() {
            chunks.push(rest.to_vec());
        }
        Self::new(chunks)
    }

    /// Makes the stream fail after delivering `chunks` chunks.
    #[must_use]
    pub fn with_failure_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }
}

#[derive(Default)]
struct Demand {
    requested: u64,
    cancelled: bool,
}

#[derive(Default)]
struct DemandGate {
    state: Mutex<Demand>,
    available: Condvar,
}

struct StaticSubscription {
    gate: Arc<DemandGate>,
}

impl ChunkSubscription for StaticSubscription {
    fn request(&self, n: u64) {
        let mut demand = self.gate.state.lock();
        demand.requested = demand.requested.saturating_add(n);
        self.gate.available.notify_all();
    }

    fn cancel(&self) {
        self.gate.state.lock().cancelled = true;
        self.gate.available.notify_all();
    }
}

impl ChunkPublisher for StaticChunkPublisher {
    fn subscribe(&self, subscriber: Arc<dyn ChunkSubscriber>) {
        let gate = Arc::new(DemandGate::default());
        subscriber.on_subscribe(Arc::new(StaticSubscription {
            gate: Arc::clone(&gate),
        }));

        let chunks = self.chunks.clone();
        let fail_after = self.fail_after;
        thread::spawn(move || {
            for (index, chunk) in chunks.iter().enumerate() {
                if fail_after == Some(index) {
                    subscriber.on_error("injected stream failure");
                    return;
                }
                {
                    let mut demand = gate.state.lock();
                    while demand.requested == 0 && !demand.cancelled {
                        gate.available.wait(&mut demand);
                    }
                    if demand.cancelled {
                        return;
                    }
                    demand.requested -= 1;
                }
                subscriber.on_next(chunk);
            }
            if fail_after == Some(chunks.len()) {
                subscriber.on_error("injected stream failure");
            } else if !gate.state.lock().cancelled {
                subscriber.on_complete();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Chunk(Vec<u8>),
        Complete,
        Error(String),
    }

    struct Recorder {
        events: Mutex<Vec<Event>>,
        subscription: Mutex<Option<Arc<dyn ChunkSubscription>>>,
        cancel_after: Option<usize>,
        finished: Condvar,
    }

    impl Recorder {
        fn new(cancel_after: Option<usize>) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                subscription: Mutex::new(None),
                cancel_after,
                finished: Condvar::new(),
            }
        }

        fn wait_for_events(&self, at_least: usize) -> usize {
            let mut events = self.events.lock();
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while events.len() < at_least {
                if self
                    .finished
                    .wait_until(&mut events, deadline)
                    .timed_out()
                {
                    break;
                }
            }
            events.len()
        }

        fn take_events(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl ChunkSubscriber for Recorder {
        fn on_subscribe(&self, subscription: Arc<dyn ChunkSubscription>) {
            *self.subscription.lock() = Some(Arc::clone(&subscription));
            subscription.request(1);
        }

        fn on_next(&self, chunk: &[u8]) {
            let mut events = self.events.lock();
            events.push(Event::Chunk(chunk.to_vec()));
            let delivered = events.len();
            drop(events);
            self.finished.notify_all();

            let subscription = self.subscription.lock().clone();
            if let Some(subscription) = subscription {
                if self.cancel_after == Some(delivered) {
                    subscription.cancel();
                } else {
                    subscription.request(1);
                }
            }
        }

        fn on_complete(&self) {
            self.events.lock().push(Event::Complete);
            self.finished.notify_all();
        }

        fn on_error(&self, message: &str) {
            self.events.lock().push(Event::Error(message.to_string()));
            self.finished.notify_all();
        }
    }

    #[test]
    fn delivers_chunks_in_order_then_completes() {
        let publisher =
            StaticChunkPublisher::new(vec![b"ab".to_vec(), b"cd".to_vec(), b"e".to_vec()]);
        let recorder = Arc::new(Recorder::new(None));
        publisher.subscribe(Arc::clone(&recorder) as Arc<dyn ChunkSubscriber>);

        recorder.wait_for_events(4);
        assert_eq!(
            recorder.take_events(),
            vec![
                Event::Chunk(b"ab".to_vec()),
                Event::Chunk(b"cd".to_vec()),
                Event::Chunk(b"e".to_vec()),
                Event::Complete,
            ]
        );
    }

    #[test]
    fn from_payload_splits_and_keeps_remainder() {
        let publisher = StaticChunkPublisher::from_payload(b"abcdefgh", &[3, 2]);
        let recorder = Arc::new(Recorder::new(None));
        publisher.subscribe(Arc::clone(&recorder) as Arc<dyn ChunkSubscriber>);

        recorder.wait_for_events(4);
        assert_eq!(
            recorder.take_events(),
            vec![
                Event::Chunk(b"abc".to_vec()),
                Event::Chunk(b"de".to_vec()),
                Event::Chunk(b"fgh".to_vec()),
                Event::Complete,
            ]
        );
    }

    #[test]
    fn injected_failure_replaces_the_chunk() {
        let publisher = StaticChunkPublisher::new(vec![b"ab".to_vec(), b"cd".to_vec()])
            .with_failure_after(1);
        let recorder = Arc::new(Recorder::new(None));
        publisher.subscribe(Arc::clone(&recorder) as Arc<dyn ChunkSubscriber>);

        recorder.wait_for_events(2);
        assert_eq!(
            recorder.take_events(),
            vec![
                Event::Chunk(b"ab".to_vec()),
                Event::Error("injected stream failure".to_string()),
            ]
        );
    }

    #[test]
    fn cancellation_stops_delivery() {
        let publisher =
            StaticChunkPublisher::new(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        let recorder = Arc::new(Recorder::new(Some(1)));
        publisher.subscribe(Arc::clone(&recorder) as Arc<dyn ChunkSubscriber>);

        recorder.wait_for_events(1);
        // Give the publisher a moment to (incorrectly) deliver more.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(recorder.take_events(), vec![Event::Chunk(b"a".to_vec())]);
    }
}
