//! Event Store
//!
//! Resumability for server-to-client SSE streams. Every message a transport
//! sends on its standalone stream is stored first and gets an event id; a
//! client that reconnects with `Last-Event-ID` is replayed everything stored
//! after that id before live delivery resumes.
//!
//! Event ids have the form `{stream_id}_{seq}`, so the owning stream can be
//! recovered from the id alone.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Identifier of a stored event, sent as the SSE `id:` field.
pub type EventId = String;

/// Errors from an event store backend.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// The id was never issued or has been evicted.
    #[error("unknown event id: {0}")]
    UnknownEvent(String),

    /// The id does not have the `{stream_id}_{seq}` shape.
    #[error("malformed event id: {0}")]
    MalformedEventId(String),

    /// Storage failed.
    #[error("event store backend error: {0}")]
    Backend(String),
}

/// One stored server-to-client message.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: EventId,
    pub message: Value,
}

/// Events to resend to a reconnecting client.
#[derive(Debug, Clone)]
pub struct Replay {
    /// Stream the replayed events belong to.
    pub stream_id: String,

    /// Events after the requested id, oldest first.
    pub events: Vec<StoredEvent>,
}

/// Storage backend for resumable streams.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Store a message for a stream and return its event id.
    async fn store_event(&self, stream_id: &str, message: &Value) -> Result<EventId, EventStoreError>;

    /// Fetch every event on the same stream stored after `last_event_id`.
    async fn replay_events_after(&self, last_event_id: &str) -> Result<Replay, EventStoreError>;

    /// Drop everything stored for a stream.
    async fn forget_stream(&self, stream_id: &str) -> Result<(), EventStoreError>;
}

/// Split an event id into its stream id and sequence number.
pub fn parse_event_id(event_id: &str) -> Result<(&str, u64), EventStoreError> {
    let malformed = || EventStoreError::MalformedEventId(event_id.to_string());

    let (stream_id, seq) = event_id.rsplit_once('_').ok_or_else(malformed)?;
    if stream_id.is_empty() {
        return Err(malformed());
    }
    let seq = seq.parse::<u64>().map_err(|_| malformed())?;
    Ok((stream_id, seq))
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    stream_id: String,
    event: StoredEvent,
}

/// Bounded in-memory event store shared by all sessions.
///
/// Holds at most `capacity` events across all streams; the oldest are evicted
/// first.
#[derive(Debug)]
pub struct InMemoryEventStore {
    capacity: usize,
    next_seq: AtomicU64,
    events: Mutex<VecDeque<Entry>>,
}

impl InMemoryEventStore {
    /// Default number of retained events.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Create a store retaining at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            next_seq: AtomicU64::new(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    /// Maximum number of retained events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events currently retained.
    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    /// Returns true if nothing is retained.
    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(&self, stream_id: &str, message: &Value) -> Result<EventId, EventStoreError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}_{}", stream_id, seq);

        let mut events = self.events.lock().await;
        events.push_back(Entry {
            seq,
            stream_id: stream_id.to_string(),
            event: StoredEvent {
                id: id.clone(),
                message: message.clone(),
            },
        });

        while events.len() > self.capacity {
            if let Some(evicted) = events.pop_front() {
                tracing::trace!(event_id = %evicted.event.id, "Evicted event from store");
            }
        }

        Ok(id)
    }

    async fn replay_events_after(&self, last_event_id: &str) -> Result<Replay, EventStoreError> {
        let (stream_id, last_seq) = parse_event_id(last_event_id)?;

        let events = self.events.lock().await;
        let known = events
            .iter()
            .any(|e| e.seq == last_seq && e.stream_id == stream_id);
        if !known {
            return Err(EventStoreError::UnknownEvent(last_event_id.to_string()));
        }

        let replayed = events
            .iter()
            .filter(|e| e.stream_id == stream_id && e.seq > last_seq)
            .map(|e| e.event.clone())
            .collect();

        Ok(Replay {
            stream_id: stream_id.to_string(),
            events: replayed,
        })
    }

    async fn forget_stream(&self, stream_id: &str) -> Result<(), EventStoreError> {
        let mut events = self.events.lock().await;
        let before = events.len();
        events.retain(|e| e.stream_id != stream_id);

        tracing::debug!(
            stream_id = %stream_id,
            dropped = before - events.len(),
            "Forgot stream events"
        );
        Ok(())
    }
}
