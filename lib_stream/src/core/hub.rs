//! # Multicast Stream Hub
//!
//! Shares one upstream line source among any number of local subscriptions
//! ("publish + refCount"):
//!
//! 1.  **Lazy connect**: the first `subscribe` for a `StreamKey` moves the entry to
//!     `Connecting` and opens the line source. Later subscribers attach to the
//!     running stream and only see records decoded after they attached.
//! 2.  **Zero-copy fan-out**: each decoded record is wrapped in an `Arc` once and
//!     offered to every attached subscription's `BackpressureBuffer`. Buffers never
//!     block, so a slow consumer cannot stall the shared read loop.
//! 3.  **Ref-counted teardown**: when the last subscription detaches (cancel or
//!     overflow) the line source is cancelled and the entry ends `Cancelled`.
//! 4.  **Terminal delivery**: completion and failures are resolved once per stream
//!     through its `ErrorPolicy` and delivered to every attached subscription
//!     exactly once, after which all of them are detached.
//!
//! Every transition happens under one mutex over the entry map, which is the
//! single writer for all stream states.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::core::buffer::{Admission, BackpressureBuffer, BackpressureStrategy, BufferStats, Delivery};
use crate::core::policy::PolicyAction;
use crate::core::source::{LineEvent, LineSourceHandle, LineTransport};
use crate::error::{StreamError, TransportError};
use crate::record::{RecordDecoder, SensorRecord};
use crate::request::{StreamKey, StreamRequest};

/// Shared, immutable record as delivered to subscribers.
pub type RecordRef = Arc<SensorRecord>;

/// Default capacity of the channel between a line source and its hub driver.
pub const DEFAULT_LINE_CAPACITY: usize = 256;

/// Lifecycle of one logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    NotStarted,
    Connecting,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl StreamState {
    /// A connection is open in these states.
    pub fn is_live(&self) -> bool {
        matches!(self, StreamState::Connecting | StreamState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Completed | StreamState::Failed | StreamState::Cancelled)
    }
}

/// Per-subscription buffering choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub strategy: BackpressureStrategy,
    /// Demand window; see `BackpressureBuffer`.
    pub capacity: usize,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            strategy: BackpressureStrategy::Buffer,
            capacity: 1,
        }
    }
}

impl SubscribeOptions {
    pub fn new(strategy: BackpressureStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

struct Attached {
    id: u64,
    buffer: Arc<BackpressureBuffer<RecordRef>>,
}

struct StreamEntry {
    state: StreamState,
    /// Bumped on every (re)open; driver events from older generations are ignored.
    generation: u64,
    /// Request currently feeding the stream. Replaced on `Resume`.
    request: StreamRequest,
    subscribers: Vec<Attached>,
    source: Option<LineSourceHandle>,
    opens: u64,
}

impl StreamEntry {
    fn new(request: StreamRequest) -> Self {
        Self {
            state: StreamState::NotStarted,
            generation: 0,
            request,
            subscribers: Vec::new(),
            source: None,
            opens: 0,
        }
    }

    /// Closes the upstream connection, if one is open. Runs at most once per open.
    fn close_source(&mut self) {
        if let Some(source) = self.source.take() {
            source.cancel();
        }
    }
}

enum HubEvent {
    Connected,
    Record(RecordRef),
    Completed,
    Failed(StreamError),
}

struct HubInner {
    transport: Arc<dyn LineTransport>,
    decoder: Arc<dyn RecordDecoder>,
    streams: Mutex<HashMap<StreamKey, StreamEntry>>,
    next_id: AtomicU64,
    line_capacity: usize,
}

/// # Stream Hub
///
/// Cheap to clone; all clones share the same stream arena. `subscribe` must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct StreamHub {
    inner: Arc<HubInner>,
}

impl StreamHub {
    pub fn new(transport: Arc<dyn LineTransport>, decoder: Arc<dyn RecordDecoder>) -> Self {
        Self::with_line_capacity(transport, decoder, DEFAULT_LINE_CAPACITY)
    }

    pub fn with_line_capacity(
        transport: Arc<dyn LineTransport>,
        decoder: Arc<dyn RecordDecoder>,
        line_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                transport,
                decoder,
                streams: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                line_capacity: line_capacity.max(1),
            }),
        }
    }

    /// Attaches a new subscription, opening the upstream if this is the first one.
    pub fn subscribe(&self, request: &StreamRequest, options: SubscribeOptions) -> Subscription {
        let key = request.key();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let buffer = Arc::new(BackpressureBuffer::new(options.strategy, options.capacity));

        {
            let mut streams = self.inner.lock();
            let entry = streams
                .entry(key.clone())
                .or_insert_with(|| StreamEntry::new(request.clone()));

            entry.subscribers.push(Attached {
                id,
                buffer: Arc::clone(&buffer),
            });

            if !entry.state.is_live() {
                entry.request = request.clone();
                self.inner.open(&key, entry);
            }
            log::info!(
                "Subscription {} attached to {} ({} active, strategy {})",
                id,
                key,
                entry.subscribers.len(),
                options.strategy
            );
        }

        Subscription {
            id,
            key,
            buffer,
            hub: self.clone(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Current state of the stream a request maps to.
    pub fn state(&self, request: &StreamRequest) -> StreamState {
        self.inner
            .lock()
            .get(&request.key())
            .map(|entry| entry.state)
            .unwrap_or(StreamState::NotStarted)
    }

    /// Number of subscriptions currently attached to the stream.
    pub fn subscriber_count(&self, request: &StreamRequest) -> usize {
        self.inner
            .lock()
            .get(&request.key())
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// How many times an upstream connection was opened for this stream.
    pub fn open_count(&self, request: &StreamRequest) -> u64 {
        self.inner
            .lock()
            .get(&request.key())
            .map(|entry| entry.opens)
            .unwrap_or(0)
    }

    /// Cancels every live stream and all of its subscriptions.
    pub fn shutdown(&self) {
        let mut streams = self.inner.lock();
        for (key, entry) in streams.iter_mut() {
            if entry.state.is_live() {
                entry.close_source();
                for sub in entry.subscribers.drain(..) {
                    sub.buffer.cancel();
                }
                entry.state = StreamState::Cancelled;
                log::info!("Stream {} cancelled by shutdown", key);
            }
        }
    }

    fn detach(&self, key: &StreamKey, id: u64) {
        let mut streams = self.inner.lock();
        let Some(entry) = streams.get_mut(key) else {
            return;
        };
        let before = entry.subscribers.len();
        entry.subscribers.retain(|sub| sub.id != id);
        if entry.subscribers.len() == before {
            return;
        }
        log::debug!("Subscription {} detached from {}", id, key);
        if entry.subscribers.is_empty() && entry.state.is_live() {
            entry.close_source();
            entry.state = StreamState::Cancelled;
            log::info!("Last subscriber left {}; upstream cancelled", key);
        }
    }
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<StreamKey, StreamEntry>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens `entry.request` and spawns its driver. Caller holds the map lock.
    fn open(self: &Arc<Self>, key: &StreamKey, entry: &mut StreamEntry) {
        entry.close_source();
        entry.generation += 1;
        entry.state = StreamState::Connecting;
        entry.opens += 1;

        let (tx, rx) = mpsc::channel(self.line_capacity);
        log::info!("Opening upstream {} {}", entry.request.method().as_str(), entry.request.url());
        entry.source = Some(self.transport.open(&entry.request, tx));

        let inner = Arc::clone(self);
        let key = key.clone();
        let generation = entry.generation;
        tokio::spawn(async move { inner.drive(key, generation, rx).await });
    }

    /// Reads one line source, decodes outside the lock, applies events under it.
    async fn drive(self: Arc<Self>, key: StreamKey, generation: u64, mut rx: mpsc::Receiver<LineEvent>) {
        while let Some(event) = rx.recv().await {
            let event = match event {
                LineEvent::Connected => HubEvent::Connected,
                LineEvent::Line(line) => match self.decoder.decode(&line) {
                    Ok(record) => HubEvent::Record(Arc::new(record)),
                    Err(e) => {
                        log::warn!("Undecodable line on {}: {}", key, e);
                        HubEvent::Failed(e.into())
                    }
                },
                LineEvent::Completed => HubEvent::Completed,
                LineEvent::Failed(e) => HubEvent::Failed(e.into()),
            };
            if !self.apply(&key, generation, event) {
                return;
            }
        }
        // The transport dropped its sender without a terminal event.
        self.apply(
            &key,
            generation,
            HubEvent::Failed(TransportError::Read("line source closed unexpectedly".into()).into()),
        );
    }

    /// Returns `false` once this generation no longer needs events.
    fn apply(self: &Arc<Self>, key: &StreamKey, generation: u64, event: HubEvent) -> bool {
        let mut streams = self.lock();
        let Some(entry) = streams.get_mut(key) else {
            return false;
        };
        if entry.generation != generation || !entry.state.is_live() {
            return false;
        }

        match event {
            HubEvent::Connected => {
                if entry.state == StreamState::Connecting {
                    entry.state = StreamState::Active;
                    log::info!("Upstream {} connected", key);
                }
                true
            }
            HubEvent::Record(record) => {
                entry.state = StreamState::Active;
                Self::fan_out(key, entry, record);
                if entry.subscribers.is_empty() {
                    entry.close_source();
                    entry.state = StreamState::Cancelled;
                    log::info!("No subscribers left on {}; upstream cancelled", key);
                    return false;
                }
                true
            }
            HubEvent::Completed => {
                entry.close_source();
                for sub in entry.subscribers.drain(..) {
                    sub.buffer.complete();
                }
                entry.state = StreamState::Completed;
                log::info!("Upstream {} completed", key);
                false
            }
            HubEvent::Failed(error) => {
                let action = entry.request.policy().resolve(error);
                match action {
                    PolicyAction::Fail(error) => {
                        entry.close_source();
                        for sub in entry.subscribers.drain(..) {
                            sub.buffer.fail(error.clone());
                        }
                        entry.state = StreamState::Failed;
                        log::error!("Upstream {} failed: {}", key, error);
                    }
                    PolicyAction::Substitute(record) => {
                        entry.close_source();
                        for sub in entry.subscribers.drain(..) {
                            sub.buffer.complete_with(Arc::clone(&record));
                        }
                        entry.state = StreamState::Completed;
                    }
                    PolicyAction::Resume(fallback) => {
                        entry.request = fallback;
                        self.open(key, entry);
                    }
                }
                false
            }
        }
    }

    fn fan_out(key: &StreamKey, entry: &mut StreamEntry, record: RecordRef) {
        entry.subscribers.retain(|sub| match sub.buffer.offer(Arc::clone(&record)) {
            Admission::Queued | Admission::Replaced | Admission::Dropped => true,
            Admission::Overflowed => {
                log::warn!("Subscription {} on {} overflowed and was detached", sub.id, key);
                false
            }
            Admission::Closed => false,
        });
    }
}

/// # Subscription
///
/// One consumer's attachment to a stream. Dropping it cancels it.
pub struct Subscription {
    id: u64,
    key: StreamKey,
    buffer: Arc<BackpressureBuffer<RecordRef>>,
    hub: StreamHub,
    cancelled: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn strategy(&self) -> BackpressureStrategy {
        self.buffer.strategy()
    }

    /// Waits for the next record or the terminal signal.
    pub async fn next(&self) -> Delivery<RecordRef> {
        self.buffer.next().await
    }

    pub fn try_next(&self) -> Option<Delivery<RecordRef>> {
        self.buffer.try_next()
    }

    pub fn demand(&self) -> usize {
        self.buffer.demand()
    }

    pub fn pending(&self) -> usize {
        self.buffer.pending()
    }

    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    /// Detaches from the hub and discards buffered records. Returns `false` if
    /// this subscription was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.buffer.cancel();
        self.hub.detach(&self.key, self.id);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
