//! # Consumption Shapes
//!
//! Thin state trackers over a `Subscription`:
//!
//! - **`Sequence`** (0..N): every record until completion or error, optionally
//!   capped with `take(n)`.
//! - **`Optional`** (0..1): the first record, or an empty completion.
//! - **`Single`** (1): the first record; an empty upstream yields `None`.
//! - **`Completion`** (0): success or failure only.
//!
//! Each `subscribe` starts a delivery worker on the blocking pool, so callbacks
//! may block (sleep, do I/O) without stalling the runtime, the hub's read loop,
//! or sibling subscriptions. A shared latch guarantees exactly one terminal
//! signal per subscription: complete, error, or the cancel acknowledgement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::core::buffer::Delivery;
use crate::core::hub::{RecordRef, Subscription};
use crate::core::observer::{NoopObserver, SubscriptionObserver};
use crate::error::StreamError;

struct TerminalLatch {
    claimed: AtomicBool,
    settled: watch::Sender<bool>,
}

impl TerminalLatch {
    fn new() -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            claimed: AtomicBool::new(false),
            settled,
        }
    }

    /// Wins the right to emit the terminal signal. Only the first caller gets `true`.
    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Terminal callbacks have run.
    fn settle(&self) {
        self.settled.send_replace(true);
    }
}

/// # Cancel Handle
///
/// Returned by every `subscribe`. Cancelling is idempotent and has no effect
/// once the subscription already completed or failed.
#[derive(Clone)]
pub struct CancelHandle {
    subscription: Arc<Subscription>,
    latch: Arc<TerminalLatch>,
    observer: Arc<dyn SubscriptionObserver>,
}

impl CancelHandle {
    pub fn id(&self) -> u64 {
        self.subscription.id()
    }

    /// Returns `true` only for the call that actually cancelled.
    pub fn cancel(&self) -> bool {
        if !self.latch.claim() {
            return false;
        }
        self.subscription.cancel();
        self.observer.on_cancel(self.subscription.id());
        self.latch.settle();
        true
    }

    /// True once a terminal signal was emitted (or cancel acknowledged).
    pub fn is_terminated(&self) -> bool {
        *self.latch.settled.borrow()
    }

    /// Waits until the subscription reached its terminal signal.
    pub async fn wait(&self) {
        let mut rx = self.latch.settled.subscribe();
        // The sender lives inside `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|settled| *settled).await;
    }
}

enum Step {
    Continue,
    Stop,
}

/// Runs `step` for each delivery on a blocking-pool thread until it stops.
///
/// A cancel that did not come through the `CancelHandle` (hub shutdown) is
/// acknowledged here, so the subscriber still gets its terminal signal.
fn spawn_delivery<F>(
    subscription: Arc<Subscription>,
    latch: Arc<TerminalLatch>,
    observer: Arc<dyn SubscriptionObserver>,
    mut step: F,
) where
    F: FnMut(Delivery<RecordRef>) -> Step + Send + 'static,
{
    let handle = Handle::current();
    tokio::task::spawn_blocking(move || loop {
        let delivery = handle.block_on(subscription.next());
        if matches!(delivery, Delivery::Cancelled) {
            if latch.claim() {
                subscription.cancel();
                observer.on_cancel(subscription.id());
                latch.settle();
            }
            break;
        }
        if latch.is_claimed() {
            break;
        }
        if let Step::Stop = step(delivery) {
            break;
        }
    });
}

fn handle_for(
    subscription: Subscription,
    observer: Arc<dyn SubscriptionObserver>,
) -> (Arc<Subscription>, Arc<TerminalLatch>, CancelHandle) {
    let subscription = Arc::new(subscription);
    let latch = Arc::new(TerminalLatch::new());
    observer.on_subscribe(subscription.id());
    let handle = CancelHandle {
        subscription: Arc::clone(&subscription),
        latch: Arc::clone(&latch),
        observer,
    };
    (subscription, latch, handle)
}

/// 0..N records.
pub struct Sequence {
    subscription: Subscription,
    observer: Arc<dyn SubscriptionObserver>,
    limit: Option<usize>,
}

impl Sequence {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            observer: Arc::new(NoopObserver),
            limit: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SubscriptionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Completes after `n` records and releases the subscription.
    pub fn take(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn subscribe<N, E, C>(self, mut on_next: N, on_error: E, on_complete: C) -> CancelHandle
    where
        N: FnMut(RecordRef) + Send + 'static,
        E: FnOnce(StreamError) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let limit = self.limit;
        let observer = Arc::clone(&self.observer);
        let (subscription, latch, handle) = handle_for(self.subscription, self.observer);
        let id = subscription.id();

        if limit == Some(0) {
            if latch.claim() {
                subscription.cancel();
                observer.on_complete(id);
                on_complete();
                latch.settle();
            }
            return handle;
        }

        let mut on_error = Some(on_error);
        let mut on_complete = Some(on_complete);
        let mut seen = 0usize;
        let worker_sub = Arc::clone(&subscription);
        let worker_latch = Arc::clone(&latch);
        spawn_delivery(subscription, latch, Arc::clone(&observer), move |delivery| match delivery {
            Delivery::Item(record) => {
                observer.on_next(id, &record);
                on_next(record);
                seen += 1;
                if limit == Some(seen) {
                    if worker_latch.claim() {
                        worker_sub.cancel();
                        observer.on_complete(id);
                        if let Some(f) = on_complete.take() {
                            f();
                        }
                        worker_latch.settle();
                    }
                    return Step::Stop;
                }
                Step::Continue
            }
            Delivery::Completed => {
                if worker_latch.claim() {
                    observer.on_complete(id);
                    if let Some(f) = on_complete.take() {
                        f();
                    }
                    worker_latch.settle();
                }
                Step::Stop
            }
            Delivery::Failed(error) => {
                if worker_latch.claim() {
                    observer.on_error(id, &error);
                    if let Some(f) = on_error.take() {
                        f(error);
                    }
                    worker_latch.settle();
                }
                Step::Stop
            }
            Delivery::Cancelled => Step::Stop,
        });
        handle
    }
}

/// 0..1 records.
pub struct Optional {
    subscription: Subscription,
    observer: Arc<dyn SubscriptionObserver>,
}

impl Optional {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SubscriptionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// `on_next` runs at most once; `on_complete` follows it, or runs alone for an empty stream.
    pub fn subscribe<N, E, C>(self, on_next: N, on_error: E, on_complete: C) -> CancelHandle
    where
        N: FnOnce(RecordRef) + Send + 'static,
        E: FnOnce(StreamError) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let observer = Arc::clone(&self.observer);
        let (subscription, latch, handle) = handle_for(self.subscription, self.observer);
        let id = subscription.id();
        let mut callbacks = Some((on_next, on_error, on_complete));
        let worker_sub = Arc::clone(&subscription);
        let worker_latch = Arc::clone(&latch);

        spawn_delivery(subscription, latch, Arc::clone(&observer), move |delivery| {
            if !worker_latch.claim() {
                return Step::Stop;
            }
            if let Some((on_next, on_error, on_complete)) = callbacks.take() {
                match delivery {
                    Delivery::Item(record) => {
                        worker_sub.cancel();
                        observer.on_next(id, &record);
                        on_next(record);
                        observer.on_complete(id);
                        on_complete();
                    }
                    Delivery::Completed => {
                        observer.on_complete(id);
                        on_complete();
                    }
                    Delivery::Failed(error) => {
                        observer.on_error(id, &error);
                        on_error(error);
                    }
                    Delivery::Cancelled => {}
                }
            }
            worker_latch.settle();
            Step::Stop
        });
        handle
    }
}

/// Exactly one record, as promised by the endpoint.
pub struct Single {
    subscription: Subscription,
    observer: Arc<dyn SubscriptionObserver>,
}

impl Single {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SubscriptionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Receives the first record, or `None` if the upstream completed empty.
    /// Any records after the first are not observed.
    pub fn subscribe<S, E>(self, on_success_or_empty: S, on_error: E) -> CancelHandle
    where
        S: FnOnce(Option<RecordRef>) + Send + 'static,
        E: FnOnce(StreamError) + Send + 'static,
    {
        let observer = Arc::clone(&self.observer);
        let (subscription, latch, handle) = handle_for(self.subscription, self.observer);
        let id = subscription.id();
        let mut callbacks = Some((on_success_or_empty, on_error));
        let worker_sub = Arc::clone(&subscription);
        let worker_latch = Arc::clone(&latch);

        spawn_delivery(subscription, latch, Arc::clone(&observer), move |delivery| {
            if !worker_latch.claim() {
                return Step::Stop;
            }
            if let Some((on_success, on_error)) = callbacks.take() {
                match delivery {
                    Delivery::Item(record) => {
                        worker_sub.cancel();
                        observer.on_next(id, &record);
                        on_success(Some(record));
                        observer.on_complete(id);
                    }
                    Delivery::Completed => {
                        observer.on_complete(id);
                        on_success(None);
                    }
                    Delivery::Failed(error) => {
                        observer.on_error(id, &error);
                        on_error(error);
                    }
                    Delivery::Cancelled => {}
                }
            }
            worker_latch.settle();
            Step::Stop
        });
        handle
    }
}

/// No records, only success or failure.
pub struct Completion {
    subscription: Subscription,
    observer: Arc<dyn SubscriptionObserver>,
}

impl Completion {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SubscriptionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn subscribe<S, E>(self, on_complete: S, on_error: E) -> CancelHandle
    where
        S: FnOnce() + Send + 'static,
        E: FnOnce(StreamError) + Send + 'static,
    {
        let observer = Arc::clone(&self.observer);
        let (subscription, latch, handle) = handle_for(self.subscription, self.observer);
        let id = subscription.id();
        let mut callbacks = Some((on_complete, on_error));
        let worker_latch = Arc::clone(&latch);

        spawn_delivery(subscription, latch, Arc::clone(&observer), move |delivery| match delivery {
            Delivery::Item(record) => {
                log::debug!("Completion #{} ignoring record '{}'", id, record.id);
                Step::Continue
            }
            terminal => {
                if worker_latch.claim() {
                    if let Some((on_complete, on_error)) = callbacks.take() {
                        match terminal {
                            Delivery::Failed(error) => {
                                observer.on_error(id, &error);
                                on_error(error);
                            }
                            _ => {
                                observer.on_complete(id);
                                on_complete();
                            }
                        }
                    }
                    worker_latch.settle();
                }
                Step::Stop
            }
        });
        handle
    }
}
