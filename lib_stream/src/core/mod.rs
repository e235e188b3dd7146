//! # Core Engine Module
//!
//! Everything between a raw line source and an application callback:
//!
//! - **`source`**: the `LineTransport` collaborator boundary, its cancellable
//!   handle, and the incremental `LineFramer`.
//! - **`buffer`**: the per-subscription `BackpressureBuffer` with its five
//!   overflow strategies.
//! - **`hub`**: the `StreamHub`, which multiplexes one upstream over many
//!   subscriptions with reference-counted connect and teardown.
//! - **`policy`**: the per-stream `ErrorPolicy` (propagate, substitute, resume).
//! - **`shape`**: the `Sequence`, `Optional`, `Single` and `Completion` adapters.
//! - **`observer`**: optional lifecycle hooks, including a logging observer.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Per-subscription admission control.
pub mod buffer;
/// Reference-counted multicast of one upstream.
pub mod hub;
/// Lifecycle hooks on subscriptions.
pub mod observer;
/// Upstream failure resolution.
pub mod policy;
/// Application-facing consumption shapes.
pub mod shape;
/// Line transport boundary and framing.
pub mod source;

pub use buffer::{Admission, BackpressureBuffer, BackpressureStrategy, BufferStats, Delivery};
pub use hub::{RecordRef, StreamHub, StreamState, SubscribeOptions, Subscription};
pub use observer::{LoggingObserver, NoopObserver, SubscriptionObserver};
pub use policy::{ErrorPolicy, PolicyAction};
pub use shape::{CancelHandle, Completion, Optional, Sequence, Single};
pub use source::{LineEvent, LineFramer, LineSink, LineSourceHandle, LineTransport};
