//! # lib_stream
//!
//! Client-side consumption of a remote sensor event stream. One HTTP line
//! source per logical stream is shared by any number of local subscribers,
//! each with its own backpressure strategy and consumption shape.
//!
//! Modules:
//!
//! - **`record`**: `SensorRecord` and the `data:` line decoder.
//! - **`request`**: stream requests, their multicast key, and the endpoint catalogue.
//! - **`core`**: buffering, multicast, error policies and consumption shapes.
//! - **`retrieve`** (feature `retrieve`): the HTTP line transport.

pub mod core;
pub mod error;
pub mod record;
pub mod request;

#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use crate::core::*;
pub use error::{DecodeError, StreamError, TransportError};
pub use record::{DataPrefixDecoder, RecordDecoder, SensorRecord, DATA_PREFIX};
pub use request::{ErrorHandlingFlag, HttpMethod, SensorEndpoints, StreamKey, StreamParams, StreamRequest};

#[cfg(feature = "retrieve")]
pub use retrieve::{http_hub, ClientSettings, HttpLineTransport};
