//! # Data Retrieval Module
//!
//! HTTP implementation of the `LineTransport` boundary, built on `reqwest`
//! with `reqwest-middleware` retries for transient connection failures.
//!
//! - **`http_lines`**: `HttpLineTransport` and its `ClientSettings`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Streaming HTTP line source.
pub mod http_lines;

pub use http_lines::{http_hub, ClientSettings, HttpLineTransport};
