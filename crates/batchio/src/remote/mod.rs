//! Concrete remote operations built on the retry and batch primitives.
//!
//! Currently provides a JSON-over-HTTP client. The core modules never depend
//! on anything here.

pub mod http;

pub use http::{HttpError, HttpStatusClassifier, JsonPoster};
