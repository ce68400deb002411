//! Transport layer for the HTTP API.

pub mod http;

pub use http::{router, AppState, HttpTransport};
