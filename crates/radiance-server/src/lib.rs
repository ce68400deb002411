//! Radiance Watch server: persistence, loop phases, and the HTTP API.

pub mod config;
pub mod dashboard;
pub mod phases;
pub mod store;
pub mod transport;
pub mod types;

pub use config::resolve_db_path;
pub use store::MetricStore;
pub use transport::{router, AppState, HttpTransport};
