//! Request, response, and error types used by the server.

pub mod error;
pub mod request;
pub mod response;

pub use error::*;
pub use request::*;
pub use response::*;
