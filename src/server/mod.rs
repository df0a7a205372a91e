//! TCP command server.
//!
//! - `listener`: owns the listening socket and the accept loop
//! - `connection`: per-connection state machine and request/response loop
//!
//! Control flow for each request:
//!
//! ```text
//! listener -> connection -> codec decode -> dispatcher -> codec encode -> write
//! ```

mod connection;
mod error;
mod listener;

pub use connection::{CloseReason, ConnState, Connection};
pub use error::ServerError;
pub use listener::{Server, ServerHandle};
