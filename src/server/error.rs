//! Errors surfaced while starting or stopping the server.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to resolve listen address {listen}: {source}")]
    Resolve {
        listen: String,
        #[source]
        source: io::Error,
    },
    #[error("no addresses resolved for {listen}")]
    ResolveEmpty { listen: String },
    #[error("failed to bind listener at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn listener thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    #[error("failed to share listening socket with the server handle: {source}")]
    ShareListener {
        #[source]
        source: io::Error,
    },
    #[error("listener thread panicked")]
    ThreadPanic,
}
