//! Command bridge between connection threads and the owner context.
//!
//! Commands must run on a thread owned by the host application. Connection
//! threads never call command handlers directly: they submit a request over
//! a channel and block until the owner context replies.
//!
//! ```text
//! connection thread                owner context
//!   CommandBridge::execute  --->   OwnerContext::pump / run
//!          (blocks)         <---   CommandHandler::handle
//! ```

use crate::protocol::Document;
use serde_json::{json, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, trace};

/// Executes a named command and always produces a JSON response.
///
/// Implementations must not panic; failures are reported inside the
/// returned document as `{"success": false, "error": ...}`.
pub trait Dispatcher: Send + Sync + 'static {
    fn execute(&self, command: &str, params: Document) -> Value;
}

impl<F> Dispatcher for F
where
    F: Fn(&str, Document) -> Value + Send + Sync + 'static,
{
    fn execute(&self, command: &str, params: Document) -> Value {
        self(command, params)
    }
}

/// Domain failure reported by a command handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {command}")]
    Unknown { command: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("{message}")]
    Failed { message: String },
}

impl CommandError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        CommandError::InvalidParams {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        CommandError::Failed {
            message: message.into(),
        }
    }
}

/// Build the uniform failure response.
pub fn error_response(message: impl Into<String>) -> Value {
    json!({
        "success": false,
        "error": message.into(),
    })
}

/// Runs commands on the owner context.
pub trait CommandHandler {
    fn handle(&mut self, command: &str, params: Document) -> Result<Value, CommandError>;
}

/// A command waiting to be run on the owner context.
struct BridgeRequest {
    command: String,
    params: Document,
    reply: mpsc::SyncSender<Value>,
}

/// Connection-side handle. Cheap to clone; one per server is typical.
#[derive(Clone)]
pub struct CommandBridge {
    sender: mpsc::Sender<BridgeRequest>,
}

/// Owner-side end of the bridge.
pub struct OwnerContext {
    receiver: mpsc::Receiver<BridgeRequest>,
}

/// Create a connected bridge and owner context.
pub fn channel() -> (CommandBridge, OwnerContext) {
    let (sender, receiver) = mpsc::channel();
    (CommandBridge { sender }, OwnerContext { receiver })
}

impl Dispatcher for CommandBridge {
    fn execute(&self, command: &str, params: Document) -> Value {
        let (reply, response) = mpsc::sync_channel(1);
        let request = BridgeRequest {
            command: command.to_string(),
            params,
            reply,
        };

        if self.sender.send(request).is_err() {
            return error_response("command bridge is closed");
        }

        // Blocks until the owner context gets to this request.
        match response.recv() {
            Ok(value) => value,
            Err(_) => error_response("command bridge closed before replying"),
        }
    }
}

/// Returned when every `CommandBridge` has been dropped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("all command bridge handles have been dropped")]
pub struct BridgeClosed;

impl OwnerContext {
    /// Serve requests until every bridge handle is dropped.
    pub fn run<H: CommandHandler>(&self, handler: &mut H) {
        while let Ok(request) = self.receiver.recv() {
            serve(handler, request);
        }
    }

    /// Run every request already queued, without blocking.
    ///
    /// Returns how many requests were served.
    pub fn pump<H: CommandHandler>(&self, handler: &mut H) -> Result<usize, BridgeClosed> {
        let mut served = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(request) => {
                    serve(handler, request);
                    served += 1;
                }
                Err(TryRecvError::Empty) => return Ok(served),
                Err(TryRecvError::Disconnected) => {
                    return if served > 0 { Ok(served) } else { Err(BridgeClosed) };
                }
            }
        }
    }

    /// Wait up to `timeout` for a request, then drain the queue.
    pub fn pump_timeout<H: CommandHandler>(
        &self,
        handler: &mut H,
        timeout: Duration,
    ) -> Result<usize, BridgeClosed> {
        match self.receiver.recv_timeout(timeout) {
            Ok(request) => {
                serve(handler, request);
                Ok(1 + self.pump(handler).unwrap_or(0))
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeClosed),
        }
    }
}

fn serve<H: CommandHandler>(handler: &mut H, request: BridgeRequest) {
    let BridgeRequest {
        command,
        params,
        reply,
    } = request;

    trace!(command = %command, "Executing command on owner context");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&command, params)));
    let response = match outcome {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => error_response(e.to_string()),
        Err(_) => {
            error!(command = %command, "Command handler panicked");
            error_response(format!("command '{command}' panicked"))
        }
    };

    // The connection may have gone away while we were working.
    let _ = reply.send(response);
}
