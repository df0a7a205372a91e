//! Command handlers run on the owner context.
//!
//! ## Built-in Commands
//! - `ping`: liveness check, touches nothing
//! - `echo`: returns its params unchanged
//! - `list_commands`: names of every registered command
//!
//! Hosts register their own commands next to the built-ins with
//! [`CommandRegistry::register`].

pub mod echo;
pub mod ping;

use crate::bridge::{CommandError, CommandHandler};
use crate::protocol::Document;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Boxed command implementation.
pub type CommandFn = Box<dyn FnMut(Document) -> Result<Value, CommandError> + Send>;

/// Name to handler lookup used by the owner context.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, CommandFn>,
}

impl CommandRegistry {
    /// An empty registry (no built-ins).
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `ping` and `echo` registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ping::NAME, ping::handle);
        registry.register(echo::NAME, echo::handle);
        registry
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: FnMut(Document) -> Result<Value, CommandError> + Send + 'static,
    {
        self.commands.insert(name.into(), Box::new(handler));
    }

    /// Registered command names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }
}

impl CommandHandler for CommandRegistry {
    fn handle(&mut self, command: &str, params: Document) -> Result<Value, CommandError> {
        if command == "list_commands" {
            return Ok(json!({
                "success": true,
                "commands": self.names(),
            }));
        }

        match self.commands.get_mut(command) {
            Some(handler) => handler(params),
            None => Err(CommandError::Unknown {
                command: command.to_string(),
            }),
        }
    }
}
