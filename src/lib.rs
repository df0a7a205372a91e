//! command-bridge: an embeddable TCP command server.
//!
//! Clients send length-prefixed JSON command messages; each command is
//! handed to the host application's owner context, and its JSON result is
//! sent back as a length-prefixed response.
//!
//! Features:
//! - 4-byte little-endian length framing with a 64 KiB request cap
//! - Lenient payload recovery for peers that pad or miscount frames
//! - Serial (one client at a time) or threaded connection handling
//! - Command execution on an owner thread via a channel hand-off
//!
//! ```no_run
//! use command_bridge::{bridge, CommandRegistry, Config, Server};
//! use std::sync::Arc;
//!
//! let (bridge, owner) = bridge::channel();
//! let handle = Server::bind(&Config::default())?.start(Arc::new(bridge))?;
//!
//! let mut registry = CommandRegistry::with_builtins();
//! owner.run(&mut registry);
//! # handle.join()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bridge;
pub mod commands;
pub mod config;
pub mod protocol;
pub mod server;

pub use bridge::{CommandBridge, CommandError, CommandHandler, Dispatcher, OwnerContext};
pub use commands::CommandRegistry;
pub use config::{Config, ConnectionMode};
pub use server::{Server, ServerError, ServerHandle};
