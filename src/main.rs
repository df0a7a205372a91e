//! command-bridge: reference host for the command server.
//!
//! Binds the configured address, runs the built-in commands on the main
//! thread (the owner context), and shuts down on Ctrl-C.

use command_bridge::bridge;
use command_bridge::{CommandRegistry, Config, Server};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How long the owner loop waits for work before checking for shutdown.
const OWNER_TICK: Duration = Duration::from_millis(50);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        mode = ?config.mode,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        max_frame_bytes = config.codec.max_frame_bytes,
        decoding = ?config.codec.decoding,
        "Starting command-bridge server"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_watcher(Arc::clone(&shutdown))?;

    let (bridge, owner) = bridge::channel();
    let server = Server::bind(&config)?.start(Arc::new(bridge))?;

    let mut registry = CommandRegistry::with_builtins();
    while !shutdown.load(Ordering::SeqCst) {
        if owner.pump_timeout(&mut registry, OWNER_TICK).is_err() {
            error!("Listener dropped the command bridge");
            break;
        }
    }

    info!("Shutting down");
    server.stop();
    // Requests still queued get an error response instead of blocking a
    // connected client forever.
    drop(owner);
    server.join()?;
    Ok(())
}

/// Wait for Ctrl-C on a small dedicated runtime and raise `shutdown`.
fn spawn_signal_watcher(shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            match runtime.block_on(tokio::signal::ctrl_c()) {
                Ok(()) => {
                    info!("Received Ctrl-C");
                    shutdown.store(true, Ordering::SeqCst);
                }
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            }
        })?;

    Ok(())
}
