//! Listener loop.
//!
//! One dedicated thread owns the listening socket. It polls for a pending
//! connection, sleeping a fixed interval when there is none. In serial mode
//! an accepted connection is served to completion on this same thread
//! before the next accept, so only one client is ever being served and a
//! second client waits in the backlog until the first disconnects.
//!
//! Stopping shuts the listening socket down at once, so no new client can
//! connect, and the loop exits at its next poll. Threaded connections are
//! joined before the loop returns; the listener outlives every connection.

use crate::bridge::Dispatcher;
use crate::config::{Config, ConnectionMode};
use crate::server::connection::Connection;
use crate::server::ServerError;
use socket2::SockRef;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

const LISTEN_BACKLOG: i32 = 128;

/// A bound, not yet running, command server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Config,
}

impl Server {
    /// Resolve and bind the configured listen address.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr = resolve(&config.listen)?;
        let listener = create_listener(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Server {
            listener,
            local_addr,
            config: config.clone(),
        })
    }

    /// Address actually bound (useful when listening on port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the listener loop on its own thread.
    pub fn start(self, dispatcher: Arc<dyn Dispatcher>) -> Result<ServerHandle, ServerError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_flag = Arc::clone(&running);
        let local_addr = self.local_addr;
        let listener = self
            .listener
            .try_clone()
            .map_err(|source| ServerError::ShareListener { source })?;

        let handle = thread::Builder::new()
            .name("command-listener".to_string())
            .spawn(move || listener_loop(self, running_flag, dispatcher))
            .map_err(|source| ServerError::Spawn { source })?;

        Ok(ServerHandle {
            running,
            listener,
            local_addr,
            handle: Some(handle),
        })
    }
}

/// Handle to the background listener thread.
///
/// Dropping the handle stops the loop without waiting for it.
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    listener: TcpListener,
    local_addr: SocketAddr,
    handle: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Close the listening socket and ask the loop to exit.
    ///
    /// New clients are refused from here on, including any still waiting
    /// in the backlog. A connection that is currently being served is not
    /// interrupted; in serial mode the loop only notices the request once
    /// it ends.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Shutting down a listening socket takes it out of the listen state
        // for every handle sharing it.
        if let Err(e) = SockRef::from(&self.listener).shutdown(Shutdown::Both) {
            debug!(address = %self.local_addr, error = %e, "Failed to shut down listening socket");
        }
    }

    /// Wait for the listener thread and every connection it started to
    /// finish.
    pub fn join(mut self) -> Result<(), ServerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ServerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listener_loop(server: Server, running: Arc<AtomicBool>, dispatcher: Arc<dyn Dispatcher>) {
    let Server {
        listener,
        local_addr,
        config,
    } = server;

    info!(
        address = %local_addr,
        mode = ?config.mode,
        max_frame_bytes = config.codec.max_frame_bytes,
        "Server listening"
    );

    let mut next_conn_id: u64 = 0;
    let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                next_conn_id += 1;
                debug!(conn_id = next_conn_id, peer = %peer, "Accepted connection");
                let connection = Connection::new(stream, peer);

                match config.mode {
                    ConnectionMode::Serial => {
                        connection.run(&config.codec, &config.socket, dispatcher.as_ref());
                    }
                    ConnectionMode::Threaded => {
                        workers.retain(|worker| !worker.is_finished());
                        if let Some(worker) =
                            spawn_connection(next_conn_id, connection, &config, &dispatcher)
                        {
                            workers.push(worker);
                        }
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(config.poll_interval);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            // The socket was shut down by `stop`.
            Err(_) if !running.load(Ordering::SeqCst) => break,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                thread::sleep(config.poll_interval);
            }
        }
    }

    drop(listener);

    if !workers.is_empty() {
        debug!(connections = workers.len(), "Waiting for connections to finish");
    }
    for worker in workers {
        if worker.join().is_err() {
            error!("Connection thread panicked");
        }
    }
    info!(address = %local_addr, "Server stopped");
}

fn spawn_connection(
    conn_id: u64,
    connection: Connection<std::net::TcpStream>,
    config: &Config,
    dispatcher: &Arc<dyn Dispatcher>,
) -> Option<thread::JoinHandle<()>> {
    let codec = config.codec;
    let socket = config.socket;
    let dispatcher = Arc::clone(dispatcher);

    let spawned = thread::Builder::new()
        .name(format!("command-conn-{conn_id}"))
        .spawn(move || {
            connection.run(&codec, &socket, dispatcher.as_ref());
        });

    // On failure the connection was moved into the closure and is dropped
    // (closed) along with it.
    match spawned {
        Ok(worker) => Some(worker),
        Err(e) => {
            error!(conn_id, error = %e, "Failed to spawn connection thread");
            None
        }
    }
}

fn resolve(listen: &str) -> Result<SocketAddr, ServerError> {
    let mut addrs = listen.to_socket_addrs().map_err(|source| ServerError::Resolve {
        listen: listen.to_string(),
        source,
    })?;
    addrs.next().ok_or_else(|| ServerError::ResolveEmpty {
        listen: listen.to_string(),
    })
}

/// Create a non-blocking TCP listener so the loop can poll it.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
