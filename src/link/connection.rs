use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::link::config::LinkConfig;


#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closed,
}

/// The state of an endpoint's single connection, shared by the endpoint API and its
///  activities. Closing is one-way: a closed connection never becomes connected again, a new
///  connection needs a new endpoint.
///
/// All activities watch for the transition to [ConnectionState::Closed] as their stop signal.
pub struct Connection {
    state: watch::Sender<ConnectionState>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Connection {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Connection { state }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn mark_connected(&self) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            }
            else {
                false
            }
        });
    }

    /// Returns `true` if this call did the transition to [ConnectionState::Closed], `false` if
    ///  the connection was closed before. Safe to call from any context, it never blocks.
    pub fn close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state != ConnectionState::Closed {
                *state = ConnectionState::Closed;
                true
            }
            else {
                false
            }
        })
    }

    /// resolves once the connection is closed, immediately if it is closed already
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives in `self`, so waiting can not fail
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }
}


/// Station side: a single connection attempt. A failure is reported to the caller, who decides
///  whether and when to retry.
pub async fn connect(config: &LinkConfig) -> anyhow::Result<TcpStream> {
    debug!("connecting to robot at {}", config.addr);
    let stream = TcpStream::connect(config.addr).await
        .with_context(|| format!("connecting to robot at {}", config.addr))?;
    info!("connected to robot at {}", config.addr);
    Ok(stream)
}


/// Robot side: the bound listening socket, before the one connection it serves is accepted
pub struct Listener {
    listener: TcpListener,
    reject_extra_connections: bool,
}

/// The connection a [Listener] accepted, together with the task that turns away later attempts
pub struct Accepted {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub rejecter: Option<JoinHandle<()>>,
}

impl Listener {
    /// failing to bind is fatal for robot startup
    pub async fn bind(config: &LinkConfig) -> anyhow::Result<Listener> {
        let listener = TcpListener::bind(config.addr).await
            .with_context(|| format!("binding robot listener to {}", config.addr))?;
        info!("listening on {}", listener.local_addr()?);

        Ok(Listener {
            listener,
            reject_extra_connections: config.reject_extra_connections,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for the first connection. Depending on configuration, later connection attempts are
    ///  either accepted and closed immediately for as long as `connection` is alive, or refused
    ///  by the OS because the listener is dropped.
    ///
    /// If the accepted stream is unusable (e.g. reset by the peer before its addresses could be
    ///  read), the error is returned and the listening socket is closed with it.
    pub async fn accept(self, connection: Arc<Connection>) -> anyhow::Result<Accepted> {
        let (stream, peer_addr) = self.listener.accept().await
            .context("accepting station connection")?;
        let local_addr = stream.local_addr()
            .and_then(|local_addr| stream.peer_addr().map(|_| local_addr))
            .with_context(|| format!("connection from {} is unusable", peer_addr))?;
        info!("accepted connection from {}", peer_addr);

        let rejecter = if self.reject_extra_connections {
            let listener = self.listener;
            Some(tokio::spawn(async move {
                reject_loop(listener, connection, peer_addr).await;
            }))
        }
        else {
            None
        };

        Ok(Accepted { stream, peer_addr, local_addr, rejecter })
    }
}


/// pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accepting connection attempts that are not going to be served, introduced to facilitate
///  mocking the listening socket away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SurplusAcceptor: Send + Sync + 'static {
    /// accepts the next connection attempt and closes it right away, returning the peer address
    async fn accept_and_close(&self) -> std::io::Result<SocketAddr>;
}

#[async_trait]
impl SurplusAcceptor for TcpListener {
    async fn accept_and_close(&self) -> std::io::Result<SocketAddr> {
        let (_stream, addr) = self.accept().await?;
        Ok(addr)
    }
}

async fn reject_loop<A: SurplusAcceptor>(acceptor: A, connection: Arc<Connection>, served_peer: SocketAddr) {
    loop {
        select! {
            accepted = acceptor.accept_and_close() => {
                match accepted {
                    Ok(addr) => {
                        warn!("rejected connection attempt from {} - already serving {}", addr, served_peer);
                    }
                    Err(e) => {
                        warn!("error accepting surplus connection: {}", e);
                        select! {
                            _ = time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                            _ = connection.closed() => break,
                        }
                    }
                }
            }
            _ = connection.closed() => break,
        }
    }
    debug!("connection closed - no longer listening");
}
