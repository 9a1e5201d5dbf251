//! WebSocket server listener
//!
//! Handles the TCP accept loop and spawns connection handlers.

use std::net::SocketAddr;
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;

use super::config::ServerConfig;
use super::connection::serve_connection;
use super::{AcceptContext, Acceptor};

/// WebSocket acceptor, rebinding for every capture session
pub struct WsAcceptor {
    config: ServerConfig,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl WsAcceptor {
    /// Create a new acceptor with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            local_addr: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Default for WsAcceptor {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl Acceptor for WsAcceptor {
    fn serve(&self, ctx: AcceptContext) -> Result<BoxFuture<'static, ()>> {
        let listener = WsListener::bind(self.config.clone())?;
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener.local_addr());

        Ok(Box::pin(listener.run(ctx)))
    }

    /// Address of the most recent bind
    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A bound WebSocket listener
pub struct WsListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
}

impl WsListener {
    /// Bind the configured address
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let std_listener = std::net::TcpListener::bind(config.bind_addr)?;
        std_listener.set_nonblocking(true)?;

        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the session shuts down
    pub async fn run(self, ctx: AcceptContext) {
        tracing::info!(addr = %self.local_addr, "WebSocket server listening");

        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                tracing::info!(addr = %self.local_addr, "WebSocket server stopped");
            }
            _ = self.accept_loop(&ctx) => {}
        }
    }

    async fn accept_loop(&self, ctx: &AcceptContext) {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr, ctx);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr, ctx: &AcceptContext) {
        tracing::debug!(peer = %peer_addr, "New connection");

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let config = self.config.clone();
        let ctx = ctx.clone();
        tokio::spawn(serve_connection(socket, peer_addr, config, ctx));
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}
