//! Subscriber transport
//!
//! An [`Acceptor`] turns incoming connections into subscriber sessions for
//! the duration of one capture session. [`WsAcceptor`] is the WebSocket
//! implementation: every frame goes out as one binary message.

pub mod config;
pub mod connection;
pub mod listener;

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::{SessionParams, SubscriberRegistry};

pub use config::ServerConfig;
pub use connection::WsSink;
pub use listener::{WsAcceptor, WsListener};

/// What an acceptor gets for one capture session
#[derive(Clone)]
pub struct AcceptContext {
    /// Registry new subscribers are attached to
    pub registry: Arc<SubscriberRegistry>,
    /// Parameters of the running session
    pub params: SessionParams,
    /// Cancelled when the session ends
    pub shutdown: CancellationToken,
}

/// Source of subscriber connections
pub trait Acceptor: Send + Sync + 'static {
    /// Bind transport resources and return the accept loop
    ///
    /// Binding happens before this returns so that failures surface from
    /// `start`. The returned future runs until `ctx.shutdown` is cancelled.
    fn serve(&self, ctx: AcceptContext) -> Result<BoxFuture<'static, ()>>;

    /// Address subscribers connect to, once bound
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}
