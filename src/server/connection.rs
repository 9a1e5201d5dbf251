//! Per-connection WebSocket handling
//!
//! The socket is split: the write half becomes the session's [`WsSink`], the
//! read half is watched here so a client going away closes its session even
//! when no write is pending.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::error::TransportError;
use crate::session::FrameSink;

use super::config::ServerConfig;
use super::AcceptContext;

/// How long a close handshake may take before the socket is dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Write half of a subscriber's WebSocket
pub struct WsSink {
    write: SplitSink<WebSocketStream<TcpStream>, Message>,
}

impl FrameSink for WsSink {
    fn send(&mut self, payload: Bytes) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.write
                .send(Message::binary(payload))
                .await
                .map_err(TransportError::from)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = timeout(CLOSE_TIMEOUT, self.write.close()).await;
        })
    }
}

/// Upgrade, register and supervise one connection
pub(crate) async fn serve_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    ctx: AcceptContext,
) {
    let ws = match timeout(config.handshake_timeout, accept_async(socket)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
            return;
        }
        Err(_) => {
            tracing::debug!(peer = %peer_addr, "WebSocket handshake timed out");
            return;
        }
    };

    let (mut write, mut read) = ws.split();

    if config.announce_params {
        match serde_json::to_string(&ctx.params) {
            Ok(text) => {
                if let Err(e) = write.send(Message::text(text)).await {
                    tracing::debug!(peer = %peer_addr, error = %e, "Failed to announce parameters");
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode session parameters"),
        }
    }

    let session = match ctx.registry.attach(WsSink { write }, Some(peer_addr)).await {
        Ok(session) => session,
        Err(e) => {
            tracing::info!(peer = %peer_addr, error = %e, "Subscriber rejected");
            return;
        }
    };

    tracing::info!(
        subscriber = %session.id(),
        peer = %peer_addr,
        "Client connected"
    );

    loop {
        tokio::select! {
            _ = session.closed() => break,
            msg = read.next() => match msg {
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(subscriber = %session.id(), "Client disconnected");
                    session.close();
                    break;
                }
                Some(Err(e)) => {
                    tracing::info!(subscriber = %session.id(), error = %e, "Client connection lost");
                    session.close();
                    break;
                }
                // Pings are answered by tungstenite; anything else is ignored
                Some(Ok(_)) => {}
            }
        }
    }
}
