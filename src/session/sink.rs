//! Transport sink for one subscriber

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::error::TransportError;

/// Outbound half of a subscriber connection
///
/// The session's writer task is the only caller, so at most one `send` is
/// ever outstanding per sink.
pub trait FrameSink: Send + 'static {
    /// Write one frame payload as a single message
    fn send(&mut self, payload: Bytes) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Close the connection. Errors are ignored.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}
