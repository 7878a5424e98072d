//! The room's view of a connected client

use bytes::Bytes;
use thiserror::Error;

use crate::ws::protocol::encode_error;

/// WebSocket close codes used by the server
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("outbound queue full")]
    Backpressure,
}

/// Outbound side of one participant's connection.
///
/// `send` must never block: a transport that cannot keep up reports
/// [`TransportError::Backpressure`] instead of buffering without bound.
pub trait Transport: Send + Sync {
    fn send(&self, frame: Bytes, is_binary: bool) -> Result<(), TransportError>;

    fn close(&self, code: u16, reason: &str);
}

/// Send a single ERROR frame and close
pub fn reject(transport: &dyn Transport, message: &str, code: u16) {
    // Close regardless; the error frame is best-effort
    let _ = transport.send(encode_error(message), true);
    transport.close(code, message);
}
