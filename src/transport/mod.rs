//! Connection abstractions consumed by the harness.
//!
//! The harness only sees negotiated connections through the
//! `Connection` trait and obtains them from a `ConnectionProvider`.
//! `tcp` is the plain TCP implementation used by the binary.

use async_trait::async_trait;
use std::io;
use std::sync::Arc;

use crate::diameter::{Message, ParseError};
use crate::identity::PeerMetadata;

#[cfg(test)]
pub mod mock;
pub mod tcp;

pub use tcp::TcpDialer;

/// An already negotiated duplex connection to a Diameter peer.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Remote address, for logs and error messages.
    fn remote_addr(&self) -> String;

    /// Peer identity; `None` until the capabilities exchange completed.
    fn peer_metadata(&self) -> Option<PeerMetadata>;

    /// Encode and write one message.
    async fn send(&self, message: Message) -> Result<(), SendError>;

    /// Release the connection. Calling it twice is harmless.
    async fn close(&self);
}

/// Produces ready-to-use connections.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Conn: Connection + 'static;

    async fn acquire(&self) -> Result<Arc<Self::Conn>, TransportError>;
}

/// Failure to produce a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("capabilities exchange with {0} timed out")]
    HandshakeTimeout(String),

    #[error("capabilities exchange with {remote} rejected with Result-Code {result_code}")]
    HandshakeRejected { remote: String, result_code: u32 },

    #[error("capabilities exchange with {remote} failed: {reason}")]
    Handshake { remote: String, reason: String },

    #[error("malformed message: {0}")]
    Decode(#[from] ParseError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Failure to write a message.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}
