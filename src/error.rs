//! Fatal run errors.
//!
//! Each variant names the phase that failed. Non-fatal transport
//! problems never show up here; they go through the error sink.

use std::time::Duration;

use crate::transport::{SendError, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("connection acquisition failed ({acquired} of {requested} ready): {source}")]
    ConnectionAcquisition {
        acquired: usize,
        requested: usize,
        #[source]
        source: TransportError,
    },

    #[error("peer metadata unavailable for {remote}: handshake has not completed")]
    PeerMetadataUnavailable { remote: String },

    #[error("send to {remote} failed: {source}")]
    Send {
        remote: String,
        #[source]
        source: SendError,
    },

    #[error("stalled: no completion within {timeout:?} ({received} of {expected} received)")]
    CompletionTimeout {
        timeout: Duration,
        received: usize,
        expected: usize,
    },

    #[error("timeout: no CCA answer received within {0:?}")]
    AnswerTimeout(Duration),

    #[error("completion queue overflowed {0} time(s); capacity is smaller than in-flight exchanges")]
    TrackerOverflow(u64),

    #[error("completion queue closed before the run finished")]
    TrackerClosed,
}
