//! In-memory connections for harness tests.
//!
//! A `MockConnection` answers every request by dispatching a success
//! answer through the `Mux` on a separate task, like a reader task would.

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Connection, ConnectionProvider, SendError, TransportError};
use crate::diameter::avp::{code, Avp};
use crate::diameter::{Message, RESULT_SUCCESS};
use crate::identity::PeerMetadata;
use crate::mux::Mux;

/// Shared counters, observable after the run.
#[derive(Debug, Default)]
pub struct Counters {
    pub acquired: AtomicUsize,
    pub closed: AtomicUsize,
    pub sent: AtomicUsize,
}

impl Counters {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

pub struct MockConnection {
    remote: String,
    peer: Option<PeerMetadata>,
    mux: Option<Arc<Mux>>,
    /// Fail the send with this zero-based index.
    fail_send_at: Option<usize>,
    sent: AtomicUsize,
    counters: Arc<Counters>,
}

impl MockConnection {
    pub fn with_metadata(remote: &str, peer: PeerMetadata) -> Self {
        Self {
            remote: remote.to_string(),
            peer: Some(peer),
            mux: None,
            fail_send_at: None,
            sent: AtomicUsize::new(0),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn without_metadata(remote: &str) -> Self {
        Self {
            peer: None,
            ..Self::with_metadata(remote, test_peer())
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn remote_addr(&self) -> String {
        self.remote.clone()
    }

    fn peer_metadata(&self) -> Option<PeerMetadata> {
        self.peer.clone()
    }

    async fn send(&self, message: Message) -> Result<(), SendError> {
        let index = self.sent.fetch_add(1, Ordering::SeqCst);
        if self.fail_send_at == Some(index) {
            return Err(SendError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock send failure",
            )));
        }
        self.counters.sent.fetch_add(1, Ordering::SeqCst);

        if let Some(mux) = &self.mux {
            let mux = Arc::clone(mux);
            let remote = self.remote.clone();
            let answer = Message::answer_to(
                &message,
                vec![Avp::unsigned32(code::RESULT_CODE, RESULT_SUCCESS)],
            );
            tokio::spawn(async move { mux.dispatch(&remote, &answer) });
        }
        Ok(())
    }

    async fn close(&self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out `MockConnection`s wired to a `Mux`.
pub struct MockProvider {
    mux: Arc<Mux>,
    counters: Arc<Counters>,
    /// Answer requests; false simulates a silent peer.
    pub answer: bool,
    /// Fail the acquisition with this zero-based index.
    pub fail_acquire_at: Option<usize>,
    /// Fail sends on every connection at this zero-based index.
    pub fail_send_at: Option<usize>,
    /// Hand out connections whose handshake never completed.
    pub without_metadata: bool,
}

impl MockProvider {
    pub fn new(mux: Arc<Mux>) -> Self {
        Self {
            mux,
            counters: Arc::new(Counters::default()),
            answer: true,
            fail_acquire_at: None,
            fail_send_at: None,
            without_metadata: false,
        }
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    type Conn = MockConnection;

    async fn acquire(&self) -> Result<Arc<MockConnection>, TransportError> {
        let index = self.counters.acquired();
        if self.fail_acquire_at == Some(index) {
            return Err(TransportError::Connect {
                addr: "mock".to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "mock refusal"),
            });
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MockConnection {
            remote: format!("10.0.0.{}:3868", index + 1),
            peer: (!self.without_metadata).then(test_peer),
            mux: self.answer.then(|| Arc::clone(&self.mux)),
            fail_send_at: self.fail_send_at,
            sent: AtomicUsize::new(0),
            counters: Arc::clone(&self.counters),
        }))
    }
}

fn test_peer() -> PeerMetadata {
    PeerMetadata {
        origin_host: "host.example.com".to_string(),
        origin_realm: "realm.example.com".to_string(),
    }
}
