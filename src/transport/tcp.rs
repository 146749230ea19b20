//! Plain TCP transport.
//!
//! `TcpDialer` connects, runs the CER/CEA capabilities exchange and hands
//! out a `TcpConnection`. Each connection owns a reader task that decodes
//! incoming frames, routes answers through the `Mux`, answers peer
//! watchdogs and reports everything else to the error sink.

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use super::{Connection, ConnectionProvider, SendError, TransportError};
use crate::diameter::avp::{code, Avp};
use crate::diameter::{parse, Command, Message, ParseResult, APP_COMMON, RESULT_SUCCESS};
use crate::error_sink::ErrorReporter;
use crate::identity::{Identity, PeerMetadata};
use crate::mux::Mux;

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// Dials the peer and performs the capabilities exchange.
pub struct TcpDialer {
    addr: String,
    identity: Arc<Identity>,
    mux: Arc<Mux>,
    errors: ErrorReporter,
    handshake_timeout: Duration,
}

impl TcpDialer {
    pub fn new(
        addr: impl Into<String>,
        identity: Arc<Identity>,
        mux: Arc<Mux>,
        errors: ErrorReporter,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            addr: addr.into(),
            identity,
            mux,
            errors,
            handshake_timeout,
        }
    }
}

#[async_trait]
impl ConnectionProvider for TcpDialer {
    type Conn = TcpConnection;

    async fn acquire(&self) -> Result<Arc<TcpConnection>, TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let remote = stream.peer_addr()?.to_string();
        let (mut reader, writer) = stream.into_split();

        let conn = TcpConnection {
            remote: remote.clone(),
            peer: OnceLock::new(),
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            reader_task: Mutex::new(None),
            hop_by_hop: AtomicU32::new(rand::random()),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
        let handshake = conn.capabilities_exchange(&mut reader, &mut buffer, &self.identity);
        match timeout(self.handshake_timeout, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                conn.close().await;
                return Err(e);
            }
            Err(_) => {
                conn.close().await;
                return Err(TransportError::HandshakeTimeout(remote));
            }
        }

        let task = ReaderTask {
            remote,
            writer: Arc::clone(&conn.writer),
            identity: Arc::clone(&self.identity),
            mux: Arc::clone(&self.mux),
            errors: self.errors.clone(),
            closed: Arc::clone(&conn.closed),
        };
        let handle = tokio::spawn(task.run(reader, buffer));
        if let Ok(mut slot) = conn.reader_task.lock() {
            *slot = Some(handle);
        }

        Ok(Arc::new(conn))
    }
}

/// A negotiated TCP connection.
pub struct TcpConnection {
    remote: String,
    peer: OnceLock<PeerMetadata>,
    writer: SharedWriter,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    hop_by_hop: AtomicU32,
    closed: Arc<AtomicBool>,
}

impl TcpConnection {
    /// Send CER and wait for a successful CEA.
    async fn capabilities_exchange(
        &self,
        reader: &mut OwnedReadHalf,
        buffer: &mut BytesMut,
        identity: &Identity,
    ) -> Result<(), TransportError> {
        let cer = capabilities_request(identity);
        debug!(peer = %self.remote, "Sending {}", cer);
        self.send(cer).await.map_err(|e| TransportError::Handshake {
            remote: self.remote.clone(),
            reason: e.to_string(),
        })?;

        loop {
            match parse(&buffer[..]) {
                ParseResult::Complete(message, consumed) => {
                    buffer.advance(consumed);
                    if message.is_request()
                        || message.command() != Some(Command::CapabilitiesExchange)
                    {
                        debug!(peer = %self.remote, "Ignoring {} before CEA", message);
                        continue;
                    }
                    return self.accept_cea(&message);
                }
                ParseResult::Incomplete => {}
                ParseResult::Error(e) => return Err(e.into()),
            }

            if reader.read_buf(buffer).await? == 0 {
                return Err(TransportError::Handshake {
                    remote: self.remote.clone(),
                    reason: "connection closed during capabilities exchange".to_string(),
                });
            }
        }
    }

    fn accept_cea(&self, cea: &Message) -> Result<(), TransportError> {
        match cea.result_code() {
            Some(RESULT_SUCCESS) => {}
            Some(result_code) => {
                return Err(TransportError::HandshakeRejected {
                    remote: self.remote.clone(),
                    result_code,
                })
            }
            None => return Err(self.handshake_error("CEA without Result-Code")),
        }

        let origin_host = cea
            .find(code::ORIGIN_HOST)
            .and_then(Avp::as_str)
            .ok_or_else(|| self.handshake_error("CEA without Origin-Host"))?;
        let origin_realm = cea
            .find(code::ORIGIN_REALM)
            .and_then(Avp::as_str)
            .ok_or_else(|| self.handshake_error("CEA without Origin-Realm"))?;

        let metadata = PeerMetadata {
            origin_host: origin_host.to_string(),
            origin_realm: origin_realm.to_string(),
        };
        info!(
            peer = %self.remote,
            origin_host = %metadata.origin_host,
            origin_realm = %metadata.origin_realm,
            "Capabilities exchange complete"
        );
        let _ = self.peer.set(metadata);
        Ok(())
    }

    fn handshake_error(&self, reason: &str) -> TransportError {
        TransportError::Handshake {
            remote: self.remote.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn remote_addr(&self) -> String {
        self.remote.clone()
    }

    fn peer_metadata(&self) -> Option<PeerMetadata> {
        self.peer.get().cloned()
    }

    async fn send(&self, mut message: Message) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        if message.is_request() {
            message.hop_by_hop = self.hop_by_hop.fetch_add(1, Ordering::Relaxed);
            message.end_to_end = next_end_to_end();
        }
        trace!(peer = %self.remote, "Sending {}", message);

        let buf = message.to_bytes();
        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            trace!(peer = %self.remote, error = %e, "Shutdown failed");
        }
        debug!(peer = %self.remote, "Connection closed");
    }
}

/// Everything the reader task needs, detached from the connection.
struct ReaderTask {
    remote: String,
    writer: SharedWriter,
    identity: Arc<Identity>,
    mux: Arc<Mux>,
    errors: ErrorReporter,
    closed: Arc<AtomicBool>,
}

impl ReaderTask {
    async fn run(self, mut reader: OwnedReadHalf, mut buffer: BytesMut) {
        loop {
            loop {
                match parse(&buffer) {
                    ParseResult::Complete(message, consumed) => {
                        buffer.advance(consumed);
                        self.handle(message).await;
                    }
                    ParseResult::Incomplete => break,
                    ParseResult::Error(e) => {
                        self.report(format!("malformed message: {}", e));
                        return;
                    }
                }
            }

            match reader.read_buf(&mut buffer).await {
                Ok(0) => {
                    self.report("connection closed by peer".to_string());
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    self.report(format!("read failed: {}", e));
                    return;
                }
            }
        }
    }

    async fn handle(&self, message: Message) {
        if !message.is_request() {
            self.mux.dispatch(&self.remote, &message);
            return;
        }

        match message.command() {
            Some(Command::DeviceWatchdog) => {
                trace!(peer = %self.remote, "Answering {}", message);
                let dwa = watchdog_answer(&message, &self.identity);
                let mut writer = self.writer.lock().await;
                if let Err(e) = writer.write_all(&dwa.to_bytes()).await {
                    self.report(format!("failed to answer DWR: {}", e));
                }
            }
            _ => self.report(format!("unexpected request {}", message)),
        }
    }

    fn report(&self, description: String) {
        // Errors after a local close are expected noise.
        if !self.closed.load(Ordering::Acquire) {
            self.errors.report(Some(&self.remote), description);
        }
    }
}

/// Build the CER advertising the local identity.
pub fn capabilities_request(identity: &Identity) -> Message {
    let mut cer = Message::request(
        Command::CapabilitiesExchange,
        APP_COMMON,
        vec![
            Avp::identity(code::ORIGIN_HOST, &identity.origin_host),
            Avp::identity(code::ORIGIN_REALM, &identity.origin_realm),
        ],
    );
    for addr in &identity.host_ip_addresses {
        cer.push(Avp::address(code::HOST_IP_ADDRESS, *addr));
    }
    cer.push(Avp::unsigned32(code::VENDOR_ID, identity.vendor_id));
    cer.push(Avp::utf8(code::PRODUCT_NAME, &identity.product_name));
    cer.push(Avp::unsigned32(code::ORIGIN_STATE_ID, identity.origin_state_id));
    for app in &identity.auth_application_ids {
        cer.push(Avp::unsigned32(code::AUTH_APPLICATION_ID, *app));
    }
    for app in &identity.acct_application_ids {
        cer.push(Avp::unsigned32(code::ACCT_APPLICATION_ID, *app));
    }
    cer.push(Avp::unsigned32(code::FIRMWARE_REVISION, identity.firmware_revision));
    cer
}

fn watchdog_answer(dwr: &Message, identity: &Identity) -> Message {
    Message::answer_to(
        dwr,
        vec![
            Avp::unsigned32(code::RESULT_CODE, RESULT_SUCCESS),
            Avp::identity(code::ORIGIN_HOST, &identity.origin_host),
            Avp::identity(code::ORIGIN_REALM, &identity.origin_realm),
            Avp::unsigned32(code::ORIGIN_STATE_ID, identity.origin_state_id),
        ],
    )
}

/// Process-wide end-to-end identifier, seeded from the clock so ids
/// differ across restarts.
fn next_end_to_end() -> u32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER
        .get_or_init(|| {
            let secs = chrono::Utc::now().timestamp() as u32;
            AtomicU32::new(((secs & 0xfff) << 20) | (rand::random::<u32>() & 0xf_ffff))
        })
        .fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{completion_queue, run_completion};
    use crate::error_sink::error_stream;
    use crate::identity::test_identity;
    use tokio::net::TcpListener;

    /// Accept one connection and reply to the CER with `result_code`.
    async fn one_shot_peer(result_code: u32) -> (String, JoinHandle<Option<Message>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buffer = BytesMut::new();
            loop {
                if let ParseResult::Complete(cer, _) = parse(&buffer) {
                    let cea = Message::answer_to(
                        &cer,
                        vec![
                            Avp::unsigned32(code::RESULT_CODE, result_code),
                            Avp::identity(code::ORIGIN_HOST, "server"),
                            Avp::identity(code::ORIGIN_REALM, "example.org"),
                        ],
                    );
                    stream.write_all(&cea.to_bytes()).await.unwrap();
                    // Hold the socket open until the client is done
                    let _ = stream.read_buf(&mut buffer).await;
                    return Some(cer);
                }
                if stream.read_buf(&mut buffer).await.unwrap() == 0 {
                    return None;
                }
            }
        });

        (addr, handle)
    }

    fn dialer(addr: &str) -> (TcpDialer, crate::error_sink::ErrorSink) {
        let (tracker, _completions) = completion_queue(1);
        let (done, _completed) = run_completion();
        let (reporter, sink) = error_stream(16);
        let dialer = TcpDialer::new(
            addr,
            Arc::new(test_identity()),
            Arc::new(Mux::standard(tracker, done)),
            reporter,
            Duration::from_secs(2),
        );
        (dialer, sink)
    }

    #[test]
    fn test_capabilities_request_advertises_identity() {
        let cer = capabilities_request(&test_identity());

        assert!(cer.is_request());
        assert_eq!(cer.command(), Some(Command::CapabilitiesExchange));
        assert_eq!(cer.application_id, APP_COMMON);
        assert_eq!(
            cer.find(code::ORIGIN_HOST).and_then(Avp::as_str),
            Some("client")
        );
        assert_eq!(cer.find(code::VENDOR_ID).and_then(Avp::as_u32), Some(13));
        assert_eq!(
            cer.find(code::AUTH_APPLICATION_ID).and_then(Avp::as_u32),
            Some(4)
        );
        assert_eq!(
            cer.find(code::ACCT_APPLICATION_ID).and_then(Avp::as_u32),
            Some(3)
        );
        assert_eq!(cer.find_all(code::HOST_IP_ADDRESS).count(), 1);
    }

    #[test]
    fn test_end_to_end_ids_unique() {
        let first = next_end_to_end();
        let second = next_end_to_end();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_handshake_populates_peer_metadata() {
        let (addr, peer) = one_shot_peer(RESULT_SUCCESS).await;
        let (dialer, _sink) = dialer(&addr);

        let conn = dialer.acquire().await.unwrap();
        assert_eq!(
            conn.peer_metadata(),
            Some(PeerMetadata {
                origin_host: "server".to_string(),
                origin_realm: "example.org".to_string(),
            })
        );

        conn.close().await;
        let cer = peer.await.unwrap().unwrap();
        assert_eq!(cer.command(), Some(Command::CapabilitiesExchange));
        assert_ne!(cer.end_to_end, 0);
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let (addr, _peer) = one_shot_peer(5010).await;
        let (dialer, _sink) = dialer(&addr);

        match dialer.acquire().await {
            Err(TransportError::HandshakeRejected { result_code, .. }) => {
                assert_eq!(result_code, 5010)
            }
            Err(other) => panic!("unexpected: {:?}", other),
            Ok(_) => panic!("handshake should be rejected"),
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind and drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let (dialer, _sink) = dialer(&addr);

        assert!(matches!(
            dialer.acquire().await,
            Err(TransportError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (addr, _peer) = one_shot_peer(RESULT_SUCCESS).await;
        let (dialer, mut sink) = dialer(&addr);

        let conn = dialer.acquire().await.unwrap();
        conn.close().await;
        conn.close().await;

        let acr = Message::request(Command::Accounting, 3, Vec::new());
        assert!(matches!(conn.send(acr).await, Err(SendError::Closed)));
        // A local close is not an error worth reporting
        assert!(sink.try_collect().is_empty());
    }
}
