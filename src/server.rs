//! TCP server answering as a Diameter peer.
//!
//! Accepts connections, parses requests, and answers every one of them
//! with DIAMETER_SUCCESS. Used as the far end of local benchmarks.

use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

use crate::diameter::avp::{code, Avp};
use crate::diameter::{
    parse, Command, Message, ParseResult, RESULT_COMMAND_UNSUPPORTED, RESULT_SUCCESS,
};
use crate::identity::Identity;

/// Maximum number of concurrent connections
const MAX_CONNECTIONS: usize = 10000;

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Server instance
pub struct Server {
    listener: TcpListener,
    identity: Arc<Identity>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(listen: &str, identity: Arc<Identity>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        info!(address = %listener.local_addr()?, "Server listening");

        Ok(Server {
            listener,
            identity,
            connection_limit: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let identity = Arc::clone(&self.identity);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, identity).await {
                            debug!(peer = %addr, error = %e, "Connection error");
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Handle a single peer connection
async fn handle_connection(
    mut stream: TcpStream,
    identity: Arc<Identity>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    stream.set_nodelay(true)?;
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    let mut output = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        // Answer everything already buffered with a single write
        loop {
            match parse(&buffer) {
                ParseResult::Complete(message, consumed) => {
                    buffer.advance(consumed);

                    if !message.is_request() {
                        trace!(message = %message, "Ignoring answer");
                        continue;
                    }

                    if message.command().is_none() {
                        info!(
                            command = message.command_code,
                            application = message.application_id,
                            "Unsupported command"
                        );
                    }
                    let answer = answer(&message, &identity);
                    answer.encode(&mut output);

                    if message.command() == Some(Command::DisconnectPeer) {
                        stream.write_all(&output).await?;
                        trace!("Peer disconnected");
                        return Ok(());
                    }
                }
                ParseResult::Incomplete => break,
                ParseResult::Error(e) => {
                    warn!(error = %e, "Parse error, closing connection");
                    return Err(e.into());
                }
            }
        }

        if !output.is_empty() {
            stream.write_all(&output).await?;
            output.clear();
        }

        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            // Connection closed
            trace!("Connection closed by client");
            return Ok(());
        }
    }
}

/// Build the answer for one request. Unknown commands get
/// DIAMETER_COMMAND_UNSUPPORTED, everything else succeeds.
fn answer(request: &Message, identity: &Identity) -> Message {
    let mut avps = Vec::with_capacity(8);

    let result_code = match request.command() {
        Some(_) => RESULT_SUCCESS,
        None => RESULT_COMMAND_UNSUPPORTED,
    };

    if let Some(session_id) = request.session_id() {
        avps.push(Avp::utf8(code::SESSION_ID, session_id));
    }
    avps.push(Avp::unsigned32(code::RESULT_CODE, result_code));
    avps.push(Avp::identity(code::ORIGIN_HOST, &identity.origin_host));
    avps.push(Avp::identity(code::ORIGIN_REALM, &identity.origin_realm));

    match request.command() {
        Some(Command::CapabilitiesExchange) => {
            for addr in &identity.host_ip_addresses {
                avps.push(Avp::address(code::HOST_IP_ADDRESS, *addr));
            }
            avps.push(Avp::unsigned32(code::VENDOR_ID, identity.vendor_id));
            avps.push(Avp::utf8(code::PRODUCT_NAME, &identity.product_name));
            avps.push(Avp::unsigned32(code::ORIGIN_STATE_ID, identity.origin_state_id));
            // Agree to whatever the peer advertised
            for app in request.find_all(code::AUTH_APPLICATION_ID) {
                avps.push(app.clone());
            }
            for app in request.find_all(code::ACCT_APPLICATION_ID) {
                avps.push(app.clone());
            }
        }
        Some(Command::DeviceWatchdog) => {
            avps.push(Avp::unsigned32(code::ORIGIN_STATE_ID, identity.origin_state_id));
        }
        Some(Command::Accounting) => {
            for avp_code in [code::ACCOUNTING_RECORD_TYPE, code::ACCOUNTING_RECORD_NUMBER] {
                if let Some(avp) = request.find(avp_code) {
                    avps.push(avp.clone());
                }
            }
        }
        Some(Command::CreditControl) => {
            for avp_code in [
                code::AUTH_APPLICATION_ID,
                code::CC_REQUEST_TYPE,
                code::CC_REQUEST_NUMBER,
            ] {
                if let Some(avp) = request.find(avp_code) {
                    avps.push(avp.clone());
                }
            }
        }
        Some(Command::DisconnectPeer) | None => {}
    }

    Message::answer_to(request, avps)
}
