//! Request construction for one connection.
//!
//! A `MessageFactory` is bound to a connection once its handshake has
//! completed; it combines the local identity with the peer metadata
//! learned during the capabilities exchange. Every call returns a fresh
//! envelope. Sending is up to the caller.

use std::sync::Arc;

use crate::diameter::avp::{code, Avp};
use crate::diameter::{
    Command, Message, APP_BASE_ACCOUNTING, APP_CREDIT_CONTROL, EVENT_RECORD, INITIAL_REQUEST,
};
use crate::error::HarnessError;
use crate::identity::{Identity, PeerMetadata};
use crate::transport::Connection;

pub struct MessageFactory {
    identity: Arc<Identity>,
    peer: PeerMetadata,
    /// Distinguishes bulk session ids across connections of one run.
    stream: usize,
}

impl MessageFactory {
    /// Bind to `conn`, failing if its peer metadata is not available yet.
    pub fn for_connection<C>(
        identity: Arc<Identity>,
        conn: &C,
        stream: usize,
    ) -> Result<Self, HarnessError>
    where
        C: Connection + ?Sized,
    {
        let peer = conn
            .peer_metadata()
            .ok_or_else(|| HarnessError::PeerMetadataUnavailable {
                remote: conn.remote_addr(),
            })?;

        Ok(Self {
            identity,
            peer,
            stream,
        })
    }

    /// Credit-Control-Request for the single-exchange flow.
    pub fn credit_control_request(&self) -> Message {
        let session_id = format!("{};{}", self.identity.origin_host, rand::random::<u32>());

        Message::request(
            Command::CreditControl,
            APP_CREDIT_CONTROL,
            vec![
                Avp::utf8(code::SESSION_ID, session_id),
                Avp::unsigned32(code::AUTH_APPLICATION_ID, APP_CREDIT_CONTROL),
                Avp::identity(code::ORIGIN_HOST, &self.identity.origin_host),
                Avp::identity(code::ORIGIN_REALM, &self.identity.origin_realm),
                Avp::identity(code::DESTINATION_REALM, &self.peer.origin_realm),
                Avp::identity(code::DESTINATION_HOST, &self.peer.origin_host),
                Avp::enumerated(code::CC_REQUEST_TYPE, INITIAL_REQUEST),
                Avp::unsigned32(code::CC_REQUEST_NUMBER, 0),
                Avp::utf8(code::USER_NAME, &self.identity.user_name),
            ],
        )
    }

    /// Accounting-Request number `index` of this connection's stream.
    pub fn accounting_request(&self, index: u32) -> Message {
        Message::request(
            Command::Accounting,
            APP_BASE_ACCOUNTING,
            vec![
                Avp::utf8(code::SESSION_ID, self.bulk_session_id(index)),
                Avp::identity(code::ORIGIN_HOST, &self.identity.origin_host),
                Avp::identity(code::ORIGIN_REALM, &self.identity.origin_realm),
                Avp::identity(code::DESTINATION_REALM, &self.peer.origin_realm),
                Avp::unsigned32(code::ACCT_APPLICATION_ID, APP_BASE_ACCOUNTING),
                Avp::enumerated(code::ACCOUNTING_RECORD_TYPE, EVENT_RECORD),
                Avp::unsigned32(code::ACCOUNTING_RECORD_NUMBER, index),
                Avp::identity(code::DESTINATION_HOST, &self.peer.origin_host),
            ],
        )
    }

    fn bulk_session_id(&self, index: u32) -> String {
        format!("{};{};{}", self.identity.origin_host, self.stream, index)
    }
}
