//! Diameter message model and encoder.

use bytes::{BufMut, BytesMut};
use std::fmt;

use super::avp::{code, Avp};

/// Diameter protocol version.
pub const VERSION: u8 = 1;

/// Message header length.
pub const HEADER_LEN: usize = 20;

/// Command flag: request.
pub const FLAG_REQUEST: u8 = 0x80;
/// Command flag: proxiable.
pub const FLAG_PROXIABLE: u8 = 0x40;

/// Command codes known to the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CapabilitiesExchange,
    DeviceWatchdog,
    DisconnectPeer,
    CreditControl,
    Accounting,
}

impl Command {
    pub fn code(self) -> u32 {
        match self {
            Command::CapabilitiesExchange => 257,
            Command::Accounting => 271,
            Command::CreditControl => 272,
            Command::DeviceWatchdog => 280,
            Command::DisconnectPeer => 282,
        }
    }

    pub fn from_code(command_code: u32) -> Option<Self> {
        match command_code {
            257 => Some(Command::CapabilitiesExchange),
            271 => Some(Command::Accounting),
            272 => Some(Command::CreditControl),
            280 => Some(Command::DeviceWatchdog),
            282 => Some(Command::DisconnectPeer),
            _ => None,
        }
    }

    /// Conventional abbreviation, e.g. `CER` / `CEA`.
    pub fn abbreviation(self, request: bool) -> &'static str {
        match (self, request) {
            (Command::CapabilitiesExchange, true) => "CER",
            (Command::CapabilitiesExchange, false) => "CEA",
            (Command::DeviceWatchdog, true) => "DWR",
            (Command::DeviceWatchdog, false) => "DWA",
            (Command::DisconnectPeer, true) => "DPR",
            (Command::DisconnectPeer, false) => "DPA",
            (Command::CreditControl, true) => "CCR",
            (Command::CreditControl, false) => "CCA",
            (Command::Accounting, true) => "ACR",
            (Command::Accounting, false) => "ACA",
        }
    }

    /// Whether requests of this command are proxiable.
    fn proxiable(self) -> bool {
        matches!(self, Command::CreditControl | Command::Accounting)
    }
}

/// A Diameter message: header fields plus a flat AVP list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub flags: u8,
    pub command_code: u32,
    pub application_id: u32,
    pub hop_by_hop: u32,
    pub end_to_end: u32,
    pub avps: Vec<Avp>,
}

impl Message {
    /// Build a request envelope.
    ///
    /// Hop-by-hop and end-to-end identifiers are left at zero; the
    /// connection stamps them when the message is sent.
    pub fn request(command: Command, application_id: u32, avps: Vec<Avp>) -> Self {
        let mut flags = FLAG_REQUEST;
        if command.proxiable() {
            flags |= FLAG_PROXIABLE;
        }
        Self {
            flags,
            command_code: command.code(),
            application_id,
            hop_by_hop: 0,
            end_to_end: 0,
            avps,
        }
    }

    /// Build an answer to `request`, keeping its identifiers.
    pub fn answer_to(request: &Message, avps: Vec<Avp>) -> Self {
        Self {
            flags: request.flags & FLAG_PROXIABLE,
            command_code: request.command_code,
            application_id: request.application_id,
            hop_by_hop: request.hop_by_hop,
            end_to_end: request.end_to_end,
            avps,
        }
    }

    pub fn is_request(&self) -> bool {
        self.flags & FLAG_REQUEST != 0
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.command_code)
    }

    pub fn push(&mut self, avp: Avp) {
        self.avps.push(avp);
    }

    /// First AVP with the given code.
    pub fn find(&self, avp_code: u32) -> Option<&Avp> {
        self.avps.iter().find(|avp| avp.code == avp_code)
    }

    /// All AVPs with the given code, in message order.
    pub fn find_all(&self, avp_code: u32) -> impl Iterator<Item = &Avp> {
        self.avps.iter().filter(move |avp| avp.code == avp_code)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.find(code::SESSION_ID).and_then(Avp::as_str)
    }

    pub fn result_code(&self) -> Option<u32> {
        self.find(code::RESULT_CODE).and_then(Avp::as_u32)
    }

    /// Total encoded length, header included.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.avps.iter().map(Avp::padded_len).sum::<usize>()
    }

    /// Append the encoded message to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.encoded_len();
        buf.reserve(len);
        buf.put_u8(VERSION);
        buf.put_uint(len as u64, 3);
        buf.put_u8(self.flags);
        buf.put_uint(u64::from(self.command_code), 3);
        buf.put_u32(self.application_id);
        buf.put_u32(self.hop_by_hop);
        buf.put_u32(self.end_to_end);
        for avp in &self.avps {
            avp.encode(buf);
        }
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.command() {
            Some(command) => write!(f, "{}", command.abbreviation(self.is_request()))?,
            None if self.is_request() => write!(f, "Request({})", self.command_code)?,
            None => write!(f, "Answer({})", self.command_code)?,
        }
        write!(
            f,
            " app={} hbh={:#010x} e2e={:#010x} [",
            self.application_id, self.hop_by_hop, self.end_to_end
        )?;
        for (i, avp) in self.avps.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", avp)?;
        }
        write!(f, "]")
    }
}
