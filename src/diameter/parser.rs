//! Incremental Diameter frame parser.

use super::avp::Avp;
use super::message::{Message, HEADER_LEN, VERSION};

/// Largest message accepted from a peer.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Protocol parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid message length {0}")]
    InvalidLength(usize),
    #[error("malformed AVP {0}")]
    InvalidAvp(u32),
    #[error("AVP runs past end of message")]
    Truncated,
}

/// Result of parsing a buffer
#[derive(Debug)]
pub enum ParseResult {
    /// Successfully parsed message with bytes consumed
    Complete(Message, usize),
    /// Need more data
    Incomplete,
    /// Protocol error, the stream cannot be resynchronised
    Error(ParseError),
}

/// Parse one message from the front of `input`.
pub fn parse(input: &[u8]) -> ParseResult {
    if input.len() < 4 {
        return ParseResult::Incomplete;
    }

    // Version and length are enough to reject garbage early.
    if input[0] != VERSION {
        return ParseResult::Error(ParseError::UnsupportedVersion(input[0]));
    }
    let len = u32::from_be_bytes([0, input[1], input[2], input[3]]) as usize;
    if len < HEADER_LEN || len > MAX_MESSAGE_LEN || len % 4 != 0 {
        return ParseResult::Error(ParseError::InvalidLength(len));
    }
    if input.len() < len {
        return ParseResult::Incomplete;
    }

    let header = &input[..HEADER_LEN];
    let flags = header[4];
    let command_code = u32::from_be_bytes([0, header[5], header[6], header[7]]);
    let application_id = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    let hop_by_hop = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    let end_to_end = u32::from_be_bytes([header[16], header[17], header[18], header[19]]);

    let mut avps = Vec::new();
    let mut body = &input[HEADER_LEN..len];
    while !body.is_empty() {
        match Avp::decode(body) {
            Ok((avp, consumed)) => {
                avps.push(avp);
                body = &body[consumed..];
            }
            Err(e) => return ParseResult::Error(e),
        }
    }

    ParseResult::Complete(
        Message {
            flags,
            command_code,
            application_id,
            hop_by_hop,
            end_to_end,
            avps,
        },
        len,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diameter::avp::code;
    use crate::diameter::{Command, APP_CREDIT_CONTROL};
    use bytes::BytesMut;

    fn ccr() -> Message {
        let mut msg = Message::request(
            Command::CreditControl,
            APP_CREDIT_CONTROL,
            vec![
                Avp::utf8(code::SESSION_ID, "client;42"),
                Avp::identity(code::ORIGIN_HOST, "client"),
                Avp::identity(code::ORIGIN_REALM, "diam-bench"),
                Avp::utf8(code::USER_NAME, "foobar"),
                Avp::enumerated(code::CC_REQUEST_TYPE, 1),
                Avp::unsigned32(code::CC_REQUEST_NUMBER, 0),
            ],
        );
        msg.hop_by_hop = 7;
        msg.end_to_end = 9;
        msg
    }

    #[test]
    fn test_parse_complete() {
        let msg = ccr();
        let buf = msg.to_bytes();

        match parse(&buf) {
            ParseResult::Complete(parsed, consumed) => {
                assert_eq!(consumed, buf.len());
                assert_eq!(parsed, msg);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_pipelined() {
        let first = ccr();
        let mut second = ccr();
        second.hop_by_hop = 8;

        let mut buf = BytesMut::new();
        first.encode(&mut buf);
        second.encode(&mut buf);

        let consumed = match parse(&buf) {
            ParseResult::Complete(parsed, consumed) => {
                assert_eq!(parsed.hop_by_hop, 7);
                consumed
            }
            other => panic!("unexpected: {:?}", other),
        };

        match parse(&buf[consumed..]) {
            ParseResult::Complete(parsed, _) => assert_eq!(parsed.hop_by_hop, 8),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_incomplete() {
        let buf = ccr().to_bytes();

        assert!(matches!(parse(&buf[..3]), ParseResult::Incomplete));
        assert!(matches!(parse(&buf[..HEADER_LEN]), ParseResult::Incomplete));
        assert!(matches!(parse(&buf[..buf.len() - 1]), ParseResult::Incomplete));
    }

    #[test]
    fn test_bad_version() {
        let mut buf = ccr().to_bytes();
        buf[0] = 2;

        match parse(&buf) {
            ParseResult::Error(ParseError::UnsupportedVersion(2)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bad_length() {
        // Length smaller than a header
        let buf = [1u8, 0, 0, 8, 0, 0, 0, 0];
        match parse(&buf) {
            ParseResult::Error(ParseError::InvalidLength(8)) => {}
            other => panic!("unexpected: {:?}", other),
        }

        // Larger than the limit
        let buf = [1u8, 0x20, 0, 0];
        assert!(matches!(
            parse(&buf),
            ParseResult::Error(ParseError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_avp_overrunning_message() {
        let mut buf = ccr().to_bytes();
        // Inflate the first AVP length past the end of the message
        buf[HEADER_LEN + 5] = 0x01;

        assert!(matches!(parse(&buf), ParseResult::Error(_)));
    }
}
