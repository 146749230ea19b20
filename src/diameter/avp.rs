//! Attribute-Value Pairs.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::parser::ParseError;

/// AVP flag: vendor id present.
pub const FLAG_VENDOR: u8 = 0x80;
/// AVP flag: mandatory.
pub const FLAG_MANDATORY: u8 = 0x40;

/// AVP header length without vendor id.
pub const HEADER_LEN: usize = 8;
/// AVP header length with vendor id.
pub const HEADER_LEN_VENDOR: usize = 12;

/// AVP codes used by the harness.
pub mod code {
    pub const USER_NAME: u32 = 1;
    pub const HOST_IP_ADDRESS: u32 = 257;
    pub const AUTH_APPLICATION_ID: u32 = 258;
    pub const ACCT_APPLICATION_ID: u32 = 259;
    pub const VENDOR_SPECIFIC_APPLICATION_ID: u32 = 260;
    pub const SESSION_ID: u32 = 263;
    pub const ORIGIN_HOST: u32 = 264;
    pub const SUPPORTED_VENDOR_ID: u32 = 265;
    pub const VENDOR_ID: u32 = 266;
    pub const FIRMWARE_REVISION: u32 = 267;
    pub const RESULT_CODE: u32 = 268;
    pub const PRODUCT_NAME: u32 = 269;
    pub const DISCONNECT_CAUSE: u32 = 273;
    pub const ORIGIN_STATE_ID: u32 = 278;
    pub const ERROR_MESSAGE: u32 = 281;
    pub const DESTINATION_REALM: u32 = 283;
    pub const DESTINATION_HOST: u32 = 293;
    pub const ORIGIN_REALM: u32 = 296;
    pub const CC_REQUEST_NUMBER: u32 = 415;
    pub const CC_REQUEST_TYPE: u32 = 416;
    pub const ACCOUNTING_RECORD_TYPE: u32 = 480;
    pub const ACCOUNTING_RECORD_NUMBER: u32 = 485;
}

/// Data type of an AVP, as known by the built-in dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvpType {
    OctetString,
    Utf8String,
    Identity,
    Unsigned32,
    Enumerated,
    Address,
}

/// Look up the data type for a base protocol AVP code.
///
/// Unknown codes (and grouped AVPs) are treated as opaque octets.
pub fn avp_type(avp_code: u32) -> AvpType {
    match avp_code {
        code::USER_NAME | code::SESSION_ID | code::PRODUCT_NAME | code::ERROR_MESSAGE => {
            AvpType::Utf8String
        }
        code::ORIGIN_HOST | code::ORIGIN_REALM | code::DESTINATION_HOST | code::DESTINATION_REALM => {
            AvpType::Identity
        }
        code::AUTH_APPLICATION_ID
        | code::ACCT_APPLICATION_ID
        | code::SUPPORTED_VENDOR_ID
        | code::VENDOR_ID
        | code::FIRMWARE_REVISION
        | code::RESULT_CODE
        | code::ORIGIN_STATE_ID
        | code::CC_REQUEST_NUMBER
        | code::ACCOUNTING_RECORD_NUMBER => AvpType::Unsigned32,
        code::DISCONNECT_CAUSE | code::CC_REQUEST_TYPE | code::ACCOUNTING_RECORD_TYPE => {
            AvpType::Enumerated
        }
        code::HOST_IP_ADDRESS => AvpType::Address,
        _ => AvpType::OctetString,
    }
}

/// Human-readable AVP name for log output.
pub fn avp_name(avp_code: u32) -> Option<&'static str> {
    let name = match avp_code {
        code::USER_NAME => "User-Name",
        code::HOST_IP_ADDRESS => "Host-IP-Address",
        code::AUTH_APPLICATION_ID => "Auth-Application-Id",
        code::ACCT_APPLICATION_ID => "Acct-Application-Id",
        code::VENDOR_SPECIFIC_APPLICATION_ID => "Vendor-Specific-Application-Id",
        code::SESSION_ID => "Session-Id",
        code::ORIGIN_HOST => "Origin-Host",
        code::SUPPORTED_VENDOR_ID => "Supported-Vendor-Id",
        code::VENDOR_ID => "Vendor-Id",
        code::FIRMWARE_REVISION => "Firmware-Revision",
        code::RESULT_CODE => "Result-Code",
        code::PRODUCT_NAME => "Product-Name",
        code::DISCONNECT_CAUSE => "Disconnect-Cause",
        code::ORIGIN_STATE_ID => "Origin-State-Id",
        code::ERROR_MESSAGE => "Error-Message",
        code::DESTINATION_REALM => "Destination-Realm",
        code::DESTINATION_HOST => "Destination-Host",
        code::ORIGIN_REALM => "Origin-Realm",
        code::CC_REQUEST_NUMBER => "CC-Request-Number",
        code::CC_REQUEST_TYPE => "CC-Request-Type",
        code::ACCOUNTING_RECORD_TYPE => "Accounting-Record-Type",
        code::ACCOUNTING_RECORD_NUMBER => "Accounting-Record-Number",
        _ => return None,
    };
    Some(name)
}

/// Typed AVP payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvpData {
    OctetString(Bytes),
    Utf8String(String),
    Identity(String),
    Unsigned32(u32),
    Enumerated(i32),
    Address(IpAddr),
}

impl AvpData {
    /// Length of the encoded payload, excluding padding.
    pub fn wire_len(&self) -> usize {
        match self {
            AvpData::OctetString(b) => b.len(),
            AvpData::Utf8String(s) | AvpData::Identity(s) => s.len(),
            AvpData::Unsigned32(_) | AvpData::Enumerated(_) => 4,
            AvpData::Address(IpAddr::V4(_)) => 2 + 4,
            AvpData::Address(IpAddr::V6(_)) => 2 + 16,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            AvpData::OctetString(b) => buf.put_slice(b),
            AvpData::Utf8String(s) | AvpData::Identity(s) => buf.put_slice(s.as_bytes()),
            AvpData::Unsigned32(v) => buf.put_u32(*v),
            AvpData::Enumerated(v) => buf.put_i32(*v),
            AvpData::Address(IpAddr::V4(addr)) => {
                buf.put_u16(1);
                buf.put_slice(&addr.octets());
            }
            AvpData::Address(IpAddr::V6(addr)) => {
                buf.put_u16(2);
                buf.put_slice(&addr.octets());
            }
        }
    }

    fn decode(avp_code: u32, data: &[u8]) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidAvp(avp_code);

        match avp_type(avp_code) {
            AvpType::OctetString => Ok(AvpData::OctetString(Bytes::copy_from_slice(data))),
            AvpType::Utf8String => std::str::from_utf8(data)
                .map(|s| AvpData::Utf8String(s.to_string()))
                .map_err(|_| invalid()),
            AvpType::Identity => std::str::from_utf8(data)
                .map(|s| AvpData::Identity(s.to_string()))
                .map_err(|_| invalid()),
            AvpType::Unsigned32 => {
                let raw: [u8; 4] = data.try_into().map_err(|_| invalid())?;
                Ok(AvpData::Unsigned32(u32::from_be_bytes(raw)))
            }
            AvpType::Enumerated => {
                let raw: [u8; 4] = data.try_into().map_err(|_| invalid())?;
                Ok(AvpData::Enumerated(i32::from_be_bytes(raw)))
            }
            AvpType::Address => {
                if data.len() < 2 {
                    return Err(invalid());
                }
                let family = u16::from_be_bytes([data[0], data[1]]);
                match (family, &data[2..]) {
                    (1, octets) if octets.len() == 4 => {
                        let raw: [u8; 4] = octets.try_into().map_err(|_| invalid())?;
                        Ok(AvpData::Address(IpAddr::V4(Ipv4Addr::from(raw))))
                    }
                    (2, octets) if octets.len() == 16 => {
                        let raw: [u8; 16] = octets.try_into().map_err(|_| invalid())?;
                        Ok(AvpData::Address(IpAddr::V6(Ipv6Addr::from(raw))))
                    }
                    _ => Err(invalid()),
                }
            }
        }
    }
}

impl fmt::Display for AvpData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvpData::OctetString(b) => write!(f, "{} bytes", b.len()),
            AvpData::Utf8String(s) | AvpData::Identity(s) => write!(f, "{}", s),
            AvpData::Unsigned32(v) => write!(f, "{}", v),
            AvpData::Enumerated(v) => write!(f, "{}", v),
            AvpData::Address(addr) => write!(f, "{}", addr),
        }
    }
}

/// A single AVP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avp {
    pub code: u32,
    pub flags: u8,
    pub vendor_id: Option<u32>,
    pub data: AvpData,
}

impl Avp {
    /// Create a mandatory, non-vendor AVP.
    pub fn new(code: u32, data: AvpData) -> Self {
        Self {
            code,
            flags: FLAG_MANDATORY,
            vendor_id: None,
            data,
        }
    }

    pub fn utf8(code: u32, value: impl Into<String>) -> Self {
        Self::new(code, AvpData::Utf8String(value.into()))
    }

    pub fn identity(code: u32, value: impl Into<String>) -> Self {
        Self::new(code, AvpData::Identity(value.into()))
    }

    pub fn unsigned32(code: u32, value: u32) -> Self {
        Self::new(code, AvpData::Unsigned32(value))
    }

    pub fn enumerated(code: u32, value: i32) -> Self {
        Self::new(code, AvpData::Enumerated(value))
    }

    pub fn address(code: u32, value: IpAddr) -> Self {
        Self::new(code, AvpData::Address(value))
    }

    fn header_len(&self) -> usize {
        if self.vendor_id.is_some() {
            HEADER_LEN_VENDOR
        } else {
            HEADER_LEN
        }
    }

    /// Encoded length as stored in the AVP header (no padding).
    pub fn length(&self) -> usize {
        self.header_len() + self.data.wire_len()
    }

    /// Encoded length including trailing padding.
    pub fn padded_len(&self) -> usize {
        pad4(self.length())
    }

    /// Append the encoded AVP, including padding, to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.length();
        buf.reserve(pad4(len));
        buf.put_u32(self.code);

        let mut flags = self.flags & !FLAG_VENDOR;
        if self.vendor_id.is_some() {
            flags |= FLAG_VENDOR;
        }
        buf.put_u8(flags);
        buf.put_uint(len as u64, 3);
        if let Some(vendor_id) = self.vendor_id {
            buf.put_u32(vendor_id);
        }
        self.data.encode(buf);
        buf.put_bytes(0, pad4(len) - len);
    }

    /// Decode one AVP from the front of `input`.
    ///
    /// Returns the AVP and the number of bytes consumed, padding included.
    pub fn decode(input: &[u8]) -> Result<(Self, usize), ParseError> {
        if input.len() < HEADER_LEN {
            return Err(ParseError::Truncated);
        }

        let avp_code = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
        let flags = input[4];
        let len = u32::from_be_bytes([0, input[5], input[6], input[7]]) as usize;

        let (vendor_id, header_len) = if flags & FLAG_VENDOR != 0 {
            if input.len() < HEADER_LEN_VENDOR {
                return Err(ParseError::Truncated);
            }
            let vendor = u32::from_be_bytes([input[8], input[9], input[10], input[11]]);
            (Some(vendor), HEADER_LEN_VENDOR)
        } else {
            (None, HEADER_LEN)
        };

        if len < header_len {
            return Err(ParseError::InvalidAvp(avp_code));
        }
        if input.len() < len {
            return Err(ParseError::Truncated);
        }

        // Vendor AVPs are outside the built-in dictionary.
        let data = if vendor_id.is_some() {
            AvpData::OctetString(Bytes::copy_from_slice(&input[header_len..len]))
        } else {
            AvpData::decode(avp_code, &input[header_len..len])?
        };

        // The final AVP may omit its padding.
        let consumed = pad4(len).min(input.len());

        Ok((
            Avp {
                code: avp_code,
                flags,
                vendor_id,
                data,
            },
            consumed,
        ))
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            AvpData::Utf8String(s) | AvpData::Identity(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self.data {
            AvpData::Unsigned32(v) => Some(v),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn as_i32(&self) -> Option<i32> {
        match self.data {
            AvpData::Enumerated(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Avp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match avp_name(self.code) {
            Some(name) => write!(f, "{}={}", name, self.data),
            None => write!(f, "AVP({})={}", self.code, self.data),
        }
    }
}

/// Round up to the next multiple of four.
pub fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad4() {
        assert_eq!(pad4(0), 0);
        assert_eq!(pad4(1), 4);
        assert_eq!(pad4(4), 4);
        assert_eq!(pad4(13), 16);
    }

    #[test]
    fn test_encode_identity_padding() {
        let avp = Avp::identity(code::ORIGIN_HOST, "client");
        let mut buf = BytesMut::new();
        avp.encode(&mut buf);

        // 8 header + 6 data = 14, padded to 16
        assert_eq!(avp.length(), 14);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[..4], &264u32.to_be_bytes());
        assert_eq!(buf[4], FLAG_MANDATORY);
        assert_eq!(&buf[5..8], &[0, 0, 14]);
        assert_eq!(&buf[8..14], b"client");
        assert_eq!(&buf[14..], &[0, 0]);
    }

    #[test]
    fn test_decode_address() {
        let avp = Avp::address(code::HOST_IP_ADDRESS, "127.0.0.1".parse().unwrap());
        let mut buf = BytesMut::new();
        avp.encode(&mut buf);

        let (decoded, consumed) = Avp::decode(&buf).unwrap();
        assert_eq!(consumed, 16);
        assert_eq!(decoded.data, AvpData::Address("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_decode_vendor_avp_is_opaque() {
        let avp = Avp {
            code: code::SESSION_ID,
            flags: FLAG_MANDATORY,
            vendor_id: Some(10415),
            data: AvpData::OctetString(Bytes::from_static(b"\xff\xfe")),
        };
        let mut buf = BytesMut::new();
        avp.encode(&mut buf);

        let (decoded, _) = Avp::decode(&buf).unwrap();
        assert_eq!(decoded.vendor_id, Some(10415));
        assert_eq!(decoded.flags & FLAG_VENDOR, FLAG_VENDOR);
        assert!(matches!(decoded.data, AvpData::OctetString(_)));
    }

    #[test]
    fn test_decode_bad_unsigned32_length() {
        // Result-Code with a 3 byte payload
        let raw = [0, 0, 1, 12, FLAG_MANDATORY, 0, 0, 11, 0, 0, 1, 0];
        assert_eq!(Avp::decode(&raw), Err(ParseError::InvalidAvp(code::RESULT_CODE)));
    }

    #[test]
    fn test_decode_truncated() {
        let avp = Avp::utf8(code::SESSION_ID, "session;1");
        let mut buf = BytesMut::new();
        avp.encode(&mut buf);

        assert_eq!(Avp::decode(&buf[..10]), Err(ParseError::Truncated));
        assert_eq!(Avp::decode(&buf[..4]), Err(ParseError::Truncated));
    }

    #[test]
    fn test_display_uses_names() {
        let avp = Avp::unsigned32(code::RESULT_CODE, 2001);
        assert_eq!(avp.to_string(), "Result-Code=2001");

        let avp = Avp::unsigned32(9999, 1);
        assert_eq!(avp.to_string(), "AVP(9999)=1");
    }
}
