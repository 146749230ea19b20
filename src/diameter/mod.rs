//! Diameter base protocol codec.
//!
//! Only what the harness and the answering peer need:
//! - `avp`: AVP codes, typed data and AVP encoding
//! - `message`: message model, command codes, encoding and display
//! - `parser`: incremental frame parser over a byte buffer
//!
//! ## Wire Format
//!
//! ```text
//! Header (20 bytes):
//!   version(1) | length(3) | flags(1) | command(3) | application id(4)
//!   hop-by-hop id(4) | end-to-end id(4)
//!
//! AVP:
//!   code(4) | flags(1) | length(3) | [vendor id(4)] | data | padding to 4
//! ```

pub mod avp;
pub mod message;
pub mod parser;

pub use message::{Command, Message};
pub use parser::{parse, ParseError, ParseResult};

/// Application id of the Diameter common messages (CER, DWR, DPR).
pub const APP_COMMON: u32 = 0;

/// Application id of Diameter base accounting (RFC 6733).
pub const APP_BASE_ACCOUNTING: u32 = 3;

/// Application id of Diameter credit control (RFC 4006).
pub const APP_CREDIT_CONTROL: u32 = 4;

/// DIAMETER_SUCCESS
pub const RESULT_SUCCESS: u32 = 2001;

/// DIAMETER_COMMAND_UNSUPPORTED
pub const RESULT_COMMAND_UNSUPPORTED: u32 = 3001;

/// Accounting-Record-Type EVENT_RECORD
pub const EVENT_RECORD: i32 = 1;

/// CC-Request-Type INITIAL_REQUEST
pub const INITIAL_REQUEST: i32 = 1;
