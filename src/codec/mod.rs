//! Incremental, non-blocking HTTP codecs.
//!
//! Decoders pull bytes from a caller-supplied [`BytesMut`] and push body
//! bytes into a caller-supplied output slice; encoders do the reverse.
//! Every call does a bounded amount of work and returns as soon as input
//! is exhausted (underflow) or output is full (overflow). The machine's
//! position lives entirely in the codec instance, so callers resume by
//! calling again with refilled or drained buffers.

mod body;
mod error;
pub mod framed;
mod head;
mod request_decoder;
mod request_encoder;
mod response_decoder;
mod response_encoder;

use bytes::BytesMut;

use crate::upgrade::ProtocolSwitch;

pub use error::{DecodeError, EncodeError};
pub use request_decoder::HttpRequestDecoder;
pub use request_encoder::HttpRequestEncoder;
pub use response_decoder::HttpResponseDecoder;
pub use response_encoder::HttpResponseEncoder;

/// Outcome of a single `decode` call.
///
/// `overflow` and `underflow` are expected conditions, not errors: they
/// tell the caller which buffer needs attention before the next call.
#[derive(Debug, Default)]
pub struct RecvResult {
    pub(crate) header_completed: bool,
    pub(crate) message_completed: bool,
    pub(crate) written: usize,
    pub(crate) overflow: bool,
    pub(crate) underflow: bool,
    pub(crate) close_connection: bool,
    pub(crate) expect_continue: bool,
    pub(crate) switch: Option<ProtocolSwitch>,
}

impl RecvResult {
    /// True on the call during which a message header was fully decoded.
    pub fn header_completed(&self) -> bool {
        self.header_completed
    }

    /// True once the whole message, including any payload, has been
    /// consumed. Input bytes past this boundary are left untouched.
    pub fn message_completed(&self) -> bool {
        self.message_completed
    }

    /// Number of body bytes copied to the output slice by this call.
    pub fn written(&self) -> usize {
        self.written
    }

    /// The output slice has no room for pending body bytes.
    pub fn overflow(&self) -> bool {
        self.overflow
    }

    /// The input buffer was drained mid-message.
    pub fn underflow(&self) -> bool {
        self.underflow
    }

    /// The connection cannot be reused after the current message.
    pub fn close_connection(&self) -> bool {
        self.close_connection
    }

    /// The decoded request asked for a `100 Continue` interim response.
    /// Whether to send one automatically is the caller's policy.
    pub fn expect_continue(&self) -> bool {
        self.expect_continue
    }

    /// A completed protocol upgrade, present when a client-side decoder
    /// finished a `101 Switching Protocols` response.
    pub fn switch(&self) -> Option<&ProtocolSwitch> {
        self.switch.as_ref()
    }

    pub fn take_switch(&mut self) -> Option<ProtocolSwitch> {
        self.switch.take()
    }
}

/// Outcome of a single `encode` call.
#[derive(Debug, Default)]
pub struct SendResult {
    pub(crate) message_completed: bool,
    pub(crate) written: usize,
    pub(crate) overflow: bool,
    pub(crate) underflow: bool,
    pub(crate) close_connection: bool,
    pub(crate) switch: Option<ProtocolSwitch>,
}

impl SendResult {
    /// True once the latched message has been fully serialized.
    pub fn message_completed(&self) -> bool {
        self.message_completed
    }

    /// Number of bytes produced into the output slice by this call.
    pub fn written(&self) -> usize {
        self.written
    }

    /// The output slice is full while more bytes are staged.
    pub fn overflow(&self) -> bool {
        self.overflow
    }

    /// All supplied body bytes were consumed and the message is still
    /// open; the encoder waits for more input.
    pub fn underflow(&self) -> bool {
        self.underflow
    }

    /// The connection must be closed once the current message is out.
    pub fn close_connection(&self) -> bool {
        self.close_connection
    }

    /// A completed protocol upgrade, present when a server-side encoder
    /// finished emitting a `101 Switching Protocols` response.
    pub fn switch(&self) -> Option<&ProtocolSwitch> {
        self.switch.as_ref()
    }

    pub fn take_switch(&mut self) -> Option<ProtocolSwitch> {
        self.switch.take()
    }
}

// Header values travel as ISO-8859-1: decoding maps each byte to the
// char with the same code point, so unknown encodings survive a decode/
// encode round trip unchanged.

pub(crate) fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

pub(crate) fn put_latin1(dst: &mut BytesMut, text: &str) {
    use bytes::BufMut;
    for ch in text.chars() {
        if (ch as u32) <= 0xFF {
            dst.put_u8(ch as u32 as u8);
        } else {
            let mut utf8 = [0u8; 4];
            dst.put_slice(ch.encode_utf8(&mut utf8).as_bytes());
        }
    }
}

pub(crate) fn version_token(version: http::Version) -> Result<&'static str, EncodeError> {
    match version {
        http::Version::HTTP_11 => Ok("HTTP/1.1"),
        http::Version::HTTP_10 => Ok("HTTP/1.0"),
        version => Err(EncodeError::UnsupportedVersion { version }),
    }
}

/// Serializes a field block: the named lead fields first, in the given
/// order, then the remaining fields in insertion order, then the blank
/// line ending the head.
pub(crate) fn write_fields(dst: &mut BytesMut, fields: &crate::fields::FieldMap, lead: &[&str]) {
    use bytes::BufMut;
    let mut write_one = |field: &crate::fields::HttpField| {
        dst.put_slice(field.name().as_bytes());
        dst.put_slice(b": ");
        put_latin1(dst, field.value());
        dst.put_slice(b"\r\n");
    };
    for name in lead {
        if let Some(field) = fields.get(name) {
            write_one(field);
        }
    }
    for field in fields {
        if !lead.iter().any(|name| name.eq_ignore_ascii_case(field.name())) {
            write_one(field);
        }
    }
    dst.put_slice(b"\r\n");
}

/// Moves as much of `staged` into the output slice as fits, advancing the
/// caller's write cursor. Returns true when `staged` was fully drained.
pub(crate) fn drain_into(staged: &mut BytesMut, dst: &mut [u8], written: &mut usize) -> bool {
    use bytes::Buf;
    let n = (dst.len() - *written).min(staged.len());
    dst[*written..*written + n].copy_from_slice(&staged[..n]);
    staged.advance(n);
    *written += n;
    staged.is_empty()
}
