use bytes::Bytes;
use http::Version;

use crate::fields::FieldMap;

/// Common view of a request or response header.
///
/// A header stays mutable until it is handed to an encoder or returned by
/// a decoder; afterwards the consumer treats it as read-only by convention.
pub trait MessageHead {
    /// The HTTP protocol version of the message.
    fn protocol(&self) -> Version;

    fn fields(&self) -> &FieldMap;

    fn fields_mut(&mut self) -> &mut FieldMap;

    /// Whether a body follows this header on the wire. A message without
    /// payload never produces body bytes through the codec.
    fn has_payload(&self) -> bool;

    fn set_has_payload(&mut self, has_payload: bool);
}

/// A decoded or to-be-encoded message part: the header, or a piece of
/// its payload.
pub enum Message<T> {
    Header(T),
    Payload(PayloadItem),
}

impl<T> Message<T> {
    pub fn is_header(&self) -> bool {
        matches!(self, Message::Header(_))
    }

    pub fn is_payload(&self) -> bool {
        matches!(self, Message::Payload(_))
    }

    pub fn into_payload_item(self) -> Option<PayloadItem> {
        match self {
            Message::Header(_) => None,
            Message::Payload(item) => Some(item),
        }
    }
}

impl<T> From<Bytes> for Message<T> {
    fn from(bytes: Bytes) -> Self {
        Message::Payload(PayloadItem::Chunk(bytes))
    }
}

/// A piece of message payload, or the end-of-payload marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    Chunk(Bytes),
    Eof,
}

impl PayloadItem {
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}
