//! Adapters exposing the incremental codecs through `tokio-util`'s
//! [`Decoder`]/[`Encoder`] traits, for hosts that drive connections with
//! `FramedRead`/`FramedWrite`.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{
    DecodeError, EncodeError, HttpRequestDecoder, HttpResponseEncoder,
};
use crate::protocol::{HttpRequest, HttpResponse, Message, PayloadItem};
use crate::upgrade::ProtocolSwitch;

const SCRATCH_SIZE: usize = 8 * 1024;

/// Frames a server's inbound byte stream into request headers and
/// payload items.
pub struct RequestDecoder {
    inner: HttpRequestDecoder,
    scratch: Box<[u8]>,
    queue: VecDeque<Message<HttpRequest>>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::from_inner(HttpRequestDecoder::new())
    }

    pub fn from_inner(inner: HttpRequestDecoder) -> Self {
        Self { inner, scratch: vec![0u8; SCRATCH_SIZE].into_boxed_slice(), queue: VecDeque::new() }
    }

    fn pump(
        &mut self,
        src: &mut BytesMut,
        end_of_input: bool,
    ) -> Result<Option<Message<HttpRequest>>, DecodeError> {
        loop {
            if let Some(message) = self.queue.pop_front() {
                return Ok(Some(message));
            }
            let result = self.inner.decode(src, &mut self.scratch, end_of_input)?;
            if result.header_completed() {
                if let Some(header) = self.inner.take_header() {
                    self.queue.push_back(Message::Header(header));
                }
            }
            if result.written() > 0 {
                self.queue.push_back(Bytes::copy_from_slice(&self.scratch[..result.written()]).into());
            }
            if result.message_completed() {
                self.queue.push_back(Message::Payload(PayloadItem::Eof));
            }
            if self.queue.is_empty() && result.underflow() {
                return Ok(None);
            }
        }
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<HttpRequest>;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.pump(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.pump(src, true)
    }
}

/// Serializes response headers and payload items onto a server's
/// outbound byte stream.
pub struct ResponseEncoder {
    inner: HttpResponseEncoder,
    scratch: Box<[u8]>,
    switch: Option<ProtocolSwitch>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Self::from_inner(HttpResponseEncoder::new())
    }

    pub fn from_inner(inner: HttpResponseEncoder) -> Self {
        Self { inner, scratch: vec![0u8; SCRATCH_SIZE].into_boxed_slice(), switch: None }
    }

    /// A protocol switch produced while emitting a `101` response.
    pub fn take_switch(&mut self) -> Option<ProtocolSwitch> {
        self.switch.take()
    }

    fn drive(
        &mut self,
        src: &mut BytesMut,
        dst: &mut BytesMut,
        end_of_input: bool,
    ) -> Result<(), EncodeError> {
        loop {
            let mut result = self.inner.encode(src, &mut self.scratch, end_of_input)?;
            dst.extend_from_slice(&self.scratch[..result.written()]);
            if let Some(switch) = result.take_switch() {
                self.switch = Some(switch);
            }
            if !result.overflow() {
                return Ok(());
            }
        }
    }
}

impl Default for ResponseEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Message<HttpResponse>> for ResponseEncoder {
    type Error = EncodeError;

    fn encode(
        &mut self,
        item: Message<HttpResponse>,
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        match item {
            Message::Header(response) => {
                self.inner.encode_header(response)?;
                self.drive(&mut BytesMut::new(), dst, false)
            }
            Message::Payload(PayloadItem::Chunk(bytes)) => {
                let mut src = BytesMut::from(&bytes[..]);
                self.drive(&mut src, dst, false)
            }
            Message::Payload(PayloadItem::Eof) => self.drive(&mut BytesMut::new(), dst, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::protocol::MessageHead;
    use http::{Method, StatusCode, Version};

    #[test]
    fn framed_decode_yields_header_chunks_and_eof() {
        let mut decoder = RequestDecoder::new();
        let mut src = BytesMut::from(
            &b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello"[..],
        );
        let Some(Message::Header(request)) = decoder.decode(&mut src).unwrap() else {
            panic!("expected header");
        };
        assert_eq!(request.method(), &Method::POST);

        let Some(Message::Payload(PayloadItem::Chunk(chunk))) = decoder.decode(&mut src).unwrap()
        else {
            panic!("expected chunk");
        };
        assert_eq!(&chunk[..], b"hello");

        let Some(Message::Payload(item)) = decoder.decode(&mut src).unwrap() else {
            panic!("expected eof");
        };
        assert!(item.is_eof());
        assert_eq!(decoder.decode(&mut src).unwrap().map(|_| ()), None);
    }

    #[test]
    fn framed_decode_waits_for_more_input() {
        let mut decoder = RequestDecoder::new();
        let mut src = BytesMut::from(&b"GET / HT"[..]);
        assert!(decoder.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(b"TP/1.1\r\n\r\n");
        assert!(matches!(decoder.decode(&mut src).unwrap(), Some(Message::Header(_))));
    }

    #[test]
    fn framed_encode_round_trips_a_response() {
        let mut encoder = ResponseEncoder::from_inner(HttpResponseEncoder::new().without_auto_date());
        let mut dst = BytesMut::new();

        let mut response = HttpResponse::new(StatusCode::OK, Version::HTTP_11, true);
        response.fields_mut().set(fields::CONTENT_LENGTH, "5");
        encoder.encode(Message::Header(response), &mut dst).unwrap();
        encoder.encode(Bytes::from_static(b"hello").into(), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    }
}
