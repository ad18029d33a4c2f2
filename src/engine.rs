//! Engines pairing a decoder and an encoder on the two directions of a
//! connection and mediating in-stream protocol switches.

use bytes::BytesMut;
use tracing::debug;

use crate::codec::{
    DecodeError, EncodeError, HttpRequestDecoder, HttpRequestEncoder, HttpResponseDecoder,
    HttpResponseEncoder, RecvResult, SendResult,
};
use crate::protocol::{HttpRequest, HttpResponse, RequestInfo};
use crate::upgrade::{ProtocolDecoder, ProtocolEncoder};

enum DecoderSlot<D> {
    Http(D),
    Switched(Box<dyn ProtocolDecoder + Send>),
}

enum EncoderSlot<E> {
    Http(E),
    Switched(Box<dyn ProtocolEncoder + Send>),
}

/// The server side of a connection: decodes requests, encodes responses.
///
/// When the response encoder completes a `101 Switching Protocols`
/// exchange, both codec slots are replaced atomically; the next byte
/// given to [`decode`](Self::decode) or produced by
/// [`encode`](Self::encode) belongs to the new protocol.
pub struct ServerEngine {
    decoder: DecoderSlot<HttpRequestDecoder>,
    encoder: EncoderSlot<HttpResponseEncoder>,
    protocol: Option<String>,
}

impl ServerEngine {
    pub fn new(decoder: HttpRequestDecoder, encoder: HttpResponseEncoder) -> Self {
        Self {
            decoder: DecoderSlot::Http(decoder),
            encoder: EncoderSlot::Http(encoder),
            protocol: None,
        }
    }

    /// The name of the protocol switched to, once an upgrade completed.
    pub fn switched_protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn decode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<RecvResult, DecodeError> {
        let mut result = match &mut self.decoder {
            DecoderSlot::Http(decoder) => decoder.decode(src, dst, end_of_input)?,
            DecoderSlot::Switched(decoder) => decoder.decode(src, dst, end_of_input)?,
        };
        if let Some(switch) = result.take_switch() {
            self.install(switch);
        }
        Ok(result)
    }

    /// Latches a response, supplying the current request's context when
    /// the response does not carry one yet.
    pub fn encode_header(&mut self, mut response: HttpResponse) -> Result<(), EncodeError> {
        if response.request().is_none() {
            if let Some(request) = self.current_request() {
                response.set_request(RequestInfo::of(request));
            }
        }
        match &mut self.encoder {
            EncoderSlot::Http(encoder) => encoder.encode_header(response),
            EncoderSlot::Switched(_) => Err(EncodeError::InvalidState {
                reason: "connection has switched protocols".to_owned(),
            }),
        }
    }

    pub fn encode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<SendResult, EncodeError> {
        let mut result = match &mut self.encoder {
            EncoderSlot::Http(encoder) => encoder.encode(src, dst, end_of_input)?,
            EncoderSlot::Switched(encoder) => encoder.encode(src, dst, end_of_input)?,
        };
        if let Some(switch) = result.take_switch() {
            self.install(switch);
        }
        Ok(result)
    }

    /// The most recently decoded request.
    pub fn current_request(&self) -> Option<&HttpRequest> {
        match &self.decoder {
            DecoderSlot::Http(decoder) => decoder.header(),
            DecoderSlot::Switched(_) => None,
        }
    }

    pub fn take_request(&mut self) -> Option<HttpRequest> {
        match &mut self.decoder {
            DecoderSlot::Http(decoder) => decoder.take_header(),
            DecoderSlot::Switched(_) => None,
        }
    }

    /// The most recently emitted response.
    pub fn current_response(&self) -> Option<&HttpResponse> {
        match &self.encoder {
            EncoderSlot::Http(encoder) => encoder.header(),
            EncoderSlot::Switched(_) => None,
        }
    }

    fn install(&mut self, switch: crate::upgrade::ProtocolSwitch) {
        let (protocol, decoder, encoder) = switch.into_parts();
        debug!(%protocol, "switching protocols");
        self.decoder = DecoderSlot::Switched(decoder);
        self.encoder = EncoderSlot::Switched(encoder);
        self.protocol = Some(protocol);
    }
}

/// The client side of a connection: encodes requests, decodes responses.
/// Symmetric to [`ServerEngine`]; here the protocol switch arrives with
/// the decoded `101` response.
pub struct ClientEngine {
    decoder: DecoderSlot<HttpResponseDecoder>,
    encoder: EncoderSlot<HttpRequestEncoder>,
    protocol: Option<String>,
}

impl ClientEngine {
    pub fn new(decoder: HttpResponseDecoder, encoder: HttpRequestEncoder) -> Self {
        Self {
            decoder: DecoderSlot::Http(decoder),
            encoder: EncoderSlot::Http(encoder),
            protocol: None,
        }
    }

    pub fn switched_protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Latches a request and registers it with the response decoder so
    /// the matching response can be framed.
    pub fn encode_header(&mut self, request: HttpRequest) -> Result<(), EncodeError> {
        match (&mut self.encoder, &mut self.decoder) {
            (EncoderSlot::Http(encoder), DecoderSlot::Http(decoder)) => {
                decoder.request_sent(RequestInfo::of(&request));
                encoder.encode_header(request)
            }
            _ => Err(EncodeError::InvalidState {
                reason: "connection has switched protocols".to_owned(),
            }),
        }
    }

    pub fn encode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<SendResult, EncodeError> {
        let mut result = match &mut self.encoder {
            EncoderSlot::Http(encoder) => encoder.encode(src, dst, end_of_input)?,
            EncoderSlot::Switched(encoder) => encoder.encode(src, dst, end_of_input)?,
        };
        if let Some(switch) = result.take_switch() {
            self.install(switch);
        }
        Ok(result)
    }

    pub fn decode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<RecvResult, DecodeError> {
        let mut result = match &mut self.decoder {
            DecoderSlot::Http(decoder) => decoder.decode(src, dst, end_of_input)?,
            DecoderSlot::Switched(decoder) => decoder.decode(src, dst, end_of_input)?,
        };
        if let Some(switch) = result.take_switch() {
            self.install(switch);
        }
        Ok(result)
    }

    /// The most recently decoded response.
    pub fn current_response(&self) -> Option<&HttpResponse> {
        match &self.decoder {
            DecoderSlot::Http(decoder) => decoder.header(),
            DecoderSlot::Switched(_) => None,
        }
    }

    pub fn take_response(&mut self) -> Option<HttpResponse> {
        match &mut self.decoder {
            DecoderSlot::Http(decoder) => decoder.take_header(),
            DecoderSlot::Switched(_) => None,
        }
    }

    /// The most recently emitted request.
    pub fn current_request(&self) -> Option<&HttpRequest> {
        match &self.encoder {
            EncoderSlot::Http(encoder) => encoder.header(),
            EncoderSlot::Switched(_) => None,
        }
    }

    fn install(&mut self, switch: crate::upgrade::ProtocolSwitch) {
        let (protocol, decoder, encoder) = switch.into_parts();
        debug!(%protocol, "switching protocols");
        self.decoder = DecoderSlot::Switched(decoder);
        self.encoder = EncoderSlot::Switched(encoder);
        self.protocol = Some(protocol);
    }
}
