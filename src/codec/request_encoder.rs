use bytes::{BufMut, BytesMut};
use http::Version;
use snafu::ensure;
use tracing::trace;

use crate::codec::body::{BodyStatus, ChunkedEncoder, LengthEncoder};
use crate::codec::error::encode_error::{BadFramingSnafu, InvalidStateSnafu};
use crate::codec::error::EncodeError;
use crate::codec::{drain_into, put_latin1, version_token, write_fields, SendResult};
use crate::fields::{self, ListConverter, StringConverter};
use crate::protocol::{HttpRequest, MessageHead};
use crate::upgrade::ProtocolEncoder;

enum EncodeState {
    AwaitHeader,
    Head,
    Body(BodyEncoder),
}

enum BodyEncoder {
    Length(LengthEncoder),
    Chunked(ChunkedEncoder),
}

/// Incremental encoder for HTTP requests leaving a client connection.
///
/// The request target is emitted in origin form; the `Host` field is
/// derived from the request's effective host and port when the
/// application did not set one.
pub struct HttpRequestEncoder {
    state: EncodeState,
    scratch: BytesMut,
    latched: Option<HttpRequest>,
    header: Option<HttpRequest>,
    pending_body: Option<BodyEncoder>,
}

impl HttpRequestEncoder {
    pub fn new() -> Self {
        Self {
            state: EncodeState::AwaitHeader,
            scratch: BytesMut::new(),
            latched: None,
            header: None,
            pending_body: None,
        }
    }

    /// The most recently emitted request header.
    pub fn header(&self) -> Option<&HttpRequest> {
        self.header.as_ref()
    }

    /// Latches the next request to emit.
    pub fn encode_header(&mut self, mut request: HttpRequest) -> Result<(), EncodeError> {
        ensure!(
            self.latched.is_none() && matches!(self.state, EncodeState::AwaitHeader),
            InvalidStateSnafu { reason: "a message is already being emitted" }
        );

        if !request.fields().contains(fields::HOST) {
            if let Some(host) = request.host() {
                let value = match request.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_owned(),
                };
                request.fields_mut().set(fields::HOST, value);
            }
        }
        let body = select_framing(&mut request)?;

        self.scratch.put_slice(request.method().as_str().as_bytes());
        self.scratch.put_u8(b' ');
        let target = request.uri().path_and_query().map_or("/", |target| target.as_str());
        put_latin1(&mut self.scratch, target);
        self.scratch.put_u8(b' ');
        self.scratch.put_slice(version_token(request.protocol())?.as_bytes());
        self.scratch.put_slice(b"\r\n");
        write_fields(
            &mut self.scratch,
            request.fields(),
            &[fields::DATE, fields::HOST, fields::CONTENT_LENGTH, fields::TRANSFER_ENCODING],
        );

        trace!(method = %request.method(), head_size = self.scratch.len(), "latched request");
        self.latched = Some(request);
        self.pending_body = body;
        self.state = EncodeState::Head;
        Ok(())
    }

    pub fn encode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<SendResult, EncodeError> {
        let mut result = SendResult::default();
        loop {
            match &mut self.state {
                EncodeState::AwaitHeader => {
                    ensure!(
                        src.is_empty(),
                        InvalidStateSnafu { reason: "body bytes offered before a header" }
                    );
                    result.underflow = true;
                    return Ok(result);
                }

                EncodeState::Head => {
                    if !drain_into(&mut self.scratch, dst, &mut result.written) {
                        result.overflow = true;
                        return Ok(result);
                    }
                    match self.pending_body.take() {
                        Some(body) => self.state = EncodeState::Body(body),
                        None => {
                            ensure!(
                                src.is_empty(),
                                InvalidStateSnafu {
                                    reason: "body bytes offered for a message without payload",
                                }
                            );
                            self.finish(&mut result);
                            return Ok(result);
                        }
                    }
                }

                EncodeState::Body(body) => {
                    let status = match body {
                        BodyEncoder::Length(length) => {
                            length.encode(src, dst, &mut result.written, end_of_input)?
                        }
                        BodyEncoder::Chunked(chunked) => {
                            chunked.encode(src, dst, &mut result.written, end_of_input)
                        }
                    };
                    match status {
                        BodyStatus::Underflow => {
                            result.underflow = true;
                            return Ok(result);
                        }
                        BodyStatus::Overflow => {
                            result.overflow = true;
                            return Ok(result);
                        }
                        BodyStatus::Finished => {
                            self.finish(&mut result);
                            return Ok(result);
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self, result: &mut SendResult) {
        result.message_completed = true;
        self.header = self.latched.take();
        self.state = EncodeState::AwaitHeader;
    }
}

impl Default for HttpRequestEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolEncoder for HttpRequestEncoder {
    fn encode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<SendResult, EncodeError> {
        HttpRequestEncoder::encode(self, src, dst, end_of_input)
    }
}

fn select_framing(request: &mut HttpRequest) -> Result<Option<BodyEncoder>, EncodeError> {
    if !request.has_payload() {
        return Ok(None);
    }
    let declared_length = request
        .fields()
        .get_typed(fields::CONTENT_LENGTH, &fields::IntConverter)
        .map_err(|err| EncodeError::BadFraming { reason: err.to_string() })?;
    let chunked_declared = request
        .fields()
        .get_typed(fields::TRANSFER_ENCODING, &ListConverter::new(StringConverter))
        .unwrap_or_default()
        .unwrap_or_default()
        .last()
        .is_some_and(|coding| coding.eq_ignore_ascii_case("chunked"));
    ensure!(
        declared_length.is_none() || !chunked_declared,
        BadFramingSnafu { reason: "both Content-Length and Transfer-Encoding present" }
    );

    if let Some(length) = declared_length {
        let length = u64::try_from(length).map_err(|_| EncodeError::BadFraming {
            reason: format!("negative content length {length}"),
        })?;
        return Ok(Some(BodyEncoder::Length(LengthEncoder::new(length))));
    }
    if chunked_declared {
        return Ok(Some(BodyEncoder::Chunked(ChunkedEncoder::new())));
    }
    // a request body needs explicit length information before HTTP/1.1
    ensure!(
        request.protocol() == Version::HTTP_11,
        BadFramingSnafu { reason: "request payload requires Content-Length before HTTP/1.1" }
    );
    request.fields_mut().set(fields::TRANSFER_ENCODING, "chunked");
    Ok(Some(BodyEncoder::Chunked(ChunkedEncoder::new())))
}
