use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use http::{Method, Version};
use snafu::ensure;
use tracing::trace;

use crate::codec::body::{BodyStatus, ChunkedDecoder, CloseDecoder, LengthDecoder};
use crate::codec::error::decode_error::BadFramingSnafu;
use crate::codec::error::DecodeError;
use crate::codec::head::{
    parse_status_line, FieldAccumulator, LineReader, DEFAULT_MAX_HEADER_LINE,
};
use crate::codec::RecvResult;
use crate::fields::{self, contains_ignore_case, FieldMap, ListConverter, StringConverter};
use crate::protocol::{HttpResponse, MessageHead, RequestInfo};
use crate::upgrade::{find_provider, ProtocolDecoder, UpgradeProvider};

enum DecodeState {
    AwaitMessage,
    StartLine,
    Headers { response: Box<HttpResponse>, acc: FieldAccumulator },
    Body { decoder: BodyDecoder },
    Trailers { acc: FieldAccumulator, fields: FieldMap },
}

enum BodyDecoder {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    Close(CloseDecoder),
}

/// Incremental decoder for HTTP responses arriving on a client
/// connection.
///
/// The caller registers each request it sent with
/// [`request_sent`](Self::request_sent) so the decoder can frame the
/// matching responses (a `HEAD` response has no body regardless of its
/// fields). Interim `1xx` responses complete as their own messages
/// without consuming the registered request. A completed
/// `101 Switching Protocols` response yields a protocol switch when a
/// matching upgrade provider is registered.
pub struct HttpResponseDecoder {
    state: DecodeState,
    lines: LineReader,
    header: Option<HttpResponse>,
    requests: VecDeque<RequestInfo>,
    providers: Vec<Box<dyn UpgradeProvider + Send>>,
}

impl HttpResponseDecoder {
    pub fn new() -> Self {
        Self::with_max_header_line(DEFAULT_MAX_HEADER_LINE)
    }

    pub fn with_max_header_line(max_line: usize) -> Self {
        Self {
            state: DecodeState::AwaitMessage,
            lines: LineReader::new(max_line),
            header: None,
            requests: VecDeque::new(),
            providers: Vec::new(),
        }
    }

    /// Registers an upgrade provider consulted when a `101` response
    /// completes.
    pub fn add_upgrade_provider(&mut self, provider: Box<dyn UpgradeProvider + Send>) {
        self.providers.push(provider);
    }

    /// Records a request sent on this connection; responses are matched
    /// in order.
    pub fn request_sent(&mut self, request: RequestInfo) {
        self.requests.push_back(request);
    }

    /// The most recently completed response header.
    pub fn header(&self) -> Option<&HttpResponse> {
        self.header.as_ref()
    }

    pub fn take_header(&mut self) -> Option<HttpResponse> {
        self.header.take()
    }

    pub fn decode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<RecvResult, DecodeError> {
        let mut result = RecvResult::default();
        loop {
            match &mut self.state {
                DecodeState::AwaitMessage => {
                    while let Some(&byte) = src.first() {
                        if byte == b'\r' || byte == b'\n' {
                            src.advance(1);
                        } else {
                            break;
                        }
                    }
                    if src.is_empty() {
                        result.underflow = true;
                        result.close_connection |= end_of_input;
                        return Ok(result);
                    }
                    self.state = DecodeState::StartLine;
                }

                DecodeState::StartLine => {
                    let Some(line) = self.lines.next_line(src)? else {
                        return underflow(result, end_of_input);
                    };
                    let (version, status, reason) = parse_status_line(&line)?;
                    trace!(%status, "decoded status line");
                    let mut response = HttpResponse::new(status, version, false);
                    if !reason.is_empty() {
                        response.set_reason_phrase(reason);
                    }
                    self.state = DecodeState::Headers {
                        response: Box::new(response),
                        acc: FieldAccumulator::default(),
                    };
                }

                DecodeState::Headers { .. } => {
                    let Some(line) = self.lines.next_line(src)? else {
                        return underflow(result, end_of_input);
                    };
                    let DecodeState::Headers { response, acc } = &mut self.state else {
                        unreachable!()
                    };
                    if !acc.feed(&line, response.fields_mut())? {
                        continue;
                    }
                    let DecodeState::Headers { mut response, .. } =
                        std::mem::replace(&mut self.state, DecodeState::AwaitMessage)
                    else {
                        unreachable!()
                    };
                    let interim = response.status().is_informational();
                    if let Some(request) = self.requests.front() {
                        response.set_request(request.clone());
                    }
                    let decoder = response_framing(&response, self.requests.front())?;
                    response.set_has_payload(decoder.is_some());

                    result.header_completed = true;
                    if matches!(decoder, Some(BodyDecoder::Close(_))) || !persistent(&response) {
                        result.close_connection = true;
                    }
                    self.header = Some(*response);

                    match decoder {
                        Some(decoder) => self.state = DecodeState::Body { decoder },
                        None => {
                            self.finish_message(&mut result, interim);
                            return Ok(result);
                        }
                    }
                }

                DecodeState::Body { decoder } => {
                    let status = match decoder {
                        BodyDecoder::Length(length) => length.decode(src, dst, &mut result.written),
                        BodyDecoder::Chunked(chunked) => {
                            chunked.decode(src, dst, &mut result.written)?
                        }
                        BodyDecoder::Close(close) => {
                            close.decode(src, dst, &mut result.written, end_of_input)
                        }
                    };
                    match status {
                        BodyStatus::Underflow => return underflow(result, end_of_input),
                        BodyStatus::Overflow => {
                            result.overflow = true;
                            return Ok(result);
                        }
                        BodyStatus::Finished => match decoder {
                            BodyDecoder::Chunked(_) => {
                                self.state = DecodeState::Trailers {
                                    acc: FieldAccumulator::default(),
                                    fields: FieldMap::new(),
                                }
                            }
                            _ => {
                                self.state = DecodeState::AwaitMessage;
                                self.finish_message(&mut result, false);
                                return Ok(result);
                            }
                        },
                    }
                }

                DecodeState::Trailers { .. } => {
                    let Some(line) = self.lines.next_line(src)? else {
                        return underflow(result, end_of_input);
                    };
                    let DecodeState::Trailers { acc, fields } = &mut self.state else {
                        unreachable!()
                    };
                    if !acc.feed(&line, fields)? {
                        continue;
                    }
                    let DecodeState::Trailers { fields, .. } =
                        std::mem::replace(&mut self.state, DecodeState::AwaitMessage)
                    else {
                        unreachable!()
                    };
                    if let Some(header) = &mut self.header {
                        for field in &fields {
                            header.fields_mut().append(field.name(), field.value());
                        }
                    }
                    self.finish_message(&mut result, false);
                    return Ok(result);
                }
            }
        }
    }

    fn finish_message(&mut self, result: &mut RecvResult, interim: bool) {
        result.message_completed = true;
        let response = self.header.as_ref();
        let switching =
            response.is_some_and(|r| r.status() == http::StatusCode::SWITCHING_PROTOCOLS);
        if interim && !switching {
            // an interim response does not answer the pending request
            return;
        }
        self.requests.pop_front();
        if switching {
            let token = response
                .and_then(|r| {
                    r.fields()
                        .get_typed(fields::UPGRADE, &ListConverter::new(StringConverter))
                        .ok()
                        .flatten()
                })
                .and_then(|protocols| protocols.into_iter().next());
            if let Some(token) = token {
                if let Some(provider) = find_provider(&self.providers, &token) {
                    result.switch = Some(provider.create());
                }
            }
        }
    }
}

impl Default for HttpResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDecoder for HttpResponseDecoder {
    fn decode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<RecvResult, DecodeError> {
        HttpResponseDecoder::decode(self, src, dst, end_of_input)
    }
}

fn underflow(mut result: RecvResult, end_of_input: bool) -> Result<RecvResult, DecodeError> {
    if end_of_input {
        return Err(DecodeError::UnexpectedEof);
    }
    result.underflow = true;
    Ok(result)
}

fn persistent(response: &HttpResponse) -> bool {
    let connection = response
        .fields()
        .get_typed(fields::CONNECTION, &ListConverter::new(StringConverter))
        .unwrap_or_default()
        .unwrap_or_default();
    match response.protocol() {
        Version::HTTP_11 => !contains_ignore_case(&connection, "close"),
        _ => contains_ignore_case(&connection, "keep-alive"),
    }
}

/// Derives the body framing of a response. `None` means no payload;
/// without length information a response body runs until the connection
/// closes.
fn response_framing(
    response: &HttpResponse,
    request: Option<&RequestInfo>,
) -> Result<Option<BodyDecoder>, DecodeError> {
    if request.is_some_and(|info| info.method() == &Method::HEAD)
        || !response.status_permits_payload()
    {
        return Ok(None);
    }
    let codings = response
        .fields()
        .get_typed(fields::TRANSFER_ENCODING, &ListConverter::new(StringConverter))
        .map_err(|err| DecodeError::MalformedHeader { reason: err.to_string() })?;
    let length = response.fields().get(fields::CONTENT_LENGTH);
    ensure!(
        codings.is_none() || length.is_none(),
        BadFramingSnafu { reason: "both Content-Length and Transfer-Encoding present" }
    );

    if let Some(codings) = codings {
        if codings.last().is_some_and(|coding| coding.eq_ignore_ascii_case("chunked")) {
            return Ok(Some(BodyDecoder::Chunked(ChunkedDecoder::new())));
        }
        return Ok(Some(BodyDecoder::Close(CloseDecoder)));
    }
    if let Some(field) = length {
        let length: u64 = field.value().trim().parse().map_err(|_| DecodeError::BadFraming {
            reason: format!("invalid content length {:?}", field.value()),
        })?;
        return Ok((length > 0).then(|| BodyDecoder::Length(LengthDecoder::new(length))));
    }
    Ok(Some(BodyDecoder::Close(CloseDecoder)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn info(method: Method) -> RequestInfo {
        let request = crate::protocol::HttpRequest::new(
            method,
            "/".parse().unwrap(),
            Version::HTTP_11,
            false,
        );
        RequestInfo::of(&request)
    }

    #[test]
    fn fixed_length_response() {
        let mut decoder = HttpResponseDecoder::new();
        decoder.request_sent(info(Method::GET));
        let mut src =
            BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"[..]);
        let mut dst = [0u8; 16];
        let result = decoder.decode(&mut src, &mut dst, false).unwrap();
        assert!(result.header_completed());
        assert!(result.message_completed());
        assert_eq!(&dst[..result.written()], b"hello");
        assert!(!result.close_connection());

        let response = decoder.header().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.reason_phrase(), "OK");
    }

    #[test]
    fn head_response_has_no_body() {
        let mut decoder = HttpResponseDecoder::new();
        decoder.request_sent(info(Method::HEAD));
        let mut src =
            BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n"[..]);
        let result = decoder.decode(&mut src, &mut [], false).unwrap();
        assert!(result.message_completed());
        assert!(!decoder.header().unwrap().has_payload());
    }

    #[test]
    fn body_runs_until_close_without_length() {
        let mut decoder = HttpResponseDecoder::new();
        decoder.request_sent(info(Method::GET));
        let mut src = BytesMut::from(&b"HTTP/1.0 200 OK\r\n\r\nsome data"[..]);
        let mut dst = [0u8; 32];
        let result = decoder.decode(&mut src, &mut dst, false).unwrap();
        assert!(result.header_completed());
        assert!(result.close_connection());
        assert!(!result.message_completed());
        assert_eq!(&dst[..result.written()], b"some data");

        let mut written_dst = [0u8; 8];
        let result = decoder.decode(&mut BytesMut::new(), &mut written_dst, true).unwrap();
        assert!(result.message_completed());
    }

    #[test]
    fn interim_response_keeps_request_context() {
        let mut decoder = HttpResponseDecoder::new();
        decoder.request_sent(info(Method::HEAD));
        let mut src = BytesMut::from(
            &b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\n"[..],
        );
        let result = decoder.decode(&mut src, &mut [], false).unwrap();
        assert!(result.message_completed());
        assert_eq!(decoder.header().unwrap().status(), StatusCode::CONTINUE);

        // the HEAD context still applies to the final response
        let result = decoder.decode(&mut src, &mut [], false).unwrap();
        assert!(result.message_completed());
        assert_eq!(decoder.header().unwrap().status(), StatusCode::OK);
        assert!(!decoder.header().unwrap().has_payload());
    }

    #[test]
    fn status_204_and_304_have_no_body() {
        for status in ["204 No Content", "304 Not Modified"] {
            let mut decoder = HttpResponseDecoder::new();
            decoder.request_sent(info(Method::GET));
            let raw = format!("HTTP/1.1 {status}\r\n\r\n");
            let mut src = BytesMut::from(raw.as_bytes());
            let result = decoder.decode(&mut src, &mut [], false).unwrap();
            assert!(result.message_completed(), "{status}");
        }
    }

    #[test]
    fn chunked_response_with_trailers() {
        let mut decoder = HttpResponseDecoder::new();
        decoder.request_sent(info(Method::GET));
        let mut src = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
               5\r\nhello\r\n0\r\nExpires: never\r\n\r\n"[..],
        );
        let mut dst = [0u8; 16];
        let result = decoder.decode(&mut src, &mut dst, false).unwrap();
        assert!(result.message_completed());
        assert_eq!(&dst[..result.written()], b"hello");
        assert_eq!(decoder.header().unwrap().fields().get("Expires").unwrap().value(), "never");
    }

    #[test]
    fn connection_close_field_reported() {
        let mut decoder = HttpResponseDecoder::new();
        decoder.request_sent(info(Method::GET));
        let mut src = BytesMut::from(
            &b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n"[..],
        );
        let result = decoder.decode(&mut src, &mut [], false).unwrap();
        assert!(result.close_connection());
    }
}
