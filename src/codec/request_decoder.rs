use bytes::{Buf, BytesMut};
use snafu::ensure;
use tracing::trace;

use crate::codec::body::{BodyStatus, ChunkedDecoder, LengthDecoder};
use crate::codec::error::decode_error::BadFramingSnafu;
use crate::codec::error::DecodeError;
use crate::codec::head::{
    parse_request_line, FieldAccumulator, LineReader, DEFAULT_MAX_HEADER_LINE,
};
use crate::codec::RecvResult;
use crate::fields::{self, FieldMap, ListConverter, StringConverter};
use crate::protocol::{HttpRequest, HttpResponse, MessageHead};
use crate::upgrade::ProtocolDecoder;

enum DecodeState {
    AwaitMessage,
    StartLine,
    Headers { request: Box<HttpRequest>, acc: FieldAccumulator },
    Body { decoder: BodyDecoder },
    Trailers { acc: FieldAccumulator, fields: FieldMap },
}

enum BodyDecoder {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
}

/// Incremental decoder for HTTP requests arriving on a server connection.
///
/// Bytes are pulled from `src`; body bytes are pushed into `dst`. The
/// decoder never consumes input past the end of the current message. On
/// completing a request header it prepares a 501 response and attaches it
/// to the request; the most recently completed request stays accessible
/// through [`header`](Self::header) and receives any trailer fields.
pub struct HttpRequestDecoder {
    state: DecodeState,
    lines: LineReader,
    header: Option<HttpRequest>,
}

impl HttpRequestDecoder {
    pub fn new() -> Self {
        Self::with_max_header_line(DEFAULT_MAX_HEADER_LINE)
    }

    /// Creates a decoder with a non-default cap on header line length.
    pub fn with_max_header_line(max_line: usize) -> Self {
        Self { state: DecodeState::AwaitMessage, lines: LineReader::new(max_line), header: None }
    }

    /// The most recently completed request header.
    pub fn header(&self) -> Option<&HttpRequest> {
        self.header.as_ref()
    }

    pub fn take_header(&mut self) -> Option<HttpRequest> {
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
                        // a connection ending between messages is a
                        // natural boundary, not an error
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
                    let (method, uri, version) = parse_request_line(&line)?;
                    trace!(%method, %uri, "decoded request line");
                    let request = HttpRequest::new(method, uri, version, false);
                    self.state = DecodeState::Headers {
                        request: Box::new(request),
                        acc: FieldAccumulator::default(),
                    };
                }

                DecodeState::Headers { .. } => {
                    let Some(line) = self.lines.next_line(src)? else {
                        return underflow(result, end_of_input);
                    };
                    let DecodeState::Headers { request, acc } = &mut self.state else {
                        unreachable!()
                    };
                    if !acc.feed(&line, request.fields_mut())? {
                        continue;
                    }
                    let DecodeState::Headers { mut request, .. } =
                        std::mem::replace(&mut self.state, DecodeState::AwaitMessage)
                    else {
                        unreachable!()
                    };
                    let decoder = request_framing(&request)?;
                    request.set_has_payload(decoder.is_some());
                    request.set_response(HttpResponse::prepared_for(&request));

                    result.header_completed = true;
                    result.expect_continue = request.expects_continue();
                    result.close_connection |= !request.persistent_connection();
                    trace!(
                        has_payload = request.has_payload(),
                        field_count = request.fields().len(),
                        "decoded request header"
                    );
                    self.header = Some(*request);

                    match decoder {
                        Some(decoder) => self.state = DecodeState::Body { decoder },
                        None => {
                            result.message_completed = true;
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
                            BodyDecoder::Length(_) => {
                                result.message_completed = true;
                                self.state = DecodeState::AwaitMessage;
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
                    result.message_completed = true;
                    return Ok(result);
                }
            }
        }
    }
}

impl Default for HttpRequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDecoder for HttpRequestDecoder {
    fn decode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<RecvResult, DecodeError> {
        HttpRequestDecoder::decode(self, src, dst, end_of_input)
    }
}

fn underflow(mut result: RecvResult, end_of_input: bool) -> Result<RecvResult, DecodeError> {
    if end_of_input {
        return Err(DecodeError::UnexpectedEof);
    }
    result.underflow = true;
    Ok(result)
}

/// Derives the body framing of a request from its header fields. `None`
/// means the message has no payload.
fn request_framing(request: &HttpRequest) -> Result<Option<BodyDecoder>, DecodeError> {
    let codings = request
        .fields()
        .get_typed(fields::TRANSFER_ENCODING, &ListConverter::new(StringConverter))
        .map_err(|err| DecodeError::MalformedHeader { reason: err.to_string() })?;
    let length = request.fields().get(fields::CONTENT_LENGTH);
    ensure!(
        codings.is_none() || length.is_none(),
        BadFramingSnafu { reason: "both Content-Length and Transfer-Encoding present" }
    );

    if let Some(codings) = codings {
        let chunked = codings.last().is_some_and(|coding| coding.eq_ignore_ascii_case("chunked"));
        return Ok(chunked.then(|| BodyDecoder::Chunked(ChunkedDecoder::new())));
    }
    if let Some(field) = length {
        let length: u64 = field.value().trim().parse().map_err(|_| DecodeError::BadFraming {
            reason: format!("invalid content length {:?}", field.value()),
        })?;
        return Ok((length > 0).then(|| BodyDecoder::Length(LengthDecoder::new(length))));
    }
    // a request without length information has no body
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode, Version};
    use indoc::indoc;

    fn decode_once(
        decoder: &mut HttpRequestDecoder,
        input: &[u8],
        dst: &mut [u8],
    ) -> (RecvResult, BytesMut) {
        let mut src = BytesMut::from(input);
        let result = decoder.decode(&mut src, dst, false).unwrap();
        (result, src)
    }

    #[test]
    fn get_without_body() {
        let mut decoder = HttpRequestDecoder::new();
        let (result, rest) =
            decode_once(&mut decoder, b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n", &mut []);
        assert!(result.header_completed());
        assert!(result.message_completed());
        assert!(!result.close_connection());
        assert!(rest.is_empty());

        let request = decoder.header().unwrap();
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.uri().path(), "/x");
        assert_eq!(request.protocol(), Version::HTTP_11);
        assert!(!request.has_payload());
        assert_eq!(request.fields().get(fields::HOST).unwrap().value(), "a");

        let response = request.response().unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(response.protocol(), Version::HTTP_11);
    }

    #[test]
    fn fixed_length_body_leaves_excess_input() {
        let mut decoder = HttpRequestDecoder::new();
        let mut dst = [0u8; 32];
        let input = b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhelloEXTRA";
        let (result, rest) = decode_once(&mut decoder, input, &mut dst);
        assert!(result.header_completed());
        assert!(result.message_completed());
        assert_eq!(&dst[..result.written()], b"hello");
        assert_eq!(&rest[..], b"EXTRA");
        assert!(decoder.header().unwrap().has_payload());
    }

    #[test]
    fn chunked_body_reassembles() {
        let mut decoder = HttpRequestDecoder::new();
        let mut dst = [0u8; 32];
        let input = b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n\
                      5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let (result, rest) = decode_once(&mut decoder, input, &mut dst);
        assert!(result.message_completed());
        assert_eq!(&dst[..result.written()], b"hello world");
        assert!(rest.is_empty());
    }

    #[test]
    fn chunked_decode_is_split_invariant() {
        let input: &[u8] = b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n\
                             5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        for chunk_size in 1..=7 {
            let mut decoder = HttpRequestDecoder::new();
            let mut payload = Vec::new();
            let mut completed = false;
            let mut src = BytesMut::new();
            for piece in input.chunks(chunk_size) {
                src.extend_from_slice(piece);
                let mut dst = [0u8; 8];
                let result = decoder.decode(&mut src, &mut dst, false).unwrap();
                payload.extend_from_slice(&dst[..result.written()]);
                completed |= result.message_completed();
                // drain any overflow before feeding more input
                while {
                    let mut dst = [0u8; 8];
                    let result = decoder.decode(&mut src, &mut dst, false).unwrap();
                    payload.extend_from_slice(&dst[..result.written()]);
                    completed |= result.message_completed();
                    result.overflow()
                } {}
            }
            assert!(completed, "chunk size {chunk_size}");
            assert_eq!(payload, b"hello world", "chunk size {chunk_size}");
        }
    }

    #[test]
    fn trailers_merge_into_header() {
        let mut decoder = HttpRequestDecoder::new();
        let mut dst = [0u8; 32];
        let input = b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n\
                      5\r\nhello\r\n0\r\nChecksum: abc\r\n\r\n";
        let (result, _) = decode_once(&mut decoder, input, &mut dst);
        assert!(result.message_completed());
        let request = decoder.header().unwrap();
        assert_eq!(request.fields().get("Checksum").unwrap().value(), "abc");
    }

    #[test]
    fn obs_fold_collapses_to_single_space() {
        let mut decoder = HttpRequestDecoder::new();
        let input = b"GET / HTTP/1.1\r\nHost: a\r\nX-Long: first\r\n \t second\r\n\r\n";
        let (result, _) = decode_once(&mut decoder, input, &mut []);
        assert!(result.message_completed());
        assert_eq!(decoder.header().unwrap().fields().get("X-Long").unwrap().value(), "first second");
    }

    #[test]
    fn bare_lf_lines_tolerated() {
        let mut decoder = HttpRequestDecoder::new();
        let input = indoc! {"
            GET /index.html HTTP/1.1
            Host: 127.0.0.1:8080
            Accept: */*

        "};
        let (result, _) = decode_once(&mut decoder, input.as_bytes(), &mut []);
        assert!(result.message_completed());
        let request = decoder.header().unwrap();
        assert_eq!(request.uri().path(), "/index.html");
        assert_eq!(request.fields().len(), 2);
    }

    #[test]
    fn expect_continue_flag_reported() {
        let mut decoder = HttpRequestDecoder::new();
        let input =
            b"POST / HTTP/1.1\r\nHost: a\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n";
        let mut dst = [0u8; 8];
        let (result, _) = decode_once(&mut decoder, input, &mut dst);
        assert!(result.header_completed());
        assert!(result.expect_continue());
        assert!(!result.message_completed());
    }

    #[test]
    fn connection_close_reported() {
        let mut decoder = HttpRequestDecoder::new();
        let input = b"GET / HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n";
        let (result, _) = decode_once(&mut decoder, input, &mut []);
        assert!(result.close_connection());

        let mut decoder = HttpRequestDecoder::new();
        let input = b"GET / HTTP/1.0\r\nHost: a\r\n\r\n";
        let (result, _) = decode_once(&mut decoder, input, &mut []);
        assert!(result.close_connection());
    }

    #[test]
    fn underflow_and_resume_byte_by_byte() {
        let mut decoder = HttpRequestDecoder::new();
        let input = b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n";
        let mut completed = false;
        for &byte in input.iter() {
            let mut src = BytesMut::new();
            src.extend_from_slice(&[byte]);
            let result = decoder.decode(&mut src, &mut [], false).unwrap();
            assert!(src.is_empty());
            if result.message_completed() {
                completed = true;
            } else {
                assert!(result.underflow());
            }
        }
        assert!(completed);
        assert_eq!(decoder.header().unwrap().uri().path(), "/x");
    }

    #[test]
    fn content_length_with_transfer_encoding_rejected() {
        let mut decoder = HttpRequestDecoder::new();
        let mut src = BytesMut::from(
            &b"POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n"[..],
        );
        let err = decoder.decode(&mut src, &mut [], false).unwrap_err();
        assert!(matches!(err, DecodeError::BadFraming { .. }));
    }

    #[test]
    fn eof_mid_message_is_an_error() {
        let mut decoder = HttpRequestDecoder::new();
        let mut src = BytesMut::from(&b"GET / HTTP/1.1\r\nHos"[..]);
        let err = decoder.decode(&mut src, &mut [], true).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof));
    }

    #[test]
    fn eof_between_messages_is_clean() {
        let mut decoder = HttpRequestDecoder::new();
        let mut src = BytesMut::new();
        let result = decoder.decode(&mut src, &mut [], true).unwrap();
        assert!(result.underflow());
        assert!(result.close_connection());
    }

    #[test]
    fn leading_blank_lines_skipped() {
        let mut decoder = HttpRequestDecoder::new();
        let (result, _) =
            decode_once(&mut decoder, b"\r\n\r\nGET / HTTP/1.1\r\nHost: a\r\n\r\n", &mut []);
        assert!(result.message_completed());
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut decoder = HttpRequestDecoder::new();
        let mut src = BytesMut::from(&b"GET / HTTP/2.0\r\n\r\n"[..]);
        let err = decoder.decode(&mut src, &mut [], false).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion { .. }));
    }

    #[test]
    fn header_line_cap_enforced() {
        let mut decoder = HttpRequestDecoder::with_max_header_line(16);
        let mut src = BytesMut::from(&b"GET / HTTP/1.1\r\nX-Big: 0123456789abcdef\r\n\r\n"[..]);
        let err = decoder.decode(&mut src, &mut [], false).unwrap_err();
        assert!(matches!(err, DecodeError::HeaderTooLong { .. }));
    }

    #[test]
    fn pipelined_requests_decode_one_at_a_time() {
        let mut decoder = HttpRequestDecoder::new();
        let input = b"GET /a HTTP/1.1\r\nHost: a\r\n\r\nGET /b HTTP/1.1\r\nHost: a\r\n\r\n";
        let (result, mut rest) = decode_once(&mut decoder, input, &mut []);
        assert!(result.message_completed());
        assert_eq!(decoder.header().unwrap().uri().path(), "/a");

        let result = decoder.decode(&mut rest, &mut [], false).unwrap();
        assert!(result.message_completed());
        assert_eq!(decoder.header().unwrap().uri().path(), "/b");
    }
}
