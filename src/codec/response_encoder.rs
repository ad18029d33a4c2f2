use std::time::SystemTime;

use bytes::{BufMut, BytesMut};
use http::{Method, StatusCode};
use snafu::ensure;
use tracing::trace;

use crate::codec::body::{BodyStatus, ChunkedEncoder, CloseEncoder, LengthEncoder};
use crate::codec::error::encode_error::{BadFramingSnafu, InvalidStateSnafu};
use crate::codec::error::EncodeError;
use crate::codec::{drain_into, put_latin1, version_token, write_fields, SendResult};
use crate::fields::{self, DateConverter, ListConverter, StringConverter};
use crate::protocol::{HttpResponse, MessageHead};
use crate::upgrade::{find_provider, ProtocolEncoder, UpgradeProvider};

enum EncodeState {
    AwaitHeader,
    Head,
    Body(BodyEncoder),
}

enum BodyEncoder {
    Length(LengthEncoder),
    Chunked(ChunkedEncoder),
    Close(CloseEncoder),
}

/// Incremental encoder for HTTP responses leaving a server connection.
///
/// [`encode_header`](Self::encode_header) latches the next response;
/// [`encode`](Self::encode) then moves bytes until the message is out.
/// A `100 Continue` interim response can be encoded at any time and is
/// emitted before anything else without disturbing a latched response.
/// Emitting a `101 Switching Protocols` response completes with a
/// [`ProtocolSwitch`](crate::upgrade::ProtocolSwitch) when a matching
/// upgrade provider is registered.
pub struct HttpResponseEncoder {
    state: EncodeState,
    scratch: BytesMut,
    interim: BytesMut,
    latched: Option<HttpResponse>,
    header: Option<HttpResponse>,
    pending_body: Option<BodyEncoder>,
    close_after: bool,
    switch_token: Option<String>,
    providers: Vec<Box<dyn UpgradeProvider + Send>>,
    insert_date: bool,
}

impl HttpResponseEncoder {
    pub fn new() -> Self {
        Self {
            state: EncodeState::AwaitHeader,
            scratch: BytesMut::new(),
            interim: BytesMut::new(),
            latched: None,
            header: None,
            pending_body: None,
            close_after: false,
            switch_token: None,
            providers: Vec::new(),
            insert_date: true,
        }
    }

    /// Disables the automatic `Date` field on responses that lack one.
    pub fn without_auto_date(mut self) -> Self {
        self.insert_date = false;
        self
    }

    /// Registers an upgrade provider consulted when a `101` response
    /// completes.
    pub fn add_upgrade_provider(&mut self, provider: Box<dyn UpgradeProvider + Send>) {
        self.providers.push(provider);
    }

    /// The most recently emitted response header.
    pub fn header(&self) -> Option<&HttpResponse> {
        self.header.as_ref()
    }

    /// Latches the next response to emit. A `100 Continue` is staged as
    /// an interim message instead and leaves any latched response alone.
    pub fn encode_header(&mut self, mut response: HttpResponse) -> Result<(), EncodeError> {
        if response.status() == StatusCode::CONTINUE {
            return self.stage_interim(&response);
        }
        ensure!(
            response.status() == StatusCode::SWITCHING_PROTOCOLS
                || !response.status().is_informational(),
            InvalidStateSnafu {
                reason: format!("interim status {} not supported, only 100", response.status()),
            }
        );
        ensure!(
            self.latched.is_none() && matches!(self.state, EncodeState::AwaitHeader),
            InvalidStateSnafu { reason: "a message is already being emitted" }
        );

        if self.insert_date
            && !response.status().is_informational()
            && !response.fields().contains(fields::DATE)
        {
            response.fields_mut().set_typed(fields::DATE, &SystemTime::now(), &DateConverter);
        }

        let (body, close_after) = select_framing(&mut response)?;
        self.close_after = close_after;
        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            self.switch_token = upgrade_token(&response);
        }

        self.scratch.put_slice(version_token(response.protocol())?.as_bytes());
        self.scratch.put_u8(b' ');
        self.scratch.put_slice(response.status().as_str().as_bytes());
        self.scratch.put_u8(b' ');
        put_latin1(&mut self.scratch, response.reason_phrase());
        self.scratch.put_slice(b"\r\n");
        write_fields(
            &mut self.scratch,
            response.fields(),
            &[fields::DATE, fields::CONTENT_LENGTH, fields::TRANSFER_ENCODING],
        );

        trace!(status = %response.status(), head_size = self.scratch.len(), "latched response");
        self.latched = Some(response);
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
            if !self.interim.is_empty() {
                if !drain_into(&mut self.interim, dst, &mut result.written) {
                    result.overflow = true;
                    return Ok(result);
                }
                // the interim message is out; the latched response, if
                // any, follows untouched
                result.message_completed = true;
            }

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
                        BodyEncoder::Close(close) => {
                            close.encode(src, dst, &mut result.written, end_of_input)
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

    fn stage_interim(&mut self, response: &HttpResponse) -> Result<(), EncodeError> {
        self.interim.put_slice(version_token(response.protocol())?.as_bytes());
        self.interim.put_u8(b' ');
        self.interim.put_slice(response.status().as_str().as_bytes());
        self.interim.put_u8(b' ');
        put_latin1(&mut self.interim, response.reason_phrase());
        self.interim.put_slice(b"\r\n\r\n");
        Ok(())
    }

    fn finish(&mut self, result: &mut SendResult) {
        result.message_completed = true;
        result.close_connection = self.close_after;
        if let Some(token) = self.switch_token.take() {
            if let Some(provider) = find_provider(&self.providers, &token) {
                // all staged bytes are out; everything that follows
                // belongs to the new protocol
                result.switch = Some(provider.create());
            }
        }
        self.header = self.latched.take();
        self.state = EncodeState::AwaitHeader;
        self.close_after = false;
    }

}

/// Chooses the body framing for a response about to be latched, adjusting
/// its fields to match. Also decides whether the connection must close
/// once the message is out.
fn select_framing(
    response: &mut HttpResponse,
) -> Result<(Option<BodyEncoder>, bool), EncodeError> {
    let request = response.request();
    let persistent = request.map_or(true, |info| info.persistent());
    let head_request = request.is_some_and(|info| info.method() == &Method::HEAD);
    let mut close_after = !persistent || connection_close(response);

    if !response.has_payload() || head_request {
        return Ok((None, close_after));
    }
    ensure!(
        response.status_permits_payload(),
        BadFramingSnafu {
            reason: format!("status {} does not permit a payload", response.status()),
        }
    );

    let declared_length = response
        .fields()
        .get_typed(fields::CONTENT_LENGTH, &fields::IntConverter)
        .map_err(|err| EncodeError::BadFraming { reason: err.to_string() })?;
    let chunked_declared = transfer_encoding_chunked(response);
    ensure!(
        declared_length.is_none() || !chunked_declared,
        BadFramingSnafu { reason: "both Content-Length and Transfer-Encoding present" }
    );

    let body = if let Some(length) = declared_length {
        let length = u64::try_from(length).map_err(|_| EncodeError::BadFraming {
            reason: format!("negative content length {length}"),
        })?;
        BodyEncoder::Length(LengthEncoder::new(length))
    } else if chunked_declared {
        BodyEncoder::Chunked(ChunkedEncoder::new())
    } else if !persistent || response.protocol() == http::Version::HTTP_10 {
        // no length information and no chunking available: the body
        // extends to connection close
        close_after = true;
        if !connection_close(response) {
            response.fields_mut().append(fields::CONNECTION, "close");
        }
        BodyEncoder::Close(CloseEncoder)
    } else {
        response.fields_mut().remove(fields::CONTENT_LENGTH);
        response.fields_mut().set(fields::TRANSFER_ENCODING, "chunked");
        BodyEncoder::Chunked(ChunkedEncoder::new())
    };
    Ok((Some(body), close_after))
}

impl Default for HttpResponseEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolEncoder for HttpResponseEncoder {
    fn encode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        end_of_input: bool,
    ) -> Result<SendResult, EncodeError> {
        HttpResponseEncoder::encode(self, src, dst, end_of_input)
    }
}

fn connection_close(response: &HttpResponse) -> bool {
    let connection = response
        .fields()
        .get_typed(fields::CONNECTION, &ListConverter::new(StringConverter))
        .unwrap_or_default()
        .unwrap_or_default();
    crate::fields::contains_ignore_case(&connection, "close")
}

fn transfer_encoding_chunked(response: &HttpResponse) -> bool {
    response
        .fields()
        .get_typed(fields::TRANSFER_ENCODING, &ListConverter::new(StringConverter))
        .unwrap_or_default()
        .unwrap_or_default()
        .last()
        .is_some_and(|coding| coding.eq_ignore_ascii_case("chunked"))
}

fn upgrade_token(response: &HttpResponse) -> Option<String> {
    response
        .fields()
        .get_typed(fields::UPGRADE, &ListConverter::new(StringConverter))
        .ok()
        .flatten()
        .and_then(|protocols| protocols.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecodeError, RecvResult};
    use crate::protocol::RequestInfo;
    use crate::upgrade::{ProtocolDecoder, ProtocolSwitch};
    use http::Version;

    fn response(status: StatusCode, has_payload: bool) -> HttpResponse {
        HttpResponse::new(status, Version::HTTP_11, has_payload)
    }

    fn request_info(raw: &[u8]) -> RequestInfo {
        let mut decoder = crate::codec::HttpRequestDecoder::new();
        let mut src = BytesMut::from(raw);
        decoder.decode(&mut src, &mut [], false).unwrap();
        RequestInfo::of(decoder.header().unwrap())
    }

    fn encode_all(
        encoder: &mut HttpResponseEncoder,
        body: &[u8],
        end_of_input: bool,
    ) -> (Vec<u8>, SendResult) {
        let mut src = BytesMut::from(body);
        let mut out = Vec::new();
        let result = loop {
            let mut dst = [0u8; 256];
            let result = encoder.encode(&mut src, &mut dst, end_of_input).unwrap();
            out.extend_from_slice(&dst[..result.written()]);
            if !result.overflow() {
                break result;
            }
        };
        (out, result)
    }

    #[test]
    fn chunked_chosen_without_length_information() {
        let mut encoder = HttpResponseEncoder::new().without_auto_date();
        encoder.encode_header(response(StatusCode::OK, true)).unwrap();

        let (out, result) = encode_all(&mut encoder, b"hello", false);
        assert!(result.underflow());
        assert_eq!(
            out,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n"
        );

        let (out, result) = encode_all(&mut encoder, b"", true);
        assert!(result.message_completed());
        assert_eq!(out, b"0\r\n\r\n");
    }

    #[test]
    fn content_length_framing_is_identity() {
        let mut encoder = HttpResponseEncoder::new().without_auto_date();
        let mut resp = response(StatusCode::OK, true);
        resp.fields_mut().set(fields::CONTENT_LENGTH, "5");
        encoder.encode_header(resp).unwrap();
        let (out, result) = encode_all(&mut encoder, b"hello", true);
        assert!(result.message_completed());
        assert_eq!(out, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    }

    #[test]
    fn lead_fields_ordered_before_the_rest() {
        let mut encoder = HttpResponseEncoder::new().without_auto_date();
        let mut resp = response(StatusCode::OK, true);
        resp.fields_mut().set("X-First", "1");
        resp.fields_mut().set(fields::CONTENT_LENGTH, "0");
        resp.fields_mut().set("X-Second", "2");
        resp.fields_mut().set(fields::DATE, "Sun, 06 Nov 1994 08:49:37 GMT");
        encoder.encode_header(resp).unwrap();
        let (out, _) = encode_all(&mut encoder, b"", true);
        let head = String::from_utf8(out).unwrap();
        let lines: Vec<_> = head.lines().collect();
        assert_eq!(lines[0], "HTTP/1.1 200 OK");
        assert_eq!(lines[1], "Date: Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(lines[2], "Content-Length: 0");
        assert_eq!(lines[3], "X-First: 1");
        assert_eq!(lines[4], "X-Second: 2");
    }

    #[test]
    fn auto_date_inserted_when_missing() {
        let mut encoder = HttpResponseEncoder::new();
        encoder.encode_header(response(StatusCode::NO_CONTENT, false)).unwrap();
        let (out, _) = encode_all(&mut encoder, b"", true);
        let head = String::from_utf8(out).unwrap();
        assert!(head.contains("\r\nDate: "), "{head}");
        assert!(head.ends_with(" GMT\r\n\r\n"), "{head}");
    }

    #[test]
    fn interim_100_emitted_before_latched_response() {
        let mut encoder = HttpResponseEncoder::new().without_auto_date();
        let mut final_response = response(StatusCode::OK, true);
        final_response.fields_mut().set(fields::CONTENT_LENGTH, "2");
        encoder.encode_header(final_response).unwrap();
        // the interim goes out first even though it was staged second
        encoder.encode_header(response(StatusCode::CONTINUE, false)).unwrap();

        let (out, result) = encode_all(&mut encoder, b"ok", true);
        assert!(result.message_completed());
        assert_eq!(
            out,
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"
        );
    }

    #[test]
    fn interim_other_than_100_rejected() {
        let mut encoder = HttpResponseEncoder::new();
        let err = encoder.encode_header(response(StatusCode::PROCESSING, false)).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidState { .. }));
    }

    #[test]
    fn non_persistent_request_forces_identity_and_close() {
        let info = request_info(b"GET / HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n");
        let mut encoder = HttpResponseEncoder::new().without_auto_date();
        let mut resp = response(StatusCode::OK, true);
        resp.set_request(info);
        encoder.encode_header(resp).unwrap();
        let (out, result) = encode_all(&mut encoder, b"payload", true);
        assert!(result.message_completed());
        assert!(result.close_connection());
        assert_eq!(out, b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\npayload");
    }

    #[test]
    fn head_request_suppresses_body() {
        let info = request_info(b"HEAD / HTTP/1.1\r\nHost: a\r\n\r\n");
        let mut encoder = HttpResponseEncoder::new().without_auto_date();
        let mut resp = response(StatusCode::OK, true);
        resp.fields_mut().set(fields::CONTENT_LENGTH, "5");
        resp.set_request(info);
        encoder.encode_header(resp).unwrap();
        let (out, result) = encode_all(&mut encoder, b"", true);
        assert!(result.message_completed());
        assert_eq!(out, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
    }

    #[test]
    fn body_before_header_is_invalid() {
        let mut encoder = HttpResponseEncoder::new();
        let mut src = BytesMut::from(&b"stray"[..]);
        let err = encoder.encode(&mut src, &mut [0u8; 16], false).unwrap_err();
        assert!(matches!(err, EncodeError::InvalidState { .. }));
    }

    #[test]
    fn conflicting_length_and_chunked_rejected() {
        let mut encoder = HttpResponseEncoder::new();
        let mut resp = response(StatusCode::OK, true);
        resp.fields_mut().set(fields::CONTENT_LENGTH, "5");
        resp.fields_mut().set(fields::TRANSFER_ENCODING, "chunked");
        let err = encoder.encode_header(resp).unwrap_err();
        assert!(matches!(err, EncodeError::BadFraming { .. }));
    }

    #[test]
    fn payload_on_bodiless_status_rejected() {
        let mut encoder = HttpResponseEncoder::new();
        let err = encoder.encode_header(response(StatusCode::NO_CONTENT, true)).unwrap_err();
        assert!(matches!(err, EncodeError::BadFraming { .. }));
    }

    #[test]
    fn head_drains_across_small_buffers() {
        let mut encoder = HttpResponseEncoder::new().without_auto_date();
        let mut resp = response(StatusCode::OK, true);
        resp.fields_mut().set(fields::CONTENT_LENGTH, "5");
        encoder.encode_header(resp).unwrap();

        let mut src = BytesMut::from(&b"hello"[..]);
        let mut out = Vec::new();
        loop {
            let mut dst = [0u8; 7];
            let result = encoder.encode(&mut src, &mut dst, true).unwrap();
            out.extend_from_slice(&dst[..result.written()]);
            assert!(result.written() > 0 || result.message_completed());
            if result.message_completed() {
                break;
            }
        }
        assert_eq!(out, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    }

    struct NoopCodec;

    impl ProtocolDecoder for NoopCodec {
        fn decode(
            &mut self,
            _src: &mut BytesMut,
            _dst: &mut [u8],
            _end_of_input: bool,
        ) -> Result<RecvResult, DecodeError> {
            Ok(RecvResult::default())
        }
    }

    impl ProtocolEncoder for NoopCodec {
        fn encode(
            &mut self,
            _src: &mut BytesMut,
            _dst: &mut [u8],
            _end_of_input: bool,
        ) -> Result<SendResult, EncodeError> {
            Ok(SendResult::default())
        }
    }

    struct EchoProvider;

    impl UpgradeProvider for EchoProvider {
        fn protocol(&self) -> &str {
            "echo"
        }

        fn create(&self) -> ProtocolSwitch {
            ProtocolSwitch::new("echo", Box::new(NoopCodec), Box::new(NoopCodec))
        }
    }

    #[test]
    fn switching_protocols_yields_switch_after_head() {
        let mut encoder = HttpResponseEncoder::new().without_auto_date();
        encoder.add_upgrade_provider(Box::new(EchoProvider));
        let mut resp = response(StatusCode::SWITCHING_PROTOCOLS, false);
        resp.fields_mut().set(fields::UPGRADE, "echo");
        resp.fields_mut().set(fields::CONNECTION, "upgrade");
        encoder.encode_header(resp).unwrap();

        let (out, mut result) = encode_all(&mut encoder, b"", true);
        assert!(result.message_completed());
        let head = String::from_utf8(out).unwrap();
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
        let switch = result.take_switch().unwrap();
        assert_eq!(switch.protocol(), "echo");
    }

    #[test]
    fn switching_protocols_without_provider_completes_plain() {
        let mut encoder = HttpResponseEncoder::new().without_auto_date();
        let mut resp = response(StatusCode::SWITCHING_PROTOCOLS, false);
        resp.fields_mut().set(fields::UPGRADE, "unknown/1");
        encoder.encode_header(resp).unwrap();
        let (_, result) = encode_all(&mut encoder, b"", true);
        assert!(result.message_completed());
        assert!(result.switch().is_none());
    }
}
