use bytes::BytesMut;
use http::{Method, StatusCode, Uri, Version};
use snafu::ensure;

use crate::codec::error::decode_error::{
    HeaderTooLongSnafu, MalformedHeaderSnafu, MalformedStartLineSnafu,
};
use crate::codec::error::DecodeError;
use crate::codec::latin1_to_string;
use crate::fields::FieldMap;
use crate::scan::is_token;

pub(crate) const DEFAULT_MAX_HEADER_LINE: usize = 8 * 1024;

/// Assembles lines from an incrementally filled buffer. Lines end with
/// CRLF; a bare LF is tolerated. Partial line bytes are carried between
/// calls in an owned scratch buffer, never aliasing the caller's.
pub(crate) struct LineReader {
    partial: BytesMut,
    max_line: usize,
}

impl LineReader {
    pub(crate) fn new(max_line: usize) -> Self {
        Self { partial: BytesMut::new(), max_line }
    }

    /// Returns the next complete line without its terminator, or `None`
    /// when `src` is drained before one shows up.
    pub(crate) fn next_line(&mut self, src: &mut BytesMut) -> Result<Option<String>, DecodeError> {
        match src.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                let line = src.split_to(idx + 1);
                self.check_cap(self.partial.len() + idx)?;
                self.partial.extend_from_slice(&line[..idx]);
                let mut complete = self.partial.split();
                if complete.last() == Some(&b'\r') {
                    let len = complete.len();
                    complete.truncate(len - 1);
                }
                Ok(Some(latin1_to_string(&complete)))
            }
            None => {
                self.check_cap(self.partial.len() + src.len())?;
                self.partial.extend_from_slice(src);
                src.clear();
                Ok(None)
            }
        }
    }

    fn check_cap(&self, current_size: usize) -> Result<(), DecodeError> {
        ensure!(
            current_size <= self.max_line,
            HeaderTooLongSnafu { current_size, max_size: self.max_line }
        );
        Ok(())
    }
}

/// Collects header lines into a [`FieldMap`], folding obs-fold
/// continuation lines into the preceding field with a single space.
#[derive(Default)]
pub(crate) struct FieldAccumulator {
    pending: Option<(String, String)>,
}

impl FieldAccumulator {
    /// Feeds one header line. Returns `true` when the blank line ending
    /// the section was consumed.
    pub(crate) fn feed(&mut self, line: &str, fields: &mut FieldMap) -> Result<bool, DecodeError> {
        if line.is_empty() {
            self.commit(fields);
            return Ok(true);
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let Some((_, value)) = &mut self.pending else {
                return MalformedHeaderSnafu { reason: "continuation line without a field" }
                    .fail();
            };
            value.push(' ');
            value.push_str(line.trim_matches([' ', '\t']));
            return Ok(false);
        }
        self.commit(fields);
        let Some((name, value)) = line.split_once(':') else {
            return MalformedHeaderSnafu { reason: format!("missing colon in {line:?}") }.fail();
        };
        ensure!(
            is_token(name),
            MalformedHeaderSnafu { reason: format!("invalid field name {name:?}") }
        );
        self.pending = Some((name.to_owned(), value.trim_matches([' ', '\t']).to_owned()));
        Ok(false)
    }

    fn commit(&mut self, fields: &mut FieldMap) {
        if let Some((name, value)) = self.pending.take() {
            fields.append(name, value);
        }
    }
}

pub(crate) fn parse_version(text: &str) -> Result<Version, DecodeError> {
    match text {
        "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        other if other.starts_with("HTTP/") => {
            Err(DecodeError::UnsupportedVersion { version: other.to_owned() })
        }
        other => MalformedStartLineSnafu { reason: format!("invalid protocol {other:?}") }.fail(),
    }
}

pub(crate) fn parse_request_line(line: &str) -> Result<(Method, Uri, Version), DecodeError> {
    let mut parts = line.splitn(3, ' ');
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return MalformedStartLineSnafu { reason: format!("expected three parts in {line:?}") }
            .fail();
    };
    ensure!(
        is_token(method),
        MalformedStartLineSnafu { reason: format!("invalid method {method:?}") }
    );
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| DecodeError::MalformedStartLine { reason: format!("invalid method {method:?}") })?;
    let uri: Uri = target
        .parse()
        .map_err(|_| DecodeError::MalformedStartLine { reason: format!("invalid request target {target:?}") })?;
    let version = parse_version(version)?;
    Ok((method, uri, version))
}

pub(crate) fn parse_status_line(line: &str) -> Result<(Version, StatusCode, String), DecodeError> {
    let mut parts = line.splitn(3, ' ');
    let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
        return MalformedStartLineSnafu { reason: format!("expected status line, got {line:?}") }
            .fail();
    };
    let reason = parts.next().unwrap_or("").to_owned();
    let version = parse_version(version)?;
    let number: u16 = code.parse().map_err(|_| DecodeError::MalformedStartLine {
        reason: format!("invalid status code {code:?}"),
    })?;
    ensure!(
        (100..=599).contains(&number),
        MalformedStartLineSnafu { reason: format!("status code {number} out of range") }
    );
    let status = StatusCode::from_u16(number).map_err(|_| DecodeError::MalformedStartLine {
        reason: format!("invalid status code {code:?}"),
    })?;
    Ok((version, status, reason))
}
