use std::io::Error as IoError;

use snafu::Snafu;

/// Errors raised while decoding a byte stream. All of them are fatal for
/// the current connection.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module)]
pub enum DecodeError {
    #[snafu(display("io error while decoding: {source}"), context(false))]
    Io { source: IoError },

    #[snafu(display("malformed start line: {reason}"))]
    MalformedStartLine { reason: String },

    #[snafu(display("malformed header: {reason}"))]
    MalformedHeader { reason: String },

    #[snafu(display("header line too long, current size: {current_size}, max size: {max_size}"))]
    HeaderTooLong { current_size: usize, max_size: usize },

    #[snafu(display("bad framing: {reason}"))]
    BadFraming { reason: String },

    #[snafu(display("unexpected end of input mid-message"))]
    UnexpectedEof,

    #[snafu(display("unsupported HTTP version: {version}"))]
    UnsupportedVersion { version: String },
}

/// Errors raised while encoding messages onto a byte stream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module)]
pub enum EncodeError {
    #[snafu(display("io error while encoding: {source}"), context(false))]
    Io { source: IoError },

    #[snafu(display("invalid encoder state: {reason}"))]
    InvalidState { reason: String },

    #[snafu(display("bad framing: {reason}"))]
    BadFraming { reason: String },

    #[snafu(display("unsupported HTTP version: {version:?}"))]
    UnsupportedVersion { version: http::Version },
}
