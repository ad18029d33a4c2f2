mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;

use bytes::{Buf, BytesMut};

pub(crate) use chunked_decoder::ChunkedDecoder;
pub(crate) use chunked_encoder::ChunkedEncoder;
pub(crate) use length_decoder::LengthDecoder;
pub(crate) use length_encoder::LengthEncoder;

/// Progress of a body sub-codec within one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyStatus {
    /// More input needed to continue.
    Underflow,
    /// The output slice is full.
    Overflow,
    /// The payload is complete.
    Finished,
}

/// Decoder for bodies delimited by connection close: every input byte is
/// payload until the peer shuts down.
#[derive(Debug, Default)]
pub(crate) struct CloseDecoder;

impl CloseDecoder {
    pub(crate) fn decode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        written: &mut usize,
        end_of_input: bool,
    ) -> BodyStatus {
        loop {
            if src.is_empty() {
                return if end_of_input { BodyStatus::Finished } else { BodyStatus::Underflow };
            }
            let avail = dst.len() - *written;
            if avail == 0 {
                return BodyStatus::Overflow;
            }
            let n = avail.min(src.len());
            dst[*written..*written + n].copy_from_slice(&src[..n]);
            src.advance(n);
            *written += n;
        }
    }
}

/// Encoder for bodies delimited by connection close: bytes pass through
/// unframed and the caller closes the connection at end of message.
#[derive(Debug, Default)]
pub(crate) struct CloseEncoder;

impl CloseEncoder {
    pub(crate) fn encode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        written: &mut usize,
        end_of_input: bool,
    ) -> BodyStatus {
        loop {
            if src.is_empty() {
                return if end_of_input { BodyStatus::Finished } else { BodyStatus::Underflow };
            }
            let avail = dst.len() - *written;
            if avail == 0 {
                return BodyStatus::Overflow;
            }
            let n = avail.min(src.len());
            dst[*written..*written + n].copy_from_slice(&src[..n]);
            src.advance(n);
            *written += n;
        }
    }
}
