use bytes::{Buf, BytesMut};

use crate::codec::body::BodyStatus;
use crate::codec::error::encode_error::BadFramingSnafu;
use crate::codec::error::EncodeError;

/// Encoder for identity bodies with a declared `Content-Length`. The
/// supplied body bytes must match the declared length exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LengthEncoder {
    remaining: u64,
}

impl LengthEncoder {
    pub(crate) fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    pub(crate) fn encode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        written: &mut usize,
        end_of_input: bool,
    ) -> Result<BodyStatus, EncodeError> {
        loop {
            if self.remaining == 0 {
                if !src.is_empty() {
                    return BadFramingSnafu { reason: "body exceeds declared content length" }
                        .fail();
                }
                return Ok(BodyStatus::Finished);
            }
            if src.is_empty() {
                if end_of_input {
                    return BadFramingSnafu {
                        reason: format!("body ended {} bytes short of content length", self.remaining),
                    }
                    .fail();
                }
                return Ok(BodyStatus::Underflow);
            }
            let avail = dst.len() - *written;
            if avail == 0 {
                return Ok(BodyStatus::Overflow);
            }
            let n = (self.remaining.min(src.len() as u64) as usize).min(avail);
            dst[*written..*written + n].copy_from_slice(&src[..n]);
            src.advance(n);
            *written += n;
            self.remaining -= n as u64;
        }
    }
}
