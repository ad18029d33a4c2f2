use bytes::{Buf, BytesMut};

use crate::codec::body::BodyStatus;

/// Decoder for identity bodies with a known length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LengthDecoder {
    remaining: u64,
}

impl LengthDecoder {
    pub(crate) fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    pub(crate) fn decode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        written: &mut usize,
    ) -> BodyStatus {
        loop {
            if self.remaining == 0 {
                return BodyStatus::Finished;
            }
            if src.is_empty() {
                return BodyStatus::Underflow;
            }
            let avail = dst.len() - *written;
            if avail == 0 {
                return BodyStatus::Overflow;
            }
            let n = (self.remaining.min(src.len() as u64) as usize).min(avail);
            dst[*written..*written + n].copy_from_slice(&src[..n]);
            src.advance(n);
            *written += n;
            self.remaining -= n as u64;
        }
    }
}
