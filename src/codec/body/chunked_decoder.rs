use bytes::{Buf, BytesMut};
use snafu::ensure;

use crate::codec::body::BodyStatus;
use crate::codec::error::decode_error::BadFramingSnafu;
use crate::codec::error::DecodeError;

/// Incremental decoder for chunked transfer coding. Chunk extensions are
/// ignored. The trailer section is not consumed here; once the last
/// chunk's size line is read the decoder reports [`BodyStatus::Finished`]
/// and leaves the trailer lines to the message decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkedDecoder {
    state: ChunkedState,
    remaining: u64,
    size_digits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    AtTrailers,
}

use ChunkedState::*;

impl ChunkedDecoder {
    pub(crate) fn new() -> Self {
        Self { state: Size, remaining: 0, size_digits: 0 }
    }

    pub(crate) fn decode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        written: &mut usize,
    ) -> Result<BodyStatus, DecodeError> {
        loop {
            if self.state == AtTrailers {
                return Ok(BodyStatus::Finished);
            }

            if self.state == Data {
                if self.remaining == 0 {
                    self.state = DataCr;
                    continue;
                }
                if src.is_empty() {
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
                continue;
            }

            if src.is_empty() {
                return Ok(BodyStatus::Underflow);
            }
            self.step(src.get_u8())?;
        }
    }

    fn step(&mut self, byte: u8) -> Result<(), DecodeError> {
        self.state = match self.state {
            Size => match byte {
                b @ (b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F') => {
                    self.push_digit(b)?;
                    Size
                }
                b'\t' | b' ' => self.after_size(SizeLws)?,
                b';' => self.after_size(Extension)?,
                b'\r' => self.after_size(SizeLf)?,
                _ => return BadFramingSnafu { reason: "invalid chunk size" }.fail(),
            },
            // whitespace may follow the chunk size, but no more digits
            SizeLws => match byte {
                b'\t' | b' ' => SizeLws,
                b';' => Extension,
                b'\r' => SizeLf,
                _ => return BadFramingSnafu { reason: "invalid chunk size whitespace" }.fail(),
            },
            // extensions are ignored; they end at the next CRLF, and a
            // stray LF inside one is rejected rather than passed on
            Extension => match byte {
                b'\r' => SizeLf,
                b'\n' => return BadFramingSnafu { reason: "newline in chunk extension" }.fail(),
                _ => Extension,
            },
            SizeLf => match byte {
                b'\n' if self.remaining == 0 => AtTrailers,
                b'\n' => Data,
                _ => return BadFramingSnafu { reason: "invalid chunk size line end" }.fail(),
            },
            DataCr => match byte {
                b'\r' => DataLf,
                _ => return BadFramingSnafu { reason: "missing CR after chunk data" }.fail(),
            },
            DataLf => match byte {
                b'\n' => {
                    self.size_digits = 0;
                    Size
                }
                _ => return BadFramingSnafu { reason: "missing LF after chunk data" }.fail(),
            },
            Data | AtTrailers => unreachable!("handled in decode"),
        };
        Ok(())
    }

    fn push_digit(&mut self, byte: u8) -> Result<(), DecodeError> {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            _ => byte - b'A' + 10,
        };
        self.remaining = self
            .remaining
            .checked_mul(16)
            .and_then(|size| size.checked_add(u64::from(digit)))
            .ok_or(DecodeError::BadFraming { reason: "chunk size overflow".to_owned() })?;
        self.size_digits += 1;
        Ok(())
    }

    fn after_size(&self, next: ChunkedState) -> Result<ChunkedState, DecodeError> {
        ensure!(self.size_digits > 0, BadFramingSnafu { reason: "empty chunk size" });
        Ok(next)
    }
}
