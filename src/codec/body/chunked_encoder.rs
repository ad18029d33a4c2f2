use bytes::{Buf, BytesMut};

use crate::codec::body::BodyStatus;

const TERMINATOR: &[u8] = b"0\r\n\r\n";

/// Incremental encoder for chunked transfer coding. Every call that
/// moves body bytes frames them as `size CRLF data CRLF`; chunk sizes
/// adapt to the room left in the output slice. Extensions are never
/// emitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct ChunkedEncoder {
    done: bool,
}

impl ChunkedEncoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn encode(
        &mut self,
        src: &mut BytesMut,
        dst: &mut [u8],
        written: &mut usize,
        end_of_input: bool,
    ) -> BodyStatus {
        loop {
            if self.done {
                return BodyStatus::Finished;
            }

            if src.is_empty() {
                if !end_of_input {
                    return BodyStatus::Underflow;
                }
                if dst.len() - *written < TERMINATOR.len() {
                    return BodyStatus::Overflow;
                }
                dst[*written..*written + TERMINATOR.len()].copy_from_slice(TERMINATOR);
                *written += TERMINATOR.len();
                self.done = true;
                return BodyStatus::Finished;
            }

            let avail = dst.len() - *written;
            let n = max_chunk(src.len(), avail);
            if n == 0 {
                return BodyStatus::Overflow;
            }
            let size_line = format!("{n:X}\r\n");
            let mut cursor = *written;
            dst[cursor..cursor + size_line.len()].copy_from_slice(size_line.as_bytes());
            cursor += size_line.len();
            dst[cursor..cursor + n].copy_from_slice(&src[..n]);
            cursor += n;
            dst[cursor..cursor + 2].copy_from_slice(b"\r\n");
            cursor += 2;
            src.advance(n);
            *written = cursor;
        }
    }
}

/// Largest data size `n <= src_len` whose framed form `hex(n) CRLF data
/// CRLF` fits into `avail` bytes.
fn max_chunk(src_len: usize, avail: usize) -> usize {
    let mut n = src_len.min(avail);
    while n > 0 {
        let overhead = hex_digits(n) + 4;
        if n + overhead <= avail {
            return n;
        }
        n = avail.saturating_sub(overhead).min(n - 1);
    }
    0
}

fn hex_digits(n: usize) -> usize {
    if n == 0 {
        1
    } else {
        ((usize::BITS - n.leading_zeros() + 3) / 4) as usize
    }
}
