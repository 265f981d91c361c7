//! Annex B byte stream reader
//!
//! Raw H.264 output from encoders and capture tools is a byte stream of NAL
//! units separated by start codes (`00 00 01` or `00 00 00 01`). The reader
//! splits it back into NAL units without the start codes, which is the form
//! the hub expects.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Bytes requested from the underlying reader per read
const READ_CHUNK: usize = 64 * 1024;

/// Splits an async byte stream into NAL units
pub struct AnnexBReader<R> {
    reader: R,
    buf: BytesMut,
    /// A start code has been consumed and `buf` begins with NAL payload
    in_unit: bool,
    /// Offset in `buf` from which the next start code search resumes
    scan_from: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> AnnexBReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK),
            in_unit: false,
            scan_from: 0,
            eof: false,
        }
    }

    /// Read the next NAL unit.
    ///
    /// Returns `Ok(None)` at end of input. Bytes before the first start
    /// code are discarded. A unit may be empty when two start codes are
    /// adjacent.
    pub async fn next_nal(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            if !self.in_unit {
                if let Some(pos) = find_start_code(&self.buf, 0) {
                    self.buf.advance(pos + 3);
                    self.in_unit = true;
                    self.scan_from = 0;
                    continue;
                }
                if self.eof {
                    self.buf.clear();
                    return Ok(None);
                }
                // Keep a possible partial start code
                let keep = self.buf.len().min(2);
                let discard = self.buf.len() - keep;
                self.buf.advance(discard);
            } else {
                if let Some(pos) = find_start_code(&self.buf, self.scan_from) {
                    let unit = self.buf.split_to(pos);
                    self.buf.advance(3);
                    self.scan_from = 0;
                    return Ok(Some(trim_trailing_zeros(unit)));
                }
                if self.eof {
                    self.in_unit = false;
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let unit = self.buf.split();
                    return Ok(Some(trim_trailing_zeros(unit)));
                }
                self.scan_from = self.buf.len().saturating_sub(2);
            }

            self.buf.reserve(READ_CHUNK);
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }
}

/// Position of the next `00 00 01` at or after `from`
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 || from > data.len() - 3 {
        return None;
    }
    data[from..]
        .windows(3)
        .position(|w| w == [0, 0, 1])
        .map(|p| p + from)
}

/// Drop the zero byte of a 4-byte start code (and any trailing_zero_8bits)
fn trim_trailing_zeros(mut unit: BytesMut) -> Bytes {
    let end = unit.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    unit.truncate(end);
    unit.freeze()
}
