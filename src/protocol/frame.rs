//! Length-prefixed frame reading and writing.
//!
//! Wire format:
//!
//! ```text
//! +----------------+---------------------------+
//! | LEN (u32, LE)  | PAYLOAD (LEN bytes, UTF-8) |
//! +----------------+---------------------------+
//! ```
//!
//! Reads use wait-all semantics: a read keeps going until the requested
//! number of bytes has arrived or the peer goes away.

use bytes::{BufMut, BytesMut};
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Largest payload accepted from a peer.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Which part of a frame a short read happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSection {
    Header,
    Payload,
}

impl fmt::Display for FrameSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSection::Header => f.write_str("length prefix"),
            FrameSection::Payload => f.write_str("payload"),
        }
    }
}

/// Errors produced while decoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed before the full section arrived.
    #[error("connection closed while reading {section}: got {read} of {expected} bytes")]
    ShortRead {
        section: FrameSection,
        read: usize,
        expected: usize,
    },

    /// Declared payload length is zero or above the configured maximum.
    #[error("invalid frame length {length} (allowed 1..={max})")]
    InvalidLength { length: u32, max: usize },

    /// Payload could not be turned into a JSON object, even after recovery.
    #[error("payload is not a valid JSON object: {reason}")]
    Parse { reason: String },

    /// Transport failure (reset, timeout, ...).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True when the peer closed the connection cleanly between frames.
    pub fn is_clean_close(&self) -> bool {
        matches!(
            self,
            FrameError::ShortRead {
                section: FrameSection::Header,
                read: 0,
                ..
            }
        )
    }

    /// True for errors caused by the peer sending a bad frame, as opposed
    /// to the transport failing underneath.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidLength { .. } | FrameError::Parse { .. }
        )
    }
}

/// Read one frame payload from `reader`.
///
/// The length prefix is validated against `1..=max_frame_bytes` before any
/// payload byte is read; an out-of-range length fails immediately with
/// [`FrameError::InvalidLength`].
pub fn read_frame<R: Read>(reader: &mut R, max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
    let mut header = [0u8; LENGTH_PREFIX_BYTES];
    let read = read_full(reader, &mut header)?;
    if read < LENGTH_PREFIX_BYTES {
        return Err(FrameError::ShortRead {
            section: FrameSection::Header,
            read,
            expected: LENGTH_PREFIX_BYTES,
        });
    }

    let length = u32::from_le_bytes(header);
    let expected = length as usize;
    if expected == 0 || expected > max_frame_bytes {
        return Err(FrameError::InvalidLength {
            length,
            max: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; expected];
    let read = read_full(reader, &mut payload)?;
    if read < expected {
        return Err(FrameError::ShortRead {
            section: FrameSection::Payload,
            read,
            expected,
        });
    }

    Ok(payload)
}

/// Build the wire bytes for `payload`: little-endian length, then payload.
///
/// No upper bound is enforced beyond what fits in the u32 prefix.
pub fn encode_frame(payload: &[u8]) -> io::Result<BytesMut> {
    let length = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes does not fit a u32 length prefix", payload.len()),
        )
    })?;

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    frame.put_u32_le(length);
    frame.put_slice(payload);
    Ok(frame)
}

/// Encode `payload` and write the whole frame to `writer`.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let frame = encode_frame(payload)?;
    writer.write_all(&frame)?;
    writer.flush()
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
///
/// Returns the number of bytes actually read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
