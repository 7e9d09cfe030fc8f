//! WebSocket frame codec.
//!
//! Pure encode/decode of single, unfragmented frames over byte buffers,
//! plus [`FrameBuffer`], the per-connection queue of bytes that have been
//! read from the socket but not yet decoded.
//!
//! Wire layout handled here:
//!
//! ```text
//!  byte 0        byte 1        extended length      mask key    payload
//! +-+-----+----+-+-----------+--------------------+-----------+---------
//! |F| RSV |opc |M| len (7)   | 0, 2 or 8 bytes BE | 0 or 4    | len bytes
//! +-+-----+----+-+-----------+--------------------+-----------+---------
//! ```
//!
//! Length 126 selects a 16-bit extension, 127 a 64-bit one. Only lengths
//! below 2^32 are supported; an 8-byte length with a nonzero high word is
//! a decode error and an encode of 2^32 bytes or more fails up front.
//! The FIN bit is written on every encoded frame and ignored on decode, so
//! fragmented messages are not reassembled.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::FrameError;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0f;
const LEN_MASK: u8 = 0x7f;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Frame opcode (low nibble of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Binary payload.
    Binary,
    /// Connection close.
    Close,
    /// Ping; must be answered with a pong carrying the same payload.
    Ping,
    /// Pong.
    Pong,
    /// Any reserved opcode (3–7, 0xB–0xF).
    Reserved(u8),
}

impl Opcode {
    /// Decodes the low nibble of a header byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value & OPCODE_MASK {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    /// Returns the 4-bit wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(v) => v & OPCODE_MASK,
        }
    }
}

/// A decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// FIN bit as received. Not acted upon.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Unmasked payload bytes.
    pub payload: Bytes,
}

/// Result of a single [`decode`] attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// One complete frame and the number of buffer bytes it occupied.
    Frame {
        /// The decoded frame.
        frame: Frame,
        /// Bytes to discard from the front of the buffer.
        consumed: usize,
    },
    /// The buffer does not yet hold a complete frame.
    NeedMoreData,
}

/// Encodes `payload` as a single unmasked server-to-client frame with the
/// FIN bit set.
///
/// # Errors
///
/// Returns [`FrameError::UnsupportedLength`] if the payload is 2^32 bytes
/// or longer.
pub fn encode(payload: &[u8], opcode: Opcode) -> Result<Bytes, FrameError> {
    let len = payload.len() as u64;
    if len > u64::from(u32::MAX) {
        return Err(FrameError::UnsupportedLength(len));
    }

    let mut out = BytesMut::with_capacity(payload.len() + 10);
    out.extend_from_slice(&[FIN_BIT | opcode.as_u8()]);
    if len < u64::from(LEN_16) {
        out.extend_from_slice(&[len as u8]);
    } else if len <= u64::from(u16::MAX) {
        out.extend_from_slice(&[LEN_16]);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.extend_from_slice(&[LEN_64]);
        out.extend_from_slice(&len.to_be_bytes());
    }
    out.extend_from_slice(payload);
    Ok(out.freeze())
}

/// Encodes a UTF-8 text frame.
///
/// # Errors
///
/// See [`encode`].
pub fn encode_text(text: &str) -> Result<Bytes, FrameError> {
    encode(text.as_bytes(), Opcode::Text)
}

/// XORs `payload` in place with `key` cycled over its four bytes.
///
/// Applying the same key twice restores the original bytes.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (byte, k) in payload.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

/// Decodes one frame from the front of `buf`.
///
/// Returns [`Decoded::NeedMoreData`] whenever `buf` ends before the frame
/// does; the caller keeps the bytes and retries once more arrive. Exactly
/// one frame is consumed per call.
///
/// # Errors
///
/// Returns [`FrameError::UnsupportedLength`] if the 64-bit length form has
/// a nonzero high word, or if the frame's total size does not fit in
/// `usize`.
pub fn decode(buf: &[u8]) -> Result<Decoded, FrameError> {
    Ok(match parse_header(buf)? {
        Some(header) => {
            let Ok(len) = usize::try_from(header.payload_len) else {
                return Err(FrameError::UnsupportedLength(header.payload_len));
            };
            let Some(end) = header.header_len.checked_add(len) else {
                return Err(FrameError::UnsupportedLength(header.payload_len));
            };
            match buf.get(header.header_len..end) {
                Some(body) => {
                    let mut payload = body.to_vec();
                    if let Some(key) = header.mask {
                        apply_mask(&mut payload, key);
                    }
                    Decoded::Frame {
                        frame: Frame {
                            fin: header.fin,
                            opcode: header.opcode,
                            payload: Bytes::from(payload),
                        },
                        consumed: end,
                    }
                }
                None => Decoded::NeedMoreData,
            }
        }
        None => Decoded::NeedMoreData,
    })
}

/// Frame header fields resolved from the leading bytes of a buffer.
#[derive(Debug, Clone, Copy)]
struct Header {
    fin: bool,
    opcode: Opcode,
    mask: Option<[u8; 4]>,
    payload_len: u64,
    /// Bytes occupied by the header including length extension and mask key.
    header_len: usize,
}

/// Parses the header at the front of `buf`, or `None` if it is incomplete.
fn parse_header(buf: &[u8]) -> Result<Option<Header>, FrameError> {
    let (Some(&b0), Some(&b1)) = (buf.first(), buf.get(1)) else {
        return Ok(None);
    };
    let masked = b1 & MASK_BIT != 0;

    let (payload_len, mut offset) = match b1 & LEN_MASK {
        LEN_16 => {
            let Some(ext) = read_array::<2>(buf, 2) else {
                return Ok(None);
            };
            (u64::from(u16::from_be_bytes(ext)), 4)
        }
        LEN_64 => {
            let Some(ext) = read_array::<8>(buf, 2) else {
                return Ok(None);
            };
            let len = u64::from_be_bytes(ext);
            if len > u64::from(u32::MAX) {
                return Err(FrameError::UnsupportedLength(len));
            }
            (len, 10)
        }
        short => (u64::from(short), 2),
    };

    let mask = if masked {
        let Some(key) = read_array::<4>(buf, offset) else {
            return Ok(None);
        };
        offset += 4;
        Some(key)
    } else {
        None
    };

    Ok(Some(Header {
        fin: b0 & FIN_BIT != 0,
        opcode: Opcode::from_u8(b0),
        mask,
        payload_len,
        header_len: offset,
    }))
}

fn read_array<const N: usize>(buf: &[u8], at: usize) -> Option<[u8; N]> {
    buf.get(at..at + N)?.try_into().ok()
}

/// Per-connection queue of received bytes awaiting decode.
///
/// Bytes are appended as they arrive from the socket; [`Self::next_frame`]
/// drains complete frames front-to-back and leaves any trailing partial
/// frame in place for the next read.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_payload: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer rejecting frames with payloads over
    /// `max_payload` bytes.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_payload,
        }
    }

    /// Creates a buffer pre-filled with bytes that were read together with
    /// the handshake request.
    #[must_use]
    pub fn with_leftover(leftover: BytesMut, max_payload: usize) -> Self {
        Self {
            buf: leftover,
            max_payload,
        }
    }

    /// Mutable access to the underlying buffer, for `read_buf`.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes still waiting to be decoded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if no undecoded bytes remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Removes and returns the next complete frame, or `None` if more bytes
    /// are needed.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if the header at the front of the buffer is
    /// unsupported or declares a payload over the configured limit. The
    /// buffer is left untouched in that case.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if let Some(header) = parse_header(&self.buf)?
            && header.payload_len > self.max_payload as u64
        {
            return Err(FrameError::TooLarge {
                len: header.payload_len,
                limit: self.max_payload,
            });
        }
        match decode(&self.buf)? {
            Decoded::Frame { frame, consumed } => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            Decoded::NeedMoreData => Ok(None),
        }
    }
}
