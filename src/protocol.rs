//! Binary wire protocol for checkbox synchronization.
//!
//! Every frame is a single header byte followed by a variable-length body:
//!
//! ```text
//! ┌─────────────────────────┬──────────────────┐
//! │ header (1 byte)         │ body (variable)  │
//! │ 7-5: type code          │                  │
//! │ 4-2: aux_a              │                  │
//! │ 1-0: aux_b              │                  │
//! └─────────────────────────┴──────────────────┘
//! ```
//!
//! Server → client: INIT (0, full bit-packed state, aux_a = pad bits),
//! TOGGLED (1, single 3-byte index, aux_b = value), DIFF (2, concatenated
//! 3-byte indices, aux_b = value of the whole list). Client → server:
//! TOGGLE (1, 3-byte index, aux_b = desired value). Type codes are
//! independent per direction.
//!
//! Cell indices are 24-bit unsigned integers, **little-endian** in both
//! directions. Bitmaps are packed MSB-first within each byte, with the
//! final byte right-padded with zero bits.

// ───────────────────────────────────────────────────────────────────
// Header byte
// ───────────────────────────────────────────────────────────────────

/// Number of bytes in an encoded cell index.
pub const INDEX_BYTES: usize = 3;

/// Largest addressable cell index (24-bit).
pub const MAX_INDEX: u32 = (1 << 24) - 1;

/// Pack the three header fields into a single byte.
///
/// Field widths are 3/3/2 bits; passing wider values is a programming
/// error, not a runtime condition.
pub fn encode_header(type_code: u8, aux_a: u8, aux_b: u8) -> u8 {
    debug_assert!(type_code < 8, "type code must fit in 3 bits");
    debug_assert!(aux_a < 8, "aux_a must fit in 3 bits");
    debug_assert!(aux_b < 4, "aux_b must fit in 2 bits");
    (type_code << 5) | (aux_a << 2) | aux_b
}

/// Extract `(type_code, aux_a, aux_b)` from a header byte.
///
/// This is the raw bit extraction; mapping the type code onto a known
/// variant (and rejecting unknown ones) happens in [`ClientMessage::decode`]
/// and [`ServerMessage::decode`].
pub fn decode_header(byte: u8) -> (u8, u8, u8) {
    (byte >> 5, (byte >> 2) & 0b111, byte & 0b11)
}

// ───────────────────────────────────────────────────────────────────
// Numeric / bitmap encoding
// ───────────────────────────────────────────────────────────────────

/// Encode a cell index as 3 little-endian bytes.
pub fn encode_index(index: u32) -> [u8; INDEX_BYTES] {
    debug_assert!(index <= MAX_INDEX, "index must fit in 24 bits");
    [index as u8, (index >> 8) as u8, (index >> 16) as u8]
}

/// Decode a cell index from 3 little-endian bytes.
pub fn decode_index(bytes: [u8; INDEX_BYTES]) -> u32 {
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16)
}

/// Number of zero bits needed to pad `bits_len` bits out to a whole byte.
/// Always in `0..=7`.
pub fn byte_padding_len(bits_len: usize) -> u8 {
    ((8 - bits_len % 8) % 8) as u8
}

/// Pack a slice of 0/1 cell values into bytes, MSB first within each byte.
///
/// The final byte is right-padded with zeros; the pad length travels in the
/// INIT header's aux_a field so the receiver can discard it. Packing the
/// same bit sequence always yields the same bytes.
pub fn pack_bits(bits: &[u8]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(bits.len().div_ceil(8));
    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            debug_assert!(bit <= 1, "cells are single bits");
            byte |= (bit & 1) << (7 - i);
        }
        packed.push(byte);
    }
    packed
}

/// Unpack `count` logical bits from MSB-first packed bytes.
///
/// The INIT receiver computes `count = bytes.len() * 8 - pad` from the
/// header's aux_a field. A `count` beyond the packed length is clamped to
/// it, so the result never exceeds `bytes.len() * 8` bits.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<u8> {
    let count = count.min(bytes.len() * 8);
    let mut bits = Vec::with_capacity(count);
    for i in 0..count {
        bits.push((bytes[i / 8] >> (7 - i % 8)) & 1);
    }
    bits
}

// ───────────────────────────────────────────────────────────────────
// Typed messages
// ───────────────────────────────────────────────────────────────────

/// Server-originated message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerMessageType {
    /// Full bit-packed state snapshot, sent once per connection
    Init = 0,
    /// Single-cell change notification (pre-diff wire compatibility)
    Toggled = 1,
    /// Batched list of indices that changed to one value
    Diff = 2,
}

impl ServerMessageType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Init),
            1 => Some(Self::Toggled),
            2 => Some(Self::Diff),
            _ => None,
        }
    }
}

/// Client-originated message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientMessageType {
    /// Request to set one cell to a value
    Toggle = 1,
}

impl ClientMessageType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Toggle),
            _ => None,
        }
    }
}

/// A decoded server → client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Full state handshake. `bitmap` is the MSB-first packed cell array,
    /// `pad` the number of trailing pad bits in its final byte.
    Init { pad: u8, bitmap: Vec<u8> },
    /// One cell changed to `value`.
    Toggled { index: u32, value: bool },
    /// All listed cells changed to `value` within one diff window.
    /// Indices are ascending.
    Diff { value: bool, indices: Vec<u32> },
}

impl ServerMessage {
    /// Build an INIT message from a slice of 0/1 cell values.
    pub fn init_from_cells(cells: &[u8]) -> Self {
        Self::Init {
            pad: byte_padding_len(cells.len()),
            bitmap: pack_bits(cells),
        }
    }

    pub fn msg_type(&self) -> ServerMessageType {
        match self {
            Self::Init { .. } => ServerMessageType::Init,
            Self::Toggled { .. } => ServerMessageType::Toggled,
            Self::Diff { .. } => ServerMessageType::Diff,
        }
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Init { pad, bitmap } => {
                let mut frame = Vec::with_capacity(1 + bitmap.len());
                frame.push(encode_header(ServerMessageType::Init as u8, *pad, 0));
                frame.extend_from_slice(bitmap);
                frame
            }
            Self::Toggled { index, value } => {
                let mut frame = Vec::with_capacity(1 + INDEX_BYTES);
                frame.push(encode_header(
                    ServerMessageType::Toggled as u8,
                    0,
                    u8::from(*value),
                ));
                frame.extend_from_slice(&encode_index(*index));
                frame
            }
            Self::Diff { value, indices } => {
                let mut frame = Vec::with_capacity(1 + indices.len() * INDEX_BYTES);
                frame.push(encode_header(
                    ServerMessageType::Diff as u8,
                    0,
                    u8::from(*value),
                ));
                for &index in indices {
                    frame.extend_from_slice(&encode_index(index));
                }
                frame
            }
        }
    }

    /// Deserialize from the wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&header, body) = bytes
            .split_first()
            .ok_or(ProtocolError::TruncatedBody { expected: 1, got: 0 })?;
        let (code, aux_a, aux_b) = decode_header(header);
        let msg_type =
            ServerMessageType::from_code(code).ok_or(ProtocolError::UnknownMessageType(code))?;

        match msg_type {
            ServerMessageType::Init => Ok(Self::Init {
                pad: aux_a,
                bitmap: body.to_vec(),
            }),
            ServerMessageType::Toggled => {
                let raw: [u8; INDEX_BYTES] =
                    body.try_into()
                        .map_err(|_| ProtocolError::TruncatedBody {
                            expected: INDEX_BYTES,
                            got: body.len(),
                        })?;
                Ok(Self::Toggled {
                    index: decode_index(raw),
                    value: aux_b == 1,
                })
            }
            ServerMessageType::Diff => {
                if body.len() % INDEX_BYTES != 0 {
                    return Err(ProtocolError::TruncatedBody {
                        expected: body.len() + INDEX_BYTES - body.len() % INDEX_BYTES,
                        got: body.len(),
                    });
                }
                let indices = body
                    .chunks_exact(INDEX_BYTES)
                    .map(|chunk| decode_index([chunk[0], chunk[1], chunk[2]]))
                    .collect();
                Ok(Self::Diff {
                    value: aux_b == 1,
                    indices,
                })
            }
        }
    }
}

/// A decoded client → server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    /// Set the cell at `index` to `value`.
    Toggle { index: u32, value: bool },
}

impl ClientMessage {
    /// Serialize to the wire format.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Toggle { index, value } => {
                let mut frame = Vec::with_capacity(1 + INDEX_BYTES);
                frame.push(encode_header(
                    ClientMessageType::Toggle as u8,
                    0,
                    u8::from(*value),
                ));
                frame.extend_from_slice(&encode_index(*index));
                frame
            }
        }
    }

    /// Deserialize from the wire format.
    ///
    /// Unknown type codes are a decode failure, never a default.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&header, body) = bytes
            .split_first()
            .ok_or(ProtocolError::TruncatedBody { expected: 1, got: 0 })?;
        let (code, _aux_a, aux_b) = decode_header(header);
        let msg_type =
            ClientMessageType::from_code(code).ok_or(ProtocolError::UnknownMessageType(code))?;

        match msg_type {
            ClientMessageType::Toggle => {
                let raw: [u8; INDEX_BYTES] =
                    body.try_into()
                        .map_err(|_| ProtocolError::TruncatedBody {
                            expected: INDEX_BYTES,
                            got: body.len(),
                        })?;
                Ok(Self::Toggle {
                    index: decode_index(raw),
                    value: aux_b == 1,
                })
            }
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header type code has no variant for this direction.
    UnknownMessageType(u8),
    /// Frame body is shorter than the type requires.
    TruncatedBody { expected: usize, got: usize },
    /// The peer's outbound channel is gone.
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMessageType(code) => write!(f, "unknown message type code {code}"),
            Self::TruncatedBody { expected, got } => {
                write!(f, "truncated body: expected {expected} bytes, got {got}")
            }
            Self::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip_all_fields() {
        for type_code in 0..8u8 {
            for aux_a in 0..8u8 {
                for aux_b in 0..4u8 {
                    let byte = encode_header(type_code, aux_a, aux_b);
                    assert_eq!(decode_header(byte), (type_code, aux_a, aux_b));
                }
            }
        }
    }

    #[test]
    fn test_index_little_endian_layout() {
        assert_eq!(encode_index(0x010203), [0x03, 0x02, 0x01]);
        assert_eq!(decode_index([0x03, 0x02, 0x01]), 0x010203);
    }

    #[test]
    fn test_index_roundtrip_boundaries() {
        for index in [0, 1, 0xFF, 0x100, 0xFFFF, 0x10000, 0xABCDEF, MAX_INDEX] {
            assert_eq!(decode_index(encode_index(index)), index);
        }
    }

    #[test]
    fn test_padding_lengths() {
        assert_eq!(byte_padding_len(0), 0);
        assert_eq!(byte_padding_len(1), 7);
        assert_eq!(byte_padding_len(7), 1);
        assert_eq!(byte_padding_len(8), 0);
        assert_eq!(byte_padding_len(10), 6);
        assert_eq!(byte_padding_len(16), 0);
    }

    #[test]
    fn test_pack_bits_msb_first() {
        assert_eq!(pack_bits(&[1, 0, 0, 0, 0, 0, 0, 0]), vec![0b1000_0000]);
        assert_eq!(pack_bits(&[0, 0, 0, 0, 0, 0, 0, 1]), vec![0b0000_0001]);
        // Final byte right-padded with zeros
        assert_eq!(pack_bits(&[1, 1, 1]), vec![0b1110_0000]);
    }

    #[test]
    fn test_bitmap_roundtrip() {
        for len in [0usize, 1, 7, 8, 9, 10, 16, 63] {
            let bits: Vec<u8> = (0..len).map(|i| ((i * 7 + 3) % 5 < 2) as u8).collect();
            let packed = pack_bits(&bits);
            assert_eq!(packed.len(), len.div_ceil(8));
            assert_eq!(unpack_bits(&packed, len), bits);
        }
    }

    #[test]
    fn test_unpack_bits_clamps_to_packed_length() {
        let packed = [0b1010_0000u8];
        let bits = unpack_bits(&packed, 64);
        assert_eq!(bits.len(), 8);
        assert_eq!(&bits[..4], &[1, 0, 1, 0]);
        assert!(unpack_bits(&[], 8).is_empty());
    }

    #[test]
    fn test_init_ten_zero_cells() {
        let msg = ServerMessage::init_from_cells(&[0u8; 10]);
        let frame = msg.encode();
        // (0 << 5) | (6 << 2) | 0
        assert_eq!(frame, vec![0x18, 0x00, 0x00]);
    }

    #[test]
    fn test_init_roundtrip() {
        let cells = [1u8, 0, 1, 1, 0, 0, 0, 1, 1, 0];
        let msg = ServerMessage::init_from_cells(&cells);
        let decoded = ServerMessage::decode(&msg.encode()).unwrap();
        match decoded {
            ServerMessage::Init { pad, bitmap } => {
                assert_eq!(pad, 6);
                assert_eq!(unpack_bits(&bitmap, 10), cells);
            }
            other => panic!("expected Init, got {other:?}"),
        }
    }

    #[test]
    fn test_toggle_roundtrip() {
        let msg = ClientMessage::Toggle { index: 123_456, value: true };
        let frame = msg.encode();
        assert_eq!(frame.len(), 4);
        assert_eq!(ClientMessage::decode(&frame).unwrap(), msg);

        let off = ClientMessage::Toggle { index: 0, value: false };
        assert_eq!(ClientMessage::decode(&off.encode()).unwrap(), off);
    }

    #[test]
    fn test_toggled_roundtrip() {
        let msg = ServerMessage::Toggled { index: 42, value: true };
        assert_eq!(ServerMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_diff_roundtrip() {
        let msg = ServerMessage::Diff {
            value: true,
            indices: vec![0, 3, 77, 999_999],
        };
        let frame = msg.encode();
        assert_eq!(frame.len(), 1 + 4 * INDEX_BYTES);
        assert_eq!(ServerMessage::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_diff_truncated_body() {
        let mut frame = ServerMessage::Diff { value: false, indices: vec![7] }.encode();
        frame.pop();
        match ServerMessage::decode(&frame) {
            Err(ProtocolError::TruncatedBody { got: 2, .. }) => {}
            other => panic!("expected truncated body, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_client_type_code() {
        let frame = [encode_header(5, 0, 0), 0, 0, 0];
        assert_eq!(
            ClientMessage::decode(&frame),
            Err(ProtocolError::UnknownMessageType(5))
        );
    }

    #[test]
    fn test_unknown_server_type_code() {
        let frame = [encode_header(7, 0, 1)];
        assert_eq!(
            ServerMessage::decode(&frame),
            Err(ProtocolError::UnknownMessageType(7))
        );
    }

    #[test]
    fn test_empty_frame() {
        assert!(ClientMessage::decode(&[]).is_err());
        assert!(ServerMessage::decode(&[]).is_err());
    }

    #[test]
    fn test_toggle_wrong_body_length() {
        let frame = [encode_header(1, 0, 1), 0x01, 0x02];
        assert_eq!(
            ClientMessage::decode(&frame),
            Err(ProtocolError::TruncatedBody { expected: 3, got: 2 })
        );
    }
}
