//! Wire framing for tagged messages and the connection handshake.
//!
//! Message frame: `[length:8][checksum:4][tag:8][payload:N]`
//!
//! - **length**: Total frame size including header (little-endian u64)
//! - **checksum**: CRC32C of (tag + payload) for integrity verification
//! - **tag**: Message tag matched against posted receives (little-endian u64)
//! - **payload**: Opaque application bytes
//!
//! Handshake frame (sent once by the accepting side, before any message
//! frames): `[magic:4][version:1][reserved:3][send_tag:8][recv_tag:8]`,
//! carrying the tag pair assigned to the connecting side.
//!
//! Neither format is user-visible; the user contract is only the
//! (buffer, length, tag) triple on `send`/`recv`.

use crate::worker::tags::{Tag, TagPair};

/// Message frame header size: 8 (length) + 4 (checksum) + 8 (tag) = 20 bytes.
pub const FRAME_HEADER_SIZE: usize = 20;

/// Handshake frame size: 4 (magic) + 1 (version) + 3 (reserved) + 16 (tags).
pub const HANDSHAKE_SIZE: usize = 24;

/// Magic value opening every handshake frame.
pub const HANDSHAKE_MAGIC: u32 = 0x5447_5054;

/// Wire protocol version carried in the handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Wire format error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the frame.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from header.
        expected: u32,
        /// Computed checksum from data.
        actual: u32,
    },

    /// Length field has an invalid value.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u64,
    },

    /// Handshake did not open with the expected magic value.
    #[error("bad handshake magic: {magic:#010x}")]
    BadMagic {
        /// The magic value actually received.
        magic: u32,
    },

    /// Peer speaks a different protocol version.
    #[error("protocol version mismatch: peer has {peer}, local is {PROTOCOL_VERSION}")]
    VersionMismatch {
        /// The peer's protocol version.
        peer: u8,
    },
}

/// Frame header for the tagged-message wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame size including header.
    pub length: u64,
    /// CRC32C checksum of (tag + payload).
    pub checksum: u32,
    /// Message tag.
    pub tag: Tag,
}

impl FrameHeader {
    /// Serialize the header into a buffer of at least [`FRAME_HEADER_SIZE`] bytes.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`FRAME_HEADER_SIZE`].
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= FRAME_HEADER_SIZE);
        buf[0..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12..20].copy_from_slice(&self.tag.to_le_bytes());
    }

    /// Deserialize a header from a buffer.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if the buffer is smaller than
    /// [`FRAME_HEADER_SIZE`], or `InvalidLength` if the length field is
    /// smaller than the header itself.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(WireError::InsufficientData {
                needed: FRAME_HEADER_SIZE,
                have: buf.len(),
            });
        }

        let length = u64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ]);
        let checksum = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let tag = u64::from_le_bytes([
            buf[12], buf[13], buf[14], buf[15], buf[16], buf[17], buf[18], buf[19],
        ]);

        if length < FRAME_HEADER_SIZE as u64 {
            return Err(WireError::InvalidLength { length });
        }

        Ok(Self {
            length,
            checksum,
            tag,
        })
    }

    /// Payload length implied by the header.
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(FRAME_HEADER_SIZE)
    }
}

/// Compute the CRC32C checksum over tag + payload.
///
/// Payloads can be large, so the checksum is chained with
/// `crc32c_append` instead of copying into a scratch buffer.
pub fn frame_checksum(tag: Tag, payload: &[u8]) -> u32 {
    let crc = crc32c::crc32c(&tag.to_le_bytes());
    crc32c::crc32c_append(crc, payload)
}

/// Serialize a complete message frame for the given tag and payload.
pub fn encode_frame(tag: Tag, payload: &[u8]) -> Vec<u8> {
    let total = FRAME_HEADER_SIZE + payload.len();
    let mut frame = vec![0u8; total];

    let header = FrameHeader {
        length: total as u64,
        checksum: frame_checksum(tag, payload),
        tag,
    };
    header.serialize_into(&mut frame[..FRAME_HEADER_SIZE]);
    frame[FRAME_HEADER_SIZE..].copy_from_slice(payload);
    frame
}

/// Handshake establishing the tag pair for a new connection.
///
/// The accepting side allocates the pair from its tag allocator and sends
/// this frame with the tags already flipped into the connecting side's
/// perspective: `send_tag` is the tag the connecting side stamps on its
/// outbound frames, `recv_tag` the tag it matches inbound frames against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Tag pair from the receiving side's perspective.
    pub tags: TagPair,
}

impl Handshake {
    /// Serialize the handshake into its fixed-size wire form.
    pub fn serialize(&self) -> [u8; HANDSHAKE_SIZE] {
        let mut buf = [0u8; HANDSHAKE_SIZE];
        buf[0..4].copy_from_slice(&HANDSHAKE_MAGIC.to_le_bytes());
        buf[4] = PROTOCOL_VERSION;
        buf[8..16].copy_from_slice(&self.tags.send.to_le_bytes());
        buf[16..24].copy_from_slice(&self.tags.recv.to_le_bytes());
        buf
    }

    /// Deserialize and validate a handshake frame.
    ///
    /// # Errors
    ///
    /// - `InsufficientData`: fewer than [`HANDSHAKE_SIZE`] bytes
    /// - `BadMagic`: the frame does not open with [`HANDSHAKE_MAGIC`]
    /// - `VersionMismatch`: the peer speaks a different protocol version
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HANDSHAKE_SIZE {
            return Err(WireError::InsufficientData {
                needed: HANDSHAKE_SIZE,
                have: buf.len(),
            });
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != HANDSHAKE_MAGIC {
            return Err(WireError::BadMagic { magic });
        }

        let version = buf[4];
        if version != PROTOCOL_VERSION {
            return Err(WireError::VersionMismatch { peer: version });
        }

        let send = u64::from_le_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);
        let recv = u64::from_le_bytes([
            buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
        ]);

        Ok(Self {
            tags: TagPair { send, recv },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = encode_frame(42, b"hello world");
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + 11);

        let header = FrameHeader::deserialize(&frame).expect("header");
        assert_eq!(header.tag, 42);
        assert_eq!(header.length as usize, frame.len());
        assert_eq!(header.payload_len(), 11);

        let payload = &frame[FRAME_HEADER_SIZE..];
        assert_eq!(payload, b"hello world");
        assert_eq!(header.checksum, frame_checksum(42, payload));
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = encode_frame(7, &[]);
        assert_eq!(frame.len(), FRAME_HEADER_SIZE);

        let header = FrameHeader::deserialize(&frame).expect("header");
        assert_eq!(header.payload_len(), 0);
        assert_eq!(header.checksum, frame_checksum(7, &[]));
    }

    #[test]
    fn test_header_insufficient_data() {
        let result = FrameHeader::deserialize(&[0u8; 10]);
        assert!(matches!(
            result,
            Err(WireError::InsufficientData {
                needed: FRAME_HEADER_SIZE,
                have: 10
            })
        ));
    }

    #[test]
    fn test_header_invalid_length() {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..8].copy_from_slice(&5u64.to_le_bytes());

        let result = FrameHeader::deserialize(&buf);
        assert!(matches!(result, Err(WireError::InvalidLength { length: 5 })));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut frame = encode_frame(1, b"payload");
        let header = FrameHeader::deserialize(&frame).expect("header");

        frame[FRAME_HEADER_SIZE] ^= 0xFF;
        let corrupted = frame_checksum(1, &frame[FRAME_HEADER_SIZE..]);
        assert_ne!(header.checksum, corrupted);
    }

    #[test]
    fn test_checksum_covers_tag() {
        assert_ne!(frame_checksum(1, b"data"), frame_checksum(2, b"data"));
    }

    #[test]
    fn test_handshake_roundtrip() {
        let hs = Handshake {
            tags: TagPair { send: 3, recv: 4 },
        };
        let buf = hs.serialize();
        let parsed = Handshake::deserialize(&buf).expect("handshake");
        assert_eq!(parsed, hs);
    }

    #[test]
    fn test_handshake_bad_magic() {
        let hs = Handshake {
            tags: TagPair { send: 1, recv: 2 },
        };
        let mut buf = hs.serialize();
        buf[0] ^= 0xFF;

        let result = Handshake::deserialize(&buf);
        assert!(matches!(result, Err(WireError::BadMagic { .. })));
    }

    #[test]
    fn test_handshake_version_mismatch() {
        let hs = Handshake {
            tags: TagPair { send: 1, recv: 2 },
        };
        let mut buf = hs.serialize();
        buf[4] = PROTOCOL_VERSION + 1;

        let result = Handshake::deserialize(&buf);
        assert!(matches!(
            result,
            Err(WireError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_handshake_truncated() {
        let hs = Handshake {
            tags: TagPair { send: 1, recv: 2 },
        };
        let buf = hs.serialize();

        let result = Handshake::deserialize(&buf[..HANDSHAKE_SIZE - 1]);
        assert!(matches!(result, Err(WireError::InsufficientData { .. })));
    }
}
