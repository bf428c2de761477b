//! OTA chunk wire format — the header prefixed to every published chunk.
//!
//! This type IS the protocol. Every field, every size, every reserved word
//! is part of the wire format shared with the chunk producer. Changing
//! anything here breaks interoperability with deployed publishers.
//!
//! The header is #[repr(C, packed)] for deterministic layout and uses
//! zerocopy derives for safe, allocation-free serialization. All integers
//! are little-endian on the wire regardless of host order. There is no
//! unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

type U16Le = U16<LittleEndian>;
type U32Le = U32<LittleEndian>;

// ── Constants ─────────────────────────────────────────────────────────────────

/// 8-byte ASCII tag opening every valid chunk. Exact, case-sensitive match.
pub const CHUNK_MAGIC: [u8; 8] = *b"OTAImage";

/// Fixed header size in bytes. Also the value of `data_start` on the wire.
pub const HEADER_SIZE: usize = 32;

/// Default payload bytes per chunk used by the producer side.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;

/// Image type stamped into `image_type`. Only one image type exists today.
pub const IMAGE_TYPE: u16 = 0;

/// Protocol version stamped into the version words.
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 1;

// ── Chunk Header ─────────────────────────────────────────────────────────────

/// The fixed 32-byte record prefixed to every OTA image chunk.
///
/// The receiver can fully describe and validate a chunk — position, size,
/// and transfer extent — before touching a single payload byte.
///
/// Wire layout (little-endian):
/// ```text
/// offset 0:  magic[8]              "OTAImage"
/// offset 8:  data_start: u16       payload offset == 32
/// offset 10: image_type: u16      ─┐ presence-validated only;
/// offset 12: version_major: u16    │ values are not interpreted
/// offset 14: version_minor: u16   ─┘ by the reassembler
/// offset 16: payload_size: u32    payload bytes in this chunk
/// offset 20: total_payloads: u32  chunks in the whole transfer
/// offset 24: payload_index: u16   zero-based chunk position
/// offset 26: reserved: u16 ×3     must be zero
/// ```
#[derive(Debug, Clone, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ChunkHeader {
    /// ASCII tag identifying a valid chunk; must equal [`CHUNK_MAGIC`].
    pub magic: [u8; 8],

    /// Byte offset within the chunk where the payload begins.
    /// Always [`HEADER_SIZE`] in this format version.
    pub data_start: U16Le,

    /// Application image type. Carried, not interpreted.
    pub image_type: U16Le,

    /// Protocol version words. Carried, not interpreted.
    pub version_major: U16Le,
    pub version_minor: U16Le,

    /// Length of this chunk's payload — chunk length minus [`HEADER_SIZE`].
    pub payload_size: U32Le,

    /// Total number of chunks in this transfer.
    pub total_payloads: U32Le,

    /// Zero-based position of this chunk within the transfer.
    pub payload_index: U16Le,

    /// Reserved. Must be zero.
    pub reserved: [U16Le; 3],
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(ChunkHeader, [u8; 32]);

impl ChunkHeader {
    /// Build a header for chunk `payload_index` of `total_payloads`, carrying
    /// `payload_size` payload bytes. Version words are filled from the
    /// protocol constants.
    pub fn new(payload_index: u16, total_payloads: u32, payload_size: u32) -> Self {
        Self {
            magic: CHUNK_MAGIC,
            data_start: U16Le::new(HEADER_SIZE as u16),
            image_type: U16Le::new(IMAGE_TYPE),
            version_major: U16Le::new(VERSION_MAJOR),
            version_minor: U16Le::new(VERSION_MINOR),
            payload_size: U32Le::new(payload_size),
            total_payloads: U32Le::new(total_payloads),
            payload_index: U16Le::new(payload_index),
            reserved: [U16Le::ZERO; 3],
        }
    }

    /// True when the magic field equals the protocol constant.
    /// Exact-length, case-sensitive compare — no trimming.
    pub fn magic_is_valid(&self) -> bool {
        self.magic == CHUNK_MAGIC
    }
}

/// Decode a chunk header from the front of `bytes`.
///
/// Fails with [`WireError::MalformedHeader`] when the input is shorter than
/// the fixed header size. Magic validation is the caller's concern — a
/// decoded header with a bad magic is still a decoded header.
pub fn decode(bytes: &[u8]) -> Result<ChunkHeader, WireError> {
    ChunkHeader::read_from_prefix(bytes).ok_or(WireError::MalformedHeader(bytes.len()))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("input shorter than the {HEADER_SIZE}-byte chunk header: {0} bytes")]
    MalformedHeader(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
