//! Firmware data-block format — the header of the packed combo image.
//!
//! A data block bundles WiFi firmware, a CLM calibration blob, and a BT
//! firmware patch into one file: this header at offset 0, zero padding up
//! to [`FWDB_DATA_START`], then the three sections, each padded to the
//! configured alignment.
//!
//! Same treatment as [`crate::wire`]: #[repr(C, packed)], zerocopy derives,
//! little-endian on the wire, compile-time size guard.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

type U16Le = U16<LittleEndian>;
type U32Le = U32<LittleEndian>;

// ── Constants ─────────────────────────────────────────────────────────────────

/// 16-byte ASCII tag at offset 0 of every data block.
pub const FWDB_MAGIC: [u8; 16] = *b"InfineonFWData  ";

/// Format version of this header structure.
pub const FWDB_VERSION: u32 = 1;

/// Offset where section data starts. The header occupies [`FWDB_HEADER_SIZE`]
/// bytes; the remainder up to here is zero padding reserved for growth.
pub const FWDB_DATA_START: u64 = 256;

/// Serialized header size in bytes.
pub const FWDB_HEADER_SIZE: usize = 184;

/// Default section alignment within the data block.
pub const DEFAULT_ALIGNMENT: u64 = 4;

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

// ── Header ────────────────────────────────────────────────────────────────────

/// The data-block header. A section with size 0 is absent; its offset is
/// then also 0 and carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FwDataBlockHeader {
    /// Must equal [`FWDB_MAGIC`].
    pub magic: [u8; 16],

    /// CRC-32 (ISO-HDLC) of every byte from [`FWDB_DATA_START`] to end of
    /// file — all section data and inter-section padding.
    pub crc: U32Le,

    /// Header format version, [`FWDB_VERSION`].
    pub version: U32Le,

    /// WiFi firmware version, four dotted components.
    pub wifi_version: [U16Le; 4],
    /// Offset of the WiFi firmware section. First section, == FWDB_DATA_START.
    pub wifi_offset: U32Le,
    pub wifi_size: U32Le,

    /// Offset of the CLM calibration blob, aligned up from the WiFi end.
    pub clm_offset: U32Le,
    pub clm_size: U32Le,

    /// BT patch version string, NUL-padded ASCII.
    pub bt_version: [u8; 128],
    /// Offset of the BT firmware patch, aligned up from the CLM end.
    pub bt_offset: U32Le,
    pub bt_size: U32Le,
}

assert_eq_size!(FwDataBlockHeader, [u8; 184]);

impl FwDataBlockHeader {
    pub fn magic_is_valid(&self) -> bool {
        self.magic == FWDB_MAGIC
    }

    /// The BT version string with trailing NUL padding stripped.
    pub fn bt_version_str(&self) -> &str {
        let end = self
            .bt_version
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.bt_version.len());
        std::str::from_utf8(&self.bt_version[..end]).unwrap_or("")
    }

    /// Store `version` into the fixed-width `bt_version` field.
    /// Fails if the string does not fit.
    pub fn set_bt_version(&mut self, version: &str) -> Result<(), FwdbError> {
        let bytes = version.as_bytes();
        if bytes.len() >= self.bt_version.len() {
            return Err(FwdbError::BtVersionTooLong(version.len()));
        }
        self.bt_version = [0u8; 128];
        self.bt_version[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Default for FwDataBlockHeader {
    fn default() -> Self {
        let mut header = Self::new_zeroed();
        header.magic = FWDB_MAGIC;
        header.version = U32Le::new(FWDB_VERSION);
        header
    }
}

/// Decode a data-block header from the front of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<FwDataBlockHeader, FwdbError> {
    let header =
        FwDataBlockHeader::read_from_prefix(bytes).ok_or(FwdbError::Truncated(bytes.len()))?;
    if !header.magic_is_valid() {
        return Err(FwdbError::BadMagic(header.magic));
    }
    Ok(header)
}

// ── Alignment and CRC ─────────────────────────────────────────────────────────

/// Round `offset` up to the next multiple of `align`.
///
/// An offset already on the boundary is returned unchanged — the historical
/// remainder arithmetic added a full `align` bytes of padding in that case,
/// which this function deliberately does not reproduce.
pub fn align_up(offset: u64, align: u64) -> u64 {
    if align <= 1 {
        return offset;
    }
    offset.div_ceil(align) * align
}

/// CRC-32 (ISO-HDLC) over the data-block payload, as stored in
/// [`FwDataBlockHeader::crc`] and verified on read-back.
pub fn payload_crc(payload: &[u8]) -> u32 {
    CRC32.checksum(payload)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FwdbError {
    #[error("input shorter than the {FWDB_HEADER_SIZE}-byte data-block header: {0} bytes")]
    Truncated(usize),

    #[error("bad data-block magic: {}", String::from_utf8_lossy(.0))]
    BadMagic([u8; 16]),

    #[error("BT version string too long for the 128-byte field: {0} bytes")]
    BtVersionTooLong(usize),

    #[error("stored CRC {stored:#010x} does not match computed {computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
