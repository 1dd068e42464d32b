//! Fixed 22-byte FMO header and payload-preserving rewrites.
//!
//! Wire layout (all integers little-endian):
//!
//! ```text
//! offset  size  field
//!      0     4  version   u32
//!      4     2  padding1  u16
//!      6     2  uid       u16
//!      8     2  padding2  u16
//!     10    12  callsign  UTF-8, NUL-padded
//! ```

use crate::error::HeaderError;

/// Total header size on the wire.
pub const HEADER_SIZE: usize = 22;

/// Width of the callsign field in bytes.
pub const CALLSIGN_SIZE: usize = 12;

const VERSION_OFFSET: usize = 0;
const PADDING1_OFFSET: usize = 4;
const UID_OFFSET: usize = 6;
const PADDING2_OFFSET: usize = 8;
const CALLSIGN_OFFSET: usize = 10;

/// Decoded FMO packet header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FmoHeader {
    /// Protocol version, passed through untouched.
    pub version: u32,
    pub padding1: u16,
    /// Origin identifier. The relay marks its own output with a reserved value.
    pub uid: u16,
    pub padding2: u16,
    /// Human-readable origin label.
    pub callsign: String,
}

impl FmoHeader {
    /// Parse the header from the first 22 bytes of `bytes`.
    ///
    /// Anything past the header is ignored. Trailing NULs are stripped from
    /// the callsign and invalid UTF-8 is replaced with U+FFFD, so a header of
    /// the right length always parses.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_SIZE {
            return Err(HeaderError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let raw_callsign = &bytes[CALLSIGN_OFFSET..HEADER_SIZE];
        let end = raw_callsign
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        let callsign = String::from_utf8_lossy(&raw_callsign[..end]).into_owned();

        Ok(Self {
            version: read_u32(bytes, VERSION_OFFSET),
            padding1: read_u16(bytes, PADDING1_OFFSET),
            uid: read_u16(bytes, UID_OFFSET),
            padding2: read_u16(bytes, PADDING2_OFFSET),
            callsign,
        })
    }

    /// Serialize to exactly 22 bytes.
    ///
    /// The callsign is cut at the last code-point boundary that fits in 12
    /// bytes and zero-padded.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[VERSION_OFFSET..PADDING1_OFFSET].copy_from_slice(&self.version.to_le_bytes());
        buf[PADDING1_OFFSET..UID_OFFSET].copy_from_slice(&self.padding1.to_le_bytes());
        buf[UID_OFFSET..PADDING2_OFFSET].copy_from_slice(&self.uid.to_le_bytes());
        buf[PADDING2_OFFSET..CALLSIGN_OFFSET].copy_from_slice(&self.padding2.to_le_bytes());

        let callsign = truncate_utf8(&self.callsign, CALLSIGN_SIZE).as_bytes();
        buf[CALLSIGN_OFFSET..CALLSIGN_OFFSET + callsign.len()].copy_from_slice(callsign);
        buf
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Longest prefix of `s` that is at most `max_bytes` long and ends on a
/// `char` boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// The opaque bytes following the header.
pub fn payload(packet: &[u8]) -> Result<&[u8], HeaderError> {
    if packet.len() < HEADER_SIZE {
        return Err(HeaderError::TooShort {
            expected: HEADER_SIZE,
            actual: packet.len(),
        });
    }
    Ok(&packet[HEADER_SIZE..])
}

/// Partial header update. Fields left as `None` keep their decoded value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderUpdate {
    pub version: Option<u32>,
    pub padding1: Option<u16>,
    pub uid: Option<u16>,
    pub padding2: Option<u16>,
    pub callsign: Option<String>,
}

impl HeaderUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn padding1(mut self, padding1: u16) -> Self {
        self.padding1 = Some(padding1);
        self
    }

    pub fn uid(mut self, uid: u16) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn padding2(mut self, padding2: u16) -> Self {
        self.padding2 = Some(padding2);
        self
    }

    pub fn callsign(mut self, callsign: impl Into<String>) -> Self {
        self.callsign = Some(callsign.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite the fields of `header` that this update sets.
    pub fn apply_to(&self, header: &mut FmoHeader) {
        if let Some(version) = self.version {
            header.version = version;
        }
        if let Some(padding1) = self.padding1 {
            header.padding1 = padding1;
        }
        if let Some(uid) = self.uid {
            header.uid = uid;
        }
        if let Some(padding2) = self.padding2 {
            header.padding2 = padding2;
        }
        if let Some(callsign) = &self.callsign {
            header.callsign.clone_from(callsign);
        }
    }
}

/// Decode the header of `packet`, apply `update`, and return the re-encoded
/// header followed by the original payload bytes.
///
/// The output is always the same length as the input. An empty update
/// returns the packet bytes unchanged.
pub fn rewrite_header(packet: &[u8], update: &HeaderUpdate) -> Result<Vec<u8>, HeaderError> {
    let body = payload(packet)?;
    if update.is_empty() {
        return Ok(packet.to_vec());
    }

    let mut header = FmoHeader::from_bytes(packet)?;
    update.apply_to(&mut header);

    let mut out = Vec::with_capacity(packet.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(body);
    Ok(out)
}
