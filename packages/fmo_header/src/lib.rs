//! Codec for the 22-byte FMO packet header.
//!
//! An FMO packet is a fixed 22-byte little-endian header followed by an
//! opaque payload. This crate parses and re-serializes the header and can
//! rewrite selected header fields while copying the payload through verbatim.
//!
//! ```
//! use fmo_header::{FmoHeader, HeaderUpdate, rewrite_header};
//!
//! let header = FmoHeader {
//!     version: 1,
//!     uid: 441,
//!     callsign: "BD8BOJ".to_string(),
//!     ..Default::default()
//! };
//! let mut packet = header.to_bytes().to_vec();
//! packet.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
//!
//! let update = HeaderUpdate::new().uid(65535).callsign("RE>BD8BOJ");
//! let rewritten = rewrite_header(&packet, &update).unwrap();
//!
//! let parsed = FmoHeader::from_bytes(&rewritten).unwrap();
//! assert_eq!(parsed.uid, 65535);
//! assert_eq!(parsed.callsign, "RE>BD8BOJ");
//! assert_eq!(&rewritten[22..], &[0xDE, 0xAD, 0xBE, 0xEF]);
//! ```

pub mod error;
pub mod header;

pub use error::HeaderError;
pub use header::{
    CALLSIGN_SIZE, FmoHeader, HEADER_SIZE, HeaderUpdate, payload, rewrite_header, truncate_utf8,
};
