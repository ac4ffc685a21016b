//! Support utilities
//!
//! Small, stateless helpers shared by the packet parser, the UID cache and
//! the TLS extractor.
//!
//! - [`checksum`]: one's-complement Internet checksum
//! - [`sequence`]: wrapping 32-bit serial-number comparison
//! - [`utf8`]: strict UTF-8 validation for captured hostnames
//! - [`hex`]: hex decoding for kernel connection-table fields

pub mod checksum;
pub mod hex;
pub mod sequence;
pub mod utf8;

pub use checksum::{calc_checksum, verify_ipv4_header};
pub use hex::{hex_dump, hex_to_bytes, HexError};
pub use sequence::compare_u32;
pub use utf8::is_valid_utf8;
