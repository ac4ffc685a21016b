//! Internet checksum (RFC 1071)
//!
//! The IPv4 header checksum is the 16-bit one's complement of the one's
//! complement sum of all 16-bit words in the header. A header carrying a
//! correct checksum therefore sums to `0xFFFF`.

/// Compute the folded one's-complement sum of `buffer`, starting from `start`.
///
/// Words are read in network byte order. A trailing odd byte is padded with
/// a zero low byte. The result is the folded sum, not its complement.
#[must_use]
pub fn calc_checksum(start: u16, buffer: &[u8]) -> u16 {
    let mut sum = u32::from(start);

    let mut words = buffer.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }

    // Fold 32-bit sum to 16 bits (add carry bits)
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum as u16
}

/// Verify an IPv4 header checksum.
///
/// `header` must be exactly the IPv4 header (IHL * 4 bytes, options included).
#[must_use]
pub fn verify_ipv4_header(header: &[u8]) -> bool {
    calc_checksum(0, header) == 0xFFFF
}
