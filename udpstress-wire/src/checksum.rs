//! The Internet checksum (RFC 1071).

/// Folds the one's-complement sum of all 16-bit big-endian words of `data`.
/// An odd trailing byte is padded with zero.
fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u64 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u64::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    sum as u16
}

/// Computes the checksum to store into a packet whose checksum field is zero.
#[inline]
pub fn checksum(data: &[u8]) -> u16 {
    !ones_complement_sum(data)
}

/// Returns `true` if `data`, including its stored checksum, sums up to `0xffff`.
#[inline]
pub fn verify_checksum(data: &[u8]) -> bool {
    ones_complement_sum(data) == 0xffff
}
