//! Additive 8-bit checksum with carry fold-back.
//!
//! Used for command frame validation (over the first four bytes) and for
//! the checksum byte appended to every outbound data block.

/// Compute the checksum of the first `length` bytes of `bytes`.
///
/// Starts from `bytes[0]` and for each following byte adds it to the running
/// sum, folding the carry back into the low byte. Returns 0 for an empty range.
///
/// # Example
///
/// ```
/// use sio_drive::protocol::checksum;
///
/// assert_eq!(checksum(&[0x31, 0x53, 0x00, 0x00], 4), 0x84);
/// assert_eq!(checksum(&[0xFF, 0x01], 2), 0x01);
/// ```
pub fn checksum(bytes: &[u8], length: usize) -> u8 {
    let length = length.min(bytes.len());
    if length == 0 {
        return 0;
    }

    let mut sum = bytes[0] as u32;
    for &byte in &bytes[1..length] {
        sum += byte as u32;
        sum = (sum >> 8) + (sum & 0xFF);
    }
    sum as u8
}

/// Checksum over a whole block.
#[inline]
pub fn block_checksum(bytes: &[u8]) -> u8 {
    checksum(bytes, bytes.len())
}
