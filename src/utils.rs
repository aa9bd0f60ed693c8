//! Utility functions.

/// Aligns an address or size up to the next multiple of `align`, or `None` when that lies
/// past the top of the address space. `align` must be a power of two.
pub fn align_up(addr: u64, align: u64) -> Option<u64> {
    assert!(align.is_power_of_two());
    addr.checked_add(align - 1).map(|a| a & !(align - 1))
}

/// Mask covering the low `bytes * 8` bits of a `u64`.
pub fn width_mask(bytes: usize) -> u64 {
    if bytes >= 8 {
        u64::MAX
    } else {
        (1u64 << (bytes * 8)) - 1
    }
}

/// Reads a big-endian unsigned integer of `data.len()` bytes (at most 8).
pub fn read_be(data: &[u8]) -> u64 {
    debug_assert!(data.len() <= 8);
    data.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Writes the low `data.len()` bytes of `value` big-endian into `data`.
pub fn write_be(data: &mut [u8], value: u64) {
    debug_assert!(data.len() <= 8);
    let bytes = value.to_be_bytes();
    data.copy_from_slice(&bytes[8 - data.len()..]);
}

/// Parses an address given as `0x`-prefixed hex or plain decimal.
pub fn parse_address(text: &str) -> Result<u64, std::num::ParseIntError> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(0x1001, 8), Some(0x1008));
        assert_eq!(align_up(0x1008, 8), Some(0x1008));
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(u64::MAX - 3, 8), None);
    }

    #[test]
    fn big_endian_odd_widths() {
        let mut buf = [0u8; 3];
        write_be(&mut buf, 0x12_3456);
        assert_eq!(buf, [0x12, 0x34, 0x56]);
        assert_eq!(read_be(&buf), 0x12_3456);

        // Only the low bytes are stored.
        let mut buf = [0u8; 2];
        write_be(&mut buf, 0xAB_CDEF);
        assert_eq!(buf, [0xCD, 0xEF]);
    }

    #[test]
    fn width_masks() {
        assert_eq!(width_mask(2), 0xFFFF);
        assert_eq!(width_mask(3), 0xFF_FFFF);
        assert_eq!(width_mask(8), u64::MAX);
    }

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!(parse_address("0x5000").unwrap(), 0x5000);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(parse_address("0xZZ").is_err());
    }
}
