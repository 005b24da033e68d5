//! Network byte-order conversions for header fields.
//!
//! Every multi-byte integer in an XRootD frame travels big-endian: stream
//! and request ids, `dlen`, the `readahead_list` geometry, the wait and
//! error payloads. Funnelling the conversions through these helpers keeps
//! the endianness decision in one place, with the Clippy expectation
//! attached where the conversion actually happens instead of sprinkled
//! over the header code.

/// Encode a `u16` header field, such as a request id, into its two wire
/// bytes.
///
/// # Examples
///
/// ```
/// use xrootd_client::byte_order::write_network_u16;
///
/// // kXR_stat goes out as 3017, high byte first.
/// assert_eq!(write_network_u16(3017), [0x0B, 0xC9]);
/// ```
#[must_use]
pub fn write_network_u16(value: u16) -> [u8; 2] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "XRootD headers are defined big-endian; the conversion is the point of this \
                  helper."
    )]
    value.to_be_bytes()
}

/// Decode a `u16` header field from its two wire bytes.
///
/// # Examples
///
/// ```
/// use xrootd_client::byte_order::read_network_u16;
///
/// // A kXR_oksofar status word off the wire.
/// assert_eq!(read_network_u16([0x0F, 0xA0]), 4000);
/// ```
#[must_use]
pub fn read_network_u16(bytes: [u8; 2]) -> u16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "XRootD headers are defined big-endian; the conversion is the point of this \
                  helper."
    )]
    u16::from_be_bytes(bytes)
}

/// Encode a `u32` header field, such as `dlen`, into its four wire bytes.
#[must_use]
pub fn write_network_u32(value: u32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "XRootD headers are defined big-endian; the conversion is the point of this \
                  helper."
    )]
    value.to_be_bytes()
}

/// Decode a `u32` header field from its four wire bytes.
#[must_use]
pub fn read_network_u32(bytes: [u8; 4]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "XRootD headers are defined big-endian; the conversion is the point of this \
                  helper."
    )]
    u32::from_be_bytes(bytes)
}

/// Encode an `i32` field into its four wire bytes.
#[must_use]
pub fn write_network_i32(value: i32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "XRootD headers are defined big-endian; the conversion is the point of this \
                  helper."
    )]
    value.to_be_bytes()
}

/// Decode an `i32` field from its four wire bytes.
#[must_use]
pub fn read_network_i32(bytes: [u8; 4]) -> i32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "XRootD headers are defined big-endian; the conversion is the point of this \
                  helper."
    )]
    i32::from_be_bytes(bytes)
}

/// Encode a `u64` field, such as a chunk offset, into its eight wire
/// bytes.
#[must_use]
pub fn write_network_u64(value: u64) -> [u8; 8] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "XRootD headers are defined big-endian; the conversion is the point of this \
                  helper."
    )]
    value.to_be_bytes()
}

/// Decode a `u64` field from its eight wire bytes.
#[must_use]
pub fn read_network_u64(bytes: [u8; 8]) -> u64 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "XRootD headers are defined big-endian; the conversion is the point of this \
                  helper."
    )]
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0x0000, [0x00, 0x00])]
    #[case(0x1234, [0x12, 0x34])]
    #[case(0xFFFF, [0xFF, 0xFF])]
    fn u16_round_trips_through_wire_order(#[case] value: u16, #[case] wire: [u8; 2]) {
        assert_eq!(write_network_u16(value), wire);
        assert_eq!(read_network_u16(wire), value);
    }

    #[rstest]
    #[case(0x0102_0304, [0x01, 0x02, 0x03, 0x04])]
    #[case(0xFFFF_FFFF, [0xFF, 0xFF, 0xFF, 0xFF])]
    fn u32_round_trips_through_wire_order(#[case] value: u32, #[case] wire: [u8; 4]) {
        assert_eq!(write_network_u32(value), wire);
        assert_eq!(read_network_u32(wire), value);
    }

    #[test]
    fn u64_round_trips_through_wire_order() {
        let wire = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(write_network_u64(0x0102_0304_0506_0708), wire);
        assert_eq!(read_network_u64(wire), 0x0102_0304_0506_0708);
    }
}
