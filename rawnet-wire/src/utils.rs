// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # General utility functions
//!
//! Byte-slice accessors and the Internet checksum used throughout the codecs.

/// Sums `bytes` as a sequence of big-endian 16-bit words using one's complement addition.
///
/// A trailing odd byte is treated as the high byte of a final word padded with zero.
pub fn ones_complement_16bit(bytes: &[u8]) -> u16 {
    let mut res: u16 = 0;
    for chunk in bytes.chunks(2) {
        let first = chunk[0];
        let second = chunk.get(1).copied().unwrap_or(0);
        res = ones_complement_add(res, (first as u16) << 8 | (second as u16));
    }

    res
}

#[inline]
pub fn ones_complement_add(a: u16, b: u16) -> u16 {
    let new = a.wrapping_add(b);
    if new < a {
        new.wrapping_add(1)
    } else {
        new
    }
}

/// The Internet checksum (RFC 1071) of `bytes`.
///
/// Computing the checksum over data that already contains a correct checksum yields zero.
#[inline]
pub fn checksum(bytes: &[u8]) -> u16 {
    !ones_complement_16bit(bytes)
}

#[inline]
pub(crate) fn get_array<const T: usize>(bytes: &[u8], start: usize) -> Option<&[u8; T]> {
    bytes.get(start..start + T)?.try_into().ok()
}

#[inline]
pub(crate) fn be_u16(bytes: &[u8], start: usize) -> Option<u16> {
    get_array(bytes, start).map(|a| u16::from_be_bytes(*a))
}

#[inline]
pub(crate) fn be_u32(bytes: &[u8], start: usize) -> Option<u32> {
    get_array(bytes, start).map(|a| u32::from_be_bytes(*a))
}

/// Rounds `unpadded_len` up to the next multiple of `T`.
#[inline]
pub(crate) fn padded_length<const T: usize>(unpadded_len: usize) -> usize {
    unpadded_len + ((T - (unpadded_len % T)) % T)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_rfc1071_example() {
        // RFC 1071 section 3: 0001 f203 f4f5 f6f7 sums to ddf2
        let bytes = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(ones_complement_16bit(&bytes), 0xddf2);
        assert_eq!(checksum(&bytes), !0xddf2);
    }

    #[test]
    fn checksum_verifies_to_zero() {
        let mut bytes = [0x08, 0x00, 0x00, 0x00, 0x12, 0x34, 0x00, 0x01, 0xAB];
        let sum = checksum(&bytes);
        bytes[2..4].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(checksum(&bytes), 0);
    }

    #[test]
    fn padding() {
        assert_eq!(padded_length::<4>(0), 0);
        assert_eq!(padded_length::<4>(5), 8);
        assert_eq!(padded_length::<8>(128), 128);
        assert_eq!(padded_length::<8>(129), 136);
    }
}
