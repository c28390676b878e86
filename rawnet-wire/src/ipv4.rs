// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! IPv4 header codec for raw sockets.

use std::net::Ipv4Addr;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::utils::padded_length;

/// The IP version carried in every IPv4 header.
pub const VERSION: u8 = 4;
/// The length (in bytes) of an IPv4 header without options.
pub const HEADER_LEN: usize = 20;
/// The largest length an IPv4 header can declare.
pub const MAX_HEADER_LEN: usize = 60;

bitflags! {
    /// The fragmentation flags of an IPv4 header.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u8 {
        /// More fragments follow this one.
        const MORE_FRAGMENTS = 0b001;
        /// The datagram must not be fragmented.
        const DONT_FRAGMENT = 0b010;
    }
}

/// The byte order a kernel expects for the total length and fragment offset fields on raw
/// sockets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HeaderFieldOrder {
    /// Both fields are in network byte order (most kernels).
    #[default]
    Network,
    /// Both fields are in host byte order, and the total length reported on receive excludes the
    /// header itself (Darwin, NetBSD and DragonFly).
    Host,
}

/// An IPv4 header.
///
/// When writing through a raw socket, the following fields must be populated by the caller:
/// `version`, `len`, `tos`, `total_len`, `flags`/`frag_off`, `ttl`, `protocol` and `dst`. A zero
/// `id`, a zero `checksum` and an unspecified `src` are filled in by the kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Protocol version.
    pub version: u8,
    /// Header length in bytes.
    pub len: usize,
    /// Type of service.
    pub tos: u8,
    /// Packet total length in bytes.
    pub total_len: usize,
    /// Identification.
    pub id: u16,
    pub flags: HeaderFlags,
    /// Fragment offset, in units of 8 bytes.
    pub frag_off: u16,
    /// Time to live.
    pub ttl: u8,
    /// Next protocol.
    pub protocol: u8,
    /// Header checksum.
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Options, extension headers.
    pub options: Vec<u8>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            version: VERSION,
            len: HEADER_LEN,
            tos: 0,
            total_len: HEADER_LEN,
            id: 0,
            flags: HeaderFlags::empty(),
            frag_off: 0,
            ttl: 0,
            protocol: 0,
            checksum: 0,
            src: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::UNSPECIFIED,
            options: Vec::new(),
        }
    }
}

impl Header {
    /// Parses a header whose length fields are in network byte order.
    #[inline]
    pub fn parse(bytes: &[u8]) -> Result<Header> {
        Self::parse_with(bytes, HeaderFieldOrder::Network)
    }

    /// Parses a header using the kernel-specific byte order `order` for the total length and
    /// fragment offset fields.
    pub fn parse_with(bytes: &[u8], order: HeaderFieldOrder) -> Result<Header> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::HeaderTooShort);
        }

        let hdrlen = ((bytes[0] & 0x0F) as usize) << 2;
        if bytes.len() < hdrlen {
            return Err(Error::ExtHeaderTooShort);
        }

        let total_len_raw = [bytes[2], bytes[3]];
        let frag_raw = [bytes[6], bytes[7]];
        let (total_len, frag) = match order {
            HeaderFieldOrder::Network => (
                u16::from_be_bytes(total_len_raw) as usize,
                u16::from_be_bytes(frag_raw),
            ),
            HeaderFieldOrder::Host => (
                u16::from_ne_bytes(total_len_raw) as usize + hdrlen,
                u16::from_ne_bytes(frag_raw),
            ),
        };

        let options = if hdrlen > HEADER_LEN {
            bytes[HEADER_LEN..hdrlen].to_vec()
        } else {
            Vec::new()
        };

        Ok(Header {
            version: bytes[0] >> 4,
            len: hdrlen,
            tos: bytes[1],
            total_len,
            id: u16::from_be_bytes([bytes[4], bytes[5]]),
            flags: HeaderFlags::from_bits_truncate((frag >> 13) as u8),
            frag_off: frag & 0x1FFF,
            ttl: bytes[8],
            protocol: bytes[9],
            checksum: u16::from_be_bytes([bytes[10], bytes[11]]),
            src: Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]),
            dst: Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]),
            options,
        })
    }

    /// Encodes the header with length fields in network byte order.
    #[inline]
    pub fn marshal(&self) -> Result<Vec<u8>> {
        self.marshal_with(HeaderFieldOrder::Network)
    }

    /// Encodes the header using the kernel-specific byte order `order` for the total length and
    /// fragment offset fields.
    ///
    /// Options are padded with zero (end-of-option-list) bytes to a 4-byte boundary, and `len`
    /// must equal the resulting header length.
    pub fn marshal_with(&self, order: HeaderFieldOrder) -> Result<Vec<u8>> {
        if self.len < HEADER_LEN {
            return Err(Error::HeaderTooShort);
        }

        if self.dst.is_unspecified() {
            return Err(Error::MissingAddress);
        }

        let hdrlen = HEADER_LEN + padded_length::<4>(self.options.len());
        if hdrlen > MAX_HEADER_LEN {
            return Err(Error::InvalidHeader("options exceed 40 bytes"));
        }
        if self.len != hdrlen {
            return Err(Error::InvalidHeader("header length disagrees with options"));
        }

        let total_len = u16::try_from(self.total_len)
            .map_err(|_| Error::InvalidHeader("total length exceeds 65535 bytes"))?;
        let frag = (self.frag_off & 0x1FFF) | ((self.flags.bits() as u16) << 13);

        let mut bytes = Vec::with_capacity(hdrlen);
        bytes.push((self.version << 4) | ((hdrlen >> 2) as u8 & 0x0F));
        bytes.push(self.tos);
        match order {
            HeaderFieldOrder::Network => bytes.extend(total_len.to_be_bytes()),
            HeaderFieldOrder::Host => bytes.extend(total_len.to_ne_bytes()),
        }
        bytes.extend(self.id.to_be_bytes());
        match order {
            HeaderFieldOrder::Network => bytes.extend(frag.to_be_bytes()),
            HeaderFieldOrder::Host => bytes.extend(frag.to_ne_bytes()),
        }
        bytes.push(self.ttl);
        bytes.push(self.protocol);
        bytes.extend(self.checksum.to_be_bytes());
        bytes.extend(self.src.octets());
        bytes.extend(self.dst.octets());
        bytes.extend(&self.options);
        bytes.resize(hdrlen, 0);

        Ok(bytes)
    }
}

/// Splits a raw IPv4 datagram into its header and payload.
///
/// The header length is taken from the low nibble of the first byte.
pub fn slice_packet(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::HeaderTooShort);
    }

    let hdrlen = ((bytes[0] & 0x0F) as usize) << 2;
    if bytes.len() < hdrlen {
        return Err(Error::ExtHeaderTooShort);
    }

    Ok(bytes.split_at(hdrlen))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header {
            version: VERSION,
            len: HEADER_LEN + 4,
            tos: 0xC0,
            total_len: 0xBEEF,
            id: 0xCAFE,
            flags: HeaderFlags::DONT_FRAGMENT,
            frag_off: 1500,
            ttl: 255,
            protocol: 1,
            checksum: 0xDEAD,
            src: Ipv4Addr::new(172, 16, 254, 254),
            dst: Ipv4Addr::new(192, 168, 0, 1),
            options: vec![0xFF, 0xFE, 0xFE, 0xFF],
        }
    }

    #[test]
    fn marshal_matches_wire_layout() {
        let bytes = sample().marshal().unwrap();
        assert_eq!(
            bytes,
            [
                0x46, 0xC0, 0xBE, 0xEF, 0xCA, 0xFE, 0x45, 0xDC, 0xFF, 0x01, 0xDE, 0xAD, 172, 16,
                254, 254, 192, 168, 0, 1, 0xFF, 0xFE, 0xFE, 0xFF,
            ]
        );
    }

    #[test]
    fn parse_reverses_marshal() {
        let hdr = sample();
        for order in [HeaderFieldOrder::Network, HeaderFieldOrder::Host] {
            let bytes = hdr.marshal_with(order).unwrap();
            let parsed = Header::parse_with(&bytes, order).unwrap();
            let expected_total = match order {
                HeaderFieldOrder::Network => hdr.total_len,
                HeaderFieldOrder::Host => hdr.total_len + hdr.len,
            };
            assert_eq!(parsed.total_len, expected_total);
            assert_eq!(Header { total_len: hdr.total_len, ..parsed }, hdr);
        }
    }

    #[test]
    fn unset_platform_fields_survive() {
        let hdr = Header {
            total_len: 28,
            ttl: 64,
            protocol: 1,
            dst: Ipv4Addr::new(10, 0, 0, 1),
            ..Header::default()
        };
        let parsed = Header::parse(&hdr.marshal().unwrap()).unwrap();
        assert_eq!(parsed.id, 0);
        assert_eq!(parsed.checksum, 0);
        assert!(parsed.src.is_unspecified());
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn marshal_rejects_missing_fields() {
        let hdr = Header {
            dst: Ipv4Addr::UNSPECIFIED,
            ..sample()
        };
        assert_eq!(hdr.marshal(), Err(Error::MissingAddress));

        let hdr = Header { len: 16, ..sample() };
        assert_eq!(hdr.marshal(), Err(Error::HeaderTooShort));

        let hdr = Header {
            options: vec![0; 44],
            ..sample()
        };
        assert!(matches!(hdr.marshal(), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn marshal_rejects_inconsistent_length() {
        let hdr = Header {
            len: HEADER_LEN,
            ..sample()
        };
        assert!(matches!(hdr.marshal(), Err(Error::InvalidHeader(_))));

        let hdr = Header {
            len: HEADER_LEN + 8,
            ..sample()
        };
        assert!(matches!(hdr.marshal(), Err(Error::InvalidHeader(_))));

        // Options shorter than a word still occupy one
        let hdr = Header {
            options: vec![0x01, 0x01, 0x00],
            ..sample()
        };
        let parsed = Header::parse(&hdr.marshal().unwrap()).unwrap();
        assert_eq!(parsed.len, HEADER_LEN + 4);
        assert_eq!(parsed.options, [0x01, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn parse_rejects_short_buffers() {
        let bytes = sample().marshal().unwrap();
        assert_eq!(Header::parse(&bytes[..19]), Err(Error::HeaderTooShort));
        assert_eq!(Header::parse(&bytes[..22]), Err(Error::ExtHeaderTooShort));
        assert_eq!(Header::parse(&[]), Err(Error::HeaderTooShort));
    }

    #[test]
    fn slice_splits_at_declared_length() {
        let mut bytes = [0u8; 24];
        bytes[0] = 0x46;
        let (hdr, payload) = slice_packet(&bytes).unwrap();
        assert_eq!(hdr.len(), 24);
        assert!(payload.is_empty());

        let mut bytes = [0u8; 28];
        bytes[0] = 0x45;
        let (hdr, payload) = slice_packet(&bytes).unwrap();
        assert_eq!(hdr.len(), 20);
        assert_eq!(payload.len(), 8);

        assert_eq!(slice_packet(&[0x45; 19]), Err(Error::HeaderTooShort));
        assert_eq!(slice_packet(&[0x4F; 20]), Err(Error::ExtHeaderTooShort));
    }
}
