// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Multi-part message bodies (RFC 4884).
//!
//! A multi-part body is a 4-byte prefix, the leading bytes of the original datagram and an
//! optional extension structure. When extensions are present the original datagram field is
//! zero-padded to at least 128 bytes and to a 32-bit (ICMPv4) or 64-bit (ICMPv6) boundary, and
//! its padded length is advertised in the prefix.

use crate::error::{Error, Result};
use crate::icmp::extension::{parse_extensions, Extension, OBJECT_HEADER_LEN};
use crate::icmp::types::{Icmpv4Type, Icmpv6Type, Protocol, Type};
use crate::utils::{checksum, padded_length};

/// The version of the extension structure.
pub const EXTENSION_VERSION: u8 = 2;
/// The length of the extension structure header.
pub const EXTENSION_HEADER_LEN: usize = 4;
/// The minimum length of the original datagram field when extensions follow it.
pub const MIN_ORIG_DATAGRAM_LEN: usize = 128;

const PREFIX_LEN: usize = 4;

/// The padded length of the original datagram field when extensions follow it.
pub(crate) fn orig_datagram_len(proto: Protocol, data: &[u8]) -> usize {
    let padded = match proto {
        Protocol::Icmpv4 => padded_length::<4>(data.len()),
        Protocol::Icmpv6 => padded_length::<8>(data.len()),
    };
    padded.max(MIN_ORIG_DATAGRAM_LEN)
}

/// The length of the extension structure carrying `exts`, or 0 if there are none.
pub(crate) fn extension_structure_len(exts: &[Extension]) -> usize {
    if exts.is_empty() {
        0
    } else {
        EXTENSION_HEADER_LEN + exts.iter().map(Extension::encoded_len).sum::<usize>()
    }
}

/// The length of a multi-part body, including its 4-byte prefix.
///
/// When `with_orig_datagram` is false the body has no original datagram field and the extension
/// structure immediately follows the prefix (as in extended echo requests).
pub(crate) fn multipart_len(
    proto: Protocol,
    with_orig_datagram: bool,
    data: &[u8],
    exts: &[Extension],
) -> usize {
    let data_len = match (with_orig_datagram, exts.is_empty()) {
        (false, _) => 0,
        (true, true) => data.len(),
        (true, false) => orig_datagram_len(proto, data),
    };

    PREFIX_LEN + data_len + extension_structure_len(exts)
}

/// Encodes a multi-part body with a zeroed prefix.
///
/// The caller fills in any remaining prefix fields (pointer, identifier and so on); the length
/// field is written here when extensions are present.
pub(crate) fn marshal_multipart(
    proto: Protocol,
    with_orig_datagram: bool,
    data: &[u8],
    exts: &[Extension],
) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; PREFIX_LEN];
    if !with_orig_datagram {
        marshal_extensions(&mut bytes, exts)?;
        return Ok(bytes);
    }

    bytes.extend(data);
    if exts.is_empty() {
        return Ok(bytes);
    }

    let data_len = orig_datagram_len(proto, data);
    bytes.resize(PREFIX_LEN + data_len, 0);
    match proto {
        Protocol::Icmpv4 => {
            bytes[1] = u8::try_from(data_len / 4)
                .map_err(|_| Error::InvalidMessage("original datagram exceeds 1020 bytes"))?;
        }
        Protocol::Icmpv6 => {
            bytes[0] = u8::try_from(data_len / 8)
                .map_err(|_| Error::InvalidMessage("original datagram exceeds 2040 bytes"))?;
        }
    }

    marshal_extensions(&mut bytes, exts)?;
    Ok(bytes)
}

/// Appends an extension structure carrying `exts` to `bytes`. Nothing is appended if `exts` is
/// empty.
pub(crate) fn marshal_extensions(bytes: &mut Vec<u8>, exts: &[Extension]) -> Result<()> {
    if exts.is_empty() {
        return Ok(());
    }

    let start = bytes.len();
    bytes.extend([EXTENSION_VERSION << 4, 0, 0, 0]);
    for ext in exts {
        ext.marshal_extended(bytes)?;
    }

    let sum = checksum(&bytes[start..]);
    bytes[start + 2..start + 4].copy_from_slice(&sum.to_be_bytes());
    Ok(())
}

/// Checks the version and checksum of the extension structure beginning at `bytes`.
///
/// A checksum field of zero means the sender did not compute one.
fn valid_extension_header(bytes: &[u8]) -> bool {
    if bytes.len() < EXTENSION_HEADER_LEN {
        return false;
    }

    let version = bytes[0] >> 4;
    let sum_field = u16::from_be_bytes([bytes[2], bytes[3]]);
    version == EXTENSION_VERSION && (sum_field == 0 || checksum(bytes) == 0)
}

/// Splits a multi-part body into its original datagram field and extensions.
///
/// `bytes` includes the 4-byte prefix. If no valid extension structure is found where one is
/// expected, everything following the prefix is returned as the original datagram and no
/// extensions are reported.
pub(crate) fn parse_multipart(typ: Type, bytes: &[u8]) -> Result<(Vec<u8>, Vec<Extension>)> {
    if bytes.len() < PREFIX_LEN {
        return Err(Error::MessageTooShort);
    }

    let rest = &bytes[PREFIX_LEN..];
    let declared = match typ.protocol() {
        Protocol::Icmpv4 => 4 * bytes[1] as usize,
        Protocol::Icmpv6 => 8 * bytes[0] as usize,
    };

    match extension_offset(typ, rest, declared) {
        Some(offset) => {
            let exts = parse_extensions(typ, &rest[offset + EXTENSION_HEADER_LEN..])?;
            Ok((rest[..offset].to_vec(), exts))
        }
        None => Ok((rest.to_vec(), Vec::new())),
    }
}

/// Parses the extension structure that immediately follows the 4-byte prefix of an extended
/// echo request. `bytes` excludes the prefix.
pub(crate) fn parse_trailing_extensions(typ: Type, bytes: &[u8]) -> Result<Vec<Extension>> {
    match extension_offset(typ, bytes, 0) {
        Some(offset) => parse_extensions(typ, &bytes[offset + EXTENSION_HEADER_LEN..]),
        None => Ok(Vec::new()),
    }
}

/// Locates a valid extension structure within `rest`, the bytes following the prefix.
///
/// Many implementations predate RFC 4884 and leave the length field zero while still padding
/// the original datagram to 128 bytes, so any declared length below 128 or running past the end
/// of the body is replaced with 128. A usable structure needs room for its header and at least
/// one object header.
fn extension_offset(typ: Type, rest: &[u8], declared: usize) -> Option<usize> {
    let offset = match typ {
        Type::V4(Icmpv4Type::EXTENDED_ECHO_REQUEST)
        | Type::V6(Icmpv6Type::EXTENDED_ECHO_REQUEST) => 0,
        _ if declared < MIN_ORIG_DATAGRAM_LEN
            || declared + EXTENSION_HEADER_LEN + OBJECT_HEADER_LEN > rest.len() =>
        {
            MIN_ORIG_DATAGRAM_LEN
        }
        _ => declared,
    };

    if offset + EXTENSION_HEADER_LEN + OBJECT_HEADER_LEN > rest.len() {
        return None;
    }

    valid_extension_header(&rest[offset..]).then_some(offset)
}
