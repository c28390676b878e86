// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! ICMP extension objects (RFC 4884, RFC 4950, RFC 5837 and RFC 8335).
//!
//! Each object is encoded as a 4-byte object header (length, class, c-type) followed by its
//! payload. Objects are carried in the extension structure of multipart bodies and of extended
//! echo requests.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};
use crate::icmp::types::{Icmpv4Type, Icmpv6Type, Type};
use crate::utils::{be_u16, be_u32, padded_length};

/// The length of an extension object header.
pub const OBJECT_HEADER_LEN: usize = 4;

const CLASS_MPLS_LABEL_STACK: u8 = 1;
const CLASS_INTERFACE_INFO: u8 = 2;
const CLASS_INTERFACE_IDENT: u8 = 3;

const CTYPE_MPLS_INCOMING: u8 = 1;

const CTYPE_IDENT_BY_NAME: u8 = 1;
const CTYPE_IDENT_BY_INDEX: u8 = 2;
const CTYPE_IDENT_BY_ADDRESS: u8 = 3;

const ATTR_IF_INDEX: u8 = 0x08;
const ATTR_IP_ADDR: u8 = 0x04;
const ATTR_NAME: u8 = 0x02;
const ATTR_MTU: u8 = 0x01;

const AFI_IPV4: u16 = 1;
const AFI_IPV6: u16 = 2;

/// The longest interface name an interface information object can carry.
pub const MAX_INTERFACE_INFO_NAME_LEN: usize = 63;
/// The longest interface name an interface identification object can carry.
pub const MAX_INTERFACE_IDENT_NAME_LEN: usize = 255;

/// An ICMP extension object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extension {
    MplsLabelStack(MplsLabelStack),
    InterfaceInfo(InterfaceInfo),
    InterfaceIdent(InterfaceIdent),
    /// An object whose class and c-type pair is not otherwise recognized.
    Raw(RawExtension),
}

impl Extension {
    /// The encoded length of the object, including its object header.
    pub fn encoded_len(&self) -> usize {
        OBJECT_HEADER_LEN
            + match self {
                Extension::MplsLabelStack(ext) => ext.payload_len(),
                Extension::InterfaceInfo(ext) => ext.payload_len(),
                Extension::InterfaceIdent(ext) => ext.payload_len(),
                Extension::Raw(ext) => ext.data.len(),
            }
    }

    /// The class number of the object.
    pub fn class(&self) -> u8 {
        match self {
            Extension::MplsLabelStack(_) => CLASS_MPLS_LABEL_STACK,
            Extension::InterfaceInfo(_) => CLASS_INTERFACE_INFO,
            Extension::InterfaceIdent(_) => CLASS_INTERFACE_IDENT,
            Extension::Raw(ext) => ext.class,
        }
    }

    /// The c-type of the object.
    pub fn ctype(&self) -> u8 {
        match self {
            Extension::MplsLabelStack(_) => CTYPE_MPLS_INCOMING,
            Extension::InterfaceInfo(ext) => ext.ctype(),
            Extension::InterfaceIdent(ext) => ext.ctype(),
            Extension::Raw(ext) => ext.ctype,
        }
    }

    /// Encodes the object into a newly allocated vector.
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        self.marshal_extended(&mut bytes)?;
        Ok(bytes)
    }

    /// Appends the encoded object to `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for an [`Extension::Raw`] whose class and c-type
    /// would be decoded as an MPLS label stack or interface information object.
    pub fn marshal_extended(&self, bytes: &mut Vec<u8>) -> Result<()> {
        if let Extension::Raw(ext) = self {
            if ext.is_typed() {
                return Err(Error::InvalidExtension);
            }
        }

        let len = u16::try_from(self.encoded_len())
            .map_err(|_| Error::InvalidMessage("extension object exceeds 65535 bytes"))?;
        let start = bytes.len();
        bytes.extend(len.to_be_bytes());
        bytes.push(self.class());
        bytes.push(self.ctype());

        match self {
            Extension::MplsLabelStack(ext) => ext.marshal_payload(bytes)?,
            Extension::InterfaceInfo(ext) => ext.marshal_payload(bytes)?,
            Extension::InterfaceIdent(ext) => ext.marshal_payload(bytes)?,
            Extension::Raw(ext) => bytes.extend(&ext.data),
        }

        debug_assert_eq!(bytes.len() - start, len as usize);
        Ok(())
    }

    /// Decodes the object at the start of `bytes`, returning it along with the number of bytes
    /// it occupied.
    ///
    /// Interface identification objects are only recognized within extended echo requests; in
    /// any other message they are preserved as [`Extension::Raw`], as are objects of unknown
    /// class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedExtension`] if the declared object length is below the object
    /// header length or runs past the end of `bytes`, or if a recognized object's payload is
    /// inconsistent with its c-type.
    pub fn parse(typ: Type, bytes: &[u8]) -> Result<(Extension, usize)> {
        let len = be_u16(bytes, 0).ok_or(Error::MalformedExtension("truncated object header"))?
            as usize;
        if len < OBJECT_HEADER_LEN {
            return Err(Error::MalformedExtension("object length below header length"));
        }
        if len > bytes.len() {
            return Err(Error::MalformedExtension("object length exceeds extension structure"));
        }

        let class = bytes[2];
        let ctype = bytes[3];
        let payload = &bytes[OBJECT_HEADER_LEN..len];

        let ext = match (class, ctype) {
            (CLASS_MPLS_LABEL_STACK, CTYPE_MPLS_INCOMING) => {
                Extension::MplsLabelStack(MplsLabelStack::parse_payload(payload)?)
            }
            (CLASS_INTERFACE_INFO, _) => {
                Extension::InterfaceInfo(InterfaceInfo::parse_payload(ctype, payload)?)
            }
            (CLASS_INTERFACE_IDENT, CTYPE_IDENT_BY_NAME..=CTYPE_IDENT_BY_ADDRESS)
                if is_extended_echo_request(typ) =>
            {
                Extension::InterfaceIdent(InterfaceIdent::parse_payload(ctype, payload)?)
            }
            _ => Extension::Raw(RawExtension {
                class,
                ctype,
                data: payload.to_vec(),
            }),
        };

        Ok((ext, len))
    }
}

/// Decodes the sequence of objects that make up the body of an extension structure.
///
/// Trailing bytes too short to hold an object header are ignored.
pub fn parse_extensions(typ: Type, mut bytes: &[u8]) -> Result<Vec<Extension>> {
    let mut exts = Vec::new();
    while bytes.len() >= OBJECT_HEADER_LEN {
        let (ext, len) = Extension::parse(typ, bytes)?;
        exts.push(ext);
        bytes = &bytes[len..];
    }

    Ok(exts)
}

#[inline]
fn is_extended_echo_request(typ: Type) -> bool {
    matches!(
        typ,
        Type::V4(Icmpv4Type::EXTENDED_ECHO_REQUEST) | Type::V6(Icmpv6Type::EXTENDED_ECHO_REQUEST)
    )
}

/// Reports whether every extension in `exts` may be attached to a message of type `typ`.
///
/// Destination unreachable and time exceeded messages (both protocols) and ICMPv4 parameter
/// problem messages carry MPLS label stacks, interface information and unrecognized objects.
/// Extended echo requests carry either a single interface identification object or any number
/// of unrecognized objects. No other message type carries extensions.
///
/// An [`Extension::Raw`] with the class and c-type of an interface identification object is
/// refused in extended echo requests, where it would be decoded as the typed object.
pub fn extensions_allowed(typ: Type, exts: &[Extension]) -> bool {
    match typ {
        Type::V4(
            Icmpv4Type::DESTINATION_UNREACHABLE
            | Icmpv4Type::TIME_EXCEEDED
            | Icmpv4Type::PARAMETER_PROBLEM,
        )
        | Type::V6(Icmpv6Type::DESTINATION_UNREACHABLE | Icmpv6Type::TIME_EXCEEDED) => {
            exts.iter().all(|ext| {
                matches!(
                    ext,
                    Extension::MplsLabelStack(_) | Extension::InterfaceInfo(_) | Extension::Raw(_)
                )
            })
        }
        Type::V4(Icmpv4Type::EXTENDED_ECHO_REQUEST)
        | Type::V6(Icmpv6Type::EXTENDED_ECHO_REQUEST) => {
            let mut idents = 0;
            for ext in exts {
                match ext {
                    Extension::InterfaceIdent(_) => idents += 1,
                    Extension::Raw(ext) if ext.is_interface_ident() => return false,
                    Extension::Raw(_) => (),
                    _ => return false,
                }
            }
            idents == 0 || (idents == 1 && exts.len() == 1)
        }
        _ => exts.is_empty(),
    }
}

// =============================================================================
//                              MPLS Label Stack
// =============================================================================

/// A single MPLS label stack entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MplsLabel {
    /// Label value (20 bits). Wider values fail to encode.
    pub label: u32,
    /// Traffic class (3 bits). Wider values fail to encode.
    pub tc: u8,
    /// Bottom of stack.
    pub s: bool,
    pub ttl: u8,
}

impl MplsLabel {
    fn to_word(self) -> Result<u32> {
        if self.label > 0x000F_FFFF {
            return Err(Error::InvalidMessage("MPLS label exceeds 20 bits"));
        }
        if self.tc > 0x07 {
            return Err(Error::InvalidMessage("MPLS traffic class exceeds 3 bits"));
        }

        Ok((self.label << 12) | ((self.tc as u32) << 9) | ((self.s as u32) << 8) | self.ttl as u32)
    }

    #[inline]
    fn from_word(word: u32) -> Self {
        MplsLabel {
            label: word >> 12,
            tc: ((word >> 9) & 0x07) as u8,
            s: word & 0x0100 != 0,
            ttl: word as u8,
        }
    }
}

/// The incoming MPLS label stack of the datagram that triggered the message (RFC 4950).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MplsLabelStack {
    pub labels: Vec<MplsLabel>,
}

impl MplsLabelStack {
    #[inline]
    fn payload_len(&self) -> usize {
        4 * self.labels.len()
    }

    fn marshal_payload(&self, bytes: &mut Vec<u8>) -> Result<()> {
        for label in &self.labels {
            bytes.extend(label.to_word()?.to_be_bytes());
        }
        Ok(())
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() % 4 != 0 {
            return Err(Error::MalformedExtension(
                "MPLS label stack is not a multiple of 4 bytes",
            ));
        }

        let labels = payload
            .chunks_exact(4)
            .map(|c| MplsLabel::from_word(u32::from_be_bytes([c[0], c[1], c[2], c[3]])))
            .collect();

        Ok(MplsLabelStack { labels })
    }
}

// =============================================================================
//                            Interface Information
// =============================================================================

/// The role of the interface described by an [`InterfaceInfo`] object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InterfaceRole {
    /// The interface the offending datagram arrived on.
    #[default]
    IncomingIp,
    /// The sub-IP component of the interface the datagram arrived on.
    SubIp,
    /// The interface the datagram would have been forwarded out of.
    OutgoingIp,
    /// The next hop the datagram would have been forwarded to.
    NextHopIp,
}

impl InterfaceRole {
    #[inline]
    fn bits(self) -> u8 {
        match self {
            InterfaceRole::IncomingIp => 0,
            InterfaceRole::SubIp => 1,
            InterfaceRole::OutgoingIp => 2,
            InterfaceRole::NextHopIp => 3,
        }
    }

    #[inline]
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => InterfaceRole::IncomingIp,
            1 => InterfaceRole::SubIp,
            2 => InterfaceRole::OutgoingIp,
            _ => InterfaceRole::NextHopIp,
        }
    }
}

/// Information about the interface a datagram arrived on or would have left through
/// (RFC 5837).
///
/// Every attribute is optional; the attributes present are advertised in the c-type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub role: InterfaceRole,
    pub if_index: Option<u32>,
    pub addr: Option<IpAddr>,
    /// The interface name. Names that are not valid UTF-8 are decoded lossily, with each invalid
    /// sequence replaced by U+FFFD, so they do not re-encode to the bytes received.
    pub name: Option<String>,
    pub mtu: Option<u32>,
}

impl InterfaceInfo {
    fn ctype(&self) -> u8 {
        let mut ctype = self.role.bits() << 6;
        if self.if_index.is_some() {
            ctype |= ATTR_IF_INDEX;
        }
        if self.addr.is_some() {
            ctype |= ATTR_IP_ADDR;
        }
        if self.name.is_some() {
            ctype |= ATTR_NAME;
        }
        if self.mtu.is_some() {
            ctype |= ATTR_MTU;
        }
        ctype
    }

    #[inline]
    fn name_sub_object_len(name: &str) -> usize {
        padded_length::<4>(1 + name.len())
    }

    fn payload_len(&self) -> usize {
        let mut len = 0;
        if self.if_index.is_some() {
            len += 4;
        }
        match self.addr {
            Some(IpAddr::V4(_)) => len += 4 + 4,
            Some(IpAddr::V6(_)) => len += 4 + 16,
            None => (),
        }
        if let Some(name) = &self.name {
            len += Self::name_sub_object_len(name);
        }
        if self.mtu.is_some() {
            len += 4;
        }
        len
    }

    fn marshal_payload(&self, bytes: &mut Vec<u8>) -> Result<()> {
        if let Some(if_index) = self.if_index {
            bytes.extend(if_index.to_be_bytes());
        }

        match self.addr {
            Some(IpAddr::V4(addr)) => {
                bytes.extend(AFI_IPV4.to_be_bytes());
                bytes.extend([0, 0]);
                bytes.extend(addr.octets());
            }
            Some(IpAddr::V6(addr)) => {
                bytes.extend(AFI_IPV6.to_be_bytes());
                bytes.extend([0, 0]);
                bytes.extend(addr.octets());
            }
            None => (),
        }

        if let Some(name) = &self.name {
            if name.len() > MAX_INTERFACE_INFO_NAME_LEN {
                return Err(Error::InvalidMessage("interface name exceeds 63 bytes"));
            }
            let sub_len = Self::name_sub_object_len(name);
            let start = bytes.len();
            bytes.push(sub_len as u8);
            bytes.extend(name.as_bytes());
            bytes.resize(start + sub_len, 0);
        }

        if let Some(mtu) = self.mtu {
            bytes.extend(mtu.to_be_bytes());
        }

        Ok(())
    }

    fn parse_payload(ctype: u8, mut payload: &[u8]) -> Result<Self> {
        let mut info = InterfaceInfo {
            role: InterfaceRole::from_bits(ctype >> 6),
            ..Default::default()
        };

        if ctype & ATTR_IF_INDEX != 0 {
            info.if_index = Some(
                be_u32(payload, 0).ok_or(Error::MalformedExtension("truncated interface index"))?,
            );
            payload = &payload[4..];
        }

        if ctype & ATTR_IP_ADDR != 0 {
            let afi =
                be_u16(payload, 0).ok_or(Error::MalformedExtension("truncated address sub-object"))?;
            let addr_len = match afi {
                AFI_IPV4 => 4,
                AFI_IPV6 => 16,
                _ => return Err(Error::MalformedExtension("unknown address family")),
            };
            let addr = payload
                .get(4..4 + addr_len)
                .ok_or(Error::MalformedExtension("truncated address sub-object"))?;
            info.addr = Some(match addr.len() {
                4 => IpAddr::V4(Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3])),
                _ => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(addr);
                    IpAddr::V6(Ipv6Addr::from(octets))
                }
            });
            payload = &payload[4 + addr_len..];
        }

        if ctype & ATTR_NAME != 0 {
            let sub_len = *payload
                .first()
                .ok_or(Error::MalformedExtension("truncated name sub-object"))?
                as usize;
            if sub_len == 0 || sub_len > payload.len() {
                return Err(Error::MalformedExtension("invalid name sub-object length"));
            }
            let name = trim_nul(&payload[1..sub_len]);
            info.name = Some(String::from_utf8_lossy(name).into_owned());
            payload = &payload[sub_len..];
        }

        if ctype & ATTR_MTU != 0 {
            info.mtu = Some(be_u32(payload, 0).ok_or(Error::MalformedExtension("truncated MTU"))?);
        }

        Ok(info)
    }
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

// =============================================================================
//                          Interface Identification
// =============================================================================

/// Identifies the interface an extended echo request probes (RFC 8335).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterfaceIdent {
    /// Identifies the interface by name.
    ///
    /// Names that are not valid UTF-8 are decoded lossily, as for [`InterfaceInfo::name`].
    Name(String),
    /// Identifies the interface by ifIndex.
    Index(u32),
    /// Identifies the interface by one of its addresses.
    Address {
        /// Address family identifier (1 for IPv4, 2 for IPv6).
        afi: u16,
        addr: Vec<u8>,
    },
}

impl InterfaceIdent {
    /// Identifies the interface by the given IP address.
    pub fn from_ip(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(a) => InterfaceIdent::Address {
                afi: AFI_IPV4,
                addr: a.octets().to_vec(),
            },
            IpAddr::V6(a) => InterfaceIdent::Address {
                afi: AFI_IPV6,
                addr: a.octets().to_vec(),
            },
        }
    }

    fn ctype(&self) -> u8 {
        match self {
            InterfaceIdent::Name(_) => CTYPE_IDENT_BY_NAME,
            InterfaceIdent::Index(_) => CTYPE_IDENT_BY_INDEX,
            InterfaceIdent::Address { .. } => CTYPE_IDENT_BY_ADDRESS,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            InterfaceIdent::Name(name) => padded_length::<4>(name.len()),
            InterfaceIdent::Index(_) => 4,
            InterfaceIdent::Address { addr, .. } => 4 + padded_length::<4>(addr.len()),
        }
    }

    fn marshal_payload(&self, bytes: &mut Vec<u8>) -> Result<()> {
        let start = bytes.len();
        match self {
            InterfaceIdent::Name(name) => {
                if name.len() > MAX_INTERFACE_IDENT_NAME_LEN {
                    return Err(Error::InvalidMessage("interface name exceeds 255 bytes"));
                }
                bytes.extend(name.as_bytes());
            }
            InterfaceIdent::Index(index) => bytes.extend(index.to_be_bytes()),
            InterfaceIdent::Address { afi, addr } => {
                let addr_len = u8::try_from(addr.len())
                    .map_err(|_| Error::InvalidMessage("interface address exceeds 255 bytes"))?;
                bytes.extend(afi.to_be_bytes());
                bytes.push(addr_len);
                bytes.push(0);
                bytes.extend(addr);
            }
        }
        bytes.resize(start + self.payload_len(), 0);
        Ok(())
    }

    fn parse_payload(ctype: u8, payload: &[u8]) -> Result<Self> {
        match ctype {
            CTYPE_IDENT_BY_NAME => Ok(InterfaceIdent::Name(
                String::from_utf8_lossy(trim_nul(payload)).into_owned(),
            )),
            CTYPE_IDENT_BY_INDEX => {
                let index = be_u32(payload, 0)
                    .ok_or(Error::MalformedExtension("truncated interface index"))?;
                Ok(InterfaceIdent::Index(index))
            }
            _ => {
                let afi = be_u16(payload, 0)
                    .ok_or(Error::MalformedExtension("truncated interface address"))?;
                let addr_len = *payload
                    .get(2)
                    .ok_or(Error::MalformedExtension("truncated interface address"))?
                    as usize;
                let addr = payload
                    .get(4..4 + addr_len)
                    .ok_or(Error::MalformedExtension("truncated interface address"))?;
                Ok(InterfaceIdent::Address {
                    afi,
                    addr: addr.to_vec(),
                })
            }
        }
    }
}

// =============================================================================
//                              Raw Extension
// =============================================================================

/// An extension object carried through unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawExtension {
    pub class: u8,
    pub ctype: u8,
    pub data: Vec<u8>,
}

impl RawExtension {
    /// Whether the class and c-type pair is decoded as a typed object in every message.
    #[inline]
    fn is_typed(&self) -> bool {
        matches!(
            (self.class, self.ctype),
            (CLASS_MPLS_LABEL_STACK, CTYPE_MPLS_INCOMING) | (CLASS_INTERFACE_INFO, _)
        )
    }

    /// Whether the pair is decoded as interface identification within extended echo requests.
    #[inline]
    fn is_interface_ident(&self) -> bool {
        self.class == CLASS_INTERFACE_IDENT
            && (CTYPE_IDENT_BY_NAME..=CTYPE_IDENT_BY_ADDRESS).contains(&self.ctype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIME_EXCEEDED: Type = Type::V4(Icmpv4Type::TIME_EXCEEDED);
    const EXT_ECHO_REQUEST: Type = Type::V6(Icmpv6Type::EXTENDED_ECHO_REQUEST);

    #[test]
    fn mpls_label_stack_layout() {
        let ext = Extension::MplsLabelStack(MplsLabelStack {
            labels: vec![MplsLabel {
                label: 16014,
                tc: 0x4,
                s: true,
                ttl: 255,
            }],
        });
        let bytes = ext.marshal().unwrap();
        assert_eq!(bytes, [0x00, 0x08, 0x01, 0x01, 0x03, 0xe8, 0xe9, 0xff]);
        assert_eq!(Extension::parse(TIME_EXCEEDED, &bytes).unwrap(), (ext, 8));
    }

    #[test]
    fn interface_info_layout() {
        let ext = Extension::InterfaceInfo(InterfaceInfo {
            role: InterfaceRole::OutgoingIp,
            if_index: Some(15),
            addr: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1))),
            name: Some("en101".into()),
            mtu: Some(8192),
        });
        let bytes = ext.marshal().unwrap();
        assert_eq!(
            bytes,
            [
                0x00, 0x1c, 0x02, 0x8f, // object header, role 2 with all attributes
                0x00, 0x00, 0x00, 0x0f, // ifIndex
                0x00, 0x01, 0x00, 0x00, 192, 168, 0, 1, // address sub-object
                0x08, b'e', b'n', b'1', b'0', b'1', 0x00, 0x00, // name sub-object
                0x00, 0x00, 0x20, 0x00, // MTU
            ]
        );
        assert_eq!(ext.encoded_len(), bytes.len());
        assert_eq!(Extension::parse(TIME_EXCEEDED, &bytes).unwrap(), (ext, 28));
    }

    #[test]
    fn interface_info_rejects_long_names() {
        let ext = Extension::InterfaceInfo(InterfaceInfo {
            name: Some("x".repeat(64)),
            ..Default::default()
        });
        assert!(matches!(ext.marshal(), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn interface_ident_only_in_extended_echo_request() {
        let ext = Extension::InterfaceIdent(InterfaceIdent::Name("en101".into()));
        let bytes = ext.marshal().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(
            Extension::parse(EXT_ECHO_REQUEST, &bytes).unwrap(),
            (ext, 12)
        );

        let (raw, _) = Extension::parse(TIME_EXCEEDED, &bytes).unwrap();
        assert_eq!(
            raw,
            Extension::Raw(RawExtension {
                class: 3,
                ctype: 1,
                data: b"en101\0\0\0".to_vec(),
            })
        );
    }

    #[test]
    fn interface_ident_variants() {
        for ident in [
            InterfaceIdent::Index(911),
            InterfaceIdent::from_ip("fe80::1".parse().unwrap()),
            InterfaceIdent::from_ip(Ipv4Addr::new(10, 0, 0, 1).into()),
        ] {
            let ext = Extension::InterfaceIdent(ident);
            let bytes = ext.marshal().unwrap();
            assert_eq!(bytes.len() % 4, 0);
            let (parsed, len) = Extension::parse(EXT_ECHO_REQUEST, &bytes).unwrap();
            assert_eq!(len, bytes.len());
            assert_eq!(parsed, ext);
        }
    }

    #[test]
    fn unknown_objects_are_preserved() {
        let bytes = [0x00, 0x07, 0xC8, 0x05, 0xDE, 0xAD, 0xBE];
        let (ext, len) = Extension::parse(TIME_EXCEEDED, &bytes).unwrap();
        assert_eq!(len, 7);
        assert_eq!(ext.marshal().unwrap(), bytes);
    }

    #[test]
    fn malformed_object_lengths() {
        assert!(matches!(
            Extension::parse(TIME_EXCEEDED, &[0x00, 0x03, 0x01, 0x01]),
            Err(Error::MalformedExtension(_))
        ));
        assert!(matches!(
            Extension::parse(TIME_EXCEEDED, &[0x00, 0x0c, 0x01, 0x01, 0, 0, 0, 0]),
            Err(Error::MalformedExtension(_))
        ));
        assert!(matches!(
            parse_extensions(TIME_EXCEEDED, &[0x00, 0x04, 0xFF, 0x00, 0x00, 0x10, 0x01, 0x01]),
            Err(Error::MalformedExtension(_))
        ));
    }

    #[test]
    fn raw_objects_cannot_shadow_typed_ones() {
        for (class, ctype) in [(1, 1), (2, 0), (2, 0x8f)] {
            let ext = Extension::Raw(RawExtension {
                class,
                ctype,
                data: vec![1, 2, 3],
            });
            assert_eq!(ext.marshal(), Err(Error::InvalidExtension));
        }

        // Pairs that decode back as raw objects still encode
        for (class, ctype) in [(1, 2), (3, 1), (0xC8, 5)] {
            let ext = Extension::Raw(RawExtension {
                class,
                ctype,
                data: vec![0xDE, 0xAD, 0xBE, 0xEF],
            });
            let bytes = ext.marshal().unwrap();
            assert_eq!(Extension::parse(TIME_EXCEEDED, &bytes).unwrap(), (ext, 8));
        }

        let by_name = Extension::Raw(RawExtension {
            class: 3,
            ctype: 1,
            data: b"eth0".to_vec(),
        });
        assert!(extensions_allowed(TIME_EXCEEDED, &[by_name.clone()]));
        assert!(!extensions_allowed(EXT_ECHO_REQUEST, &[by_name]));
    }

    #[test]
    fn mpls_fields_out_of_range() {
        let label = MplsLabel {
            label: 0x10_0000,
            ..Default::default()
        };
        let ext = Extension::MplsLabelStack(MplsLabelStack {
            labels: vec![label],
        });
        assert!(matches!(ext.marshal(), Err(Error::InvalidMessage(_))));

        let label = MplsLabel {
            label: 0x000F_FFFF,
            tc: 8,
            ..Default::default()
        };
        let ext = Extension::MplsLabelStack(MplsLabelStack {
            labels: vec![label],
        });
        assert!(matches!(ext.marshal(), Err(Error::InvalidMessage(_))));

        let label = MplsLabel {
            label: 0x000F_FFFF,
            tc: 7,
            s: true,
            ttl: 1,
        };
        let ext = Extension::MplsLabelStack(MplsLabelStack {
            labels: vec![label],
        });
        let bytes = ext.marshal().unwrap();
        assert_eq!(Extension::parse(TIME_EXCEEDED, &bytes).unwrap(), (ext, 8));
    }

    #[test]
    fn invalid_utf8_names_decode_lossily() {
        let bytes = [
            0x00, 0x0c, 0x02, 0x02, // object header, name only
            0x08, b'e', b'n', 0xFF, b'0', 0x00, 0x00, 0x00, // name sub-object
        ];
        let (ext, _) = Extension::parse(TIME_EXCEEDED, &bytes).unwrap();
        let Extension::InterfaceInfo(info) = ext else {
            panic!("expected interface information, got {:?}", ext);
        };
        assert_eq!(info.name.as_deref(), Some("en\u{FFFD}0"));

        let bytes = [0x00, 0x08, 0x03, 0x01, b'e', 0xFE, 0x00, 0x00];
        let (ext, _) = Extension::parse(EXT_ECHO_REQUEST, &bytes).unwrap();
        assert_eq!(
            ext,
            Extension::InterfaceIdent(InterfaceIdent::Name("e\u{FFFD}".into()))
        );
    }

    #[test]
    fn compatibility_table() {
        let mpls = Extension::MplsLabelStack(MplsLabelStack::default());
        let ident = Extension::InterfaceIdent(InterfaceIdent::Index(1));
        let raw = Extension::Raw(RawExtension::default());

        let unreach = Type::V6(Icmpv6Type::DESTINATION_UNREACHABLE);
        assert!(extensions_allowed(unreach, &[mpls.clone(), raw.clone()]));
        assert!(!extensions_allowed(unreach, &[ident.clone()]));

        assert!(extensions_allowed(
            Type::V4(Icmpv4Type::PARAMETER_PROBLEM),
            &[mpls.clone()]
        ));
        assert!(!extensions_allowed(
            Type::V6(Icmpv6Type::PARAMETER_PROBLEM),
            &[mpls.clone()]
        ));

        assert!(extensions_allowed(EXT_ECHO_REQUEST, &[ident.clone()]));
        assert!(extensions_allowed(EXT_ECHO_REQUEST, &[raw.clone(), raw.clone()]));
        assert!(!extensions_allowed(EXT_ECHO_REQUEST, &[ident.clone(), raw.clone()]));
        assert!(!extensions_allowed(EXT_ECHO_REQUEST, &[mpls]));

        assert!(extensions_allowed(Type::V4(Icmpv4Type::ECHO), &[]));
        assert!(!extensions_allowed(Type::V4(Icmpv4Type::ECHO), &[raw]));
    }
}
