// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! ICMPv4 and ICMPv6 messages.
//!
//! A [`Message`] is a type, a code, a checksum and an optional [`MessageBody`]. The type carries
//! the protocol the message belongs to, which in turn selects the wire layout of protocol-specific
//! bodies (such as the parameter problem pointer) and how the checksum is computed.

mod body;
mod extension;
mod multipart;
mod types;

use std::net::Ipv6Addr;

pub use body::*;
pub use extension::*;
pub use multipart::{EXTENSION_HEADER_LEN, EXTENSION_VERSION, MIN_ORIG_DATAGRAM_LEN};
pub use types::*;

use crate::error::{Error, Result};
use crate::utils::checksum;

/// The length of the fixed ICMP header (type, code and checksum).
pub const HEADER_LEN: usize = 4;
/// The length of the IPv6 pseudo-header covered by the ICMPv6 checksum.
pub const IPV6_PSEUDO_HEADER_LEN: usize = 40;

/// An ICMP message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub typ: Type,
    pub code: u8,
    /// The checksum as read from the wire. Ignored when marshaling.
    pub checksum: u16,
    pub body: Option<MessageBody>,
}

impl Message {
    /// The encoded length of the message.
    #[inline]
    pub fn len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    /// The encoded length of the body, or 0 for an absent body.
    #[inline]
    pub fn body_len(&self) -> usize {
        self.body
            .as_ref()
            .map_or(0, |body| body.len(self.typ.protocol()))
    }

    /// Encodes the message.
    ///
    /// The checksum of an ICMPv4 message is always computed. The checksum of an ICMPv6 message
    /// covers an IPv6 pseudo-header; when `pseudo_header` is supplied its upper-layer length is
    /// filled in and the checksum is computed, otherwise the checksum field is left zero for the
    /// kernel to fill in. `pseudo_header` is ignored for ICMPv4.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if `pseudo_header` is not 40 bytes long, along with any
    /// error encountered marshaling the body.
    pub fn marshal(&self, pseudo_header: Option<&[u8]>) -> Result<Vec<u8>> {
        let proto = self.typ.protocol();
        let psh: &[u8] = match (proto, pseudo_header) {
            (Protocol::Icmpv6, Some(psh)) if psh.len() != IPV6_PSEUDO_HEADER_LEN => {
                return Err(Error::InvalidMessage("pseudo-header must be 40 bytes"))
            }
            (Protocol::Icmpv6, Some(psh)) => psh,
            _ => &[],
        };

        let mut bytes = Vec::with_capacity(psh.len() + self.len());
        bytes.extend(psh);
        bytes.extend([self.typ.value(), self.code, 0, 0]);
        if let Some(body) = &self.body {
            if !body.is_empty(proto) {
                bytes.extend(body.marshal(self.typ)?);
            }
        }

        if proto == Protocol::Icmpv6 {
            if psh.is_empty() {
                return Ok(bytes);
            }
            let upper_len = u32::try_from(bytes.len() - psh.len())
                .map_err(|_| Error::InvalidMessage("message exceeds 4294967295 bytes"))?;
            bytes[32..36].copy_from_slice(&upper_len.to_be_bytes());
        }

        let sum = checksum(&bytes);
        let off = psh.len();
        bytes[off + 2..off + 4].copy_from_slice(&sum.to_be_bytes());

        Ok(bytes.split_off(off))
    }

    /// Decodes an ICMP message of the given protocol.
    pub fn parse(proto: Protocol, bytes: &[u8]) -> Result<Message> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::MessageTooShort);
        }

        let typ = Type::new(proto, bytes[0]);
        Ok(Message {
            typ,
            code: bytes[1],
            checksum: u16::from_be_bytes([bytes[2], bytes[3]]),
            body: Some(MessageBody::parse(typ, &bytes[HEADER_LEN..])?),
        })
    }
}

/// Decodes an ICMP message embedded in the IP protocol numbered `proto_number` (1 for ICMPv4,
/// 58 for ICMPv6).
///
/// # Errors
///
/// Returns [`Error::InvalidProtocol`] for any other protocol number, [`Error::MessageTooShort`]
/// if `bytes` cannot hold the message header or the fixed part of the body, and
/// [`Error::MalformedExtension`] if an extension object is malformed.
pub fn parse_message(proto_number: u8, bytes: &[u8]) -> Result<Message> {
    Message::parse(Protocol::from_number(proto_number)?, bytes)
}

/// Builds the IPv6 pseudo-header covered by the ICMPv6 checksum.
///
/// The upper-layer packet length is left zero; [`Message::marshal`] fills it in.
pub fn ipv6_pseudo_header(src: Ipv6Addr, dst: Ipv6Addr) -> [u8; IPV6_PSEUDO_HEADER_LEN] {
    let mut psh = [0u8; IPV6_PSEUDO_HEADER_LEN];
    psh[..16].copy_from_slice(&src.octets());
    psh[16..32].copy_from_slice(&dst.octets());
    psh[39] = Protocol::Icmpv6.number();
    psh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ones_complement_16bit;

    fn echo(typ: Type) -> Message {
        Message {
            typ,
            code: 0,
            checksum: 0,
            body: Some(MessageBody::Echo(Echo {
                id: 0x1234,
                seq: 1,
                data: b"HELLO-R-U-THERE".to_vec(),
            })),
        }
    }

    #[test]
    fn icmpv4_checksum_is_computed() {
        let msg = echo(Icmpv4Type::ECHO.into());
        let bytes = msg.marshal(None).unwrap();
        assert_eq!(bytes.len(), msg.len());
        assert_eq!(&bytes[..2], &[8, 0]);
        assert_ne!(&bytes[2..4], &[0, 0]);
        assert_eq!(checksum(&bytes), 0);

        let parsed = parse_message(1, &bytes).unwrap();
        assert_eq!(parsed.checksum, u16::from_be_bytes([bytes[2], bytes[3]]));
        assert_eq!(Message { checksum: 0, ..parsed }, msg);
    }

    #[test]
    fn icmpv6_checksum_without_pseudo_header_is_zero() {
        let msg = echo(Icmpv6Type::ECHO_REQUEST.into());
        let bytes = msg.marshal(None).unwrap();
        assert_eq!(&bytes[..4], &[128, 0, 0, 0]);
        assert_eq!(parse_message(58, &bytes).unwrap(), msg);
    }

    #[test]
    fn icmpv6_checksum_covers_pseudo_header() {
        let src: Ipv6Addr = "fe80::1".parse().unwrap();
        let dst: Ipv6Addr = "ff02::1".parse().unwrap();
        let psh = ipv6_pseudo_header(src, dst);
        assert_eq!(psh[39], 58);

        let msg = echo(Icmpv6Type::ECHO_REQUEST.into());
        let bytes = msg.marshal(Some(&psh)).unwrap();
        assert_eq!(bytes.len(), msg.len());
        assert_ne!(&bytes[2..4], &[0, 0]);

        let mut verify = psh.to_vec();
        verify[32..36].copy_from_slice(&(bytes.len() as u32).to_be_bytes());
        verify.extend(&bytes);
        assert_eq!(ones_complement_16bit(&verify), 0xFFFF);

        assert_eq!(
            msg.marshal(Some(&psh[..39])),
            Err(Error::InvalidMessage("pseudo-header must be 40 bytes"))
        );
    }

    #[test]
    fn absent_body() {
        let msg = Message {
            typ: Icmpv4Type(253).into(),
            code: 3,
            checksum: 0,
            body: None,
        };
        assert_eq!(msg.body_len(), 0);
        let bytes = msg.marshal(None).unwrap();
        assert_eq!(bytes.len(), 4);
        assert_eq!(checksum(&bytes), 0);

        let parsed = parse_message(1, &bytes).unwrap();
        assert_eq!(
            parsed.body,
            Some(MessageBody::Raw(RawBody { data: Vec::new() }))
        );
    }

    #[test]
    fn parse_rejects() {
        assert_eq!(parse_message(6, &[8, 0, 0, 0]), Err(Error::InvalidProtocol));
        assert_eq!(parse_message(1, &[8, 0, 0]), Err(Error::MessageTooShort));
        assert_eq!(parse_message(1, &[8, 0, 0, 0, 0]), Err(Error::MessageTooShort));
    }

    #[test]
    fn time_exceeded_with_extensions_round_trips() {
        let msg = Message {
            typ: Icmpv4Type::TIME_EXCEEDED.into(),
            code: 0,
            checksum: 0,
            body: Some(MessageBody::TimeExceeded(TimeExceeded {
                data: vec![0x45; MIN_ORIG_DATAGRAM_LEN],
                extensions: vec![
                    Extension::InterfaceInfo(InterfaceInfo {
                        role: InterfaceRole::IncomingIp,
                        if_index: Some(22),
                        addr: Some("2001:db8::1".parse().unwrap()),
                        name: Some("ge-0/0/1".into()),
                        mtu: Some(9000),
                    }),
                    Extension::Raw(RawExtension {
                        class: 200,
                        ctype: 9,
                        data: vec![0xA5; 12],
                    }),
                ],
            })),
        };
        let bytes = msg.marshal(None).unwrap();
        let parsed = parse_message(1, &bytes).unwrap();
        assert_eq!(Message { checksum: 0, ..parsed }, msg);
    }
}
