// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! ICMP message bodies.

use crate::error::{Error, Result};
use crate::icmp::extension::{extensions_allowed, Extension};
use crate::icmp::multipart::{
    marshal_multipart, multipart_len, parse_multipart, parse_trailing_extensions,
};
use crate::icmp::types::{Icmpv4Type, Icmpv6Type, Protocol, Type};
use crate::utils::{be_u16, be_u32};

const FIXED_LEN: usize = 4;

/// The body of an ICMP message.
///
/// Each variant corresponds to a family of message types; [`MessageBody::Raw`] holds the body
/// of any type without a dedicated variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    Echo(Echo),
    DestinationUnreachable(DestinationUnreachable),
    PacketTooBig(PacketTooBig),
    TimeExceeded(TimeExceeded),
    ParameterProblem(ParameterProblem),
    ExtendedEchoRequest(ExtendedEchoRequest),
    ExtendedEchoReply(ExtendedEchoReply),
    Raw(RawBody),
}

impl MessageBody {
    /// The encoded length of the body under `proto`.
    pub fn len(&self, proto: Protocol) -> usize {
        match self {
            MessageBody::Echo(b) => FIXED_LEN + b.data.len(),
            MessageBody::DestinationUnreachable(b) => {
                multipart_len(proto, true, &b.data, &b.extensions)
            }
            MessageBody::PacketTooBig(b) => FIXED_LEN + b.data.len(),
            MessageBody::TimeExceeded(b) => multipart_len(proto, true, &b.data, &b.extensions),
            MessageBody::ParameterProblem(b) => match proto {
                Protocol::Icmpv4 => multipart_len(proto, true, &b.data, &b.extensions),
                Protocol::Icmpv6 => FIXED_LEN + b.data.len(),
            },
            MessageBody::ExtendedEchoRequest(b) => multipart_len(proto, false, &[], &b.extensions),
            MessageBody::ExtendedEchoReply(_) => FIXED_LEN,
            MessageBody::Raw(b) => b.data.len(),
        }
    }

    /// Reports whether the body encodes to zero bytes under `proto`.
    #[inline]
    pub fn is_empty(&self, proto: Protocol) -> bool {
        self.len(proto) == 0
    }

    /// Encodes the body as part of a message of type `typ`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if an attached extension may not be carried by `typ`,
    /// [`Error::InvalidProtocol`] for a body that does not exist under the protocol of `typ`,
    /// and [`Error::InvalidMessage`] if a field cannot be represented on the wire.
    pub fn marshal(&self, typ: Type) -> Result<Vec<u8>> {
        let proto = typ.protocol();
        match self {
            MessageBody::Echo(b) => {
                let mut bytes = Vec::with_capacity(FIXED_LEN + b.data.len());
                bytes.extend(b.id.to_be_bytes());
                bytes.extend(b.seq.to_be_bytes());
                bytes.extend(&b.data);
                Ok(bytes)
            }
            MessageBody::DestinationUnreachable(b) => {
                if !extensions_allowed(typ, &b.extensions) {
                    return Err(Error::InvalidExtension);
                }
                marshal_multipart(proto, true, &b.data, &b.extensions)
            }
            MessageBody::PacketTooBig(b) => {
                if proto != Protocol::Icmpv6 {
                    return Err(Error::InvalidProtocol);
                }
                let mut bytes = Vec::with_capacity(FIXED_LEN + b.data.len());
                bytes.extend(b.mtu.to_be_bytes());
                bytes.extend(&b.data);
                Ok(bytes)
            }
            MessageBody::TimeExceeded(b) => {
                if !extensions_allowed(typ, &b.extensions) {
                    return Err(Error::InvalidExtension);
                }
                marshal_multipart(proto, true, &b.data, &b.extensions)
            }
            MessageBody::ParameterProblem(b) => b.marshal(typ),
            MessageBody::ExtendedEchoRequest(b) => {
                if !extensions_allowed(typ, &b.extensions) {
                    return Err(Error::InvalidExtension);
                }
                let mut bytes = marshal_multipart(proto, false, &[], &b.extensions)?;
                bytes[..2].copy_from_slice(&b.id.to_be_bytes());
                bytes[2] = b.seq;
                if b.local {
                    bytes[3] |= 0x01;
                }
                Ok(bytes)
            }
            MessageBody::ExtendedEchoReply(b) => {
                if b.state > 0x07 {
                    return Err(Error::InvalidMessage("extended echo reply state exceeds 3 bits"));
                }
                let [id_hi, id_lo] = b.id.to_be_bytes();
                let mut flags = b.state << 5;
                if b.active {
                    flags |= 0x04;
                }
                if b.ipv4 {
                    flags |= 0x02;
                }
                if b.ipv6 {
                    flags |= 0x01;
                }
                Ok(vec![id_hi, id_lo, b.seq, flags])
            }
            MessageBody::Raw(b) => Ok(b.data.clone()),
        }
    }

    /// Decodes the body of a message of type `typ` from `bytes`, which excludes the 4-byte
    /// message header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooShort`] if `bytes` is shorter than the fixed portion of the
    /// body, and [`Error::MalformedExtension`] if an extension structure is present but one of
    /// its objects is malformed.
    pub fn parse(typ: Type, bytes: &[u8]) -> Result<MessageBody> {
        match typ {
            Type::V4(Icmpv4Type::ECHO | Icmpv4Type::ECHO_REPLY)
            | Type::V6(Icmpv6Type::ECHO_REQUEST | Icmpv6Type::ECHO_REPLY) => {
                let (id, seq) = be_u16(bytes, 0)
                    .zip(be_u16(bytes, 2))
                    .ok_or(Error::MessageTooShort)?;
                Ok(MessageBody::Echo(Echo {
                    id,
                    seq,
                    data: bytes[FIXED_LEN..].to_vec(),
                }))
            }
            Type::V4(Icmpv4Type::DESTINATION_UNREACHABLE)
            | Type::V6(Icmpv6Type::DESTINATION_UNREACHABLE) => {
                let (data, extensions) = parse_multipart(typ, bytes)?;
                Ok(MessageBody::DestinationUnreachable(DestinationUnreachable {
                    data,
                    extensions,
                }))
            }
            Type::V6(Icmpv6Type::PACKET_TOO_BIG) => {
                let mtu = be_u32(bytes, 0).ok_or(Error::MessageTooShort)?;
                Ok(MessageBody::PacketTooBig(PacketTooBig {
                    mtu,
                    data: bytes[FIXED_LEN..].to_vec(),
                }))
            }
            Type::V4(Icmpv4Type::TIME_EXCEEDED) | Type::V6(Icmpv6Type::TIME_EXCEEDED) => {
                let (data, extensions) = parse_multipart(typ, bytes)?;
                Ok(MessageBody::TimeExceeded(TimeExceeded { data, extensions }))
            }
            Type::V4(Icmpv4Type::PARAMETER_PROBLEM) | Type::V6(Icmpv6Type::PARAMETER_PROBLEM) => {
                ParameterProblem::parse(typ, bytes).map(MessageBody::ParameterProblem)
            }
            Type::V4(Icmpv4Type::EXTENDED_ECHO_REQUEST)
            | Type::V6(Icmpv6Type::EXTENDED_ECHO_REQUEST) => {
                if bytes.len() < FIXED_LEN {
                    return Err(Error::MessageTooShort);
                }
                Ok(MessageBody::ExtendedEchoRequest(ExtendedEchoRequest {
                    id: u16::from_be_bytes([bytes[0], bytes[1]]),
                    seq: bytes[2],
                    local: bytes[3] & 0x01 != 0,
                    extensions: parse_trailing_extensions(typ, &bytes[FIXED_LEN..])?,
                }))
            }
            Type::V4(Icmpv4Type::EXTENDED_ECHO_REPLY)
            | Type::V6(Icmpv6Type::EXTENDED_ECHO_REPLY) => {
                if bytes.len() < FIXED_LEN {
                    return Err(Error::MessageTooShort);
                }
                Ok(MessageBody::ExtendedEchoReply(ExtendedEchoReply {
                    id: u16::from_be_bytes([bytes[0], bytes[1]]),
                    seq: bytes[2],
                    state: bytes[3] >> 5,
                    active: bytes[3] & 0x04 != 0,
                    ipv4: bytes[3] & 0x02 != 0,
                    ipv6: bytes[3] & 0x01 != 0,
                }))
            }
            _ => Ok(MessageBody::Raw(RawBody {
                data: bytes.to_vec(),
            })),
        }
    }
}

/// An echo request or echo reply body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Echo {
    pub id: u16,
    pub seq: u16,
    pub data: Vec<u8>,
}

/// A destination unreachable body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DestinationUnreachable {
    /// The leading bytes of the datagram that could not be delivered.
    pub data: Vec<u8>,
    pub extensions: Vec<Extension>,
}

/// An ICMPv6 packet too big body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketTooBig {
    /// The MTU of the next-hop link.
    pub mtu: u32,
    pub data: Vec<u8>,
}

/// A time exceeded body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimeExceeded {
    pub data: Vec<u8>,
    pub extensions: Vec<Extension>,
}

/// A parameter problem body.
///
/// Under ICMPv4 the pointer is a single byte and the body is a multi-part body that may carry
/// extensions. Under ICMPv6 the pointer is a 32-bit offset and the remainder of the body is the
/// original datagram with no extension processing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterProblem {
    /// Offset within the original datagram where the error was detected.
    pub pointer: u32,
    pub data: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl ParameterProblem {
    fn marshal(&self, typ: Type) -> Result<Vec<u8>> {
        match typ.protocol() {
            Protocol::Icmpv4 => {
                if !extensions_allowed(typ, &self.extensions) {
                    return Err(Error::InvalidExtension);
                }
                let pointer = u8::try_from(self.pointer)
                    .map_err(|_| Error::InvalidMessage("ICMPv4 pointer exceeds 255"))?;
                let mut bytes =
                    marshal_multipart(Protocol::Icmpv4, true, &self.data, &self.extensions)?;
                bytes[0] = pointer;
                Ok(bytes)
            }
            Protocol::Icmpv6 => {
                if !self.extensions.is_empty() {
                    return Err(Error::InvalidExtension);
                }
                let mut bytes = Vec::with_capacity(FIXED_LEN + self.data.len());
                bytes.extend(self.pointer.to_be_bytes());
                bytes.extend(&self.data);
                Ok(bytes)
            }
        }
    }

    fn parse(typ: Type, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FIXED_LEN {
            return Err(Error::MessageTooShort);
        }

        match typ.protocol() {
            Protocol::Icmpv4 => {
                let (data, extensions) = parse_multipart(typ, bytes)?;
                Ok(ParameterProblem {
                    pointer: bytes[0] as u32,
                    data,
                    extensions,
                })
            }
            Protocol::Icmpv6 => Ok(ParameterProblem {
                pointer: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                data: bytes[FIXED_LEN..].to_vec(),
                extensions: Vec::new(),
            }),
        }
    }
}

/// An extended echo request body (RFC 8335).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtendedEchoRequest {
    pub id: u16,
    pub seq: u8,
    /// The probed interface resides on the node receiving the request.
    pub local: bool,
    pub extensions: Vec<Extension>,
}

/// An extended echo reply body (RFC 8335).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtendedEchoReply {
    pub id: u16,
    pub seq: u8,
    /// Neighbor reachability state (3 bits).
    pub state: u8,
    /// The probed interface is active.
    pub active: bool,
    /// The probed interface runs IPv4.
    pub ipv4: bool,
    /// The probed interface runs IPv6.
    pub ipv6: bool,
}

/// The body of a message type with no dedicated variant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawBody {
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmp::extension::{InterfaceIdent, MplsLabel, MplsLabelStack, RawExtension};

    fn mpls() -> Extension {
        Extension::MplsLabelStack(MplsLabelStack {
            labels: vec![MplsLabel {
                label: 16014,
                tc: 0x4,
                s: true,
                ttl: 255,
            }],
        })
    }

    fn round_trip(typ: Type, body: MessageBody) {
        let bytes = body.marshal(typ).unwrap();
        assert_eq!(bytes.len(), body.len(typ.protocol()));
        assert_eq!(MessageBody::parse(typ, &bytes).unwrap(), body);
    }

    #[test]
    fn parameter_problem_pointer_v4() {
        let typ = Type::V4(Icmpv4Type::PARAMETER_PROBLEM);
        let bytes = [0x05, 0x00, 0x00, 0x00, 0x45, 0x00, 0x00, 0x14];
        let body = MessageBody::parse(typ, &bytes).unwrap();
        let MessageBody::ParameterProblem(p) = &body else {
            panic!("unexpected body {body:?}");
        };
        assert_eq!(p.pointer, 5);
        assert_eq!(p.data, [0x45, 0x00, 0x00, 0x14]);
        assert!(p.extensions.is_empty());
        assert_eq!(body.marshal(typ).unwrap(), bytes);
    }

    #[test]
    fn parameter_problem_pointer_v6() {
        let typ = Type::V6(Icmpv6Type::PARAMETER_PROBLEM);
        let bytes = [0x00, 0x00, 0x00, 0x05, 0x60, 0x00, 0x00, 0x00];
        let body = MessageBody::parse(typ, &bytes).unwrap();
        let MessageBody::ParameterProblem(p) = &body else {
            panic!("unexpected body {body:?}");
        };
        assert_eq!(p.pointer, 5);
        assert_eq!(p.data, [0x60, 0x00, 0x00, 0x00]);
        assert_eq!(body.marshal(typ).unwrap(), bytes);
    }

    #[test]
    fn parameter_problem_v6_data_is_opaque() {
        let v4 = Type::V4(Icmpv4Type::PARAMETER_PROBLEM);
        let bytes = MessageBody::ParameterProblem(ParameterProblem {
            pointer: 0,
            data: vec![0x60; 8],
            extensions: vec![mpls()],
        })
        .marshal(v4)
        .unwrap();

        let v6 = Type::V6(Icmpv6Type::PARAMETER_PROBLEM);
        let MessageBody::ParameterProblem(p) = MessageBody::parse(v6, &bytes).unwrap() else {
            panic!("expected a parameter problem body");
        };
        assert!(p.extensions.is_empty());
        assert_eq!(p.data, &bytes[4..]);
    }

    #[test]
    fn parameter_problem_rejects() {
        let body = MessageBody::ParameterProblem(ParameterProblem {
            pointer: 256,
            ..Default::default()
        });
        assert!(matches!(
            body.marshal(Type::V4(Icmpv4Type::PARAMETER_PROBLEM)),
            Err(Error::InvalidMessage(_))
        ));

        let body = MessageBody::ParameterProblem(ParameterProblem {
            pointer: 40,
            data: vec![0x45; 128],
            extensions: vec![mpls()],
        });
        assert_eq!(
            body.marshal(Type::V6(Icmpv6Type::PARAMETER_PROBLEM)),
            Err(Error::InvalidExtension)
        );
        round_trip(Type::V4(Icmpv4Type::PARAMETER_PROBLEM), body);
    }

    #[test]
    fn multipart_bodies_round_trip() {
        let data = vec![0x45; 28];
        round_trip(
            Type::V4(Icmpv4Type::TIME_EXCEEDED),
            MessageBody::TimeExceeded(TimeExceeded {
                data: [data.clone(), vec![0; 100]].concat(),
                extensions: vec![mpls()],
            }),
        );
        round_trip(
            Type::V6(Icmpv6Type::DESTINATION_UNREACHABLE),
            MessageBody::DestinationUnreachable(DestinationUnreachable {
                data: [data.clone(), vec![0; 100]].concat(),
                extensions: vec![Extension::Raw(RawExtension {
                    class: 0x80,
                    ctype: 1,
                    data: vec![1, 2, 3, 4],
                })],
            }),
        );
        round_trip(
            Type::V4(Icmpv4Type::DESTINATION_UNREACHABLE),
            MessageBody::DestinationUnreachable(DestinationUnreachable {
                data,
                extensions: Vec::new(),
            }),
        );
    }

    #[test]
    fn incompatible_extensions_fail() {
        let ident = Extension::InterfaceIdent(InterfaceIdent::Index(3));
        let body = MessageBody::TimeExceeded(TimeExceeded {
            data: vec![0; 8],
            extensions: vec![ident.clone()],
        });
        assert_eq!(
            body.marshal(Type::V4(Icmpv4Type::TIME_EXCEEDED)),
            Err(Error::InvalidExtension)
        );

        let body = MessageBody::ExtendedEchoRequest(ExtendedEchoRequest {
            id: 1,
            seq: 2,
            local: true,
            extensions: vec![ident, mpls()],
        });
        assert_eq!(
            body.marshal(Type::V4(Icmpv4Type::EXTENDED_ECHO_REQUEST)),
            Err(Error::InvalidExtension)
        );
    }

    #[test]
    fn raw_extensions_shadowing_typed_objects_fail() {
        for (class, ctype) in [(1, 1), (2, 0)] {
            let body = MessageBody::TimeExceeded(TimeExceeded {
                data: vec![0; 8],
                extensions: vec![Extension::Raw(RawExtension {
                    class,
                    ctype,
                    data: vec![1, 2, 3],
                })],
            });
            assert_eq!(
                body.marshal(Type::V4(Icmpv4Type::TIME_EXCEEDED)),
                Err(Error::InvalidExtension)
            );
        }

        let body = MessageBody::ExtendedEchoRequest(ExtendedEchoRequest {
            id: 1,
            seq: 2,
            local: false,
            extensions: vec![Extension::Raw(RawExtension {
                class: 3,
                ctype: 2,
                data: vec![0, 0, 0, 7],
            })],
        });
        assert_eq!(
            body.marshal(Type::V6(Icmpv6Type::EXTENDED_ECHO_REQUEST)),
            Err(Error::InvalidExtension)
        );
    }

    #[test]
    fn extended_echo_round_trip() {
        round_trip(
            Type::V6(Icmpv6Type::EXTENDED_ECHO_REQUEST),
            MessageBody::ExtendedEchoRequest(ExtendedEchoRequest {
                id: 0xBEEF,
                seq: 7,
                local: true,
                extensions: vec![Extension::InterfaceIdent(InterfaceIdent::Name(
                    "en0".into(),
                ))],
            }),
        );
        round_trip(
            Type::V4(Icmpv4Type::EXTENDED_ECHO_REQUEST),
            MessageBody::ExtendedEchoRequest(ExtendedEchoRequest {
                id: 1,
                seq: 1,
                local: false,
                extensions: Vec::new(),
            }),
        );
        round_trip(
            Type::V4(Icmpv4Type::EXTENDED_ECHO_REPLY),
            MessageBody::ExtendedEchoReply(ExtendedEchoReply {
                id: 0xBEEF,
                seq: 7,
                state: 3,
                active: true,
                ipv4: true,
                ipv6: false,
            }),
        );
    }

    #[test]
    fn extended_echo_reply_layout() {
        let body = MessageBody::ExtendedEchoReply(ExtendedEchoReply {
            id: 1,
            seq: 2,
            state: 7,
            active: true,
            ipv4: false,
            ipv6: true,
        });
        let typ = Type::V6(Icmpv6Type::EXTENDED_ECHO_REPLY);
        assert_eq!(body.marshal(typ).unwrap(), [0x00, 0x01, 0x02, 0xE5]);

        let body = MessageBody::ExtendedEchoReply(ExtendedEchoReply {
            state: 8,
            ..Default::default()
        });
        assert!(matches!(body.marshal(typ), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn packet_too_big() {
        let body = MessageBody::PacketTooBig(PacketTooBig {
            mtu: 1280,
            data: vec![0x60; 16],
        });
        round_trip(Type::V6(Icmpv6Type::PACKET_TOO_BIG), body.clone());
        assert_eq!(
            body.marshal(Type::V4(Icmpv4Type(2))),
            Err(Error::InvalidProtocol)
        );
    }

    #[test]
    fn short_bodies() {
        for typ in [
            Type::V4(Icmpv4Type::ECHO),
            Type::V4(Icmpv4Type::DESTINATION_UNREACHABLE),
            Type::V4(Icmpv4Type::PARAMETER_PROBLEM),
            Type::V6(Icmpv6Type::PACKET_TOO_BIG),
            Type::V6(Icmpv6Type::TIME_EXCEEDED),
            Type::V6(Icmpv6Type::PARAMETER_PROBLEM),
            Type::V6(Icmpv6Type::EXTENDED_ECHO_REQUEST),
            Type::V6(Icmpv6Type::EXTENDED_ECHO_REPLY),
        ] {
            assert_eq!(MessageBody::parse(typ, &[0, 0, 0]), Err(Error::MessageTooShort));
        }
        assert_eq!(
            MessageBody::parse(Type::V4(Icmpv4Type::TIMESTAMP), &[1, 2, 3]),
            Ok(MessageBody::Raw(RawBody {
                data: vec![1, 2, 3]
            }))
        );
    }
}
