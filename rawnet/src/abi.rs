// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Kernel structure serializers.
//!
//! Every structure exchanged with the kernel through socket options or ancillary data is laid out
//! field by field at explicit offsets. The layout rules that differ between kernels (address
//! family numbering, the BSD `sa_len` byte, `sockaddr_storage` alignment, ICMPv6 filter polarity
//! and so on) are expressed as small queries on the [`Abi`] trait, and the provided methods of the
//! trait build the actual structures from them. A platform that lacks a structure altogether
//! answers `None` to the matching query, and encoding it fails with
//! [`Error::OptionNotImplemented`].
//!
//! Integer fields that the kernel reads in host byte order are written in the byte order of the
//! running host.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rawnet_common::Buffer;

use crate::error::{Error, Result};
use crate::platform::{Family, PointerWidth};

/// `AF_INET` on every supported platform.
pub const AF_INET: u16 = 2;
/// The length of `struct sockaddr_in`.
pub const SOCKADDR_IN_LEN: usize = 16;
/// The length of `struct sockaddr_in6`.
pub const SOCKADDR_IN6_LEN: usize = 28;
/// The length of `struct sockaddr_storage`.
pub const SOCKADDR_STORAGE_LEN: usize = 128;
/// The length of `struct ipv6_mreq`.
pub const IPV6_MREQ_LEN: usize = 20;
/// The length of `struct ip_mreq`.
pub const IP_MREQ_LEN: usize = 8;
/// The length of `struct ip_mreqn`.
pub const IP_MREQN_LEN: usize = 12;
/// The length of `struct in6_pktinfo`.
pub const IN6_PKTINFO_LEN: usize = 20;
/// The length of `struct in_pktinfo`.
pub const IN_PKTINFO_LEN: usize = 12;
/// The length of `struct ip6_mtuinfo`.
pub const IP6_MTUINFO_LEN: usize = 32;
/// The length of `struct icmp6_filter`.
pub const ICMP6_FILTER_LEN: usize = 32;
/// The length of the Linux ICMPv4 filter mask.
pub const ICMP_FILTER_LEN: usize = 4;
/// The length of `struct sock_filter`.
pub const BPF_INSTRUCTION_LEN: usize = 8;

/// The largest structure any serializer produces (`struct group_source_req` on LP64).
pub const MAX_STRUCT_LEN: usize = 4 + 4 + 2 * SOCKADDR_STORAGE_LEN;

/// A serialized kernel structure.
pub type StructBuf = Buffer<u8, MAX_STRUCT_LEN>;

#[inline]
fn align_up(len: usize, align: usize) -> usize {
    (len + align - 1) / align * align
}

#[inline]
fn too_short(what: &'static str) -> Error {
    Error::InvalidOptionValue(what)
}

#[inline]
fn ne_u16(bytes: &[u8], off: usize) -> u16 {
    u16::from_ne_bytes([bytes[off], bytes[off + 1]])
}

#[inline]
fn ne_u32(bytes: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

#[inline]
fn ipv4_at(bytes: &[u8], off: usize) -> Ipv4Addr {
    Ipv4Addr::new(bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3])
}

#[inline]
fn ipv6_at(bytes: &[u8], off: usize) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&bytes[off..off + 16]);
    Ipv6Addr::from(octets)
}

/// A request to join or leave an any-source multicast group (`struct group_req`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupRequest {
    pub if_index: u32,
    pub group: IpAddr,
}

/// A request to join, leave, block or unblock a source-specific multicast group
/// (`struct group_source_req`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupSourceRequest {
    pub if_index: u32,
    pub group: IpAddr,
    pub source: IpAddr,
}

/// A legacy multicast membership request (`struct ip_mreq` or `struct ipv6_mreq`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MulticastRequest {
    pub group: IpAddr,
    pub if_index: u32,
}

/// Packet information (`struct in_pktinfo` or `struct in6_pktinfo`).
///
/// On send, `addr` selects the source address; on receive it holds the destination address of
/// the datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PacketInfo {
    pub addr: IpAddr,
    pub if_index: u32,
}

/// Path MTU information (`struct ip6_mtuinfo`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MtuInfo {
    /// The destination the path MTU applies to.
    pub addr: Ipv6Addr,
    pub scope_id: u32,
    pub mtu: u32,
}

/// A classic BPF instruction (`struct sock_filter`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BpfInstruction {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl BpfInstruction {
    #[inline]
    pub const fn new(code: u16, jt: u8, jf: u8, k: u32) -> Self {
        BpfInstruction { code, jt, jf, k }
    }

    /// Serializes a program into the contiguous array of instructions the kernel expects.
    pub fn program_bytes(program: &[BpfInstruction]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(program.len() * BPF_INSTRUCTION_LEN);
        for ins in program {
            bytes.extend(ins.code.to_ne_bytes());
            bytes.push(ins.jt);
            bytes.push(ins.jf);
            bytes.extend(ins.k.to_ne_bytes());
        }
        bytes
    }
}

/// A filter program descriptor (`struct sock_fprog`).
///
/// `filter` is the address of an instruction array that must remain valid for the duration of
/// the option call it is passed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SockFprog {
    pub len: u16,
    pub filter: usize,
}

/// A portable set of ICMP message types to deliver to or withhold from a raw socket.
///
/// The kernels disagree on the meaning of a set bit: Linux treats it as "block" while the BSDs
/// treat it as "pass". The set is stored as blocked types and converted on encode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IcmpFilter {
    blocked: [u32; 8],
}

impl IcmpFilter {
    /// Creates a filter that accepts every message type.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers messages of type `typ`.
    #[inline]
    pub fn accept(&mut self, typ: u8) {
        self.blocked[(typ >> 5) as usize] &= !(1 << (typ & 31));
    }

    /// Withholds messages of type `typ`.
    #[inline]
    pub fn block(&mut self, typ: u8) {
        self.blocked[(typ >> 5) as usize] |= 1 << (typ & 31);
    }

    /// Reports whether messages of type `typ` are withheld.
    #[inline]
    pub fn will_block(&self, typ: u8) -> bool {
        self.blocked[(typ >> 5) as usize] & (1 << (typ & 31)) != 0
    }

    /// Blocks (`true`) or accepts (`false`) every message type.
    #[inline]
    pub fn set_all(&mut self, block: bool) {
        self.blocked = if block { [u32::MAX; 8] } else { [0; 8] };
    }
}

/// What a set bit in a native ICMP filter means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterPolarity {
    /// A set bit blocks the type (Linux).
    Block,
    /// A set bit passes the type (BSD).
    Pass,
}

/// How an IPv4 multicast interface is selected by index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ipv4InterfaceLayout {
    /// A `struct ip_mreqn` with only the interface index set (Linux, FreeBSD).
    Mreqn,
    /// A bare host-order interface index (Darwin `IP_MULTICAST_IFINDEX`).
    Index,
    /// An interface index in network byte order, i.e. the address `0.0.0.<index>` (Windows).
    IndexAsAddress,
}

/// The per-platform layout rules of kernel structures.
pub trait Abi: fmt::Debug + Send + Sync {
    /// A short name for the layout, used in log messages.
    fn name(&self) -> &'static str;

    /// The native value of `AF_INET6`.
    fn af_inet6(&self) -> u16;

    /// Whether socket addresses begin with a one-byte length field (BSD).
    fn has_sa_len(&self) -> bool {
        false
    }

    /// The alignment of `struct sockaddr_storage` within `struct group_req`, or `None` if the
    /// platform has no protocol-independent multicast requests.
    fn storage_align(&self) -> Option<usize> {
        None
    }

    /// The polarity of native ICMP filters for `family`, or `None` if there is none.
    fn icmp_filter_polarity(&self, _family: Family) -> Option<FilterPolarity> {
        None
    }

    /// Whether `struct in_pktinfo` exists.
    fn has_in_pktinfo(&self) -> bool {
        false
    }

    /// Whether `struct in6_pktinfo` and `struct ip6_mtuinfo` exist.
    fn has_ipv6_info(&self) -> bool {
        false
    }

    /// Whether IPv4 memberships are requested with `struct ip_mreq`.
    fn has_ip_mreq(&self) -> bool {
        false
    }

    /// Whether IPv6 memberships can be requested with `struct ipv6_mreq`.
    fn has_ipv6_mreq(&self) -> bool {
        false
    }

    /// How the IPv4 multicast interface is selected by index, if at all.
    fn ipv4_interface_layout(&self) -> Option<Ipv4InterfaceLayout> {
        None
    }

    /// The pointer width used by `struct sock_fprog`, or `None` if filter programs cannot be
    /// attached to sockets.
    fn fprog_pointer_width(&self) -> Option<PointerWidth> {
        None
    }

    // =========================================================================
    //                              Socket addresses
    // =========================================================================

    /// The native length of a socket address of `family`.
    fn sockaddr_len(&self, family: Family) -> usize {
        match family {
            Family::Ipv4 => SOCKADDR_IN_LEN,
            Family::Ipv6 => SOCKADDR_IN6_LEN,
        }
    }

    /// Appends a `sockaddr_in` or `sockaddr_in6` holding `addr`.
    fn write_sockaddr(&self, buf: &mut StructBuf, addr: IpAddr, scope_id: u32) {
        let (family, len) = match addr {
            IpAddr::V4(_) => (AF_INET, SOCKADDR_IN_LEN),
            IpAddr::V6(_) => (self.af_inet6(), SOCKADDR_IN6_LEN),
        };

        if self.has_sa_len() {
            buf.append_u8(len as u8);
            buf.append_u8(family as u8);
        } else {
            buf.append_ne_u16(family);
        }
        buf.append_be_u16(0); // port

        match addr {
            IpAddr::V4(addr) => {
                buf.append(&addr.octets());
                buf.append_zeros(8);
            }
            IpAddr::V6(addr) => {
                buf.append_be_u32(0); // flow info
                buf.append(&addr.octets());
                buf.append_ne_u32(scope_id);
            }
        }
    }

    /// Reads a `sockaddr_in` or `sockaddr_in6`, returning the address and scope identifier.
    fn read_sockaddr(&self, bytes: &[u8]) -> Result<(IpAddr, u32)> {
        if bytes.len() < 2 {
            return Err(too_short("socket address too short"));
        }

        let family = if self.has_sa_len() {
            bytes[1] as u16
        } else {
            ne_u16(bytes, 0)
        };

        if family == AF_INET {
            if bytes.len() < SOCKADDR_IN_LEN {
                return Err(too_short("sockaddr_in too short"));
            }
            Ok((IpAddr::V4(ipv4_at(bytes, 4)), 0))
        } else if family == self.af_inet6() {
            if bytes.len() < SOCKADDR_IN6_LEN {
                return Err(too_short("sockaddr_in6 too short"));
            }
            Ok((IpAddr::V6(ipv6_at(bytes, 8)), ne_u32(bytes, 24)))
        } else {
            Err(Error::InvalidOptionValue("unsupported address family"))
        }
    }

    // =========================================================================
    //                          Multicast group requests
    // =========================================================================

    /// The length of `struct group_req`.
    fn group_req_len(&self) -> Option<usize> {
        self.storage_align()
            .map(|align| align_up(4, align) + SOCKADDR_STORAGE_LEN)
    }

    /// The length of `struct group_source_req`.
    fn group_source_req_len(&self) -> Option<usize> {
        self.group_req_len().map(|len| len + SOCKADDR_STORAGE_LEN)
    }

    fn encode_group_req(&self, req: &GroupRequest) -> Result<StructBuf> {
        let align = self.storage_align().ok_or(Error::OptionNotImplemented)?;
        let mut buf = StructBuf::new();
        buf.append_ne_u32(req.if_index);
        buf.pad_to(align_up(4, align));
        let group_off = buf.len();
        self.write_sockaddr(&mut buf, req.group, 0);
        buf.pad_to(group_off + SOCKADDR_STORAGE_LEN);
        Ok(buf)
    }

    fn decode_group_req(&self, bytes: &[u8]) -> Result<GroupRequest> {
        let align = self.storage_align().ok_or(Error::OptionNotImplemented)?;
        let group_off = align_up(4, align);
        if bytes.len() < group_off + SOCKADDR_STORAGE_LEN {
            return Err(too_short("group_req too short"));
        }
        let (group, _) = self.read_sockaddr(&bytes[group_off..])?;
        Ok(GroupRequest {
            if_index: ne_u32(bytes, 0),
            group,
        })
    }

    fn encode_group_source_req(&self, req: &GroupSourceRequest) -> Result<StructBuf> {
        let align = self.storage_align().ok_or(Error::OptionNotImplemented)?;
        let mut buf = StructBuf::new();
        buf.append_ne_u32(req.if_index);
        buf.pad_to(align_up(4, align));
        let group_off = buf.len();
        self.write_sockaddr(&mut buf, req.group, 0);
        buf.pad_to(group_off + SOCKADDR_STORAGE_LEN);
        self.write_sockaddr(&mut buf, req.source, 0);
        buf.pad_to(group_off + 2 * SOCKADDR_STORAGE_LEN);
        Ok(buf)
    }

    fn decode_group_source_req(&self, bytes: &[u8]) -> Result<GroupSourceRequest> {
        let align = self.storage_align().ok_or(Error::OptionNotImplemented)?;
        let group_off = align_up(4, align);
        let source_off = group_off + SOCKADDR_STORAGE_LEN;
        if bytes.len() < source_off + SOCKADDR_STORAGE_LEN {
            return Err(too_short("group_source_req too short"));
        }
        let (group, _) = self.read_sockaddr(&bytes[group_off..])?;
        let (source, _) = self.read_sockaddr(&bytes[source_off..])?;
        Ok(GroupSourceRequest {
            if_index: ne_u32(bytes, 0),
            group,
            source,
        })
    }

    /// The length of `struct ip_mreq` or `struct ipv6_mreq`.
    fn mreq_len(&self, family: Family) -> Option<usize> {
        match family {
            Family::Ipv4 if self.has_ip_mreq() => Some(IP_MREQ_LEN),
            Family::Ipv6 if self.has_ipv6_mreq() => Some(IPV6_MREQ_LEN),
            _ => None,
        }
    }

    fn encode_mreq(&self, req: &MulticastRequest) -> Result<StructBuf> {
        let mut buf = StructBuf::new();
        match req.group {
            IpAddr::V4(group) if self.has_ip_mreq() => {
                buf.append(&group.octets());
                buf.append_be_u32(req.if_index);
            }
            IpAddr::V6(group) if self.has_ipv6_mreq() => {
                buf.append(&group.octets());
                buf.append_ne_u32(req.if_index);
            }
            _ => return Err(Error::OptionNotImplemented),
        }
        Ok(buf)
    }

    fn decode_mreq(&self, family: Family, bytes: &[u8]) -> Result<MulticastRequest> {
        let len = self.mreq_len(family).ok_or(Error::OptionNotImplemented)?;
        if bytes.len() < len {
            return Err(too_short("multicast request too short"));
        }
        Ok(match family {
            Family::Ipv4 => MulticastRequest {
                group: IpAddr::V4(ipv4_at(bytes, 0)),
                if_index: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            },
            Family::Ipv6 => MulticastRequest {
                group: IpAddr::V6(ipv6_at(bytes, 0)),
                if_index: ne_u32(bytes, 16),
            },
        })
    }

    // =========================================================================
    //                          Interface selection
    // =========================================================================

    /// The length of a multicast interface selector for `family`.
    fn interface_index_len(&self, family: Family) -> Option<usize> {
        match family {
            Family::Ipv4 => self.ipv4_interface_layout().map(|layout| match layout {
                Ipv4InterfaceLayout::Mreqn => IP_MREQN_LEN,
                Ipv4InterfaceLayout::Index | Ipv4InterfaceLayout::IndexAsAddress => 4,
            }),
            Family::Ipv6 => Some(4),
        }
    }

    fn encode_interface_index(&self, family: Family, if_index: u32) -> Result<StructBuf> {
        let mut buf = StructBuf::new();
        match family {
            Family::Ipv4 => match self.ipv4_interface_layout() {
                Some(Ipv4InterfaceLayout::Mreqn) => {
                    buf.append_zeros(8);
                    buf.append_ne_u32(if_index);
                }
                Some(Ipv4InterfaceLayout::Index) => buf.append_ne_u32(if_index),
                Some(Ipv4InterfaceLayout::IndexAsAddress) => buf.append_be_u32(if_index),
                None => return Err(Error::OptionNotImplemented),
            },
            Family::Ipv6 => buf.append_ne_u32(if_index),
        }
        Ok(buf)
    }

    fn decode_interface_index(&self, family: Family, bytes: &[u8]) -> Result<u32> {
        let len = self
            .interface_index_len(family)
            .ok_or(Error::OptionNotImplemented)?;
        if bytes.len() < len {
            return Err(too_short("interface selector too short"));
        }
        Ok(match (family, self.ipv4_interface_layout()) {
            (Family::Ipv4, Some(Ipv4InterfaceLayout::Mreqn)) => ne_u32(bytes, 8),
            (Family::Ipv4, Some(Ipv4InterfaceLayout::IndexAsAddress)) => {
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            _ => ne_u32(bytes, 0),
        })
    }

    // =========================================================================
    //                          Packet and path information
    // =========================================================================

    /// The length of `struct in_pktinfo` or `struct in6_pktinfo`.
    fn pktinfo_len(&self, family: Family) -> Option<usize> {
        match family {
            Family::Ipv4 if self.has_in_pktinfo() => Some(IN_PKTINFO_LEN),
            Family::Ipv6 if self.has_ipv6_info() => Some(IN6_PKTINFO_LEN),
            _ => None,
        }
    }

    fn encode_pktinfo(&self, info: &PacketInfo) -> Result<StructBuf> {
        let mut buf = StructBuf::new();
        match info.addr {
            IpAddr::V4(addr) if self.has_in_pktinfo() => {
                // ipi_spec_dst selects the source on send, ipi_addr reports the destination on
                // receive.
                buf.append_ne_u32(info.if_index);
                buf.append(&addr.octets());
                buf.append(&addr.octets());
            }
            IpAddr::V6(addr) if self.has_ipv6_info() => {
                buf.append(&addr.octets());
                buf.append_ne_u32(info.if_index);
            }
            _ => return Err(Error::OptionNotImplemented),
        }
        Ok(buf)
    }

    fn decode_pktinfo(&self, family: Family, bytes: &[u8]) -> Result<PacketInfo> {
        let len = self.pktinfo_len(family).ok_or(Error::OptionNotImplemented)?;
        if bytes.len() < len {
            return Err(too_short("packet info too short"));
        }
        Ok(match family {
            Family::Ipv4 => PacketInfo {
                addr: IpAddr::V4(ipv4_at(bytes, 8)),
                if_index: ne_u32(bytes, 0),
            },
            Family::Ipv6 => PacketInfo {
                addr: IpAddr::V6(ipv6_at(bytes, 0)),
                if_index: ne_u32(bytes, 16),
            },
        })
    }

    /// The length of `struct ip6_mtuinfo`.
    fn mtuinfo_len(&self) -> Option<usize> {
        self.has_ipv6_info().then_some(IP6_MTUINFO_LEN)
    }

    fn encode_mtuinfo(&self, info: &MtuInfo) -> Result<StructBuf> {
        if !self.has_ipv6_info() {
            return Err(Error::OptionNotImplemented);
        }
        let mut buf = StructBuf::new();
        self.write_sockaddr(&mut buf, IpAddr::V6(info.addr), info.scope_id);
        buf.append_ne_u32(info.mtu);
        Ok(buf)
    }

    fn decode_mtuinfo(&self, bytes: &[u8]) -> Result<MtuInfo> {
        let len = self.mtuinfo_len().ok_or(Error::OptionNotImplemented)?;
        if bytes.len() < len {
            return Err(too_short("ip6_mtuinfo too short"));
        }
        match self.read_sockaddr(bytes)? {
            (IpAddr::V6(addr), scope_id) => Ok(MtuInfo {
                addr,
                scope_id,
                mtu: ne_u32(bytes, SOCKADDR_IN6_LEN),
            }),
            (IpAddr::V4(_), _) => Err(Error::InvalidOptionValue("ip6_mtuinfo holds an IPv4 address")),
        }
    }

    // =========================================================================
    //                              Filters
    // =========================================================================

    /// The length of the native ICMP filter for `family`.
    fn icmp_filter_len(&self, family: Family) -> Option<usize> {
        self.icmp_filter_polarity(family).map(|_| match family {
            Family::Ipv4 => ICMP_FILTER_LEN,
            Family::Ipv6 => ICMP6_FILTER_LEN,
        })
    }

    fn encode_icmp_filter(&self, family: Family, filter: &IcmpFilter) -> Result<StructBuf> {
        let polarity = self
            .icmp_filter_polarity(family)
            .ok_or(Error::OptionNotImplemented)?;
        let words = match family {
            Family::Ipv4 => &filter.blocked[..1],
            Family::Ipv6 => &filter.blocked[..],
        };

        let mut buf = StructBuf::new();
        for &word in words {
            buf.append_ne_u32(match polarity {
                FilterPolarity::Block => word,
                FilterPolarity::Pass => !word,
            });
        }
        Ok(buf)
    }

    fn decode_icmp_filter(&self, family: Family, bytes: &[u8]) -> Result<IcmpFilter> {
        let polarity = self
            .icmp_filter_polarity(family)
            .ok_or(Error::OptionNotImplemented)?;
        let words = match family {
            Family::Ipv4 => 1,
            Family::Ipv6 => 8,
        };
        if bytes.len() < 4 * words {
            return Err(too_short("ICMP filter too short"));
        }

        let mut filter = IcmpFilter::new();
        for (i, word) in filter.blocked.iter_mut().take(words).enumerate() {
            let native = ne_u32(bytes, 4 * i);
            *word = match polarity {
                FilterPolarity::Block => native,
                FilterPolarity::Pass => !native,
            };
        }
        Ok(filter)
    }

    /// The length of `struct sock_fprog`.
    fn sock_fprog_len(&self) -> Option<usize> {
        self.fprog_pointer_width().map(|width| 2 * width.bytes())
    }

    fn encode_sock_fprog(&self, prog: &SockFprog) -> Result<StructBuf> {
        let width = self
            .fprog_pointer_width()
            .ok_or(Error::OptionNotImplemented)?;
        let mut buf = StructBuf::new();
        buf.append_ne_u16(prog.len);
        buf.pad_to(width.bytes());
        match width {
            PointerWidth::Bits32 => {
                let filter = u32::try_from(prog.filter)
                    .map_err(|_| Error::InvalidOptionValue("filter address exceeds 32 bits"))?;
                buf.append_ne_u32(filter);
            }
            PointerWidth::Bits64 => buf.append(&(prog.filter as u64).to_ne_bytes()),
        }
        Ok(buf)
    }

    fn decode_sock_fprog(&self, bytes: &[u8]) -> Result<SockFprog> {
        let width = self
            .fprog_pointer_width()
            .ok_or(Error::OptionNotImplemented)?;
        if bytes.len() < 2 * width.bytes() {
            return Err(too_short("sock_fprog too short"));
        }
        let filter = match width {
            PointerWidth::Bits32 => ne_u32(bytes, 4) as u64,
            PointerWidth::Bits64 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(&bytes[8..16]);
                u64::from_ne_bytes(word)
            }
        };
        Ok(SockFprog {
            len: ne_u16(bytes, 0),
            filter: usize::try_from(filter)
                .map_err(|_| Error::InvalidOptionValue("filter address exceeds host pointer"))?,
        })
    }
}

/// Linux structure layouts.
#[derive(Clone, Copy, Debug)]
pub struct LinuxAbi {
    pub pointer_width: PointerWidth,
}

impl Abi for LinuxAbi {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn af_inet6(&self) -> u16 {
        10
    }

    fn storage_align(&self) -> Option<usize> {
        Some(self.pointer_width.bytes())
    }

    fn icmp_filter_polarity(&self, _family: Family) -> Option<FilterPolarity> {
        Some(FilterPolarity::Block)
    }

    fn has_in_pktinfo(&self) -> bool {
        true
    }

    fn has_ipv6_info(&self) -> bool {
        true
    }

    fn has_ipv6_mreq(&self) -> bool {
        true
    }

    fn ipv4_interface_layout(&self) -> Option<Ipv4InterfaceLayout> {
        Some(Ipv4InterfaceLayout::Mreqn)
    }

    fn fprog_pointer_width(&self) -> Option<PointerWidth> {
        Some(self.pointer_width)
    }
}

/// FreeBSD and Darwin structure layouts.
#[derive(Clone, Copy, Debug)]
pub struct BsdAbi {
    pub name: &'static str,
    pub af_inet6: u16,
    /// Alignment of `sockaddr_storage` in `group_req`; Darwin packs the structure to 4 bytes.
    pub storage_align: usize,
    pub in_pktinfo: bool,
    pub ipv4_interface: Ipv4InterfaceLayout,
}

impl BsdAbi {
    pub fn freebsd(pointer_width: PointerWidth) -> Self {
        BsdAbi {
            name: "freebsd",
            af_inet6: 28,
            storage_align: pointer_width.bytes(),
            in_pktinfo: false,
            ipv4_interface: Ipv4InterfaceLayout::Mreqn,
        }
    }

    pub fn darwin() -> Self {
        BsdAbi {
            name: "darwin",
            af_inet6: 30,
            storage_align: 4,
            in_pktinfo: true,
            ipv4_interface: Ipv4InterfaceLayout::Index,
        }
    }
}

impl Abi for BsdAbi {
    fn name(&self) -> &'static str {
        self.name
    }

    fn af_inet6(&self) -> u16 {
        self.af_inet6
    }

    fn has_sa_len(&self) -> bool {
        true
    }

    fn storage_align(&self) -> Option<usize> {
        Some(self.storage_align)
    }

    fn icmp_filter_polarity(&self, family: Family) -> Option<FilterPolarity> {
        match family {
            Family::Ipv4 => None,
            Family::Ipv6 => Some(FilterPolarity::Pass),
        }
    }

    fn has_in_pktinfo(&self) -> bool {
        self.in_pktinfo
    }

    fn has_ipv6_info(&self) -> bool {
        true
    }

    fn has_ipv6_mreq(&self) -> bool {
        true
    }

    fn ipv4_interface_layout(&self) -> Option<Ipv4InterfaceLayout> {
        Some(self.ipv4_interface)
    }
}

/// Windows structure layouts.
#[derive(Clone, Copy, Debug)]
pub struct WindowsAbi;

impl Abi for WindowsAbi {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn af_inet6(&self) -> u16 {
        23
    }

    fn has_ip_mreq(&self) -> bool {
        true
    }

    fn has_ipv6_mreq(&self) -> bool {
        true
    }

    fn ipv4_interface_layout(&self) -> Option<Ipv4InterfaceLayout> {
        Some(Ipv4InterfaceLayout::IndexAsAddress)
    }
}

/// The layout of a platform with no known kernel structures; every composite structure fails
/// with [`Error::OptionNotImplemented`].
#[derive(Clone, Copy, Debug)]
pub struct UnsupportedAbi;

impl Abi for UnsupportedAbi {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn af_inet6(&self) -> u16 {
        0
    }

    fn sockaddr_len(&self, _family: Family) -> usize {
        0
    }

    fn interface_index_len(&self, _family: Family) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX64: LinuxAbi = LinuxAbi {
        pointer_width: PointerWidth::Bits64,
    };

    fn group() -> IpAddr {
        "ff02::1:3".parse().unwrap()
    }

    #[test]
    fn group_request_sizes() {
        assert_eq!(LINUX64.group_req_len(), Some(136));
        assert_eq!(LINUX64.group_source_req_len(), Some(264));

        let linux32 = LinuxAbi {
            pointer_width: PointerWidth::Bits32,
        };
        assert_eq!(linux32.group_req_len(), Some(132));
        assert_eq!(linux32.group_source_req_len(), Some(260));

        assert_eq!(BsdAbi::darwin().group_req_len(), Some(132));
        assert_eq!(BsdAbi::freebsd(PointerWidth::Bits64).group_req_len(), Some(136));
        assert_eq!(WindowsAbi.group_req_len(), None);
    }

    #[test]
    fn linux_group_req_layout() {
        let req = GroupRequest {
            if_index: 3,
            group: group(),
        };
        let buf = LINUX64.encode_group_req(&req).unwrap();
        let bytes = buf.as_slice();
        assert_eq!(bytes.len(), 136);
        assert_eq!(&bytes[..4], &3u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &[0; 4]);
        assert_eq!(&bytes[8..10], &10u16.to_ne_bytes());
        assert_eq!(&bytes[16..32], &"ff02::1:3".parse::<Ipv6Addr>().unwrap().octets());
        assert!(bytes[36..].iter().all(|&b| b == 0));
        assert_eq!(LINUX64.decode_group_req(bytes).unwrap(), req);
    }

    #[test]
    fn bsd_sockaddr_has_length_byte() {
        let darwin = BsdAbi::darwin();
        let req = GroupSourceRequest {
            if_index: 7,
            group: group(),
            source: "2001:db8::1".parse().unwrap(),
        };
        let buf = darwin.encode_group_source_req(&req).unwrap();
        let bytes = buf.as_slice();
        assert_eq!(bytes.len(), 260);
        assert_eq!(&bytes[4..6], &[28, 30]);
        assert_eq!(&bytes[132..134], &[28, 30]);
        assert_eq!(darwin.decode_group_source_req(bytes).unwrap(), req);

        let freebsd = BsdAbi::freebsd(PointerWidth::Bits64);
        let v4 = GroupRequest {
            if_index: 1,
            group: Ipv4Addr::new(224, 0, 0, 251).into(),
        };
        let buf = freebsd.encode_group_req(&v4).unwrap();
        assert_eq!(&buf.as_slice()[8..10], &[16, 2]);
        assert_eq!(&buf.as_slice()[12..16], &[224, 0, 0, 251]);
        assert_eq!(freebsd.decode_group_req(buf.as_slice()).unwrap(), v4);
    }

    #[test]
    fn sockaddr_rejects_foreign_family() {
        let mut buf = StructBuf::new();
        BsdAbi::freebsd(PointerWidth::Bits64).write_sockaddr(
            &mut buf,
            group(),
            0,
        );
        assert!(matches!(
            BsdAbi::darwin().read_sockaddr(buf.as_slice()),
            Err(Error::InvalidOptionValue(_))
        ));
        assert!(matches!(
            LINUX64.read_sockaddr(&[10]),
            Err(Error::InvalidOptionValue(_))
        ));
    }

    #[test]
    fn icmp_filter_polarity() {
        let mut filter = IcmpFilter::new();
        filter.set_all(true);
        filter.accept(129);
        assert!(filter.will_block(128));
        assert!(!filter.will_block(129));

        let linux = LINUX64.encode_icmp_filter(Family::Ipv6, &filter).unwrap();
        let bsd = BsdAbi::freebsd(PointerWidth::Bits64)
            .encode_icmp_filter(Family::Ipv6, &filter)
            .unwrap();
        assert_eq!(linux.len(), ICMP6_FILTER_LEN);
        // type 129 lives in word 4, bit 1
        assert_eq!(&linux.as_slice()[16..20], &(!0b10u32).to_ne_bytes());
        assert_eq!(&bsd.as_slice()[16..20], &0b10u32.to_ne_bytes());

        assert_eq!(
            LINUX64.decode_icmp_filter(Family::Ipv6, linux.as_slice()).unwrap(),
            filter
        );
        assert_eq!(
            BsdAbi::darwin()
                .decode_icmp_filter(Family::Ipv6, bsd.as_slice())
                .unwrap(),
            filter
        );
        assert!(matches!(
            WindowsAbi.encode_icmp_filter(Family::Ipv6, &filter),
            Err(Error::OptionNotImplemented)
        ));
    }

    #[test]
    fn icmpv4_filter_is_linux_only() {
        let mut filter = IcmpFilter::new();
        filter.block(8);
        let buf = LINUX64.encode_icmp_filter(Family::Ipv4, &filter).unwrap();
        assert_eq!(buf.as_slice(), &(1u32 << 8).to_ne_bytes());
        assert!(matches!(
            BsdAbi::darwin().encode_icmp_filter(Family::Ipv4, &filter),
            Err(Error::OptionNotImplemented)
        ));
    }

    #[test]
    fn packet_info_layouts() {
        let info = PacketInfo {
            addr: "fe80::2".parse().unwrap(),
            if_index: 4,
        };
        let buf = LINUX64.encode_pktinfo(&info).unwrap();
        assert_eq!(buf.len(), IN6_PKTINFO_LEN);
        assert_eq!(LINUX64.decode_pktinfo(Family::Ipv6, buf.as_slice()).unwrap(), info);

        let info = PacketInfo {
            addr: Ipv4Addr::new(192, 0, 2, 1).into(),
            if_index: 2,
        };
        let buf = LINUX64.encode_pktinfo(&info).unwrap();
        assert_eq!(buf.len(), IN_PKTINFO_LEN);
        assert_eq!(&buf.as_slice()[4..8], &[192, 0, 2, 1]);
        assert_eq!(LINUX64.decode_pktinfo(Family::Ipv4, buf.as_slice()).unwrap(), info);

        assert!(matches!(
            BsdAbi::freebsd(PointerWidth::Bits64).encode_pktinfo(&info),
            Err(Error::OptionNotImplemented)
        ));
    }

    #[test]
    fn mtu_info_layout() {
        let info = MtuInfo {
            addr: "2001:db8::9".parse().unwrap(),
            scope_id: 0,
            mtu: 1400,
        };
        let darwin = BsdAbi::darwin();
        let buf = darwin.encode_mtuinfo(&info).unwrap();
        assert_eq!(buf.len(), IP6_MTUINFO_LEN);
        assert_eq!(&buf.as_slice()[28..], &1400u32.to_ne_bytes());
        assert_eq!(darwin.decode_mtuinfo(buf.as_slice()).unwrap(), info);
        assert!(matches!(
            darwin.decode_mtuinfo(&buf.as_slice()[..31]),
            Err(Error::InvalidOptionValue(_))
        ));
    }

    #[test]
    fn windows_multicast_requests() {
        let req = MulticastRequest {
            group: Ipv4Addr::new(239, 1, 2, 3).into(),
            if_index: 5,
        };
        let buf = WindowsAbi.encode_mreq(&req).unwrap();
        assert_eq!(buf.as_slice(), &[239, 1, 2, 3, 0, 0, 0, 5]);
        assert_eq!(WindowsAbi.decode_mreq(Family::Ipv4, buf.as_slice()).unwrap(), req);

        let req = MulticastRequest {
            group: group(),
            if_index: 5,
        };
        let buf = WindowsAbi.encode_mreq(&req).unwrap();
        assert_eq!(buf.len(), IPV6_MREQ_LEN);
        assert_eq!(WindowsAbi.decode_mreq(Family::Ipv6, buf.as_slice()).unwrap(), req);
    }

    #[test]
    fn sock_fprog_layout() {
        let program = [
            BpfInstruction::new(0x28, 0, 0, 0x0000000c),
            BpfInstruction::new(0x06, 0, 0, 0x00040000),
        ];
        let instructions = BpfInstruction::program_bytes(&program);
        assert_eq!(instructions.len(), 16);
        assert_eq!(&instructions[..2], &0x28u16.to_ne_bytes());

        let prog = SockFprog {
            len: 2,
            filter: 0x1000,
        };
        let buf = LINUX64.encode_sock_fprog(&prog).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf.as_slice()[2..8], &[0; 6]);
        assert_eq!(LINUX64.decode_sock_fprog(buf.as_slice()).unwrap(), prog);

        let linux32 = LinuxAbi {
            pointer_width: PointerWidth::Bits32,
        };
        assert_eq!(linux32.sock_fprog_len(), Some(8));
        assert_eq!(
            linux32
                .decode_sock_fprog(linux32.encode_sock_fprog(&prog).unwrap().as_slice())
                .unwrap(),
            prog
        );
        assert_eq!(BsdAbi::darwin().sock_fprog_len(), None);
    }

    #[test]
    fn unsupported_abi_has_no_structures() {
        let req = GroupRequest {
            if_index: 1,
            group: group(),
        };
        assert!(matches!(
            UnsupportedAbi.encode_group_req(&req),
            Err(Error::OptionNotImplemented)
        ));
        assert!(matches!(
            UnsupportedAbi.encode_interface_index(Family::Ipv6, 1),
            Err(Error::OptionNotImplemented)
        ));
    }
}
