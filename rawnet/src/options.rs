// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The socket option registry.
//!
//! Each platform defines, per address family, which [`SocketOption`]s it knows and what native
//! `(level, name)` pair and value layout each one maps to. [`SocketOptions`] binds a table to a
//! [`Transport`] and exposes typed accessors on top of the raw option primitives.

use std::net::IpAddr;

use log::debug;

use crate::abi::{
    Abi, BpfInstruction, GroupRequest, GroupSourceRequest, IcmpFilter, MtuInfo, MulticastRequest,
    PacketInfo, SockFprog, StructBuf, MAX_STRUCT_LEN,
};
use crate::error::{Error, Result};
use crate::platform::{Family, Os, Platform};
use crate::transport::Transport;

pub const IPPROTO_IP: i32 = 0;
pub const IPPROTO_IPV6: i32 = 41;
pub const IPPROTO_ICMPV6: i32 = 58;
pub const IPPROTO_RAW: i32 = 255;
/// `SOL_SOCKET` on Linux.
pub const SOL_SOCKET_LINUX: i32 = 1;

/// A logical socket option, resolved per platform and address family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketOption {
    /// `IP_TOS` or `IPV6_TCLASS`.
    TrafficClass,
    /// `IP_TTL` or `IPV6_UNICAST_HOPS`.
    HopLimit,
    MulticastInterface,
    MulticastHopLimit,
    MulticastLoopback,
    ReceiveTrafficClass,
    ReceiveHopLimit,
    ReceivePacketInfo,
    /// `IP_RECVDSTADDR` (BSD IPv4).
    ReceiveDestinationAddress,
    /// `IP_RECVIF` (BSD IPv4).
    ReceiveInterface,
    ReceivePathMtu,
    /// The current path MTU of a connected socket.
    PathMtu,
    /// The sticky `IPV6_PKTINFO` option.
    PacketInfo,
    /// The offset of the checksum field the kernel fills in (`IPV6_CHECKSUM`).
    Checksum,
    /// `IP_HDRINCL`.
    HeaderIncluded,
    IcmpFilter,
    JoinGroup,
    LeaveGroup,
    JoinSourceGroup,
    LeaveSourceGroup,
    BlockSource,
    UnblockSource,
    /// Attaches a classic BPF program (`SO_ATTACH_FILTER`).
    AttachFilter,
}

/// The value layout of a socket option.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptionKind {
    /// A 4-byte host-order integer.
    Int,
    /// A single byte integer.
    Byte,
    IcmpFilter,
    /// A multicast interface selector.
    InterfaceIndex,
    MulticastRequest,
    GroupRequest,
    GroupSourceRequest,
    MtuInfo,
    PacketInfo,
    FilterProgram,
}

/// A decoded or to-be-encoded socket option value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionValue {
    /// The value of an [`OptionKind::Int`] or [`OptionKind::Byte`] option.
    Int(i32),
    IcmpFilter(IcmpFilter),
    InterfaceIndex(u32),
    MulticastRequest(MulticastRequest),
    GroupRequest(GroupRequest),
    GroupSourceRequest(GroupSourceRequest),
    MtuInfo(MtuInfo),
    PacketInfo(PacketInfo),
    FilterProgram(SockFprog),
}

/// The native form of a socket option on one platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptionDescriptor {
    pub level: i32,
    pub name: i32,
    /// The length of the native value in bytes.
    pub len: usize,
    pub kind: OptionKind,
}

impl OptionDescriptor {
    /// Serializes `value` into the native layout of this option.
    pub fn encode(&self, abi: &dyn Abi, family: Family, value: &OptionValue) -> Result<StructBuf> {
        let mut buf = match (self.kind, value) {
            (OptionKind::Int, OptionValue::Int(v)) => {
                let mut buf = StructBuf::new();
                buf.append(&v.to_ne_bytes());
                buf
            }
            (OptionKind::Byte, OptionValue::Int(v)) => {
                let v = u8::try_from(*v)
                    .map_err(|_| Error::InvalidOptionValue("value out of range for byte option"))?;
                let mut buf = StructBuf::new();
                buf.append_u8(v);
                buf
            }
            (OptionKind::IcmpFilter, OptionValue::IcmpFilter(filter)) => {
                abi.encode_icmp_filter(family, filter)?
            }
            (OptionKind::InterfaceIndex, OptionValue::InterfaceIndex(index)) => {
                abi.encode_interface_index(family, *index)?
            }
            (OptionKind::MulticastRequest, OptionValue::MulticastRequest(req)) => {
                abi.encode_mreq(req)?
            }
            (OptionKind::GroupRequest, OptionValue::GroupRequest(req)) => {
                abi.encode_group_req(req)?
            }
            (OptionKind::GroupSourceRequest, OptionValue::GroupSourceRequest(req)) => {
                abi.encode_group_source_req(req)?
            }
            (OptionKind::MtuInfo, OptionValue::MtuInfo(info)) => abi.encode_mtuinfo(info)?,
            (OptionKind::PacketInfo, OptionValue::PacketInfo(info)) => abi.encode_pktinfo(info)?,
            (OptionKind::FilterProgram, OptionValue::FilterProgram(prog)) => {
                abi.encode_sock_fprog(prog)?
            }
            _ => return Err(Error::InvalidOptionValue("value does not match option kind")),
        };

        if buf.len() > self.len {
            return Err(Error::InvalidOptionValue("encoded value exceeds option length"));
        }
        buf.pad_to(self.len);
        Ok(buf)
    }

    /// Deserializes a native value of this option.
    pub fn decode(&self, abi: &dyn Abi, family: Family, bytes: &[u8]) -> Result<OptionValue> {
        Ok(match self.kind {
            OptionKind::Int => {
                let bytes: [u8; 4] = bytes
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(Error::InvalidOptionValue("integer option too short"))?;
                OptionValue::Int(i32::from_ne_bytes(bytes))
            }
            OptionKind::Byte => match bytes {
                // Some kernels answer a byte option with a full integer
                [b] => OptionValue::Int(*b as i32),
                [a, b, c, d, ..] => OptionValue::Int(i32::from_ne_bytes([*a, *b, *c, *d])),
                _ => return Err(Error::InvalidOptionValue("byte option too short")),
            },
            OptionKind::IcmpFilter => OptionValue::IcmpFilter(abi.decode_icmp_filter(family, bytes)?),
            OptionKind::InterfaceIndex => {
                OptionValue::InterfaceIndex(abi.decode_interface_index(family, bytes)?)
            }
            OptionKind::MulticastRequest => {
                OptionValue::MulticastRequest(abi.decode_mreq(family, bytes)?)
            }
            OptionKind::GroupRequest => OptionValue::GroupRequest(abi.decode_group_req(bytes)?),
            OptionKind::GroupSourceRequest => {
                OptionValue::GroupSourceRequest(abi.decode_group_source_req(bytes)?)
            }
            OptionKind::MtuInfo => OptionValue::MtuInfo(abi.decode_mtuinfo(bytes)?),
            OptionKind::PacketInfo => OptionValue::PacketInfo(abi.decode_pktinfo(family, bytes)?),
            OptionKind::FilterProgram => OptionValue::FilterProgram(abi.decode_sock_fprog(bytes)?),
        })
    }
}

/// The native length of a value of `kind`, or `None` if the ABI has no such structure.
fn kind_len(abi: &dyn Abi, family: Family, kind: OptionKind) -> Option<usize> {
    match kind {
        OptionKind::Int => Some(4),
        OptionKind::Byte => Some(1),
        OptionKind::IcmpFilter => abi.icmp_filter_len(family),
        OptionKind::InterfaceIndex => abi.interface_index_len(family),
        OptionKind::MulticastRequest => abi.mreq_len(family),
        OptionKind::GroupRequest => abi.group_req_len(),
        OptionKind::GroupSourceRequest => abi.group_source_req_len(),
        OptionKind::MtuInfo => abi.mtuinfo_len(),
        OptionKind::PacketInfo => abi.pktinfo_len(family),
        OptionKind::FilterProgram => abi.sock_fprog_len(),
    }
}

type Entry = (SocketOption, i32, i32, OptionKind);

use OptionKind as K;
use SocketOption as O;

const LINUX_IPV4: &[Entry] = &[
    (O::TrafficClass, IPPROTO_IP, 1, K::Int),
    (O::HopLimit, IPPROTO_IP, 2, K::Int),
    (O::HeaderIncluded, IPPROTO_IP, 3, K::Int),
    (O::ReceivePacketInfo, IPPROTO_IP, 8, K::Int),
    (O::ReceiveHopLimit, IPPROTO_IP, 12, K::Int),
    (O::MulticastInterface, IPPROTO_IP, 32, K::InterfaceIndex),
    (O::MulticastHopLimit, IPPROTO_IP, 33, K::Int),
    (O::MulticastLoopback, IPPROTO_IP, 34, K::Int),
    (O::IcmpFilter, IPPROTO_RAW, 1, K::IcmpFilter),
    (O::JoinGroup, IPPROTO_IP, 42, K::GroupRequest),
    (O::BlockSource, IPPROTO_IP, 43, K::GroupSourceRequest),
    (O::UnblockSource, IPPROTO_IP, 44, K::GroupSourceRequest),
    (O::LeaveGroup, IPPROTO_IP, 45, K::GroupRequest),
    (O::JoinSourceGroup, IPPROTO_IP, 46, K::GroupSourceRequest),
    (O::LeaveSourceGroup, IPPROTO_IP, 47, K::GroupSourceRequest),
    (O::AttachFilter, SOL_SOCKET_LINUX, 26, K::FilterProgram),
];

const LINUX_IPV6: &[Entry] = &[
    (O::Checksum, IPPROTO_RAW, 7, K::Int),
    (O::HopLimit, IPPROTO_IPV6, 16, K::Int),
    (O::MulticastInterface, IPPROTO_IPV6, 17, K::InterfaceIndex),
    (O::MulticastHopLimit, IPPROTO_IPV6, 18, K::Int),
    (O::MulticastLoopback, IPPROTO_IPV6, 19, K::Int),
    (O::ReceivePacketInfo, IPPROTO_IPV6, 49, K::Int),
    (O::PacketInfo, IPPROTO_IPV6, 50, K::PacketInfo),
    (O::ReceiveHopLimit, IPPROTO_IPV6, 51, K::Int),
    (O::ReceivePathMtu, IPPROTO_IPV6, 60, K::Int),
    (O::PathMtu, IPPROTO_IPV6, 61, K::MtuInfo),
    (O::ReceiveTrafficClass, IPPROTO_IPV6, 66, K::Int),
    (O::TrafficClass, IPPROTO_IPV6, 67, K::Int),
    (O::IcmpFilter, IPPROTO_ICMPV6, 1, K::IcmpFilter),
    (O::JoinGroup, IPPROTO_IPV6, 42, K::GroupRequest),
    (O::BlockSource, IPPROTO_IPV6, 43, K::GroupSourceRequest),
    (O::UnblockSource, IPPROTO_IPV6, 44, K::GroupSourceRequest),
    (O::LeaveGroup, IPPROTO_IPV6, 45, K::GroupRequest),
    (O::JoinSourceGroup, IPPROTO_IPV6, 46, K::GroupSourceRequest),
    (O::LeaveSourceGroup, IPPROTO_IPV6, 47, K::GroupSourceRequest),
    (O::AttachFilter, SOL_SOCKET_LINUX, 26, K::FilterProgram),
];

const FREEBSD_IPV4: &[Entry] = &[
    (O::HeaderIncluded, IPPROTO_IP, 2, K::Int),
    (O::TrafficClass, IPPROTO_IP, 3, K::Int),
    (O::HopLimit, IPPROTO_IP, 4, K::Int),
    (O::ReceiveDestinationAddress, IPPROTO_IP, 7, K::Int),
    (O::MulticastInterface, IPPROTO_IP, 9, K::InterfaceIndex),
    (O::MulticastHopLimit, IPPROTO_IP, 10, K::Byte),
    (O::MulticastLoopback, IPPROTO_IP, 11, K::Int),
    (O::ReceiveInterface, IPPROTO_IP, 20, K::Int),
    (O::ReceiveHopLimit, IPPROTO_IP, 65, K::Int),
    (O::JoinGroup, IPPROTO_IP, 80, K::GroupRequest),
    (O::LeaveGroup, IPPROTO_IP, 81, K::GroupRequest),
    (O::JoinSourceGroup, IPPROTO_IP, 82, K::GroupSourceRequest),
    (O::LeaveSourceGroup, IPPROTO_IP, 83, K::GroupSourceRequest),
    (O::BlockSource, IPPROTO_IP, 84, K::GroupSourceRequest),
    (O::UnblockSource, IPPROTO_IP, 85, K::GroupSourceRequest),
];

const FREEBSD_IPV6: &[Entry] = &[
    (O::HopLimit, IPPROTO_IPV6, 4, K::Int),
    (O::MulticastInterface, IPPROTO_IPV6, 9, K::InterfaceIndex),
    (O::MulticastHopLimit, IPPROTO_IPV6, 10, K::Int),
    (O::MulticastLoopback, IPPROTO_IPV6, 11, K::Int),
    (O::IcmpFilter, IPPROTO_ICMPV6, 18, K::IcmpFilter),
    (O::Checksum, IPPROTO_IPV6, 26, K::Int),
    (O::ReceivePacketInfo, IPPROTO_IPV6, 36, K::Int),
    (O::ReceiveHopLimit, IPPROTO_IPV6, 37, K::Int),
    (O::ReceivePathMtu, IPPROTO_IPV6, 43, K::Int),
    (O::PathMtu, IPPROTO_IPV6, 44, K::MtuInfo),
    (O::PacketInfo, IPPROTO_IPV6, 46, K::PacketInfo),
    (O::ReceiveTrafficClass, IPPROTO_IPV6, 57, K::Int),
    (O::TrafficClass, IPPROTO_IPV6, 61, K::Int),
    (O::JoinGroup, IPPROTO_IPV6, 80, K::GroupRequest),
    (O::LeaveGroup, IPPROTO_IPV6, 81, K::GroupRequest),
    (O::JoinSourceGroup, IPPROTO_IPV6, 82, K::GroupSourceRequest),
    (O::LeaveSourceGroup, IPPROTO_IPV6, 83, K::GroupSourceRequest),
    (O::BlockSource, IPPROTO_IPV6, 84, K::GroupSourceRequest),
    (O::UnblockSource, IPPROTO_IPV6, 85, K::GroupSourceRequest),
];

const DARWIN_IPV4: &[Entry] = &[
    (O::HeaderIncluded, IPPROTO_IP, 2, K::Int),
    (O::TrafficClass, IPPROTO_IP, 3, K::Int),
    (O::HopLimit, IPPROTO_IP, 4, K::Int),
    (O::ReceiveDestinationAddress, IPPROTO_IP, 7, K::Int),
    (O::MulticastHopLimit, IPPROTO_IP, 10, K::Byte),
    (O::MulticastLoopback, IPPROTO_IP, 11, K::Int),
    (O::ReceiveInterface, IPPROTO_IP, 20, K::Int),
    (O::ReceiveHopLimit, IPPROTO_IP, 24, K::Int),
    (O::ReceivePacketInfo, IPPROTO_IP, 26, K::Int),
    (O::MulticastInterface, IPPROTO_IP, 66, K::InterfaceIndex),
    (O::JoinGroup, IPPROTO_IP, 80, K::GroupRequest),
    (O::LeaveGroup, IPPROTO_IP, 81, K::GroupRequest),
    (O::JoinSourceGroup, IPPROTO_IP, 82, K::GroupSourceRequest),
    (O::LeaveSourceGroup, IPPROTO_IP, 83, K::GroupSourceRequest),
    (O::BlockSource, IPPROTO_IP, 84, K::GroupSourceRequest),
    (O::UnblockSource, IPPROTO_IP, 85, K::GroupSourceRequest),
];

const DARWIN_IPV6: &[Entry] = &[
    (O::HopLimit, IPPROTO_IPV6, 4, K::Int),
    (O::MulticastInterface, IPPROTO_IPV6, 9, K::InterfaceIndex),
    (O::MulticastHopLimit, IPPROTO_IPV6, 10, K::Int),
    (O::MulticastLoopback, IPPROTO_IPV6, 11, K::Int),
    (O::IcmpFilter, IPPROTO_ICMPV6, 18, K::IcmpFilter),
    (O::Checksum, IPPROTO_IPV6, 26, K::Int),
    (O::ReceiveTrafficClass, IPPROTO_IPV6, 35, K::Int),
    (O::TrafficClass, IPPROTO_IPV6, 36, K::Int),
    (O::ReceiveHopLimit, IPPROTO_IPV6, 37, K::Int),
    (O::ReceivePathMtu, IPPROTO_IPV6, 43, K::Int),
    (O::PathMtu, IPPROTO_IPV6, 44, K::MtuInfo),
    (O::PacketInfo, IPPROTO_IPV6, 46, K::PacketInfo),
    (O::ReceivePacketInfo, IPPROTO_IPV6, 61, K::Int),
    (O::JoinGroup, IPPROTO_IPV6, 80, K::GroupRequest),
    (O::LeaveGroup, IPPROTO_IPV6, 81, K::GroupRequest),
    (O::JoinSourceGroup, IPPROTO_IPV6, 82, K::GroupSourceRequest),
    (O::LeaveSourceGroup, IPPROTO_IPV6, 83, K::GroupSourceRequest),
    (O::BlockSource, IPPROTO_IPV6, 84, K::GroupSourceRequest),
    (O::UnblockSource, IPPROTO_IPV6, 85, K::GroupSourceRequest),
];

const WINDOWS_IPV4: &[Entry] = &[
    (O::HeaderIncluded, IPPROTO_IP, 2, K::Int),
    (O::TrafficClass, IPPROTO_IP, 3, K::Int),
    (O::HopLimit, IPPROTO_IP, 4, K::Int),
    (O::MulticastInterface, IPPROTO_IP, 9, K::InterfaceIndex),
    (O::MulticastHopLimit, IPPROTO_IP, 10, K::Int),
    (O::MulticastLoopback, IPPROTO_IP, 11, K::Int),
    (O::JoinGroup, IPPROTO_IP, 12, K::MulticastRequest),
    (O::LeaveGroup, IPPROTO_IP, 13, K::MulticastRequest),
];

const WINDOWS_IPV6: &[Entry] = &[
    (O::HopLimit, IPPROTO_IPV6, 4, K::Int),
    (O::MulticastInterface, IPPROTO_IPV6, 9, K::InterfaceIndex),
    (O::MulticastHopLimit, IPPROTO_IPV6, 10, K::Int),
    (O::MulticastLoopback, IPPROTO_IPV6, 11, K::Int),
    (O::JoinGroup, IPPROTO_IPV6, 12, K::MulticastRequest),
    (O::LeaveGroup, IPPROTO_IPV6, 13, K::MulticastRequest),
];

fn entries(os: Os, family: Family) -> &'static [Entry] {
    match (os, family) {
        (Os::Linux, Family::Ipv4) => LINUX_IPV4,
        (Os::Linux, Family::Ipv6) => LINUX_IPV6,
        (Os::FreeBsd, Family::Ipv4) => FREEBSD_IPV4,
        (Os::FreeBsd, Family::Ipv6) => FREEBSD_IPV6,
        (Os::Darwin, Family::Ipv4) => DARWIN_IPV4,
        (Os::Darwin, Family::Ipv6) => DARWIN_IPV6,
        (Os::Windows, Family::Ipv4) => WINDOWS_IPV4,
        (Os::Windows, Family::Ipv6) => WINDOWS_IPV6,
        (Os::Unsupported, _) => &[],
    }
}

/// The socket options of one platform and address family.
#[derive(Clone, Debug)]
pub struct OptionTable {
    family: Family,
    entries: Vec<(SocketOption, OptionDescriptor)>,
}

impl OptionTable {
    /// Builds the table of `os` for `family`, sizing composite values with `abi`.
    pub fn new(os: Os, family: Family, abi: &dyn Abi) -> OptionTable {
        let entries = entries(os, family)
            .iter()
            .filter_map(|&(option, level, name, kind)| {
                kind_len(abi, family, kind).map(|len| {
                    (
                        option,
                        OptionDescriptor {
                            level,
                            name,
                            len,
                            kind,
                        },
                    )
                })
            })
            .collect();

        OptionTable { family, entries }
    }

    #[inline]
    pub fn family(&self) -> Family {
        self.family
    }

    /// The native form of `option`, if the platform has one.
    #[inline]
    pub fn get(&self, option: SocketOption) -> Option<&OptionDescriptor> {
        self.entries
            .iter()
            .find(|(o, _)| *o == option)
            .map(|(_, desc)| desc)
    }

    /// Iterates over every option the platform supports.
    pub fn iter(&self) -> impl Iterator<Item = (SocketOption, &OptionDescriptor)> {
        self.entries.iter().map(|(option, desc)| (*option, desc))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Typed socket option access on a transport.
pub struct SocketOptions<'a, T: Transport> {
    transport: &'a T,
    platform: &'a Platform,
}

impl<'a, T: Transport> SocketOptions<'a, T> {
    #[inline]
    pub fn new(transport: &'a T, platform: &'a Platform) -> Self {
        SocketOptions {
            transport,
            platform,
        }
    }

    #[inline]
    fn family(&self) -> Family {
        self.transport.family()
    }

    fn descriptor(&self, option: SocketOption) -> Result<&'a OptionDescriptor> {
        self.platform
            .options(self.transport.family())
            .get(option)
            .ok_or(Error::OptionNotImplemented)
    }

    /// Reads the raw native value of `option`.
    pub fn get(&self, option: SocketOption) -> Result<Vec<u8>> {
        let desc = self.descriptor(option)?;
        let mut buf = [0u8; MAX_STRUCT_LEN];
        let len = self
            .transport
            .get_option(desc.level, desc.name, &mut buf[..desc.len])?;
        Ok(buf[..len.min(desc.len)].to_vec())
    }

    /// Reads and decodes the value of `option`.
    pub fn get_value(&self, option: SocketOption) -> Result<OptionValue> {
        let desc = self.descriptor(option)?;
        let bytes = self.get(option)?;
        desc.decode(self.platform.abi(), self.family(), &bytes)
    }

    /// Encodes and writes `value` to `option`.
    pub fn set(&self, option: SocketOption, value: &OptionValue) -> Result<()> {
        let desc = self.descriptor(option)?;
        let buf = desc.encode(self.platform.abi(), self.family(), value)?;
        debug!(
            "setting {:?} (level {}, name {}, {} bytes)",
            option,
            desc.level,
            desc.name,
            buf.len()
        );
        self.transport
            .set_option(desc.level, desc.name, buf.as_slice())?;
        Ok(())
    }

    /// Reads an integer option.
    pub fn int(&self, option: SocketOption) -> Result<i32> {
        match self.get_value(option)? {
            OptionValue::Int(v) => Ok(v),
            _ => Err(Error::InvalidOptionValue("option is not an integer")),
        }
    }

    /// Writes an integer option.
    pub fn set_int(&self, option: SocketOption, value: i32) -> Result<()> {
        self.set(option, &OptionValue::Int(value))
    }

    /// Enables or disables a boolean option.
    #[inline]
    pub fn set_bool(&self, option: SocketOption, on: bool) -> Result<()> {
        self.set_int(option, on as i32)
    }

    pub fn icmp_filter(&self) -> Result<IcmpFilter> {
        match self.get_value(SocketOption::IcmpFilter)? {
            OptionValue::IcmpFilter(filter) => Ok(filter),
            _ => Err(Error::InvalidOptionValue("option is not an ICMP filter")),
        }
    }

    pub fn set_icmp_filter(&self, filter: &IcmpFilter) -> Result<()> {
        self.set(SocketOption::IcmpFilter, &OptionValue::IcmpFilter(*filter))
    }

    /// The multicast interface index.
    pub fn multicast_interface(&self) -> Result<u32> {
        match self.get_value(SocketOption::MulticastInterface)? {
            OptionValue::InterfaceIndex(index) => Ok(index),
            OptionValue::Int(index) => Ok(index as u32),
            _ => Err(Error::InvalidOptionValue("option is not an interface index")),
        }
    }

    pub fn set_multicast_interface(&self, if_index: u32) -> Result<()> {
        self.set(
            SocketOption::MulticastInterface,
            &OptionValue::InterfaceIndex(if_index),
        )
    }

    fn group_value(desc: &OptionDescriptor, if_index: u32, group: IpAddr) -> Result<OptionValue> {
        match desc.kind {
            OptionKind::GroupRequest => Ok(OptionValue::GroupRequest(GroupRequest {
                if_index,
                group,
            })),
            OptionKind::MulticastRequest => Ok(OptionValue::MulticastRequest(MulticastRequest {
                group,
                if_index,
            })),
            _ => Err(Error::OptionNotImplemented),
        }
    }

    fn group_option(&self, option: SocketOption, if_index: u32, group: IpAddr) -> Result<()> {
        if Family::of(&group) != self.family() {
            return Err(Error::InvalidOptionValue("group address family mismatch"));
        }
        let desc = self.descriptor(option)?;
        self.set(option, &Self::group_value(desc, if_index, group)?)
    }

    /// Joins the any-source multicast `group` on the interface `if_index` (0 lets the kernel
    /// choose).
    pub fn join_group(&self, if_index: u32, group: IpAddr) -> Result<()> {
        self.group_option(SocketOption::JoinGroup, if_index, group)
    }

    pub fn leave_group(&self, if_index: u32, group: IpAddr) -> Result<()> {
        self.group_option(SocketOption::LeaveGroup, if_index, group)
    }

    fn source_option(
        &self,
        option: SocketOption,
        if_index: u32,
        group: IpAddr,
        source: IpAddr,
    ) -> Result<()> {
        if Family::of(&group) != self.family() || Family::of(&source) != self.family() {
            return Err(Error::InvalidOptionValue("group address family mismatch"));
        }
        self.set(
            option,
            &OptionValue::GroupSourceRequest(GroupSourceRequest {
                if_index,
                group,
                source,
            }),
        )
    }

    /// Joins the source-specific multicast `group` restricted to `source`.
    pub fn join_source_group(&self, if_index: u32, group: IpAddr, source: IpAddr) -> Result<()> {
        self.source_option(SocketOption::JoinSourceGroup, if_index, group, source)
    }

    pub fn leave_source_group(&self, if_index: u32, group: IpAddr, source: IpAddr) -> Result<()> {
        self.source_option(SocketOption::LeaveSourceGroup, if_index, group, source)
    }

    /// Stops delivery of traffic from `source` to an any-source `group`.
    pub fn block_source(&self, if_index: u32, group: IpAddr, source: IpAddr) -> Result<()> {
        self.source_option(SocketOption::BlockSource, if_index, group, source)
    }

    pub fn unblock_source(&self, if_index: u32, group: IpAddr, source: IpAddr) -> Result<()> {
        self.source_option(SocketOption::UnblockSource, if_index, group, source)
    }

    /// The path MTU of a connected socket.
    pub fn path_mtu(&self) -> Result<MtuInfo> {
        match self.get_value(SocketOption::PathMtu)? {
            OptionValue::MtuInfo(info) => Ok(info),
            _ => Err(Error::InvalidOptionValue("option is not MTU information")),
        }
    }

    /// Attaches a pre-compiled classic BPF program to the socket.
    pub fn attach_filter(&self, program: &[BpfInstruction]) -> Result<()> {
        let desc = self.descriptor(SocketOption::AttachFilter)?;
        let len = u16::try_from(program.len())
            .map_err(|_| Error::InvalidOptionValue("filter program too long"))?;

        // The instructions stay alive until the option call returns.
        let instructions = BpfInstruction::program_bytes(program);
        let prog = SockFprog {
            len,
            filter: instructions.as_ptr() as usize,
        };
        let buf = desc.encode(
            self.platform.abi(),
            self.family(),
            &OptionValue::FilterProgram(prog),
        )?;
        debug!("attaching {}-instruction filter program", program.len());
        self.transport
            .set_option(desc.level, desc.name, buf.as_slice())?;
        drop(instructions);
        Ok(())
    }
}
