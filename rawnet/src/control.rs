// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ancillary data translation.
//!
//! A [`ControlMessage`] is the portable form of the per-datagram information a raw socket can
//! attach to a send or report on a receive. A [`ControlTable`] lists, for one platform and address
//! family, the native ancillary records that carry each piece of that information, and converts
//! between the two. [`CmsgLayout`] frames the records the way the kernel expects.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use log::warn;
use rawnet_common::BufferMut;

use crate::abi::{Abi, PacketInfo, StructBuf};
use crate::error::{Error, Result};
use crate::options::{SocketOption, IPPROTO_IP, IPPROTO_IPV6};
use crate::platform::{Family, Os, PointerWidth};

bitflags! {
    /// The per-datagram information a handler asks the kernel to report.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ControlFlags: u32 {
        /// IPv6 traffic class.
        const TRAFFIC_CLASS = 0x01;
        /// IPv4 TTL or IPv6 hop limit.
        const HOP_LIMIT = 0x02;
        /// Source address.
        const SRC = 0x04;
        /// Destination address.
        const DST = 0x08;
        /// Interface index.
        const INTERFACE = 0x10;
        /// Path MTU.
        const PATH_MTU = 0x20;
    }
}

const PKTINFO_FLAGS: ControlFlags = ControlFlags::SRC
    .union(ControlFlags::DST)
    .union(ControlFlags::INTERFACE);

/// Per-datagram information exchanged with the kernel as ancillary data.
///
/// Every field is optional. On receive, only the fields the platform reports and the handler
/// requested are populated. On send, only the populated fields the platform can send are
/// encoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ControlMessage {
    /// IPv6 traffic class.
    pub traffic_class: Option<u8>,
    /// IPv4 TTL or IPv6 hop limit.
    pub hop_limit: Option<u8>,
    /// On receive, the source address; on send, the source address to use.
    pub src: Option<IpAddr>,
    /// On receive, the destination address; on send, the destination, which takes precedence
    /// over the destination of the header.
    pub dst: Option<IpAddr>,
    /// On receive, the arrival interface; on send, the outgoing interface.
    pub if_index: Option<u32>,
    /// IPv6 next-hop address.
    pub next_hop: Option<IpAddr>,
    /// IPv6 path MTU.
    pub path_mtu: Option<u32>,
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        let mut field = |f: &mut fmt::Formatter<'_>, name: &str, value: &dyn fmt::Display| {
            let res = write!(f, "{}{}={}", sep, name, value);
            sep = " ";
            res
        };

        if let Some(tclass) = self.traffic_class {
            field(f, "tclass", &format_args!("{:#04x}", tclass))?;
        }
        if let Some(hop_limit) = self.hop_limit {
            field(f, "hoplim", &hop_limit)?;
        }
        if let Some(src) = self.src {
            field(f, "src", &src)?;
        }
        if let Some(dst) = self.dst {
            field(f, "dst", &dst)?;
        }
        if let Some(if_index) = self.if_index {
            field(f, "ifindex", &if_index)?;
        }
        if let Some(next_hop) = self.next_hop {
            field(f, "nexthop", &next_hop)?;
        }
        if let Some(mtu) = self.path_mtu {
            field(f, "mtu", &mtu)?;
        }
        Ok(())
    }
}

/// The framing of ancillary data records (`struct cmsghdr` and the `CMSG_*` macros).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmsgLayout {
    /// The width of `cmsg_len` in bytes.
    pub len_width: usize,
    /// `sizeof(struct cmsghdr)`.
    pub header_len: usize,
    /// The alignment of records and of their payload.
    pub align: usize,
}

/// A single ancillary data record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmsgRecord<'a> {
    pub level: i32,
    pub typ: i32,
    pub data: &'a [u8],
}

impl CmsgLayout {
    pub fn new(os: Os, pointer_width: PointerWidth) -> CmsgLayout {
        match os {
            Os::FreeBsd => CmsgLayout {
                len_width: 4,
                header_len: 12,
                align: pointer_width.bytes(),
            },
            Os::Darwin => CmsgLayout {
                len_width: 4,
                header_len: 12,
                align: 4,
            },
            Os::Linux | Os::Windows | Os::Unsupported => CmsgLayout {
                len_width: pointer_width.bytes(),
                header_len: pointer_width.bytes() + 8,
                align: pointer_width.bytes(),
            },
        }
    }

    /// The layout a 64-bit FreeBSD kernel uses when writing to a 32-bit process.
    pub const fn freebsd_kernel64() -> CmsgLayout {
        CmsgLayout {
            len_width: 4,
            header_len: 12,
            align: 8,
        }
    }

    /// `CMSG_ALIGN(len)`.
    #[inline]
    pub fn align(&self, len: usize) -> usize {
        (len + self.align - 1) / self.align * self.align
    }

    /// `CMSG_LEN(len)`.
    #[inline]
    pub fn len(&self, len: usize) -> usize {
        self.align(self.header_len) + len
    }

    /// `CMSG_SPACE(len)`.
    #[inline]
    pub fn space(&self, len: usize) -> usize {
        self.align(self.header_len) + self.align(len)
    }

    /// Appends one record. `buf` must have at least `space(data.len())` bytes remaining.
    pub fn write_record(&self, buf: &mut BufferMut<'_>, level: i32, typ: i32, data: &[u8]) {
        let start = buf.len();
        let cmsg_len = self.len(data.len());
        match self.len_width {
            8 => buf.append(&(cmsg_len as u64).to_ne_bytes()),
            _ => buf.append_ne_u32(cmsg_len as u32),
        }
        buf.append_ne_i32(level);
        buf.append_ne_i32(typ);
        buf.pad_to(start + self.align(self.header_len));
        buf.append(data);
        buf.pad_to(start + self.space(data.len()));
    }

    /// Iterates over the records in `bytes`.
    ///
    /// Iteration stops at the first truncated record, which is logged and skipped.
    #[inline]
    pub fn records<'a>(&self, bytes: &'a [u8]) -> Records<'a> {
        Records {
            layout: *self,
            bytes,
            off: 0,
        }
    }
}

/// An iterator over ancillary data records.
#[derive(Clone, Debug)]
pub struct Records<'a> {
    layout: CmsgLayout,
    bytes: &'a [u8],
    off: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = CmsgRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let layout = self.layout;
        let rest = self.bytes.get(self.off..)?;
        if rest.len() < layout.header_len {
            if !rest.is_empty() {
                warn!("skipping {} trailing ancillary bytes", rest.len());
            }
            return None;
        }

        let word = |off: usize| i32::from_ne_bytes([rest[off], rest[off + 1], rest[off + 2], rest[off + 3]]);
        let cmsg_len = match layout.len_width {
            8 => {
                let mut len = [0u8; 8];
                len.copy_from_slice(&rest[..8]);
                u64::from_ne_bytes(len) as usize
            }
            _ => word(0) as u32 as usize,
        };
        let data_off = layout.align(layout.header_len);
        if cmsg_len < data_off || cmsg_len > rest.len() {
            warn!(
                "truncated ancillary record (cmsg_len {}, {} bytes available)",
                cmsg_len,
                rest.len()
            );
            self.off = self.bytes.len();
            return None;
        }

        let record = CmsgRecord {
            level: word(layout.len_width),
            typ: word(layout.len_width + 4),
            data: &rest[data_off..cmsg_len],
        };
        self.off += layout.align(cmsg_len);
        Some(record)
    }
}

/// Re-frames the records in `bytes` from the layout `from` to the layout `to`.
pub fn realign(bytes: &[u8], from: CmsgLayout, to: CmsgLayout) -> Vec<u8> {
    let records: Vec<_> = from.records(bytes).collect();
    let space = records.iter().map(|r| to.space(r.data.len())).sum();
    let mut out = vec![0u8; space];
    let mut buf = BufferMut::new(&mut out);
    for record in records {
        to.write_record(&mut buf, record.level, record.typ, record.data);
    }
    out
}

/// The information a native ancillary record carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// A host-order `int` traffic class.
    TrafficClass,
    /// A hop limit, either a host-order `int` or a single byte.
    HopLimit,
    /// `struct in_pktinfo` or `struct in6_pktinfo`.
    PacketInfo,
    /// A bare `struct in_addr` destination (`IP_RECVDSTADDR`).
    DestinationAddress,
    /// A `struct sockaddr_dl` holding the arrival interface (`IP_RECVIF`).
    Interface,
    /// `struct ip6_mtuinfo`.
    PathMtu,
    /// A `struct sockaddr_in6` next hop.
    NextHop,
}

/// The native form of one kind of ancillary record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlEntry {
    pub kind: ControlKind,
    /// The flags this record satisfies on receive.
    pub flags: ControlFlags,
    /// The option that enables delivery of this record, if it can be received.
    pub option: Option<SocketOption>,
    pub level: i32,
    pub typ: i32,
    /// The payload length in bytes.
    pub len: usize,
    /// Whether this record can be attached to a send.
    pub sendable: bool,
}

// (kind, flags, receive option, level, type, fixed payload length, sendable)
type Entry = (
    ControlKind,
    ControlFlags,
    Option<SocketOption>,
    i32,
    i32,
    Option<usize>,
    bool,
);

use ControlFlags as F;
use ControlKind as C;
use SocketOption as O;

const LINUX_IPV4: &[Entry] = &[
    (C::HopLimit, F::HOP_LIMIT, Some(O::ReceiveHopLimit), IPPROTO_IP, 2, Some(4), false),
    (C::PacketInfo, PKTINFO_FLAGS, Some(O::ReceivePacketInfo), IPPROTO_IP, 8, None, true),
];

const LINUX_IPV6: &[Entry] = &[
    (C::TrafficClass, F::TRAFFIC_CLASS, Some(O::ReceiveTrafficClass), IPPROTO_IPV6, 67, Some(4), true),
    (C::HopLimit, F::HOP_LIMIT, Some(O::ReceiveHopLimit), IPPROTO_IPV6, 52, Some(4), true),
    (C::PacketInfo, PKTINFO_FLAGS, Some(O::ReceivePacketInfo), IPPROTO_IPV6, 50, None, true),
    (C::PathMtu, F::PATH_MTU, Some(O::ReceivePathMtu), IPPROTO_IPV6, 61, None, false),
];

const FREEBSD_IPV4: &[Entry] = &[
    (C::HopLimit, F::HOP_LIMIT, Some(O::ReceiveHopLimit), IPPROTO_IP, 65, Some(1), false),
    (C::DestinationAddress, F::DST, Some(O::ReceiveDestinationAddress), IPPROTO_IP, 7, Some(4), false),
    (C::Interface, F::INTERFACE, Some(O::ReceiveInterface), IPPROTO_IP, 20, Some(54), false),
];

const BSD_IPV6_TAIL: [Entry; 4] = [
    (C::HopLimit, F::HOP_LIMIT, Some(O::ReceiveHopLimit), IPPROTO_IPV6, 47, Some(4), true),
    (C::PacketInfo, PKTINFO_FLAGS, Some(O::ReceivePacketInfo), IPPROTO_IPV6, 46, None, true),
    (C::NextHop, F::empty(), None, IPPROTO_IPV6, 48, None, true),
    (C::PathMtu, F::PATH_MTU, Some(O::ReceivePathMtu), IPPROTO_IPV6, 44, None, false),
];

const FREEBSD_IPV6: &[Entry] = &[
    (C::TrafficClass, F::TRAFFIC_CLASS, Some(O::ReceiveTrafficClass), IPPROTO_IPV6, 61, Some(4), true),
    BSD_IPV6_TAIL[0],
    BSD_IPV6_TAIL[1],
    BSD_IPV6_TAIL[2],
    BSD_IPV6_TAIL[3],
];

// Packet information supersedes the destination and interface records when requesting.
const DARWIN_IPV4: &[Entry] = &[
    (C::HopLimit, F::HOP_LIMIT, Some(O::ReceiveHopLimit), IPPROTO_IP, 24, Some(1), false),
    (C::PacketInfo, PKTINFO_FLAGS, Some(O::ReceivePacketInfo), IPPROTO_IP, 26, None, true),
    (C::DestinationAddress, F::DST, Some(O::ReceiveDestinationAddress), IPPROTO_IP, 7, Some(4), false),
    (C::Interface, F::INTERFACE, Some(O::ReceiveInterface), IPPROTO_IP, 20, Some(20), false),
];

const DARWIN_IPV6: &[Entry] = &[
    (C::TrafficClass, F::TRAFFIC_CLASS, Some(O::ReceiveTrafficClass), IPPROTO_IPV6, 36, Some(4), true),
    BSD_IPV6_TAIL[0],
    BSD_IPV6_TAIL[1],
    BSD_IPV6_TAIL[2],
    BSD_IPV6_TAIL[3],
];

fn entries(os: Os, family: Family) -> &'static [Entry] {
    match (os, family) {
        (Os::Linux, Family::Ipv4) => LINUX_IPV4,
        (Os::Linux, Family::Ipv6) => LINUX_IPV6,
        (Os::FreeBsd, Family::Ipv4) => FREEBSD_IPV4,
        (Os::FreeBsd, Family::Ipv6) => FREEBSD_IPV6,
        (Os::Darwin, Family::Ipv4) => DARWIN_IPV4,
        (Os::Darwin, Family::Ipv6) => DARWIN_IPV6,
        (Os::Windows, _) | (Os::Unsupported, _) => &[],
    }
}

fn kind_len(abi: &dyn Abi, family: Family, kind: ControlKind) -> Option<usize> {
    match kind {
        ControlKind::PacketInfo => abi.pktinfo_len(family),
        ControlKind::PathMtu => abi.mtuinfo_len(),
        ControlKind::NextHop => Some(abi.sockaddr_len(Family::Ipv6)),
        _ => None,
    }
}

#[inline]
fn ne_i32(data: &[u8]) -> i32 {
    i32::from_ne_bytes([data[0], data[1], data[2], data[3]])
}

/// The ancillary records of one platform and address family.
#[derive(Clone, Debug)]
pub struct ControlTable {
    family: Family,
    entries: Vec<ControlEntry>,
}

impl ControlTable {
    /// Builds the table of `os` for `family`, sizing structures with `abi`.
    pub fn new(os: Os, family: Family, abi: &dyn Abi) -> ControlTable {
        let entries = entries(os, family)
            .iter()
            .filter_map(|&(kind, flags, option, level, typ, len, sendable)| {
                len.or_else(|| kind_len(abi, family, kind))
                    .map(|len| ControlEntry {
                        kind,
                        flags,
                        option,
                        level,
                        typ,
                        len,
                        sendable,
                    })
            })
            .collect();

        ControlTable { family, entries }
    }

    #[inline]
    pub fn family(&self) -> Family {
        self.family
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ControlEntry> {
        self.entries.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The receivable records that satisfy `flags`.
    ///
    /// A record is selected only if it satisfies a flag no earlier selected record does.
    pub fn receive_entries(&self, flags: ControlFlags) -> impl Iterator<Item = &ControlEntry> {
        let mut covered = ControlFlags::empty();
        self.entries.iter().filter(move |entry| {
            let wanted = entry.option.is_some() && entry.flags.intersects(flags - covered);
            if wanted {
                covered |= entry.flags;
            }
            wanted
        })
    }

    /// The ancillary buffer space needed to receive every record requested by `flags`.
    pub fn receive_space(&self, flags: ControlFlags, layout: CmsgLayout) -> usize {
        self.receive_entries(flags)
            .map(|entry| layout.space(entry.len))
            .sum()
    }

    /// Encodes the sendable fields of `cm` as ancillary data.
    ///
    /// Returns an empty buffer if no populated field can be sent on this platform.
    pub fn marshal(&self, cm: &ControlMessage, abi: &dyn Abi, layout: CmsgLayout) -> Result<Vec<u8>> {
        let mut payloads: Vec<(&ControlEntry, StructBuf)> = Vec::new();
        for entry in self.entries.iter().filter(|entry| entry.sendable) {
            if let Some(payload) = self.marshal_entry(entry, cm, abi)? {
                payloads.push((entry, payload));
            }
        }

        let space = payloads
            .iter()
            .map(|(_, payload)| layout.space(payload.len()))
            .sum();
        let mut bytes = vec![0u8; space];
        let mut buf = BufferMut::new(&mut bytes);
        for (entry, payload) in &payloads {
            layout.write_record(&mut buf, entry.level, entry.typ, payload.as_slice());
        }
        Ok(bytes)
    }

    fn marshal_entry(
        &self,
        entry: &ControlEntry,
        cm: &ControlMessage,
        abi: &dyn Abi,
    ) -> Result<Option<StructBuf>> {
        let mut buf = StructBuf::new();
        match entry.kind {
            ControlKind::TrafficClass => match cm.traffic_class {
                Some(tclass) => buf.append(&(tclass as i32).to_ne_bytes()),
                None => return Ok(None),
            },
            ControlKind::HopLimit => match cm.hop_limit {
                Some(hop_limit) if entry.len == 1 => buf.append_u8(hop_limit),
                Some(hop_limit) => buf.append(&(hop_limit as i32).to_ne_bytes()),
                None => return Ok(None),
            },
            ControlKind::PacketInfo => {
                let src = cm.src.filter(|src| Family::of(src) == self.family);
                if src.is_none() && cm.if_index.is_none() {
                    return Ok(None);
                }
                let addr = src.unwrap_or(match self.family {
                    Family::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Family::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                });
                buf = abi.encode_pktinfo(&PacketInfo {
                    addr,
                    if_index: cm.if_index.unwrap_or(0),
                })?;
            }
            ControlKind::NextHop => match cm.next_hop {
                Some(next_hop @ IpAddr::V6(_)) => abi.write_sockaddr(&mut buf, next_hop, 0),
                Some(IpAddr::V4(_)) => {
                    return Err(Error::InvalidOptionValue("next hop must be an IPv6 address"))
                }
                None => return Ok(None),
            },
            ControlKind::DestinationAddress | ControlKind::Interface | ControlKind::PathMtu => {
                return Ok(None)
            }
        }
        Ok(Some(buf))
    }

    /// Decodes the records this table knows from received ancillary data.
    ///
    /// Records of unknown level and type are ignored.
    pub fn parse(&self, bytes: &[u8], abi: &dyn Abi, layout: CmsgLayout) -> Result<ControlMessage> {
        let mut cm = ControlMessage::default();
        for record in layout.records(bytes) {
            let Some(entry) = self
                .entries
                .iter()
                .find(|e| e.level == record.level && e.typ == record.typ)
            else {
                continue;
            };

            let data = record.data;
            let min_len = match entry.kind {
                // Kernels may report a hop limit record as either width
                ControlKind::HopLimit => 1,
                _ => entry.len,
            };
            if data.len() < min_len {
                warn!(
                    "skipping short {:?} record ({} of {} bytes)",
                    entry.kind,
                    data.len(),
                    entry.len
                );
                continue;
            }

            match entry.kind {
                ControlKind::TrafficClass => cm.traffic_class = Some(ne_i32(data) as u8),
                ControlKind::HopLimit => {
                    cm.hop_limit = Some(if data.len() >= 4 {
                        ne_i32(data) as u8
                    } else {
                        data[0]
                    })
                }
                ControlKind::PacketInfo => {
                    let info = abi.decode_pktinfo(self.family, data)?;
                    cm.dst = Some(info.addr);
                    cm.if_index = Some(info.if_index);
                }
                ControlKind::DestinationAddress => {
                    cm.dst = Some(IpAddr::V4(Ipv4Addr::new(data[0], data[1], data[2], data[3])))
                }
                ControlKind::Interface => {
                    cm.if_index = Some(u16::from_ne_bytes([data[2], data[3]]) as u32)
                }
                ControlKind::PathMtu => {
                    let info = abi.decode_mtuinfo(data)?;
                    cm.dst = Some(IpAddr::V6(info.addr));
                    cm.if_index = Some(info.scope_id);
                    cm.path_mtu = Some(info.mtu);
                }
                ControlKind::NextHop => cm.next_hop = Some(abi.read_sockaddr(data)?.0),
            }
        }
        Ok(cm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;

    fn linux64() -> Platform {
        Platform::new(Os::Linux, PointerWidth::Bits64)
    }

    #[test]
    fn layouts() {
        let linux = CmsgLayout::new(Os::Linux, PointerWidth::Bits64);
        assert_eq!((linux.len(4), linux.space(4)), (20, 24));
        assert_eq!(linux.space(20), 40);

        let darwin = CmsgLayout::new(Os::Darwin, PointerWidth::Bits64);
        assert_eq!((darwin.len(1), darwin.space(1)), (13, 16));

        let freebsd = CmsgLayout::new(Os::FreeBsd, PointerWidth::Bits64);
        assert_eq!((freebsd.len(4), freebsd.space(4)), (20, 24));
    }

    #[test]
    fn ipv6_marshal_and_parse() {
        let platform = linux64();
        let table = platform.control(Family::Ipv6);
        let cm = ControlMessage {
            traffic_class: Some(0xb8),
            hop_limit: Some(64),
            src: Some("2001:db8::1".parse().unwrap()),
            if_index: Some(2),
            ..Default::default()
        };

        let bytes = table
            .marshal(&cm, platform.abi(), platform.cmsg_layout())
            .unwrap();
        // tclass (24) + hoplimit (24) + pktinfo (40)
        assert_eq!(bytes.len(), 88);
        assert_eq!(&bytes[..8], &20u64.to_ne_bytes());
        assert_eq!(&bytes[8..12], &41i32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &67i32.to_ne_bytes());

        let parsed = table
            .parse(&bytes, platform.abi(), platform.cmsg_layout())
            .unwrap();
        assert_eq!(
            parsed,
            ControlMessage {
                traffic_class: Some(0xb8),
                hop_limit: Some(64),
                dst: cm.src,
                if_index: Some(2),
                ..Default::default()
            }
        );
    }

    #[test]
    fn ipv4_only_packet_info_is_sent() {
        let platform = linux64();
        let table = platform.control(Family::Ipv4);
        let cm = ControlMessage {
            hop_limit: Some(1),
            ..Default::default()
        };
        assert!(table
            .marshal(&cm, platform.abi(), platform.cmsg_layout())
            .unwrap()
            .is_empty());

        let cm = ControlMessage {
            src: Some(Ipv4Addr::new(192, 0, 2, 1).into()),
            ..Default::default()
        };
        let bytes = table
            .marshal(&cm, platform.abi(), platform.cmsg_layout())
            .unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[12..16], &8i32.to_ne_bytes());
        assert_eq!(&bytes[20..24], &[192, 0, 2, 1]);

        let freebsd = Platform::new(Os::FreeBsd, PointerWidth::Bits64);
        assert!(freebsd
            .control(Family::Ipv4)
            .marshal(&cm, freebsd.abi(), freebsd.cmsg_layout())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn bsd_ipv4_records() {
        let platform = Platform::new(Os::FreeBsd, PointerWidth::Bits64);
        let layout = platform.cmsg_layout();
        let mut sdl = [0u8; 54];
        sdl[0] = 54;
        sdl[1] = 18;
        sdl[2..4].copy_from_slice(&7u16.to_ne_bytes());

        let mut bytes = vec![0u8; layout.space(1) + layout.space(4) + layout.space(54)];
        let mut buf = BufferMut::new(&mut bytes);
        layout.write_record(&mut buf, 0, 65, &[17]);
        layout.write_record(&mut buf, 0, 7, &[198, 51, 100, 4]);
        layout.write_record(&mut buf, 0, 20, &sdl);

        let cm = platform
            .control(Family::Ipv4)
            .parse(&bytes, platform.abi(), layout)
            .unwrap();
        assert_eq!(
            cm,
            ControlMessage {
                hop_limit: Some(17),
                dst: Some(Ipv4Addr::new(198, 51, 100, 4).into()),
                if_index: Some(7),
                ..Default::default()
            }
        );
    }

    #[test]
    fn next_hop_and_path_mtu() {
        let platform = Platform::new(Os::Darwin, PointerWidth::Bits64);
        let table = platform.control(Family::Ipv6);
        let layout = platform.cmsg_layout();
        let cm = ControlMessage {
            next_hop: Some("fe80::1".parse().unwrap()),
            ..Default::default()
        };
        let bytes = table.marshal(&cm, platform.abi(), layout).unwrap();
        assert_eq!(bytes.len(), layout.space(28));
        assert_eq!(&bytes[8..12], &48i32.to_ne_bytes());
        assert_eq!(&bytes[12..14], &[28, 30]);
        assert_eq!(table.parse(&bytes, platform.abi(), layout).unwrap(), cm);

        let mtu = platform
            .abi()
            .encode_mtuinfo(&crate::abi::MtuInfo {
                addr: "2001:db8::5".parse().unwrap(),
                scope_id: 3,
                mtu: 1280,
            })
            .unwrap();
        let mut bytes = vec![0u8; layout.space(mtu.len())];
        layout.write_record(&mut BufferMut::new(&mut bytes), 41, 44, mtu.as_slice());
        let cm = table.parse(&bytes, platform.abi(), layout).unwrap();
        assert_eq!(cm.path_mtu, Some(1280));
        assert_eq!(cm.if_index, Some(3));

        let v4 = ControlMessage {
            next_hop: Some(Ipv4Addr::LOCALHOST.into()),
            ..Default::default()
        };
        assert!(matches!(
            table.marshal(&v4, platform.abi(), layout),
            Err(Error::InvalidOptionValue(_))
        ));
    }

    #[test]
    fn receive_selection() {
        let darwin = Platform::new(Os::Darwin, PointerWidth::Bits64);
        let selected: Vec<_> = darwin
            .control(Family::Ipv4)
            .receive_entries(ControlFlags::DST | ControlFlags::INTERFACE)
            .map(|e| e.kind)
            .collect();
        assert_eq!(selected, vec![ControlKind::PacketInfo]);

        let freebsd = Platform::new(Os::FreeBsd, PointerWidth::Bits64);
        let selected: Vec<_> = freebsd
            .control(Family::Ipv4)
            .receive_entries(ControlFlags::all())
            .map(|e| e.option)
            .collect();
        assert_eq!(
            selected,
            vec![
                Some(SocketOption::ReceiveHopLimit),
                Some(SocketOption::ReceiveDestinationAddress),
                Some(SocketOption::ReceiveInterface),
            ]
        );

        let linux = linux64();
        assert_eq!(
            linux
                .control(Family::Ipv6)
                .receive_space(ControlFlags::HOP_LIMIT | ControlFlags::PATH_MTU, linux.cmsg_layout()),
            24 + 48
        );
        assert_eq!(
            linux
                .control(Family::Ipv6)
                .receive_space(ControlFlags::empty(), linux.cmsg_layout()),
            0
        );
    }

    #[test]
    fn truncated_records_are_skipped() {
        let platform = linux64();
        let layout = platform.cmsg_layout();
        let mut bytes = vec![0u8; layout.space(4) * 2];
        let mut buf = BufferMut::new(&mut bytes);
        layout.write_record(&mut buf, 41, 52, &9i32.to_ne_bytes());
        layout.write_record(&mut buf, 41, 67, &3i32.to_ne_bytes());
        // second record claims more than is available
        let second = layout.space(4);
        bytes[second..second + 8].copy_from_slice(&64u64.to_ne_bytes());

        let cm = platform
            .control(Family::Ipv6)
            .parse(&bytes, platform.abi(), layout)
            .unwrap();
        assert_eq!(cm.hop_limit, Some(9));
        assert_eq!(cm.traffic_class, None);

        assert_eq!(layout.records(&[0u8; 7]).count(), 0);
    }

    #[test]
    fn freebsd32_realign() {
        let kernel = CmsgLayout::freebsd_kernel64();
        let process = CmsgLayout::new(Os::FreeBsd, PointerWidth::Bits32);
        assert_eq!(process.align, 4);

        let mut bytes = vec![0u8; kernel.space(1) + kernel.space(4)];
        let mut buf = BufferMut::new(&mut bytes);
        kernel.write_record(&mut buf, 0, 65, &[33]);
        kernel.write_record(&mut buf, 0, 7, &[10, 1, 2, 3]);
        assert_eq!(bytes.len(), 48);

        let realigned = realign(&bytes, kernel, process);
        assert_eq!(realigned.len(), 16 + 16);
        let records: Vec<_> = process.records(&realigned).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data, &[33]);
        assert_eq!(records[1].data, &[10, 1, 2, 3]);
        assert_eq!((records[1].level, records[1].typ), (0, 7));
    }

    #[test]
    fn display() {
        let cm = ControlMessage {
            hop_limit: Some(3),
            dst: Some(Ipv4Addr::new(10, 0, 0, 1).into()),
            ..Default::default()
        };
        assert_eq!(cm.to_string(), "hoplim=3 dst=10.0.0.1");
        assert_eq!(ControlMessage::default().to_string(), "");
    }
}
