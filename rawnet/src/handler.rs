// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Datagram handlers.
//!
//! A [`PacketHandler`] exchanges whole IPv4 packets (header and payload) over a header-included
//! raw socket. A [`PayloadHandler`] exchanges only the payload, for either address family. Both
//! can request per-datagram [`ControlMessage`]s from the kernel.
//!
//! The set of requested control messages is shared state guarded by a reader/writer lock. Reads
//! take a snapshot of it before the blocking receive; the lock is never held across I/O.

use std::net::{IpAddr, Ipv4Addr};

use log::{debug, trace};
use parking_lot::RwLock;
use rawnet_wire::ipv4::{self, Header};

use crate::control::{realign, CmsgLayout, ControlFlags, ControlMessage};
use crate::error::{Error, OpError, Result};
use crate::options::{SocketOption, SocketOptions};
use crate::platform::{Family, Platform};
use crate::transport::{RecvFlags, RecvMeta, SendFlags, Transport};

/// The longest IPv4 header, options included.
pub const MAX_HEADER_LEN: usize = 60;

/// The state shared by both handler kinds.
#[derive(Debug)]
struct Conn<T: Transport> {
    transport: Option<T>,
    platform: &'static Platform,
    flags: RwLock<ControlFlags>,
}

impl<T: Transport> Conn<T> {
    fn new(transport: T, platform: &'static Platform) -> Self {
        Conn {
            transport: Some(transport),
            platform,
            flags: RwLock::new(ControlFlags::empty()),
        }
    }

    fn op_error(&self, op: &'static str, addr: Option<IpAddr>, cause: Error) -> Error {
        let (net, local) = match &self.transport {
            Some(t) => (t.network().to_string(), t.local_addr()),
            None => (String::new(), None),
        };
        Error::Op(OpError {
            op,
            net,
            local,
            addr,
            cause: Box::new(cause),
        })
    }

    fn transport(&self, op: &'static str) -> Result<&T> {
        self.transport
            .as_ref()
            .ok_or_else(|| self.op_error(op, None, Error::InvalidConnection))
    }

    /// The framing of ancillary data as written by the kernel.
    fn kernel_layout(&self) -> CmsgLayout {
        if self.platform.freebsd32_compat() {
            CmsgLayout::freebsd_kernel64()
        } else {
            self.platform.cmsg_layout()
        }
    }

    fn control_flags(&self) -> ControlFlags {
        *self.flags.read()
    }

    fn set_control_message(&self, flags: ControlFlags, on: bool) -> Result<()> {
        let transport = self.transport("set")?;
        let family = transport.family();
        let table = self.platform.control(family);
        if table.is_empty() {
            return Err(self.op_error("set", None, Error::OptionNotImplemented));
        }

        let opts = SocketOptions::new(transport, self.platform);
        let mut current = self.flags.write();
        let mut changed = ControlFlags::empty();
        for entry in table.receive_entries(flags) {
            let Some(option) = entry.option else {
                continue;
            };
            opts.set_bool(option, on)
                .map_err(|e| self.op_error("set", None, e))?;
            changed |= entry.flags & flags;
        }

        if on {
            current.insert(changed);
        } else {
            current.remove(changed);
        }
        debug!(
            "{} control messages {:?}, now requesting {:?}",
            if on { "enabled" } else { "disabled" },
            changed,
            *current
        );
        Ok(())
    }

    /// Receives one datagram into `buf`, decoding any ancillary data that arrived with it.
    fn recv(&self, buf: &mut [u8]) -> Result<(RecvMeta, Option<ControlMessage>)> {
        let transport = self.transport("read")?;
        let family = transport.family();
        let table = self.platform.control(family);

        let flags = self.control_flags();
        let mut control = vec![0u8; table.receive_space(flags, self.kernel_layout())];

        let meta = transport
            .recv_msg(buf, &mut control, RecvFlags::empty())
            .map_err(|e| self.op_error("read", None, e.into()))?;
        trace!(
            "received {} bytes and {} ancillary bytes from {:?}",
            meta.len,
            meta.control_len,
            meta.source
        );

        if meta.control_len == 0 {
            return Ok((meta, None));
        }

        let received = &control[..meta.control_len.min(control.len())];
        let realigned;
        let bytes = if self.platform.freebsd32_compat() {
            realigned = realign(received, self.kernel_layout(), self.platform.cmsg_layout());
            &realigned[..]
        } else {
            received
        };

        let mut cm = table
            .parse(bytes, self.platform.abi(), self.platform.cmsg_layout())
            .map_err(|e| self.op_error("read", None, e))?;
        cm.src = meta.source;
        Ok((meta, Some(cm)))
    }

    fn control_bytes(&self, family: Family, cm: Option<&ControlMessage>) -> Result<Vec<u8>> {
        match cm {
            Some(cm) => self.platform.control(family).marshal(
                cm,
                self.platform.abi(),
                self.platform.cmsg_layout(),
            ),
            None => Ok(Vec::new()),
        }
    }
}

/// Reads and writes whole IPv4 packets, header included.
#[derive(Debug)]
pub struct PacketHandler<T: Transport> {
    conn: Conn<T>,
}

impl<T: Transport> PacketHandler<T> {
    /// Wraps an IPv4 raw socket using the configuration of the running host.
    ///
    /// Enables `IP_HDRINCL` where the platform supports it, so that written headers are sent as
    /// given.
    pub fn new(transport: T) -> Result<Self> {
        Self::with_platform(transport, Platform::current())
    }

    /// Wraps an IPv4 raw socket using the configuration `platform`.
    pub fn with_platform(transport: T, platform: &'static Platform) -> Result<Self> {
        let handler = PacketHandler {
            conn: Conn::new(transport, platform),
        };

        let transport = handler.conn.transport("set")?;
        if transport.family() != Family::Ipv4 {
            return Err(handler.conn.op_error(
                "set",
                None,
                Error::Wire(rawnet_wire::Error::InvalidProtocol),
            ));
        }
        if platform
            .options(Family::Ipv4)
            .get(SocketOption::HeaderIncluded)
            .is_some()
        {
            SocketOptions::new(transport, platform)
                .set_bool(SocketOption::HeaderIncluded, true)
                .map_err(|e| handler.conn.op_error("set", None, e))?;
        }

        Ok(handler)
    }

    /// The underlying transport, if the handler still owns one.
    #[inline]
    pub fn transport(&self) -> Option<&T> {
        self.conn.transport.as_ref()
    }

    /// Releases the transport. Every later operation fails with
    /// [`Error::InvalidConnection`].
    #[inline]
    pub fn take_transport(&mut self) -> Option<T> {
        self.conn.transport.take()
    }

    /// Typed socket option access on the transport.
    pub fn options(&self) -> Result<SocketOptions<'_, T>> {
        Ok(SocketOptions::new(self.conn.transport("get")?, self.conn.platform))
    }

    /// The control messages currently requested.
    #[inline]
    pub fn control_flags(&self) -> ControlFlags {
        self.conn.control_flags()
    }

    /// Requests (`on`) or stops requesting (`!on`) the control messages in `flags`.
    ///
    /// Flags the platform cannot report are ignored. Fails with
    /// [`Error::OptionNotImplemented`] on platforms without any control messages.
    pub fn set_control_message(&self, flags: ControlFlags, on: bool) -> Result<()> {
        self.conn.set_control_message(flags, on)
    }

    /// Reads one packet into `buf`, returning its parsed header, its payload and, if any arrived,
    /// its control message.
    pub fn read_from<'a>(
        &self,
        buf: &'a mut [u8],
    ) -> Result<(Header, &'a [u8], Option<ControlMessage>)> {
        let (meta, cm) = self.conn.recv(buf)?;
        let buf: &'a [u8] = buf;
        let packet = &buf[..meta.len.min(buf.len())];

        let (hdr, payload) = ipv4::slice_packet(packet)
            .map_err(|e| self.conn.op_error("read", None, e.into()))?;
        let header = Header::parse_with(hdr, self.conn.platform.header_order())
            .map_err(|e| self.conn.op_error("read", None, e.into()))?;

        Ok((header, payload, cm))
    }

    /// Writes one packet made of `header` and `payload`.
    ///
    /// The destination is the IPv4 destination of `cm` if present, otherwise the destination of
    /// `header`. An unspecified header destination is filled in from `cm`.
    pub fn write_to(
        &self,
        header: &Header,
        payload: &[u8],
        cm: Option<&ControlMessage>,
    ) -> Result<()> {
        let transport = self.conn.transport("write")?;

        let cm_dst = cm.and_then(|cm| match cm.dst {
            Some(IpAddr::V4(dst)) => Some(dst),
            _ => None,
        });
        let dst = cm_dst.unwrap_or(header.dst);
        let addr = Some(IpAddr::V4(dst));
        if dst == Ipv4Addr::UNSPECIFIED {
            return Err(self.conn.op_error(
                "write",
                None,
                Error::Wire(rawnet_wire::Error::MissingAddress),
            ));
        }

        let control = self
            .conn
            .control_bytes(Family::Ipv4, cm)
            .map_err(|e| self.conn.op_error("write", addr, e))?;

        let order = self.conn.platform.header_order();
        let marshaled = if header.dst == Ipv4Addr::UNSPECIFIED {
            Header {
                dst,
                ..header.clone()
            }
            .marshal_with(order)
        } else {
            header.marshal_with(order)
        };
        let hdr = marshaled.map_err(|e| self.conn.op_error("write", addr, e.into()))?;

        let sent = transport
            .send_msg(&[hdr.as_slice(), payload], &control, addr, SendFlags::empty())
            .map_err(|e| self.conn.op_error("write", addr, e.into()))?;
        trace!(
            "sent {} bytes ({} ancillary) to {}",
            sent,
            control.len(),
            dst
        );
        Ok(())
    }
}

/// Reads and writes datagram payloads, for either address family.
#[derive(Debug)]
pub struct PayloadHandler<T: Transport> {
    conn: Conn<T>,
}

impl<T: Transport> PayloadHandler<T> {
    /// Wraps a raw socket using the configuration of the running host.
    #[inline]
    pub fn new(transport: T) -> Self {
        Self::with_platform(transport, Platform::current())
    }

    /// Wraps a raw socket using the configuration `platform`.
    #[inline]
    pub fn with_platform(transport: T, platform: &'static Platform) -> Self {
        PayloadHandler {
            conn: Conn::new(transport, platform),
        }
    }

    #[inline]
    pub fn transport(&self) -> Option<&T> {
        self.conn.transport.as_ref()
    }

    /// Releases the transport. Every later operation fails with
    /// [`Error::InvalidConnection`].
    #[inline]
    pub fn take_transport(&mut self) -> Option<T> {
        self.conn.transport.take()
    }

    pub fn options(&self) -> Result<SocketOptions<'_, T>> {
        Ok(SocketOptions::new(self.conn.transport("get")?, self.conn.platform))
    }

    #[inline]
    pub fn control_flags(&self) -> ControlFlags {
        self.conn.control_flags()
    }

    /// Requests (`on`) or stops requesting (`!on`) the control messages in `flags`.
    pub fn set_control_message(&self, flags: ControlFlags, on: bool) -> Result<()> {
        self.conn.set_control_message(flags, on)
    }

    /// Reads one datagram payload into `buf`.
    ///
    /// Returns the payload length, the control message if any arrived, and the source address.
    /// When the transport delivers the IPv4 header it is stripped first.
    pub fn read_from(&self, buf: &mut [u8]) -> Result<(usize, Option<ControlMessage>, Option<IpAddr>)> {
        let delivers_header = self
            .conn
            .transport("read")?
            .delivers_ip_header();

        if !delivers_header {
            let (meta, cm) = self.conn.recv(buf)?;
            return Ok((meta.len.min(buf.len()), cm, meta.source));
        }

        let mut packet = vec![0u8; MAX_HEADER_LEN + buf.len()];
        let (meta, cm) = self.conn.recv(&mut packet)?;
        let (_, payload) = ipv4::slice_packet(&packet[..meta.len.min(packet.len())])
            .map_err(|e| self.conn.op_error("read", None, e.into()))?;
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok((n, cm, meta.source))
    }

    /// Writes `payload` to `dst` with the optional control message `cm`, returning the number of
    /// bytes sent.
    pub fn write_to(&self, payload: &[u8], cm: Option<&ControlMessage>, dst: IpAddr) -> Result<usize> {
        let transport = self.conn.transport("write")?;
        let control = self
            .conn
            .control_bytes(transport.family(), cm)
            .map_err(|e| self.conn.op_error("write", Some(dst), e))?;

        let sent = transport
            .send_msg(&[payload], &control, Some(dst), SendFlags::empty())
            .map_err(|e| self.conn.op_error("write", Some(dst), e.into()))?;
        trace!("sent {} bytes ({} ancillary) to {}", sent, control.len(), dst);
        Ok(sent)
    }
}
