// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The raw socket primitives handlers are built on.

use std::io;
use std::net::IpAddr;

use bitflags::bitflags;

use crate::platform::Family;

bitflags! {
    /// Flags for [`Transport::send_msg`]. The values are shared by every supported platform.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SendFlags: i32 {
        const OOB = 0x01;
        const DONT_ROUTE = 0x04;
    }
}

bitflags! {
    /// Flags for [`Transport::recv_msg`]. The values are shared by every supported platform.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RecvFlags: i32 {
        const OOB = 0x01;
        const PEEK = 0x02;
    }
}

/// The outcome of a single receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecvMeta {
    /// The number of datagram bytes written to the buffer.
    pub len: usize,
    /// The number of ancillary bytes written to the control buffer.
    pub control_len: usize,
    /// The address the datagram came from.
    pub source: Option<IpAddr>,
}

/// A raw IP socket.
///
/// Implementations perform blocking I/O and report failures as [`io::Error`]. A transport is used
/// through shared references, so a handler may read and write from different threads at once.
pub trait Transport {
    /// The network of the socket, such as `"ip4:icmp"` or `"ip6:58"`.
    fn network(&self) -> &str;

    /// The address family of the socket.
    fn family(&self) -> Family;

    /// The local address the socket is bound to, if any.
    fn local_addr(&self) -> Option<IpAddr>;

    /// Whether received datagrams begin with their IPv4 header.
    ///
    /// This holds for IPv4 raw sockets on most kernels, even without `IP_HDRINCL`.
    fn delivers_ip_header(&self) -> bool {
        false
    }

    /// Receives one datagram into `buf` and its ancillary data into `control`.
    fn recv_msg(&self, buf: &mut [u8], control: &mut [u8], flags: RecvFlags) -> io::Result<RecvMeta>;

    /// Sends the concatenation of `bufs` as one datagram with the ancillary data `control`.
    ///
    /// `dst` may be omitted on a connected socket.
    fn send_msg(
        &self,
        bufs: &[&[u8]],
        control: &[u8],
        dst: Option<IpAddr>,
        flags: SendFlags,
    ) -> io::Result<usize>;

    /// Reads the socket option `(level, name)` into `value`, returning the length written.
    fn get_option(&self, level: i32, name: i32, value: &mut [u8]) -> io::Result<usize>;

    /// Writes the socket option `(level, name)`.
    fn set_option(&self, level: i32, name: i32, value: &[u8]) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &T {
    #[inline]
    fn network(&self) -> &str {
        (**self).network()
    }

    #[inline]
    fn family(&self) -> Family {
        (**self).family()
    }

    #[inline]
    fn local_addr(&self) -> Option<IpAddr> {
        (**self).local_addr()
    }

    #[inline]
    fn delivers_ip_header(&self) -> bool {
        (**self).delivers_ip_header()
    }

    #[inline]
    fn recv_msg(&self, buf: &mut [u8], control: &mut [u8], flags: RecvFlags) -> io::Result<RecvMeta> {
        (**self).recv_msg(buf, control, flags)
    }

    #[inline]
    fn send_msg(
        &self,
        bufs: &[&[u8]],
        control: &[u8],
        dst: Option<IpAddr>,
        flags: SendFlags,
    ) -> io::Result<usize> {
        (**self).send_msg(bufs, control, dst, flags)
    }

    #[inline]
    fn get_option(&self, level: i32, name: i32, value: &mut [u8]) -> io::Result<usize> {
        (**self).get_option(level, name, value)
    }

    #[inline]
    fn set_option(&self, level: i32, name: i32, value: &[u8]) -> io::Result<()> {
        (**self).set_option(level, name, value)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn flags_match_libc() {
        assert_eq!(SendFlags::OOB.bits(), libc::MSG_OOB);
        assert_eq!(SendFlags::DONT_ROUTE.bits(), libc::MSG_DONTROUTE);
        assert_eq!(RecvFlags::PEEK.bits(), libc::MSG_PEEK);
    }
}
