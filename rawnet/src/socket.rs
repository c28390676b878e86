// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A raw IP socket for Unix-like systems.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::{io, mem, ptr};

use crate::platform::Family;
use crate::transport::{RecvFlags, RecvMeta, SendFlags, Transport};

/// A raw IP socket (`socket(AF_INET or AF_INET6, SOCK_RAW, protocol)`).
///
/// The socket is closed when dropped.
#[derive(Debug)]
pub struct RawSocket {
    fd: RawFd,
    family: Family,
    protocol: u8,
    network: String,
}

impl RawSocket {
    /// Opens a raw socket of `family` for the IP protocol numbered `protocol`.
    ///
    /// # Permissions
    ///
    /// Opening a raw socket requires elevated privileges on most systems (`CAP_NET_RAW` on
    /// Linux); otherwise `EPERM` or `EACCES` is returned.
    pub fn new(family: Family, protocol: u8) -> io::Result<RawSocket> {
        let domain = match family {
            Family::Ipv4 => libc::AF_INET,
            Family::Ipv6 => libc::AF_INET6,
        };

        match unsafe { libc::socket(domain, libc::SOCK_RAW, protocol as libc::c_int) } {
            ..=-1 => Err(io::Error::last_os_error()),
            fd => Ok(RawSocket {
                fd,
                family,
                protocol,
                network: network_name(family, protocol),
            }),
        }
    }

    /// The IP protocol number the socket was opened for.
    #[inline]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Binds the socket to the local address `addr`.
    pub fn bind(&self, addr: IpAddr) -> io::Result<()> {
        let (storage, len) = to_sockaddr(addr);
        match unsafe {
            libc::bind(
                self.fd,
                ptr::addr_of!(storage) as *const libc::sockaddr,
                len,
            )
        } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    /// Connects the socket to the remote address `addr`, fixing the destination of sends and
    /// filtering receives.
    pub fn connect(&self, addr: IpAddr) -> io::Result<()> {
        let (storage, len) = to_sockaddr(addr);
        match unsafe {
            libc::connect(
                self.fd,
                ptr::addr_of!(storage) as *const libc::sockaddr,
                len,
            )
        } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let mut fcntl_flags = match unsafe { libc::fcntl(self.fd, libc::F_GETFL, 0) } {
            ..=-1 => return Err(io::Error::last_os_error()),
            f => f,
        };

        if nonblocking {
            fcntl_flags |= libc::O_NONBLOCK;
        } else {
            fcntl_flags &= !libc::O_NONBLOCK;
        }

        match unsafe { libc::fcntl(self.fd, libc::F_SETFL, fcntl_flags) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

impl Transport for RawSocket {
    #[inline]
    fn network(&self) -> &str {
        &self.network
    }

    #[inline]
    fn family(&self) -> Family {
        self.family
    }

    fn local_addr(&self) -> Option<IpAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let res = unsafe {
            libc::getsockname(
                self.fd,
                ptr::addr_of_mut!(storage) as *mut libc::sockaddr,
                ptr::addr_of_mut!(len),
            )
        };
        if res != 0 {
            return None;
        }

        from_sockaddr(&storage).filter(|addr| !addr.is_unspecified())
    }

    #[inline]
    fn delivers_ip_header(&self) -> bool {
        self.family == Family::Ipv4
    }

    fn recv_msg(&self, buf: &mut [u8], control: &mut [u8], flags: RecvFlags) -> io::Result<RecvMeta> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = ptr::addr_of_mut!(storage) as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        msg.msg_iov = ptr::addr_of_mut!(iov);
        msg.msg_iovlen = 1;
        if !control.is_empty() {
            msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
            msg.msg_controllen = control.len() as _;
        }

        let len = match unsafe { libc::recvmsg(self.fd, ptr::addr_of_mut!(msg), flags.bits()) } {
            ..=-1 => return Err(io::Error::last_os_error()),
            len => len as usize,
        };

        let source = match msg.msg_namelen {
            0 => None,
            _ => from_sockaddr(&storage),
        };

        Ok(RecvMeta {
            len,
            control_len: if control.is_empty() {
                0
            } else {
                msg.msg_controllen as usize
            },
            source,
        })
    }

    fn send_msg(
        &self,
        bufs: &[&[u8]],
        control: &[u8],
        dst: Option<IpAddr>,
        flags: SendFlags,
    ) -> io::Result<usize> {
        let mut iovs: Vec<libc::iovec> = bufs
            .iter()
            .map(|b| libc::iovec {
                iov_base: b.as_ptr() as *mut libc::c_void,
                iov_len: b.len(),
            })
            .collect();

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        let mut dst_addr = dst.map(to_sockaddr);
        if let Some((addr, len)) = dst_addr.as_mut() {
            msg.msg_name = ptr::addr_of_mut!(*addr) as *mut libc::c_void;
            msg.msg_namelen = *len;
        }
        msg.msg_iov = iovs.as_mut_ptr();
        msg.msg_iovlen = iovs.len() as _;
        if !control.is_empty() {
            msg.msg_control = control.as_ptr() as *mut libc::c_void;
            msg.msg_controllen = control.len() as _;
        }

        match unsafe { libc::sendmsg(self.fd, ptr::addr_of!(msg), flags.bits()) } {
            ..=-1 => Err(io::Error::last_os_error()),
            sent => Ok(sent as usize),
        }
    }

    fn get_option(&self, level: i32, name: i32, value: &mut [u8]) -> io::Result<usize> {
        let mut len = value.len() as libc::socklen_t;
        if unsafe {
            libc::getsockopt(
                self.fd,
                level,
                name,
                value.as_mut_ptr() as *mut libc::c_void,
                ptr::addr_of_mut!(len),
            ) != 0
        } {
            return Err(io::Error::last_os_error());
        }

        Ok(len as usize)
    }

    fn set_option(&self, level: i32, name: i32, value: &[u8]) -> io::Result<()> {
        if unsafe {
            libc::setsockopt(
                self.fd,
                level,
                name,
                value.as_ptr() as *const libc::c_void,
                value.len() as libc::socklen_t,
            ) != 0
        } {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

impl AsRawFd for RawSocket {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

fn network_name(family: Family, protocol: u8) -> String {
    match (family, protocol) {
        (Family::Ipv4, 1) => "ip4:icmp".into(),
        (Family::Ipv6, 58) => "ip6:ipv6-icmp".into(),
        (Family::Ipv4, proto) => format!("ip4:{}", proto),
        (Family::Ipv6, proto) => format!("ip6:{}", proto),
    }
}

fn to_sockaddr(addr: IpAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        IpAddr::V4(addr) => {
            let sin = ptr::addr_of_mut!(storage) as *mut libc::sockaddr_in;
            unsafe {
                (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sin).sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(addr.octets()),
                };
                #[cfg(any(
                    target_os = "freebsd",
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "openbsd",
                    target_os = "netbsd",
                    target_os = "dragonfly"
                ))]
                {
                    (*sin).sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
                }
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        IpAddr::V6(addr) => {
            let sin6 = ptr::addr_of_mut!(storage) as *mut libc::sockaddr_in6;
            unsafe {
                (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sin6).sin6_addr = libc::in6_addr {
                    s6_addr: addr.octets(),
                };
                #[cfg(any(
                    target_os = "freebsd",
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "openbsd",
                    target_os = "netbsd",
                    target_os = "dragonfly"
                ))]
                {
                    (*sin6).sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
                }
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };

    (storage, len as libc::socklen_t)
}

fn from_sockaddr(storage: &libc::sockaddr_storage) -> Option<IpAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Some(IpAddr::V4(Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes())))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Some(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockaddr_conversion() {
        for addr in [
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 33)),
            IpAddr::V6("2001:db8::33".parse().unwrap()),
        ] {
            let (storage, len) = to_sockaddr(addr);
            assert!(len as usize <= mem::size_of::<libc::sockaddr_storage>());
            assert_eq!(from_sockaddr(&storage), Some(addr));
        }
    }

    #[test]
    fn network_names() {
        assert_eq!(network_name(Family::Ipv4, 1), "ip4:icmp");
        assert_eq!(network_name(Family::Ipv6, 58), "ip6:ipv6-icmp");
        assert_eq!(network_name(Family::Ipv4, 89), "ip4:89");
    }
}
