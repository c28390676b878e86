// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Platform selection.
//!
//! A [`Platform`] bundles everything that differs between kernels: the structure layouts, the
//! socket option and control message tables for each address family, the ancillary record
//! framing and the byte order of raw IPv4 header fields. It is built once and shared by reference
//! with every handler.

use std::fmt;
use std::net::IpAddr;

use log::debug;
use once_cell::sync::Lazy;
use rawnet_wire::ipv4::HeaderFieldOrder;

use crate::abi::{Abi, BsdAbi, LinuxAbi, UnsupportedAbi, WindowsAbi};
use crate::control::{CmsgLayout, ControlTable};
use crate::options::OptionTable;

/// A kernel family with a distinct socket option ABI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    FreeBsd,
    Darwin,
    Windows,
    /// Any other target; every option and control message fails as not implemented.
    Unsupported,
}

impl Os {
    /// The kernel family of the compile target.
    pub const fn current() -> Os {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            Os::Linux
        } else if cfg!(target_os = "freebsd") {
            Os::FreeBsd
        } else if cfg!(any(target_os = "macos", target_os = "ios")) {
            Os::Darwin
        } else if cfg!(windows) {
            Os::Windows
        } else {
            Os::Unsupported
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Os::Linux => "linux",
            Os::FreeBsd => "freebsd",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
            Os::Unsupported => "unsupported",
        })
    }
}

/// The pointer width of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    pub const fn current() -> PointerWidth {
        if cfg!(target_pointer_width = "64") {
            PointerWidth::Bits64
        } else {
            PointerWidth::Bits32
        }
    }

    /// The width in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }
}

/// An IP address family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    /// The family of `addr`.
    #[inline]
    pub fn of(addr: &IpAddr) -> Family {
        match addr {
            IpAddr::V4(_) => Family::Ipv4,
            IpAddr::V6(_) => Family::Ipv6,
        }
    }
}

/// The option, control message and structure layout rules of one kernel.
#[derive(Debug)]
pub struct Platform {
    os: Os,
    pointer_width: PointerWidth,
    abi: Box<dyn Abi>,
    ipv4_options: OptionTable,
    ipv6_options: OptionTable,
    ipv4_control: ControlTable,
    ipv6_control: ControlTable,
    cmsg: CmsgLayout,
    header_order: HeaderFieldOrder,
    freebsd32_compat: bool,
}

static CURRENT: Lazy<Platform> = Lazy::new(|| {
    let platform = Platform::new(Os::current(), PointerWidth::current())
        .with_freebsd32_compat(detect_freebsd32_compat());
    debug!(
        "selected platform {} ({} ABI, {:?}, freebsd32 compat {})",
        platform.os,
        platform.abi.name(),
        platform.pointer_width,
        platform.freebsd32_compat
    );
    platform
});

impl Platform {
    /// Builds the configuration for `os` with the given process pointer width.
    pub fn new(os: Os, pointer_width: PointerWidth) -> Platform {
        let abi: Box<dyn Abi> = match os {
            Os::Linux => Box::new(LinuxAbi { pointer_width }),
            Os::FreeBsd => Box::new(BsdAbi::freebsd(pointer_width)),
            Os::Darwin => Box::new(BsdAbi::darwin()),
            Os::Windows => Box::new(WindowsAbi),
            Os::Unsupported => Box::new(UnsupportedAbi),
        };

        let header_order = match os {
            Os::Darwin => HeaderFieldOrder::Host,
            _ => HeaderFieldOrder::Network,
        };

        Platform {
            ipv4_options: OptionTable::new(os, Family::Ipv4, abi.as_ref()),
            ipv6_options: OptionTable::new(os, Family::Ipv6, abi.as_ref()),
            ipv4_control: ControlTable::new(os, Family::Ipv4, abi.as_ref()),
            ipv6_control: ControlTable::new(os, Family::Ipv6, abi.as_ref()),
            cmsg: CmsgLayout::new(os, pointer_width),
            os,
            pointer_width,
            abi,
            header_order,
            freebsd32_compat: false,
        }
    }

    /// The configuration of the running host, built on first use.
    #[inline]
    pub fn current() -> &'static Platform {
        &CURRENT
    }

    /// Enables realignment of ancillary data written by a 64-bit FreeBSD kernel for a 32-bit
    /// process. Ignored on any other OS and pointer width combination.
    pub fn with_freebsd32_compat(mut self, enabled: bool) -> Platform {
        self.freebsd32_compat =
            enabled && self.os == Os::FreeBsd && self.pointer_width == PointerWidth::Bits32;
        if self.freebsd32_compat {
            debug!("32-bit process on 64-bit FreeBSD kernel, realigning control messages");
        }
        self
    }

    #[inline]
    pub fn os(&self) -> Os {
        self.os
    }

    #[inline]
    pub fn pointer_width(&self) -> PointerWidth {
        self.pointer_width
    }

    /// The structure layouts of the platform.
    #[inline]
    pub fn abi(&self) -> &dyn Abi {
        self.abi.as_ref()
    }

    /// The socket option table for `family`.
    #[inline]
    pub fn options(&self, family: Family) -> &OptionTable {
        match family {
            Family::Ipv4 => &self.ipv4_options,
            Family::Ipv6 => &self.ipv6_options,
        }
    }

    /// The control message table for `family`.
    #[inline]
    pub fn control(&self, family: Family) -> &ControlTable {
        match family {
            Family::Ipv4 => &self.ipv4_control,
            Family::Ipv6 => &self.ipv6_control,
        }
    }

    /// The framing of ancillary data records.
    #[inline]
    pub fn cmsg_layout(&self) -> CmsgLayout {
        self.cmsg
    }

    /// The byte order of the IPv4 total length and fragment offset on raw sockets.
    #[inline]
    pub fn header_order(&self) -> HeaderFieldOrder {
        self.header_order
    }

    /// Whether received ancillary data must be realigned before parsing.
    #[inline]
    pub fn freebsd32_compat(&self) -> bool {
        self.freebsd32_compat
    }
}

#[cfg(all(target_os = "freebsd", target_arch = "x86"))]
fn detect_freebsd32_compat() -> bool {
    use std::ptr;

    let name = b"kern.supported_archs\0";
    let mut archs = [0u8; 64];
    let mut len = archs.len();
    let res = unsafe {
        libc::sysctlbyname(
            name.as_ptr() as *const libc::c_char,
            archs.as_mut_ptr() as *mut libc::c_void,
            ptr::addr_of_mut!(len),
            ptr::null(),
            0,
        )
    };
    if res != 0 {
        return false;
    }

    let archs = &archs[..len.min(archs.len())];
    let end = archs.iter().position(|&b| b == 0).unwrap_or(archs.len());
    archs[..end]
        .split(|&b| b == b' ')
        .any(|arch| arch == b"amd64")
}

#[cfg(not(all(target_os = "freebsd", target_arch = "x86")))]
fn detect_freebsd32_compat() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlFlags;
    use crate::options::SocketOption;

    #[test]
    fn current_matches_target() {
        let platform = Platform::current();
        assert_eq!(platform.os(), Os::current());
        assert_eq!(platform.pointer_width(), PointerWidth::current());
        assert!(std::ptr::eq(platform, Platform::current()));
    }

    #[test]
    fn darwin_uses_host_order_headers() {
        assert_eq!(
            Platform::new(Os::Darwin, PointerWidth::Bits64).header_order(),
            HeaderFieldOrder::Host
        );
        assert_eq!(
            Platform::new(Os::Linux, PointerWidth::Bits64).header_order(),
            HeaderFieldOrder::Network
        );
    }

    #[test]
    fn freebsd32_compat_only_for_32_bit_freebsd() {
        assert!(Platform::new(Os::FreeBsd, PointerWidth::Bits32)
            .with_freebsd32_compat(true)
            .freebsd32_compat());
        assert!(!Platform::new(Os::FreeBsd, PointerWidth::Bits64)
            .with_freebsd32_compat(true)
            .freebsd32_compat());
        assert!(!Platform::new(Os::Linux, PointerWidth::Bits32)
            .with_freebsd32_compat(true)
            .freebsd32_compat());
    }

    #[test]
    fn unsupported_platform_is_empty() {
        let platform = Platform::new(Os::Unsupported, PointerWidth::current());
        for family in [Family::Ipv4, Family::Ipv6] {
            assert!(platform.options(family).is_empty());
            assert!(platform.control(family).is_empty());
        }
        assert!(platform
            .options(Family::Ipv6)
            .get(SocketOption::HopLimit)
            .is_none());
        assert!(platform
            .control(Family::Ipv6)
            .receive_entries(ControlFlags::all())
            .next()
            .is_none());
    }
}
