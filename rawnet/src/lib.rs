// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Portable raw IP sockets.
//!
//! This crate sends and receives ICMP messages and raw IPv4 packets with control over protocol
//! headers and per-datagram ancillary data, on top of any [`Transport`]. The kernel-specific parts
//! (socket option numbers, the byte layout of option and ancillary structures, the framing of
//! ancillary records) are captured by a [`Platform`], chosen once for the running host and shared
//! by every handler.
//!
//! Wire formats live in the [`rawnet_wire`] crate, which is re-exported as [`wire`].
//!
//! ```no_run
//! # #[cfg(unix)]
//! # fn main() -> Result<(), rawnet::Error> {
//! use rawnet::wire::icmp::{Echo, Icmpv4Type, Message, MessageBody};
//! use rawnet::{ControlFlags, Family, PayloadHandler, RawSocket};
//!
//! let handler = PayloadHandler::new(RawSocket::new(Family::Ipv4, 1)?);
//! handler.set_control_message(ControlFlags::HOP_LIMIT | ControlFlags::DST, true)?;
//!
//! let echo = Message {
//!     typ: Icmpv4Type::ECHO.into(),
//!     code: 0,
//!     checksum: 0,
//!     body: Some(MessageBody::Echo(Echo { id: 1, seq: 1, data: b"ping".to_vec() })),
//! };
//! handler.write_to(&echo.marshal(None)?, None, "192.0.2.1".parse().unwrap())?;
//!
//! let mut buf = [0u8; 1500];
//! let (n, cm, src) = handler.read_from(&mut buf)?;
//! let reply = rawnet::wire::icmp::parse_message(1, &buf[..n])?;
//! println!("{:?} from {:?} ({:?})", reply.typ, src, cm);
//! # Ok(())
//! # }
//! # #[cfg(not(unix))]
//! # fn main() {}
//! ```

#![allow(clippy::len_without_is_empty)]

pub mod abi;
pub mod control;
mod error;
mod handler;
pub mod options;
pub mod platform;
#[cfg(unix)]
mod socket;
mod transport;

pub use rawnet_wire as wire;

pub use abi::{BpfInstruction, IcmpFilter};
pub use control::{ControlFlags, ControlMessage};
pub use error::{Error, OpError, Result};
pub use handler::{PacketHandler, PayloadHandler, MAX_HEADER_LEN};
pub use options::{SocketOption, SocketOptions};
pub use platform::{Family, Os, Platform, PointerWidth};
#[cfg(unix)]
pub use socket::RawSocket;
pub use transport::{RecvFlags, RecvMeta, SendFlags, Transport};
