// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Wire codecs for raw IP sockets.
//!
//! This crate encodes and decodes ICMPv4 and ICMPv6 messages (including RFC 4884 multi-part
//! bodies and their extension objects) and IPv4 headers. It performs no I/O and holds no
//! platform knowledge beyond the [`ipv4::HeaderFieldOrder`] a caller passes in.

#![forbid(unsafe_code)]
#![allow(clippy::len_without_is_empty)]

pub mod error;
pub mod icmp;
pub mod ipv4;
pub mod utils;

pub use error::{Error, Result};
