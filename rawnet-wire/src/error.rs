// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use thiserror::Error;

/// Errors raised while encoding or decoding ICMP messages and IPv4 headers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// The bytes were shorter than the fixed portion of the message or body.
    #[error("message too short")]
    MessageTooShort,
    /// An extension is not allowed in the body it was attached to.
    #[error("invalid extension")]
    InvalidExtension,
    /// An extension object declared a length that does not fit the extension structure.
    #[error("malformed extension: {0}")]
    MalformedExtension(&'static str),
    /// The embedding protocol was neither ICMPv4 nor ICMPv6.
    #[error("invalid protocol")]
    InvalidProtocol,
    /// A message, body or pseudo-header field holds a value that cannot be encoded.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    /// The buffer was shorter than the minimum IPv4 header.
    #[error("header too short")]
    HeaderTooShort,
    /// The buffer was shorter than the header length the header declared.
    #[error("extension header too short")]
    ExtHeaderTooShort,
    /// A header field holds a value that cannot be encoded.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
    /// A required address field was left unspecified.
    #[error("missing address")]
    MissingAddress,
}

pub type Result<T> = core::result::Result<T, Error>;
