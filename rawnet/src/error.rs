// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;
use std::io;
use std::net::IpAddr;

use thiserror::Error;

/// Errors raised by socket option, control message and handler operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A header or message failed to encode or decode.
    #[error(transparent)]
    Wire(#[from] rawnet_wire::Error),
    /// The handler has no transport to operate on.
    #[error("invalid connection")]
    InvalidConnection,
    /// The platform has no native counterpart for the requested option or structure.
    #[error("operation not implemented on this platform")]
    OptionNotImplemented,
    /// An option value or native structure could not be encoded or decoded.
    #[error("invalid option value: {0}")]
    InvalidOptionValue(&'static str),
    /// A transport primitive failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A handler operation failed; wraps the underlying cause with operation context.
    #[error(transparent)]
    Op(#[from] OpError),
}

pub type Result<T> = core::result::Result<T, Error>;

/// The failure of a single handler operation, annotated with the operation name, the network and
/// the addresses involved.
#[derive(Debug)]
pub struct OpError {
    /// The operation that failed, such as `"read"` or `"write"`.
    pub op: &'static str,
    /// The network of the transport, such as `"ip4:icmp"`.
    pub net: String,
    /// The local address of the transport, if bound.
    pub local: Option<IpAddr>,
    /// The remote address of the operation, if any.
    pub addr: Option<IpAddr>,
    /// The underlying failure.
    pub cause: Box<Error>,
}

impl OpError {
    /// The underlying failure.
    #[inline]
    pub fn cause(&self) -> &Error {
        &self.cause
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.net)?;
        match (self.local, self.addr) {
            (Some(local), Some(addr)) => write!(f, " {}->{}", local, addr)?,
            (Some(local), None) => write!(f, " {}", local)?,
            (None, Some(addr)) => write!(f, " {}", addr)?,
            (None, None) => (),
        }
        write!(f, ": {}", self.cause)
    }
}

impl std::error::Error for OpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}
