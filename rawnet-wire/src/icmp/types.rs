// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use core::fmt;

use crate::error::{Error, Result};

/// The IP protocol an ICMP message is embedded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// ICMP for IPv4 (IANA protocol number 1).
    Icmpv4,
    /// ICMP for IPv6 (IANA protocol number 58).
    Icmpv6,
}

impl Protocol {
    /// The IANA protocol number of the protocol.
    #[inline]
    pub const fn number(self) -> u8 {
        match self {
            Protocol::Icmpv4 => 1,
            Protocol::Icmpv6 => 58,
        }
    }

    /// Looks up the ICMP protocol with IANA protocol number `number`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProtocol`] for any number other than 1 or 58.
    #[inline]
    pub fn from_number(number: u8) -> Result<Self> {
        match number {
            1 => Ok(Protocol::Icmpv4),
            58 => Ok(Protocol::Icmpv6),
            _ => Err(Error::InvalidProtocol),
        }
    }
}

impl TryFrom<u8> for Protocol {
    type Error = Error;

    #[inline]
    fn try_from(value: u8) -> Result<Self> {
        Self::from_number(value)
    }
}

macro_rules! icmp_type {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal, $text:literal;)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u8);

        impl $name {
            $(
                $(#[$vmeta])*
                pub const $variant: Self = Self($value);
            )*

            /// The registered name of the message type, if it has one.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some($text),)*
                    _ => None,
                }
            }
        }

        impl From<u8> for $name {
            #[inline]
            fn from(value: u8) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u8 {
            #[inline]
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, "unknown ({})", self.0),
                }
            }
        }
    };
}

icmp_type! {
    /// An ICMPv4 message type.
    Icmpv4Type {
        ECHO_REPLY = 0, "echo reply";
        DESTINATION_UNREACHABLE = 3, "destination unreachable";
        REDIRECT = 5, "redirect";
        ECHO = 8, "echo";
        ROUTER_ADVERTISEMENT = 9, "router advertisement";
        ROUTER_SOLICITATION = 10, "router solicitation";
        TIME_EXCEEDED = 11, "time exceeded";
        PARAMETER_PROBLEM = 12, "parameter problem";
        TIMESTAMP = 13, "timestamp";
        TIMESTAMP_REPLY = 14, "timestamp reply";
        PHOTURIS = 40, "photuris";
        EXTENDED_ECHO_REQUEST = 42, "extended echo request";
        EXTENDED_ECHO_REPLY = 43, "extended echo reply";
    }
}

icmp_type! {
    /// An ICMPv6 message type.
    Icmpv6Type {
        DESTINATION_UNREACHABLE = 1, "destination unreachable";
        PACKET_TOO_BIG = 2, "packet too big";
        TIME_EXCEEDED = 3, "time exceeded";
        PARAMETER_PROBLEM = 4, "parameter problem";
        ECHO_REQUEST = 128, "echo request";
        ECHO_REPLY = 129, "echo reply";
        MULTICAST_LISTENER_QUERY = 130, "multicast listener query";
        MULTICAST_LISTENER_REPORT = 131, "multicast listener report";
        MULTICAST_LISTENER_DONE = 132, "multicast listener done";
        ROUTER_SOLICITATION = 133, "router solicitation";
        ROUTER_ADVERTISEMENT = 134, "router advertisement";
        NEIGHBOR_SOLICITATION = 135, "neighbor solicitation";
        NEIGHBOR_ADVERTISEMENT = 136, "neighbor advertisement";
        REDIRECT = 137, "redirect";
        ROUTER_RENUMBERING = 138, "router renumbering";
        NODE_INFORMATION_QUERY = 139, "icmp node information query";
        NODE_INFORMATION_RESPONSE = 140, "icmp node information response";
        VERSION2_MULTICAST_LISTENER_REPORT = 143, "version 2 multicast listener report";
        EXTENDED_ECHO_REQUEST = 160, "extended echo request";
        EXTENDED_ECHO_REPLY = 161, "extended echo reply";
    }
}

/// The type of an ICMP message, tagged with the protocol it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    V4(Icmpv4Type),
    V6(Icmpv6Type),
}

impl Type {
    /// Builds the type numbered `value` under `protocol`.
    #[inline]
    pub fn new(protocol: Protocol, value: u8) -> Self {
        match protocol {
            Protocol::Icmpv4 => Type::V4(Icmpv4Type(value)),
            Protocol::Icmpv6 => Type::V6(Icmpv6Type(value)),
        }
    }

    /// The protocol the message type belongs to.
    #[inline]
    pub fn protocol(self) -> Protocol {
        match self {
            Type::V4(_) => Protocol::Icmpv4,
            Type::V6(_) => Protocol::Icmpv6,
        }
    }

    /// The on-the-wire value of the type field.
    #[inline]
    pub fn value(self) -> u8 {
        match self {
            Type::V4(t) => t.0,
            Type::V6(t) => t.0,
        }
    }
}

impl From<Icmpv4Type> for Type {
    #[inline]
    fn from(value: Icmpv4Type) -> Self {
        Type::V4(value)
    }
}

impl From<Icmpv6Type> for Type {
    #[inline]
    fn from(value: Icmpv6Type) -> Self {
        Type::V6(value)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::V4(t) => fmt::Display::fmt(t, f),
            Type::V6(t) => fmt::Display::fmt(t, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_numbers() {
        assert_eq!(Protocol::from_number(1), Ok(Protocol::Icmpv4));
        assert_eq!(Protocol::try_from(58), Ok(Protocol::Icmpv6));
        assert_eq!(Protocol::from_number(6), Err(Error::InvalidProtocol));
        assert_eq!(Protocol::Icmpv6.number(), 58);
    }

    #[test]
    fn type_names() {
        assert_eq!(Icmpv4Type::TIME_EXCEEDED.to_string(), "time exceeded");
        assert_eq!(Icmpv6Type(255).to_string(), "unknown (255)");
        let t = Type::new(Protocol::Icmpv6, 128);
        assert_eq!(t, Type::V6(Icmpv6Type::ECHO_REQUEST));
        assert_eq!(t.protocol(), Protocol::Icmpv6);
        assert_eq!(t.value(), 128);
    }
}
