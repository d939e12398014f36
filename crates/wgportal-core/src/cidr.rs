// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! CIDR arithmetic over IPv4 and IPv6 addresses.
//!
//! Network bounds and containment come from [`ipnetwork`]. Ordering and the
//! next-address increment work on a 16 byte big-endian form where IPv4
//! addresses occupy the last four bytes. Whether an address is IPv4 is
//! decided by its bit width (32), never by looking at the bytes.

use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnetwork::IpNetwork;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CidrError {
    #[error("invalid CIDR {input:?}: missing prefix length")]
    MissingPrefix { input: String },

    #[error("invalid CIDR {input:?}: {reason}")]
    Invalid { input: String, reason: String },

    #[error("prefix length {prefix} exceeds {width} bits")]
    PrefixTooLong { prefix: u8, width: u8 },
}

/// An address together with the prefix length of its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    net: IpNetwork,
}

impl Cidr {
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, CidrError> {
        let net = IpNetwork::new(addr, prefix)
            .map_err(|_| CidrError::PrefixTooLong { prefix, width: width_of(&addr) })?;
        Ok(Self { net })
    }

    /// Parse `addr/prefix`. A bare address is rejected.
    pub fn parse(input: &str) -> Result<Self, CidrError> {
        let input = input.trim();
        if !input.contains('/') {
            return Err(CidrError::MissingPrefix { input: input.to_string() });
        }
        let net = IpNetwork::from_str(input).map_err(|e| CidrError::Invalid {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { net })
    }

    pub fn addr(&self) -> IpAddr {
        self.net.ip()
    }

    pub fn prefix(&self) -> u8 {
        self.net.prefix()
    }

    /// Address width in bits: 32 or 128.
    pub fn bits(&self) -> u8 {
        width_of(&self.addr())
    }

    pub fn is_v4(&self) -> bool {
        self.net.is_ipv4()
    }

    /// The lowest address of the network, keeping the prefix.
    pub fn network(&self) -> Self {
        self.with_addr(self.net.network())
    }

    /// The highest address of the network. For IPv6 this is just the last
    /// address, there is no broadcast.
    pub fn broadcast(&self) -> Self {
        self.with_addr(self.net.broadcast())
    }

    /// Whether `addr` lies inside this network. Addresses of the other
    /// family are never contained.
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.net.contains(addr)
    }

    /// The next address, carrying from the last byte leftwards. `None` once
    /// the family's address space is exhausted.
    pub fn next(&self) -> Option<Self> {
        let mut bytes = to_bytes(&self.addr());
        let start = 16 - usize::from(self.bits() / 8);
        for i in (start..16).rev() {
            let (v, overflow) = bytes[i].overflowing_add(1);
            bytes[i] = v;
            if !overflow {
                return Some(self.with_addr(from_bytes(bytes, self.is_v4())));
            }
        }
        None
    }

    /// Same address, different prefix.
    pub fn with_prefix(&self, prefix: u8) -> Result<Self, CidrError> {
        Self::new(self.addr(), prefix)
    }

    pub fn same_addr(&self, other: &Cidr) -> bool {
        self.addr() == other.addr()
    }

    // `addr` is of our family, so the prefix always fits.
    fn with_addr(&self, addr: IpAddr) -> Self {
        Self { net: IpNetwork::new(addr, self.prefix()).unwrap_or(self.net) }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr(), self.prefix())
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// IPv4 sorts before IPv6, then by address bytes, then by prefix.
impl Ord for Cidr {
    fn cmp(&self, other: &Self) -> Ordering {
        (!self.is_v4(), to_bytes(&self.addr()), self.prefix()).cmp(&(
            !other.is_v4(),
            to_bytes(&other.addr()),
            other.prefix(),
        ))
    }
}

impl PartialOrd for Cidr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Parse a comma separated list of CIDRs, sorted ascending. An empty string
/// yields an empty list; any malformed element fails the whole parse.
pub fn parse_ip_address_string(s: &str) -> Result<Vec<Cidr>, CidrError> {
    let mut addrs = s
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Cidr::parse)
        .collect::<Result<Vec<_>, _>>()?;
    addrs.sort();
    Ok(addrs)
}

/// Join CIDRs into the comma separated form, keeping their order.
pub fn ip_addresses_to_string(addrs: &[Cidr]) -> String {
    addrs.iter().map(Cidr::to_string).collect::<Vec<_>>().join(",")
}

fn width_of(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn to_bytes(addr: &IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => {
            let mut bytes = [0u8; 16];
            bytes[12..].copy_from_slice(&v4.octets());
            bytes
        }
        IpAddr::V6(v6) => v6.octets(),
    }
}

fn from_bytes(bytes: [u8; 16], v4: bool) -> IpAddr {
    if v4 {
        IpAddr::V4(Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]))
    } else {
        IpAddr::V6(Ipv6Addr::from(bytes))
    }
}
