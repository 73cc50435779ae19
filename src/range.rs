use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::Error;

// Ranges wider than 2^32 addresses are rejected so capacity always fits the
// metrics gauges.
const MAX_HOST_BITS: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl From<&IpAddr> for AddressFamily {
    fn from(addr: &IpAddr) -> AddressFamily {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "v4"),
            AddressFamily::V6 => write!(f, "v6"),
        }
    }
}

/// A contiguous block of addresses given by a CIDR prefix.
///
/// Every address of the block is usable. The addresses handed out here are
/// virtual load-balancer addresses, not interface addresses, so the network
/// and broadcast endpoints are not reserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange {
    cidr: IpNet,
}

impl AddressRange {
    pub fn new(cidr: IpNet) -> Result<AddressRange, Error> {
        if let IpNet::V6(c) = cidr {
            if 128 - c.prefix_len() > MAX_HOST_BITS {
                return Err(Error::InvalidCidr(cidr.to_string()));
            }
        }
        Ok(AddressRange { cidr })
    }

    pub fn cidr(&self) -> &IpNet {
        &self.cidr
    }

    pub fn family(&self) -> AddressFamily {
        match self.cidr {
            IpNet::V4(_) => AddressFamily::V4,
            IpNet::V6(_) => AddressFamily::V6,
        }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.cidr.contains(addr)
    }

    pub fn size(&self) -> u128 {
        let host_bits = match self.cidr {
            IpNet::V4(c) => 32 - c.prefix_len(),
            IpNet::V6(c) => 128 - c.prefix_len(),
        };
        1u128 << host_bits
    }

    /// The address at `index` counted from the network address, in ascending
    /// numeric order.
    pub fn addr_at(&self, index: u128) -> Option<IpAddr> {
        if index >= self.size() {
            return None;
        }
        Some(from_bits(
            self.family(),
            addr_bits(&self.cidr.network()) + index,
        ))
    }

    pub fn index_of(&self, addr: &IpAddr) -> Option<u128> {
        if !self.contains(addr) {
            return None;
        }
        Some(addr_bits(addr) - addr_bits(&self.cidr.network()))
    }

    pub fn iter(&self) -> AddressRangeIter<'_> {
        AddressRangeIter {
            range: self,
            next: 0,
        }
    }
}

impl FromStr for AddressRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<AddressRange, Error> {
        let cidr = IpNet::from_str(s).map_err(|_| Error::InvalidCidr(s.to_string()))?;
        AddressRange::new(cidr)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cidr)
    }
}

#[derive(Debug)]
pub struct AddressRangeIter<'a> {
    range: &'a AddressRange,
    next: u128,
}

impl Iterator for AddressRangeIter<'_> {
    type Item = IpAddr;

    fn next(&mut self) -> Option<IpAddr> {
        let addr = self.range.addr_at(self.next)?;
        self.next += 1;
        Some(addr)
    }
}

fn addr_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u32::from_be_bytes(a.octets()) as u128,
        IpAddr::V6(a) => u128::from_be_bytes(a.octets()),
    }
}

fn from_bits(family: AddressFamily, bits: u128) -> IpAddr {
    match family {
        AddressFamily::V4 => IpAddr::V4(Ipv4Addr::from((bits as u32).to_be_bytes())),
        AddressFamily::V6 => IpAddr::V6(Ipv6Addr::from(bits.to_be_bytes())),
    }
}
