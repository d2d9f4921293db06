//! IPv4 CIDR parsing for routing config.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use keel_core::CreatorError;

/// An IPv4 network with host bits cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Net {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Net {
    pub fn network(&self) -> Ipv4Addr { self.network }
    pub fn prefix(&self) -> u8 { self.prefix }

    pub fn mask(&self) -> Ipv4Addr {
        let bits = if self.prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(self.prefix)) };
        Ipv4Addr::from(bits)
    }

    /// OpenVPN `iroute <network> <netmask>` line.
    pub fn iroute(&self) -> String {
        format!("iroute {} {}", self.network, self.mask())
    }
}

impl FromStr for Ipv4Net {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(|| format!("invalid CIDR address: {}", s))?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| format!("invalid CIDR address: {}", s))?;
        let prefix: u8 = prefix.parse().ok().filter(|p| *p <= 32).ok_or_else(|| format!("invalid CIDR address: {}", s))?;
        let mut net = Self { network: addr, prefix };
        net.network = Ipv4Addr::from(u32::from(addr) & u32::from(net.mask()));
        Ok(net)
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.network, self.prefix) }
}

/// First CIDR block of `blocks`, parsed. `field` names the input in errors.
pub fn first_block(field: &str, blocks: &[String]) -> Result<Ipv4Net, CreatorError> {
    let first = blocks.first().ok_or_else(|| CreatorError::invalid(field, "must contain at least one entry"))?;
    first.parse().map_err(|e: String| CreatorError::invalid(field, e))
}
