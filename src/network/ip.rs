//! Address values of network objects
//!
//! Host objects hold addresses as text, usually in CIDR notation. These
//! helpers turn them into the forms ifconfig(8) and rc.conf(5) expect.

use crate::error::{Error, Result};
use ipnet::{Ipv4Net, Ipv6Net};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Default prefix for IPv6 host objects given without one
const DEFAULT_IPV6_PREFIX: u8 = 64;

/// A static IPv4 interface address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Assignment {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl Ipv4Assignment {
    /// ifconfig(8) arguments after the interface name
    pub fn ifconfig_args(&self) -> String {
        format!("inet {} netmask {}", self.address, self.netmask)
    }
}

/// Parse an IPv4 host object (`10.0.0.5/24`, or a bare address as /32)
pub fn parse_ipv4_assignment(value: &str) -> Result<Ipv4Assignment> {
    let value = value.trim();
    let net: Ipv4Net = if value.contains('/') {
        value
            .parse()
            .map_err(|e| Error::InvalidValue(format!("invalid IPv4 CIDR '{}': {}", value, e)))?
    } else {
        let addr: Ipv4Addr = value
            .parse()
            .map_err(|e| Error::InvalidValue(format!("invalid IPv4 address '{}': {}", value, e)))?;
        Ipv4Net::new(addr, 32)
            .map_err(|e| Error::InvalidValue(format!("invalid IPv4 prefix: {}", e)))?
    };

    Ok(Ipv4Assignment {
        address: net.addr(),
        netmask: net.netmask(),
    })
}

/// Parse an IPv6 host object (`2001:db8::5/64`, or a bare address as /64)
pub fn parse_ipv6_assignment(value: &str) -> Result<Ipv6Net> {
    let value = value.trim();
    if value.contains('/') {
        value
            .parse()
            .map_err(|e| Error::InvalidValue(format!("invalid IPv6 CIDR '{}': {}", value, e)))
    } else {
        let addr: Ipv6Addr = value
            .parse()
            .map_err(|e| Error::InvalidValue(format!("invalid IPv6 address '{}': {}", value, e)))?;
        Ipv6Net::new(addr, DEFAULT_IPV6_PREFIX)
            .map_err(|e| Error::InvalidValue(format!("invalid IPv6 prefix: {}", e)))
    }
}

/// Parse an IPv4 gateway object
///
/// A gateway stored with a prefix (`10.0.0.1/24`) is accepted and the
/// prefix dropped.
pub fn parse_ipv4_gateway(value: &str) -> Result<Ipv4Addr> {
    let host = value.trim().split('/').next().unwrap_or_default();
    host.parse()
        .map_err(|e| Error::InvalidValue(format!("invalid IPv4 gateway '{}': {}", value.trim(), e)))
}

/// Parse an IPv6 gateway object
pub fn parse_ipv6_gateway(value: &str) -> Result<Ipv6Addr> {
    let host = value.trim().split('/').next().unwrap_or_default();
    host.parse()
        .map_err(|e| Error::InvalidValue(format!("invalid IPv6 gateway '{}': {}", value.trim(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_cidr_split() {
        let a = parse_ipv4_assignment("10.0.1.10/24").unwrap();
        assert_eq!(a.address, Ipv4Addr::new(10, 0, 1, 10));
        assert_eq!(a.netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(a.ifconfig_args(), "inet 10.0.1.10 netmask 255.255.255.0");
    }

    #[test]
    fn test_ipv4_bare_is_host_route() {
        let a = parse_ipv4_assignment(" 192.168.1.7 ").unwrap();
        assert_eq!(a.netmask, Ipv4Addr::new(255, 255, 255, 255));
    }

    #[test]
    fn test_ipv4_rejects_garbage() {
        assert!(parse_ipv4_assignment("10.0.1/24").is_err());
        assert!(parse_ipv4_assignment("fe80::1").is_err());
    }

    #[test]
    fn test_ipv6_forms() {
        let net = parse_ipv6_assignment("2001:db8::5/48").unwrap();
        assert_eq!(net.to_string(), "2001:db8::5/48");

        let net = parse_ipv6_assignment("2001:db8::5").unwrap();
        assert_eq!(net.to_string(), "2001:db8::5/64");
    }

    #[test]
    fn test_gateways() {
        assert_eq!(
            parse_ipv4_gateway("10.0.0.1/24").unwrap(),
            Ipv4Addr::new(10, 0, 0, 1)
        );
        assert!(parse_ipv4_gateway("fe80::1").is_err());
        assert_eq!(
            parse_ipv6_gateway("fe80::1").unwrap(),
            "fe80::1".parse::<Ipv6Addr>().unwrap()
        );
    }
}
