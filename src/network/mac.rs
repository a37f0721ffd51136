//! MAC addresses for jail epairs

use crate::error::{Error, Result};
use rand::RngCore;
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Random locally administered unicast address
    pub fn random_local() -> Self {
        let mut octets = [0u8; 6];
        rand::rng().fill_bytes(&mut octets);
        octets[0] &= 0xFE;
        octets[0] |= 0x02;
        Self(octets)
    }

    /// The address one below this one
    ///
    /// Used on the host side of an epair while the jail side carries the
    /// real address, so the two legs never share a MAC. Wraps around at zero.
    pub fn previous(&self) -> Self {
        let [a, b, c, d, e, f] = self.0;
        let value = u64::from_be_bytes([0, 0, a, b, c, d, e, f]);
        let prev = value.wrapping_sub(1) & 0xFFFF_FFFF_FFFF;
        let bytes = prev.to_be_bytes();
        Self([bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]])
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(Error::InvalidValue(format!("invalid MAC address '{}'", s)));
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(Error::InvalidValue(format!("invalid MAC address '{}'", s)));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidValue(format!("invalid MAC address '{}'", s)))?;
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}
